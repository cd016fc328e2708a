pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod follow;
pub mod handlers;
pub mod media;
pub mod messages;
pub mod models;
pub mod populate;
pub mod posts;
pub mod reactions;
pub mod users;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<spin_sdk::http::Response> {
    let ctx = match crate::core::context::AppContext::spin(config::Settings::from_env()) {
        Ok(ctx) => ctx,
        Err(err) => return Ok(crate::core::errors::ApiError::from(err).into()),
    };
    Ok(handlers::route(&ctx, req))
}
