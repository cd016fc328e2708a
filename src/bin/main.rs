#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate bord;

    use std::time::Duration;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use bord::config::Settings;
    use bord::core::context::AppContext;
    use bord::core::db::{seed_demo_data, MemoryStore};
    use tracing_subscriber::EnvFilter;

    /// Request bodies carry raw image uploads.
    const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request, Response};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> anyhow::Result<Request> {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => anyhow::bail!("unsupported method {}", other),
            };

            let uri = req.uri().to_string();

            let mut builder = Request::builder();
            builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(value) = value.to_str() {
                    builder.header(name.as_str(), value);
                }
            }

            Ok(builder.body(body.to_vec()).build())
        }

        pub fn spin_to_actix_response(spin_resp: Response) -> actix_web::HttpResponse {
            let status = actix_web::http::StatusCode::from_u16(*spin_resp.status())
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
            let mut response = actix_web::HttpResponse::build(status);

            // Set-Cookie has to survive the trip.
            for (name, value) in spin_resp.headers() {
                let value = String::from_utf8_lossy(value.as_ref()).to_string();
                response.append_header((name.to_string(), value));
            }

            response.body(spin_resp.body().to_vec())
        }
    }

    pub async fn run() -> std::io::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .init();

        let bind_addr = std::env::var("BORD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let settings = Settings::from_env();
        let store = MemoryStore::new();

        if std::env::var("BORD_SEED_DEMO").is_ok_and(|v| v == "1") {
            let ctx = AppContext::in_memory(store.clone(), settings.clone());
            if let Err(err) = seed_demo_data(&ctx) {
                tracing::error!(error = %err, "seeding demo data failed");
            }
        }

        tracing::info!(%bind_addr, "server listening");

        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(AppContext::in_memory(store.clone(), settings.clone())))
                .app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
                .default_service(web::route().to(handle_all))
        })
        .client_request_timeout(Duration::from_secs(30))
        .bind(bind_addr)?
        .run()
        .await
    }

    async fn handle_all(ctx: web::Data<AppContext>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = match adapter::actix_to_spin_request(&req, body) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = %err, "rejecting request");
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "success": false,
                    "message": "Invalid request",
                }));
            }
        };

        adapter::spin_to_actix_response(bord::handlers::route(&ctx, spin_req))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
