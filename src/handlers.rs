use spin_sdk::http::{Request, Response};

use crate::auth::require_session;
use crate::core::context::AppContext;
use crate::core::errors::ApiError;
use crate::core::helpers::message_response;
use crate::{auth, comments, follow, media, messages, posts, reactions, users};

/// Routes one request to its operation. Protected routes are rejected with
/// 401 before any operation runs.
pub fn route(ctx: &AppContext, req: Request) -> Response {
    let method = req.method().to_string().to_uppercase();
    let path = req.path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match dispatch(ctx, &req, &method, &segments) {
        Ok(resp) => resp,
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(%method, %path, error = ?err, "request failed");
            } else if err.is_auth() {
                tracing::info!(%method, %path, status = err.status().as_u16(), "request denied");
            } else {
                tracing::debug!(%method, %path, status = err.status().as_u16(), "request rejected");
            }
            err.into()
        }
    }
}

fn dispatch(ctx: &AppContext, req: &Request, method: &str, segments: &[&str]) -> Result<Response, ApiError> {
    let session = || require_session(ctx, req);

    match (method, segments) {
        ("GET", []) => message_response(200, "I'm coming from backend."),
        ("GET", ["media", id]) => media::handle_get_media(ctx, id),

        // Accounts and graph
        ("POST", ["api", "v1", "user", "register"]) => users::handle_register(ctx, req),
        ("POST", ["api", "v1", "user", "login"]) => auth::handle_login(ctx, req),
        ("GET" | "POST", ["api", "v1", "user", "logout"]) => auth::handle_logout(),
        ("GET", ["api", "v1", "user", "suggested"]) => users::handle_suggested_users(ctx, &session()?),
        ("POST", ["api", "v1", "user", "profile", "edit"]) => users::handle_edit_profile(ctx, req, &session()?),
        ("GET", ["api", "v1", "user", id, "profile"]) => {
            session()?;
            users::handle_get_profile(ctx, id)
        }
        ("POST", ["api", "v1", "user", "followorunfollow", id]) => {
            follow::handle_follow_or_unfollow(ctx, &session()?, id)
        }

        // Posts
        ("POST", ["api", "v1", "post", "addpost"]) => posts::handle_add_post(ctx, req, &session()?),
        ("GET", ["api", "v1", "post", "all"]) => {
            session()?;
            posts::handle_all_posts(ctx)
        }
        ("GET", ["api", "v1", "post", "userpost", "all"]) => posts::handle_user_posts(ctx, req, &session()?),
        ("DELETE", ["api", "v1", "post", "delete", id]) => posts::handle_delete_post(ctx, &session()?, id),
        ("GET" | "POST", ["api", "v1", "post", id, "like"]) => reactions::handle_like(ctx, &session()?, id),
        ("GET" | "POST", ["api", "v1", "post", id, "dislike"]) => reactions::handle_dislike(ctx, &session()?, id),
        ("GET" | "POST", ["api", "v1", "post", id, "bookmark"]) => reactions::handle_bookmark(ctx, &session()?, id),
        ("POST", ["api", "v1", "post", id, "comment"]) => comments::handle_add_comment(ctx, req, &session()?, id),
        ("GET" | "POST", ["api", "v1", "post", id, "comment", "all"]) => {
            session()?;
            comments::handle_list_comments(ctx, id)
        }

        // Messaging
        ("POST", ["api", "v1", "message", "send", id]) => messages::handle_send_message(ctx, req, &session()?, id),
        ("GET", ["api", "v1", "message", "all", id]) => messages::handle_get_messages(ctx, &session()?, id),

        _ => Err(ApiError::not_found("No route found")),
    }
}
