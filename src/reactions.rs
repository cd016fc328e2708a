use spin_sdk::http::Response;

use crate::config::*;
use crate::core::context::AppContext;
use crate::core::db::{with_retry, JsonStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{add_unique, json_response, message_response, remove_id, require_id};
use crate::models::models::{BookmarkOutcome, Post, User};
use crate::posts::load_post;

fn set_like(ctx: &AppContext, caller_id: &str, raw_post_id: &str, liked: bool) -> Result<(), ApiError> {
    let post_id = require_id(raw_post_id, "Post")?;
    let store = ctx.store();

    let updated = with_retry("update likes", || {
        store.update_json(&post_key(&post_id), |post: &mut Post| {
            if liked {
                add_unique(&mut post.likes, caller_id)
            } else {
                remove_id(&mut post.likes, caller_id)
            }
        })
    })?;

    match updated {
        Some(changed) => {
            tracing::debug!(%post_id, caller_id, liked, changed, "like state set");
            Ok(())
        }
        None => Err(ApiError::not_found("Post not found")),
    }
}

/// Adds the caller to the post's likes. Liking twice changes nothing.
pub fn like_post(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<(), ApiError> {
    set_like(ctx, caller_id, raw_post_id, true)
}

/// Removes the caller from the post's likes, if present.
pub fn dislike_post(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<(), ApiError> {
    set_like(ctx, caller_id, raw_post_id, false)
}

/// Saves the post to the caller's bookmarks, or removes it if already saved.
pub fn toggle_bookmark(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<BookmarkOutcome, ApiError> {
    let post_id = require_id(raw_post_id, "Post")?;
    if load_post(ctx, &post_id)?.is_none() {
        return Err(ApiError::not_found("Post not found"));
    }

    let store = ctx.store();
    let outcome = with_retry("toggle bookmark", || {
        store.update_json(&user_key(caller_id), |user: &mut User| {
            if remove_id(&mut user.bookmarks, &post_id) {
                BookmarkOutcome::Unsaved
            } else {
                add_unique(&mut user.bookmarks, &post_id);
                BookmarkOutcome::Saved
            }
        })
    })?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(%post_id, caller_id, ?outcome, "bookmark toggled");
    Ok(outcome)
}

// === HTTP Handlers ===

pub fn handle_like(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<Response, ApiError> {
    like_post(ctx, caller_id, raw_post_id)?;
    message_response(200, "Post liked")
}

pub fn handle_dislike(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<Response, ApiError> {
    dislike_post(ctx, caller_id, raw_post_id)?;
    message_response(200, "Post disliked")
}

pub fn handle_bookmark(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<Response, ApiError> {
    let outcome = toggle_bookmark(ctx, caller_id, raw_post_id)?;
    let message = match outcome {
        BookmarkOutcome::Saved => "Post bookmarked",
        BookmarkOutcome::Unsaved => "Post removed from bookmark",
    };
    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "type": outcome,
            "message": message,
        }),
    )
}
