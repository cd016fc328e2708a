use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::core::context::AppContext;
use crate::core::db::{best_effort, with_retry, JsonStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    add_unique, json_response, new_id, now_iso, parse_json_body, remove_id, require_id, sanitize_text,
};
use crate::models::models::{Comment, CommentRequest, CommentView, Post};
use crate::populate::{CommentOrder, Joiner};
use crate::posts::load_post;

/// Adds a comment to an existing post. The comment id is recorded in the
/// post's comment index before the document is written, so a comment that
/// never gets linked is still found by the delete cascade.
pub fn add_comment(ctx: &AppContext, caller_id: &str, raw_post_id: &str, text: &str) -> Result<CommentView, ApiError> {
    let text = sanitize_text(text);
    if text.is_empty() {
        return Err(ApiError::validation("text is required"));
    }
    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ApiError::validation("Comment too long (max 1000 chars)"));
    }

    let post_id = require_id(raw_post_id, "Post")?;
    if load_post(ctx, &post_id)?.is_none() {
        return Err(ApiError::not_found("Post not found"));
    }

    let store = ctx.store();
    let comment = Comment {
        id: new_id(),
        text,
        author: caller_id.to_string(),
        post: post_id.clone(),
        created_at: now_iso(),
    };
    let index_key = post_comments_key(&post_id);
    with_retry("index comment", || {
        let mut ids: Vec<String> = store.get_json(&index_key)?.unwrap_or_default();
        if add_unique(&mut ids, &comment.id) {
            store.set_json(&index_key, &ids)?;
        }
        Ok(())
    })?;
    with_retry("write comment", || store.set_json(&comment_key(&comment.id), &comment))?;

    let linked = with_retry("link comment", || {
        store.update_json(&post_key(&post_id), |post: &mut Post| {
            add_unique(&mut post.comments, &comment.id);
        })
    });
    let failure = match linked {
        Ok(Some(())) => None,
        Ok(None) => Some(ApiError::not_found("Post not found")),
        Err(err) => Some(err.into()),
    };
    if let Some(err) = failure {
        tracing::warn!(comment_id = %comment.id, "linking comment failed, removing it");
        // The index entry stays until the document is really gone.
        if best_effort("remove unlinked comment", || store.delete(&comment_key(&comment.id))).is_some() {
            best_effort("unindex comment", || {
                store
                    .update_json(&index_key, |ids: &mut Vec<String>| remove_id(ids, &comment.id))
                    .map(|_| ())
            });
        }
        return Err(err);
    }

    tracing::info!(comment_id = %comment.id, %post_id, "comment added");
    let comment_id = comment.id.clone();
    Joiner::new(ctx)
        .comment(comment)?
        .ok_or_else(|| ApiError::not_found(format!("Author of comment {} not found", comment_id)))
}

/// Comments on a post in the order they were made.
pub fn list_comments(ctx: &AppContext, raw_post_id: &str) -> Result<Vec<CommentView>, ApiError> {
    let post_id = require_id(raw_post_id, "Post")?;
    let post = load_post(ctx, &post_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
    Joiner::new(ctx).comments(&post.comments, CommentOrder::OldestFirst)
}

// === HTTP Handlers ===

pub fn handle_add_comment(
    ctx: &AppContext,
    req: &Request,
    caller_id: &str,
    raw_post_id: &str,
) -> Result<Response, ApiError> {
    let request: CommentRequest = parse_json_body(req.body())?;
    let comment = add_comment(ctx, caller_id, raw_post_id, &request.text)?;
    json_response(
        201,
        &serde_json::json!({
            "success": true,
            "message": "comment added",
            "comment": comment,
        }),
    )
}

pub fn handle_list_comments(ctx: &AppContext, raw_post_id: &str) -> Result<Response, ApiError> {
    let comments = list_comments(ctx, raw_post_id)?;
    json_response(200, &serde_json::json!({ "success": true, "comments": comments }))
}
