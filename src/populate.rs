//! Read-time joins: expanding stored ids into the projected documents that
//! responses embed.

use std::collections::HashMap;

use crate::config::{comment_key, user_key};
use crate::core::context::AppContext;
use crate::core::db::JsonStore;
use crate::core::errors::ApiError;
use crate::models::models::{AuthorSummary, Comment, CommentView, Post, PostView, User};

/// Loads a user and projects it to `P`, e.g. [`AuthorSummary`] or
/// [`crate::models::models::PublicUser`].
pub fn load_projected<P: From<User>>(ctx: &AppContext, user_id: &str) -> Result<Option<P>, ApiError> {
    Ok(ctx.store().get_json::<User>(&user_key(user_id))?.map(P::from))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommentOrder {
    OldestFirst,
    NewestFirst,
}

/// Memoizes author lookups across one response.
pub struct Joiner<'a> {
    ctx: &'a AppContext,
    authors: HashMap<String, Option<AuthorSummary>>,
}

impl<'a> Joiner<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self {
            ctx,
            authors: HashMap::new(),
        }
    }

    pub fn author(&mut self, user_id: &str) -> Result<Option<AuthorSummary>, ApiError> {
        if let Some(cached) = self.authors.get(user_id) {
            return Ok(cached.clone());
        }
        let summary = load_projected::<AuthorSummary>(self.ctx, user_id)?;
        self.authors.insert(user_id.to_string(), summary.clone());
        Ok(summary)
    }

    pub fn comment(&mut self, comment: Comment) -> Result<Option<CommentView>, ApiError> {
        let Some(author) = self.author(&comment.author)? else {
            tracing::warn!(comment_id = %comment.id, "comment author missing, skipping");
            return Ok(None);
        };
        Ok(Some(CommentView {
            id: comment.id,
            text: comment.text,
            author,
            post: comment.post,
            created_at: comment.created_at,
        }))
    }

    /// Resolves the comment ids listed on a post. Ids whose document is gone
    /// are skipped.
    pub fn comments(&mut self, ids: &[String], order: CommentOrder) -> Result<Vec<CommentView>, ApiError> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(comment) = self.ctx.store().get_json::<Comment>(&comment_key(id))? {
                if let Some(view) = self.comment(comment)? {
                    views.push(view);
                }
            }
        }
        if order == CommentOrder::NewestFirst {
            views.reverse();
            views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(views)
    }

    pub fn post(&mut self, post: Post, order: CommentOrder) -> Result<Option<PostView>, ApiError> {
        let Some(author) = self.author(&post.author)? else {
            tracing::warn!(post_id = %post.id, "post author missing, skipping");
            return Ok(None);
        };
        let comments = self.comments(&post.comments, order)?;
        Ok(Some(PostView {
            id: post.id,
            caption: post.caption,
            image: post.image,
            author,
            likes: post.likes,
            comments,
            created_at: post.created_at,
        }))
    }
}
