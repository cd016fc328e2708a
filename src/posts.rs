use std::collections::HashSet;

use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::core::context::AppContext;
use crate::core::db::{best_effort, with_retry, JsonStore, KvStore};
use crate::core::errors::ApiError;
use crate::core::form::{is_multipart, parse_multipart};
use crate::core::helpers::{
    add_unique, json_response, message_response, new_id, now_iso, remove_id, require_id, sanitize_text,
};
use crate::core::query_params::{get_string, parse_query_params};
use crate::media;
use crate::models::models::{NewPost, Post, PostView, PublicUser, User};
use crate::populate::{CommentOrder, Joiner};

pub(crate) fn load_post(ctx: &AppContext, id: &str) -> Result<Option<Post>, ApiError> {
    Ok(ctx.store().get_json::<Post>(&post_key(id))?)
}

fn detach(store: &dyn KvStore, post: &Post) -> anyhow::Result<()> {
    with_retry("detach from author", || {
        store
            .update_json(&user_key(&post.author), |user: &mut User| remove_id(&mut user.posts, &post.id))
            .map(|_| ())
    })?;
    with_retry("remove from feed", || {
        let mut feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
        if remove_id(&mut feed, &post.id) {
            store.set_json(FEED_KEY, &feed)?;
        }
        Ok(())
    })
}

/// Undoes [`detach`]. Feed position is restored by creation time when read.
fn reattach(store: &dyn KvStore, post: &Post) {
    let restored = with_retry("reattach to author", || {
        store
            .update_json(&user_key(&post.author), |user: &mut User| add_unique(&mut user.posts, &post.id))
            .map(|_| ())
    })
    .and_then(|_| {
        with_retry("restore feed entry", || {
            let mut feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
            if !feed.contains(&post.id) {
                feed.insert(0, post.id.clone());
                store.set_json(FEED_KEY, &feed)?;
            }
            Ok(())
        })
    });
    if let Err(err) = restored {
        tracing::error!(post_id = %post.id, error = %err, "could not reattach post after failed delete");
    }
}

/// Rolls back a half-created post: unlink it from its author, then drop the
/// document, but only once the author is known not to list it.
fn withdraw(store: &dyn KvStore, post: &Post) {
    best_effort("unlink withdrawn post", || {
        store
            .update_json(&user_key(&post.author), |user: &mut User| remove_id(&mut user.posts, &post.id))
            .map(|_| ())
    });
    let listed = store
        .get_json::<User>(&user_key(&post.author))
        .map(|user| user.is_some_and(|u| u.posts.contains(&post.id)));
    match listed {
        Ok(false) => {
            best_effort("delete withdrawn post", || store.delete(&post_key(&post.id)));
        }
        Ok(true) => tracing::error!(post_id = %post.id, "withdrawn post is still listed by its author, keeping it"),
        Err(err) => tracing::error!(post_id = %post.id, error = %err, "cannot confirm withdrawal, keeping post"),
    }
}

/// Creates a post from an uploaded image. The image is normalized and stored
/// first; the post is then linked into its author's list and the feed.
pub fn add_post(ctx: &AppContext, author_id: &str, new_post: NewPost) -> Result<PostView<PublicUser>, ApiError> {
    let image = new_post
        .image
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ApiError::validation("Image required"))?;

    let caption = new_post.caption.as_deref().map(sanitize_text).filter(|c| !c.is_empty());
    if caption.as_ref().is_some_and(|c| c.chars().count() > MAX_CAPTION_LENGTH) {
        return Err(ApiError::validation("Caption too long (max 2200 chars)"));
    }

    let store = ctx.store();
    if store.get_json::<User>(&user_key(author_id))?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let image_url = media::store_image(ctx, &image)?;

    let post = Post {
        id: new_id(),
        caption,
        image: image_url,
        author: author_id.to_string(),
        likes: Vec::new(),
        comments: Vec::new(),
        created_at: now_iso(),
    };
    with_retry("write post", || store.set_json(&post_key(&post.id), &post))?;

    let linked = with_retry("link to author", || {
        store.update_json(&user_key(author_id), |user: &mut User| {
            add_unique(&mut user.posts, &post.id);
            user.clone()
        })
    });
    let author = match linked {
        Ok(Some(author)) => author,
        Ok(None) => {
            withdraw(store, &post);
            return Err(ApiError::not_found("User not found"));
        }
        Err(err) => {
            tracing::warn!(post_id = %post.id, "linking post to author failed, withdrawing it");
            withdraw(store, &post);
            return Err(err.into());
        }
    };

    let published = with_retry("publish to feed", || {
        let mut feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
        feed.insert(0, post.id.clone());
        store.set_json(FEED_KEY, &feed)
    });
    if let Err(err) = published {
        tracing::warn!(post_id = %post.id, "feed update failed, withdrawing post");
        withdraw(store, &post);
        return Err(err.into());
    }

    tracing::info!(post_id = %post.id, author_id, "post created");

    Ok(PostView {
        id: post.id,
        caption: post.caption,
        image: post.image,
        author: author.into(),
        likes: post.likes,
        comments: Vec::new(),
        created_at: post.created_at,
    })
}

fn collect_posts(ctx: &AppContext, author: Option<&str>) -> Result<Vec<PostView>, ApiError> {
    let store = ctx.store();
    let feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();

    let mut posts = Vec::new();
    for id in &feed {
        if let Some(post) = store.get_json::<Post>(&post_key(id))? {
            if author.map_or(true, |a| post.author == a) {
                posts.push(post);
            }
        }
    }
    // Stable: feed order breaks timestamp ties.
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut joiner = Joiner::new(ctx);
    let mut views = Vec::with_capacity(posts.len());
    for post in posts {
        if let Some(view) = joiner.post(post, CommentOrder::NewestFirst)? {
            views.push(view);
        }
    }
    Ok(views)
}

/// Every post, newest first, with authors and comment threads joined in.
pub fn list_all_posts(ctx: &AppContext) -> Result<Vec<PostView>, ApiError> {
    collect_posts(ctx, None)
}

pub fn list_user_posts(ctx: &AppContext, author_id: &str) -> Result<Vec<PostView>, ApiError> {
    collect_posts(ctx, Some(author_id))
}

/// Deletes a post owned by `caller_id` together with its comments.
///
/// Order: detach from the author's list and the feed, delete comments, delete
/// the post document last. A failure before the last step reattaches the post
/// so it stays reachable; repeating the call finishes the job.
pub fn delete_post(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<(), ApiError> {
    let post_id = require_id(raw_post_id, "Post")?;
    let post = load_post(ctx, &post_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
    if post.author != caller_id {
        tracing::warn!(%post_id, %caller_id, "delete refused, caller is not the author");
        return Err(ApiError::Forbidden);
    }

    let store = ctx.store();
    if let Err(err) = detach(store, &post) {
        tracing::warn!(%post_id, "detach failed, reattaching post");
        reattach(store, &post);
        return Err(err.into());
    }

    let index_key = post_comments_key(&post_id);
    let mut deleted: HashSet<String> = HashSet::new();
    let mut cascade = || -> anyhow::Result<()> {
        // Re-read between passes so comments added meanwhile are swept too.
        // The index also holds comments whose link to the post never landed.
        for _ in 0..WRITE_ATTEMPTS {
            let mut pending: Vec<String> = store
                .get_json::<Post>(&post_key(&post_id))?
                .map(|p| p.comments)
                .unwrap_or_default();
            let indexed: Vec<String> = store.get_json(&index_key)?.unwrap_or_default();
            for id in &indexed {
                add_unique(&mut pending, id);
            }
            pending.retain(|c| !deleted.contains(c));
            if pending.is_empty() {
                return Ok(());
            }
            for comment_id in pending {
                with_retry("delete comment", || store.delete(&comment_key(&comment_id)))?;
                deleted.insert(comment_id);
            }
        }
        Ok(())
    };

    if let Err(err) = cascade() {
        tracing::warn!(%post_id, "comment cascade failed, reattaching post");
        best_effort("prune deleted comments", || {
            store
                .update_json(&post_key(&post_id), |p: &mut Post| p.comments.retain(|c| !deleted.contains(c)))
                .map(|_| ())
        });
        best_effort("prune comment index", || {
            store
                .update_json(&index_key, |ids: &mut Vec<String>| ids.retain(|c| !deleted.contains(c)))
                .map(|_| ())
        });
        reattach(store, &post);
        return Err(err.into());
    }

    if let Err(err) = with_retry("delete post", || store.delete(&post_key(&post_id))) {
        reattach(store, &post);
        return Err(err.into());
    }
    best_effort("drop comment index", || store.delete(&index_key));

    tracing::info!(%post_id, comments = deleted.len(), "post deleted");
    Ok(())
}

// === HTTP Handlers ===

pub fn handle_add_post(ctx: &AppContext, req: &Request, caller_id: &str) -> Result<Response, ApiError> {
    let content_type = req.header("content-type").and_then(|h| h.as_str());
    if !is_multipart(content_type) {
        return Err(ApiError::validation("Image required"));
    }
    let form = parse_multipart(content_type.unwrap_or_default(), req.body())?;
    let new_post = NewPost {
        caption: form.field("caption").map(str::to_string),
        image: form.file(&["image"]).map(<[u8]>::to_vec),
    };

    let post = add_post(ctx, caller_id, new_post)?;
    json_response(
        201,
        &serde_json::json!({
            "success": true,
            "message": "New post added",
            "post": post,
        }),
    )
}

pub fn handle_all_posts(ctx: &AppContext) -> Result<Response, ApiError> {
    let posts = list_all_posts(ctx)?;
    json_response(200, &serde_json::json!({ "success": true, "posts": posts }))
}

/// The caller's posts, or another author's with `?author=<id>`.
pub fn handle_user_posts(ctx: &AppContext, req: &Request, caller_id: &str) -> Result<Response, ApiError> {
    let params = parse_query_params(req.uri());
    let author_id = match get_string(&params, "author") {
        Some(raw) => require_id(&raw, "User")?,
        None => caller_id.to_string(),
    };

    let posts = list_user_posts(ctx, &author_id)?;
    json_response(200, &serde_json::json!({ "success": true, "posts": posts }))
}

pub fn handle_delete_post(ctx: &AppContext, caller_id: &str, raw_post_id: &str) -> Result<Response, ApiError> {
    delete_post(ctx, caller_id, raw_post_id)?;
    message_response(200, "Post deleted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments::add_comment;
    use crate::core::context::test_context;
    use crate::core::db::{FaultyStore, MemoryStore};
    use crate::media::sample_png;
    use crate::models::models::{Comment, RegisterRequest};
    use crate::users;

    fn register(ctx: &AppContext, name: &str) -> String {
        users::register(
            ctx,
            RegisterRequest {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password: "pw123".to_string(),
            },
        )
        .unwrap()
        .id
    }

    fn publish(ctx: &AppContext, author: &str, caption: &str) -> String {
        add_post(
            ctx,
            author,
            NewPost {
                caption: Some(caption.to_string()),
                image: Some(sample_png(32, 32)),
            },
        )
        .unwrap()
        .id
    }

    fn user(store: &MemoryStore, id: &str) -> User {
        store.get_json(&user_key(id)).unwrap().unwrap()
    }

    /// A post document exists exactly when its author lists it.
    fn assert_posts_match_author(store: &MemoryStore, author: &str) {
        let mut listed = user(store, author).posts;
        listed.sort();
        let stored: Vec<String> = store
            .keys_with_prefix("post:")
            .iter()
            .map(|k| k.trim_start_matches("post:").to_string())
            .collect();
        assert_eq!(stored, listed);
    }

    #[test]
    fn add_post_requires_an_image() {
        let (ctx, store) = test_context();
        let a = register(&ctx, "anna");
        let err = add_post(
            &ctx,
            &a,
            NewPost {
                caption: Some("no picture".to_string()),
                image: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(store.keys_with_prefix("post:").is_empty());
    }

    #[test]
    fn add_post_links_author_and_hides_password() {
        let (ctx, store) = test_context();
        let a = register(&ctx, "anna");
        let view = add_post(
            &ctx,
            &a,
            NewPost {
                caption: Some("<i>first</i>".to_string()),
                image: Some(sample_png(1200, 900)),
            },
        )
        .unwrap();

        assert_eq!(view.caption.as_deref(), Some("first"));
        assert_eq!(view.author.id, a);
        assert!(view.image.starts_with("/media/"));
        assert!(!serde_json::to_string(&view).unwrap().contains("password"));
        assert_eq!(user(&store, &a).posts, vec![view.id.clone()]);
        assert_eq!(store.keys_with_prefix("media:").len(), 1);
    }

    #[test]
    fn listings_are_newest_first_and_filter_by_author() {
        let (ctx, _) = test_context();
        let a = register(&ctx, "anna");
        let b = register(&ctx, "bert");
        let p1 = publish(&ctx, &a, "one");
        let p2 = publish(&ctx, &b, "two");
        let p3 = publish(&ctx, &a, "three");

        let all: Vec<String> = list_all_posts(&ctx).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(all, vec![p3.clone(), p2, p1.clone()]);

        let mine = list_user_posts(&ctx, &a).unwrap();
        assert_eq!(mine.iter().map(|p| p.id.clone()).collect::<Vec<_>>(), vec![p3, p1]);
        assert_eq!(mine[0].author.username, "anna");
    }

    #[test]
    fn comments_in_listings_are_newest_first() {
        let (ctx, _) = test_context();
        let a = register(&ctx, "anna");
        let b = register(&ctx, "bert");
        let post = publish(&ctx, &a, "hello");
        add_comment(&ctx, &b, &post, "first!").unwrap();
        add_comment(&ctx, &a, &post, "thanks").unwrap();

        let all = list_all_posts(&ctx).unwrap();
        let texts: Vec<&str> = all[0].comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["thanks", "first!"]);
        assert_eq!(all[0].comments[1].author.username, "bert");
    }

    #[test]
    fn delete_post_cascades() {
        let (ctx, store) = test_context();
        let a = register(&ctx, "anna");
        let b = register(&ctx, "bert");
        let keep = publish(&ctx, &a, "keep");
        let doomed = publish(&ctx, &a, "doomed");
        add_comment(&ctx, &b, &doomed, "nice").unwrap();
        add_comment(&ctx, &a, &doomed, "ty").unwrap();
        add_comment(&ctx, &b, &keep, "also nice").unwrap();

        delete_post(&ctx, &a, &doomed).unwrap();

        assert!(load_post(&ctx, &doomed).unwrap().is_none());
        assert_eq!(user(&store, &a).posts, vec![keep.clone()]);
        let remaining: Vec<Comment> = store
            .keys_with_prefix("comment:")
            .iter()
            .map(|k| store.get_json(k).unwrap().unwrap())
            .collect();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|c| c.post != doomed));
        assert_eq!(store.keys_with_prefix("post_comments:"), vec![post_comments_key(&keep)]);

        let listed: Vec<String> = list_user_posts(&ctx, &a).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(listed, vec![keep]);
    }

    #[test]
    fn only_the_author_may_delete() {
        let (ctx, store) = test_context();
        let a = register(&ctx, "anna");
        let b = register(&ctx, "bert");
        let post = publish(&ctx, &a, "mine");
        add_comment(&ctx, &b, &post, "hmm").unwrap();
        let before = load_post(&ctx, &post).unwrap();

        let err = delete_post(&ctx, &b, &post).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
        assert_eq!(load_post(&ctx, &post).unwrap(), before);
        assert_eq!(user(&store, &a).posts, vec![post]);
        assert_eq!(store.keys_with_prefix("comment:").len(), 1);
    }

    #[test]
    fn delete_missing_post_is_not_found() {
        let (ctx, _) = test_context();
        let a = register(&ctx, "anna");
        assert!(matches!(delete_post(&ctx, &a, &new_id()), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn add_post_is_withdrawn_when_feed_update_fails() {
        let (setup, store) = test_context();
        let a = register(&setup, "anna");
        let ctx = FaultyStore::new(store.clone())
            .failing_sets(|k| k == FEED_KEY)
            .into_context();

        let err = add_post(
            &ctx,
            &a,
            NewPost {
                caption: None,
                image: Some(sample_png(8, 8)),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
        assert!(store.keys_with_prefix("post:").is_empty());
        assert_posts_match_author(&store, &a);
    }

    #[test]
    fn add_post_is_withdrawn_when_author_link_fails() {
        let (setup, store) = test_context();
        let a = register(&setup, "anna");
        let ctx = FaultyStore::new(store.clone())
            .failing_sets(|k| k.starts_with("user:"))
            .into_context();

        let err = add_post(
            &ctx,
            &a,
            NewPost {
                caption: None,
                image: Some(sample_png(8, 8)),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
        assert!(store.keys_with_prefix("post:").is_empty());
        assert_posts_match_author(&store, &a);
    }

    #[test]
    fn failed_feed_detach_keeps_post_linked() {
        let (setup, store) = test_context();
        let a = register(&setup, "anna");
        let post = publish(&setup, &a, "stays");
        let faulty = FaultyStore::new(store.clone()).failing_sets(|k| k == FEED_KEY);
        let armed = faulty.armed.clone();
        let ctx = faulty.into_context();

        assert!(delete_post(&ctx, &a, &post).is_err());
        assert!(load_post(&ctx, &post).unwrap().is_some());
        assert_eq!(user(&store, &a).posts, vec![post.clone()]);
        assert_eq!(list_all_posts(&ctx).unwrap().len(), 1);
        assert_posts_match_author(&store, &a);

        armed.set(false);
        delete_post(&ctx, &a, &post).unwrap();
        assert_posts_match_author(&store, &a);
        assert!(list_all_posts(&ctx).unwrap().is_empty());
    }

    #[test]
    fn failed_author_detach_keeps_post_linked() {
        let (setup, store) = test_context();
        let a = register(&setup, "anna");
        let post = publish(&setup, &a, "stays");
        let ctx = FaultyStore::new(store.clone())
            .failing_sets(|k| k.starts_with("user:"))
            .into_context();

        assert!(delete_post(&ctx, &a, &post).is_err());
        assert!(load_post(&ctx, &post).unwrap().is_some());
        assert_eq!(list_all_posts(&ctx).unwrap().len(), 1);
        assert_posts_match_author(&store, &a);
    }

    #[test]
    fn failed_cascade_leaves_post_reachable_and_retry_completes() {
        let (setup, store) = test_context();
        let a = register(&setup, "anna");
        let post = publish(&setup, &a, "sticky");
        add_comment(&setup, &a, &post, "c1").unwrap();

        let faulty = FaultyStore::new(store.clone()).failing_deletes(|k| k.starts_with("comment:"));
        let armed = faulty.armed.clone();
        let ctx = faulty.into_context();

        let err = delete_post(&ctx, &a, &post).unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
        assert!(load_post(&ctx, &post).unwrap().is_some());
        assert_eq!(user(&store, &a).posts, vec![post.clone()]);
        assert_eq!(list_all_posts(&ctx).unwrap().len(), 1);

        armed.set(false);
        delete_post(&ctx, &a, &post).unwrap();
        assert!(load_post(&ctx, &post).unwrap().is_none());
        assert!(store.keys_with_prefix("comment:").is_empty());
        assert!(user(&store, &a).posts.is_empty());
    }

    #[test]
    fn unlinked_comments_are_swept_by_delete() {
        let (setup, store) = test_context();
        let a = register(&setup, "anna");
        let post = publish(&setup, &a, "lonely");
        let ctx = FaultyStore::new(store.clone())
            .failing_sets(|k| k.starts_with("post:"))
            .failing_deletes(|k| k.starts_with("comment:"))
            .into_context();

        assert!(add_comment(&ctx, &a, &post, "stranded").is_err());
        assert_eq!(store.keys_with_prefix("comment:").len(), 1);
        assert!(load_post(&setup, &post).unwrap().unwrap().comments.is_empty());

        delete_post(&setup, &a, &post).unwrap();
        assert!(store.keys_with_prefix("comment:").is_empty());
        assert!(store.keys_with_prefix("post_comments:").is_empty());
    }
}
