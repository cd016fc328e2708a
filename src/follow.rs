use spin_sdk::http::Response;

use crate::config::*;
use crate::core::context::AppContext;
use crate::core::db::{with_retry, JsonStore, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{add_unique, json_response, remove_id, require_id};
use crate::models::models::{FollowOutcome, User};
use crate::users::load_user;

/// Set-add or set-remove `id` on one edge list of a user document. Returns
/// `false` when the user document is gone.
fn apply_edge(
    store: &dyn KvStore,
    user_id: &str,
    id: &str,
    follow: bool,
    side: fn(&mut User) -> &mut Vec<String>,
) -> anyhow::Result<bool> {
    let touched = store.update_json(&user_key(user_id), |user: &mut User| {
        let list = side(user);
        if follow {
            add_unique(list, id);
        } else {
            remove_id(list, id);
        }
    })?;
    Ok(touched.is_some())
}

fn following(user: &mut User) -> &mut Vec<String> {
    &mut user.following
}

fn followers(user: &mut User) -> &mut Vec<String> {
    &mut user.followers
}

/// Toggles the follow edge from `caller_id` to `raw_target`, keeping the
/// caller's `following` and the target's `followers` in step.
pub fn follow_or_unfollow(ctx: &AppContext, caller_id: &str, raw_target: &str) -> Result<FollowOutcome, ApiError> {
    let target_id = require_id(raw_target, "User")?;
    if target_id == caller_id {
        return Err(ApiError::validation("You cannot follow/unfollow yourself"));
    }

    let caller = load_user(ctx, caller_id)?.ok_or_else(|| ApiError::not_found("User not found"))?;
    if load_user(ctx, &target_id)?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let follow = !caller.following.contains(&target_id);
    let store = ctx.store();

    let caller_side = with_retry("update following", || {
        apply_edge(store, caller_id, &target_id, follow, following)
    })?;
    if !caller_side {
        return Err(ApiError::not_found("User not found"));
    }

    // A target deleted in between counts as already applied.
    if let Err(err) = with_retry("update followers", || {
        apply_edge(store, &target_id, caller_id, follow, followers)
    }) {
        tracing::warn!(%caller_id, %target_id, "followers update failed, reverting following");
        if let Err(revert) = with_retry("revert following", || {
            apply_edge(store, caller_id, &target_id, !follow, following)
        }) {
            tracing::error!(%caller_id, %target_id, error = %revert, "follow edge left one-sided");
        }
        return Err(err.into());
    }

    let outcome = if follow {
        FollowOutcome::Followed
    } else {
        FollowOutcome::Unfollowed
    };
    tracing::info!(%caller_id, %target_id, ?outcome, "follow toggled");
    Ok(outcome)
}

// === HTTP Handlers ===

pub fn handle_follow_or_unfollow(ctx: &AppContext, caller_id: &str, raw_target: &str) -> Result<Response, ApiError> {
    let outcome = follow_or_unfollow(ctx, caller_id, raw_target)?;
    let message = match outcome {
        FollowOutcome::Followed => "followed successfully",
        FollowOutcome::Unfollowed => "Unfollowed successfully",
    };
    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "message": message,
            "type": outcome,
        }),
    )
}
