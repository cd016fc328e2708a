use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::core::context::AppContext;
use crate::core::db::{best_effort, with_retry, JsonStore};
use crate::core::errors::ApiError;
use crate::core::form::{is_multipart, parse_multipart};
use crate::core::helpers::{
    hash_password, json_response, new_id, normalize_email, now_iso, parse_json_body, require_id,
    sanitize_text,
};
use crate::media;
use crate::models::models::{ProfileUpdate, PublicUser, RegisterRequest, User};

pub(crate) fn load_user(ctx: &AppContext, id: &str) -> Result<Option<User>, ApiError> {
    Ok(ctx.store().get_json::<User>(&user_key(id))?)
}

pub fn find_user_id_by_email(ctx: &AppContext, email: &str) -> anyhow::Result<Option<String>> {
    match normalize_email(email) {
        Some(email) => ctx.store().get_json(&email_index_key(&email)),
        None => Ok(None),
    }
}

/// Creates an account. Does not log the user in.
pub fn register(ctx: &AppContext, request: RegisterRequest) -> Result<PublicUser, ApiError> {
    if request.username.trim().is_empty() || request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::validation("Something is missing, please check!"));
    }

    let username = sanitize_text(&request.username);
    let username_chars = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&username_chars) {
        return Err(ApiError::validation("Username must be 3-50 characters"));
    }
    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::validation("Password must be at least 3 characters"));
    }
    let email = normalize_email(&request.email).ok_or_else(|| ApiError::validation("Invalid email"))?;

    let store = ctx.store();
    let email_key = email_index_key(&email);
    let username_key = username_index_key(&username);

    if store.get_json::<String>(&email_key)?.is_some() {
        return Err(ApiError::Conflict("Try different email".to_string()));
    }
    if store.get_json::<String>(&username_key)?.is_some() {
        return Err(ApiError::Conflict("Username exists".to_string()));
    }

    let user = User {
        id: new_id(),
        username,
        email,
        password: hash_password(&request.password)?,
        profile_picture: None,
        bio: None,
        gender: None,
        posts: Vec::new(),
        bookmarks: Vec::new(),
        followers: Vec::new(),
        following: Vec::new(),
        created_at: now_iso(),
    };

    let written = with_retry("claim email", || store.set_json(&email_key, &user.id))
        .and_then(|_| with_retry("claim username", || store.set_json(&username_key, &user.id)))
        .and_then(|_| with_retry("write user", || store.set_json(&user_key(&user.id), &user)))
        .and_then(|_| {
            with_retry("index user", || {
                let mut users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();
                users.push(user.id.clone());
                store.set_json(USERS_LIST_KEY, &users)
            })
        });

    if let Err(err) = written {
        tracing::warn!(user_id = %user.id, "registration failed, releasing claims");
        best_effort("release user document", || store.delete(&user_key(&user.id)));
        best_effort("release username", || store.delete(&username_key));
        best_effort("release email", || store.delete(&email_key));
        return Err(err.into());
    }

    tracing::info!(user_id = %user.id, "user registered");
    Ok(user.into())
}

pub fn get_profile(ctx: &AppContext, raw_id: &str) -> Result<PublicUser, ApiError> {
    let id = require_id(raw_id, "User")?;
    load_user(ctx, &id)?
        .map(PublicUser::from)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Applies the supplied fields to the caller's own profile. A new picture is
/// normalized and uploaded before the user document is touched.
pub fn edit_profile(ctx: &AppContext, caller_id: &str, update: ProfileUpdate) -> Result<PublicUser, ApiError> {
    if let Some(bio) = &update.bio {
        if bio.chars().count() > MAX_BIO_LENGTH {
            return Err(ApiError::validation("Bio too long (max 500 chars)"));
        }
    }

    let picture_url = match &update.profile_picture {
        Some(data) => Some(media::store_image(ctx, data)?),
        None => None,
    };

    let bio = update.bio.as_deref().map(sanitize_text);
    let gender = update.gender.as_deref().map(sanitize_text);

    let updated = ctx.store().update_json(&user_key(caller_id), |user: &mut User| {
        if let Some(bio) = bio {
            user.bio = if bio.is_empty() { None } else { Some(bio) };
        }
        if let Some(gender) = gender {
            user.gender = if gender.is_empty() { None } else { Some(gender) };
        }
        if let Some(url) = picture_url {
            user.profile_picture = Some(url);
        }
        user.clone()
    })?;

    let user = updated.ok_or_else(|| ApiError::not_found("User not found"))?;
    tracing::info!(user_id = %user.id, "profile updated");
    Ok(user.into())
}

/// Every user except the caller, in registration order.
pub fn suggested_users(ctx: &AppContext, caller_id: &str) -> Result<Vec<PublicUser>, ApiError> {
    let store = ctx.store();
    let ids: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();

    let mut users = Vec::new();
    for id in ids.iter().filter(|id| id.as_str() != caller_id) {
        if let Some(user) = store.get_json::<User>(&user_key(id))? {
            users.push(user.into());
        }
    }
    Ok(users)
}

// === HTTP Handlers ===

pub fn handle_register(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let request: RegisterRequest = parse_json_body(req.body())?;
    register(ctx, request)?;

    json_response(
        201,
        &serde_json::json!({
            "success": true,
            "message": "Account Created Successfully",
        }),
    )
}

pub fn handle_get_profile(ctx: &AppContext, raw_id: &str) -> Result<Response, ApiError> {
    let user = get_profile(ctx, raw_id)?;
    json_response(200, &serde_json::json!({ "success": true, "user": user }))
}

pub fn handle_edit_profile(ctx: &AppContext, req: &Request, caller_id: &str) -> Result<Response, ApiError> {
    let content_type = req.header("content-type").and_then(|h| h.as_str());

    let update = if is_multipart(content_type) {
        let form = parse_multipart(content_type.unwrap_or_default(), req.body())?;
        ProfileUpdate {
            bio: form.field("bio").map(str::to_string),
            gender: form.field("gender").map(str::to_string),
            profile_picture: form
                .file(&["profilePicture", "profilePhoto"])
                .map(<[u8]>::to_vec),
        }
    } else {
        parse_json_body(req.body())?
    };

    let user = edit_profile(ctx, caller_id, update)?;
    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "message": "Profile updated.",
            "user": user,
        }),
    )
}

pub fn handle_suggested_users(ctx: &AppContext, caller_id: &str) -> Result<Response, ApiError> {
    let users = suggested_users(ctx, caller_id)?;
    json_response(200, &serde_json::json!({ "success": true, "users": users }))
}
