use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use spin_sdk::http::{Request, Response};

use crate::config::{email_index_key, post_key, user_key, Settings, SESSION_COOKIE};
use crate::core::context::AppContext;
use crate::core::db::JsonStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{normalize_email, parse_json_body, verify_password};
use crate::models::models::{Claims, LoginRequest, Post, SessionUser, User};

// === Credentials ===

/// Signs a session credential for `user_id`.
pub fn issue_token(settings: &Settings, user_id: &str) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let ttl = settings.session_max_age_secs().max(0) as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl,
    };
    let key = EncodingKey::from_secret(settings.secret_key.as_bytes());
    Ok(encode(&Header::default(), &claims, &key)?)
}

/// Returns the user id carried by a valid, unexpired credential.
pub fn verify_token(settings: &Settings, token: &str) -> Option<String> {
    let key = DecodingKey::from_secret(settings.secret_key.as_bytes());
    match decode::<Claims>(token, &key, &Validation::default()) {
        Ok(data) => Some(data.claims.sub),
        Err(err) => {
            tracing::debug!(error = %err, "rejected session token");
            None
        }
    }
}

pub fn session_cookie(settings: &Settings, token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE,
        token,
        settings.session_max_age_secs()
    )
}

pub fn cleared_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0", SESSION_COOKIE)
}

fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.header(name).and_then(|h| h.as_str())
}

/// Session token from the `token` cookie, or a bearer token for
/// non-browser clients.
fn session_token(req: &Request) -> Option<String> {
    let from_cookie = header_str(req, "cookie").and_then(|cookies| {
        cookies
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string())
    });

    from_cookie
        .filter(|token| !token.is_empty())
        .or_else(|| {
            header_str(req, "authorization")
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_string)
        })
}

/// The authenticated caller's id, if the request carries a valid session
/// for a user that still exists.
pub fn authenticate(ctx: &AppContext, req: &Request) -> Option<String> {
    let token = session_token(req)?;
    let user_id = verify_token(&ctx.settings, &token)?;
    match ctx.store().get_json::<User>(&user_key(&user_id)) {
        Ok(Some(_)) => Some(user_id),
        Ok(None) => None,
        Err(err) => {
            tracing::error!(error = %err, "session lookup failed");
            None
        }
    }
}

pub fn require_session(ctx: &AppContext, req: &Request) -> Result<String, ApiError> {
    authenticate(ctx, req).ok_or(ApiError::Unauthenticated)
}

// === Operations ===

/// Checks credentials and returns the sanitized user plus a fresh session
/// token. Unknown email and wrong password fail identically.
pub fn login(ctx: &AppContext, request: LoginRequest) -> Result<(SessionUser, String), ApiError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::validation("Something is missing, please check!"));
    }

    let email = normalize_email(&request.email).ok_or(ApiError::InvalidCredentials)?;
    let store = ctx.store();

    let user = match store.get_json::<String>(&email_index_key(&email))? {
        Some(id) => store.get_json::<User>(&user_key(&id))?,
        None => None,
    };
    let user = match user {
        Some(u) if verify_password(&request.password, &u.password) => u,
        _ => {
            tracing::info!("failed login attempt");
            return Err(ApiError::InvalidCredentials);
        }
    };

    let token = issue_token(&ctx.settings, &user.id)?;

    // Only posts that still exist and still name this user as author.
    let mut posts = Vec::with_capacity(user.posts.len());
    for id in &user.posts {
        if let Some(post) = store.get_json::<Post>(&post_key(id))? {
            if post.author == user.id {
                posts.push(post);
            }
        }
    }

    tracing::info!(user_id = %user.id, "user logged in");

    let session_user = SessionUser {
        id: user.id,
        username: user.username,
        email: user.email,
        profile_picture: user.profile_picture,
        bio: user.bio,
        gender: user.gender,
        followers: user.followers,
        following: user.following,
        bookmarks: user.bookmarks,
        posts,
    };
    Ok((session_user, token))
}

// === HTTP Handlers ===

pub fn handle_login(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let request: LoginRequest = parse_json_body(req.body())?;
    let (user, token) = login(ctx, request)?;

    let body = serde_json::json!({
        "success": true,
        "message": format!("Welcome back {}", user.username),
        "user": user,
    });
    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "application/json")
        .header("Set-Cookie", session_cookie(&ctx.settings, &token))
        .body(serde_json::to_vec(&body)?)
        .build())
}

pub fn handle_logout() -> Result<Response, ApiError> {
    let body = serde_json::json!({
        "success": true,
        "message": "Logged out successfully",
    });
    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "application/json")
        .header("Set-Cookie", cleared_session_cookie())
        .body(serde_json::to_vec(&body)?)
        .build())
}
