use std::collections::HashSet;
use std::sync::OnceLock;

use ammonia::Builder;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::SecondsFormat;
use rand::rngs::OsRng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spin_sdk::http::Response;
use uuid::Uuid;

use crate::core::errors::ApiError;

/// Fixed-width UTC timestamp, so lexical order equals time order.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::PasswordHash;

    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Canonical form of an id received from a client. Uppercase, braced or
/// simple-form UUIDs all compare equal after this.
pub fn normalize_id(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|id| id.to_string())
}

/// Like [`normalize_id`], reporting a malformed id as the entity being absent.
pub fn require_id(raw: &str, entity: &str) -> Result<String, ApiError> {
    normalize_id(raw).ok_or_else(|| ApiError::not_found(format!("{} not found", entity)))
}

/// Strips all markup, leaving plain text.
pub fn sanitize_text(text: &str) -> String {
    Builder::default()
        .tags(HashSet::new())
        .clean(text.trim())
        .to_string()
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile"))
}

pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    email_regex().is_match(&email).then_some(email)
}

/// Set-add on an ordered id list. Returns whether the list changed.
pub fn add_unique(ids: &mut Vec<String>, id: &str) -> bool {
    if ids.iter().any(|existing| existing == id) {
        return false;
    }
    ids.push(id.to_string());
    true
}

/// Set-remove on an ordered id list. Returns whether the list changed.
pub fn remove_id(ids: &mut Vec<String>, id: &str) -> bool {
    let before = ids.len();
    ids.retain(|existing| existing != id);
    ids.len() != before
}

/// Decodes a JSON request body. An empty body decodes as `T::default()` so
/// missing fields are reported by the operation's own validation.
pub fn parse_json_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| ApiError::validation("Malformed JSON body"))
}

pub fn json_response<T: Serialize>(status: u16, body: &T) -> Result<Response, ApiError> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::to_vec(body)?)
        .build())
}

/// `{"success": true, "message": ...}`
pub fn message_response(status: u16, message: &str) -> Result<Response, ApiError> {
    json_response(
        status,
        &serde_json::json!({
            "success": true,
            "message": message,
        }),
    )
}
