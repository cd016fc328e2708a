// === Limits ===
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_BIO_LENGTH: usize = 500;
pub const MAX_CAPTION_LENGTH: usize = 2200;
pub const MAX_COMMENT_LENGTH: usize = 1000;
pub const MAX_MESSAGE_LENGTH: usize = 5000;

/// Uploaded images are shrunk to fit inside this square.
pub const MAX_IMAGE_DIMENSION: u32 = 800;
pub const IMAGE_JPEG_QUALITY: u8 = 80;

/// Attempts per write leg before a workflow compensates.
pub const WRITE_ATTEMPTS: usize = 3;

pub const SESSION_COOKIE: &str = "token";

// === Keys ===
pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

/// Every comment id ever written for a post, linked or not. Deletion sweeps it.
pub fn post_comments_key(post_id: &str) -> String {
    format!("post_comments:{}", post_id)
}

pub fn conversation_key(id: &str) -> String {
    format!("conversation:{}", id)
}

pub fn message_key(id: &str) -> String {
    format!("message:{}", id)
}

pub fn media_key(id: &str) -> String {
    format!("media:{}", id)
}

pub fn email_index_key(email: &str) -> String {
    format!("email:{}", email)
}

pub fn username_index_key(username: &str) -> String {
    format!("username:{}", username.to_lowercase())
}

// === Environment ===
pub fn token_expiration_hours() -> i64 {
    std::env::var("BORD_TOKEN_EXPIRATION_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(24)
}

fn secret_key() -> String {
    std::env::var("BORD_SECRET_KEY").unwrap_or_else(|_| {
        tracing::warn!("BORD_SECRET_KEY is not set, using the development secret");
        "bord-dev-secret-change-me".to_string()
    })
}

fn public_base_url() -> String {
    std::env::var("BORD_PUBLIC_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_default()
}

/// Process-wide settings, read once and handed to every operation via
/// [`crate::core::context::AppContext`].
#[derive(Clone, Debug)]
pub struct Settings {
    pub secret_key: String,
    pub token_expiration_hours: i64,
    pub public_base_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            secret_key: secret_key(),
            token_expiration_hours: token_expiration_hours(),
            public_base_url: public_base_url(),
        }
    }

    pub fn session_max_age_secs(&self) -> i64 {
        self.token_expiration_hours * 60 * 60
    }
}
