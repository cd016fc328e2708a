use http::StatusCode;
use spin_sdk::http::Response;
use thiserror::Error;

pub const INVALID_CREDENTIALS: &str = "Incorrect email or password";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, empty or malformed input.
    #[error("{0}")]
    Validation(String),
    /// Uniqueness violation.
    #[error("{0}")]
    Conflict(String),
    /// Unknown email and wrong password share this message.
    #[error("Incorrect email or password")]
    InvalidCredentials,
    /// Caller is authenticated but does not own the target.
    #[error("Unauthorized")]
    Forbidden,
    #[error("User not authenticated")]
    Unauthenticated,
    #[error("{0}")]
    NotFound(String),
    /// Storage or a dependent service failed. The detail is logged, not returned.
    #[error("Service temporarily unavailable, please retry")]
    Unavailable(String),
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidCredentials | ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidCredentials | ApiError::Forbidden | ApiError::Unauthenticated
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let body = serde_json::json!({
            "success": false,
            "message": err.to_string(),
        });
        Response::builder()
            .status(err.status().as_u16())
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(&body).unwrap_or_default())
            .build()
    }
}

// Storage and helper failures surface as a generic "unavailable".
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let detail = format!("{:#}", err);
        tracing::error!(error = %detail, "dependency failure");
        ApiError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "failed to encode response");
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_hides_internals() {
        let err: ApiError = anyhow::anyhow!("connection refused to 10.0.0.3").into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn credential_failures_share_one_message() {
        assert_eq!(ApiError::InvalidCredentials.to_string(), INVALID_CREDENTIALS);
        assert!(ApiError::InvalidCredentials.is_auth());
        assert!(ApiError::Forbidden.is_auth());
        assert!(!ApiError::not_found("Post not found").is_auth());
    }

    #[test]
    fn renders_failure_envelope() {
        let resp: Response = ApiError::validation("Image required").into();
        assert_eq!(*resp.status(), 400);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Image required");
    }
}
