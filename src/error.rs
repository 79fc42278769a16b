use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the kcbridge gateway.
///
/// Every authentication failure is terminal for that login attempt and
/// carries a message fit for showing to the user; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // ── Handshake errors ────────────────────────────────────────────────
    #[error("Connection timed out during {0}")]
    ConnectionTimeout(&'static str),

    #[error("Could not extract {0} from the platform response")]
    TokenExtractionFailed(&'static str),

    #[error("The platform requires a password reset before login can continue")]
    PasswordResetRequired,

    #[error("Invalid login ID or password")]
    InvalidCredentials,

    #[error("Failed to look up the world server for this account")]
    WorldLookupFailed,

    #[error("Failed to obtain a game entry token")]
    ApiTokenLookupFailed,

    // ── Gateway errors ──────────────────────────────────────────────────
    #[error("Bad request: {0}")]
    BadRequest(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether this failure came out of the authentication handshake.
    /// Handshake failures are reported to the client as `{status: 0}` JSON
    /// rather than an HTTP error status.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectionTimeout(_)
                | GatewayError::TokenExtractionFailed(_)
                | GatewayError::PasswordResetRequired
                | GatewayError::InvalidCredentials
                | GatewayError::WorldLookupFailed
                | GatewayError::ApiTokenLookupFailed
        )
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if self.is_auth_failure() {
            let body = json!({
                "status": 0,
                "message": self.to_string(),
            });
            return (StatusCode::OK, axum::Json(body)).into_response();
        }

        let status = match &self {
            // Missing session state and upstream timeouts collapse into the
            // same outward response; the client never learns which it was.
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        status.into_response()
    }
}
