//! Browser session state, carried in an HMAC-signed cookie.
//!
//! The gateway persists a small named set of fields across a user's browser
//! session: the client mode, the game entry artifacts produced by the
//! handshake, and (for direct-connector mode) the embedded game URL. The
//! cookie payload is JSON, signed with HMAC-SHA256 and base64url-encoded;
//! a cookie that fails verification is treated as no session at all.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::GatewayError;

pub const COOKIE_NAME: &str = "kcb_session";

fn default_mode() -> i64 {
    1
}

/// The session record. All game-entry fields are optional until a login
/// succeeds; `mode` always has a value so the login form can preselect the
/// client variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default = "default_mode")]
    pub mode: i64,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub api_starttime: Option<i64>,
    #[serde(default)]
    pub world_ip: Option<String>,
    #[serde(default)]
    pub osapi_url: Option<String>,
}

impl Default for SessionData {
    fn default() -> Self {
        SessionData {
            mode: 1,
            api_token: None,
            api_starttime: None,
            world_ip: None,
            osapi_url: None,
        }
    }
}

impl SessionData {
    /// True when every field a game page needs is present.
    pub fn has_game_entry(&self) -> bool {
        self.api_token.is_some() && self.api_starttime.is_some() && self.world_ip.is_some()
    }

    /// Drop every credential field in one step. The mode survives so the
    /// login form comes back preselected.
    pub fn clear(&mut self) {
        self.api_token = None;
        self.api_starttime = None;
        self.world_ip = None;
        self.osapi_url = None;
    }
}

/// Signs and verifies the session cookie.
pub struct SessionStore {
    key: Vec<u8>,
}

impl SessionStore {
    pub fn new(secret: &str) -> Self {
        SessionStore {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> Result<Hmac<Sha256>, GatewayError> {
        Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|e| GatewayError::Internal(format!("session key: {e}")))
    }

    fn sign(&self, payload: &[u8]) -> Result<String, GatewayError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        let signature = mac.finalize().into_bytes();

        let mut combined = Vec::with_capacity(32 + payload.len());
        combined.extend_from_slice(&signature);
        combined.extend_from_slice(payload);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    fn verify(&self, signed: &str) -> Option<Vec<u8>> {
        let combined = URL_SAFE_NO_PAD.decode(signed).ok()?;
        if combined.len() < 32 {
            return None;
        }
        let (signature, payload) = combined.split_at(32);
        let mut mac = self.mac().ok()?;
        mac.update(payload);
        mac.verify_slice(signature).ok()?;
        Some(payload.to_vec())
    }

    /// Read the session out of the request headers. A missing, malformed,
    /// or tampered cookie yields the default session.
    pub fn load(&self, headers: &HeaderMap) -> SessionData {
        let Some(signed) = cookie_value(headers, COOKIE_NAME) else {
            return SessionData::default();
        };
        let Some(payload) = self.verify(&signed) else {
            return SessionData::default();
        };
        serde_json::from_slice(&payload).unwrap_or_default()
    }

    /// Build the `Set-Cookie` value persisting this session.
    pub fn persist(&self, data: &SessionData) -> Result<HeaderValue, GatewayError> {
        let payload = serde_json::to_vec(data)
            .map_err(|e| GatewayError::Internal(format!("session serialize: {e}")))?;
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            COOKIE_NAME,
            self.sign(&payload)?
        );
        HeaderValue::from_str(&cookie)
            .map_err(|e| GatewayError::Internal(format!("session cookie: {e}")))
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(name) {
                return parts.next().map(|v| v.to_string());
            }
        }
    }
    None
}
