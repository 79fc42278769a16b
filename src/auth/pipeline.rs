//! The authentication handshake against the DMM platform.
//!
//! Login is a fixed sequence of HTTP exchanges, each scraping tokens out of
//! the previous response, ending in the address of the account's world
//! server and a short-lived game entry token. Phases run strictly in order;
//! each one is a function from the previous phase's output to its own typed
//! result, so a later phase can never observe half-initialized state.
//!
//! Nothing here retries: every failure is terminal for the attempt and
//! carries a message the frontend can show as-is.

use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::worlds;
use crate::error::GatewayError;

/// User agent presented to the platform on every handshake request.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; WOW64; Trident/7.0; rv:11.0) like Gecko";

/// Default timeout shared by every handshake phase.
const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(10);

/// The world lookup response starts with a fixed non-JSON preamble that has
/// to be stripped before parsing.
const WORLD_PREAMBLE_LEN: usize = 7;

/// The broker wraps the inner response body in a longer fixed preamble.
const BROKER_PREAMBLE_LEN: usize = 27;

static DMM_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""DMM_TOKEN", "([\d\w]+)""#).unwrap());
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""token": "([\d\w]+)""#).unwrap());
static RESET_RE: Lazy<Regex> = Lazy::new(|| Regex::new("認証エラー").unwrap());
static OSAPI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"URL\W+:\W+"(.*)","#).unwrap());

/// One login attempt's credentials. Supplied once, never persisted.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login_id: String,
    pub password: String,
}

/// Platform endpoint set. Defaults to the live platform; tests substitute a
/// local mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub login: String,
    pub ajax: String,
    pub auth: String,
    pub game: String,
    pub make_request: String,
    /// Base of the world lookup service, no trailing slash.
    pub world_lookup_base: String,
    /// Gadget descriptor sent with every broker request.
    pub gadget: String,
    pub origin: String,
    /// Per-phase timeout; every handshake request shares it.
    pub phase_timeout: Duration,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            login: "https://www.dmm.com/my/-/login/".into(),
            ajax: "https://www.dmm.com/my/-/login/ajax-get-token/".into(),
            auth: "https://www.dmm.com/my/-/login/auth/".into(),
            game: "http://www.dmm.com/netgame/social/-/gadgets/=/app_id=854854/".into(),
            make_request: "http://osapi.dmm.com/gadgets/makeRequest".into(),
            world_lookup_base: "http://203.104.209.7".into(),
            gadget: "http://203.104.209.7/gadget.xml".into(),
            origin: "https://www.dmm.com".into(),
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
        }
    }
}

// ── Phase outputs ───────────────────────────────────────────────────────

/// Phase 1: the two tokens scraped off the login page.
#[derive(Debug)]
struct LoginTokens {
    dmm_token: String,
    token: String,
}

/// Phase 2: the refreshed token plus the session-randomized names of the
/// login form's credential fields. The names are opaque keys, not values.
struct AjaxTokens {
    token: String,
    id_key: String,
    pwd_key: String,
}

/// Phase 3: authenticated; the embedded game page yielded its gadget URL.
struct Authenticated {
    osapi_url: String,
}

/// Phase 4: the account's world resolved through the directory table.
struct WorldResolved {
    owner: String,
    st: String,
    world_ip: &'static str,
}

/// Terminal phase: everything the game client needs to enter the game.
#[derive(Debug, Clone)]
pub struct GameEntry {
    pub world_ip: String,
    pub api_token: String,
    pub api_starttime: i64,
    pub flash_url: String,
}

// ── Wire formats ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AjaxTokenResponse {
    token: String,
    /// Field *name* the auth form expects for the login id.
    login_id: String,
    /// Field *name* the auth form expects for the password.
    password: String,
}

#[derive(Deserialize)]
struct WorldLookupResponse {
    api_result: i64,
    api_data: Option<WorldLookupData>,
}

#[derive(Deserialize)]
struct WorldLookupData {
    api_world_id: u32,
}

#[derive(Deserialize)]
struct EntryTokenResponse {
    api_result: i64,
    api_token: Option<String>,
    api_starttime: Option<i64>,
}

// ── Pipeline ────────────────────────────────────────────────────────────

/// Executes the handshake. One instance per login attempt: the platform
/// relies on cookies accumulated across phases, so each attempt gets its
/// own cookie-holding client and no state leaks between attempts.
pub struct AuthPipeline {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl AuthPipeline {
    pub fn new(endpoints: Endpoints, proxy: Option<&str>) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true);
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| GatewayError::Internal(format!("Invalid proxy: {e}")))?,
            );
        }
        let http = builder
            .build()
            .map_err(|e| GatewayError::Internal(format!("HTTP client: {e}")))?;
        Ok(AuthPipeline { http, endpoints })
    }

    /// Run phases 1–3 and return the embedded game URL.
    pub async fn resolve_osapi(&self, credentials: &Credentials) -> Result<String, GatewayError> {
        let tokens = self.fetch_login_tokens().await?;
        let ajax = self.fetch_ajax_tokens(&tokens).await?;
        let authed = self.authenticate(credentials, &ajax).await?;
        Ok(authed.osapi_url)
    }

    /// Run the full handshake and return the game entry artifacts.
    pub async fn resolve_flash(&self, credentials: &Credentials) -> Result<GameEntry, GatewayError> {
        let tokens = self.fetch_login_tokens().await?;
        let ajax = self.fetch_ajax_tokens(&tokens).await?;
        let authed = self.authenticate(credentials, &ajax).await?;
        let world = self.resolve_world(&authed).await?;
        self.resolve_entry_token(&world).await
    }

    // ── Phase 1 ─────────────────────────────────────────────────────────

    async fn fetch_login_tokens(&self) -> Result<LoginTokens, GatewayError> {
        let html = self
            .get_text(&self.endpoints.login, None, "login page")
            .await?;
        extract_login_tokens(&html)
    }

    // ── Phase 2 ─────────────────────────────────────────────────────────

    async fn fetch_ajax_tokens(&self, tokens: &LoginTokens) -> Result<AjaxTokens, GatewayError> {
        let response = self
            .http
            .post(&self.endpoints.ajax)
            .timeout(self.endpoints.phase_timeout)
            .header("Origin", &self.endpoints.origin)
            .header("Referer", &self.endpoints.login)
            .header("DMM_TOKEN", &tokens.dmm_token)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&[("token", tokens.token.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(e, "ajax token"))?;

        let parsed: AjaxTokenResponse = response
            .json()
            .await
            .map_err(|_| GatewayError::TokenExtractionFailed("ajax token"))?;

        Ok(AjaxTokens {
            token: parsed.token,
            id_key: parsed.login_id,
            pwd_key: parsed.password,
        })
    }

    // ── Phase 3 ─────────────────────────────────────────────────────────

    async fn authenticate(
        &self,
        credentials: &Credentials,
        ajax: &AjaxTokens,
    ) -> Result<Authenticated, GatewayError> {
        // The dynamic field names from phase 2 are merged in as opaque keys
        // alongside the fixed ones; the platform rotates them per session.
        let form: Vec<(&str, &str)> = vec![
            ("login_id", &credentials.login_id),
            ("password", &credentials.password),
            ("token", &ajax.token),
            (&ajax.id_key, &credentials.login_id),
            (&ajax.pwd_key, &credentials.password),
        ];

        let response = self
            .http
            .post(&self.endpoints.auth)
            .timeout(self.endpoints.phase_timeout)
            .header("Origin", &self.endpoints.origin)
            .header("Referer", &self.endpoints.login)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(e, "authentication"))?;
        let html = response
            .text()
            .await
            .map_err(|e| transport_error(e, "authentication"))?;

        if RESET_RE.is_match(&html) {
            return Err(GatewayError::PasswordResetRequired);
        }

        let html = self
            .get_text(&self.endpoints.game, None, "game page")
            .await?;
        let osapi_url = extract_osapi_url(&html)?;
        debug!(%osapi_url, "authenticated");
        Ok(Authenticated { osapi_url })
    }

    // ── Phase 4 ─────────────────────────────────────────────────────────

    async fn resolve_world(&self, authed: &Authenticated) -> Result<WorldResolved, GatewayError> {
        let (owner, st) = parse_osapi_params(&authed.osapi_url)?;

        let url = format!(
            "{}/kcsapi/api_world/get_id/{}/1/{}",
            self.endpoints.world_lookup_base,
            owner,
            Utc::now().timestamp_millis()
        );
        let body = self
            .get_text(&url, Some(&authed.osapi_url), "world lookup")
            .await?;
        let world_id = parse_world_lookup(&body)?;
        let world_ip = worlds::lookup(world_id)?;
        debug!(world_id, world_ip, "world resolved");

        Ok(WorldResolved {
            owner,
            st,
            world_ip,
        })
    }

    // ── Phase 5 ─────────────────────────────────────────────────────────

    async fn resolve_entry_token(&self, world: &WorldResolved) -> Result<GameEntry, GatewayError> {
        let inner_url = format!(
            "http://{}/kcsapi/api_auth_member/dmmlogin/{}/1/{}",
            world.world_ip,
            world.owner,
            Utc::now().timestamp_millis()
        );

        // Signed-request broker parameters; the fixed set the platform's
        // gadget container sends for its own requests.
        let form: Vec<(&str, &str)> = vec![
            ("url", &inner_url),
            ("httpMethod", "GET"),
            ("authz", "signed"),
            ("st", &world.st),
            ("contentType", "JSON"),
            ("numEntries", "3"),
            ("getSummaries", "false"),
            ("signOwner", "true"),
            ("signViewer", "true"),
            ("gadget", &self.endpoints.gadget),
            ("container", "dmm"),
        ];

        let response = self
            .http
            .post(&self.endpoints.make_request)
            .timeout(self.endpoints.phase_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(e, "entry token"))?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, "entry token"))?;

        let (api_token, api_starttime) = parse_broker_response(&body, &inner_url)?;
        let flash_url = format!(
            "http://{}/kcs/mainD2.swf?api_token={}&amp;api_starttime={}",
            world.world_ip, api_token, api_starttime
        );

        Ok(GameEntry {
            world_ip: world.world_ip.to_string(),
            api_token,
            api_starttime,
            flash_url,
        })
    }

    // ── Shared transport helper ─────────────────────────────────────────

    async fn get_text(
        &self,
        url: &str,
        referer: Option<&str>,
        phase: &'static str,
    ) -> Result<String, GatewayError> {
        let mut request = self.http.get(url).timeout(self.endpoints.phase_timeout);
        if let Some(referer) = referer {
            request = request.header("Referer", referer);
        }
        let response = request.send().await.map_err(|e| transport_error(e, phase))?;
        response.text().await.map_err(|e| transport_error(e, phase))
    }
}

fn transport_error(e: reqwest::Error, phase: &'static str) -> GatewayError {
    if e.is_timeout() {
        GatewayError::ConnectionTimeout(phase)
    } else {
        GatewayError::Upstream(format!("{phase}: {e}"))
    }
}

// ── Pure parsing helpers ────────────────────────────────────────────────

fn extract_login_tokens(html: &str) -> Result<LoginTokens, GatewayError> {
    let dmm_token = DMM_TOKEN_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or(GatewayError::TokenExtractionFailed("dmm_token"))?
        .as_str()
        .to_string();
    let token = TOKEN_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or(GatewayError::TokenExtractionFailed("token"))?
        .as_str()
        .to_string();
    Ok(LoginTokens { dmm_token, token })
}

fn extract_osapi_url(html: &str) -> Result<String, GatewayError> {
    // The embedded game page only carries this literal for a logged-in
    // account; its absence means the credentials were wrong.
    OSAPI_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(GatewayError::InvalidCredentials)
}

fn parse_osapi_params(osapi_url: &str) -> Result<(String, String), GatewayError> {
    let parsed = url::Url::parse(osapi_url).map_err(|_| GatewayError::WorldLookupFailed)?;
    let mut owner = None;
    let mut st = None;
    for (k, v) in parsed.query_pairs() {
        match k.as_ref() {
            "owner" => owner = Some(v.into_owned()),
            "st" => st = Some(v.into_owned()),
            _ => {}
        }
    }
    match (owner, st) {
        (Some(owner), Some(st)) => Ok((owner, st)),
        _ => Err(GatewayError::WorldLookupFailed),
    }
}

fn parse_world_lookup(body: &str) -> Result<u32, GatewayError> {
    if body.len() < WORLD_PREAMBLE_LEN {
        return Err(GatewayError::WorldLookupFailed);
    }
    // Slice as bytes: the preamble is opaque and need not be valid UTF-8
    // up to a character boundary.
    let parsed: WorldLookupResponse =
        serde_json::from_slice(&body.as_bytes()[WORLD_PREAMBLE_LEN..])
            .map_err(|_| GatewayError::WorldLookupFailed)?;
    if parsed.api_result != 1 {
        return Err(GatewayError::WorldLookupFailed);
    }
    parsed
        .api_data
        .map(|d| d.api_world_id)
        .ok_or(GatewayError::WorldLookupFailed)
}

fn parse_broker_response(body: &str, inner_url: &str) -> Result<(String, i64), GatewayError> {
    let outer: serde_json::Value =
        serde_json::from_str(body).map_err(|_| GatewayError::ApiTokenLookupFailed)?;
    let entry = outer
        .get(inner_url)
        .ok_or(GatewayError::ApiTokenLookupFailed)?;
    if entry.get("rc").and_then(|v| v.as_i64()) != Some(200) {
        return Err(GatewayError::ApiTokenLookupFailed);
    }
    let inner_body = entry
        .get("body")
        .and_then(|v| v.as_str())
        .ok_or(GatewayError::ApiTokenLookupFailed)?;
    if inner_body.len() < BROKER_PREAMBLE_LEN {
        return Err(GatewayError::ApiTokenLookupFailed);
    }
    let parsed: EntryTokenResponse =
        serde_json::from_slice(&inner_body.as_bytes()[BROKER_PREAMBLE_LEN..])
            .map_err(|_| GatewayError::ApiTokenLookupFailed)?;
    if parsed.api_result != 1 {
        return Err(GatewayError::ApiTokenLookupFailed);
    }
    match (parsed.api_token, parsed.api_starttime) {
        (Some(token), Some(starttime)) => Ok((token, starttime)),
        _ => Err(GatewayError::ApiTokenLookupFailed),
    }
}
