//! Route handlers. All of them receive `SharedState` via axum state
//! extraction; session state rides in the signed cookie, never in memory.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST, REFERER, SET_COOKIE},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::Credentials;
use crate::error::GatewayError;
use crate::pages;
use crate::proxy::ImageOutcome;
use crate::session::SessionData;
use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Frontend ─────────────────────────────────────────────────────
        .route("/", get(form).post(login))
        .route("/kancolle", get(normal))
        .route("/kcv", get(kcv))
        .route("/flash", get(flash))
        .route("/poi", get(poi))
        .route("/connector", get(connector))
        .route("/logout", get(logout))
        // ── Game traffic ─────────────────────────────────────────────────
        // Actions are slash-separated paths (eg. api_port/port), so this is
        // a wildcard rather than a single segment.
        .route("/kcsapi/{*action}", get(api_passthrough).post(api_passthrough))
        .route("/kcs/resources/image/world/{filename}", get(world_image))
        // ── Services ─────────────────────────────────────────────────────
        .route("/service/osapi", post(service_osapi))
        .route("/service/flash", post(service_flash))
        .with_state(state)
}

// =============================================================================
// Helpers
// =============================================================================

fn host_of(headers: &HeaderMap) -> &str {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
}

fn scheme_of(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
}

/// Attach the session cookie to an outgoing response. A session that cannot
/// be persisted turns the whole response into the error.
fn with_session(state: &SharedState, session: &SessionData, mut response: Response) -> Response {
    match state.sessions.persist(session) {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
            response
        }
        Err(e) => e.into_response(),
    }
}

/// Where a successful login lands, per client mode.
fn mode_landing(mode: i64) -> &'static str {
    match mode {
        2 => "/kcv",
        3 => "/poi",
        4 => "/connector",
        _ => "/kancolle",
    }
}

/// Clear the whole session and bounce back to the login form. Used whenever
/// a protected page finds any required field missing.
fn clear_and_redirect(state: &SharedState, mut session: SessionData) -> Response {
    session.clear();
    with_session(state, &session, Redirect::to("/").into_response())
}

// =============================================================================
// Frontend
// =============================================================================

#[derive(Deserialize)]
struct LoginSubmission {
    login_id: Option<String>,
    password: Option<String>,
    mode: Option<i64>,
}

/// GET / — the login form, preselecting the remembered client mode.
async fn form(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let session = state.sessions.load(&headers);
    let page = Html(pages::form(session.mode, None)).into_response();
    with_session(&state, &session, page)
}

/// POST / — run the handshake and land on the mode's page, or re-render the
/// form with the failure message.
async fn login(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(submission): Form<LoginSubmission>,
) -> Response {
    let mut session = state.sessions.load(&headers);
    if let Some(mode) = submission.mode {
        session.mode = mode;
    }

    let credentials = match (submission.login_id, submission.password) {
        (Some(login_id), Some(password)) if !login_id.is_empty() && !password.is_empty() => {
            Credentials { login_id, password }
        }
        _ => {
            let page = pages::form(session.mode, Some("Please enter both a login ID and a password"));
            return with_session(&state, &session, Html(page).into_response());
        }
    };

    let pipeline = match state.pipeline() {
        Ok(pipeline) => pipeline,
        Err(e) => return e.into_response(),
    };

    let outcome = if session.mode == 4 {
        // Direct connector only needs the embedded game URL.
        pipeline
            .resolve_osapi(&credentials)
            .await
            .map(|osapi_url| session.osapi_url = Some(osapi_url))
    } else {
        pipeline.resolve_flash(&credentials).await.map(|entry| {
            session.api_token = Some(entry.api_token);
            session.api_starttime = Some(entry.api_starttime);
            session.world_ip = Some(entry.world_ip);
        })
    };

    match outcome {
        Ok(()) => {
            info!(mode = session.mode, "login succeeded");
            let landing = mode_landing(session.mode);
            with_session(&state, &session, Redirect::to(landing).into_response())
        }
        Err(e) if e.is_auth_failure() => {
            let page = pages::form(session.mode, Some(&e.to_string()));
            with_session(&state, &session, Html(page).into_response())
        }
        Err(e) => e.into_response(),
    }
}

/// GET /kancolle — browser-mode game page.
async fn normal(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    game_page(&state, &headers, |scheme, host, session| {
        pages::normal(
            scheme,
            host,
            session.api_token.as_deref().unwrap_or_default(),
            session.api_starttime.unwrap_or_default(),
            session.world_ip.as_deref().unwrap_or_default(),
        )
    })
}

/// GET /kcv — viewer-mode page.
async fn kcv(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    game_page(&state, &headers, |_, _, _| pages::kcv())
}

/// GET /flash — bare flash embed, loaded inside the viewer iframe.
async fn flash(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    game_page(&state, &headers, |scheme, host, session| {
        pages::flash(
            scheme,
            host,
            session.api_token.as_deref().unwrap_or_default(),
            session.api_starttime.unwrap_or_default(),
            session.world_ip.as_deref().unwrap_or_default(),
        )
    })
}

/// GET /poi — poi-mode page.
async fn poi(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    game_page(&state, &headers, |scheme, host, session| {
        pages::poi(
            scheme,
            host,
            session.api_token.as_deref().unwrap_or_default(),
            session.api_starttime.unwrap_or_default(),
            session.world_ip.as_deref().unwrap_or_default(),
        )
    })
}

/// Shared gate for the game pages: every required field must be present or
/// the whole session is cleared and the user sent back to the form.
fn game_page(
    state: &SharedState,
    headers: &HeaderMap,
    render: impl Fn(&str, &str, &SessionData) -> String,
) -> Response {
    let session = state.sessions.load(headers);
    if !session.has_game_entry() {
        return clear_and_redirect(state, session);
    }
    let page = render(scheme_of(headers), host_of(headers), &session);
    Html(page).into_response()
}

/// GET /connector — direct-connector page, needs the embedded game URL.
async fn connector(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let session = state.sessions.load(&headers);
    match session.osapi_url.as_deref() {
        Some(osapi_url) => Html(pages::connector(osapi_url)).into_response(),
        None => clear_and_redirect(&state, session),
    }
}

/// GET /logout — clear the session, back to the form.
async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let session = state.sessions.load(&headers);
    clear_and_redirect(&state, session)
}

// =============================================================================
// Game traffic
// =============================================================================

/// GET|POST /kcsapi/{action} — relay one API call to the world server.
async fn api_passthrough(
    State(state): State<SharedState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let session = state.sessions.load(&headers);
    let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());
    let payload = state
        .gateway
        .forward_api_call(
            &action,
            body,
            referer,
            host_of(&headers),
            session.world_ip.as_deref(),
        )
        .await?;
    Ok(([(CONTENT_TYPE, "text/plain")], payload).into_response())
}

/// GET /kcs/resources/image/world/{filename} — world image for the session's
/// world server. The address baked into the filename by the client is
/// ignored; only the trailing size class matters.
async fn world_image(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let session = state.sessions.load(&headers);
    let stem = filename
        .strip_suffix(".png")
        .ok_or_else(|| GatewayError::BadRequest("not an image filename".into()))?;
    let size = stem
        .rsplit('_')
        .next()
        .ok_or_else(|| GatewayError::BadRequest("malformed image filename".into()))?;

    match state
        .gateway
        .world_image(size, session.world_ip.as_deref())
        .await?
    {
        ImageOutcome::Png(bytes) => Ok((
            [(CONTENT_TYPE, "image/png"), (CACHE_CONTROL, "no-cache")],
            bytes,
        )
            .into_response()),
        ImageOutcome::Redirect(path) => Ok(Redirect::to(&path).into_response()),
    }
}

// =============================================================================
// Services
// =============================================================================

#[derive(Deserialize)]
struct ServiceSubmission {
    login_id: Option<String>,
    password: Option<String>,
}

impl ServiceSubmission {
    fn into_credentials(self) -> Result<Credentials, GatewayError> {
        match (self.login_id, self.password) {
            (Some(login_id), Some(password)) if !login_id.is_empty() && !password.is_empty() => {
                Ok(Credentials { login_id, password })
            }
            _ => Err(GatewayError::BadRequest("missing credentials".into())),
        }
    }
}

/// POST /service/osapi — resolve the embedded game URL as JSON.
async fn service_osapi(
    State(state): State<SharedState>,
    Form(submission): Form<ServiceSubmission>,
) -> Result<Response, GatewayError> {
    let credentials = submission.into_credentials()?;
    let osapi_url = state.pipeline()?.resolve_osapi(&credentials).await?;
    Ok(Json(json!({ "status": 1, "osapi_url": osapi_url })).into_response())
}

/// POST /service/flash — run the full handshake and return the flash URL.
async fn service_flash(
    State(state): State<SharedState>,
    Form(submission): Form<ServiceSubmission>,
) -> Result<Response, GatewayError> {
    let credentials = submission.into_credentials()?;
    let entry = state.pipeline()?.resolve_flash(&credentials).await?;
    Ok(Json(json!({ "status": 1, "flash_url": entry.flash_url })).into_response())
}
