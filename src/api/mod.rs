//! HTTP surface of the gateway.
//!
//! - `/` — login form and submission
//! - `/kancolle`, `/kcv`, `/flash`, `/poi`, `/connector` — client-mode pages
//! - `/kcsapi/{action}` — game API passthrough
//! - `/kcs/resources/image/world/{filename}` — world image route
//! - `/service/osapi`, `/service/flash` — pure-JSON handshake endpoints
//! - `/logout` — session teardown

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
