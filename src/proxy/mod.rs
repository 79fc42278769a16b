//! Forwards in-game API traffic to the world server resolved at login.
//!
//! The game client keeps talking to this gateway after login; every call is
//! relayed to `http://{world_ip}/kcsapi/{action}` with headers rewritten to
//! what that backend expects. A missing session and an unreachable backend
//! are deliberately indistinguishable to the client: both come back as a
//! plain bad request.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::pipeline::USER_AGENT;
use crate::config::ImageStrategy;
use crate::error::GatewayError;

/// Default timeout for calls to the world server and the image origin.
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// `api_start2` responses strictly larger than this are memoized for the
/// rest of the process lifetime. Smaller bodies are truncated error pages
/// and must never be cached.
const API_START2_CACHE_MIN: usize = 100_000;

const X_REQUESTED_WITH: &str = "ShockwaveFlash/18.0.0.232";

/// How a world image request was satisfied.
#[derive(Debug)]
pub enum ImageOutcome {
    Png(Bytes),
    Redirect(String),
}

/// Relays client API calls and serves world images.
///
/// One instance per process; the HTTP client is shared for connection reuse
/// and both caches live for the lifetime of the process with no eviction.
/// Concurrent population of the same cache key is an idempotent overwrite.
pub struct ProxyGateway {
    http: reqwest::Client,
    strategy: ImageStrategy,
    image_origin: String,
    mirror_prefix: String,
    upstream_timeout: Duration,
    api_start2: RwLock<Option<Bytes>>,
    world_images: RwLock<HashMap<String, Bytes>>,
}

impl ProxyGateway {
    pub fn new(
        strategy: ImageStrategy,
        mirror_prefix: String,
        proxy: Option<&str>,
    ) -> Result<Self, GatewayError> {
        Self::with_image_origin(
            strategy,
            mirror_prefix,
            proxy,
            "http://203.104.209.102/kcs/resources/image/world".into(),
        )
    }

    /// Constructor taking an explicit image origin; tests point this at a
    /// local mock server.
    pub fn with_image_origin(
        strategy: ImageStrategy,
        mirror_prefix: String,
        proxy: Option<&str>,
        image_origin: String,
    ) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| GatewayError::Internal(format!("Invalid proxy: {e}")))?,
            );
        }
        let http = builder
            .build()
            .map_err(|e| GatewayError::Internal(format!("HTTP client: {e}")))?;

        Ok(ProxyGateway {
            http,
            strategy,
            image_origin,
            mirror_prefix,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            api_start2: RwLock::new(None),
            world_images: RwLock::new(HashMap::new()),
        })
    }

    /// Override the upstream timeout. Tests shorten it so a stalled backend
    /// does not stall the suite.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Relay one API call to the world server.
    ///
    /// `host` is the externally visible host of this gateway, substituted
    /// out of the client's referer; the backend rejects TLS referers, so
    /// the scheme is downgraded as well.
    pub async fn forward_api_call(
        &self,
        action: &str,
        body: Bytes,
        referer: Option<&str>,
        host: &str,
        world_ip: Option<&str>,
    ) -> Result<Bytes, GatewayError> {
        let world_ip =
            world_ip.ok_or_else(|| GatewayError::BadRequest("no world server in session".into()))?;

        if action == "api_start2" {
            if let Some(cached) = self.api_start2.read().await.as_ref() {
                debug!(action, "served from cache");
                return Ok(cached.clone());
            }
        }

        let url = format!("http://{world_ip}/kcsapi/{action}");
        let mut request = self
            .http
            .post(&url)
            .timeout(self.upstream_timeout)
            .header("Origin", format!("http://{world_ip}/"))
            .header("X-Requested-With", X_REQUESTED_WITH)
            .body(body);
        if let Some(referer) = referer {
            let rewritten = referer.replace(host, world_ip).replace("https://", "http://");
            request = request.header("Referer", rewritten);
        }

        // Upstream down and malformed request collapse to the same outcome.
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::BadRequest(format!("upstream call failed: {e}")))?;
        let payload = response
            .bytes()
            .await
            .map_err(|e| GatewayError::BadRequest(format!("upstream read failed: {e}")))?;

        if action == "api_start2" && payload.len() > API_START2_CACHE_MIN {
            *self.api_start2.write().await = Some(payload.clone());
            debug!(size = payload.len(), "api_start2 memoized");
        }

        Ok(payload)
    }

    /// Serve the world image matching the session's world server.
    pub async fn world_image(
        &self,
        size: &str,
        world_ip: Option<&str>,
    ) -> Result<ImageOutcome, GatewayError> {
        let world_ip =
            world_ip.ok_or_else(|| GatewayError::BadRequest("no world server in session".into()))?;
        let name = image_name(world_ip, size)?;

        match self.strategy {
            ImageStrategy::RedirectToMirror => {
                Ok(ImageOutcome::Redirect(format!("{}/{}.png", self.mirror_prefix, name)))
            }
            ImageStrategy::FetchAndCache => {
                if let Some(cached) = self.world_images.read().await.get(&name) {
                    return Ok(ImageOutcome::Png(cached.clone()));
                }
                let url = format!("{}/{}.png", self.image_origin, name);
                let response = self
                    .http
                    .get(&url)
                    .timeout(self.upstream_timeout)
                    .send()
                    .await
                    .map_err(|e| GatewayError::BadRequest(format!("image fetch failed: {e}")))?;
                let payload = response
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::BadRequest(format!("image read failed: {e}")))?;
                self.world_images.write().await.insert(name, payload.clone());
                Ok(ImageOutcome::Png(payload))
            }
        }
    }
}

/// Derive the image filename token from a dotted world address: each octet
/// zero-padded to three digits, joined by underscores, then the size class.
fn image_name(world_ip: &str, size: &str) -> Result<String, GatewayError> {
    if !matches!(size, "l" | "s" | "t") {
        return Err(GatewayError::BadRequest(format!("unknown image size '{size}'")));
    }
    let mut sections = Vec::with_capacity(4);
    for part in world_ip.split('.') {
        let octet: u32 = part
            .parse()
            .map_err(|_| GatewayError::BadRequest("malformed world address".into()))?;
        sections.push(format!("{octet:03}"));
    }
    Ok(format!("{}_{}", sections.join("_"), size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_zero_pads_octets() {
        assert_eq!(image_name("125.6.187.229", "l").unwrap(), "125_006_187_229_l");
        assert_eq!(image_name("203.104.209.7", "t").unwrap(), "203_104_209_007_t");
    }

    #[test]
    fn image_name_rejects_unknown_size_class() {
        assert!(matches!(
            image_name("125.6.187.229", "xl"),
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[test]
    fn image_name_rejects_garbage_address() {
        assert!(matches!(
            image_name("not-an-ip", "l"),
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn forward_without_session_is_bad_request() {
        let gateway = ProxyGateway::new(
            ImageStrategy::FetchAndCache,
            "/_kcs/resources/image/world".into(),
            None,
        )
        .unwrap();
        // No network call is attempted; this returns before any I/O.
        let result = gateway
            .forward_api_call("api_start2", Bytes::new(), None, "bridge.local", None)
            .await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn world_image_without_session_is_bad_request() {
        let gateway = ProxyGateway::new(
            ImageStrategy::RedirectToMirror,
            "/_kcs/resources/image/world".into(),
            None,
        )
        .unwrap();
        let result = gateway.world_image("l", None).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn mirror_strategy_redirects_to_derived_path() {
        let gateway = ProxyGateway::new(
            ImageStrategy::RedirectToMirror,
            "/_kcs/resources/image/world".into(),
            None,
        )
        .unwrap();
        match gateway.world_image("s", Some("125.6.187.229")).await.unwrap() {
            ImageOutcome::Redirect(path) => {
                assert_eq!(path, "/_kcs/resources/image/world/125_006_187_229_s.png");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
