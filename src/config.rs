use anyhow::{bail, Context, Result};

/// Policy for serving world images to the client.
///
/// Both strategies exist in the wild: fetching the canonical image from the
/// platform origin and memoizing it, or redirecting to a locally mirrored
/// copy under the same derived filename. Neither is "the" correct one, so
/// the choice is explicit configuration rather than a hardcoded pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStrategy {
    /// Fetch from the platform origin and cache the bytes in memory.
    FetchAndCache,
    /// Redirect the client to a locally mirrored copy.
    RedirectToMirror,
}

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Upstream ────────────────────────────────────────────────────────
    /// Optional upstream proxy for all outbound platform traffic.
    pub proxy: Option<String>,

    // ── Session ─────────────────────────────────────────────────────────
    /// Secret for signing the session cookie.
    pub secret_key: String,

    // ── World images ────────────────────────────────────────────────────
    pub image_strategy: ImageStrategy,
    /// Path prefix of the local mirror, used by `RedirectToMirror`.
    pub image_mirror_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let image_strategy = match std::env::var("KCB_IMAGE_STRATEGY").as_deref() {
            Ok("mirror") => ImageStrategy::RedirectToMirror,
            Ok("origin") | Err(_) => ImageStrategy::FetchAndCache,
            Ok(other) => bail!("Invalid KCB_IMAGE_STRATEGY '{other}' (expected origin|mirror)"),
        };

        Ok(Config {
            host: std::env::var("KCB_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("KCB_PORT")
                .unwrap_or_else(|_| "9999".into())
                .parse()
                .context("Invalid KCB_PORT")?,
            proxy: std::env::var("KCB_PROXY").ok(),
            secret_key: std::env::var("KCB_SECRET_KEY")
                .context("KCB_SECRET_KEY is required (session cookie signing secret)")?,
            image_strategy,
            image_mirror_prefix: std::env::var("KCB_IMAGE_MIRROR_PREFIX")
                .unwrap_or_else(|_| "/_kcs/resources/image/world".into()),
        })
    }
}
