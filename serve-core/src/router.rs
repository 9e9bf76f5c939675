//! Request routing
//!
//! Every request except registered assets goes to one of two branches: the
//! reverse proxy when one is configured, otherwise the confined file tree.

use crate::assets::AssetRegistry;
use crate::config::{DirViewTheme, ServerConfig};
use crate::error::ServeError;
use crate::handlers::log_connection;
use crate::listing::{list_directory, sort_entries};
use crate::render::render_directory;
use crate::reverse_proxy::ReverseProxy;
use crate::sanitise::{relative_display_path, resolve_root, PathKind, PathResolver, ResolvedPath};
use crate::Result;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path as UrlPath, Request, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_SECURITY_POLICY};
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tracing::debug;

const BASIC_CSP: &str = "default-src 'none'; frame-ancestors 'none'; script-src 'none'; style-src 'none'; img-src 'none'; form-action 'none';";

const PERMISSIONS_POLICY: &str = "accelerometer=(),ambient-light-sensor=(),autoplay=(),battery=(),camera=(),display-capture=(),document-domain=(),encrypted-media=(),fullscreen=(),gamepad=(),geolocation=(),gyroscope=(),magnetometer=(),microphone=(),midi=(),payment=(),picture-in-picture=(),publickey-credentials-get=(),speaker-selection=(),sync-xhr=(self),usb=(),screen-wake-lock=(),web-share=(),xr-spatial-tracking=()";

/// Shared, read-only state for all requests
#[derive(Debug)]
pub struct ServerState {
    config: ServerConfig,
    resolver: PathResolver,
    proxy: Option<ReverseProxy>,
    assets: AssetRegistry,
}

impl ServerState {
    pub fn new(config: ServerConfig, assets: AssetRegistry) -> Result<Self> {
        config.tls.validate()?;

        let proxy = config
            .proxy
            .as_ref()
            .map(ReverseProxy::from_config)
            .transpose()?;

        // The root is unused behind a proxy, so it is not required to exist.
        let root = if proxy.is_some() {
            config.root_dir.clone()
        } else {
            resolve_root(&config.root_dir)?
        };

        Ok(Self {
            resolver: PathResolver::new(root, Default::default()),
            config,
            proxy,
            assets,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }
}

/// Builds the full application: asset route, request branches, CORS and
/// connection logging.
pub fn build_router(config: ServerConfig, assets: AssetRegistry) -> Result<Router> {
    let state = Arc::new(ServerState::new(config, assets)?);
    let cors_enabled = state.config.cors_enabled;

    let mut router = Router::new()
        .route("/_dirserve/:asset", get(serve_asset))
        .fallback(handle_request)
        .with_state(state);

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    Ok(router.layer(middleware::from_fn(log_connection)))
}

async fn serve_asset(
    State(state): State<Arc<ServerState>>,
    UrlPath(token): UrlPath<String>,
) -> Response {
    state.assets.respond(&token)
}

async fn handle_request(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    if let Some(proxy) = &state.proxy {
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        return proxy
            .forward(client_addr, state.config.scheme(), request)
            .await;
    }

    match serve_path(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve_path(state: &ServerState, request: Request) -> Result<Response> {
    let decoded = percent_decode_str(request.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let resolved = state.resolver.resolve(&decoded).await?;
    debug!(request_path = %decoded, resolved = %resolved.path().display(), "resolved path");

    match resolved.kind() {
        PathKind::File => Ok(serve_file(resolved.path(), request).await),
        PathKind::Directory => serve_directory(state, &resolved).await,
    }
}

/// Range, conditional requests and MIME types are handled by `ServeFile`.
async fn serve_file(path: &Path, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

async fn serve_directory(state: &ServerState, resolved: &ResolvedPath) -> Result<Response> {
    let theme = state.config.theme;
    let mut entries = list_directory(resolved.path()).await?;
    if theme.sorts_entries() {
        sort_entries(&mut entries);
    }

    let display_path = relative_display_path(state.resolver.root(), resolved.path());
    let nonce = theme.needs_nonce().then(generate_nonce);
    let html = render_directory(
        &display_path,
        &entries,
        nonce.as_deref(),
        theme,
        state.assets.links(),
    );

    let mut response = Html(html).into_response();
    apply_security_headers(response.headers_mut(), theme, nonce.as_deref())?;
    Ok(response)
}

/// 128-bit random nonce, hex encoded
fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn content_security_policy(theme: DirViewTheme, nonce: Option<&str>) -> String {
    match (theme, nonce) {
        (DirViewTheme::Pretty, Some(nonce)) => format!(
            "default-src 'none'; script-src 'nonce-{nonce}'; connect-src 'self'; img-src 'self'; style-src 'nonce-{nonce}'; frame-ancestors 'self'; form-action 'self';"
        ),
        _ => BASIC_CSP.to_string(),
    }
}

fn apply_security_headers(
    headers: &mut HeaderMap,
    theme: DirViewTheme,
    nonce: Option<&str>,
) -> Result<()> {
    let csp = HeaderValue::from_str(&content_security_policy(theme, nonce))
        .map_err(|e| ServeError::Io(std::io::Error::other(e)))?;
    headers.insert(CONTENT_SECURITY_POLICY, csp);

    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("x-xss-protection", "1; mode=block"),
        ("referrer-policy", "no-referrer"),
        ("permissions-policy", PERMISSIONS_POLICY),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    Ok(())
}
