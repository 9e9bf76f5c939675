//! Reverse proxy to a single upstream
//!
//! The upstream's path acts as a mount prefix: a request for `/x/y` against a
//! target of `http://upstream/base/` is sent to `http://upstream/base/x/y`.

use crate::config::ProxyConfig;
use crate::error::ServeError;
use crate::Result;
use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, HOST, LOCATION};
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body::Body as HttpBody;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::net::SocketAddr;
use tracing::{debug, error};
use url::Url;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_ORIGINAL_LOCATION: &str = "x-original-location";

/// Forwards requests to one configured upstream.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    client: Client,
    target: Url,
    /// Target exactly as configured, used for `Location` prefix matching
    target_raw: String,
    include_forwarding_headers: bool,
    ignore_redirects: bool,
}

impl ReverseProxy {
    pub fn new(target: &str, include_forwarding_headers: bool, ignore_redirects: bool) -> Result<Self> {
        let parsed = Url::parse(target)
            .map_err(|e| ServeError::ProxyConfigInvalid(format!("{}: {}", target, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServeError::ProxyConfigInvalid(format!(
                "{}: unsupported scheme '{}'",
                target,
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(ServeError::ProxyConfigInvalid(format!("{}: missing host", target)));
        }

        // Redirects are passed back to the client, never followed here.
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| {
                ServeError::ProxyConfigInvalid(format!("failed to build proxy client: {}", e))
            })?;

        Ok(Self {
            client,
            target: parsed,
            target_raw: target.to_string(),
            include_forwarding_headers,
            ignore_redirects,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::new(
            &config.target,
            config.include_forwarding_headers,
            config.ignore_redirects,
        )
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Outbound URL for an inbound request URI.
    ///
    /// Dot segments in the inbound path are collapsed first, so the result
    /// always stays below the target path.
    pub fn rewrite_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        let path = format!(
            "{}/{}",
            self.target.path().trim_end_matches('/'),
            collapse_dot_segments(uri.path())
        );
        url.set_path(&path);
        url.set_query(merge_query(self.target.query(), uri.query()).as_deref());
        url
    }

    /// Forwards `request` upstream. Upstream failures become `502 Bad Gateway`.
    pub async fn forward(
        &self,
        client_addr: Option<SocketAddr>,
        inbound_scheme: &str,
        request: Request<Body>,
    ) -> Response {
        match self.try_forward(client_addr, inbound_scheme, request).await {
            Ok(response) => response,
            Err(e) => {
                error!(target = %self.target, error = %e, "proxy request failed");
                (StatusCode::BAD_GATEWAY, "Error proxying request").into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        client_addr: Option<SocketAddr>,
        inbound_scheme: &str,
        request: Request<Body>,
    ) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let url = self.rewrite_url(&parts.uri);
        debug!(method = %parts.method, upstream = %url, "forwarding request");

        let mut headers = HeaderMap::with_capacity(parts.headers.len() + 2);
        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop(name) || name == HOST {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if self.include_forwarding_headers {
            if let Some(addr) = client_addr {
                if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
                    headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
                }
            }
            if let Ok(value) = HeaderValue::from_str(inbound_scheme) {
                headers.insert(HeaderName::from_static(X_FORWARDED_PROTO), value);
            }
        }

        let mut builder = self.client.request(parts.method, url).headers(headers);
        // Streamed as it arrives; the inbound Content-Length is kept for framing.
        if !body.is_end_stream() {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = builder.send().await?;

        let mut response = Response::new(Body::empty());
        *response.status_mut() = upstream.status();
        for (name, value) in upstream.headers().iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            response.headers_mut().append(name.clone(), value.clone());
        }
        self.rewrite_location(response.headers_mut());

        *response.body_mut() = Body::from_stream(upstream.bytes_stream());
        Ok(response)
    }

    /// Applies the configured redirect policy to upstream response headers.
    ///
    /// With `ignore_redirects` the `Location` header is moved to
    /// `X-Original-Location`. Otherwise a `Location` starting with the
    /// configured target is made relative to this server's origin; anything
    /// else is left untouched.
    pub fn rewrite_location(&self, headers: &mut HeaderMap) {
        let Some(location) = headers.get(LOCATION).cloned() else {
            return;
        };

        if self.ignore_redirects {
            headers.remove(LOCATION);
            headers.insert(HeaderName::from_static(X_ORIGINAL_LOCATION), location);
            return;
        }

        let Ok(value) = location.to_str() else {
            return;
        };
        if let Some(rewritten) = strip_target_prefix(&self.target_raw, value) {
            if let Ok(new_value) = HeaderValue::from_str(&rewritten) {
                headers.insert(LOCATION, new_value);
            }
        }
    }
}

/// Target query first, inbound query appended.
pub fn merge_query(target: Option<&str>, inbound: Option<&str>) -> Option<String> {
    let target = target.filter(|q| !q.is_empty());
    let inbound = inbound.filter(|q| !q.is_empty());
    match (target, inbound) {
        (Some(t), Some(i)) => Some(format!("{}&{}", t, i)),
        (Some(t), None) => Some(t.to_string()),
        (None, Some(i)) => Some(i.to_string()),
        (None, None) => None,
    }
}

/// Inbound request path relative to the mount point, with `.` and `..`
/// resolved and clamped at `/`. Percent-encoded dots count as dots.
fn collapse_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match decoded_dots(segment) {
            Some(1) => {}
            Some(2) => {
                segments.pop();
            }
            _ if segment.is_empty() => {}
            _ => segments.push(segment),
        }
    }

    let mut collapsed = segments.join("/");
    let last = path.rsplit('/').next().unwrap_or_default();
    let ends_in_dir = path.ends_with('/') || matches!(decoded_dots(last), Some(1 | 2));
    if ends_in_dir && !collapsed.is_empty() {
        collapsed.push('/');
    }
    collapsed
}

/// Number of dots when `segment` is `.` or `..`, also in `%2e` form.
fn decoded_dots(segment: &str) -> Option<usize> {
    let lowered = segment.to_ascii_lowercase();
    match lowered.replace("%2e", ".").as_str() {
        "." => Some(1),
        ".." => Some(2),
        _ => None,
    }
}

/// Origin-relative location when `location` starts with `target` at a path boundary.
fn strip_target_prefix(target: &str, location: &str) -> Option<String> {
    let rest = location.strip_prefix(target)?;
    let at_boundary = target.ends_with('/')
        || rest.is_empty()
        || rest.starts_with(['/', '?', '#']);
    if !at_boundary {
        return None;
    }
    if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        Some(format!("/{}", rest))
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-connection")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("upgrade")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(target: &str, ignore_redirects: bool) -> ReverseProxy {
        ReverseProxy::new(target, false, ignore_redirects).unwrap()
    }

    fn location_after(proxy: &ReverseProxy, location: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
        proxy.rewrite_location(&mut headers);
        headers
    }

    #[test]
    fn test_rewrite_url_mounts_target_path() {
        let p = proxy("http://u/base/", false);
        let url = p.rewrite_url(&"/x/y".parse().unwrap());
        assert_eq!(url.path(), "/base/x/y");
        assert_eq!(url.as_str(), "http://u/base/x/y");
    }

    #[test]
    fn test_rewrite_url_merges_queries() {
        let p = proxy("http://u/base/?a=1", false);
        let url = p.rewrite_url(&"/x/y?b=2".parse().unwrap());
        assert_eq!(url.query(), Some("a=1&b=2"));

        let p = proxy("http://u/", false);
        let url = p.rewrite_url(&"/x?b=2".parse().unwrap());
        assert_eq!(url.query(), Some("b=2"));

        let p = proxy("http://u/?a=1", false);
        let url = p.rewrite_url(&"/x".parse().unwrap());
        assert_eq!(url.query(), Some("a=1"));
    }

    #[test]
    fn test_rewrite_url_without_target_path() {
        let p = proxy("http://127.0.0.1:3000", false);
        let url = p.rewrite_url(&"/".parse().unwrap());
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/");
        let url = p.rewrite_url(&"/a/b".parse().unwrap());
        assert_eq!(url.path(), "/a/b");
    }

    #[test]
    fn test_rewrite_url_stays_below_mount_prefix() {
        let p = proxy("http://u/base/", false);
        for (inbound, expected) in [
            ("/x/../../admin", "/base/admin"),
            ("/../../../etc/passwd", "/base/etc/passwd"),
            ("/%2e%2e/admin", "/base/admin"),
            ("/a/./b/%2E/", "/base/a/b/"),
            ("/a/b/..", "/base/a/"),
            ("/..", "/base/"),
        ] {
            let url = p.rewrite_url(&inbound.parse().unwrap());
            assert_eq!(url.path(), expected, "inbound {}", inbound);
        }
    }

    #[test]
    fn test_collapse_dot_segments() {
        assert_eq!(collapse_dot_segments("/"), "");
        assert_eq!(collapse_dot_segments("/sub/"), "sub/");
        assert_eq!(collapse_dot_segments("//a//b"), "a/b");
        assert_eq!(collapse_dot_segments("/a/../.."), "");
        assert_eq!(collapse_dot_segments("/a..b/c"), "a..b/c");
    }

    #[test]
    fn test_merge_query() {
        assert_eq!(merge_query(Some("a=1"), Some("b=2")).as_deref(), Some("a=1&b=2"));
        assert_eq!(merge_query(None, Some("b=2")).as_deref(), Some("b=2"));
        assert_eq!(merge_query(Some(""), Some("b=2")).as_deref(), Some("b=2"));
        assert_eq!(merge_query(Some("a=1"), None).as_deref(), Some("a=1"));
        assert_eq!(merge_query(None, None), None);
    }

    #[test]
    fn test_invalid_targets_are_rejected() {
        for target in ["not a url", "ftp://host/", "unix:/tmp/sock"] {
            assert!(matches!(
                ReverseProxy::new(target, false, false),
                Err(ServeError::ProxyConfigInvalid(_))
            ));
        }
    }

    #[test]
    fn test_ignore_redirects_moves_location() {
        let p = proxy("http://u/base/", true);
        let headers = location_after(&p, "http://u/base/login");
        assert!(headers.get(LOCATION).is_none());
        assert_eq!(
            headers.get(X_ORIGINAL_LOCATION).unwrap(),
            "http://u/base/login"
        );
    }

    #[test]
    fn test_location_prefix_is_stripped() {
        let p = proxy("http://u/base/", false);
        assert_eq!(location_after(&p, "http://u/base/login").get(LOCATION).unwrap(), "/login");
        assert_eq!(location_after(&p, "http://u/base/").get(LOCATION).unwrap(), "/");

        let p = proxy("http://u", false);
        assert_eq!(location_after(&p, "http://u/next?x=1").get(LOCATION).unwrap(), "/next?x=1");
    }

    #[test]
    fn test_partial_location_matches_are_untouched() {
        let p = proxy("http://u/base", false);
        assert_eq!(
            location_after(&p, "http://u/base2/x").get(LOCATION).unwrap(),
            "http://u/base2/x"
        );
        assert_eq!(
            location_after(&p, "https://other/?next=http://u/base").get(LOCATION).unwrap(),
            "https://other/?next=http://u/base"
        );
        assert_eq!(location_after(&p, "/relative").get(LOCATION).unwrap(), "/relative");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
    }
}
