//! Static assets for directory index pages
//!
//! Each server owns its registry; nothing here is process-wide.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::collections::HashMap;

/// URI prefix under which registered assets are served
pub const ASSET_PREFIX: &str = "/_dirserve/";

const CACHE_POLICY: &str = "public, max-age=3600";

const PRETTY_STYLESHEET: &str = include_str!("../assets/pretty.css");

#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub content_type: String,
    pub content: Bytes,
}

impl Asset {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

impl IntoResponse for Asset {
    fn into_response(self) -> Response {
        let mut response = self.content.into_response();
        let headers = response.headers_mut();
        match HeaderValue::from_str(&self.content_type) {
            Ok(value) => {
                headers.insert(CONTENT_TYPE, value);
            }
            Err(_) => {
                headers.remove(CONTENT_TYPE);
            }
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_POLICY));
        response
    }
}

/// URIs of the theme assets a renderer may link to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetLinks {
    pub stylesheet: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: HashMap<String, Asset>,
    links: AssetLinks,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the stylesheet used by the `pretty` theme.
    pub fn with_theme_assets() -> Self {
        let mut registry = Self::new();
        let uri = registry.add(Asset::new(
            "pretty.css",
            "text/css; charset=utf-8",
            PRETTY_STYLESHEET,
        ));
        registry.links.stylesheet = Some(uri);
        registry
    }

    /// Registers `asset` and returns the URI path it is served under.
    ///
    /// The token is four random bytes in hex followed by the asset name, so
    /// the URI changes between runs and long cache lifetimes stay safe.
    pub fn add(&mut self, asset: Asset) -> String {
        let prefix: [u8; 4] = rand::random();
        let mut token: String = prefix.iter().map(|b| format!("{:02x}", b)).collect();
        token.push_str(&asset.name);
        let uri = format!("{}{}", ASSET_PREFIX, token);
        self.assets.insert(token, asset);
        uri
    }

    pub fn get(&self, token: &str) -> Option<&Asset> {
        self.assets.get(token)
    }

    pub fn links(&self) -> &AssetLinks {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Response for `token`; `404` when unknown.
    pub fn respond(&self, token: &str) -> Response {
        match self.get(token) {
            Some(asset) => asset.clone().into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_add_returns_prefixed_unique_uri() {
        let mut registry = AssetRegistry::new();
        let first = registry.add(Asset::new("app.js", "text/javascript", "1"));
        let second = registry.add(Asset::new("app.js", "text/javascript", "2"));

        for uri in [&first, &second] {
            let token = uri.strip_prefix(ASSET_PREFIX).unwrap();
            assert_eq!(token.len(), 8 + "app.js".len());
            assert!(token.ends_with("app.js"));
            assert!(token[..8].chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_theme_assets_link_stylesheet() {
        let registry = AssetRegistry::with_theme_assets();
        let uri = registry.links().stylesheet.clone().unwrap();
        let token = uri.strip_prefix(ASSET_PREFIX).unwrap();
        let asset = registry.get(token).unwrap();
        assert_eq!(asset.name, "pretty.css");
        assert!(asset.content_type.starts_with("text/css"));

        assert!(AssetRegistry::new().links().stylesheet.is_none());
    }

    #[tokio::test]
    async fn test_respond_sets_headers() {
        let mut registry = AssetRegistry::new();
        let uri = registry.add(Asset::new("x.css", "text/css", "body{}"));
        let token = uri.strip_prefix(ASSET_PREFIX).unwrap();

        let response = registry.respond(token);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/css");
        assert_eq!(response.headers()[CACHE_CONTROL], "public, max-age=3600");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"body{}");
    }

    #[test]
    fn test_unknown_token_is_not_found() {
        let registry = AssetRegistry::with_theme_assets();
        assert_eq!(registry.respond("deadbeefmissing.css").status(), StatusCode::NOT_FOUND);
    }
}
