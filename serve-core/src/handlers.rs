//! Per-request connection logging
//!
//! `log_connection` wraps the whole router. The response body is replaced by
//! a [`CountingBody`] so the byte count and total duration are reported when
//! the body is finished with, not when the handler returns.

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub async fn log_connection(request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    debug!(%peer, %method, %path, "Accepted");

    let response = next.run(request).await;
    log_status(&peer, &method, &path, response.status());

    response.map(|body| Body::new(CountingBody::new(body, peer, started)))
}

fn log_status(peer: &str, method: &Method, path: &str, status: StatusCode) {
    let code = status.as_u16();
    if status.is_server_error() {
        error!(%peer, %method, %path, status = code, "{} {} {}", code, method, path);
    } else if status.is_client_error() {
        warn!(%peer, %method, %path, status = code, "{} {} {}", code, method, path);
    } else {
        info!(%peer, %method, %path, status = code, "{} {} {}", code, method, path);
    }
}

/// Response body that counts the bytes it yields and logs a summary on drop.
pub struct CountingBody {
    inner: Body,
    written: u64,
    peer: String,
    started: Instant,
}

impl CountingBody {
    pub fn new(inner: Body, peer: String, started: Instant) -> Self {
        Self {
            inner,
            written: 0,
            peer,
            started,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled {
            if let Some(data) = frame.data_ref() {
                this.written += data.len() as u64;
            }
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CountingBody {
    fn drop(&mut self) {
        debug!(
            peer = %self.peer,
            written = self.written,
            "Closing - written {} bytes - {:?}",
            self.written,
            self.started.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_counting_body_counts_frames() {
        let mut body = CountingBody::new(Body::from("hello world"), "-".to_string(), Instant::now());
        let mut collected = Vec::new();
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                collected.extend_from_slice(&data);
            }
        }
        assert_eq!(collected, b"hello world");
        assert_eq!(body.written(), 11);
    }

    #[tokio::test]
    async fn test_middleware_preserves_response() {
        let app = Router::new()
            .route("/", get(|| async { "payload" }))
            .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .layer(axum::middleware::from_fn(log_connection));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"payload");

        let response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
