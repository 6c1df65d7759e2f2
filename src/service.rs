use crate::future::{Intercept, ResponseFuture};
use crate::handler::wants_compression;
use crate::policy::CompressionConfig;
use crate::pool::EncoderPool;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that gzips HTTP response bodies when it is worth it.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    config: Arc<CompressionConfig>,
    pool: Arc<EncoderPool>,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S, config: Arc<CompressionConfig>, pool: Arc<EncoderPool>) -> Self {
        Self {
            inner,
            config,
            pool,
        }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: http_body::Body,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Decide from the request headers whether to intercept at all
        let intercept = wants_compression(req.headers()).then(|| Intercept {
            config: Arc::clone(&self.config),
            pool: Arc::clone(&self.pool),
        });

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::CompressionLayer;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use http::{HeaderValue, Response, StatusCode, header};
    use http_body::{Body, Frame};
    use http_body_util::{BodyExt, Full};
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::io::Read;
    use std::pin::Pin;
    use tower::{Layer, ServiceExt, service_fn};

    /// A body that yields predefined data chunks.
    struct Chunks(VecDeque<Bytes>);

    impl Body for Chunks {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.0.pop_front().map(|chunk| Ok(Frame::data(chunk))))
        }
    }

    fn html(len: usize) -> Vec<u8> {
        let mut body = b"<!DOCTYPE HTML><html><body>".to_vec();
        body.resize(len, b'x');
        body
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .expect("valid gzip stream");
        out
    }

    fn request(accept_encoding: Option<&'static str>) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = accept_encoding {
            builder = builder.header(header::ACCEPT_ENCODING, value);
        }
        builder.body(()).unwrap()
    }

    async fn respond(
        accept_encoding: Option<&'static str>,
        response: Response<Full<Bytes>>,
    ) -> (http::response::Parts, Bytes) {
        let response = std::sync::Mutex::new(Some(response));
        let service = CompressionLayer::new().layer(service_fn(move |_req: Request<()>| {
            let response = response.lock().unwrap().take().unwrap();
            async move { Ok::<_, Infallible>(response) }
        }));

        let response = service.oneshot(request(accept_encoding)).await.unwrap();
        let (parts, body) = response.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        (parts, body)
    }

    #[tokio::test]
    async fn test_scenario_large_html() {
        let response = Response::new(Full::new(Bytes::from(html(2000))));
        let (parts, body) = respond(Some("gzip"), response).await;

        assert_eq!(parts.headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert!(parts.headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(
            parts.headers.get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(parts.headers.get(header::VARY).unwrap(), "accept-encoding");
        assert_eq!(gunzip(&body), html(2000));
    }

    #[tokio::test]
    async fn test_scenario_small_body() {
        let response = Response::new(Full::new(Bytes::from("hello")));
        let (parts, body) = respond(Some("gzip"), response).await;

        assert!(parts.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_scenario_jpeg() {
        let mut response = Response::new(Full::new(Bytes::from(vec![0xFF; 2000])));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
        let (parts, body) = respond(Some("gzip"), response).await;

        assert!(parts.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body.as_ref(), vec![0xFF; 2000].as_slice());
    }

    #[tokio::test]
    async fn test_scenario_no_accept_encoding() {
        let mut response = Response::new(Full::new(Bytes::from(html(2000))));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("2000"));
        let (parts, body) = respond(None, response).await;

        assert!(parts.headers.get(header::CONTENT_ENCODING).is_none());
        assert!(parts.headers.get(header::CONTENT_TYPE).is_none());
        assert_eq!(parts.headers.get(header::CONTENT_LENGTH).unwrap(), "2000");
        assert_eq!(parts.headers.get(header::VARY).unwrap(), "accept-encoding");
        assert_eq!(body.as_ref(), html(2000).as_slice());
    }

    #[tokio::test]
    async fn test_passthrough_keeps_exact_size() {
        let service = CompressionLayer::new().layer(service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("hello"))))
        }));
        let response = service.oneshot(request(Some("gzip"))).await.unwrap();

        assert!(!response.body().is_compressed());
        assert_eq!(response.body().size_hint().exact(), Some(5));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_status_is_kept() {
        for len in [10, 2000] {
            let mut response = Response::new(Full::new(Bytes::from(html(len))));
            *response.status_mut() = StatusCode::IM_A_TEAPOT;
            let (parts, _) = respond(Some("gzip"), response).await;
            assert_eq!(parts.status, StatusCode::IM_A_TEAPOT);
        }
    }

    #[tokio::test]
    async fn test_empty_body_keeps_status() {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        let (parts, body) = respond(Some("gzip"), response).await;

        assert_eq!(parts.status, StatusCode::NOT_FOUND);
        assert!(parts.headers.get(header::CONTENT_ENCODING).is_none());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_existing_content_encoding_is_kept() {
        let mut response = Response::new(Full::new(Bytes::from(html(2000))));
        response
            .headers_mut()
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
        let (parts, body) = respond(Some("gzip"), response).await;

        assert_eq!(
            parts.headers.get(header::CONTENT_ENCODING).unwrap(),
            "identity"
        );
        assert_eq!(body.as_ref(), html(2000).as_slice());
    }

    #[tokio::test]
    async fn test_websocket_upgrade_is_skipped() {
        let service = CompressionLayer::new().layer(service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(html(2000)))))
        }));
        let mut req = request(Some("gzip"));
        req.headers_mut().insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        let response = service.oneshot(req).await.unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(!response.body().is_compressed());
    }

    #[tokio::test]
    async fn test_first_chunk_decides() {
        let chunks = |first: usize| {
            Chunks(VecDeque::from(vec![
                Bytes::new(),
                Bytes::from(html(first)),
                Bytes::from(vec![b'y'; 3000]),
            ]))
        };
        let service = CompressionLayer::new().layer(service_fn(move |req: Request<()>| {
            let first = if req.uri().path() == "/small" { 100 } else { 2000 };
            let body = chunks(first);
            async move { Ok::<_, Infallible>(Response::new(body)) }
        }));

        let mut expected = html(2000);
        expected.extend_from_slice(&[b'y'; 3000]);
        let mut req = request(Some("gzip"));
        *req.uri_mut() = "/large".parse().unwrap();
        let response = service.clone().oneshot(req).await.unwrap();
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(gunzip(&body), expected);

        // A small first chunk stands in for the whole body.
        let mut expected = html(100);
        expected.extend_from_slice(&[b'y'; 3000]);
        let mut req = request(Some("gzip"));
        *req.uri_mut() = "/small".parse().unwrap();
        let response = service.oneshot(req).await.unwrap();
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_pool_is_shared_by_clones() {
        let pool = Arc::new(EncoderPool::new());
        let layer = CompressionLayer::new().pool(Arc::clone(&pool));
        let service = layer.layer(service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(html(2000)))))
        }));

        for _ in 0..3 {
            let response = service.clone().oneshot(request(Some("gzip"))).await.unwrap();
            response.into_body().collect().await.unwrap();
        }
        assert_eq!(pool.idle(), 1);
    }
}
