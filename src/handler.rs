use crate::codec::accepts_gzip;
use crate::interceptor::CompressWriter;
use crate::policy::CompressionConfig;
use crate::pool::EncoderPool;
use crate::writer::ResponseWriter;
use http::{HeaderMap, HeaderValue, Request, header};
use std::io;
use std::sync::Arc;

/// A synchronous request handler writing its response to a [`ResponseWriter`].
pub trait Handler<B> {
    /// Handles `req`, writing the response to `w`.
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()>;
}

impl<B, F> Handler<B> for F
where
    F: Fn(&Request<B>, &mut dyn ResponseWriter) -> io::Result<()>,
{
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()> {
        self(req, w)
    }
}

/// A handler that gzips the responses of the handler it wraps.
///
/// Requests that do not accept gzip, and upgrade requests, reach the wrapped
/// handler untouched apart from `Vary: accept-encoding`. All other responses
/// go through a [`CompressWriter`] which is closed, and whose encoder is
/// returned to the pool, whatever the wrapped handler returns.
#[derive(Debug, Clone)]
pub struct Compress<H> {
    inner: H,
    config: Arc<CompressionConfig>,
    pool: Arc<EncoderPool>,
}

impl<H> Compress<H> {
    /// Wraps `inner` with the default configuration and a fresh pool.
    pub fn new(inner: H) -> Self {
        Self::with_config(
            inner,
            Arc::new(CompressionConfig::default()),
            Arc::new(EncoderPool::new()),
        )
    }

    /// Wraps `inner`, sharing the given configuration and encoder pool.
    pub fn with_config(inner: H, config: Arc<CompressionConfig>, pool: Arc<EncoderPool>) -> Self {
        Self {
            inner,
            config,
            pool,
        }
    }

    /// Returns a reference to the inner handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Consumes this handler, returning the inner handler.
    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H, B> Handler<B> for Compress<H>
where
    H: Handler<B>,
{
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()> {
        add_vary_accept_encoding(w.headers_mut());

        if !wants_compression(req.headers()) {
            return self.inner.serve(req, w);
        }

        let mut cw = CompressWriter::new(w, self.pool.acquire(), Arc::clone(&self.config));
        let served = self.inner.serve(req, &mut cw);
        let closed = cw.close();
        served?;
        closed.map(drop)
    }
}

/// Returns true if the request accepts gzip and is not a protocol upgrade.
pub(crate) fn wants_compression(headers: &HeaderMap) -> bool {
    let accepts = headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(accepts_gzip);

    accepts && !is_upgrade(headers)
}

/// Checks if the request asks to switch protocols, e.g. to WebSocket.
fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::SEC_WEBSOCKET_KEY) || headers.contains_key(header::UPGRADE)
}

/// Adds Accept-Encoding to the Vary header if not already present.
pub(crate) fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    // Check all Vary headers to see if Accept-Encoding is already present
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
}
