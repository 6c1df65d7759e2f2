use crate::handler::Compress;
use crate::policy::CompressionConfig;
use crate::pool::EncoderPool;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that gzips HTTP response bodies.
///
/// All services and handlers produced by one layer share its configuration
/// and its encoder pool.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    config: Arc<CompressionConfig>,
    pool: Arc<EncoderPool>,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// The default minimum size for compression is 1400 bytes.
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Creates a compression layer with the given configuration.
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            config: Arc::new(config),
            pool: Arc::new(EncoderPool::new()),
        }
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Responses whose `Content-Length`, or first chunk when the length is
    /// unknown, is smaller than this value will not be compressed.
    pub fn min_size(mut self, size: usize) -> Self {
        self.config = Arc::new((*self.config).clone().min_size(size));
        self
    }

    /// Shares an existing encoder pool, e.g. between several layers.
    pub fn pool(mut self, pool: Arc<EncoderPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Wraps a synchronous [`Handler`](crate::Handler).
    pub fn handler<H>(&self, inner: H) -> Compress<H> {
        Compress::with_config(inner, Arc::clone(&self.config), Arc::clone(&self.pool))
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::clone(&self.config), Arc::clone(&self.pool))
    }
}
