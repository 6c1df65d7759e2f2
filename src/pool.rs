//! Pooling of gzip encoders across responses.

use crate::codec::Encoder;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::debug;

/// Default number of idle encoders kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 256;

/// A pool of idle gzip encoders shared by concurrent responses.
///
/// Encoders are handed out unbound and come back unbound, whatever the
/// borrowing response did with them. `acquire` never fails: when no idle
/// encoder is available a new one is created.
#[derive(Debug)]
pub struct EncoderPool {
    idle: Mutex<Vec<Encoder>>,
    max_idle: usize,
}

impl EncoderPool {
    /// Creates an empty pool keeping at most [`DEFAULT_MAX_IDLE`] encoders.
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Creates an empty pool keeping at most `max_idle` idle encoders.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Borrows an encoder; it goes back to the pool when the handle drops.
    pub fn acquire(self: &Arc<Self>) -> PooledEncoder {
        let encoder = self.idle.lock().pop().unwrap_or_default();
        PooledEncoder {
            encoder: Some(encoder),
            pool: Arc::clone(self),
        }
    }

    /// Returns an encoder to the pool.
    pub fn release(&self, mut encoder: Encoder) {
        encoder.unbind();

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(encoder);
        } else {
            debug!(max_idle = self.max_idle, "encoder pool full, dropping encoder");
        }
    }

    /// Returns the number of idle encoders.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for EncoderPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An encoder borrowed from an [`EncoderPool`].
///
/// Dropping the handle releases the encoder exactly once, including while
/// unwinding out of a handler.
#[derive(Debug)]
pub struct PooledEncoder {
    encoder: Option<Encoder>,
    pool: Arc<EncoderPool>,
}

impl Deref for PooledEncoder {
    type Target = Encoder;

    fn deref(&self) -> &Encoder {
        self.encoder.as_ref().expect("encoder present until drop")
    }
}

impl DerefMut for PooledEncoder {
    fn deref_mut(&mut self) -> &mut Encoder {
        self.encoder.as_mut().expect("encoder present until drop")
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.pool.release(encoder);
        }
    }
}
