//! Gzip response compression that decides on the first write.
//!
//! The middleware holds back the response status until the first chunk of
//! the body is written. That chunk decides whether the response is worth
//! compressing, so the headers can still be adjusted before they are sent.
//! The rest of the body streams through either a pooled gzip encoder or
//! straight to the client, without ever being buffered as a whole.
//!
//! Two front ends share the same engine, [`CompressWriter`]:
//!
//! - [`Compress`] wraps a synchronous [`Handler`] that writes to a
//!   [`ResponseWriter`]. Optional capabilities of the writer (flush,
//!   connection hijack, server push, close notification) stay visible to the
//!   handler.
//! - [`CompressionLayer`] is a Tower layer. Its response future resolves once
//!   the first data frame of the inner body is available. Tower bodies have
//!   no connection hijack, server push or close notification, so only
//!   flushing is carried through this adapter.
//!
//! # Example
//!
//! ```ignore
//! use gzip_response::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new())
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - The request does not accept `gzip`
//! - The request is a protocol upgrade (`Sec-WebSocket-Key` or `Upgrade`)
//! - `Content-Encoding` header is already set
//! - `Content-Range` header is present (range responses)
//! - `Content-Length`, or the first chunk when the length is unknown, is
//!   below the minimum size (default: 1400 bytes)
//! - `Content-Type`, sniffed from the first chunk when absent, is on the
//!   denylist of already compressed media types
//!
//! The encoder is flushed after every write when:
//! - `X-Accel-Buffering: no` header is present
//! - `Content-Type` is `text/event-stream`
//! - `Content-Type` starts with `application/grpc-web`
//!
//! # Response Modifications
//!
//! - `Vary` header includes `Accept-Encoding`, compressed or not
//! - `Content-Type` is set to the sniffed type when the handler set none
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to `gzip`
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed

#![deny(missing_docs)]

mod body;
pub mod codec;
mod future;
mod handler;
mod interceptor;
mod layer;
pub mod policy;
pub mod pool;
mod service;
pub mod sniff;
pub mod writer;

pub use body::CompressionBody;
pub use future::ResponseFuture;
pub use handler::{Compress, Handler};
pub use interceptor::CompressWriter;
pub use layer::CompressionLayer;
pub use policy::{CompressionConfig, DEFAULT_MIN_SIZE};
pub use pool::{EncoderPool, PooledEncoder};
pub use service::CompressionService;
pub use writer::ResponseWriter;
