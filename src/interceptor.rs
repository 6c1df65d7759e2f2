use crate::codec::CONTENT_ENCODING;
use crate::policy::CompressionConfig;
use crate::pool::PooledEncoder;
use crate::sniff::detect_content_type;
use crate::writer::{CloseNotify, Flush, Hijack, Push, ResponseWriter};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::io;
use std::sync::Arc;
use tracing::trace;

/// Where body bytes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing written yet; status and headers are held back.
    Fresh,
    /// Body bytes go through the gzip encoder.
    Compressing { always_flush: bool },
    /// Body bytes go to the response unchanged.
    Passthrough,
}

/// A response writer that gzips the body when it is worth it.
///
/// The status is held back until the first body write. That write decides,
/// once and for all, whether the response is compressed: responses that are
/// already encoded, too small, or of an already compressed media type are
/// passed through untouched. Headers are adjusted before the status is
/// committed, so the client always sees headers that match the body.
///
/// Optional capabilities of the wrapped writer are exposed unchanged. Flushing
/// a compressing writer flushes the encoder first.
///
/// [`close`](CompressWriter::close) must be called once the handler is done,
/// to commit a status that was never followed by a write and to terminate the
/// compressed stream.
#[derive(Debug)]
pub struct CompressWriter<W> {
    inner: W,
    encoder: PooledEncoder,
    config: Arc<CompressionConfig>,
    status: Option<StatusCode>,
    state: State,
}

impl<W: ResponseWriter> CompressWriter<W> {
    /// Wraps `inner`, compressing through `encoder` if the response qualifies.
    pub fn new(inner: W, encoder: PooledEncoder, config: Arc<CompressionConfig>) -> Self {
        Self {
            inner,
            encoder,
            config,
            status: None,
            state: State::Fresh,
        }
    }

    /// Returns true once the response has been found worth compressing.
    pub fn is_compressing(&self) -> bool {
        matches!(self.state, State::Compressing { .. })
    }

    /// Returns true once the compression decision has been made.
    pub fn is_decided(&self) -> bool {
        self.state != State::Fresh
    }

    /// Returns a reference to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns a mutable reference to the wrapped writer.
    ///
    /// Writing to it directly bypasses compression.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Finishes the response and returns the wrapped writer.
    ///
    /// If nothing was written, a status set by the handler is committed now.
    /// If the body was compressed, the gzip stream is terminated.
    pub fn close(mut self) -> io::Result<W> {
        match self.state {
            State::Fresh => {
                if let Some(status) = self.status.take() {
                    self.inner.write_status(status)?;
                }
            }
            State::Compressing { .. } => self.encoder.finish(&mut self.inner)?,
            State::Passthrough => {}
        }
        Ok(self.inner)
    }

    /// Runs the one-time compression decision for the first chunk of the body
    /// and commits the status.
    fn decide(&mut self, first_chunk: &[u8]) -> io::Result<()> {
        self.state = if self.qualifies(first_chunk) {
            let headers = self.inner.headers_mut();
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::ACCEPT_RANGES);
            headers.insert(
                header::CONTENT_ENCODING,
                HeaderValue::from_static(CONTENT_ENCODING),
            );
            let always_flush = is_streaming(headers);
            self.encoder.reset();
            State::Compressing { always_flush }
        } else {
            State::Passthrough
        };

        let status = self.status.take().unwrap_or(StatusCode::OK);
        self.inner.write_status(status)
    }

    fn qualifies(&mut self, first_chunk: &[u8]) -> bool {
        let headers = self.inner.headers_mut();

        // Check content is not already encoded.
        if headers.contains_key(header::CONTENT_ENCODING) {
            trace!("response already encoded, not compressing");
            return false;
        }

        // Range responses describe bytes of the identity body.
        if headers.contains_key(header::CONTENT_RANGE) {
            trace!("range response, not compressing");
            return false;
        }

        // The first chunk stands in for the whole body when no length is known.
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|len| *len > 0)
            .unwrap_or(first_chunk.len());

        // An empty chunk says nothing about the type, so none is recorded.
        if !first_chunk.is_empty() && !headers.contains_key(header::CONTENT_TYPE) {
            let sniffed = detect_content_type(first_chunk);
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(sniffed));
        }
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let compress = self.config.should_compress(content_length, content_type);
        trace!(content_length, content_type, compress, "compression decided");
        compress
    }
}

impl<W: ResponseWriter> ResponseWriter for CompressWriter<W> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    /// Holds the status back until the first write; afterwards the status
    /// goes straight to the wrapped writer.
    fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        match self.state {
            State::Fresh => {
                self.status = Some(status);
                Ok(())
            }
            _ => self.inner.write_status(status),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state == State::Fresh {
            self.decide(buf)?;
        }

        match self.state {
            State::Compressing { always_flush } => {
                self.encoder.encode(buf, &mut self.inner)?;
                if always_flush {
                    self.flush_encoder()?;
                }
                Ok(buf.len())
            }
            State::Passthrough => self.inner.write(buf),
            State::Fresh => unreachable!("decided above"),
        }
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        if self.inner.flusher().is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        self.inner.hijacker()
    }

    fn pusher(&mut self) -> Option<&mut dyn Push> {
        self.inner.pusher()
    }

    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
        self.inner.close_notifier()
    }
}

impl<W: ResponseWriter> CompressWriter<W> {
    fn flush_encoder(&mut self) -> io::Result<()> {
        self.encoder.flush(&mut self.inner)?;
        match self.inner.flusher() {
            Some(flusher) => flusher.flush(),
            None => Ok(()),
        }
    }
}

impl<W: ResponseWriter> Flush for CompressWriter<W> {
    /// Flushing commits the status, so the decision is made here if no body
    /// was written yet, judging the response by its headers alone. No
    /// `Content-Type` is sniffed in that case.
    fn flush(&mut self) -> io::Result<()> {
        if self.state == State::Fresh {
            self.decide(&[])?;
        }

        match self.state {
            State::Compressing { .. } => self.flush_encoder(),
            _ => match self.inner.flusher() {
                Some(flusher) => flusher.flush(),
                None => Ok(()),
            },
        }
    }
}

/// Checks if the response is a stream whose chunks must reach the client
/// without delay.
fn is_streaming(headers: &HeaderMap) -> bool {
    let unbuffered = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    unbuffered
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}
