use crate::interceptor::CompressWriter;
use crate::writer::{Flush, ResponseWriter};
use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// In-memory response channel behind a Tower response.
///
/// The status and headers are captured when the status is committed; body
/// bytes are buffered until the body hands them out as the next data frame.
#[derive(Debug, Default)]
pub(crate) struct FrameSink {
    headers: HeaderMap,
    status: Option<StatusCode>,
    data: BytesMut,
}

impl FrameSink {
    pub(crate) fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            status: None,
            data: BytesMut::new(),
        }
    }

    /// Takes the committed status and the headers as they are now.
    pub(crate) fn take_head(&mut self) -> (Option<StatusCode>, HeaderMap) {
        (self.status, std::mem::take(&mut self.headers))
    }

    /// Takes the buffered body bytes, if any.
    pub(crate) fn take_data(&mut self) -> Option<Bytes> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.split().freeze())
        }
    }
}

impl ResponseWriter for FrameSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        // Like a server, only the first commit counts.
        self.status.get_or_insert(status);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }
}

impl Flush for FrameSink {
    /// Buffered bytes are handed out as soon as the body is polled.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A response body that may be compressed.
///
/// This type wraps an inner body and either compresses it through a
/// [`CompressWriter`] or passes it through unchanged. Frames the middleware
/// read ahead while deciding are replayed first.
pub struct CompressionBody<B> {
    inner: Pin<Box<B>>,
    state: BodyState,
}

enum BodyState {
    /// Frames are forwarded unchanged.
    Passthrough {
        replay: Option<Result<Frame<Bytes>, io::Error>>,
        inner_done: bool,
    },
    /// Data frames go through the compressing writer.
    Compressed { writer: CompressWriter<FrameSink> },
    /// The gzip stream is terminated; its tail goes out before any trailers.
    Finishing {
        tail: Option<Bytes>,
        trailers: Option<HeaderMap>,
    },
    Done,
}

impl<B> CompressionBody<B> {
    /// Creates a passthrough body without compression.
    pub(crate) fn passthrough(inner: Pin<Box<B>>) -> Self {
        Self::replaying(inner, None, false)
    }

    /// Creates a passthrough body that first yields `replay`.
    ///
    /// `inner_done` records that the inner body already reported its end.
    pub(crate) fn replaying(
        inner: Pin<Box<B>>,
        replay: Option<Result<Frame<Bytes>, io::Error>>,
        inner_done: bool,
    ) -> Self {
        Self {
            inner,
            state: BodyState::Passthrough { replay, inner_done },
        }
    }

    /// Creates a body compressing the rest of `inner` through `writer`.
    ///
    /// Output the writer already produced is emitted first.
    pub(crate) fn compressed(inner: Pin<Box<B>>, writer: CompressWriter<FrameSink>) -> Self {
        Self {
            inner,
            state: BodyState::Compressed { writer },
        }
    }

    /// Returns true if the body is being compressed.
    pub fn is_compressed(&self) -> bool {
        !matches!(self.state, BodyState::Passthrough { .. })
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                BodyState::Passthrough { replay, inner_done } => {
                    if let Some(frame) = replay.take() {
                        return Poll::Ready(Some(frame));
                    }
                    if *inner_done {
                        return Poll::Ready(None);
                    }
                    // Pass through frames, converting data to Bytes
                    return match ready!(this.inner.as_mut().poll_frame(cx)) {
                        None => {
                            *inner_done = true;
                            Poll::Ready(None)
                        }
                        Some(Ok(frame)) => {
                            let frame =
                                frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                            Poll::Ready(Some(Ok(frame)))
                        }
                        Some(Err(e)) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
                    };
                }

                BodyState::Compressed { writer } => {
                    if let Some(data) = writer.get_mut().take_data() {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }

                    let trailers = match ready!(this.inner.as_mut().poll_frame(cx)) {
                        Some(Ok(frame)) => match frame.into_data() {
                            Ok(mut data) => {
                                let data = data.copy_to_bytes(data.remaining());
                                if let Err(e) = writer.write_all(&data) {
                                    this.state = BodyState::Done;
                                    return Poll::Ready(Some(Err(e)));
                                }
                                continue;
                            }
                            // Buffer trailers and finish compression first
                            Err(frame) => frame.into_trailers().ok(),
                        },
                        Some(Err(e)) => {
                            this.state = BodyState::Done;
                            return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                        }
                        None => None,
                    };

                    let BodyState::Compressed { writer } =
                        std::mem::replace(&mut this.state, BodyState::Done)
                    else {
                        unreachable!("matched above");
                    };
                    let mut sink = writer.close()?;
                    this.state = BodyState::Finishing {
                        tail: sink.take_data(),
                        trailers,
                    };
                }

                BodyState::Finishing { tail, trailers } => {
                    if let Some(data) = tail.take() {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                    let trailers = trailers.take();
                    this.state = BodyState::Done;
                    if let Some(trailers) = trailers {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                }

                BodyState::Done => return Poll::Ready(None),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.state {
            BodyState::Passthrough { replay, inner_done } => {
                replay.is_none() && (*inner_done || self.inner.is_end_stream())
            }
            BodyState::Done => true,
            _ => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match &self.state {
            BodyState::Passthrough { replay, inner_done } => {
                let hint = if *inner_done {
                    http_body::SizeHint::with_exact(0)
                } else {
                    self.inner.size_hint()
                };
                match replay {
                    None => hint,
                    Some(Ok(frame)) => match frame.data_ref() {
                        Some(data) => add_len(&hint, data.len() as u64),
                        None => hint,
                    },
                    Some(Err(_)) => http_body::SizeHint::default(),
                }
            }
            BodyState::Done => http_body::SizeHint::with_exact(0),
            // Compressed size is unknown
            _ => http_body::SizeHint::default(),
        }
    }
}

/// Grows a size hint by `len` bytes read ahead of the inner body.
fn add_len(hint: &http_body::SizeHint, len: u64) -> http_body::SizeHint {
    let mut grown = http_body::SizeHint::new();
    grown.set_lower(hint.lower().saturating_add(len));
    if let Some(upper) = hint.upper() {
        grown.set_upper(upper.saturating_add(len));
    }
    grown
}

impl<B> fmt::Debug for CompressionBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionBody")
            .field("compressed", &self.is_compressed())
            .finish_non_exhaustive()
    }
}
