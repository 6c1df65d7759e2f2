use crate::body::{CompressionBody, FrameSink};
use crate::handler::add_vary_accept_encoding;
use crate::interceptor::CompressWriter;
use crate::policy::CompressionConfig;
use crate::pool::EncoderPool;
use crate::writer::ResponseWriter;
use bytes::{Buf, Bytes};
use http::Response;
use http::response::Parts;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Future for compression service responses.
    ///
    /// When the request accepts gzip, the future resolves only once the first
    /// data frame of the inner body is available, because that frame decides
    /// the response headers.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        intercept: Option<Intercept>,
        peek: Option<Peek<B>>,
    }
}

/// What the service hands over for a request that accepts gzip.
#[derive(Debug, Clone)]
pub(crate) struct Intercept {
    pub(crate) config: Arc<CompressionConfig>,
    pub(crate) pool: Arc<EncoderPool>,
}

/// A response whose body is polled for its first data frame.
struct Peek<B> {
    parts: Parts,
    body: Pin<Box<B>>,
    writer: CompressWriter<FrameSink>,
}

/// The first frame of the inner body, with data copied into `Bytes`.
enum FirstFrame {
    Data(Bytes),
    Other(Frame<Bytes>),
    Error(io::Error),
    End,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, intercept: Option<Intercept>) -> Self {
        Self {
            inner,
            intercept,
            peek: None,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            if let Some(peek) = this.peek.as_mut() {
                let polled = ready!(peek.body.as_mut().poll_frame(cx));
                let first = FirstFrame::from_polled(polled);
                if matches!(&first, FirstFrame::Data(data) if data.is_empty()) {
                    // An empty frame is not a write.
                    continue;
                }

                let Some(peek) = this.peek.take() else {
                    unreachable!("peek is set");
                };
                return Poll::Ready(Ok(peek.finish(first)));
            }

            let response = ready!(this.inner.as_mut().poll(cx))?;
            let (mut parts, body) = response.into_parts();
            add_vary_accept_encoding(&mut parts.headers);

            match this.intercept.take() {
                None => {
                    let body = CompressionBody::passthrough(Box::pin(body));
                    return Poll::Ready(Ok(Response::from_parts(parts, body)));
                }
                Some(intercept) => *this.peek = Some(Peek::new(parts, body, intercept)),
            }
        }
    }
}

impl FirstFrame {
    fn from_polled<D, E>(polled: Option<Result<Frame<D>, E>>) -> Self
    where
        D: Buf,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match polled {
            Some(Ok(frame)) => match frame.into_data() {
                Ok(mut data) => FirstFrame::Data(data.copy_to_bytes(data.remaining())),
                Err(frame) => FirstFrame::Other(
                    frame.map_data(|mut data| data.copy_to_bytes(data.remaining())),
                ),
            },
            Some(Err(e)) => FirstFrame::Error(io::Error::other(e.into())),
            None => FirstFrame::End,
        }
    }
}

impl<B> Peek<B> {
    fn new(mut parts: Parts, body: B, intercept: Intercept) -> Self {
        let sink = FrameSink::new(std::mem::take(&mut parts.headers));
        let writer = CompressWriter::new(sink, intercept.pool.acquire(), intercept.config);

        Self {
            parts,
            body: Box::pin(body),
            writer,
        }
    }

    /// Runs the compression decision on the first frame and assembles the
    /// response head.
    fn finish(self, first: FirstFrame) -> Response<CompressionBody<B>> {
        let Self {
            mut parts,
            body,
            mut writer,
        } = self;

        // The service's status is held back like any status set before the
        // first write.
        let first = match writer.write_status(parts.status) {
            Ok(()) => first,
            Err(e) => FirstFrame::Error(e),
        };

        let (replay, inner_done) = match first {
            FirstFrame::Data(data) => {
                let written = writer.write_all(&data);
                if writer.is_compressing() {
                    set_head(&mut parts, writer.get_mut());
                    let body = match written {
                        Ok(()) => CompressionBody::compressed(body, writer),
                        Err(e) => CompressionBody::replaying(body, Some(Err(e)), true),
                    };
                    return Response::from_parts(parts, body);
                }
                (written.err().map(Err), false)
            }
            FirstFrame::Other(frame) => (Some(Ok(frame)), false),
            FirstFrame::Error(e) => (Some(Err(e)), true),
            FirstFrame::End => (None, true),
        };

        // Passing through: closing commits a status that no write committed,
        // and the first data frame waits in the sink.
        let replay = match writer.close() {
            Ok(mut sink) => {
                set_head(&mut parts, &mut sink);
                sink.take_data().map(|data| Ok(Frame::data(data))).or(replay)
            }
            Err(e) => Some(Err(e)),
        };
        Response::from_parts(parts, CompressionBody::replaying(body, replay, inner_done))
    }
}

/// Copies the committed status and the final headers into the response head.
fn set_head(parts: &mut Parts, sink: &mut FrameSink) {
    let (status, headers) = sink.take_head();
    if let Some(status) = status {
        parts.status = status;
    }
    parts.headers = headers;
}
