//! The response channel seen by synchronous handlers.
//!
//! A [`ResponseWriter`] works under a write-once-commit model: headers may be
//! changed freely until [`write_status`](ResponseWriter::write_status) commits
//! them, and body bytes follow the commit. Optional capabilities are
//! discovered at runtime through the `*er` query methods, which return `None`
//! unless the channel really supports them.

use http::{HeaderMap, StatusCode};
use std::io;
use std::sync::mpsc;

/// An outgoing HTTP response.
pub trait ResponseWriter {
    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for modification.
    ///
    /// Changes made after the status is committed have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status line and headers.
    fn write_status(&mut self, status: StatusCode) -> io::Result<()>;

    /// Writes body bytes, committing a `200 OK` status first if needed.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes all of `buf`.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ));
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Returns the flush capability, if supported.
    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        None
    }

    /// Returns the connection takeover capability, if supported.
    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        None
    }

    /// Returns the server push capability, if supported.
    fn pusher(&mut self) -> Option<&mut dyn Push> {
        None
    }

    /// Returns the peer disconnect notification capability, if supported.
    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
        None
    }
}

/// Sends buffered response data to the client.
pub trait Flush {
    /// Flushes buffered data.
    fn flush(&mut self) -> io::Result<()>;
}

/// A raw connection taken over from the HTTP server.
pub trait Upgraded: io::Read + io::Write + Send {}

impl<T> Upgraded for T where T: io::Read + io::Write + Send {}

/// Takes over the underlying connection.
pub trait Hijack {
    /// Detaches the connection from the HTTP server.
    ///
    /// After a successful call the server no longer touches the connection
    /// and the response must not be written to.
    fn hijack(&mut self) -> io::Result<Box<dyn Upgraded>>;
}

/// Initiates an HTTP/2 server push.
pub trait Push {
    /// Pushes `target` using the given request headers.
    fn push(&mut self, target: &str, headers: &HeaderMap) -> io::Result<()>;
}

/// Reports when the client goes away.
pub trait CloseNotify {
    /// Returns a receiver that gets a message once the peer disconnects.
    fn close_notify(&mut self) -> mpsc::Receiver<()>;
}

impl<W> ResponseWriter for &mut W
where
    W: ResponseWriter + ?Sized,
{
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        (**self).write_status(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        (**self).flusher()
    }

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        (**self).hijacker()
    }

    fn pusher(&mut self) -> Option<&mut dyn Push> {
        (**self).pusher()
    }

    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
        (**self).close_notifier()
    }
}

#[cfg(test)]
pub(crate) use recorder::Recorder;

#[cfg(test)]
mod recorder {
    use super::*;
    use std::io::Cursor;

    /// In-memory response that records what reaches the client.
    #[derive(Debug, Default)]
    pub(crate) struct Recorder {
        pub headers: HeaderMap,
        /// Headers as they were when the status was committed.
        pub committed: Option<(StatusCode, HeaderMap)>,
        pub body: Vec<u8>,
        pub flushes: usize,
        pub pushes: Vec<String>,
        pub hijacked: bool,
        pub support_flush: bool,
        pub support_hijack: bool,
        pub support_push: bool,
        pub support_close_notify: bool,
        pub fail_writes: bool,
        /// Body length at each status commit attempt.
        pub status_writes: Vec<(StatusCode, usize)>,
    }

    impl Recorder {
        pub fn new() -> Self {
            Self::default()
        }

        /// A recorder supporting every optional capability.
        pub fn full() -> Self {
            Self {
                support_flush: true,
                support_hijack: true,
                support_push: true,
                support_close_notify: true,
                ..Self::default()
            }
        }

        pub fn status(&self) -> Option<StatusCode> {
            self.committed.as_ref().map(|(status, _)| *status)
        }

        pub fn committed_header(&self, name: &str) -> Option<&str> {
            self.committed
                .as_ref()
                .and_then(|(_, headers)| headers.get(name))
                .and_then(|v| v.to_str().ok())
        }
    }

    impl ResponseWriter for Recorder {
        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
            self.status_writes.push((status, self.body.len()));
            if self.committed.is_none() {
                self.committed = Some((status, self.headers.clone()));
            }
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
            }
            if self.committed.is_none() {
                self.write_status(StatusCode::OK)?;
            }
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flusher(&mut self) -> Option<&mut dyn Flush> {
            if self.support_flush { Some(self) } else { None }
        }

        fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
            if self.support_hijack { Some(self) } else { None }
        }

        fn pusher(&mut self) -> Option<&mut dyn Push> {
            if self.support_push { Some(self) } else { None }
        }

        fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
            if self.support_close_notify {
                Some(self)
            } else {
                None
            }
        }
    }

    impl Flush for Recorder {
        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    impl Hijack for Recorder {
        fn hijack(&mut self) -> io::Result<Box<dyn Upgraded>> {
            self.hijacked = true;
            Ok(Box::new(Cursor::new(Vec::new())))
        }
    }

    impl Push for Recorder {
        fn push(&mut self, target: &str, _headers: &HeaderMap) -> io::Result<()> {
            self.pushes.push(target.to_owned());
            Ok(())
        }
    }

    impl CloseNotify for Recorder {
        fn close_notify(&mut self) -> mpsc::Receiver<()> {
            let (tx, rx) = mpsc::channel();
            let _ = tx.send(());
            rx
        }
    }
}
