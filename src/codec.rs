//! The gzip scheme: a reusable streaming encoder and `Accept-Encoding`
//! matching.

use crate::writer::ResponseWriter;
use compression_codecs::{EncodeV2, gzip::GzipEncoder};
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::fmt;
use std::io;

/// The `Content-Encoding` value announced for compressed responses.
pub const CONTENT_ENCODING: &str = "gzip";

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// A reusable streaming gzip compressor.
///
/// An encoder starts out unbound. [`reset`](Encoder::reset) starts a fresh
/// gzip member, after which compressed output is written straight into the
/// response passed to [`encode`](Encoder::encode), [`flush`](Encoder::flush)
/// and [`finish`](Encoder::finish). Finishing unbinds the encoder again, so it
/// can never terminate the same stream twice.
pub struct Encoder {
    codec: Option<GzipEncoder>,
    output_buffer: Vec<u8>,
}

impl Encoder {
    /// Creates an unbound encoder.
    pub fn new() -> Self {
        Self {
            codec: None,
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
        }
    }

    /// Starts a new compressed stream, discarding any previous state.
    pub fn reset(&mut self) {
        self.codec = Some(GzipEncoder::new(Level::Default.into()));
    }

    /// Drops the stream state without terminating it.
    pub fn unbind(&mut self) {
        self.codec = None;
    }

    /// Returns true between [`reset`](Encoder::reset) and
    /// [`finish`](Encoder::finish).
    pub fn is_bound(&self) -> bool {
        self.codec.is_some()
    }

    /// Compresses `input`, writing whatever output the codec produces to `out`.
    pub fn encode<W>(&mut self, input: &[u8], out: &mut W) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
    {
        let codec = self.codec.as_mut().ok_or_else(not_bound)?;
        let mut input_buf = PartialBuffer::new(input);

        // Keep encoding until all input is consumed
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let consumed = input_buf.written_len();

            codec
                .encode(&mut input_buf, &mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                out.write_all(&self.output_buffer[..written])?;
            }

            if input_buf.written_len() >= input.len() {
                break;
            }

            if written == 0 && input_buf.written_len() == consumed {
                return Err(io::Error::other("gzip encoder made no progress"));
            }
        }

        Ok(())
    }

    /// Writes out everything buffered inside the codec so the client can
    /// decode all input seen so far.
    pub fn flush<W>(&mut self, out: &mut W) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
    {
        let codec = self.codec.as_mut().ok_or_else(not_bound)?;

        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = codec.flush(&mut output).map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                out.write_all(&self.output_buffer[..written])?;
            }
            if done {
                return Ok(());
            }
        }
    }

    /// Terminates the stream with the gzip trailer and unbinds the encoder.
    pub fn finish<W>(&mut self, out: &mut W) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
    {
        let mut codec = self.codec.take().ok_or_else(not_bound)?;

        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = codec.finish(&mut output).map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                out.write_all(&self.output_buffer[..written])?;
            }
            if done {
                return Ok(());
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("bound", &self.is_bound())
            .finish()
    }
}

fn not_bound() -> io::Error {
    io::Error::other("gzip encoder is not bound to a response")
}

/// Returns true if an `Accept-Encoding` value admits gzip.
///
/// The header value is expected to be comma-separated encodings with optional
/// quality values (e.g., "gzip, br;q=1.0, zstd;q=0.8"). `gzip` and `x-gzip`
/// count unless their quality is zero.
pub fn accepts_gzip(header: &str) -> bool {
    header.split(',').any(|part| {
        let (encoding, quality) = parse_encoding_with_quality(part.trim());
        quality > 0.0
            && (encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip"))
    })
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            q.strip_prefix("q=")
                .or_else(|| q.strip_prefix("Q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
        })
        .unwrap_or(1.0);

    (encoding, quality)
}
