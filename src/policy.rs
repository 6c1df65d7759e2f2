//! Deciding whether a response body is worth compressing.

use std::collections::HashSet;

/// Default minimum body size for compression.
///
/// A TCP packet is normally 1500 bytes long, so a response that already fits
/// into a single packet together with its headers gains nothing from gzip.
pub const DEFAULT_MIN_SIZE: usize = 1400;

/// Media types whose content is already compressed.
///
/// Only the most common official types are listed, plus the archive and font
/// types that [`detect_content_type`](crate::sniff::detect_content_type) can
/// report.
pub const DEFAULT_UNCOMPRESSIBLE_TYPES: &[&str] = &[
    "application/font-woff",
    "application/gzip",
    "application/ogg",
    "application/pdf",
    "application/x-7z-compressed",
    "application/x-bzip2",
    "application/x-gzip",
    "application/x-rar-compressed",
    "application/x-xz",
    "application/zip",
    "application/zstd",
    "audio/mp4",
    "audio/mpeg",
    "audio/webm",
    "font/woff",
    "font/woff2",
    "image/avif",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/webp",
    "video/avi",
    "video/h264",
    "video/mp4",
    "video/mpeg",
    "video/ogg",
    "video/vp8",
    "video/webm",
];

/// Decides whether a response body is worth compressing.
///
/// The check is a pure function of the body length and its media type, so it
/// can be tuned per middleware instance and exercised without any I/O.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    min_size: usize,
    uncompressible_types: HashSet<String>,
}

impl CompressionConfig {
    /// Creates a configuration with [`DEFAULT_MIN_SIZE`] and
    /// [`DEFAULT_UNCOMPRESSIBLE_TYPES`].
    pub fn new() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            uncompressible_types: DEFAULT_UNCOMPRESSIBLE_TYPES
                .iter()
                .map(|ty| (*ty).to_owned())
                .collect(),
        }
    }

    /// Sets the minimum body size required for compression.
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Replaces the denylist of already compressed media types.
    pub fn uncompressible_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.uncompressible_types = types
            .into_iter()
            .map(|ty| ty.as_ref().trim().to_ascii_lowercase())
            .collect();
        self
    }

    /// Adds a media type to the denylist.
    pub fn add_uncompressible_type(mut self, media_type: impl AsRef<str>) -> Self {
        self.uncompressible_types
            .insert(media_type.as_ref().trim().to_ascii_lowercase());
        self
    }

    /// Removes a media type from the denylist.
    pub fn remove_uncompressible_type(mut self, media_type: impl AsRef<str>) -> Self {
        self.uncompressible_types
            .remove(&media_type.as_ref().trim().to_ascii_lowercase());
        self
    }

    /// Returns the minimum body size required for compression.
    pub fn get_min_size(&self) -> usize {
        self.min_size
    }

    /// Returns true if `media_type` is on the denylist.
    ///
    /// Parameters such as `; charset=utf-8` are ignored and the comparison is
    /// case-insensitive.
    pub fn is_uncompressible(&self, media_type: &str) -> bool {
        let essence = essence(media_type);
        self.uncompressible_types
            .contains(essence.to_ascii_lowercase().as_str())
    }

    /// Returns whether a body of `content_length` bytes with the given
    /// `Content-Type` should be compressed.
    pub fn should_compress(&self, content_length: usize, content_type: &str) -> bool {
        if content_length < self.min_size {
            return false;
        }
        if essence(content_type).is_empty() {
            return false;
        }
        !self.is_uncompressible(content_type)
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips media type parameters: `text/html; charset=utf-8` -> `text/html`.
fn essence(media_type: &str) -> &str {
    media_type
        .split_once(';')
        .map_or(media_type, |(essence, _)| essence)
        .trim()
}
