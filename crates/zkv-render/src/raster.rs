//! Raster/paginated sink: images and PDF painted onto a protected surface.

use tracing::debug;

use crate::buffer::SecureBuffer;
use crate::error::{RenderError, RenderResult};
use crate::sink::{RenderOptions, RenderSink};
use crate::surface::Layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RasterFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Pdf,
}

impl RasterFormat {
    pub(crate) fn from_mime(essence: &str) -> Option<Self> {
        match essence {
            "image/png" => Some(RasterFormat::Png),
            "image/jpeg" | "image/jpg" => Some(RasterFormat::Jpeg),
            "image/gif" => Some(RasterFormat::Gif),
            "image/webp" => Some(RasterFormat::Webp),
            "application/pdf" => Some(RasterFormat::Pdf),
            _ => None,
        }
    }

    /// Bytes needed before the signature can be checked.
    fn signature_len(self) -> usize {
        match self {
            RasterFormat::Png => 8,
            RasterFormat::Jpeg => 3,
            RasterFormat::Gif => 6,
            RasterFormat::Webp => 12,
            RasterFormat::Pdf => 5,
        }
    }

    fn signature_matches(self, head: &[u8]) -> bool {
        match self {
            RasterFormat::Png => head.starts_with(b"\x89PNG\r\n\x1a\n"),
            RasterFormat::Jpeg => head.starts_with(&[0xFF, 0xD8, 0xFF]),
            RasterFormat::Gif => head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a"),
            RasterFormat::Webp => {
                head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP"
            }
            RasterFormat::Pdf => head.starts_with(b"%PDF-"),
        }
    }
}

/// Accumulates raster bytes under a page ceiling of
/// `max_pages * page_bytes`.
pub(crate) struct RasterSink {
    format: RasterFormat,
    buffer: SecureBuffer,
    page_bytes: usize,
    max_pages: u32,
    max_bytes: u64,
    signature_checked: bool,
}

impl RasterSink {
    pub(crate) fn new(format: RasterFormat, options: &RenderOptions) -> Self {
        Self {
            format,
            buffer: SecureBuffer::with_capacity(0),
            page_bytes: options.page_bytes as usize,
            max_pages: options.max_pages,
            max_bytes: u64::from(options.max_pages) * u64::from(options.page_bytes),
            signature_checked: false,
        }
    }

    fn check_signature(&mut self) -> RenderResult<()> {
        if !self.format.signature_matches(self.buffer.as_slice()) {
            return Err(RenderError::Malformed(format!(
                "content does not look like {:?}",
                self.format
            )));
        }
        self.signature_checked = true;
        Ok(())
    }
}

impl RenderSink for RasterSink {
    fn begin(&mut self, size_hint: Option<u64>) -> RenderResult<()> {
        if let Some(len) = size_hint {
            if len > self.max_bytes {
                return Err(RenderError::PageLimit {
                    max_pages: self.max_pages,
                });
            }
            let capacity = usize::try_from(len).map_err(|_| RenderError::PageLimit {
                max_pages: self.max_pages,
            })?;
            self.buffer = SecureBuffer::with_capacity(capacity);
        }
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> RenderResult<()> {
        if (self.buffer.len() + chunk.len()) as u64 > self.max_bytes {
            return Err(RenderError::PageLimit {
                max_pages: self.max_pages,
            });
        }
        self.buffer.extend_from_slice(chunk);

        if !self.signature_checked && self.buffer.len() >= self.format.signature_len() {
            self.check_signature()?;
        }
        Ok(())
    }

    fn finish(mut self) -> RenderResult<(SecureBuffer, Layout)> {
        if !self.signature_checked {
            self.check_signature()?;
        }
        let pages = self.buffer.len().div_ceil(self.page_bytes);
        debug!(format = ?self.format, pages, "raster content painted");
        Ok((
            self.buffer,
            Layout::Raster {
                page_bytes: self.page_bytes,
                pages,
            },
        ))
    }
}
