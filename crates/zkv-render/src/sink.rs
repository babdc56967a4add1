//! Sink selection and the consume loop.

use tracing::{debug, warn};
use zkv_core::config::RenderConfig;
use zkv_core::ContentClass;
use zkv_crypto::PlaintextSource;

use crate::buffer::SecureBuffer;
use crate::error::{RenderError, RenderResult};
use crate::handle::RenderHandle;
use crate::marker::SessionMarker;
use crate::raster::{RasterFormat, RasterSink};
use crate::surface::{Layout, Surface};
use crate::text::TextSink;

/// Limits and switches for one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub max_pages: u32,
    pub page_bytes: u32,
    pub max_text_bytes: u64,
    pub viewport_delta_threshold: u32,
    pub embed_marker: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for RenderOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            page_bytes: config.page_bytes,
            max_text_bytes: config.max_text_bytes,
            viewport_delta_threshold: config.viewport_delta_threshold,
            embed_marker: config.embed_marker,
        }
    }
}

/// A render target fed one plaintext chunk at a time.
///
/// Implementations copy what they keep into a [`SecureBuffer`]; they never
/// retain the chunk slice itself.
pub(crate) trait RenderSink {
    /// Called once before the first chunk with the total plaintext length,
    /// if known. Sinks may reject oversized content here.
    fn begin(&mut self, size_hint: Option<u64>) -> RenderResult<()>;

    fn write(&mut self, chunk: &[u8]) -> RenderResult<()>;

    fn finish(self) -> RenderResult<(SecureBuffer, Layout)>;
}

/// Drain `source` into `sink`. Each chunk is dropped (and scrubbed) before
/// the next is pulled.
async fn drive<S: RenderSink, P: PlaintextSource>(
    mut sink: S,
    source: &mut P,
) -> RenderResult<(SecureBuffer, Layout)> {
    sink.begin(source.size_hint())?;
    while let Some(chunk) = source.next_chunk().await? {
        sink.write(&chunk)?;
    }
    sink.finish()
}

fn mime_essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Consume a plaintext sequence into a protected surface.
///
/// The content class is resolved once from `mime` and dispatched to exactly
/// one sink. On any failure the partial surface is dropped (and zeroed) and
/// the source is left in its failed or partially-read state; no plaintext is
/// returned to the caller.
pub async fn consume<P: PlaintextSource>(
    source: &mut P,
    mime: &str,
    options: &RenderOptions,
    marker: SessionMarker,
) -> RenderResult<RenderHandle> {
    let class =
        ContentClass::from_mime(mime).ok_or_else(|| RenderError::Unsupported(mime.to_string()))?;

    let result = match class {
        ContentClass::Raster => {
            let format = RasterFormat::from_mime(&mime_essence(mime))
                .ok_or_else(|| RenderError::Unsupported(mime.to_string()))?;
            drive(RasterSink::new(format, options), source).await
        }
        ContentClass::Structured => drive(TextSink::new(options.max_text_bytes), source).await,
    };

    let (backing, layout) = match result {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(mime, error = %e, "render failed");
            return Err(e);
        }
    };

    debug!(mime, class = %class, bytes = backing.len(), "render complete");
    let surface = Surface::new(class, backing, layout);
    Ok(RenderHandle::new(surface, mime.to_string(), options, marker))
}
