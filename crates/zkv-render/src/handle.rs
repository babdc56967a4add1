use std::sync::Arc;

use rand::RngCore;
use tracing::{info, warn};
use zkv_core::{ContentClass, Teardown};

use crate::error::{RenderError, RenderResult};
use crate::marker::{SessionMarker, MARKER_BITS};
use crate::protection::{
    interaction_verdict, viewport_suspicious, InteractionKind, InteractionVerdict, Viewport,
    ViewportVerdict,
};
use crate::sink::RenderOptions;
use crate::surface::{Layout, Surface};

/// Handle to rendered content.
///
/// The content is reachable only through the closure-scoped accessors
/// (`with_bytes`, `with_text`, `with_page`), which the embedding UI uses to
/// paint. [`RenderHandle::export`] is the extraction primitive and returns
/// noise. Dropping the handle tears the surface down.
pub struct RenderHandle {
    surface: Arc<Surface>,
    mime: String,
    marker: SessionMarker,
    embed_marker: bool,
    viewport_delta_threshold: u32,
}

impl RenderHandle {
    pub(crate) fn new(
        surface: Arc<Surface>,
        mime: String,
        options: &RenderOptions,
        marker: SessionMarker,
    ) -> Self {
        Self {
            surface,
            mime,
            marker,
            embed_marker: options.embed_marker,
            viewport_delta_threshold: options.viewport_delta_threshold,
        }
    }

    /// Teardown capability for the session guard.
    pub fn teardown_handle(&self) -> Arc<dyn Teardown> {
        self.surface.clone()
    }

    pub fn content_class(&self) -> ContentClass {
        self.surface.content_class()
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn marker(&self) -> SessionMarker {
        self.marker
    }

    pub fn is_live(&self) -> bool {
        self.surface.is_live()
    }

    /// Run `f` over the rendered bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> RenderResult<R> {
        self.surface.with_content(|bytes, _| f(bytes))
    }

    /// Run `f` over the sanitized text. Structured content only.
    pub fn with_text<R>(&self, f: impl FnOnce(&str) -> R) -> RenderResult<R> {
        self.surface.with_content(|bytes, layout| match layout {
            Layout::Text { .. } => std::str::from_utf8(bytes)
                .map(f)
                .map_err(|e| RenderError::Malformed(e.to_string())),
            Layout::Raster { .. } => Err(RenderError::Unsupported(
                "text view of raster content".into(),
            )),
        })?
    }

    /// Run `f` over line `index` of structured content.
    pub fn with_line<R>(&self, index: usize, f: impl FnOnce(&str) -> R) -> RenderResult<R> {
        self.surface.with_content(|bytes, layout| {
            let Layout::Text { lines } = layout else {
                return Err(RenderError::Unsupported("line view of raster content".into()));
            };
            let range = lines
                .get(index)
                .cloned()
                .ok_or_else(|| RenderError::Malformed(format!("no line {index}")))?;
            std::str::from_utf8(&bytes[range])
                .map(f)
                .map_err(|e| RenderError::Malformed(e.to_string()))
        })?
    }

    /// Run `f` over page `index` of raster content.
    pub fn with_page<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> RenderResult<R> {
        self.surface.with_content(|bytes, layout| {
            let Layout::Raster { page_bytes, pages } = *layout else {
                return Err(RenderError::Unsupported("page view of text content".into()));
            };
            if index >= pages {
                return Err(RenderError::Malformed(format!(
                    "page {index} out of range (0..{pages})"
                )));
            }
            let start = index * page_bytes;
            let end = (start + page_bytes).min(bytes.len());
            Ok(f(&bytes[start..end]))
        })?
    }

    /// Pages for raster content, lines for structured content.
    pub fn page_count(&self) -> RenderResult<usize> {
        self.surface.with_content(|_, layout| match layout {
            Layout::Raster { pages, .. } => *pages,
            Layout::Text { lines } => lines.len(),
        })
    }

    /// Extraction primitive. Returns random bytes of at least the content's
    /// length, never the content. When enabled, the session marker is carried
    /// in the low bits so leaked exports can be traced.
    pub fn export(&self) -> RenderResult<Vec<u8>> {
        let len = self.with_bytes(|bytes| bytes.len())?;
        let mut out = vec![0u8; len.max(MARKER_BITS)];
        rand::thread_rng().fill_bytes(&mut out);
        if self.embed_marker {
            self.marker.embed(&mut out);
        }
        warn!(marker = %self.marker, "export requested; returning noise");
        Ok(out)
    }

    /// Report a UI interaction. Extraction-capable interactions are blocked.
    pub fn handle_interaction(&self, kind: InteractionKind) -> InteractionVerdict {
        let verdict = interaction_verdict(kind);
        warn!(interaction = %kind, marker = %self.marker, "interaction blocked");
        verdict
    }

    /// Report window and viewport dimensions. A delta above the configured
    /// threshold tears the surface down.
    pub fn observe_viewport(&self, viewport: Viewport) -> ViewportVerdict {
        if viewport_suspicious(&viewport, self.viewport_delta_threshold) {
            if self.surface.scrub() {
                info!(
                    delta = viewport.delta(),
                    threshold = self.viewport_delta_threshold,
                    "inspection tooling suspected; surface torn down"
                );
            }
            return ViewportVerdict::TornDown;
        }
        ViewportVerdict::Normal
    }

    /// Scramble the backing and invalidate the handle. Idempotent.
    pub fn teardown(&self) {
        self.surface.scrub();
    }

    #[cfg(test)]
    pub(crate) fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.surface.scrub();
    }
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle")
            .field("mime", &self.mime)
            .field("class", &self.content_class())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
