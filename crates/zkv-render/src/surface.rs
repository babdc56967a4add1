//! Protected surface: the only place rendered plaintext lives.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::debug;
use zkv_core::{ContentClass, Teardown};

use crate::buffer::SecureBuffer;
use crate::error::{RenderError, RenderResult};

/// How the backing bytes are addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Layout {
    /// Fixed-size pages over the raster byte stream.
    Raster { page_bytes: usize, pages: usize },
    /// Sanitized UTF-8 with a line index.
    Text { lines: Vec<Range<usize>> },
}

struct SurfaceState {
    backing: SecureBuffer,
    layout: Layout,
    scrubbed: bool,
}

/// Backing store of a [`RenderHandle`](crate::RenderHandle).
///
/// Shared between the handle and the session guard. Access is closure-scoped
/// under the lock, so no reference to the plaintext escapes a call. Teardown
/// overwrites the backing with random bytes and is idempotent.
///
/// Teardown never waits on the lock: it marks the surface dead and scrambles
/// at once if the lock is free. Otherwise the reader holding it scrambles on
/// its way out. No access starts once the surface is dead.
pub struct Surface {
    class: ContentClass,
    live: AtomicBool,
    state: Mutex<SurfaceState>,
}

impl Surface {
    pub(crate) fn new(class: ContentClass, backing: SecureBuffer, layout: Layout) -> Arc<Self> {
        Arc::new(Self {
            class,
            live: AtomicBool::new(true),
            state: Mutex::new(SurfaceState {
                backing,
                layout,
                scrubbed: false,
            }),
        })
    }

    pub fn content_class(&self) -> ContentClass {
        self.class
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` over the live content and its layout. `f` runs under the
    /// surface lock and must not re-enter this surface.
    pub(crate) fn with_content<R>(&self, f: impl FnOnce(&[u8], &Layout) -> R) -> RenderResult<R> {
        let mut state = self.lock();
        if !self.is_live() {
            self.scramble(&mut state);
            return Err(RenderError::TornDown);
        }
        let out = f(state.backing.as_slice(), &state.layout);
        drop(state);

        // a teardown that found the lock held left the scramble to us
        if !self.is_live() {
            self.scramble(&mut self.lock());
        }
        Ok(out)
    }

    /// Scramble the backing and invalidate the surface. Returns `true` if this
    /// call performed the teardown.
    pub fn scrub(&self) -> bool {
        let first = self.live.swap(false, Ordering::SeqCst);
        match self.state.try_lock() {
            Ok(mut state) => self.scramble(&mut state),
            Err(TryLockError::Poisoned(poisoned)) => self.scramble(&mut poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                debug!(class = %self.class, "surface busy; scramble left to the reader")
            }
        }
        first
    }

    fn scramble(&self, state: &mut SurfaceState) {
        if state.scrubbed {
            return;
        }
        state.backing.scramble();
        state.layout = match state.layout {
            Layout::Raster { .. } => Layout::Raster {
                page_bytes: 0,
                pages: 0,
            },
            Layout::Text { .. } => Layout::Text { lines: Vec::new() },
        };
        state.scrubbed = true;
        debug!(class = %self.class, bytes = state.backing.len(), "surface torn down");
    }

    #[cfg(test)]
    pub(crate) fn backing_snapshot(&self) -> Vec<u8> {
        self.lock().backing.as_slice().to_vec()
    }
}

impl Teardown for Surface {
    fn teardown(&self) {
        self.scrub();
    }

    fn label(&self) -> &'static str {
        "surface"
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("class", &self.class)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_surface(content: &[u8]) -> Arc<Surface> {
        let mut backing = SecureBuffer::with_capacity(content.len());
        backing.extend_from_slice(content);
        Surface::new(
            ContentClass::Structured,
            backing,
            Layout::Text {
                lines: vec![0..content.len()],
            },
        )
    }

    #[test]
    fn test_scrub_removes_known_pattern() {
        let pattern = b"CANARY-PATTERN-".repeat(64);
        let surface = text_surface(&pattern);
        assert_eq!(surface.backing_snapshot(), pattern);

        assert!(surface.scrub());
        let after = surface.backing_snapshot();
        assert_eq!(after.len(), pattern.len());
        assert!(!after.windows(15).any(|w| w == b"CANARY-PATTERN-"));
    }

    #[test]
    fn test_scrub_during_read_does_not_block() {
        let pattern = b"CANARY-PATTERN-".repeat(8);
        let surface = text_surface(&pattern);

        let seen = surface
            .with_content(|bytes, _| {
                // the lock is held here; teardown must still return
                assert!(surface.scrub());
                assert!(!surface.is_live());
                bytes.len()
            })
            .unwrap();
        assert_eq!(seen, pattern.len());

        assert!(!surface
            .backing_snapshot()
            .windows(15)
            .any(|w| w == b"CANARY-PATTERN-"));
        assert!(matches!(
            surface.with_content(|_, _| ()),
            Err(RenderError::TornDown)
        ));
        assert!(!surface.scrub());
    }

    #[test]
    fn test_scrub_idempotent_and_blocks_access() {
        let surface = text_surface(b"hello");
        assert!(surface.with_content(|b, _| b.len()).is_ok());

        assert!(surface.scrub());
        assert!(!surface.scrub());
        surface.teardown();

        assert!(!surface.is_live());
        assert!(matches!(
            surface.with_content(|_, _| ()),
            Err(RenderError::TornDown)
        ));
    }
}
