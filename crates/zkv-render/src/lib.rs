//! zkv-render: secure render sinks for decrypted document content
//!
//! Plaintext arrives one chunk at a time from a
//! [`PlaintextSource`](zkv_crypto::PlaintextSource) and is copied onto a
//! protected [`Surface`]. Two sinks exist, chosen once from the declared
//! MIME type:
//!
//! - raster (images, PDF): signature-checked, bounded by a page ceiling
//! - structured (text, JSON, XML): incrementally UTF-8 validated, control
//!   characters sanitized, line-indexed
//!
//! The resulting [`RenderHandle`] gives closure-scoped read access for
//! painting, returns noise from [`RenderHandle::export`], blocks extraction
//! interactions, and tears itself down on suspicious viewport changes.

mod buffer;
pub mod error;
pub mod handle;
pub mod marker;
pub mod protection;
mod raster;
pub mod sink;
pub mod surface;
mod text;

pub use error::{RenderError, RenderResult};
pub use handle::RenderHandle;
pub use marker::SessionMarker;
pub use protection::{InteractionKind, InteractionVerdict, Viewport, ViewportVerdict};
pub use sink::{consume, RenderOptions};
pub use surface::Surface;
