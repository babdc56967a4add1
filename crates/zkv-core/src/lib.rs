pub mod config;
pub mod error;
pub mod types;

pub use error::{ZkvError, ZkvResult};
pub use types::{AccessLevel, ContentClass, DocumentId, DocumentSummary};

/// A resource holding key material or plaintext that the session guard can
/// destroy synchronously.
///
/// Implementations must be idempotent: the guard, the owning handle, and
/// `Drop` may all call `teardown` on the same resource.
pub trait Teardown: Send + Sync {
    /// Destroy the resource. Must not block on I/O or on a lock a reader
    /// of the resource may hold.
    fn teardown(&self);

    /// Short, non-secret label used in logs (e.g. `"dek"`, `"surface"`).
    fn label(&self) -> &'static str;
}
