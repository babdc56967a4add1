//! zkv-session: session lifetimes, document storage, and the vault API
//!
//! - [`guard`]: the process-wide [`SessionGuard`] registry and reaper
//! - [`store`]: OpenDAL-backed records and ciphertext blobs
//! - [`vault`]: `unlock_vault`, `open_preview`, `close_preview`, `lock_vault`
//!   and the supporting seal, list, and password-change operations

pub mod guard;
pub mod records;
pub mod store;
pub mod vault;

pub use guard::{GuardError, SessionGuard, SessionId, SessionKind, SessionState};
pub use records::{DocumentMetadata, VaultRecord};
pub use store::{DocumentStore, OpendalSource};
pub use vault::{Preview, Vault, VaultSession};
