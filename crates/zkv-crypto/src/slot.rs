//! Revocable holder for key material shared with the session guard.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use zkv_core::Teardown;

use crate::error::{CryptoError, CryptoResult};

/// A shared, revocable slot owning a secret value.
///
/// The owner (e.g. a [`DecryptSession`](crate::DecryptSession)) borrows the
/// secret through [`SecretSlot::with`]; the session guard holds another
/// `Arc` and can [`revoke`](SecretSlot::revoke) it at any time. Revocation
/// drops the value, which zeroizes it, and every later access fails with
/// [`CryptoError::Revoked`].
pub struct SecretSlot<T: Send> {
    label: &'static str,
    inner: Mutex<Option<T>>,
}

impl<T: Send> SecretSlot<T> {
    pub fn new(label: &'static str, value: T) -> Arc<Self> {
        Arc::new(Self {
            label,
            inner: Mutex::new(Some(value)),
        })
    }

    /// Run `f` against the secret while holding the slot lock.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> CryptoResult<R> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(value) => Ok(f(value)),
            None => Err(CryptoError::Revoked),
        }
    }

    /// Swap in a new secret, dropping the old one. Fails with
    /// [`CryptoError::Revoked`] if the slot has been torn down.
    pub fn replace(&self, value: T) -> CryptoResult<()> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(current) => {
                *current = value;
                Ok(())
            }
            None => Err(CryptoError::Revoked),
        }
    }

    /// Move the secret out, leaving the slot revoked.
    pub fn take(&self) -> CryptoResult<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CryptoError::Revoked)
    }

    /// Destroy the secret. Returns `true` if this call performed the
    /// revocation, `false` if it was already gone.
    pub fn revoke(&self) -> bool {
        let taken = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let revoked = taken.is_some();
        drop(taken);
        if revoked {
            debug!(slot = self.label, "secret revoked");
        }
        revoked
    }

    pub fn is_revoked(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T: Send> Teardown for SecretSlot<T> {
    fn teardown(&self) {
        self.revoke();
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

impl<T: Send> std::fmt::Debug for SecretSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSlot")
            .field("label", &self.label)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}
