//! Session guard: the single registry bounding how long keys and rendered
//! plaintext stay resident.
//!
//! Every session moves `Active -> Expired -> TornDown`. Deadlines are
//! measured on the monotonic clock (`tokio::time::Instant`), so wall-clock
//! changes cannot stretch them. Expiry is detected lazily on the next
//! [`SessionGuard::check`] and eagerly by the reaper task; either way the
//! tracked resources are torn down while the registry lock is held, before
//! control returns to the caller.
//!
//! Sessions form a tree: previews are children of the vault session that
//! unlocked them, and expiring a parent expires its children.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;
use zkv_core::config::SessionConfig;
use zkv_core::{AccessLevel, Teardown, ZkvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// An unlocked vault holding the master key.
    Vault,
    /// One open document preview.
    Preview(AccessLevel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active { expires_at: Instant },
    Expired,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("session expired")]
    Expired,

    #[error("unknown session {0}")]
    Unknown(SessionId),
}

impl From<GuardError> for ZkvError {
    fn from(_: GuardError) -> Self {
        ZkvError::SessionExpired
    }
}

struct Entry {
    kind: SessionKind,
    parent: Option<SessionId>,
    ceiling_at: Instant,
    state: SessionState,
    resources: Vec<Arc<dyn Teardown>>,
}

type Registry = HashMap<SessionId, Entry>;

/// Process-wide session registry.
///
/// All registration and teardown is serialized through one mutex. Resource
/// teardown runs under that lock, so a [`Teardown`] implementation must not
/// call back into the guard or wait on a lock held by someone who might.
pub struct SessionGuard {
    limits: SessionConfig,
    sessions: Mutex<Registry>,
}

impl SessionGuard {
    pub fn new(limits: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            limits,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits_for(&self, kind: SessionKind) -> (Duration, Duration) {
        match kind {
            SessionKind::Vault => self.limits.vault_limits(),
            SessionKind::Preview(access) => self.limits.preview_limits(access),
        }
    }

    /// Register a new active session. A child session can only be started
    /// under an active parent.
    pub fn begin(
        &self,
        kind: SessionKind,
        parent: Option<SessionId>,
    ) -> Result<SessionId, GuardError> {
        let mut sessions = self.lock();
        let now = Instant::now();
        if let Some(parent) = parent {
            resolve(&mut sessions, parent, now)?;
        }

        let (ttl, ceiling) = self.limits_for(kind);
        let id = SessionId::new();
        sessions.insert(
            id,
            Entry {
                kind,
                parent,
                ceiling_at: now + ceiling,
                state: SessionState::Active {
                    expires_at: now + ttl,
                },
                resources: Vec::new(),
            },
        );
        debug!(session = %id, ?kind, ttl_secs = ttl.as_secs(), "session started");
        Ok(id)
    }

    /// Attach a resource to a session. If the session is no longer active the
    /// resource is torn down immediately and `Expired` is returned.
    pub fn track(&self, id: SessionId, resource: Arc<dyn Teardown>) -> Result<(), GuardError> {
        let mut sessions = self.lock();
        if let Err(e) = resolve(&mut sessions, id, Instant::now()) {
            resource.teardown();
            return Err(e);
        }
        if let Some(entry) = sessions.get_mut(&id) {
            debug!(session = %id, resource = resource.label(), "resource tracked");
            entry.resources.push(resource);
        }
        Ok(())
    }

    /// Confirm the session is active and return its deadline. A session past
    /// its deadline is expired and torn down before this returns.
    pub fn check(&self, id: SessionId) -> Result<Instant, GuardError> {
        let mut sessions = self.lock();
        resolve(&mut sessions, id, Instant::now())
    }

    /// Push the deadline out to `now + by`, capped at the hard ceiling fixed
    /// when the session began. Never shortens the deadline.
    pub fn extend(&self, id: SessionId, by: Duration) -> Result<Instant, GuardError> {
        let mut sessions = self.lock();
        let now = Instant::now();
        resolve(&mut sessions, id, now)?;

        let entry = sessions.get_mut(&id).ok_or(GuardError::Unknown(id))?;
        let SessionState::Active { expires_at } = &mut entry.state else {
            return Err(GuardError::Expired);
        };
        let target = (now + by).min(entry.ceiling_at);
        if target > *expires_at {
            *expires_at = target;
        }
        debug!(session = %id, "session extended");
        Ok(*expires_at)
    }

    /// Force a session (and its children) to expire now.
    pub fn expire(&self, id: SessionId) {
        let mut sessions = self.lock();
        expire_tree(&mut sessions, id, "forced");
    }

    /// Expire every active session.
    pub fn expire_all(&self) {
        let mut sessions = self.lock();
        let ids: Vec<SessionId> = sessions.keys().copied().collect();
        for id in ids {
            expire_tree(&mut sessions, id, "forced");
        }
    }

    /// Tear a session down and forget it. Children are torn down but stay
    /// registered (as `TornDown`) until their owners end them.
    pub fn end(&self, id: SessionId) {
        let mut sessions = self.lock();
        expire_tree(&mut sessions, id, "closed");
        sessions.remove(&id);
    }

    /// Expire every active session whose deadline has passed. Returns how
    /// many sessions were torn down.
    pub fn reap_expired(&self) -> usize {
        let mut sessions = self.lock();
        let now = Instant::now();
        let due: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, e)| {
                matches!(e.state, SessionState::Active { expires_at } if now >= expires_at)
            })
            .map(|(id, _)| *id)
            .collect();

        let before = active(&sessions);
        for id in due {
            expire_tree(&mut sessions, id, "deadline");
        }
        before - active(&sessions)
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.lock().get(&id).map(|e| e.state)
    }

    pub fn active_count(&self) -> usize {
        active(&self.lock())
    }

    /// Spawn a task that reaps expired sessions every `interval`, so
    /// deadlines are enforced even when nothing touches the session. The
    /// task stops once the guard is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let guard = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(guard) = guard.upgrade() else {
                    break;
                };
                let reaped = guard.reap_expired();
                if reaped > 0 {
                    debug!(reaped, "reaper expired sessions");
                }
            }
        })
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

fn active(sessions: &Registry) -> usize {
    sessions
        .values()
        .filter(|e| matches!(e.state, SessionState::Active { .. }))
        .count()
}

/// Check `id` and its ancestors against `now`, expiring whichever has run
/// out. Returns the session's own deadline.
fn resolve(sessions: &mut Registry, id: SessionId, now: Instant) -> Result<Instant, GuardError> {
    let entry = sessions.get(&id).ok_or(GuardError::Unknown(id))?;
    let parent = entry.parent;
    let state = entry.state;

    if let Some(parent) = parent {
        if resolve(sessions, parent, now).is_err() {
            // the parent's expiry has already cascaded here
            return Err(GuardError::Expired);
        }
    }

    match state {
        SessionState::Active { expires_at } if now < expires_at => Ok(expires_at),
        SessionState::Active { .. } => {
            expire_tree(sessions, id, "deadline");
            Err(GuardError::Expired)
        }
        SessionState::Expired | SessionState::TornDown => Err(GuardError::Expired),
    }
}

/// Expire `id` and every descendant, children first, running each
/// resource's teardown synchronously.
fn expire_tree(sessions: &mut Registry, id: SessionId, reason: &'static str) {
    let children: Vec<SessionId> = sessions
        .iter()
        .filter(|(_, e)| e.parent == Some(id))
        .map(|(child, _)| *child)
        .collect();
    for child in children {
        expire_tree(sessions, child, reason);
    }

    let Some(entry) = sessions.get_mut(&id) else {
        return;
    };
    if !matches!(entry.state, SessionState::Active { .. }) {
        return;
    }

    entry.state = SessionState::Expired;
    let resources = std::mem::take(&mut entry.resources);
    for resource in &resources {
        resource.teardown();
    }
    entry.state = SessionState::TornDown;
    info!(
        session = %id,
        kind = ?entry.kind,
        resources = resources.len(),
        reason,
        "session torn down"
    );
}
