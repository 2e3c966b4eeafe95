//! In-process registry of open multipart upload sessions.
//!
//! Sessions live in a sharded concurrent map keyed by upload id. Every
//! mutation of one session happens under that key's shard lock, and no lock
//! is ever held across an `.await`.
//!
//! Nothing here is durable: a restart forgets every open session, and the
//! registry never evicts on its own. Abandoned sessions are found with
//! [`SessionRegistry::stale`] and closed by whoever runs the reaper.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::models::multipart::UploadSession;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("upload session `{0}` not found")]
    NotFound(String),
    #[error("upload session `{0}` is already registered")]
    AlreadyExists(String),
    #[error("session registry is full ({0} sessions)")]
    Full(usize),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Lifecycle of a registered session.
///
/// `Finalizing` is entered when complete or abort starts talking to the
/// store. A finalizing session is invisible to `get`, `append_part` and a
/// second `begin_finalize`, which all report `NotFound`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Finalizing,
}

#[derive(Debug)]
struct Slot {
    session: UploadSession,
    state: SessionState,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Slot>,
    max_sessions: usize,
    /// Registered sessions plus outstanding reservations.
    occupied: AtomicUsize,
}

/// Capacity held for a session that is still being opened in the store.
///
/// Dropping it without calling [`SessionReservation::commit`] releases the
/// slot.
#[derive(Debug)]
pub struct SessionReservation<'a> {
    registry: &'a SessionRegistry,
    committed: bool,
}

impl SessionReservation<'_> {
    /// Register the session. On success it is immediately visible to `get`
    /// and `append_part`.
    pub fn commit(mut self, session: UploadSession) -> RegistryResult<()> {
        match self.registry.sessions.entry(session.upload_id.clone()) {
            Entry::Occupied(occupied) => Err(RegistryError::AlreadyExists(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    session,
                    state: SessionState::Open,
                });
                self.committed = true;
                Ok(())
            }
        }
    }
}

impl Drop for SessionReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.occupied.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            occupied: AtomicUsize::new(0),
        }
    }

    /// Claim capacity for one more session, failing when the registry is
    /// at `max_sessions`.
    pub fn reserve(&self) -> RegistryResult<SessionReservation<'_>> {
        let mut current = self.occupied.load(Ordering::Acquire);
        loop {
            if current >= self.max_sessions {
                return Err(RegistryError::Full(self.max_sessions));
            }
            match self.occupied.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(SessionReservation {
                        registry: self,
                        committed: false,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Reserve and register in one step.
    #[cfg(test)]
    pub fn create(&self, session: UploadSession) -> RegistryResult<()> {
        self.reserve()?.commit(session)
    }

    /// Snapshot of an open session.
    pub fn get(&self, upload_id: &str) -> RegistryResult<UploadSession> {
        match self.sessions.get(upload_id) {
            Some(slot) if slot.state == SessionState::Open => Ok(slot.session.clone()),
            _ => Err(not_found(upload_id)),
        }
    }

    /// Record an uploaded part. Returns the etag it replaced when the part
    /// number was uploaded before.
    pub fn append_part(
        &self,
        upload_id: &str,
        part_number: u32,
        etag: impl Into<String>,
    ) -> RegistryResult<Option<String>> {
        match self.sessions.get_mut(upload_id) {
            Some(mut slot) if slot.state == SessionState::Open => {
                Ok(slot.session.parts.insert(part_number, etag))
            }
            _ => Err(not_found(upload_id)),
        }
    }

    /// Freeze an open session for completion or abort and return the
    /// snapshot to finalize. The part list cannot change after this.
    pub fn begin_finalize(&self, upload_id: &str) -> RegistryResult<UploadSession> {
        match self.sessions.get_mut(upload_id) {
            Some(mut slot) if slot.state == SessionState::Open => {
                slot.state = SessionState::Finalizing;
                Ok(slot.session.clone())
            }
            _ => Err(not_found(upload_id)),
        }
    }

    /// Return a finalizing session to `Open` after the store refused to
    /// finalize it.
    pub fn reopen(&self, upload_id: &str) -> RegistryResult<()> {
        match self.sessions.get_mut(upload_id) {
            Some(mut slot) => {
                slot.state = SessionState::Open;
                Ok(())
            }
            None => Err(not_found(upload_id)),
        }
    }

    /// Drop a session for good.
    pub fn remove(&self, upload_id: &str) -> RegistryResult<UploadSession> {
        match self.sessions.remove(upload_id) {
            Some((_, slot)) => {
                self.occupied.fetch_sub(1, Ordering::AcqRel);
                Ok(slot.session)
            }
            None => Err(not_found(upload_id)),
        }
    }

    #[cfg(test)]
    pub fn state(&self, upload_id: &str) -> Option<SessionState> {
        self.sessions.get(upload_id).map(|slot| slot.state)
    }

    /// Number of registered sessions, open or finalizing.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Upload ids of open sessions initiated before `cutoff`.
    pub fn stale(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|slot| slot.state == SessionState::Open && slot.session.initiated_at < cutoff)
            .map(|slot| slot.key().clone())
            .collect()
    }
}

fn not_found(upload_id: &str) -> RegistryError {
    RegistryError::NotFound(upload_id.to_string())
}
