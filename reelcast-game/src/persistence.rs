//! Buffered, crash-safe persistence of the full engine state.
//!
//! The in-memory [`FullState`] is authoritative; storage is a lagging mirror
//! written on a timer or on shutdown using write-to-temp-then-rename.
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use twox_hash::XxHash64;

use crate::catch::Timestamp;
use crate::constants::{FLUSH_INTERVAL_MS, TEMP_FILE_EXTENSION};
use crate::legendary::LegendaryRecord;
use crate::state::{CommunityAggregate, CommunityId, PlayerId, PlayerState};

/// The single persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    #[serde(default)]
    pub players: BTreeMap<PlayerId, PlayerState>,
    #[serde(default)]
    pub communities: BTreeMap<CommunityId, BTreeMap<PlayerId, CommunityAggregate>>,
    #[serde(default)]
    pub legendary_records: Vec<LegendaryRecord>,
}

impl FullState {
    /// Canonical compact JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(self).map_err(PersistenceError::Serialize)
    }

    /// xxhash64 of the canonical encoding; equal states give equal digests.
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        match self.to_canonical_json() {
            Ok(bytes) => hasher.write(&bytes),
            Err(err) => error!("state digest could not encode state: {err}"),
        }
        hasher.finish()
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("stored state at {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable storage collaborator.
pub trait StateStorage: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the whole document; a missing document is an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data exists but cannot be read.
    fn load_all(&self) -> Result<FullState, Self::Error>;

    /// Replace the stored document with `bytes` so readers see either the old
    /// or the new document, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not complete.
    fn atomic_write(&self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// JSON file on local disk.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        self.path.with_extension(TEMP_FILE_EXTENSION)
    }
}

impl StateStorage for JsonFileStorage {
    type Error = PersistenceError;

    fn load_all(&self) -> Result<FullState, Self::Error> {
        if !self.path.exists() {
            info!("no state file at {}, starting empty", self.path.display());
            return Ok(FullState::default());
        }
        let bytes = fs::read(&self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn atomic_write(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        let tmp_path = self.temp_path();
        if tmp_path.exists() {
            fs::remove_file(&tmp_path).map_err(|e| PersistenceError::io(&tmp_path, e))?;
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let mut file = File::create(&tmp_path).map_err(|e| PersistenceError::io(&tmp_path, e))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        drop(file);
        fs::rename(&tmp_path, &self.path).map_err(|e| PersistenceError::io(&self.path, e))
    }
}

/// Storage kept in process memory, for simulations and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    document: Mutex<Option<Vec<u8>>>,
    writes: Mutex<u64>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed writes.
    #[must_use]
    pub fn writes(&self) -> u64 {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last written bytes, if any.
    #[must_use]
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateStorage for MemoryStorage {
    type Error = PersistenceError;

    fn load_all(&self) -> Result<FullState, Self::Error> {
        let document = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        match document.as_deref() {
            Some(bytes) => serde_json::from_slice(bytes).map_err(|source| PersistenceError::Corrupt {
                path: PathBuf::from("<memory>"),
                source,
            }),
            None => Ok(FullState::default()),
        }
    }

    fn atomic_write(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Serialize a snapshot and hand it to storage. Returns the snapshot digest.
///
/// # Errors
///
/// Returns the serialization or storage error.
pub fn write_snapshot<S>(storage: &S, state: &FullState) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>
where
    S: StateStorage + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(state).map_err(PersistenceError::Serialize)?;
    storage.atomic_write(&bytes)?;
    Ok(state.digest())
}

/// Dirty tracking by generation counter, so a flush that raced with newer
/// mutations does not mark them clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTracker {
    generation: u64,
    flushed_generation: u64,
    last_attempt_at: Timestamp,
    interval_ms: i64,
}

/// Generation captured when a flush snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTicket {
    generation: u64,
}

impl FlushTracker {
    #[must_use]
    pub const fn new(interval_ms: i64, now: Timestamp) -> Self {
        Self {
            generation: 0,
            flushed_generation: 0,
            last_attempt_at: now,
            interval_ms,
        }
    }

    pub const fn mark_dirty(&mut self) {
        self.generation = self.generation.saturating_add(1);
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.generation > self.flushed_generation
    }

    /// Dirty and more than one interval since the last attempt.
    #[must_use]
    pub const fn is_due(&self, now: Timestamp) -> bool {
        self.is_dirty() && now.saturating_sub(self.last_attempt_at) > self.interval_ms
    }

    #[must_use]
    pub const fn ticket(&self) -> FlushTicket {
        FlushTicket {
            generation: self.generation,
        }
    }

    pub const fn complete(&mut self, ticket: FlushTicket, now: Timestamp) {
        if ticket.generation > self.flushed_generation {
            self.flushed_generation = ticket.generation;
        }
        self.last_attempt_at = now;
    }

    /// Failed attempts stay dirty and retry on the next interval.
    pub const fn fail(&mut self, now: Timestamp) {
        self.last_attempt_at = now;
    }
}

impl Default for FlushTracker {
    fn default() -> Self {
        Self::new(FLUSH_INTERVAL_MS, 0)
    }
}

/// Result of a flush attempt that does not surface errors to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Skipped,
    Flushed { digest: u64 },
    Failed,
}

/// Owns the storage collaborator and the dirty tracker.
#[derive(Debug)]
pub struct PersistenceManager<S: StateStorage> {
    storage: Arc<S>,
    tracker: FlushTracker,
    consecutive_failures: u32,
}

impl<S: StateStorage> PersistenceManager<S> {
    #[must_use]
    pub fn new(storage: S, interval_ms: i64, now: Timestamp) -> Self {
        Self {
            storage: Arc::new(storage),
            tracker: FlushTracker::new(interval_ms, now),
            consecutive_failures: 0,
        }
    }

    /// Shared handle for writes performed off the owning thread.
    #[must_use]
    pub fn storage(&self) -> Arc<S> {
        Arc::clone(&self.storage)
    }

    #[must_use]
    pub const fn tracker(&self) -> &FlushTracker {
        &self.tracker
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub const fn mark_dirty(&mut self) {
        self.tracker.mark_dirty();
    }

    /// Flush when dirty and the interval has elapsed. Failures are logged and retried later.
    pub fn maybe_flush(&mut self, now: Timestamp, state: &FullState) -> FlushOutcome {
        if !self.tracker.is_due(now) {
            return FlushOutcome::Skipped;
        }
        let ticket = self.tracker.ticket();
        match write_snapshot(self.storage.as_ref(), state) {
            Ok(digest) => {
                self.complete(ticket, now, digest);
                FlushOutcome::Flushed { digest }
            }
            Err(err) => {
                self.fail(now, err.as_ref());
                FlushOutcome::Failed
            }
        }
    }

    /// Synchronous flush regardless of the interval. Clean state still writes.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the tracker stays dirty.
    pub fn force_flush(
        &mut self,
        now: Timestamp,
        state: &FullState,
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        let ticket = self.tracker.ticket();
        match write_snapshot(self.storage.as_ref(), state) {
            Ok(digest) => {
                self.complete(ticket, now, digest);
                Ok(digest)
            }
            Err(err) => {
                self.fail(now, err.as_ref());
                Err(err)
            }
        }
    }

    /// Capture the generation for an off-thread flush, if anything is dirty.
    #[must_use]
    pub const fn begin(&self) -> Option<FlushTicket> {
        if self.tracker.is_dirty() {
            Some(self.tracker.ticket())
        } else {
            None
        }
    }

    pub fn complete(&mut self, ticket: FlushTicket, now: Timestamp, digest: u64) {
        self.tracker.complete(ticket, now);
        if self.consecutive_failures > 0 {
            info!(
                "state flush recovered after {} failed attempts",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        debug!("state flushed (generation {}, digest {digest:016x})", ticket.generation);
    }

    pub fn fail(&mut self, now: Timestamp, err: &(dyn std::error::Error + Send + Sync)) {
        self.tracker.fail(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        error!(
            "state flush failed (attempt {}), will retry next interval: {err}",
            self.consecutive_failures
        );
    }
}
