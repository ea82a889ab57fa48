//! In-process artifact cache with per-fingerprint single-flight compilation.
//!
//! Each fingerprint owns a slot. The map lock is only held long enough to
//! find or create the slot, so different fingerprints compile in parallel
//! while requests for the same fingerprint queue behind one attempt.

use crate::artifact::{CompilationError, CompiledArtifact};
use crate::disk::DiskStore;
use crate::fingerprint::ArtifactFingerprint;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

#[derive(Default)]
struct SlotState {
    artifact: Option<Arc<CompiledArtifact>>,
    in_flight: bool,
    /// Number of finished attempts.
    attempts: u64,
    /// Failure of the most recent attempt, handed to callers that waited on it.
    last_failure: Option<CompilationError>,
    /// Callers blocked on the running attempt.
    waiting: usize,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    finished: Condvar,
}

/// Resets the slot if the compile closure unwinds, so waiters retry instead
/// of blocking forever.
struct InFlight<'a> {
    slot: &'a Slot,
    armed: bool,
}

impl InFlight<'_> {
    fn finish(mut self, outcome: &Result<Arc<CompiledArtifact>, CompilationError>) {
        self.armed = false;
        let mut state = lock(&self.slot.state);
        state.in_flight = false;
        state.attempts += 1;
        match outcome {
            Ok(artifact) => {
                state.artifact = Some(Arc::clone(artifact));
                state.last_failure = None;
            }
            Err(err) => state.last_failure = Some(err.clone()),
        }
        self.slot.finished.notify_all();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock(&self.slot.state);
            state.in_flight = false;
            state.attempts += 1;
            state.last_failure = None;
            self.slot.finished.notify_all();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fingerprints with a compiled artifact in memory.
    pub entries: usize,
    /// Times the compile closure was invoked.
    pub compilations: u64,
    /// Requests served from memory, including callers that waited on an
    /// in-flight compilation.
    pub hits: u64,
    /// Artifacts loaded from the disk tier instead of compiled.
    pub disk_hits: u64,
}

/// Unbounded artifact cache. Entries live as long as the cache; there is
/// no eviction.
#[derive(Default)]
pub struct ArtifactCache {
    slots: Mutex<HashMap<ArtifactFingerprint, Arc<Slot>>>,
    disk: Option<DiskStore>,
    compilations: AtomicU64,
    hits: AtomicU64,
    disk_hits: AtomicU64,
}

impl ArtifactCache {
    /// A fresh in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache backed by a directory of serialized artifacts. Misses consult
    /// the directory before compiling, and new artifacts are written to it.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            disk: Some(DiskStore::new(dir)),
            ..Self::default()
        }
    }

    /// The process-wide cache. Created on first use and kept for the
    /// lifetime of the process.
    pub fn global() -> Arc<ArtifactCache> {
        static GLOBAL: OnceLock<Arc<ArtifactCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ArtifactCache::new())))
    }

    pub fn disk(&self) -> Option<&DiskStore> {
        self.disk.as_ref()
    }

    /// Returns the artifact for `fingerprint`, running `compile` if no
    /// attempt has succeeded yet.
    ///
    /// Concurrent callers for the same fingerprint wait for the running
    /// attempt and receive its artifact or its error. Errors are not
    /// retained: once the failed attempt has been reported, the next call
    /// compiles again.
    pub fn get_or_compile<F>(
        &self,
        fingerprint: &ArtifactFingerprint,
        compile: F,
    ) -> Result<Arc<CompiledArtifact>, CompilationError>
    where
        F: FnOnce() -> Result<CompiledArtifact, CompilationError>,
    {
        let slot = self.slot(fingerprint);
        let mut state = lock(&slot.state);
        loop {
            if let Some(artifact) = &state.artifact {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.short(), "artifact cache hit");
                return Ok(Arc::clone(artifact));
            }
            if !state.in_flight {
                break;
            }
            let observed = state.attempts;
            debug!(fingerprint = %fingerprint.short(), "waiting on in-flight compilation");
            state.waiting += 1;
            while state.attempts == observed {
                state = slot
                    .finished
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.waiting -= 1;
            if state.artifact.is_none() {
                if let Some(err) = &state.last_failure {
                    return Err(err.clone());
                }
            }
        }
        state.in_flight = true;
        drop(state);

        let guard = InFlight {
            slot: &slot,
            armed: true,
        };
        let outcome = self.fill(fingerprint, compile).map(Arc::new);
        guard.finish(&outcome);
        outcome
    }

    /// Looks up a compiled artifact without compiling.
    pub fn get(&self, fingerprint: &ArtifactFingerprint) -> Option<Arc<CompiledArtifact>> {
        let slot = lock(&self.slots).get(fingerprint).cloned()?;
        let state = lock(&slot.state);
        state.artifact.clone()
    }

    #[cfg(test)]
    fn waiting(&self, fingerprint: &ArtifactFingerprint) -> usize {
        lock(&self.slots)
            .get(fingerprint)
            .map_or(0, |slot| lock(&slot.state).waiting)
    }

    pub fn contains(&self, fingerprint: &ArtifactFingerprint) -> bool {
        self.get(fingerprint).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let slots: Vec<Arc<Slot>> = lock(&self.slots).values().cloned().collect();
        let entries = slots
            .iter()
            .filter(|slot| lock(&slot.state).artifact.is_some())
            .count();
        CacheStats {
            entries,
            compilations: self.compilations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, fingerprint: &ArtifactFingerprint) -> Arc<Slot> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(*fingerprint).or_default())
    }

    fn fill<F>(
        &self,
        fingerprint: &ArtifactFingerprint,
        compile: F,
    ) -> Result<CompiledArtifact, CompilationError>
    where
        F: FnOnce() -> Result<CompiledArtifact, CompilationError>,
    {
        if let Some(disk) = &self.disk {
            match disk.load(fingerprint) {
                Ok(Some(artifact)) => {
                    self.disk_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint = %fingerprint.short(), "artifact loaded from disk");
                    return Ok(artifact);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(fingerprint = %fingerprint.short(), error = %err, "ignoring unreadable disk cache entry");
                }
            }
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        let artifact = compile()?;
        info!(
            kernel = artifact.kernel_name(),
            fingerprint = %fingerprint.short(),
            backend = %artifact.target().backend,
            bytes = artifact.size_bytes(),
            "compiled artifact"
        );

        if let Some(disk) = &self.disk {
            if let Err(err) = disk.store(&artifact) {
                warn!(fingerprint = %fingerprint.short(), error = %err, "failed to persist artifact");
            }
        }
        Ok(artifact)
    }
}
