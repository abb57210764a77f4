//! A cache decorator that records writes.

use crate::error::CacheResult;
use crate::store::{CacheEvent, CacheSnapshot, CacheWrite, NormalizedCache};
use gqlsync_protocol::{GraphQLOperation, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Forwards every call to an inner cache and, while recording is on,
/// keeps a copy of each write.
///
/// Recording is an explicit flag rather than a mode on the inner cache,
/// so the wrapped store keeps its own semantics untouched.
pub struct RecordingCache {
    inner: Arc<dyn NormalizedCache>,
    recording: AtomicBool,
    recorded: Mutex<Vec<CacheWrite>>,
}

impl RecordingCache {
    /// Wraps a cache.
    pub fn new(inner: Arc<dyn NormalizedCache>) -> Self {
        Self {
            inner,
            recording: AtomicBool::new(false),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Starts recording writes, discarding anything recorded before.
    pub fn start_recording(&self) {
        self.recorded.lock().clear();
        self.recording.store(true, Ordering::SeqCst);
    }

    /// Stops recording. Already recorded writes are kept.
    pub fn stop_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    /// Returns true while recording.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Takes the recorded writes.
    pub fn take_recorded(&self) -> Vec<CacheWrite> {
        std::mem::take(&mut *self.recorded.lock())
    }

    /// Returns the wrapped cache.
    pub fn inner(&self) -> &Arc<dyn NormalizedCache> {
        &self.inner
    }
}

impl std::fmt::Debug for RecordingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingCache")
            .field("recording", &self.is_recording())
            .field("recorded", &self.recorded.lock().len())
            .finish()
    }
}

impl NormalizedCache for RecordingCache {
    fn read(&self, query: &GraphQLOperation) -> Option<Value> {
        self.inner.read(query)
    }

    fn write(&self, write: CacheWrite) -> CacheResult<()> {
        if self.is_recording() {
            self.recorded.lock().push(write.clone());
        }
        self.inner.write(write)
    }

    fn read_record(&self, key: &str) -> Option<Value> {
        self.inner.read_record(key)
    }

    fn extract(&self) -> CacheSnapshot {
        self.inner.extract()
    }

    fn restore(&self, snapshot: CacheSnapshot) {
        self.inner.restore(snapshot);
    }

    fn set_broadcast_suppressed(&self, suppressed: bool) {
        self.inner.set_broadcast_suppressed(suppressed);
    }

    fn broadcast(&self) {
        self.inner.broadcast();
    }

    fn watch(&self) -> Receiver<CacheEvent> {
        self.inner.watch()
    }
}
