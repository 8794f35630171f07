//! Stream Registry
//!
//! Process-wide registry of all streams: their desired/actual lifecycle
//! state, the generation token of the current connection attempt, the
//! pending outbound payload queue, and the bounded event buffer consumers
//! drain.
//!
//! # Design
//!
//! This is the synchronization point between concurrently running socket
//! loops, the supervisor, the keepalive service, and consumers. It is an
//! explicit shared object handed to each task by reference, guarded by one
//! coarse lock. The generation token has a single writer (the supervisor's
//! `next_generation`), and socket loops read it under the same lock, so a
//! loop observing a newer generation is guaranteed to have been superseded.
//!
//! Buffers are bounded rings: overflow drops the oldest event and counts
//! the drop, so a stalled consumer caps memory instead of growing it.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::domain::event::NormalizedEvent;
use crate::domain::session::ListenKeySession;
use crate::domain::stream::{
    ControlRequest, Generation, LifecycleState, StreamDescriptor, StreamId,
};

/// Default per-stream event buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

// =============================================================================
// Registry Entry
// =============================================================================

#[derive(Debug)]
struct StreamEntry {
    descriptor: StreamDescriptor,
    lifecycle: LifecycleState,
    generation: Generation,
    restart_requested: bool,
    crash_reason: Option<String>,
    payload_queue: VecDeque<ControlRequest>,
    buffer: VecDeque<NormalizedEvent>,
    dropped_events: u64,
    listen_key: Option<ListenKeySession>,
}

impl StreamEntry {
    fn new(descriptor: StreamDescriptor) -> Self {
        Self {
            descriptor,
            lifecycle: LifecycleState::Requested,
            generation: 0,
            restart_requested: false,
            crash_reason: None,
            payload_queue: VecDeque::new(),
            buffer: VecDeque::new(),
            dropped_events: 0,
            listen_key: None,
        }
    }
}

// =============================================================================
// Snapshots and Statistics
// =============================================================================

/// Point-in-time view of one stream, for health reporting.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    /// The stream id.
    pub stream_id: StreamId,
    /// Current lifecycle state.
    pub lifecycle: LifecycleState,
    /// Current generation token.
    pub generation: Generation,
    /// Events currently buffered.
    pub buffered_events: usize,
    /// Events dropped because the buffer was full.
    pub dropped_events: u64,
    /// Control messages waiting to be sent.
    pub pending_payloads: usize,
    /// Whether this is an authenticated user-data stream.
    pub is_user_data: bool,
    /// Why the stream crashed, if it did.
    pub crash_reason: Option<String>,
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Total registered streams.
    pub streams: usize,
    /// Streams currently running.
    pub running: usize,
    /// Streams currently crashed.
    pub crashed: usize,
    /// Events buffered across all streams.
    pub buffered_events: usize,
    /// Events dropped across all streams.
    pub dropped_events: u64,
}

// =============================================================================
// Stream Registry
// =============================================================================

/// Shared registry of all streams and their runtime state.
#[derive(Debug)]
pub struct StreamRegistry {
    inner: RwLock<HashMap<StreamId, StreamEntry>>,
    buffer_capacity: usize,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    /// Create a registry with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a registry with a custom per-stream buffer capacity.
    #[must_use]
    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Register a stream. The descriptor's id becomes the registry key.
    pub fn register(&self, descriptor: StreamDescriptor) -> StreamId {
        let stream_id = descriptor.stream_id;
        self.inner
            .write()
            .insert(stream_id, StreamEntry::new(descriptor));
        stream_id
    }

    /// Remove a stream and everything it buffered.
    pub fn remove(&self, stream_id: StreamId) -> bool {
        self.inner.write().remove(&stream_id).is_some()
    }

    /// Check whether a stream is registered.
    #[must_use]
    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.inner.read().contains_key(&stream_id)
    }

    /// Get a clone of the stream's descriptor.
    #[must_use]
    pub fn descriptor(&self, stream_id: StreamId) -> Option<StreamDescriptor> {
        self.inner
            .read()
            .get(&stream_id)
            .map(|e| e.descriptor.clone())
    }

    // =========================================================================
    // Lifecycle Flags
    // =========================================================================

    /// Get the stream's current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self, stream_id: StreamId) -> Option<LifecycleState> {
        self.inner.read().get(&stream_id).map(|e| e.lifecycle)
    }

    /// Check whether an intentional stop has been requested.
    #[must_use]
    pub fn is_stop_requested(&self, stream_id: StreamId) -> bool {
        self.inner.read().get(&stream_id).is_some_and(|e| {
            matches!(
                e.lifecycle,
                LifecycleState::StopRequested | LifecycleState::Stopped
            )
        })
    }

    /// Check whether a crash-and-restart has been requested.
    #[must_use]
    pub fn is_crash_requested(&self, stream_id: StreamId) -> bool {
        self.inner
            .read()
            .get(&stream_id)
            .is_some_and(|e| e.lifecycle == LifecycleState::CrashRequested)
    }

    /// Request an intentional stop.
    ///
    /// Returns `true` when this call caused the transition; a repeat call
    /// on a stream that is already stopping or stopped is a no-op.
    pub fn request_stop(&self, stream_id: StreamId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(&stream_id) else {
            return false;
        };
        if entry.lifecycle.is_stopping_or_stopped() {
            return false;
        }
        entry.lifecycle = LifecycleState::StopRequested;
        true
    }

    /// Request a forced crash-and-restart of the current connection.
    pub fn request_crash(&self, stream_id: StreamId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(&stream_id) else {
            return false;
        };
        if entry.lifecycle.is_stopping_or_stopped() {
            return false;
        }
        entry.lifecycle = LifecycleState::CrashRequested;
        true
    }

    /// Mark the stream's socket loop as connected and active.
    pub fn mark_running(&self, stream_id: StreamId) {
        if let Some(entry) = self.inner.write().get_mut(&stream_id) {
            entry.lifecycle = LifecycleState::Running;
            entry.crash_reason = None;
        }
    }

    /// Mark the stream as cleanly stopped.
    pub fn mark_stopped(&self, stream_id: StreamId) {
        if let Some(entry) = self.inner.write().get_mut(&stream_id) {
            entry.lifecycle = LifecycleState::Stopped;
        }
    }

    /// Mark the stream as crashed, recording the reason for diagnostics.
    pub fn mark_crashed(&self, stream_id: StreamId, reason: impl Into<String>) {
        if let Some(entry) = self.inner.write().get_mut(&stream_id) {
            entry.lifecycle = LifecycleState::Crashed;
            entry.crash_reason = Some(reason.into());
        }
    }

    /// Why the stream crashed, if it did.
    #[must_use]
    pub fn crash_reason(&self, stream_id: StreamId) -> Option<String> {
        self.inner
            .read()
            .get(&stream_id)
            .and_then(|e| e.crash_reason.clone())
    }

    // =========================================================================
    // Restart Requests
    // =========================================================================

    /// Flag the stream for a supervisor-driven restart.
    pub fn request_restart(&self, stream_id: StreamId) {
        if let Some(entry) = self.inner.write().get_mut(&stream_id) {
            entry.restart_requested = true;
        }
    }

    /// Check whether a restart is pending.
    #[must_use]
    pub fn restart_requested(&self, stream_id: StreamId) -> bool {
        self.inner
            .read()
            .get(&stream_id)
            .is_some_and(|e| e.restart_requested)
    }

    /// Consume a pending restart request, returning whether one was set.
    pub fn take_restart_request(&self, stream_id: StreamId) -> bool {
        let mut inner = self.inner.write();
        inner
            .get_mut(&stream_id)
            .is_some_and(|e| std::mem::take(&mut e.restart_requested))
    }

    // =========================================================================
    // Generation Tokens
    // =========================================================================

    /// The generation token of the current connection attempt.
    #[must_use]
    pub fn current_generation(&self, stream_id: StreamId) -> Option<Generation> {
        self.inner.read().get(&stream_id).map(|e| e.generation)
    }

    /// Advance to the next generation and return it.
    ///
    /// Single-writer: only the supervisor calls this, immediately before
    /// spawning a fresh socket loop. Any loop instance still holding the
    /// previous value will observe the mismatch at its next check and exit
    /// without side effects.
    pub fn next_generation(&self, stream_id: StreamId) -> Option<Generation> {
        let mut inner = self.inner.write();
        inner.get_mut(&stream_id).map(|e| {
            e.generation += 1;
            e.generation
        })
    }

    // =========================================================================
    // Outbound Payload Queue
    // =========================================================================

    /// Queue a control message for the stream's socket loop to send.
    pub fn enqueue_control(&self, stream_id: StreamId, request: ControlRequest) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(&stream_id) else {
            return false;
        };
        entry.payload_queue.push_back(request);
        true
    }

    /// Pop the next pending control message, FIFO.
    pub fn pop_next_payload(&self, stream_id: StreamId) -> Option<ControlRequest> {
        self.inner
            .write()
            .get_mut(&stream_id)
            .and_then(|e| e.payload_queue.pop_front())
    }

    /// Number of control messages waiting to be sent.
    #[must_use]
    pub fn pending_payloads(&self, stream_id: StreamId) -> usize {
        self.inner
            .read()
            .get(&stream_id)
            .map_or(0, |e| e.payload_queue.len())
    }

    // =========================================================================
    // Event Buffer
    // =========================================================================

    /// Append an event to the stream's buffer.
    ///
    /// The buffer is a bounded ring: when full, the oldest event is dropped
    /// and counted. Returns `false` when the stream is not registered.
    pub fn push_event(&self, stream_id: StreamId, event: NormalizedEvent) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(&stream_id) else {
            return false;
        };
        if entry.buffer.len() >= self.buffer_capacity {
            entry.buffer.pop_front();
            entry.dropped_events += 1;
        }
        entry.buffer.push_back(event);
        true
    }

    /// Drain up to `max` buffered events, oldest first.
    pub fn drain_events(&self, stream_id: StreamId, max: usize) -> Vec<NormalizedEvent> {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(&stream_id) else {
            return vec![];
        };
        let take = max.min(entry.buffer.len());
        entry.buffer.drain(..take).collect()
    }

    /// Number of events currently buffered for the stream.
    #[must_use]
    pub fn buffered_events(&self, stream_id: StreamId) -> usize {
        self.inner
            .read()
            .get(&stream_id)
            .map_or(0, |e| e.buffer.len())
    }

    // =========================================================================
    // Listen-Key Sessions
    // =========================================================================

    /// Attach a listen-key session to a user-data stream.
    pub fn set_listen_key(&self, stream_id: StreamId, session: ListenKeySession) {
        if let Some(entry) = self.inner.write().get_mut(&stream_id) {
            entry.listen_key = Some(session);
        }
    }

    /// Get a clone of the stream's listen-key session.
    #[must_use]
    pub fn listen_key(&self, stream_id: StreamId) -> Option<ListenKeySession> {
        self.inner
            .read()
            .get(&stream_id)
            .and_then(|e| e.listen_key.clone())
    }

    /// Detach and return the stream's listen-key session.
    ///
    /// Used on intentional stop so the key is revoked exactly once: a
    /// second stop request finds nothing to delete.
    pub fn take_listen_key(&self, stream_id: StreamId) -> Option<ListenKeySession> {
        self.inner
            .write()
            .get_mut(&stream_id)
            .and_then(|e| e.listen_key.take())
    }

    /// Record a successful keepalive on the stream's session.
    pub fn touch_listen_key(&self, stream_id: StreamId) -> bool {
        let mut inner = self.inner.write();
        inner
            .get_mut(&stream_id)
            .and_then(|e| e.listen_key.as_mut())
            .map(ListenKeySession::touch)
            .is_some()
    }

    /// Ids of all registered user-data streams.
    #[must_use]
    pub fn user_data_streams(&self) -> Vec<StreamId> {
        self.inner
            .read()
            .iter()
            .filter(|(_, e)| e.descriptor.is_user_data())
            .map(|(id, _)| *id)
            .collect()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Point-in-time view of every stream, for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StreamSnapshot> {
        let inner = self.inner.read();
        let mut streams: Vec<_> = inner
            .iter()
            .map(|(id, e)| StreamSnapshot {
                stream_id: *id,
                lifecycle: e.lifecycle,
                generation: e.generation,
                buffered_events: e.buffer.len(),
                dropped_events: e.dropped_events,
                pending_payloads: e.payload_queue.len(),
                is_user_data: e.descriptor.is_user_data(),
                crash_reason: e.crash_reason.clone(),
            })
            .collect();
        streams.sort_by_key(|s| s.stream_id);
        streams
    }

    /// Aggregate statistics across all streams.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        let mut stats = RegistryStats {
            streams: inner.len(),
            ..RegistryStats::default()
        };
        for entry in inner.values() {
            match entry.lifecycle {
                LifecycleState::Running => stats.running += 1,
                LifecycleState::Crashed => stats.crashed += 1,
                _ => {}
            }
            stats.buffered_events += entry.buffer.len();
            stats.dropped_events += entry.dropped_events;
        }
        stats
    }
}
