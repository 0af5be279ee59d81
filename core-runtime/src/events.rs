//! # Event Bus System
//!
//! Event-driven observability for the sync core using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Generators and workers publish typed summary events here so hosts can
//! surface sync activity (UI badges, metrics, audit trails) without being in
//! the data path. The work-flow hand-off to the dispatcher does **not** go
//! through this bus — that is the generator's dedicated NEW_WORKFLOW channel —
//! this bus only carries lightweight, serialisable descriptions of what
//! happened.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::StorageRegistered {
//!         storage_id: "ingest".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! The bus uses `tokio::sync::broadcast`, which surfaces two receiver errors:
//!
//! - `RecvError::Lagged(n)`: the subscriber missed `n` events. Non-fatal;
//!   the subscriber keeps receiving new events.
//! - `RecvError::Closed`: all senders dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall behind by more than this receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Generator and reconciliation events
    Sync(SyncEvent),
    /// Work-step execution events
    Worker(WorkerEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Worker(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Worker(WorkerEvent::StepFinished { status, .. }) if status == "error" => {
                EventSeverity::Error
            }
            CoreEvent::Sync(SyncEvent::WorkflowCreated { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::InitialScanCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Worker(WorkerEvent::StepFinished { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted by work-flow generators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A storage was registered and its event stream subscribed.
    StorageRegistered {
        /// The storage that came under management.
        storage_id: String,
    },
    /// Start-up reconciliation began for a storage.
    InitialScanStarted {
        /// The storage being reconciled.
        storage_id: String,
    },
    /// Start-up reconciliation finished for a storage.
    InitialScanCompleted {
        /// The storage that was reconciled.
        storage_id: String,
        /// Files enumerated on the storage during the scan.
        files_seen: u64,
        /// Tracked items found stale and swept into delete handling.
        stale_swept: u64,
    },
    /// A work-flow was produced and handed to the dispatcher channel.
    WorkflowCreated {
        /// The work-flow id (`<path>_<random>`).
        workflow_id: String,
        /// Source storage the triggering event came from.
        storage_id: String,
        /// Storage-relative path of the affected file.
        file: String,
        /// Number of steps in the flow.
        step_count: u32,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::StorageRegistered { .. } => "Storage registered",
            SyncEvent::InitialScanStarted { .. } => "Initial scan started",
            SyncEvent::InitialScanCompleted { .. } => "Initial scan completed",
            SyncEvent::WorkflowCreated { .. } => "Work-flow created",
        }
    }
}

// ============================================================================
// Worker Events
// ============================================================================

/// Events emitted by workers executing work-steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum WorkerEvent {
    /// A worker began executing a step.
    StepStarted {
        /// Step action, e.g. "copy".
        action: String,
        /// Storage-relative path of the step's file.
        file: String,
    },
    /// A worker finished executing a step.
    StepFinished {
        /// Step action, e.g. "copy".
        action: String,
        /// Storage-relative path of the step's file.
        file: String,
        /// Final status: "done", "error" or "skipped".
        status: String,
        /// Human-readable detail lines (error reasons, skip causes).
        messages: Vec<String>,
    },
}

impl WorkerEvent {
    fn description(&self) -> &str {
        match self {
            WorkerEvent::StepStarted { .. } => "Work-step started",
            WorkerEvent::StepFinished { .. } => "Work-step finished",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally: multiple producers (clone the
/// bus), multiple independent consumers (each `subscribe()`), non-blocking
/// sends and lag detection for slow subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when there are none. Emitting into an unobserved bus is not a fault;
    /// callers normally discard the result with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future
    /// events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// let event_bus = EventBus::new(100);
/// let worker_stream = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Worker(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter predicate; only matching events are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events, `RecvError::Closed` when all senders are gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
