//! # Event Bus System
//!
//! Provides an event-driven architecture for the device scrobble engine using
//! `tokio::sync::broadcast`. Sessions, the orchestrator and the helper
//! coordinator publish typed events; hosts subscribe to drive busy
//! indicators, notifications and diagnostics.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Device(DeviceEvent::Queued {
//!         mount_path: "/media/IPOD".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! Emitting with no subscribers returns `Err`; emitters call `.ok()` so a
//! missing listener never fails a session. Subscribers should handle
//! `RecvError::Lagged` and treat `RecvError::Closed` as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError, TryRecvError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Device queue and session events
    Device(DeviceEvent),
    /// Out-of-process helper events
    Helper(HelperEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Device(e) => e.description(),
            CoreEvent::Helper(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Device(DeviceEvent::SessionFailed { .. }) => EventSeverity::Error,
            CoreEvent::Helper(HelperEvent::IncompatiblePlugin { .. }) => EventSeverity::Error,
            CoreEvent::Device(DeviceEvent::AnomalousBatch { .. }) => EventSeverity::Warning,
            CoreEvent::Device(DeviceEvent::WriteBackDisabled { .. }) => EventSeverity::Warning,
            CoreEvent::Device(DeviceEvent::ScrobblesFound { .. }) => EventSeverity::Info,
            CoreEvent::Device(DeviceEvent::NoScrobbles { .. }) => EventSeverity::Info,
            CoreEvent::Device(DeviceEvent::AwaitingConfirmation { .. }) => EventSeverity::Info,
            CoreEvent::Helper(HelperEvent::NoTracksFound) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Device Events
// ============================================================================

/// Events emitted by the device orchestrator and its sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DeviceEvent {
    /// A mount path was admitted to the pending queue.
    Queued { mount_path: String },
    /// A mount path was removed from consideration without a session.
    Dropped {
        mount_path: String,
        /// Why the entry was dropped (not a device, shutdown, ...).
        reason: String,
    },
    /// A device session began opening the device database.
    SessionStarted {
        session_id: String,
        mount_path: String,
    },
    /// The session is reading counters. Hosts show a busy indicator.
    CalculatingScrobbles { session_id: String },
    /// The session is suspended until the confirmation port answers.
    AwaitingConfirmation {
        session_id: String,
        /// Number of candidate plays shown to the user.
        candidates: u64,
    },
    /// Plays were handed to the scrobble sink.
    ScrobblesFound { session_id: String, count: u64 },
    /// No tracks to scrobble since the last sync.
    NoScrobbles { session_id: String },
    /// The device is missing a file needed to rewrite its database.
    /// The session continues read-only.
    WriteBackDisabled {
        session_id: String,
        generation: String,
        missing_file: String,
    },
    /// The candidate batch tripped the anomaly guard and was discarded.
    AnomalousBatch { session_id: String, count: u64 },
    /// The session terminated with an error.
    SessionFailed {
        session_id: String,
        /// Error category (`recoverable`, `device_fatal`, ...).
        kind: String,
        message: String,
    },
    /// Device handles were released.
    SessionClosed { session_id: String },
    /// The queue is empty and no session is active.
    AllDevicesSettled,
}

impl DeviceEvent {
    fn description(&self) -> &str {
        match self {
            DeviceEvent::Queued { .. } => "Device queued",
            DeviceEvent::Dropped { .. } => "Device dropped",
            DeviceEvent::SessionStarted { .. } => "Device session started",
            DeviceEvent::CalculatingScrobbles { .. } => "Calculating scrobbles",
            DeviceEvent::AwaitingConfirmation { .. } => "Waiting for scrobble confirmation",
            DeviceEvent::ScrobblesFound { .. } => "Scrobbles found",
            DeviceEvent::NoScrobbles { .. } => "No tracks to scrobble since your last sync.",
            DeviceEvent::WriteBackDisabled { .. } => "Device write-back disabled",
            DeviceEvent::AnomalousBatch { .. } => "Anomalous scrobble batch discarded",
            DeviceEvent::SessionFailed { .. } => "Device session failed",
            DeviceEvent::SessionClosed { .. } => "Device session closed",
            DeviceEvent::AllDevicesSettled => "All devices settled",
        }
    }
}

// ============================================================================
// Helper Events
// ============================================================================

/// Events driven by messages from the out-of-process helper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum HelperEvent {
    /// The helper started reading a device.
    Processing,
    /// The helper found nothing new.
    NoTracksFound,
    /// The helper wrote candidate files for a device.
    Completed { path: String },
    /// The media-manager plugin is too old to be used.
    IncompatiblePlugin { message: String },
    /// An attempt to start the helper finished with `result`.
    TwiddleRequested { result: String },
}

impl HelperEvent {
    fn description(&self) -> &str {
        match self {
            HelperEvent::Processing => "Helper processing device",
            HelperEvent::NoTracksFound => "Helper found no tracks",
            HelperEvent::Completed { .. } => "Helper completed",
            HelperEvent::IncompatiblePlugin { .. } => "Incompatible plugin",
            HelperEvent::TwiddleRequested { .. } => "Helper start requested",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by every emitter. Clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber; a subscriber that falls
    /// further behind gets `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber.
    ///
    /// Fails only when nobody is subscribed; emitters ignore that with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

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
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A subscription that skips events not matching a predicate.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let devices = EventStream::devices(bus.subscribe());
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only device queue and session events.
    pub fn devices(receiver: Receiver<CoreEvent>) -> Self {
        Self::new(receiver).filter(|event| matches!(event, CoreEvent::Device(_)))
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn wants(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` after falling `n` events behind, `RecvError::Closed`
    /// once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.wants(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event already buffered, if any.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.wants(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(path: &str) -> CoreEvent {
        CoreEvent::Device(DeviceEvent::Queued {
            mount_path: path.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(queued("/media/a")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Device(DeviceEvent::SessionStarted {
            session_id: "s-1".to_string(),
            mount_path: "/media/IPOD".to_string(),
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Helper(_)));

        bus.emit(queued("/media/a")).ok();
        let helper = CoreEvent::Helper(HelperEvent::Completed {
            path: "/media/IPOD".to_string(),
        });
        bus.emit(helper.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), helper);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(queued(&format!("/media/{}", i))).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
        // Still usable after lagging
        assert!(sub.recv().await.is_ok());
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Device(DeviceEvent::SessionFailed {
            session_id: "s".to_string(),
            kind: "device_fatal".to_string(),
            message: "The iPod database could not be opened.".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let degraded = CoreEvent::Device(DeviceEvent::WriteBackDisabled {
            session_id: "s".to_string(),
            generation: "Nano 5".to_string(),
            missing_file: "HashInfo".to_string(),
        });
        assert_eq!(degraded.severity(), EventSeverity::Warning);

        let none = CoreEvent::Device(DeviceEvent::NoScrobbles {
            session_id: "s".to_string(),
        });
        assert_eq!(none.severity(), EventSeverity::Info);
        assert_eq!(
            none.description(),
            "No tracks to scrobble since your last sync."
        );

        assert_eq!(
            CoreEvent::Device(DeviceEvent::AllDevicesSettled).severity(),
            EventSeverity::Debug
        );
        assert!(EventSeverity::Error > EventSeverity::Warning);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Device(DeviceEvent::ScrobblesFound {
            session_id: "s-1".to_string(),
            count: 3,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Device");
        assert_eq!(json["payload"]["event"], "ScrobblesFound");
        assert_eq!(json["payload"]["count"], 3);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_device_stream_try_recv() {
        let bus = EventBus::default();
        let mut stream = EventStream::devices(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(CoreEvent::Helper(HelperEvent::Processing)).ok();
        bus.emit(queued("/media/IPOD")).ok();
        assert_eq!(stream.try_recv().unwrap().unwrap(), queued("/media/IPOD"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let mut handles = Vec::new();
        for i in 0..5 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                bus.emit(queued(&format!("/media/{}", i))).ok();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = 0;
        while let Ok(event) = sub.try_recv() {
            assert!(matches!(event, CoreEvent::Device(DeviceEvent::Queued { .. })));
            received += 1;
        }
        assert_eq!(received, 5);
    }
}
