//! Event sink trait and implementations.

use super::OrchestratorEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::Debug;
use tracing::{debug, info, warn, Level};

/// Receives orchestrator events.
#[async_trait]
pub trait EventSink: Send + Sync + Debug {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &OrchestratorEvent);

    /// Emits an event without blocking.
    ///
    /// Must never fail; sinks log and drop what they cannot deliver.
    fn try_emit(&self, event: &OrchestratorEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &OrchestratorEvent) {}

    fn try_emit(&self, _event: &OrchestratorEvent) {}
}

/// Logs events through `tracing`.
///
/// `epoch.failed` is always logged at WARN.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &OrchestratorEvent) {
        let event_type = event.event_type();
        let data = serde_json::to_value(event).unwrap_or_default();
        if matches!(event, OrchestratorEvent::EpochFailed { .. }) {
            warn!(event_type, event_data = %data["data"], "Event: {}", event_type);
        } else if self.level == Level::DEBUG {
            debug!(event_type, event_data = %data["data"], "Event: {}", event_type);
        } else {
            info!(event_type, event_data = %data["data"], "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &OrchestratorEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &OrchestratorEvent) {
        self.log_event(event);
    }
}

/// Keeps every event in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<OrchestratorEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<OrchestratorEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<OrchestratorEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the event types in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(OrchestratorEvent::event_type).collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &OrchestratorEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &OrchestratorEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochPhase;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        let event = OrchestratorEvent::EpochSkipped { epoch: 1 };
        NoOpEventSink.emit(&event).await;
        LoggingEventSink::default().emit(&event).await;
        LoggingEventSink::debug().try_emit(&OrchestratorEvent::EpochFailed {
            epoch: 2,
            phase: EpochPhase::Validating,
            reason: "orphans".into(),
        });
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());
        sink.emit(&OrchestratorEvent::EpochStarted {
            epoch: 1,
            run_id: "r".into(),
        })
        .await;
        sink.try_emit(&OrchestratorEvent::GovernorResized { previous: 2, size: 1 });
        sink.emit(&OrchestratorEvent::EpochSkipped { epoch: 2 }).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("epoch.").len(), 2);
        assert_eq!(
            sink.event_types(),
            vec!["epoch.started", "governor.resized", "epoch.skipped"]
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}
