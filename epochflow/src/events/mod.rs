//! Orchestrator events.
//!
//! The orchestrator reports lifecycle transitions to an [`EventSink`]
//! passed in at construction. There is no global sink.

mod event;
mod sink;

pub use event::OrchestratorEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
