//! Progress Reporting
//!
//! Turns engine events into caller-visible progress notifications.
//!
//! Delivery is one-way: the reporter hands each event to a [`ProgressSink`]
//! and moves on. Nothing is acknowledged, retried or buffered. Events leave
//! in the order they are raised because a single fetch reports from a single
//! task.

use serde::Serialize;
use std::sync::Arc;

/// Event raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Human-readable message only
    Plain { message: String },
    /// Message plus quantitative progress
    Detailed {
        message: String,
        progress: u64,
        total: u64,
        keep_alive: Option<bool>,
    },
}

impl ProgressEvent {
    pub fn detailed(message: impl Into<String>, progress: u64, total: u64) -> Self {
        Self::Detailed {
            message: message.into(),
            progress,
            total,
            keep_alive: None,
        }
    }

    pub fn keep_alive(message: impl Into<String>, progress: u64, total: u64) -> Self {
        Self::Detailed {
            message: message.into(),
            progress,
            total,
            keep_alive: Some(true),
        }
    }

    /// Wire form. Plain messages carry the 0/0 "no progress figures" sentinel.
    pub fn into_notification(self) -> ProgressNotification {
        match self {
            Self::Plain { message } => ProgressNotification {
                message,
                progress: 0,
                total: 0,
                keep_alive: None,
            },
            Self::Detailed {
                message,
                progress,
                total,
                keep_alive,
            } => ProgressNotification {
                message,
                progress,
                total,
                keep_alive,
            },
        }
    }
}

impl From<&str> for ProgressEvent {
    fn from(message: &str) -> Self {
        Self::Plain {
            message: message.to_string(),
        }
    }
}

impl From<String> for ProgressEvent {
    fn from(message: String) -> Self {
        Self::Plain { message }
    }
}

/// Payload of a progress notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    pub message: String,
    pub progress: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
}

/// Destination for progress notifications
pub trait ProgressSink: Send + Sync {
    /// Emit without waiting. Delivery failures are the sink's to swallow.
    fn emit(&self, notification: ProgressNotification);
}

/// Sink that drops everything
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _notification: ProgressNotification) {}
}

/// Per-call progress handle passed to the engine
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    /// Reporter that discards all events
    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Forward one event (plain string or structured update)
    pub fn report(&self, event: impl Into<ProgressEvent>) {
        let notification = event.into().into_notification();
        tracing::trace!(
            message = %notification.message,
            progress = notification.progress,
            total = notification.total,
            "progress"
        );
        self.sink.emit(notification);
    }
}
