//! Event types carried on the engine bus.
//!
//! Each bus message is a variant of [`EngineEvent`]; its [`EventKind`] is the
//! name handlers subscribe to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::artifact::{BuildResult, SubmissionResult, ZipResult};
use super::job::PollResult;
use super::state::{EngineState, Stage};

/// Name of a bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Tick,
    PromptWaiting,
    PromptReady,
    OutputReady,
    Zipped,
    Submitted,
    Error,
    Log,
    State,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tick => "tick",
            EventKind::PromptWaiting => "prompt_waiting",
            EventKind::PromptReady => "prompt_ready",
            EventKind::OutputReady => "output_ready",
            EventKind::Zipped => "zipped",
            EventKind::Submitted => "submitted",
            EventKind::Error => "error",
            EventKind::Log => "log",
            EventKind::State => "state",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the engine bus
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick(TickEvent),
    PromptWaiting(PollResult),
    PromptReady(PromptReadyEvent),
    OutputReady(BuildResult),
    Zipped(ZipResult),
    Submitted(SubmissionResult),
    Error(ErrorEvent),
    Log(LogEvent),
    State(EngineState),
}

impl EngineEvent {
    /// The name this event is dispatched under
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Tick(_) => EventKind::Tick,
            EngineEvent::PromptWaiting(_) => EventKind::PromptWaiting,
            EngineEvent::PromptReady(_) => EventKind::PromptReady,
            EngineEvent::OutputReady(_) => EventKind::OutputReady,
            EngineEvent::Zipped(_) => EventKind::Zipped,
            EngineEvent::Submitted(_) => EventKind::Submitted,
            EngineEvent::Error(_) => EventKind::Error,
            EngineEvent::Log(_) => EventKind::Log,
            EngineEvent::State(_) => EventKind::State,
        }
    }

    /// JSON payload as seen by external observers
    pub fn payload(&self) -> serde_json::Result<Value> {
        match self {
            EngineEvent::Tick(e) => serde_json::to_value(e),
            EngineEvent::PromptWaiting(e) => serde_json::to_value(e),
            EngineEvent::PromptReady(e) => serde_json::to_value(e),
            EngineEvent::OutputReady(e) => serde_json::to_value(e),
            EngineEvent::Zipped(e) => serde_json::to_value(e),
            EngineEvent::Submitted(e) => serde_json::to_value(e),
            EngineEvent::Error(e) => serde_json::to_value(e),
            EngineEvent::Log(e) => serde_json::to_value(e),
            EngineEvent::State(e) => serde_json::to_value(e),
        }
    }
}

/// Emitted after every completed poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickEvent {
    pub checked_at: DateTime<Utc>,
    pub next_delay_ms: u64,
}

/// A prompt is available for processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptReadyEvent {
    pub prompt: String,

    /// Owning marketplace job; `None` for manual injection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    pub raw: Value,
}

/// A failure, tagged with the stage it happened in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub stage: Stage,
    pub message: String,
}

/// Severity of a [`LogEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        };
        f.write_str(s)
    }
}

/// An immutable log line shown to observers.
///
/// Created once with a fresh id and timestamp; never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl LogEvent {
    /// Create a log line stamped now
    pub fn new(source: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
            meta: None,
        }
    }

    /// Attach structured metadata
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Mirror this line to `tracing` at the matching level
    pub fn trace(&self) {
        match self.level {
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(source = %self.source, level = %self.level, "{}", self.message)
            }
            LogLevel::Warn => tracing::warn!(source = %self.source, "{}", self.message),
            LogLevel::Error => tracing::error!(source = %self.source, "{}", self.message),
        }
    }
}
