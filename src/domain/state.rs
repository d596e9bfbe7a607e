//! Engine state and pipeline stages.
//!
//! The orchestrator owns the only mutable [`EngineState`]; everyone else gets
//! cloned snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named phase of the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Engine stopped, nothing scheduled
    Idle,

    /// Watcher polling the marketplace
    Watching,

    /// A prompt was accepted and a run is about to start
    PromptReceived,

    /// Brain is generating the artifact
    Generating,

    /// Builder is writing files
    Building,

    /// Packer is creating the archive
    Packing,

    /// Archive is being uploaded and submitted
    Submitting,

    /// Last run finished successfully
    Completed,

    /// Last run (or poll) failed
    Error,
}

impl Stage {
    /// Snake-case name, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Watching => "watching",
            Stage::PromptReceived => "prompt_received",
            Stage::Generating => "generating",
            Stage::Building => "building",
            Stage::Packing => "packing",
            Stage::Submitting => "submitting",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the engine, as served by `/state` and broadcast on every change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    /// Whether the engine accepts new jobs
    pub running: bool,

    /// Whether a pipeline run is in flight
    pub processing: bool,

    /// Current stage
    pub stage: Stage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submission_id: Option<String>,

    /// Latest error, formatted as `"<stage>: <message>"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
