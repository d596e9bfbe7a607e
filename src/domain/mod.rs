//! Domain types for the forge agent.
//!
//! This module contains the core data structures:
//! - State: Engine state snapshot and pipeline stages
//! - Events: Messages carried on the engine bus
//! - Artifact: Generated artifacts and per-stage results
//! - Job: Marketplace poll outcomes and uploads

pub mod artifact;
pub mod events;
pub mod job;
pub mod state;

// Re-export commonly used types
pub use artifact::{ArtifactFile, BuildArtifact, BuildResult, SubmissionResult, ZipResult};
pub use events::{
    EngineEvent, ErrorEvent, EventKind, LogEvent, LogLevel, PromptReadyEvent, TickEvent,
};
pub use job::{PollResult, Upload, UploadedFile};
pub use state::{EngineState, Stage};
