//! Core engine logic.
//!
//! This module contains:
//! - EventBus: In-process publish/subscribe
//! - Lookup: Recursive prompt search over JSON trees
//! - Safety: Output path sandboxing and artifact limits
//! - Builder: Writes artifacts into the output directory
//! - Packer: Archives output and submits it
//! - Watcher: Jittered marketplace polling
//! - Orchestrator: The engine state machine

pub mod builder;
pub mod event_bus;
pub mod lookup;
pub mod orchestrator;
pub mod packer;
pub mod safety;
pub mod watcher;

// Re-export commonly used types
pub use builder::{BuildError, Builder};
pub use event_bus::{EventBus, Subscription};
pub use lookup::{deep_find_prompt, deep_find_string};
pub use orchestrator::{Orchestrator, StageError};
pub use packer::{PackError, Packer};
pub use safety::{resolve_within, SafetyLimits, SafetyViolation};
pub use watcher::{next_delay, Watcher};
