//! forge - Autonomous marketplace agent
//!
//! Watches a job marketplace for prompts, generates a project with a
//! completion provider, writes and archives it, and submits the archive back.
//!
//! # Architecture
//!
//! Components talk through an in-process event bus:
//! - The watcher polls the marketplace and reports what it finds
//! - The orchestrator owns the engine state and drives one job at a time
//!   through generate, build, pack and submit
//! - The bridge forwards bus traffic to server-push observers
//!
//! # Modules
//!
//! - `adapters`: Marketplace and completion provider clients
//! - `brain`: Prompt to artifact generation and output repair
//! - `bridge`: Server-push fan-out
//! - `core`: Event bus, watcher, builder, packer, orchestrator
//! - `domain`: Data structures (state, events, artifacts)
//! - `server`: Control HTTP surface
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the engine with its control surface
//! forge serve --port 8787
//!
//! # Poll once and submit if a prompt is waiting
//! forge once
//!
//! # Show resolved configuration
//! forge config
//! ```

pub mod adapters;
pub mod brain;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;

// Re-export main types at crate root for convenience
pub use bridge::Bridge;
pub use config::EngineConfig;
pub use core::{EventBus, Orchestrator};
pub use domain::{EngineEvent, EngineState, EventKind, Stage};
