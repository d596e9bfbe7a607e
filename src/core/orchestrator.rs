//! The engine state machine.
//!
//! Owns the single [`EngineState`] and is its only writer. Bus handlers are
//! wired once at construction; each pipeline run goes
//! `prompt_received -> generating -> building -> packing -> submitting ->
//! completed`, and at most one run is in flight at a time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::adapters::{Marketplace, MarketplaceClient};
use crate::brain::Brain;
use crate::config::EngineConfig;
use crate::domain::{
    EngineEvent, EngineState, ErrorEvent, EventKind, LogEvent, LogLevel, PollResult,
    PromptReadyEvent, Stage, SubmissionResult, TickEvent,
};

use super::builder::Builder;
use super::event_bus::{EventBus, Subscription};
use super::packer::Packer;
use super::watcher::Watcher;

/// A pipeline failure tagged with the stage it happened in
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl fmt::Display) -> Self {
        Self {
            stage,
            message: message.to_string(),
        }
    }
}

impl From<&StageError> for ErrorEvent {
    fn from(err: &StageError) -> Self {
        ErrorEvent {
            stage: err.stage,
            message: err.message.clone(),
        }
    }
}

/// Outcome of trying to start a run
enum Admission {
    Accepted(EngineState),
    NotRunning,
    Busy(Stage),
}

struct Inner {
    state: Mutex<EngineState>,
    bus: EventBus,
    watcher: Watcher,
    brain: Brain,
    builder: Builder,
    packer: Packer,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Handle to the engine; clones share the same state
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Wire an engine from configuration using the HTTP marketplace client
    /// and the configured completion providers
    pub fn from_config(config: &EngineConfig, bus: EventBus) -> Self {
        let marketplace: Arc<dyn Marketplace> =
            Arc::new(MarketplaceClient::new(config.marketplace.clone()));
        Self::new(config, bus, marketplace, Brain::from_config(&config.brain))
    }

    /// Wire an engine around explicit remote collaborators
    pub fn new(
        config: &EngineConfig,
        bus: EventBus,
        marketplace: Arc<dyn Marketplace>,
        brain: Brain,
    ) -> Self {
        let watcher = Watcher::new(
            Arc::clone(&marketplace),
            bus.clone(),
            config.watcher.clone(),
        );
        let builder = Builder::new(config.paths.output_dir.clone(), config.safety.clone());
        let packer = Packer::new(
            config.paths.archive_dir.clone(),
            marketplace,
            config.marketplace.agent_id.clone(),
        );

        let inner = Arc::new(Inner {
            state: Mutex::new(EngineState::default()),
            bus,
            watcher,
            brain,
            builder,
            packer,
            subscriptions: Mutex::new(Vec::new()),
        });
        Inner::wire(&inner);

        Self { inner }
    }

    /// Copy of the current state
    pub fn state(&self) -> EngineState {
        self.inner.lock().clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Begin watching. A no-op when already running.
    pub fn start(&self) -> EngineState {
        let snapshot = {
            let mut state = self.inner.lock();
            if state.running {
                return state.clone();
            }
            state.running = true;
            if !state.processing {
                state.stage = Stage::Watching;
            }
            state.clone()
        };

        self.inner.watcher.start();
        self.inner
            .log("Engine", LogLevel::Success, "Core engine is running.");
        self.inner.bus.emit(EngineEvent::State(snapshot.clone()));
        snapshot
    }

    /// Stop watching and stop accepting prompts. A run in flight is left to
    /// finish; the stage only drops to `idle` when nothing is processing.
    pub fn stop(&self) -> EngineState {
        let snapshot = {
            let mut state = self.inner.lock();
            state.running = false;
            if !state.processing {
                state.stage = Stage::Idle;
            }
            state.clone()
        };

        self.inner.watcher.stop();
        self.inner
            .log("Engine", LogLevel::Warn, "Core engine stopped by operator.");
        self.inner.bus.emit(EngineEvent::State(snapshot.clone()));
        snapshot
    }

    /// Hand a prompt to the engine as if the watcher had found it
    pub fn inject_prompt(&self, prompt: impl Into<String>) {
        self.inner
            .bus
            .emit(EngineEvent::PromptReady(PromptReadyEvent {
                prompt: prompt.into(),
                job_id: None,
                raw: json!({ "source": "manual-inject" }),
            }));
    }

    /// Run the full pipeline on the caller's task, whether or not the engine
    /// is running. Fails without side effects when a run is already in flight.
    pub async fn execute(
        &self,
        prompt: &str,
        job_id: Option<&str>,
    ) -> Result<SubmissionResult, StageError> {
        match self.inner.admit(false) {
            Admission::Accepted(snapshot) => {
                self.inner.announce(snapshot, job_id);
                Arc::clone(&self.inner)
                    .run_pipeline(prompt.to_string(), job_id.map(str::to_string))
                    .await
            }
            Admission::Busy(stage) => Err(StageError::new(stage, "A job is already processing.")),
            Admission::NotRunning => Err(StageError::new(Stage::Idle, "Engine is not running.")),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a change and return the resulting snapshot
    fn update<F: FnOnce(&mut EngineState)>(&self, f: F) -> EngineState {
        let mut state = self.lock();
        f(&mut state);
        state.clone()
    }

    fn log(&self, source: &str, level: LogLevel, message: impl Into<String>) {
        self.bus.log(LogEvent::new(source, level, message));
    }

    fn emit_state(&self, snapshot: EngineState) {
        self.bus.emit(EngineEvent::State(snapshot));
    }

    fn wire(this: &Arc<Self>) {
        let mut subs = Vec::with_capacity(4);

        let weak = Arc::downgrade(this);
        subs.push(this.bus.subscribe(EventKind::PromptReady, move |event| {
            if let (Some(inner), EngineEvent::PromptReady(e)) = (weak.upgrade(), event) {
                inner.on_prompt_ready(e);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(this);
        subs.push(this.bus.subscribe(EventKind::Error, move |event| {
            if let (Some(inner), EngineEvent::Error(e)) = (weak.upgrade(), event) {
                inner.on_error(e);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(this);
        subs.push(this.bus.subscribe(EventKind::Tick, move |event| {
            if let (Some(inner), EngineEvent::Tick(e)) = (weak.upgrade(), event) {
                inner.on_tick(e);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(this);
        subs.push(this.bus.subscribe(EventKind::PromptWaiting, move |event| {
            if let (Some(inner), EngineEvent::PromptWaiting(e)) = (weak.upgrade(), event) {
                inner.on_prompt_waiting(e);
            }
        }));

        this.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(subs);
    }

    /// Check-and-set `processing` under one lock
    fn admit(&self, require_running: bool) -> Admission {
        let mut state = self.lock();
        if require_running && !state.running {
            return Admission::NotRunning;
        }
        if state.processing {
            return Admission::Busy(state.stage);
        }
        state.processing = true;
        state.stage = Stage::PromptReceived;
        state.last_prompt_at = Some(Utc::now());
        Admission::Accepted(state.clone())
    }

    fn announce(&self, snapshot: EngineState, job_id: Option<&str>) {
        let mut log = LogEvent::new(
            "Watcher",
            LogLevel::Success,
            "Prompt received. Starting execution pipeline.",
        );
        if let Some(job_id) = job_id {
            log = log.with_meta(json!({ "jobId": job_id }));
        }
        self.bus.log(log);
        self.emit_state(snapshot);
    }

    fn on_prompt_ready(self: &Arc<Self>, event: &PromptReadyEvent) {
        match self.admit(true) {
            Admission::NotRunning => debug!("Prompt ignored, engine not running"),
            Admission::Busy(_) => self.log(
                "Engine",
                LogLevel::Warn,
                "Prompt received while a job is processing. Ignored.",
            ),
            Admission::Accepted(snapshot) => {
                self.announce(snapshot, event.job_id.as_deref());

                let runtime = match tokio::runtime::Handle::try_current() {
                    Ok(handle) => handle,
                    Err(e) => {
                        let err = StageError::new(Stage::PromptReceived, e);
                        self.bus.emit(EngineEvent::Error((&err).into()));
                        self.finish();
                        return;
                    }
                };

                let inner = Arc::clone(self);
                let prompt = event.prompt.clone();
                let job_id = event.job_id.clone();
                runtime.spawn(async move {
                    if let Err(e) = inner.run_pipeline(prompt, job_id).await {
                        debug!(error = %e, "Pipeline run ended with error");
                    }
                });
            }
        }
    }

    fn on_error(&self, event: &ErrorEvent) {
        let snapshot = self.update(|state| {
            state.last_error = Some(format!("{}: {}", event.stage, event.message));
            // A failed poll must not clobber the stage of a run in flight
            if !(event.stage == Stage::Watching && state.processing) {
                state.stage = Stage::Error;
            }
        });
        self.log(
            &event.stage.as_str().to_uppercase(),
            LogLevel::Error,
            event.message.clone(),
        );
        self.emit_state(snapshot);
    }

    fn on_tick(&self, event: &TickEvent) {
        let snapshot = self.update(|state| {
            state.last_tick_at = Some(event.checked_at);
            if state.running && !state.processing && state.stage == Stage::Error {
                state.stage = Stage::Watching;
            }
        });
        self.log(
            "Watcher",
            LogLevel::Info,
            format!("Watcher tick complete. Next poll in {}ms.", event.next_delay_ms),
        );
        self.emit_state(snapshot);
    }

    fn on_prompt_waiting(&self, event: &PollResult) {
        self.log(
            "Watcher",
            LogLevel::Info,
            format!("Watcher idle: {}", event.reason),
        );
    }

    fn enter(&self, stage: Stage, source: &str, message: impl Into<String>) {
        let snapshot = self.update(|state| state.stage = stage);
        self.log(source, LogLevel::Info, message);
        self.emit_state(snapshot);
    }

    /// Run every stage; report a failure once, then release `processing`
    #[instrument(skip(self, prompt), fields(job_id = ?job_id))]
    async fn run_pipeline(
        self: Arc<Self>,
        prompt: String,
        job_id: Option<String>,
    ) -> Result<SubmissionResult, StageError> {
        let outcome = self.stages(&prompt, job_id.as_deref()).await;
        if let Err(err) = &outcome {
            self.bus.emit(EngineEvent::Error(err.into()));
        }
        self.finish();
        outcome
    }

    fn finish(&self) {
        let snapshot = self.update(|state| {
            state.processing = false;
            if state.running {
                state.stage = Stage::Watching;
            }
        });
        self.emit_state(snapshot);
    }

    async fn stages(
        &self,
        prompt: &str,
        job_id: Option<&str>,
    ) -> Result<SubmissionResult, StageError> {
        self.enter(Stage::Generating, "Brain", "Generating project from prompt.");
        let artifact = self
            .brain
            .generate(prompt)
            .await
            .map_err(|e| StageError::new(Stage::Generating, e))?;
        self.bus.log(
            LogEvent::new(
                "Brain",
                LogLevel::Success,
                format!("Brain produced {} files.", artifact.files.len()),
            )
            .with_meta(json!({
                "projectName": artifact.project_name,
                "bytes": artifact.total_bytes(),
            })),
        );

        self.enter(Stage::Building, "Builder", "Writing project files.");
        let build = self
            .builder
            .materialize(&artifact)
            .await
            .map_err(|e| StageError::new(Stage::Building, e))?;
        self.bus.emit(EngineEvent::OutputReady(build.clone()));
        self.bus.log(
            LogEvent::new(
                "Builder",
                LogLevel::Success,
                format!("Builder wrote {} files.", build.files_written),
            )
            .with_meta(json!({ "outputDir": build.output_dir.display().to_string() })),
        );

        self.enter(Stage::Packing, "Packer", "Creating archive.");
        let zip = self
            .packer
            .create_zip(&build.output_dir)
            .await
            .map_err(|e| StageError::new(Stage::Packing, e))?;
        self.bus.emit(EngineEvent::Zipped(zip.clone()));
        self.bus.log(
            LogEvent::new(
                "Packer",
                LogLevel::Success,
                format!("Archive created ({} bytes).", zip.bytes),
            )
            .with_meta(json!({ "zipPath": zip.zip_path.display().to_string() })),
        );

        self.enter(Stage::Submitting, "Packer", "Submitting archive to marketplace.");
        let submission = self
            .packer
            .submit(&zip.zip_path, job_id)
            .await
            .map_err(|e| StageError::new(Stage::Submitting, e))?;
        self.bus.emit(EngineEvent::Submitted(submission.clone()));

        let snapshot = self.update(|state| {
            state.last_submission_id = submission.submission_id.clone();
            state.stage = Stage::Completed;
        });
        let mut done = LogEvent::new("Packer", LogLevel::Success, "Submission completed successfully.");
        if let Ok(meta) = serde_json::to_value(&submission) {
            done = done.with_meta(meta);
        }
        self.bus.log(done);
        self.emit_state(snapshot);

        Ok(submission)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subs = std::mem::take(
            self.subscriptions
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for sub in subs {
            sub.unsubscribe();
        }
    }
}
