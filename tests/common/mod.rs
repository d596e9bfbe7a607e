//! Shared test doubles for the marketplace and completion providers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use forge::adapters::{CompletionProvider, Marketplace, RemoteError};
use forge::brain::Brain;
use forge::config::EngineConfig;
use forge::core::{EventBus, Orchestrator};
use forge::domain::{
    EngineEvent, EventKind, PollResult, Stage, SubmissionResult, Upload, UploadedFile,
};

pub const VALID_ARTIFACT: &str = r#"{"projectName":"todo","files":[{"path":"index.html","content":"<h1>Todo</h1>"},{"path":"src/app.js","content":"console.log('hi');"}]}"#;

/// In-memory marketplace recording uploads and responses
#[derive(Default)]
pub struct MockMarketplace {
    pub polls: AtomicUsize,
    pub uploads: Mutex<Vec<PathBuf>>,
    pub responses: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl Marketplace for MockMarketplace {
    async fn poll_prompt(&self) -> Result<PollResult, RemoteError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(PollResult::waiting("No prompt found in 0 job(s) (0 open).", json!({})))
    }

    async fn upload_file(&self, path: &Path) -> Result<Upload, RemoteError> {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.uploads.lock().unwrap().push(path.to_path_buf());
        let file = UploadedFile {
            url: format!("https://cdn.test/{}", name),
            name,
            size,
            mime_type: "application/zip".to_string(),
        };
        let raw = json!({ "success": true, "files": [file.clone()] });
        Ok(Upload { file, raw })
    }

    async fn submit_response(
        &self,
        job_id: &str,
        content: &str,
        attachments: &[UploadedFile],
    ) -> Result<SubmissionResult, RemoteError> {
        self.responses
            .lock()
            .unwrap()
            .push((job_id.to_string(), content.to_string(), attachments.len()));
        Ok(SubmissionResult {
            submission_id: Some("sub-1".to_string()),
            raw: json!({ "responseId": "sub-1" }),
        })
    }
}

/// Completion provider replaying canned outputs, then a valid artifact
pub struct ScriptedProvider {
    pub name: String,
    pub credential: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    script: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            credential: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn without_credential(mut self) -> Self {
        self.credential = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_ok(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn then_err(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(RemoteError::Protocol {
                service: "Completion",
                message,
            }),
            None => Ok(VALID_ARTIFACT.to_string()),
        }
    }
}

/// Config rooted in a temp dir, with the watcher's first poll far away
pub fn test_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.paths.output_dir = dir.path().join("runs/current");
    config.paths.archive_dir = dir.path().join("runs/archives");
    config.watcher.initial_delay_ms = 3_600_000;
    config.marketplace.agent_id = "TEST.AGENT".to_string();
    config
}

pub struct Harness {
    pub engine: Orchestrator,
    pub bus: EventBus,
    pub marketplace: Arc<MockMarketplace>,
    pub provider: Arc<ScriptedProvider>,
    pub stages: Arc<Mutex<Vec<Stage>>>,
    pub events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl Harness {
    pub fn new(dir: &TempDir, provider: ScriptedProvider) -> Self {
        let config = test_config(dir);
        let bus = EventBus::new();
        let marketplace = Arc::new(MockMarketplace::default());
        let provider = Arc::new(provider);
        let brain = Brain::new(
            vec![provider.clone() as Arc<dyn CompletionProvider>],
            "system",
        );
        let engine = Orchestrator::new(&config, bus.clone(), marketplace.clone(), brain);

        let stages = Arc::new(Mutex::new(Vec::new()));
        {
            let stages = stages.clone();
            bus.subscribe(EventKind::State, move |event| {
                if let EngineEvent::State(state) = event {
                    stages.lock().unwrap().push(state.stage);
                }
            });
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Log,
            EventKind::Error,
            EventKind::OutputReady,
            EventKind::Zipped,
            EventKind::Submitted,
        ] {
            let events = events.clone();
            bus.subscribe(kind, move |event| events.lock().unwrap().push(event.clone()));
        }

        Self {
            engine,
            bus,
            marketplace,
            provider,
            stages,
            events,
        }
    }

    /// Wait until no run is in flight
    pub async fn settle(&self) {
        for _ in 0..500 {
            if !self.engine.state().processing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline did not finish");
    }

    /// Observed stages with consecutive repeats collapsed
    pub fn stage_sequence(&self) -> Vec<Stage> {
        let mut seq = self.stages.lock().unwrap().clone();
        seq.dedup();
        seq
    }

    pub fn errors(&self) -> Vec<forge::domain::ErrorEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Log(log) => Some(log.message.clone()),
                _ => None,
            })
            .collect()
    }
}
