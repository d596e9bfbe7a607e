//! Self-rescheduling marketplace poller.
//!
//! Every cycle polls once and emits `tick` plus either `prompt_ready` or
//! `prompt_waiting`; a failed poll emits `error` tagged `watching`. The next
//! cycle is always scheduled after a delay drawn uniformly from
//! `[poll_min_ms, poll_max_ms]`, whether or not the poll succeeded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::debug;

use crate::adapters::Marketplace;
use crate::config::WatcherConfig;
use crate::domain::{
    EngineEvent, ErrorEvent, LogEvent, LogLevel, PromptReadyEvent, Stage, TickEvent,
};

use super::event_bus::EventBus;

const SOURCE: &str = "Watcher";

/// Uniform delay in `[min_ms, max_ms]`
pub fn next_delay(min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    rand::thread_rng().gen_range(min_ms..=max_ms)
}

/// Polling loop handle; `start` and `stop` may be called from any task
pub struct Watcher {
    marketplace: Arc<dyn Marketplace>,
    bus: EventBus,
    config: WatcherConfig,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl Watcher {
    pub fn new(marketplace: Arc<dyn Marketplace>, bus: EventBus, config: WatcherConfig) -> Self {
        Self {
            marketplace,
            bus,
            config,
            stop_tx: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
        self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    /// Spawn the polling loop. Returns `false` if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = self.slot();
        if slot.is_some() {
            return false;
        }

        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);
        drop(slot);

        tokio::spawn(run_loop(
            Arc::clone(&self.marketplace),
            self.bus.clone(),
            self.config.clone(),
            rx,
        ));

        self.bus.log(LogEvent::new(
            SOURCE,
            LogLevel::Success,
            "Watcher started. Polling marketplace.",
        ));
        true
    }

    /// Cancel the pending reschedule. An in-flight poll still completes and
    /// reports, but no further cycle is scheduled.
    pub fn stop(&self) -> bool {
        let Some(tx) = self.slot().take() else {
            return false;
        };
        // The loop may already have exited
        let _ = tx.send(true);

        self.bus
            .log(LogEvent::new(SOURCE, LogLevel::Info, "Watcher stopped."));
        true
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(tx) = self.slot().take() {
            let _ = tx.send(true);
        }
    }
}

async fn run_loop(
    marketplace: Arc<dyn Marketplace>,
    bus: EventBus,
    config: WatcherConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut delay = config.initial_delay_ms;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let checked_at = Utc::now();
        let result = marketplace.poll_prompt().await;
        delay = next_delay(config.poll_min_ms, config.poll_max_ms);

        match result {
            Ok(poll) => {
                bus.emit(EngineEvent::Tick(TickEvent {
                    checked_at,
                    next_delay_ms: delay,
                }));
                match (poll.ready, poll.prompt.clone()) {
                    (true, Some(prompt)) => {
                        bus.emit(EngineEvent::PromptReady(PromptReadyEvent {
                            prompt,
                            job_id: poll.job_id.clone(),
                            raw: poll.raw,
                        }));
                    }
                    _ => bus.emit(EngineEvent::PromptWaiting(poll)),
                }
            }
            Err(e) => {
                bus.emit(EngineEvent::Error(ErrorEvent {
                    stage: Stage::Watching,
                    message: e.to_string(),
                }));
            }
        }

        if *stop.borrow() {
            break;
        }
        debug!(delay_ms = delay, "Next poll scheduled");
    }

    debug!("Watcher loop exited");
}
