//! Progress UI components for build visualization
//!
//! This module renders step status updates and lifecycle events as
//! terminal progress indicators, or as plain log lines when no terminal is
//! attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cibox_core::{StatusState, StatusUpdate};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::StepEvent;

/// Trait for progress UI implementations
pub trait ProgressUI: Send + Sync {
    /// Update the UI with a step lifecycle event
    fn on_event(&self, event: &StepEvent);

    /// Update the UI with a step status change
    fn on_status(&self, update: &StatusUpdate);

    /// Clear the progress display
    fn clear(&self);

    /// Finish the progress display
    fn finish(&self);
}

/// Indicatif-based progress UI implementation
pub struct IndicatifProgressUI {
    /// Multi-progress container
    multi_progress: MultiProgress,
    /// Overall progress bar
    main_bar: ProgressBar,
    /// Spinners keyed by step id
    step_bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
    /// Start time for duration tracking
    start_time: Instant,
}

impl IndicatifProgressUI {
    /// Create a new indicatif progress UI
    pub fn new() -> Self {
        let multi_progress = MultiProgress::new();

        let main_bar = multi_progress.add(ProgressBar::new(0));
        main_bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{prefix:.bold.dim} {spinner:.green} [{elapsed_precise}] \
                     [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        main_bar.set_prefix("Running steps");

        Self {
            multi_progress,
            main_bar,
            step_bars: Arc::new(Mutex::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    fn create_step_bar(&self, context: &str) -> ProgressBar {
        let pb = self.multi_progress.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner:.green} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(format!("  {context}"));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn handle_running(&self, key: String, update: &StatusUpdate) {
        let pb = self.create_step_bar(&update.context);
        pb.set_message(update.status.description.clone());

        if let Ok(mut bars) = self.step_bars.lock() {
            bars.insert(key, pb);
        }
    }

    fn handle_finished(&self, key: &str, update: &StatusUpdate) {
        if let Ok(bars) = self.step_bars.lock() {
            if let Some(pb) = bars.get(key) {
                if update.status.state == StatusState::Success {
                    pb.finish_with_message("✓ Complete");
                } else {
                    pb.finish_with_message(format!("✗ {}", update.status.description));
                }
            }
        }
    }
}

impl Default for IndicatifProgressUI {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressUI for IndicatifProgressUI {
    fn on_event(&self, event: &StepEvent) {
        match event {
            StepEvent::StepStart { step } => {
                self.main_bar.inc_length(1);
                self.main_bar.set_message(format!("Running {}", step.name));
            }
            StepEvent::StepEnd { .. } => {
                self.main_bar.inc(1);
            }
            StepEvent::Timeout { message, .. } => {
                self.multi_progress.println(format!("TIMEOUT: {message}")).ok();
            }
            StepEvent::Error { step, error } => {
                self.multi_progress.println(format!("ERROR: {}: {error}", step.name)).ok();
            }
        }
    }

    fn on_status(&self, update: &StatusUpdate) {
        let key = status_key(update);
        match update.status.action.as_str() {
            "running" => self.handle_running(key, update),
            _ => self.handle_finished(&key, update),
        }
    }

    fn clear(&self) {
        self.multi_progress.clear().ok();
    }

    fn finish(&self) {
        if let Ok(bars) = self.step_bars.lock() {
            for pb in bars.values() {
                if !pb.is_finished() {
                    pb.finish();
                }
            }
        }

        let elapsed = self.start_time.elapsed();
        self.main_bar.finish_with_message(format!("Build finished in {elapsed:?}"));
    }
}

/// No-op progress UI for when visual progress is not needed
pub struct NoOpProgressUI;

impl ProgressUI for NoOpProgressUI {
    fn on_event(&self, event: &StepEvent) {
        match event {
            StepEvent::StepStart { step } => info!("Starting step {}", step.name),
            StepEvent::StepEnd { step, error: None } => info!("Step {} finished", step.name),
            StepEvent::StepEnd { step, error: Some(e) } => {
                error!("Step {} failed: {}", step.name, e)
            }
            StepEvent::Timeout { message, .. } => warn!("{}", message),
            StepEvent::Error { step, error } => error!("Step {} reported: {}", step.name, error),
        }
    }

    fn on_status(&self, update: &StatusUpdate) {
        info!(
            context = %update.context,
            state = ?update.status.state,
            "{}: {}",
            update.status.action,
            update.status.description
        );
    }

    fn clear(&self) {
        // No-op
    }

    fn finish(&self) {
        info!("Build process completed");
    }
}

/// Progress UI factory
pub struct ProgressUIFactory;

impl ProgressUIFactory {
    /// Create a progress UI based on environment
    pub fn create(interactive: bool) -> Arc<dyn ProgressUI> {
        if interactive && atty::is(atty::Stream::Stdout) {
            Arc::new(IndicatifProgressUI::new())
        } else {
            Arc::new(NoOpProgressUI)
        }
    }

    pub fn create_indicatif() -> Arc<dyn ProgressUI> {
        Arc::new(IndicatifProgressUI::new())
    }

    pub fn create_noop() -> Arc<dyn ProgressUI> {
        Arc::new(NoOpProgressUI)
    }
}

/// Feed build events and status updates into a UI until both channels close
pub fn spawn_reporter(
    ui: Arc<dyn ProgressUI>,
    mut events: UnboundedReceiver<StepEvent>,
    mut status: UnboundedReceiver<StatusUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events_open = true;
        let mut status_open = true;

        while events_open || status_open {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => ui.on_event(&event),
                    None => events_open = false,
                },
                update = status.recv(), if status_open => match update {
                    Some(update) => ui.on_status(&update),
                    None => status_open = false,
                },
            }
        }

        ui.finish();
    })
}

fn status_key(update: &StatusUpdate) -> String {
    update
        .status
        .task
        .get("id")
        .and_then(|id| id.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| update.context.clone())
}
