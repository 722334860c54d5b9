//! Pipeline progress events.
//!
//! Each run owns a [`ProgressSink`]: a bounded, non-blocking queue of
//! [`ProgressEvent`]s. The HTTP layer streams the receiving end as SSE; the
//! CLI drains it into a [`ProgressReporter`] on **stderr** so stdout stays
//! parseable for scripts.
//!
//! Emitting never waits. When the queue is full the event is dropped and
//! a warning is logged.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Terminal statuses that end an event stream.
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

/// One status update from a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Stage name while a stage runs, otherwise a lifecycle status such as
    /// `started` or `completed`.
    pub status: String,
    pub message: String,
    /// Stage name, or empty outside of a stage.
    #[serde(default)]
    pub step: String,
    /// RFC 3339.
    pub timestamp: String,
}

impl ProgressEvent {
    pub fn new(
        status: impl Into<String>,
        message: impl Into<String>,
        step: impl Into<String>,
    ) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            step: step.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            STATUS_COMPLETED | STATUS_FAILED | STATUS_CANCELLED
        )
    }
}

/// Sending half of a run's progress queue. Cloning shares the queue; the
/// default sink discards everything.
#[derive(Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// Bounded queue holding at most `capacity` undelivered events, plus
    /// one slot that only a terminal event may use.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, status: &str, message: impl Into<String>, step: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ProgressEvent::new(status, message, step);
        if !event.is_terminal() && tx.capacity() <= 1 {
            tracing::warn!(status, "progress queue full, dropped progress event");
            return;
        }
        if let Err(e) = tx.try_send(event) {
            tracing::warn!(error = %e, "dropped progress event");
        }
    }
}

/// Renders progress events for a terminal.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: `[filter] Scoring: Some title...`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = if event.step.is_empty() {
            format!("{}\n", event.message)
        } else {
            format!("[{}] {}\n", event.step, event.message)
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise JSON lines.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Json
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Forward every event from `rx` to `reporter` until the queue closes.
pub async fn drain_to_reporter(
    mut rx: mpsc::Receiver<ProgressEvent>,
    reporter: Box<dyn ProgressReporter>,
) {
    while let Some(event) = rx.recv().await {
        reporter.report(&event);
    }
}
