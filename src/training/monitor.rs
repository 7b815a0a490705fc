//! Training monitor: polls the external training process for one batch.
//!
//! The monitor only reports; it never writes. Reports go back into the
//! session's event queue, where the batch lifecycle turns them into writes.
//! `MonitorHandle::cancel` makes the monitor report a failure with the
//! cancellation reason; dropping the handle stops polling without a report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::lifecycle::cancellation_reason;
use crate::models::{BatchMetrics, TrainingBatch};

/// Consecutive poll errors tolerated before the batch is reported failed.
pub const MAX_POLL_FAILURES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Training backend unavailable: {0}")]
    Unavailable(String),

    #[error("Training backend rejected batch: {0}")]
    Rejected(String),
}

/// What the training process says about a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum TrainingSignal {
    Progress { percent: u8 },
    Completed { metrics: BatchMetrics },
    Failed { reason: String },
}

impl TrainingSignal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub batch_id: String,
    pub signal: TrainingSignal,
}

/// The fine-tuning service. Calls must return promptly.
pub trait TrainingBackend: Send + Sync {
    /// Submit the batch's cases.
    fn start(&self, batch: &TrainingBatch) -> Result<(), BackendError>;

    fn poll(&self, batch_id: &str) -> Result<TrainingSignal, BackendError>;
}

/// Handle for a running monitor task.
pub struct MonitorHandle {
    batch_id: String,
    stop: Arc<AtomicBool>,
    cancel_reason: Arc<Mutex<Option<String>>>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Stop polling and report the batch failed with `reason`.
    pub fn cancel(&self, reason: &str) {
        if let Ok(mut slot) = self.cancel_reason.lock() {
            slot.get_or_insert_with(|| cancellation_reason(reason));
        }
        self.stop.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.wake.notify_one();
        // The task exits at its next wake-up; nothing to join on a runtime.
        self.task.take();
    }
}

/// Start `batch` on the backend and poll it every `interval`.
///
/// Must be called from within a tokio runtime. Reports are converted into
/// `T` and sent on `events`; the task ends after a terminal report, on
/// cancellation, or when the receiver is gone.
pub fn spawn_monitor<T>(
    backend: Arc<dyn TrainingBackend>,
    batch: TrainingBatch,
    interval: Duration,
    events: mpsc::UnboundedSender<T>,
) -> MonitorHandle
where
    T: From<TrainingReport> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let cancel_reason = Arc::new(Mutex::new(None));
    let wake = Arc::new(Notify::new());

    let batch_id = batch.id.clone();
    let task = tokio::spawn(monitor_loop(
        backend,
        batch,
        interval,
        events,
        stop.clone(),
        cancel_reason.clone(),
        wake.clone(),
    ));

    MonitorHandle {
        batch_id,
        stop,
        cancel_reason,
        wake,
        task: Some(task),
    }
}

async fn monitor_loop<T>(
    backend: Arc<dyn TrainingBackend>,
    batch: TrainingBatch,
    interval: Duration,
    events: mpsc::UnboundedSender<T>,
    stop: Arc<AtomicBool>,
    cancel_reason: Arc<Mutex<Option<String>>>,
    wake: Arc<Notify>,
) where
    T: From<TrainingReport> + Send + 'static,
{
    let batch_id = batch.id.clone();
    let report = |signal: TrainingSignal| {
        events
            .send(T::from(TrainingReport {
                batch_id: batch_id.clone(),
                signal,
            }))
            .is_ok()
    };

    if let Err(e) = backend.start(&batch) {
        tracing::warn!(batch_id = %batch_id, error = %e, "Training backend refused batch");
        report(TrainingSignal::Failed { reason: e.to_string() });
        return;
    }
    tracing::info!(batch_id = %batch_id, cases = batch.cases_count(), "Training started");

    let mut last_progress: Option<u8> = None;
    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }

        if stop.load(Ordering::Relaxed) {
            let reason = cancel_reason.lock().ok().and_then(|mut r| r.take());
            if let Some(reason) = reason {
                tracing::info!(batch_id = %batch_id, %reason, "Training cancelled");
                report(TrainingSignal::Failed { reason });
            } else {
                tracing::debug!(batch_id = %batch_id, "Training monitor dropped");
            }
            return;
        }

        let signal = match backend.poll(&batch_id) {
            Ok(signal) => {
                failures = 0;
                signal
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(batch_id = %batch_id, error = %e, failures, "Training poll failed");
                if failures < MAX_POLL_FAILURES {
                    continue;
                }
                TrainingSignal::Failed {
                    reason: format!("training backend unreachable: {e}"),
                }
            }
        };

        if let TrainingSignal::Progress { percent } = signal {
            if last_progress == Some(percent) {
                continue;
            }
            last_progress = Some(percent);
        }

        let terminal = signal.is_terminal();
        if !report(signal) || terminal {
            return;
        }
    }
}
