//! Event loop around a `ReviewSession`.
//!
//! The session is single-threaded and never blocks. The driver carries out
//! its effects: store requests run on the blocking pool and come back as
//! `SessionEvent::Completed`, training monitors report into the same queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::session::{Effect, ReviewSession, SessionEvent, SessionNotice};
use crate::store::{self, ItemStore, StoreError};
use crate::training::lifecycle::cancellation_reason;
use crate::training::{spawn_monitor, MonitorHandle, TrainingBackend, TrainingReport, TrainingSignal};

/// Caller side of a running driver. Dropping it shuts the driver down once
/// outstanding store requests have completed.
#[derive(Clone)]
pub struct DriverHandle {
    inputs: mpsc::UnboundedSender<SessionEvent>,
}

impl DriverHandle {
    /// Queue an event. False when the driver has stopped.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.inputs.send(event).is_ok()
    }
}

pub struct SessionDriver {
    session: ReviewSession,
    store: Arc<dyn ItemStore>,
    backend: Arc<dyn TrainingBackend>,
    poll_interval: Duration,
    inputs: mpsc::UnboundedReceiver<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<SessionEvent>,
    internal_rx: mpsc::UnboundedReceiver<SessionEvent>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    monitors: HashMap<String, MonitorHandle>,
}

impl SessionDriver {
    pub fn new(
        session: ReviewSession,
        store: Arc<dyn ItemStore>,
        backend: Arc<dyn TrainingBackend>,
        poll_interval: Duration,
    ) -> (Self, DriverHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let driver = Self {
            session,
            store,
            backend,
            poll_interval,
            inputs,
            internal_tx,
            internal_rx,
            notices,
            monitors: HashMap::new(),
        };
        (driver, DriverHandle { inputs: inputs_tx }, notices_rx)
    }

    /// Run until every `DriverHandle` is dropped and no store request is
    /// outstanding. Returns the session; running monitors are stopped.
    pub async fn run(mut self) -> ReviewSession {
        tracing::info!(user_id = %self.session.user_id(), "Session driver started");
        self.flush();

        let mut inputs_open = true;
        loop {
            if !inputs_open && self.session.in_flight() == 0 {
                break;
            }
            let event = tokio::select! {
                event = self.inputs.recv(), if inputs_open => match event {
                    Some(event) => event,
                    None => {
                        inputs_open = false;
                        continue;
                    }
                },
                Some(event) = self.internal_rx.recv() => event,
            };

            if let Err(e) = self.session.handle(event) {
                self.session.report_rejection(&e);
            }
            self.flush();
        }

        self.monitors.clear();
        tracing::info!(user_id = %self.session.user_id(), "Session driver stopped");
        self.session
    }

    fn flush(&mut self) {
        for effect in self.session.take_effects() {
            match effect {
                Effect::Store { request_id, op } => self.spawn_store(request_id, op),
                Effect::StartMonitor { batch } => {
                    let batch_id = batch.id.clone();
                    let handle = spawn_monitor(
                        self.backend.clone(),
                        batch,
                        self.poll_interval,
                        self.internal_tx.clone(),
                    );
                    self.monitors.insert(batch_id, handle);
                }
                Effect::CancelMonitor { batch_id, reason } => match self.monitors.get(&batch_id) {
                    Some(monitor) if !monitor.is_finished() => monitor.cancel(&reason),
                    _ => {
                        // Nothing polls this batch (e.g. it was training
                        // before a restart); report the cancellation here.
                        tracing::debug!(batch_id = %batch_id, "No live monitor, failing batch directly");
                        let report = TrainingReport {
                            batch_id,
                            signal: TrainingSignal::Failed {
                                reason: cancellation_reason(&reason),
                            },
                        };
                        // The receiver lives in `self`; this cannot fail.
                        let _ = self.internal_tx.send(report.into());
                    }
                },
                Effect::StopMonitor { batch_id } => {
                    self.monitors.remove(&batch_id);
                }
            }
        }

        for notice in self.session.take_notices() {
            if self.notices.send(notice).is_err() {
                tracing::debug!("Notice receiver dropped");
            }
        }
    }

    fn spawn_store(&self, request_id: u64, op: store::StoreOp) {
        let store = self.store.clone();
        let completions = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || store::execute(store.as_ref(), &op))
                .await
                .unwrap_or_else(|e| Err(StoreError::Unavailable(format!("store task failed: {e}"))));
            let _ = completions.send(SessionEvent::Completed { request_id, result });
        });
    }
}

/// Run the session's store requests inline until none remain.
///
/// For embedders without a runtime. Effects other than store requests are
/// returned for the caller to handle.
pub fn drive_blocking(session: &mut ReviewSession, store: &dyn ItemStore) -> Vec<Effect> {
    let mut other = Vec::new();
    loop {
        let effects = session.take_effects();
        if effects.is_empty() {
            return other;
        }
        for effect in effects {
            match effect {
                Effect::Store { request_id, op } => {
                    let result = store::execute(store, &op);
                    if let Err(e) = session.handle(SessionEvent::Completed { request_id, result }) {
                        session.report_rejection(&e);
                    }
                }
                effect => other.push(effect),
            }
        }
    }
}
