//! Send orchestration.
//!
//! One `SendJob` is one run: the recipients queued up front, a cooperative
//! stop flag and a fixed pool of worker tasks. Workers never touch the
//! terminal; every per-record outcome travels over the update channel so a
//! single consumer owns all user-facing output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::processor::RecordProcessor;
use crate::queue::WorkQueue;
use crate::roster::Recipient;

/// Worker pool size when `--workers` is not given.
pub const DEFAULT_WORKERS: usize = 5;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run started yet.
    Idle,
    /// Workers are draining the queue.
    Running,
    /// Queue drained with no stop request.
    Completed,
    /// Stop requested; in-flight records finished, the rest stayed queued.
    Stopped,
    /// Setup failed before any record was processed. Setup happens before
    /// a job exists, so this state is reported by the front-end, never by
    /// [`SendJob::run`].
    Failed,
}

/// Outcome of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Rendered to this path and accepted by the relay.
    Sent(PathBuf),
    /// Render or delivery failed; the run carried on.
    Failed(String),
}

/// Progress event emitted after each record, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    /// 1-based spreadsheet row of the record.
    pub row: usize,
    pub name: String,
    pub email: String,
    pub outcome: RecordOutcome,
    /// Records finished so far, this one included.
    pub completed: usize,
    pub total: usize,
    /// Share of records no longer waiting in the queue.
    pub percent: u8,
}

/// Final accounting of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub state: RunState,
}

/// A single batch run over one recipient list.
pub struct SendJob {
    queue: Arc<WorkQueue<Recipient>>,
    total: usize,
    workers: usize,
    stop: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    state: Mutex<RunState>,
}

impl SendJob {
    /// Queue every recipient up front. Nothing runs until [`run`] is called.
    ///
    /// [`run`]: SendJob::run
    pub fn new(recipients: Vec<Recipient>, workers: usize) -> Self {
        let total = recipients.len();
        Self {
            queue: Arc::new(WorkQueue::new(recipients)),
            total,
            workers: workers.max(1),
            stop: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Records finished so far, failures included.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Where the run stands: `Idle` until [`run`] is called, `Running` while
    /// workers drain the queue, then the terminal state.
    ///
    /// [`run`]: SendJob::run
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared stop flag. Setting it stops further dequeues; records already
    /// being processed still finish and are still reported.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Request a cooperative stop.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Drain the queue with the worker pool and return the final tally.
    ///
    /// Calling `run` while a run is already active is a no-op that reports
    /// `RunState::Running` with a zeroed tally.
    pub async fn run(
        &self,
        processor: Arc<dyn RecordProcessor>,
        updates: mpsc::UnboundedSender<RecordUpdate>,
    ) -> RunSummary {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == RunState::Running {
                warn!("run_already_active");
                return RunSummary {
                    total: 0,
                    sent: 0,
                    failed: 0,
                    state: RunState::Running,
                };
            }
            *state = RunState::Running;
        }

        info!(total = self.total, workers = self.workers, "run_started");

        let sent = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let queue = Arc::clone(&self.queue);
                let stop = Arc::clone(&self.stop);
                let completed = Arc::clone(&self.completed);
                let sent = Arc::clone(&sent);
                let failed = Arc::clone(&failed);
                let processor = Arc::clone(&processor);
                let updates = updates.clone();
                let total = self.total;

                tokio::spawn(async move {
                    loop {
                        // Stop is checked between records, never mid-record.
                        if stop.load(Ordering::SeqCst) {
                            info!(worker, "worker_observed_stop");
                            break;
                        }
                        let Some(record) = queue.pop() else {
                            break;
                        };

                        let outcome = match processor.process(&record).await {
                            Ok(path) => {
                                sent.fetch_add(1, Ordering::SeqCst);
                                info!(
                                    worker,
                                    row = record.row,
                                    email = %record.email,
                                    "record_sent"
                                );
                                RecordOutcome::Sent(path)
                            }
                            Err(error) => {
                                failed.fetch_add(1, Ordering::SeqCst);
                                warn!(
                                    worker,
                                    row = record.row,
                                    email = %record.email,
                                    error = %error,
                                    "record_send_failed"
                                );
                                RecordOutcome::Failed(error.to_string())
                            }
                        };

                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        let update = RecordUpdate {
                            row: record.row,
                            name: record.name,
                            email: record.email,
                            outcome,
                            completed: done,
                            total,
                            percent: progress_percent(total, queue.remaining()),
                        };
                        // A missing consumer only loses progress output.
                        let _ = updates.send(update);
                    }
                })
            })
            .collect();

        drop(updates);
        join_all(handles).await;

        let state = if self.stop.load(Ordering::SeqCst) {
            RunState::Stopped
        } else {
            RunState::Completed
        };
        let summary = RunSummary {
            total: self.total,
            sent: sent.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            state,
        };
        match state {
            RunState::Stopped => info!(
                sent = summary.sent,
                failed = summary.failed,
                total = summary.total,
                "run_stopped"
            ),
            _ => info!(
                sent = summary.sent,
                failed = summary.failed,
                total = summary.total,
                "run_completed"
            ),
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        summary
    }
}

/// Share of records no longer waiting in the queue, out of 100. Records a
/// worker is still busy with count as progressed, so the figure can lead
/// the completed count by up to the pool size.
fn progress_percent(total: usize, remaining: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((total - remaining) * 100 / total) as u8
}

// ============================================================================
// Tests
// ============================================================================
