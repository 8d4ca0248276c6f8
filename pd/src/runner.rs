//! Background task runner
//!
//! A single FIFO worker over an mpsc channel. Jobs are fire-and-forget from
//! the caller's perspective and execute at least once: failures retry a
//! bounded number of times, and every job body is idempotent, so a repeat
//! execution cannot corrupt state. The single worker also gives the ordering
//! guarantee that jobs submitted within one turn apply in submission order.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::constraint::apply_upsert;
use crate::domain::ConstraintDraft;
use crate::state::StateManager;

/// How many times a failing job is attempted before it is dropped
const MAX_JOB_ATTEMPTS: u32 = 3;

/// A background job
#[derive(Debug)]
pub enum Job {
    /// Assign a UID, link supersession, and persist a constraint draft
    UpsertConstraint(ConstraintDraft),
    /// Barrier: replies once every previously submitted job has executed
    Flush(oneshot::Sender<()>),
}

/// Handle for submitting background jobs
#[derive(Clone)]
pub struct Runner {
    tx: mpsc::Sender<Job>,
}

impl Runner {
    /// Spawn the worker task
    pub fn spawn(state: StateManager) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(worker_loop(state, rx));
        info!("Runner spawned");
        Self { tx }
    }

    /// Submit a job; returns as soon as it is enqueued
    pub async fn submit(&self, job: Job) {
        if self.tx.send(job).await.is_err() {
            warn!("Runner channel closed; job dropped");
        }
    }

    /// Wait until every job submitted before this call has executed
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(reply_tx)).await.is_err() {
            warn!("Runner channel closed; flush is a no-op");
            return;
        }
        let _ = reply_rx.await;
    }
}

async fn worker_loop(state: StateManager, mut rx: mpsc::Receiver<Job>) {
    info!("Runner worker started");

    while let Some(job) = rx.recv().await {
        match job {
            Job::UpsertConstraint(draft) => {
                let mut attempts = 0;
                loop {
                    attempts += 1;
                    match apply_upsert(&state, draft.clone()).await {
                        Ok(applied) => {
                            debug!(applied, attempts, rule = %draft.rule.kind, "Constraint upsert processed");
                            break;
                        }
                        Err(e) if attempts < MAX_JOB_ATTEMPTS => {
                            warn!(attempts, error = %e, "Constraint upsert failed; retrying");
                        }
                        Err(e) => {
                            warn!(attempts, error = %e, "Constraint upsert failed; dropping job");
                            break;
                        }
                    }
                }
            }
            Job::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }

    info!("Runner worker stopped");
}
