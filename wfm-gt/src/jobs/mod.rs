//! Background jobs
//!
//! Handlers dispatch [`Job`]s onto a bounded queue; a single worker task runs
//! them one at a time. Jobs run at most once: failures are logged and never
//! retried, and a job whose subject has disappeared is skipped.

pub mod conflicts;
pub mod ip_overlap;
pub mod notifier;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wfm_common::events::EventBus;

use crate::db::RuntimeSettings;

/// Queue depth before `dispatch` waits for the worker
pub const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Look for hierarchy conflicts of one known place
    CheckKnownPlace { known_place_id: i64 },
    /// Look for other ranges overlapping one IP range
    CheckIpAddress { ip_address_id: i64 },
}

/// Sending half of the job queue
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Queue plus its receiving end, for callers that drive jobs themselves
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn dispatch(&self, job: Job) {
        debug!("Dispatching {:?}", job);
        if self.tx.send(job).await.is_err() {
            warn!("Job worker has stopped, dropping {:?}", job);
        }
    }

    pub async fn check_known_places(&self, known_place_ids: &[i64]) {
        for id in known_place_ids {
            self.dispatch(Job::CheckKnownPlace { known_place_id: *id }).await;
        }
    }
}

/// Start the worker task and return the queue that feeds it
///
/// The worker stops once every [`JobQueue`] clone has been dropped.
pub fn spawn_worker(pool: SqlitePool, bus: EventBus) -> (JobQueue, JoinHandle<()>) {
    let (queue, mut rx) = JobQueue::channel(QUEUE_CAPACITY);

    let handle = tokio::spawn(async move {
        info!("Job worker started");
        while let Some(job) = rx.recv().await {
            run_job(&pool, &bus, job).await;
        }
        info!("Job worker stopped");
    });

    (queue, handle)
}

/// Run one job to completion, honouring the enable switches in `settings`
pub async fn run_job(pool: &SqlitePool, bus: &EventBus, job: Job) {
    let settings = match RuntimeSettings::load(pool).await {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings for {:?}: {}", job, e);
            return;
        }
    };

    match job {
        Job::CheckKnownPlace { known_place_id } => {
            if !settings.conflict_check_enabled {
                debug!("Conflict checks disabled, skipping known place {}", known_place_id);
                return;
            }
            conflicts::check_known_place(pool, bus, known_place_id).await;
        }
        Job::CheckIpAddress { ip_address_id } => {
            if !settings.ip_overlap_check_enabled {
                debug!("IP overlap checks disabled, skipping range {}", ip_address_id);
                return;
            }
            ip_overlap::check_ip_address(pool, bus, ip_address_id).await;
        }
    }
}
