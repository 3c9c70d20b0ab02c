//! Single-slot handoff of family loads onto the host's document thread
//!
//! [`ApplyGateway`] handles can be cloned and used from any thread or task.
//! They park at most one [`PendingJob`] and wake the [`ApplyRunner`], which
//! lives on the one thread allowed to touch the host document and performs
//! the load inside a transaction. Nothing runs inline on the submitting side.
//!
//! Submitting while a job is still waiting replaces it. The replaced job's
//! callback is completed with a failure so every caller hears back exactly
//! once.

use crate::error::LoaderError;
use crate::host::{
    Host, HostDocument, HostError, HostSession, JobLoadOptions, LoadOutcome, LoadRequest,
};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

const TRANSACTION_NAME: &str = "Load family";

/// Completion message for a job replaced before it ran
pub const SUPERSEDED_MESSAGE: &str = "Superseded by a newer load request";
const RUNNER_GONE_MESSAGE: &str = "Host is not accepting load requests";

/// Receives `(success, message)` exactly once per job
pub type CompletionCallback = Box<dyn FnOnce(bool, String) + Send + 'static>;

/// What to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    pub path: PathBuf,
    pub display_name: String,
}

/// A load request waiting for the privileged context
pub struct PendingJob {
    pub payload: JobPayload,
    /// Prompt the user if the family already exists
    pub interactive: bool,
    callback: CompletionCallback,
}

impl PendingJob {
    pub fn new<F>(path: PathBuf, display_name: impl Into<String>, interactive: bool, callback: F) -> Self
    where
        F: FnOnce(bool, String) + Send + 'static,
    {
        Self {
            payload: JobPayload {
                path,
                display_name: display_name.into(),
            },
            interactive,
            callback: Box::new(callback),
        }
    }

    fn complete(self, success: bool, message: String) {
        (self.callback)(success, message);
    }
}

impl fmt::Debug for PendingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingJob")
            .field("payload", &self.payload)
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    Queued,
    Executing,
}

struct Slot {
    job: Option<PendingJob>,
    state: GatewayState,
}

/// Submitting side of the handoff
#[derive(Clone)]
pub struct ApplyGateway {
    slot: Arc<Mutex<Slot>>,
    wake_tx: mpsc::Sender<()>,
}

/// Executing side of the handoff; owned by the privileged context
pub struct ApplyRunner {
    slot: Arc<Mutex<Slot>>,
    wake_rx: mpsc::Receiver<()>,
}

impl ApplyGateway {
    /// Create a connected gateway and runner
    pub fn new() -> (Self, ApplyRunner) {
        let slot = Arc::new(Mutex::new(Slot {
            job: None,
            state: GatewayState::Idle,
        }));
        // One pending wake is enough: the runner always drains the whole slot
        let (wake_tx, wake_rx) = mpsc::channel(1);

        (
            Self {
                slot: slot.clone(),
                wake_tx,
            },
            ApplyRunner { slot, wake_rx },
        )
    }

    /// Park a job, replacing any job that has not started yet
    pub fn submit(&self, job: PendingJob) {
        debug!(
            path = ?job.payload.path,
            family = %job.payload.display_name,
            interactive = job.interactive,
            "Queueing load job"
        );

        let displaced = {
            let mut slot = lock(&self.slot);
            let displaced = slot.job.replace(job);
            if slot.state == GatewayState::Idle {
                slot.state = GatewayState::Queued;
            }
            displaced
        };

        if let Some(job) = displaced {
            warn!(family = %job.payload.display_name, "Pending load job superseded before it ran");
            job.complete(false, SUPERSEDED_MESSAGE.to_string());
        }
    }

    /// Wake the runner. Returns `false` if the runner is gone, in which case
    /// the parked job is failed immediately.
    pub fn signal(&self) -> bool {
        match self.wake_tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("Runner wake already pending");
                true
            }
            Err(TrySendError::Closed(())) => {
                error!("Apply runner has stopped, failing pending job");
                let orphan = {
                    let mut slot = lock(&self.slot);
                    slot.state = GatewayState::Idle;
                    slot.job.take()
                };
                if let Some(job) = orphan {
                    job.complete(false, RUNNER_GONE_MESSAGE.to_string());
                }
                false
            }
        }
    }

    pub fn state(&self) -> GatewayState {
        lock(&self.slot).state
    }
}

impl ApplyRunner {
    /// Run jobs on the current thread until every gateway handle is dropped.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_blocking<H: Host>(mut self, host: &mut H) {
        info!("Apply runner started");
        while self.wake_rx.blocking_recv().is_some() {
            self.execute_pending(host);
        }
        info!("Apply runner stopped");
    }

    /// Async version of [`ApplyRunner::run_blocking`] for hosts driven by a
    /// single-threaded executor
    pub async fn run<H: Host>(mut self, host: &mut H) {
        info!("Apply runner started");
        while self.wake_rx.recv().await.is_some() {
            self.execute_pending(host);
        }
        info!("Apply runner stopped");
    }

    /// For hosts with their own event loop: run the parked job if a wake
    /// arrived since the last call. Never blocks.
    pub fn poll<H: Host>(&mut self, host: &mut H) -> bool {
        let mut woken = false;
        while self.wake_rx.try_recv().is_ok() {
            woken = true;
        }
        woken && self.execute_pending(host)
    }

    /// Take the parked job, apply it and report the outcome. Returns `false`
    /// if the slot was empty.
    pub fn execute_pending<H: Host>(&mut self, host: &mut H) -> bool {
        let job = {
            let mut slot = lock(&self.slot);
            let job = slot.job.take();
            if job.is_some() {
                slot.state = GatewayState::Executing;
            }
            job
        };

        let Some(job) = job else {
            debug!("Runner woken without a pending job");
            return false;
        };

        info!(
            path = ?job.payload.path,
            family = %job.payload.display_name,
            interactive = job.interactive,
            "Executing load job"
        );

        let payload = job.payload.clone();
        let interactive = job.interactive;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            apply_job(host, &payload, interactive)
        }))
        .unwrap_or_else(|panic| {
            let reason = panic_message(panic.as_ref());
            error!(family = %payload.display_name, reason = %reason, "Host panicked while loading family");
            Err(LoaderError::Apply(format!("Load failed: {}", reason)))
        });

        let (success, message) = match result {
            Ok(message) => (true, message),
            Err(e) => (false, e.to_string()),
        };
        info!(success, message = %message, "Load job finished");

        {
            let mut slot = lock(&self.slot);
            slot.state = if slot.job.is_some() {
                GatewayState::Queued
            } else {
                GatewayState::Idle
            };
        }

        job.complete(success, message);
        true
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Load the family inside a transaction. Failures before the transaction is
/// opened are environment errors; failures inside it roll back first.
fn apply_job<H: Host>(
    host: &mut H,
    payload: &JobPayload,
    interactive: bool,
) -> Result<String, LoaderError> {
    let Some(HostSession { document, prompt }) = host.session() else {
        warn!("No active document to load into");
        return Err(LoaderError::Environment("No active document".to_string()));
    };

    if !payload.path.is_file() {
        warn!(path = ?payload.path, "Family file not found");
        return Err(LoaderError::Environment(format!(
            "File not found: {}",
            payload.path.display()
        )));
    }

    let mut transaction = Transaction::start(document, TRANSACTION_NAME).map_err(|e| {
        LoaderError::Environment(format!("Could not start transaction: {}", e))
    })?;

    let request = LoadRequest {
        path: &payload.path,
        family_name: &payload.display_name,
    };
    let mut options = JobLoadOptions::new(interactive, prompt);

    match transaction.document().load_family(&request, &mut options) {
        Ok(LoadOutcome::Loaded { family_name }) => {
            transaction.commit().map_err(commit_failed)?;
            Ok(format!(
                "Family '{}' loaded successfully",
                pick_name(payload, &family_name)
            ))
        }
        Ok(LoadOutcome::Updated { family_name }) => {
            transaction.commit().map_err(commit_failed)?;
            Ok(format!("Family '{}' updated", pick_name(payload, &family_name)))
        }
        Ok(LoadOutcome::Declined) => {
            transaction.roll_back();
            info!(family = %payload.display_name, "Load cancelled by user");
            Err(LoaderError::Apply("Load cancelled".to_string()))
        }
        Err(e) => {
            transaction.roll_back();
            warn!(family = %payload.display_name, error = %e, "Family load failed");
            Err(LoaderError::Apply(format!("Load failed: {}", e)))
        }
    }
}

fn commit_failed(e: HostError) -> LoaderError {
    LoaderError::Apply(format!("Load failed: could not commit: {}", e))
}

fn pick_name<'a>(payload: &'a JobPayload, host_name: &'a str) -> &'a str {
    if payload.display_name.trim().is_empty() {
        host_name
    } else {
        &payload.display_name
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "host panicked".to_string()
    }
}

/// Open host transaction; rolled back on drop unless committed
struct Transaction<'a, D: HostDocument> {
    document: &'a mut D,
    open: bool,
}

impl<'a, D: HostDocument> Transaction<'a, D> {
    fn start(document: &'a mut D, name: &str) -> Result<Self, HostError> {
        document.begin_transaction(name)?;
        debug!(name, "Transaction started");
        Ok(Self {
            document,
            open: true,
        })
    }

    fn document(&mut self) -> &mut D {
        &mut *self.document
    }

    fn commit(mut self) -> Result<(), HostError> {
        self.document.commit_transaction()?;
        self.open = false;
        debug!("Transaction committed");
        Ok(())
    }

    fn roll_back(mut self) {
        self.open = false;
        match self.document.rollback_transaction() {
            Ok(()) => debug!("Transaction rolled back"),
            Err(e) => warn!(error = %e, "Failed to roll back transaction"),
        }
    }
}

impl<D: HostDocument> Drop for Transaction<'_, D> {
    fn drop(&mut self) {
        if self.open {
            warn!("Rolling back unfinished transaction");
            if let Err(e) = self.document.rollback_transaction() {
                warn!(error = %e, "Failed to roll back transaction");
            }
        }
    }
}
