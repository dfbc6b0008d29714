//! Job registry with a single active slot.
//!
//! Each job gets its own [`JobStateStore`]. At most one job runs at a time;
//! a submission while another is running is rejected with
//! [`WorkerError::Busy`]. Finished jobs stay queryable until they fall out
//! of the history window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use vidscan_models::{JobId, JobStatus};

use crate::error::{WorkerError, WorkerResult};
use crate::state::JobStateStore;

/// Default number of jobs kept for status queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 16;

#[derive(Debug, Default)]
struct RegistryInner {
    jobs: HashMap<JobId, Arc<JobStateStore>>,
    /// Insertion order, oldest first
    order: VecDeque<JobId>,
    active: Option<JobId>,
}

impl RegistryInner {
    fn prune(&mut self, limit: usize) {
        while self.jobs.len() > limit {
            let Some(pos) = self
                .order
                .iter()
                .position(|id| self.active.as_ref() != Some(id))
            else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.jobs.remove(&id);
                debug!(job_id = %id, "Pruned job from history");
            }
        }
    }

    fn remove(&mut self, job_id: &JobId) {
        self.jobs.remove(job_id);
        self.order.retain(|id| id != job_id);
    }
}

/// Registry of video jobs keyed by [`JobId`].
#[derive(Debug)]
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
    history_limit: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl JobRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // The guarded data stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the active slot for a new job.
    ///
    /// The returned ticket releases the slot when dropped.
    pub fn try_begin(self: &Arc<Self>) -> WorkerResult<JobTicket> {
        let mut inner = self.lock();
        if let Some(active) = &inner.active {
            return Err(WorkerError::Busy(active.clone()));
        }

        let job_id = JobId::new();
        let store = Arc::new(JobStateStore::new());
        inner.jobs.insert(job_id.clone(), Arc::clone(&store));
        inner.order.push_back(job_id.clone());
        inner.active = Some(job_id.clone());
        inner.prune(self.history_limit);

        Ok(JobTicket {
            registry: Arc::clone(self),
            job_id,
            store,
        })
    }

    pub fn get(&self, job_id: &JobId) -> Option<Arc<JobStateStore>> {
        self.lock().jobs.get(job_id).cloned()
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.get(job_id).map(|store| store.get())
    }

    /// Most recently submitted job still in history.
    pub fn latest(&self) -> Option<(JobId, Arc<JobStateStore>)> {
        let inner = self.lock();
        let id = inner.order.back()?;
        inner.jobs.get(id).map(|store| (id.clone(), Arc::clone(store)))
    }

    /// Status of the latest job, or Idle when nothing was submitted.
    pub fn latest_status(&self) -> JobStatus {
        self.latest()
            .map(|(_, store)| store.get())
            .unwrap_or_else(JobStatus::idle)
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.lock().active.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, job_id: &JobId) {
        let mut inner = self.lock();
        if inner.active.as_ref() == Some(job_id) {
            inner.active = None;
        }
    }

    fn forget(&self, job_id: &JobId) {
        self.lock().remove(job_id);
    }
}

/// Ownership of the active slot for one job.
#[derive(Debug)]
pub struct JobTicket {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    store: Arc<JobStateStore>,
}

impl JobTicket {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn store(&self) -> &Arc<JobStateStore> {
        &self.store
    }

    /// Withdraw a job that never started, e.g. when the upload failed.
    ///
    /// The job disappears from the registry and the previous latest job
    /// becomes visible again.
    pub fn discard(self) {
        self.registry.forget(&self.job_id);
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        self.registry.release(&self.job_id);
    }
}
