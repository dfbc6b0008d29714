//! Per-job status record.

use tokio::sync::watch;
use vidscan_models::JobStatus;

/// Latest status of one job.
///
/// The status is swapped as a whole record; readers get a snapshot and never
/// see a half-written update. Only the latest value is kept.
#[derive(Debug)]
pub struct JobStateStore {
    tx: watch::Sender<JobStatus>,
}

impl Default for JobStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobStatus::idle());
        Self { tx }
    }

    /// Replace the status.
    pub fn set(&self, status: JobStatus) {
        self.tx.send_replace(status);
    }

    /// Snapshot of the current status.
    pub fn get(&self) -> JobStatus {
        self.tx.borrow().clone()
    }

    pub fn reset(&self) {
        self.set(JobStatus::idle());
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let store = JobStateStore::new();
        assert_eq!(store.get(), JobStatus::idle());
    }

    #[test]
    fn test_set_replaces_whole_record() {
        let store = JobStateStore::new();
        store.set(JobStatus::processing(3, Some(10)));
        store.set(JobStatus::error("boom"));
        assert_eq!(store.get(), JobStatus::error("boom"));

        store.reset();
        assert_eq!(store.get(), JobStatus::idle());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let store = JobStateStore::new();
        let mut rx = store.subscribe();

        store.set(JobStatus::processing(1, None));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_processing());
    }
}
