/// Process-wide single-job slot.
///
/// At most one mining job holds the slot. A second `try_acquire` fails
/// immediately with the active job's id instead of queueing. The slot is
/// released when the returned guard drops, which covers success, error,
/// panic and a dropped future alike.
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::MiningError;

#[derive(Debug, Clone, Default)]
pub struct JobSlot {
    active: Arc<Mutex<Option<String>>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, job_id: &str) -> Result<JobGuard, MiningError> {
        // The slot only holds an id, so a poisoned lock is still consistent
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            return Err(MiningError::Busy {
                active_job_id: current.clone(),
            });
        }
        *active = Some(job_id.to_string());
        debug!("Job slot acquired by {job_id}");

        Ok(JobGuard {
            slot: self.active.clone(),
            job_id: job_id.to_string(),
        })
    }

    pub fn active_job(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_busy(&self) -> bool {
        self.active_job().is_some()
    }
}

/// Holds the [`JobSlot`] until dropped.
#[derive(Debug)]
pub struct JobGuard {
    slot: Arc<Mutex<Option<String>>>,
    job_id: String,
}

impl JobGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut active = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_deref() == Some(self.job_id.as_str()) {
            *active = None;
            debug!("Job slot released by {}", self.job_id);
        }
    }
}
