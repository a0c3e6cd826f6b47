use super::error::SchedulerError;
use super::job::{Job, JobId, JobResult};
use ahash::AHashMap;

/// Authoritative map from job id to job record.
///
/// Records are never removed; a finished job stays queryable for the life of
/// the process.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: AHashMap<JobId, Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Adds a pending job. Existing records are never overwritten.
    pub fn insert(&mut self, job: Job) -> Result<(), SchedulerError> {
        if self.jobs.contains_key(&job.id) {
            return Err(SchedulerError::DuplicateId(job.id));
        }
        self.jobs.insert(job.id, job);
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Attaches the worker's result to `id`.
    pub fn complete(&mut self, id: JobId, result: JobResult) -> Result<&Job, SchedulerError> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownJob(id))?;
        if job.result.is_some() {
            tracing::warn!("job {id} already had a result, keeping the first one");
        } else {
            job.result = Some(result);
        }
        Ok(job)
    }

    /// Detached copy of every record, oldest submission first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.sequence);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
