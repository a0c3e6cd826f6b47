use super::job::JobId;

/// Errors raised by the scheduling core.
///
/// `Rejected` is the only one a client should ever see. The others mean the
/// allocator or the worker loop broke an invariant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("prompt of {len} characters exceeds the maximum context size of {max}")]
    Rejected { len: usize, max: usize },

    #[error("job id {0} is already present in the store")]
    DuplicateId(JobId),

    #[error("job id {0} is not present in the store")]
    UnknownJob(JobId),

    #[error("the pending queue is empty")]
    Empty,
}

impl SchedulerError {
    /// True for errors that indicate a bug rather than a client mistake.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateId(_) | SchedulerError::UnknownJob(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::Rejected { len: 10, max: 8 };
        assert!(err.to_string().contains("10 characters"));
        assert!(!err.is_invariant_violation());

        let err = SchedulerError::UnknownJob(JobId::new(0xab));
        assert!(err.to_string().contains("ab"));
        assert!(err.is_invariant_violation());
    }
}
