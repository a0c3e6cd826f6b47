//! The hand-off point between HTTP submitters and the single inference worker.
//!
//! One [`parking_lot::Mutex`] guards the pending queue, the job store and the
//! in-flight marker together. A [`parking_lot::Condvar`] wakes the worker when
//! a job arrives; lock hold times never span an inference call.

use super::error::SchedulerError;
use super::id_alloc::IdAllocator;
use super::job::{Job, JobId, JobRequest, JobResult};
use super::queue::{PriorityQueue, QueueEntry};
use super::store::JobStore;
use super::{
    Completion, GatewaySnapshot, JobSource, JobState, JobView, PromptScheduler, PulledJob,
    SubmitReceipt, Totals,
};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Limits applied at admission time.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Longest prompt, in characters, that will be queued.
    pub max_context_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_context_size: 2048,
        }
    }
}

struct Inner {
    queue: PriorityQueue,
    store: JobStore,
    allocator: IdAllocator,
    in_flight: Option<JobId>,
    next_sequence: u64,
    totals: Totals,
    closed: bool,
}

pub struct SchedulerGateway {
    inner: Mutex<Inner>,
    job_ready: Condvar,
    started: Instant,
    config: GatewayConfig,
}

impl SchedulerGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_allocator(config, IdAllocator::new())
    }

    pub fn with_allocator(config: GatewayConfig, allocator: IdAllocator) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: PriorityQueue::new(),
                store: JobStore::new(),
                allocator,
                in_flight: None,
                next_sequence: 0,
                totals: Totals::default(),
                closed: false,
            }),
            job_ready: Condvar::new(),
            started: Instant::now(),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Admits a job, or rejects it outright when the prompt is too long.
    pub fn submit(&self, request: JobRequest) -> Result<SubmitReceipt, SchedulerError> {
        let len = request.prompt.chars().count();
        if len > self.config.max_context_size {
            return Err(SchedulerError::Rejected {
                len,
                max: self.config.max_context_size,
            });
        }

        let submitted_at = self.started.elapsed().as_millis() as u64;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let store = &inner.store;
        let id = inner.allocator.allocate(|candidate| store.contains(candidate));
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let job = Job {
            id,
            prompt: request.prompt,
            model: request.model,
            priority: request.priority,
            mirostat: request.mirostat,
            remote_addr: request.remote_addr,
            submitted_at,
            sequence,
            queued_at: Utc::now(),
            result: None,
        };
        let entry = QueueEntry {
            id,
            priority: job.priority,
            submitted_at,
            sequence,
        };

        if let Err(e) = inner.store.insert(job) {
            error!("allocator handed out an id already in use: {e}");
            return Err(e);
        }
        inner.queue.push(entry);
        inner.totals.submitted += 1;

        let position = inner.queue.position_of(id).unwrap_or_default();
        drop(guard);
        self.job_ready.notify_one();

        info!(
            "Queued prompt request, id: {id}, priority: {}, position: {position}",
            entry.priority
        );
        Ok(SubmitReceipt { id, position })
    }

    /// Blocks until a job is pending, then hands it to the caller as the
    /// in-flight job. Returns `None` once the gateway is closed.
    ///
    /// Callers must `complete` the previous job before pulling again.
    pub fn pull(&self) -> Result<Option<PulledJob>, SchedulerError> {
        let mut guard = self.inner.lock();
        loop {
            if guard.closed {
                return Ok(None);
            }
            if !guard.queue.is_empty() {
                return Self::take_next(&mut guard);
            }
            self.job_ready.wait(&mut guard);
        }
    }

    /// Like [`pull`](Self::pull) but gives up after `timeout`.
    pub fn pull_timeout(&self, timeout: Duration) -> Result<Option<PulledJob>, SchedulerError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();
        loop {
            if guard.closed {
                return Ok(None);
            }
            if !guard.queue.is_empty() {
                return Self::take_next(&mut guard);
            }
            if self.job_ready.wait_until(&mut guard, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    fn take_next(inner: &mut Inner) -> Result<Option<PulledJob>, SchedulerError> {
        let entry = inner.queue.pop()?;
        let Some(job) = inner.store.get(entry.id) else {
            error!("queued job {} has no record in the store", entry.id);
            return Err(SchedulerError::UnknownJob(entry.id));
        };
        if let Some(previous) = inner.in_flight {
            error!("pulled job {} while job {previous} was still in flight", entry.id);
        }
        inner.in_flight = Some(entry.id);
        debug!("job {} is now in flight", entry.id);
        Ok(Some(PulledJob {
            id: entry.id,
            prompt: job.prompt.clone(),
            model: job.model.clone(),
            priority: job.priority,
            mirostat: job.mirostat,
        }))
    }

    /// Records the result of the in-flight job. A no-op when nothing is in
    /// flight, which is the worker's first iteration.
    pub fn complete(&self, completion: Completion) -> Result<Option<JobId>, SchedulerError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(id) = inner.in_flight else {
            return Ok(None);
        };

        let result = JobResult {
            response: completion.response,
            elapsed_ms: completion.elapsed_ms,
            tokens: completion.tokens,
            completed_at: Utc::now(),
        };
        if let Err(e) = inner.store.complete(id, result) {
            error!("in-flight job vanished from the store: {e}");
            return Err(e);
        }
        inner.in_flight = None;
        inner.totals.completed += 1;
        inner.totals.elapsed_ms += completion.elapsed_ms;
        inner.totals.tokens += completion.tokens;
        debug!("job {id} completed");
        Ok(Some(id))
    }

    /// Status of `id` as a poller sees it; `None` for unknown ids.
    pub fn query(&self, id: JobId) -> Option<JobView> {
        let guard = self.inner.lock();
        let job = guard.store.get(id)?;
        let state = match &job.result {
            Some(result) => JobState::Complete(result.clone()),
            None => JobState::Pending {
                position: guard.queue.position_of(id),
            },
        };
        Some(JobView {
            id,
            prompt: job.prompt.clone(),
            model: job.model.clone(),
            priority: job.priority,
            queued_at: job.queued_at,
            state,
        })
    }

    /// Detached view of the queue, the store and the totals.
    pub fn snapshot(&self) -> GatewaySnapshot {
        let guard = self.inner.lock();
        GatewaySnapshot {
            queue: guard.queue.snapshot_ordered(),
            jobs: guard.store.snapshot(),
            totals: guard.totals.clone(),
            in_flight: guard.in_flight,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn in_flight(&self) -> Option<JobId> {
        self.inner.lock().in_flight
    }

    /// Wakes any blocked `pull`, which then returns `Ok(None)`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.job_ready.notify_all();
    }
}

impl PromptScheduler for SchedulerGateway {
    fn submit(&self, request: JobRequest) -> Result<SubmitReceipt, SchedulerError> {
        SchedulerGateway::submit(self, request)
    }

    fn query(&self, id: JobId) -> Option<JobView> {
        SchedulerGateway::query(self, id)
    }

    fn snapshot(&self) -> GatewaySnapshot {
        SchedulerGateway::snapshot(self)
    }
}

impl JobSource for SchedulerGateway {
    fn pull(&self) -> Result<Option<PulledJob>, SchedulerError> {
        SchedulerGateway::pull(self)
    }

    fn complete(&self, completion: Completion) -> Result<Option<JobId>, SchedulerError> {
        SchedulerGateway::complete(self, completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::Priority;
    use std::sync::Arc;
    use std::thread;

    fn gateway(max: usize) -> SchedulerGateway {
        SchedulerGateway::with_allocator(
            GatewayConfig {
                max_context_size: max,
            },
            IdAllocator::with_seed(1),
        )
    }

    fn submit(gw: &SchedulerGateway, prompt: &str, priority: Priority) -> JobId {
        gw.submit(JobRequest::new(prompt, "default").with_priority(priority))
            .unwrap()
            .id
    }

    fn done(response: &str, elapsed_ms: f64, tokens: u64) -> Completion {
        Completion {
            response: response.to_string(),
            elapsed_ms,
            tokens,
        }
    }

    #[test]
    fn test_pull_order_high_first_then_fifo() {
        let gw = gateway(64);
        let a = submit(&gw, "a", Priority::Normal);
        let b = submit(&gw, "b", Priority::High);
        let c = submit(&gw, "c", Priority::Normal);

        let mut order = Vec::new();
        for _ in 0..3 {
            let job = gw.pull_timeout(Duration::from_millis(10)).unwrap().unwrap();
            order.push(job.id);
            gw.complete(done("ok", 1.0, 1)).unwrap();
        }
        assert_eq!(order, vec![b, a, c]);
    }

    #[test]
    fn test_high_after_many_pending_is_pulled_first() {
        let gw = gateway(64);
        for i in 0..10 {
            let p = if i % 2 == 0 { Priority::Low } else { Priority::Normal };
            submit(&gw, "filler", p);
        }
        let urgent = submit(&gw, "urgent", Priority::High);
        assert_eq!(gw.pull().unwrap().unwrap().id, urgent);
    }

    #[test]
    fn test_submit_reports_position() {
        let gw = gateway(64);
        let first = gw.submit(JobRequest::new("x", "m")).unwrap();
        let second = gw.submit(JobRequest::new("y", "m")).unwrap();
        let urgent = gw
            .submit(JobRequest::new("z", "m").with_priority(Priority::High))
            .unwrap();
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(urgent.position, 0);
    }

    #[test]
    fn test_admission_boundary() {
        let gw = gateway(8);
        assert!(gw.submit(JobRequest::new("12345678", "m")).is_ok());
        assert_eq!(gw.queue_len(), 1);

        let err = gw.submit(JobRequest::new("123456789", "m")).unwrap_err();
        assert_eq!(err, SchedulerError::Rejected { len: 9, max: 8 });
        assert_eq!(gw.queue_len(), 1);
        assert_eq!(gw.snapshot().totals.submitted, 1);
        assert_eq!(gw.snapshot().jobs.len(), 1);
    }

    #[test]
    fn test_round_trip() {
        let gw = gateway(64);
        let id = submit(&gw, "hello", Priority::Normal);

        let pulled = gw.pull().unwrap().unwrap();
        assert_eq!(pulled.id, id);
        assert_eq!(pulled.prompt, "hello");
        assert_eq!(gw.complete(done("world", 50.0, 5)).unwrap(), Some(id));

        let view = gw.query(id).unwrap();
        match view.state {
            JobState::Complete(result) => {
                assert_eq!(result.response, "world");
                assert_eq!(result.tokens, 5);
                assert_eq!(result.ms_per_token(), Some(10.0));
            }
            other => panic!("expected complete, got {other:?}"),
        }

        assert_eq!(gw.query(id), gw.query(id));
    }

    #[test]
    fn test_query_in_flight_has_no_position() {
        let gw = gateway(64);
        let id = submit(&gw, "p", Priority::Normal);
        assert!(matches!(
            gw.query(id).unwrap().state,
            JobState::Pending { position: Some(0) }
        ));
        gw.pull().unwrap().unwrap();
        assert!(matches!(
            gw.query(id).unwrap().state,
            JobState::Pending { position: None }
        ));
        assert_eq!(gw.in_flight(), Some(id));
    }

    #[test]
    fn test_query_unknown() {
        let gw = gateway(64);
        assert!(gw.query(JobId::new(0x1234)).is_none());
    }

    #[test]
    fn test_complete_without_in_flight_is_noop() {
        let gw = gateway(64);
        assert_eq!(gw.complete(done("", 0.0, 0)).unwrap(), None);
        assert_eq!(gw.snapshot().totals.completed, 0);
    }

    #[test]
    fn test_totals_accumulate() {
        let gw = gateway(64);
        submit(&gw, "a", Priority::Normal);
        submit(&gw, "b", Priority::Normal);
        gw.pull().unwrap().unwrap();
        gw.complete(done("1", 10.0, 2)).unwrap();
        gw.pull().unwrap().unwrap();
        gw.complete(done("2", 5.0, 3)).unwrap();

        let totals = gw.snapshot().totals;
        assert_eq!(totals.submitted, 2);
        assert_eq!(totals.completed, 2);
        assert_eq!(totals.tokens, 5);
        assert_eq!(totals.elapsed_ms, 15.0);
    }

    #[test]
    fn test_pull_blocks_until_submit() {
        let gw = Arc::new(gateway(64));
        let worker = {
            let gw = gw.clone();
            thread::spawn(move || gw.pull().unwrap().map(|j| j.prompt))
        };
        thread::sleep(Duration::from_millis(20));
        submit(&gw, "wake up", Priority::Low);
        assert_eq!(worker.join().unwrap().as_deref(), Some("wake up"));
    }

    #[test]
    fn test_close_releases_blocked_pull() {
        let gw = Arc::new(gateway(64));
        let worker = {
            let gw = gw.clone();
            thread::spawn(move || gw.pull().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        gw.close();
        assert!(worker.join().unwrap().is_none());
    }

    #[test]
    fn test_pull_timeout_on_empty_queue() {
        let gw = gateway(64);
        assert!(gw.pull_timeout(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn test_orphaned_queue_entry_is_not_a_shutdown() {
        let gw = gateway(64);
        submit(&gw, "a", Priority::Normal);
        let orphan = JobId::new(0xdead);
        gw.inner.lock().queue.push(QueueEntry {
            id: orphan,
            priority: Priority::High,
            submitted_at: 0,
            sequence: u64::MAX,
        });

        let err = JobSource::next_job(&gw, None).unwrap_err();
        assert_eq!(err, SchedulerError::UnknownJob(orphan));
        assert!(err.is_invariant_violation());
        assert_eq!(gw.queue_len(), 1);
        assert!(gw.in_flight().is_none());
    }

    #[test]
    fn test_concurrent_submitters_lose_nothing() {
        let gw = Arc::new(gateway(64));
        let submitters: Vec<_> = (0..8)
            .map(|t| {
                let gw = gw.clone();
                thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            gw.submit(JobRequest::new(format!("{t}-{i}"), "m"))
                                .unwrap()
                                .id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut submitted: Vec<JobId> = submitters
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let mut pulled = Vec::new();
        while let Ok(Some(job)) = gw.pull_timeout(Duration::from_millis(5)) {
            pulled.push(job.id);
            gw.complete(done("ok", 1.0, 1)).unwrap();
        }
        submitted.sort();
        pulled.sort();
        assert_eq!(submitted.len(), 200);
        assert_eq!(pulled, submitted);
    }
}
