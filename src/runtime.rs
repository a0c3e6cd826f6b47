//! Read-only view of live scheduler state for the introspection endpoint.

use crate::auth::{Authorizer, KeyAuditLog};
use crate::scheduler::{GatewaySnapshot, JobId, Priority, PromptScheduler, Totals};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItem {
    pub id: JobId,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub prompt: String,
    pub model: String,
    pub priority: Priority,
    pub remote_addr: String,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    pub queue: Vec<QueuedItem>,
    pub jobs: BTreeMap<String, JobSummary>,
    pub totals: Totals,
    pub in_flight: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<BTreeMap<String, KeyAuditLog>>,
}

impl RuntimeSnapshot {
    pub fn capture(scheduler: &dyn PromptScheduler, auth: &dyn Authorizer) -> Self {
        Self::from_parts(scheduler.snapshot(), auth.audit())
    }

    pub fn from_parts(
        snapshot: GatewaySnapshot,
        keys: Option<BTreeMap<String, KeyAuditLog>>,
    ) -> Self {
        let queue = snapshot
            .queue
            .iter()
            .map(|e| QueuedItem {
                id: e.id,
                priority: e.priority,
            })
            .collect();
        let jobs = snapshot
            .jobs
            .into_iter()
            .map(|job| {
                let result = job.result.as_ref();
                let summary = JobSummary {
                    response: result.map(|r| r.response.clone()),
                    elapsed_ms: result.map(|r| r.elapsed_ms),
                    tokens: result.map(|r| r.tokens),
                    completed_at: result.map(|r| r.completed_at),
                    prompt: job.prompt,
                    model: job.model,
                    priority: job.priority,
                    remote_addr: job.remote_addr,
                    queued_at: job.queued_at,
                };
                (job.id.to_string(), summary)
            })
            .collect();
        Self {
            queue,
            jobs,
            totals: snapshot.totals,
            in_flight: snapshot.in_flight,
            keys,
        }
    }
}

/// Turns the `--runtime-path` setting into a route. `random` yields an
/// unguessable `/runtime-<hex>` path.
pub fn resolve_runtime_path(setting: &str) -> String {
    if setting == "random" {
        let suffix: u64 = rand::rng().random();
        return format!("/runtime-{suffix:016x}");
    }
    if setting.starts_with('/') {
        setting.to_string()
    } else {
        format!("/{setting}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthLevel, KeyRing};
    use crate::scheduler::{
        Completion, GatewayConfig, JobRequest, JobSource, SchedulerGateway,
    };

    #[test]
    fn test_capture_without_auth_omits_keys() {
        let gw = SchedulerGateway::new(GatewayConfig::default());
        gw.submit(JobRequest::new("a", "m").with_remote_addr("1.2.3.4"))
            .unwrap();
        let high = gw
            .submit(JobRequest::new("b", "m").with_priority(Priority::High))
            .unwrap();

        let snap = RuntimeSnapshot::capture(&gw, &KeyRing::disabled());
        assert!(snap.keys.is_none());
        assert_eq!(snap.queue.len(), 2);
        assert_eq!(snap.queue[0].id, high.id);
        assert_eq!(snap.totals.submitted, 2);

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("keys").is_none());
        assert_eq!(json["queue"][0]["priority"], "HIGH");
    }

    #[test]
    fn test_capture_reports_in_flight_and_results() {
        let gw = SchedulerGateway::new(GatewayConfig::default());
        let first = gw.submit(JobRequest::new("a", "m")).unwrap().id;
        gw.submit(JobRequest::new("b", "m")).unwrap();

        let keys = KeyRing::new(AuthLevel::All, vec!["secret-key".to_string()]).unwrap();

        JobSource::pull(&gw).unwrap().unwrap();
        let snap = RuntimeSnapshot::capture(&gw, &keys);
        assert_eq!(snap.in_flight, Some(first));
        assert_eq!(snap.queue.len(), 1);
        assert!(snap.keys.as_ref().unwrap().contains_key("secr…"));

        gw.complete(Completion {
            response: "done".to_string(),
            elapsed_ms: 4.0,
            tokens: 2,
        })
        .unwrap();
        let snap = RuntimeSnapshot::capture(&gw, &keys);
        let summary = snap.jobs.get(&first.to_string()).unwrap();
        assert_eq!(summary.response.as_deref(), Some("done"));
        assert_eq!(snap.totals.completed, 1);
        assert!(snap.in_flight.is_none());
    }

    #[test]
    fn test_resolve_runtime_path() {
        assert_eq!(resolve_runtime_path("status"), "/status");
        assert_eq!(resolve_runtime_path("/ops/state"), "/ops/state");
        let random = resolve_runtime_path("random");
        assert!(random.starts_with("/runtime-"));
        assert_eq!(random.len(), "/runtime-".len() + 16);
    }
}
