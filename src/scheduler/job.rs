//! Job records tracked by the gateway.
//!
//! A [`Job`] is created at submission, receives its [`JobResult`] exactly once
//! from the worker, and is never removed for the life of the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of a submitted job.
///
/// Zero is reserved to mean "no job" and is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub const NONE: JobId = JobId(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(JobId)
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Scheduling class of a job. Higher classes are pulled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Numeric weight of the class.
    pub fn weight(&self) -> i16 {
        match self {
            Priority::Low => -128,
            Priority::Normal => 0,
            Priority::High => 128,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight().cmp(&other.weight())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "LOW"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::High => write!(f, "HIGH"),
        }
    }
}

/// Everything a submitter provides for a new job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Prompt text, already wrapped with any pre/post strings.
    pub prompt: String,
    pub model: String,
    pub remote_addr: String,
    pub priority: Priority,
    pub mirostat: Option<u32>,
}

impl JobRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            remote_addr: String::new(),
            priority: Priority::Normal,
            mirostat: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = remote_addr.into();
        self
    }

    #[must_use]
    pub fn with_mirostat(mut self, mirostat: Option<u32>) -> Self {
        self.mirostat = mirostat;
        self
    }
}

/// Output attached to a job by the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub response: String,
    pub elapsed_ms: f64,
    pub tokens: u64,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    /// Milliseconds per generated token, or `None` when no tokens were produced.
    pub fn ms_per_token(&self) -> Option<f64> {
        if self.tokens == 0 {
            None
        } else {
            Some(self.elapsed_ms / self.tokens as f64)
        }
    }
}

/// A submitted job and, once the worker is done with it, its result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub model: String,
    pub priority: Priority,
    pub mirostat: Option<u32>,
    pub remote_addr: String,
    /// Milliseconds since the gateway started; tie-break only.
    pub submitted_at: u64,
    #[serde(skip)]
    pub sequence: u64,
    pub queued_at: DateTime<Utc>,
    pub result: Option<JobResult>,
}

impl Job {
    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }
}
