//! Priority admission queue in front of a single exclusive inference worker.
//!
//! Submitters post prompts over HTTP; [`scheduler::SchedulerGateway`] queues
//! them by priority and hands them one at a time to the worker thread in
//! [`worker`]. Results stay queryable by id for the life of the process.

pub mod auth;
pub mod config;
pub mod http_responses;
pub mod routes;
pub mod runtime;
pub mod scheduler;
pub mod worker;

pub use auth::{AuthLevel, Authorizer, KeyRing};
pub use routes::{build_router, AppState};
pub use scheduler::{GatewayConfig, JobSource, PromptScheduler, SchedulerGateway};
