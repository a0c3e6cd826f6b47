//! The single inference worker.
//!
//! [`WorkerLoop`] owns an [`Engine`] and drives it strictly serially: each
//! iteration reports the previous result and pulls the next job in one call
//! to the [`JobSource`].

use crate::scheduler::{Completion, JobSource, PulledJob, SchedulerError};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Output of one inference run.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub response: String,
    pub elapsed_ms: f64,
    pub tokens: u64,
}

/// Anything that can turn a pulled job into a response.
pub trait Engine: Send {
    fn infer(&mut self, job: &PulledJob) -> Result<Inference>;
}

/// Returns the prompt unchanged. Useful for smoke-testing the gateway.
#[derive(Debug, Default)]
pub struct EchoEngine;

impl Engine for EchoEngine {
    fn infer(&mut self, job: &PulledJob) -> Result<Inference> {
        let start = Instant::now();
        let response = job.prompt.clone();
        Ok(Inference {
            tokens: count_tokens(&response),
            response,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

/// Runs an external program per job: prompt on stdin, response on stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: &str, args: Vec<String>) -> Result<Self> {
        let program =
            which::which(program).with_context(|| format!("engine program `{program}` not found"))?;
        Ok(Self { program, args })
    }
}

impl Engine for CommandEngine {
    fn infer(&mut self, job: &PulledJob) -> Result<Inference> {
        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PROMPT_GATEWAY_MODEL", &job.model)
            .env(
                "PROMPT_GATEWAY_MIROSTAT",
                job.mirostat.unwrap_or_default().to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        let mut stdin = child.stdin.take().context("engine stdin was not captured")?;
        let prompt = job.prompt.as_bytes();
        // stdin is fed from its own thread so a chatty engine cannot fill the
        // stdout pipe while we are still blocked writing the prompt.
        let output = std::thread::scope(|scope| -> Result<std::process::Output> {
            let writer = scope.spawn(move || stdin.write_all(prompt));
            let output = child.wait_with_output()?;
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    warn!("engine closed stdin before reading the whole prompt");
                }
                Ok(Err(e)) => return Err(e).context("failed to write prompt to engine"),
                Err(_) => anyhow::bail!("prompt writer thread panicked"),
            }
            Ok(output)
        })?;
        if !output.status.success() {
            anyhow::bail!("engine exited with {}", output.status);
        }
        let response = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(Inference {
            tokens: count_tokens(&response),
            response,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

fn count_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

pub struct WorkerLoop<E: Engine> {
    source: Arc<dyn JobSource>,
    engine: E,
}

impl<E: Engine> WorkerLoop<E> {
    pub fn new(source: Arc<dyn JobSource>, engine: E) -> Self {
        Self { source, engine }
    }

    /// Runs until the source shuts down. An `Err` means the scheduler broke
    /// an invariant and the process should not continue.
    pub fn run(mut self) -> Result<(), SchedulerError> {
        let mut previous: Option<Completion> = None;
        loop {
            let job = match self.source.next_job(previous.take()) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    info!("Job source closed, worker exiting");
                    return Ok(());
                }
                Err(e) => {
                    error!("worker loop aborted: {e}");
                    return Err(e);
                }
            };

            info!(
                "Prompting with job {} (model {}, priority {})",
                job.id, job.model, job.priority
            );
            let completion = match self.engine.infer(&job) {
                Ok(out) => Completion {
                    response: out.response,
                    elapsed_ms: out.elapsed_ms,
                    tokens: out.tokens,
                },
                Err(e) => {
                    warn!("engine failed on job {}: {e:#}", job.id);
                    Completion {
                        response: String::new(),
                        elapsed_ms: 0.0,
                        tokens: 0,
                    }
                }
            };
            info!(
                "Response to job {}: {} tokens in {:.1} ms",
                job.id, completion.tokens, completion.elapsed_ms
            );
            previous = Some(completion);
        }
    }
}

/// Starts `WorkerLoop::run` on its own OS thread.
pub fn spawn_worker<E: Engine + 'static>(
    source: Arc<dyn JobSource>,
    engine: E,
) -> std::io::Result<std::thread::JoinHandle<Result<(), SchedulerError>>> {
    std::thread::Builder::new()
        .name("inference-worker".to_string())
        .spawn(move || WorkerLoop::new(source, engine).run())
}
