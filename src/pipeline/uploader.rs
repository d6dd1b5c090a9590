//! Uploader stage - runs symupload for each artifact and endpoint
//!
//! Every artifact is uploaded to every configured endpoint, one endpoint at
//! a time. Each (artifact, endpoint) pair gets a bounded number of attempts;
//! a pair that exhausts them is logged and the worker moves on.

use crate::error::{UploadOutcome, WorkerError};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::queue::{StageQueue, StageReceiver};
use crate::pipeline::StageContext;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, warn};

/// Upload one artifact to one endpoint, retrying failed attempts.
///
/// Sleeps `retry_delay` between attempts only, never after the last one.
/// Stops early, reporting failure, once shutdown has been requested.
pub fn upload_with_retry(ctx: &StageContext, artifact: &Path, endpoint: &str) -> UploadOutcome {
    let max_attempts = ctx.config.upload_attempts.max(1);
    let args = [artifact.as_os_str().to_os_string(), OsString::from(endpoint)];
    let mut last_error = String::new();
    let mut attempts = 0;

    while attempts < max_attempts {
        if attempts > 0 {
            if ctx.is_shutdown() {
                break;
            }
            thread::sleep(ctx.config.retry_delay);
        }

        attempts += 1;
        ctx.stats.record_upload_attempt();

        match ctx.executor.execute(&ctx.config.symupload, &args, None) {
            Ok(output) if output.success => return UploadOutcome::Uploaded { attempts },
            Ok(output) => {
                last_error = if output.output.is_empty() {
                    output.status_string()
                } else {
                    format!("{}: {}", output.status_string(), output.output)
                };
            }
            Err(e) => last_error = e.to_string(),
        }

        warn!(
            path = %artifact.display(),
            endpoint = endpoint,
            attempt = attempts,
            error = %last_error,
            "symupload attempt failed"
        );
    }

    UploadOutcome::Failed {
        attempts,
        last_error,
    }
}

fn upload_loop(ctx: StageContext, artifacts: StageReceiver<PathBuf>) {
    for artifact in artifacts {
        for endpoint in &ctx.config.endpoints {
            if ctx.is_shutdown() {
                break;
            }

            let outcome = upload_with_retry(&ctx, &artifact, endpoint);
            ctx.stats.record_upload(outcome.is_success());

            match outcome {
                UploadOutcome::Uploaded { attempts } => info!(
                    path = %artifact.display(),
                    endpoint = %endpoint,
                    attempts = attempts,
                    "Uploaded symbol file"
                ),
                UploadOutcome::Failed {
                    attempts,
                    last_error,
                } => warn!(
                    path = %artifact.display(),
                    endpoint = %endpoint,
                    attempts = attempts,
                    error = %last_error,
                    "Upload failed after all attempts"
                ),
            }
        }
    }
}

/// Running uploader stage
pub struct Uploader {
    pool: WorkerPool,
}

impl Uploader {
    /// Start the uploader pool reading from `artifacts`
    pub fn start(ctx: &StageContext, artifacts: &StageQueue<PathBuf>) -> Result<Self, WorkerError> {
        let pool = WorkerPool::start("uploader", ctx.config.upload_workers, |_| {
            let ctx = ctx.clone();
            let receiver = artifacts.receiver();
            move || upload_loop(ctx, receiver)
        })?;

        info!(
            workers = pool.len(),
            endpoints = ctx.config.endpoints.len(),
            "Uploader started"
        );
        Ok(Self { pool })
    }

    /// Block until the artifact queue is closed and drained and every
    /// uploader worker has returned
    pub fn wait(self) -> Vec<WorkerError> {
        let failures = self.pool.join();
        info!("Uploader complete");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, RunMode};
    use crate::exec::tests::FakeExecutor;
    use crate::exec::ExecOutput;
    use crate::pipeline::stats::PipelineStats;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn context(executor: FakeExecutor, endpoints: &[&str]) -> (StageContext, Arc<FakeExecutor>) {
        let executor = Arc::new(executor);
        let mut config = PipelineConfig::new(
            RunMode::UploadOnly {
                upload_from: PathBuf::from("/syms"),
            },
            "/tools",
        );
        config.endpoints = endpoints.iter().map(|e| e.to_string()).collect();
        config.upload_workers = 2;
        config.retry_delay = Duration::from_millis(10);
        let ctx = StageContext {
            config: Arc::new(config),
            executor: executor.clone(),
            stats: Arc::new(PipelineStats::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        (ctx, executor)
    }

    #[test]
    fn test_succeeds_on_third_attempt() {
        let (ctx, executor) = context(
            FakeExecutor::new(|_, previous| {
                if previous < 2 {
                    ExecOutput::failed(1, "server busy")
                } else {
                    ExecOutput::ok()
                }
            }),
            &["https://a.example/symbol"],
        );

        let started = Instant::now();
        let outcome = upload_with_retry(&ctx, Path::new("/syms/a.sym"), "https://a.example/symbol");

        assert_eq!(outcome, UploadOutcome::Uploaded { attempts: 3 });
        assert_eq!(executor.calls().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(20));

        let calls = executor.calls();
        assert_eq!(calls[0].program, "/tools/symupload");
        assert_eq!(calls[0].args, vec!["/syms/a.sym", "https://a.example/symbol"]);
    }

    #[test]
    fn test_gives_up_after_three_attempts() {
        let (ctx, executor) = context(
            FakeExecutor::new(|_, _| ExecOutput::failed(2, "rejected")),
            &["https://a.example/symbol"],
        );

        let outcome = upload_with_retry(&ctx, Path::new("/syms/a.sym"), "https://a.example/symbol");
        assert_eq!(
            outcome,
            UploadOutcome::Failed {
                attempts: 3,
                last_error: "exit status 2: rejected".into(),
            }
        );
        assert_eq!(executor.calls().len(), 3);
        assert_eq!(ctx.stats.upload_attempts.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_shutdown_stops_retrying() {
        let (ctx, executor) = context(
            FakeExecutor::new(|_, _| ExecOutput::failed(1, "busy")),
            &["https://a.example/symbol"],
        );
        ctx.shutdown.store(true, Ordering::SeqCst);

        let outcome = upload_with_retry(&ctx, Path::new("/syms/a.sym"), "https://a.example/symbol");
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(executor.calls().len(), 1);
    }

    #[test]
    fn test_every_artifact_goes_to_every_endpoint() {
        let (ctx, executor) = context(
            FakeExecutor::new(|call, _| {
                if call.args[0].ends_with("bad.sym") {
                    ExecOutput::failed(1, "rejected")
                } else {
                    ExecOutput::ok()
                }
            }),
            &["https://a.example/symbol", "https://b.example/symbol"],
        );

        let artifacts = StageQueue::new(4);
        let setup = artifacts.producer().unwrap();
        let uploader = Uploader::start(&ctx, &artifacts).unwrap();

        for name in ["one.sym", "bad.sym", "two.sym"] {
            setup.send(PathBuf::from("/syms").join(name)).unwrap();
        }
        setup.finish();
        assert!(uploader.wait().is_empty());

        // 2 good artifacts x 2 endpoints, plus 3 attempts x 2 endpoints for the bad one
        assert_eq!(executor.calls().len(), 4 + 6);

        let summary = ctx.stats.snapshot(Duration::ZERO);
        assert_eq!(summary.uploaded, 4);
        assert_eq!(summary.upload_failures, 2);
        assert_eq!(summary.upload_attempts, 10);
    }
}
