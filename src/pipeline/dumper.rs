//! Dumper stage - runs dump_syms for each extraction request
//!
//! Each worker owns one producer handle of the artifact queue (when an
//! uploader exists), so the artifact queue closes exactly when the last
//! dumper worker returns.

use crate::error::{DumpOutcome, WorkerError};
use crate::pipeline::finder::ExtractionRequest;
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::queue::{Producer, StageQueue, StageReceiver};
use crate::pipeline::StageContext;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extension of Breakpad symbol files
pub const SYMBOL_EXTENSION: &str = "sym";

/// Replaces path separators in artifact names
const PATH_DELIMITER: &str = "_";

/// Deterministic artifact file name for a request:
/// `<relative path with '/' replaced by '_'>_<arch>.sym`
pub fn artifact_name(relative: &str, arch: &str) -> String {
    format!(
        "{}{}{}.{}",
        relative.replace('/', PATH_DELIMITER),
        PATH_DELIMITER,
        arch,
        SYMBOL_EXTENSION
    )
}

/// Dump one request into `dump_dir`.
///
/// The output file is closed before this returns on every path, and
/// removed again if dump_syms fails.
pub fn dump_one(ctx: &StageContext, dump_dir: &Path, request: &ExtractionRequest) -> DumpOutcome {
    let artifact = dump_dir.join(artifact_name(&request.relative, &request.arch));

    let result = {
        let file = match File::create(&artifact) {
            Ok(file) => file,
            Err(e) => {
                return DumpOutcome::Failed {
                    reason: format!("creating '{}': {}", artifact.display(), e),
                }
            }
        };

        let args = [
            OsString::from("-a"),
            OsString::from(&request.arch),
            request.path.clone().into_os_string(),
        ];
        ctx.executor.execute(&ctx.config.dump_syms, &args, Some(&file))
    };

    let reason = match result {
        Ok(output) if output.success => {
            let bytes = fs::metadata(&artifact).map(|m| m.len()).unwrap_or(0);
            return DumpOutcome::Dumped { artifact, bytes };
        }
        Ok(output) if output.output.is_empty() => output.status_string(),
        Ok(output) => format!("{}: {}", output.status_string(), output.output),
        Err(e) => e.to_string(),
    };

    if let Err(e) = fs::remove_file(&artifact) {
        debug!(path = %artifact.display(), error = %e, "Failed to remove partial symbol file");
    }
    DumpOutcome::Failed { reason }
}

fn dump_loop(
    ctx: StageContext,
    dump_dir: PathBuf,
    requests: StageReceiver<ExtractionRequest>,
    artifacts: Option<Producer<PathBuf>>,
) {
    for request in requests {
        let outcome = if ctx.is_shutdown() {
            DumpOutcome::Skipped
        } else {
            dump_one(&ctx, &dump_dir, &request)
        };

        match outcome {
            DumpOutcome::Dumped { artifact, bytes } => {
                ctx.stats.record_dump(bytes);
                info!(
                    path = %request.relative,
                    arch = %request.arch,
                    bytes = bytes,
                    "Dumped symbols"
                );
                if let Some(artifacts) = &artifacts {
                    if artifacts.send(artifact).is_err() {
                        warn!("Artifact queue closed, dumper exiting");
                        return;
                    }
                }
            }
            DumpOutcome::Failed { reason } => {
                ctx.stats.record_dump_failure();
                warn!(
                    path = %request.path.display(),
                    arch = %request.arch,
                    error = %reason,
                    "dump_syms failed"
                );
            }
            DumpOutcome::Skipped => {
                debug!(path = %request.relative, arch = %request.arch, "Skipped, shutting down");
            }
        }
    }

    if let Some(artifacts) = artifacts {
        artifacts.finish();
    }
}

/// Running dumper stage
pub struct Dumper {
    pool: WorkerPool,
}

impl Dumper {
    /// Start the dumper pool reading from `requests`. When `artifacts` is
    /// given, one producer handle is registered per worker before this
    /// returns.
    pub fn start(
        ctx: &StageContext,
        dump_dir: PathBuf,
        requests: &StageQueue<ExtractionRequest>,
        artifacts: Option<&StageQueue<PathBuf>>,
    ) -> Result<Self, WorkerError> {
        let workers = ctx.config.dump_workers;
        let mut producers: Vec<Producer<PathBuf>> = artifacts
            .map(|queue| queue.producers(workers))
            .unwrap_or_default();

        let pool = WorkerPool::start("dumper", workers, |_| {
            let ctx = ctx.clone();
            let dump_dir = dump_dir.clone();
            let receiver = requests.receiver();
            let producer = producers.pop();
            move || dump_loop(ctx, dump_dir, receiver, producer)
        })?;

        info!(
            workers = pool.len(),
            output = %dump_dir.display(),
            upload = artifacts.is_some(),
            "Dumper started"
        );
        Ok(Self { pool })
    }

    /// Block until every dumper worker has returned. By then the artifact
    /// queue, if any, is closed.
    pub fn wait(self) -> Vec<WorkerError> {
        let failures = self.pool.join();
        info!("Dumper complete");
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
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn context(executor: FakeExecutor, out: &Path) -> (StageContext, Arc<FakeExecutor>) {
        let executor = Arc::new(executor);
        let mut config = PipelineConfig::new(
            RunMode::DumpOnly {
                system_root: PathBuf::from("/"),
                dump_to: out.to_path_buf(),
            },
            "/tools",
        );
        config.dump_workers = 2;
        let ctx = StageContext {
            config: Arc::new(config),
            executor: executor.clone(),
            stats: Arc::new(PipelineStats::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        (ctx, executor)
    }

    fn request(relative: &str, arch: &str) -> ExtractionRequest {
        ExtractionRequest {
            path: PathBuf::from(format!("/root{}", relative)),
            relative: relative.to_string(),
            arch: arch.to_string(),
        }
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            artifact_name("/usr/lib/libSystem.B.dylib", "x86_64"),
            "_usr_lib_libSystem.B.dylib_x86_64.sym"
        );
        assert_ne!(
            artifact_name("/usr/lib/libz.dylib", "arm64"),
            artifact_name("/usr/lib/libz.dylib", "arm64e")
        );
    }

    #[test]
    fn test_dump_success_keeps_file() {
        let out = tempdir().unwrap();
        let (ctx, executor) = context(FakeExecutor::succeeding(), out.path());

        let outcome = dump_one(&ctx, out.path(), &request("/usr/lib/libz.dylib", "arm64"));
        let DumpOutcome::Dumped { artifact, bytes } = outcome else {
            panic!("expected a successful dump");
        };

        assert_eq!(artifact, out.path().join("_usr_lib_libz.dylib_arm64.sym"));
        assert!(artifact.exists());
        assert!(bytes > 0);

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "/tools/dump_syms");
        assert_eq!(calls[0].args, vec!["-a", "arm64", "/root/usr/lib/libz.dylib"]);
    }

    #[test]
    fn test_dump_failure_removes_partial_file() {
        let out = tempdir().unwrap();
        let (ctx, _) = context(
            FakeExecutor::new(|_, _| ExecOutput::failed(1, "bad image")),
            out.path(),
        );

        let outcome = dump_one(&ctx, out.path(), &request("/usr/lib/libz.dylib", "arm64"));
        assert!(!outcome.is_success());
        assert!(!out.path().join("_usr_lib_libz.dylib_arm64.sym").exists());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_artifact_queue_closes_after_last_worker() {
        let out = tempdir().unwrap();
        let (ctx, _) = context(FakeExecutor::succeeding(), out.path());

        let requests = StageQueue::new(4);
        let artifacts = StageQueue::new(8);
        let setup = requests.producer().unwrap();

        let dumper = Dumper::start(&ctx, out.path().to_path_buf(), &requests, Some(&artifacts))
            .unwrap();
        assert_eq!(artifacts.pending_producers(), 2);

        setup.send(request("/a.dylib", "x86_64")).unwrap();
        setup.send(request("/b.dylib", "arm64")).unwrap();
        assert!(!artifacts.is_closed());
        setup.finish();

        assert!(dumper.wait().is_empty());
        assert!(artifacts.is_closed());

        let mut produced: Vec<_> = artifacts.receiver().collect();
        produced.sort();
        assert_eq!(
            produced,
            vec![
                out.path().join("_a.dylib_x86_64.sym"),
                out.path().join("_b.dylib_arm64.sym"),
            ]
        );
        assert_eq!(ctx.stats.dumped.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[test]
    fn test_dump_only_never_enqueues() {
        let out = tempdir().unwrap();
        let (ctx, _) = context(FakeExecutor::succeeding(), out.path());

        let requests = StageQueue::new(4);
        let setup = requests.producer().unwrap();
        let dumper = Dumper::start(&ctx, out.path().to_path_buf(), &requests, None).unwrap();

        setup.send(request("/a.dylib", "x86_64")).unwrap();
        setup.finish();
        assert!(dumper.wait().is_empty());
        assert!(out.path().join("_a.dylib_x86_64.sym").exists());
    }
}
