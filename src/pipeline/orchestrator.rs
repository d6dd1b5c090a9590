//! Pipeline orchestrator
//!
//! Wires the stages together for the selected run mode and enforces the
//! shutdown order: the finder drains before the dumper, the dumper before
//! the uploader, and the scratch directory of a full run is removed only
//! after the uploader has finished.
//!
//! Each queue gets a setup producer held by the orchestrator while the
//! stages are being started, so no queue can close before every real
//! producer has registered.

use crate::config::{PipelineConfig, RunMode};
use crate::error::{PipelineError, Result, WalkError};
use crate::exec::{CommandExecutor, ProcessExecutor};
use crate::macho::{ArchResolver, ImageClassifier, MachOClassifier, OverrideResolver};
use crate::pipeline::dumper::Dumper;
use crate::pipeline::finder::{scan_root, ExtractionRequest, Finder};
use crate::pipeline::queue::StageQueue;
use crate::pipeline::stats::{PipelineStats, PipelineSummary};
use crate::pipeline::uploader::Uploader;
use crate::pipeline::StageContext;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Prefix of the scratch directory used by a full run
const SCRATCH_PREFIX: &str = "upload_system_symbols";

/// Interval between progress callbacks
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, not started
    Idle,

    /// Stages started, the finder (or directory listing) is producing
    Running,

    /// Production finished, downstream stages are draining
    Draining,

    /// All stages joined
    Exit,
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Final counters
    pub summary: PipelineSummary,

    /// Directory holding the symbol files after the run, if they were kept
    pub dump_dir: Option<PathBuf>,
}

/// Runs one pipeline from start to finish
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    executor: Arc<dyn CommandExecutor>,
    classifier: Arc<dyn ImageClassifier>,
    resolver: Arc<dyn ArchResolver>,
    stats: Arc<PipelineStats>,
    shutdown: Arc<AtomicBool>,
    state: Mutex<PipelineState>,
}

/// Dumper and uploader started for a scan run, drained in order
struct Downstream {
    dumper: Option<Dumper>,
    uploader: Option<Uploader>,
}

impl Downstream {
    fn drain(self) {
        if let Some(dumper) = self.dumper {
            dumper.wait();
        }
        if let Some(uploader) = self.uploader {
            uploader.wait();
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator that runs the real tools and parses real
    /// Mach-O files
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            executor: Arc::new(ProcessExecutor),
            classifier: Arc::new(MachOClassifier),
            resolver: Arc::new(OverrideResolver::host()),
            stats: Arc::new(PipelineStats::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(PipelineState::Idle),
        }
    }

    /// Replace the command executor
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the image classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn ImageClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the architecture resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn ArchResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Flag that makes every stage skip its remaining items when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Live counters
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    fn transition(&self, next: PipelineState) {
        let mut state = self.state.lock();
        debug!(from = ?*state, to = ?next, "Pipeline state");
        *state = next;
    }

    fn context(&self) -> StageContext {
        StageContext {
            config: Arc::clone(&self.config),
            executor: Arc::clone(&self.executor),
            stats: Arc::clone(&self.stats),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Run the pipeline to completion.
    ///
    /// Per-item dump and upload failures are logged and counted, never
    /// returned. A failed directory walk is returned after every stage has
    /// drained; an interrupted run returns [`PipelineError::Interrupted`].
    pub fn run(&self) -> Result<PipelineResult> {
        let start = Instant::now();
        let ctx = self.context();

        info!(mode = self.config.mode.name(), "Starting pipeline");
        self.transition(PipelineState::Running);

        let result = match &self.config.mode {
            RunMode::Full { system_root } => self.run_full(&ctx, system_root),
            RunMode::DumpOnly {
                system_root,
                dump_to,
            } => self
                .run_scan(&ctx, system_root, dump_to, false)
                .map(|()| Some(dump_to.clone())),
            RunMode::UploadOnly { upload_from } => {
                self.run_upload_only(&ctx, upload_from).map(|()| None)
            }
        };

        self.transition(PipelineState::Exit);
        let summary = self.stats.snapshot(start.elapsed());
        info!(
            dumped = summary.dumped,
            uploaded = summary.uploaded,
            failures = summary.failures(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Pipeline finished"
        );

        let dump_dir = result?;
        if ctx.is_shutdown() {
            return Err(PipelineError::Interrupted);
        }

        Ok(PipelineResult { summary, dump_dir })
    }

    /// Run the pipeline, calling `progress_callback` periodically with a
    /// snapshot of the counters until the run ends
    pub fn run_with_progress<F>(&self, progress_callback: F) -> Result<PipelineResult>
    where
        F: Fn(PipelineSummary) + Send + 'static,
    {
        let start = Instant::now();
        let done = Arc::new(AtomicBool::new(false));
        let stats = Arc::clone(&self.stats);

        let monitor_done = Arc::clone(&done);
        let monitor = thread::Builder::new()
            .name("progress".into())
            .spawn(move || {
                while !monitor_done.load(Ordering::Relaxed) {
                    progress_callback(stats.snapshot(start.elapsed()));
                    thread::sleep(PROGRESS_INTERVAL);
                }
            });
        if let Err(e) = &monitor {
            warn!(error = %e, "Could not start progress monitor");
        }

        let result = self.run();

        done.store(true, Ordering::SeqCst);
        if let Ok(handle) = monitor {
            let _ = handle.join();
        }

        result
    }

    /// Scan, dump into a scratch directory, upload, then remove the scratch
    /// directory
    fn run_full(&self, ctx: &StageContext, root: &Path) -> Result<Option<PathBuf>> {
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
        info!(path = %scratch.path().display(), "Created scratch directory");

        let result = self.run_scan(ctx, root, scratch.path(), true);

        // Every stage has been joined by now
        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "Failed to remove scratch directory");
        }

        result.map(|()| None)
    }

    /// Fail before any stage starts if a scan root cannot be opened
    fn check_scan_roots(&self, root: &Path) -> Result<()> {
        for scan_path in &self.config.scan_paths {
            let dir = scan_root(root, scan_path);
            if let Err(source) = fs::read_dir(&dir) {
                return Err(WalkError::OpenRoot { path: dir, source }.into());
            }
        }
        Ok(())
    }

    fn run_scan(&self, ctx: &StageContext, root: &Path, dump_dir: &Path, upload: bool) -> Result<()> {
        self.check_scan_roots(root)?;

        let requests: StageQueue<ExtractionRequest> = StageQueue::new(self.config.dump_queue_size);
        let artifacts: Option<StageQueue<PathBuf>> =
            upload.then(|| StageQueue::new(self.config.upload_queue_size));

        let request_guard = requests.producer();
        let artifact_guard = artifacts.as_ref().and_then(|queue| queue.producer());

        let mut downstream = Downstream {
            dumper: None,
            uploader: None,
        };

        if let Some(queue) = &artifacts {
            downstream.uploader = Some(Uploader::start(ctx, queue)?);
        }

        match Dumper::start(ctx, dump_dir.to_path_buf(), &requests, artifacts.as_ref()) {
            Ok(dumper) => downstream.dumper = Some(dumper),
            Err(e) => {
                drop(request_guard);
                drop(artifact_guard);
                downstream.drain();
                return Err(e.into());
            }
        }
        // Dumper workers hold the artifact queue open from here on
        drop(artifact_guard);

        let finder = match Finder::start(
            ctx,
            root.to_path_buf(),
            Arc::clone(&self.classifier),
            Arc::clone(&self.resolver),
            &requests,
        ) {
            Ok(finder) => finder,
            Err(e) => {
                drop(request_guard);
                downstream.drain();
                return Err(e.into());
            }
        };
        drop(request_guard);

        let walked = finder.wait();

        self.transition(PipelineState::Draining);
        downstream.drain();

        let walked = walked?;
        debug!(files = walked, "Scan complete");
        Ok(())
    }

    /// Upload every file of `dir`, in name order
    fn run_upload_only(&self, ctx: &StageContext, dir: &Path) -> Result<()> {
        let files = list_upload_dir(dir)?;
        info!(path = %dir.display(), files = files.len(), "Uploading directory");

        let artifacts = StageQueue::new(self.config.upload_queue_size);
        let guard = artifacts
            .producer()
            .ok_or(PipelineError::Walk(WalkError::QueueClosed))?;
        let uploader = Uploader::start(ctx, &artifacts)?;

        for file in files {
            if ctx.is_shutdown() {
                break;
            }
            if guard.send(file).is_err() {
                warn!("Artifact queue closed, stopping directory upload");
                break;
            }
        }
        guard.finish();

        self.transition(PipelineState::Draining);
        uploader.wait();
        Ok(())
    }
}

/// Every non-directory entry directly inside `dir`, sorted by path.
/// Symbolic links are followed, so a link to a symbol file is uploaded.
pub fn list_upload_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => continue,
            Ok(_) => files.push(path),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable entry"),
        }
    }

    files.sort();
    Ok(files)
}
