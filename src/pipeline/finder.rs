//! Finder stage - discovers dumpable Mach-O images
//!
//! A single walker thread traverses every scan root and feeds regular files
//! to a pool of classifier workers. Each classifier checks the blacklist,
//! opens the file as a fat or thin Mach-O, and emits one
//! [`ExtractionRequest`] per qualifying architecture.
//!
//! ```text
//!   walker ──► [candidate queue] ──► classifier 0..N ──► [request queue]
//! ```
//!
//! The request queue closes only after the walk is complete and every
//! classifier has drained the candidate queue, because each classifier owns
//! one of the request queue's producer handles.

use crate::error::{ClassifyError, PipelineError, WalkError, WorkerError};
use crate::macho::{ArchResolver, Classification, ImageClassifier};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::queue::{Producer, StageQueue, StageReceiver};
use crate::pipeline::StageContext;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Directory entries read per batch, bounding memory on huge directories
const DIR_BATCH: usize = 100;

/// One (image, architecture) pair to dump
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtractionRequest {
    /// Absolute path of the image on disk
    pub path: PathBuf,

    /// Path relative to the system root, always starting with '/'
    pub relative: String,

    /// Architecture name passed to `dump_syms -a`
    pub arch: String,
}

/// Path of `path` relative to `root`, rendered with a leading '/'
pub fn root_relative(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => format!("/{}", rel.to_string_lossy()),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Absolute directory for a root-relative scan path
pub fn scan_root(root: &Path, scan_path: &str) -> PathBuf {
    root.join(scan_path.trim_start_matches('/'))
}

/// Everything a classifier worker needs
struct Classifier {
    ctx: StageContext,
    root: PathBuf,
    classifier: Arc<dyn ImageClassifier>,
    resolver: Arc<dyn ArchResolver>,
}

impl Classifier {
    fn run(&self, candidates: StageReceiver<PathBuf>, requests: Producer<ExtractionRequest>) {
        for path in candidates {
            if self.ctx.is_shutdown() {
                continue;
            }

            for request in self.requests_for(&path) {
                self.ctx.stats.record_request();
                if requests.send(request).is_err() {
                    error!(path = %path.display(), "Request queue closed, classifier exiting");
                    return;
                }
            }
        }

        requests.finish();
    }

    fn requests_for(&self, path: &Path) -> Vec<ExtractionRequest> {
        self.ctx.stats.record_scanned();

        let relative = root_relative(&self.root, path);
        if self.ctx.config.blacklist.is_match(&relative) {
            self.ctx.stats.record_blacklisted();
            trace!(path = %relative, "Blacklisted");
            return Vec::new();
        }

        let classification = match self.classifier.classify(path) {
            Ok(classification) => classification,
            Err(e) if e.is_not_binary() => return Vec::new(),
            Err(ClassifyError::Io(e)) => {
                self.ctx.stats.record_unreadable();
                warn!(path = %path.display(), error = %e, "Cannot read candidate");
                return Vec::new();
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Not a recognized binary");
                return Vec::new();
            }
        };

        let requests = plan_requests(
            path,
            &relative,
            &classification,
            self.resolver.as_ref(),
            self.ctx.config.arch_filter.as_deref(),
        );

        let skipped = classification.images().len() - requests.len();
        for _ in 0..skipped {
            self.ctx.stats.record_image_skipped();
        }

        requests
    }
}

/// Extraction requests for the images of one classified file
///
/// Images that are not dylibs or bundles, whose architecture cannot be
/// named, or that do not match `arch_filter` produce nothing.
pub fn plan_requests(
    path: &Path,
    relative: &str,
    classification: &Classification,
    resolver: &dyn ArchResolver,
    arch_filter: Option<&str>,
) -> Vec<ExtractionRequest> {
    classification
        .images()
        .iter()
        .filter(|image| image.role.is_dumpable())
        .filter_map(|image| {
            let arch = resolver.arch_name(image.cputype, image.cpusubtype);
            if arch.is_none() {
                trace!(
                    path = %relative,
                    cputype = image.cputype,
                    cpusubtype = image.cpusubtype,
                    "Unknown architecture"
                );
            }
            arch
        })
        .filter(|arch| arch_filter.map_or(true, |f| f == arch))
        .map(|arch| ExtractionRequest {
            path: path.to_path_buf(),
            relative: relative.to_string(),
            arch,
        })
        .collect()
}

/// Recursively send every regular file under `dir` to `candidates`.
/// Symbolic links are never followed.
fn walk_dir(
    dir: &Path,
    candidates: &Producer<PathBuf>,
    ctx: &StageContext,
) -> Result<u64, WalkError> {
    let mut entries = fs::read_dir(dir).map_err(|source| WalkError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut sent = 0u64;
    let mut batch = Vec::with_capacity(DIR_BATCH);

    loop {
        batch.extend(entries.by_ref().take(DIR_BATCH));
        if batch.is_empty() {
            break;
        }

        for entry in batch.drain(..) {
            if ctx.is_shutdown() {
                return Ok(sent);
            }

            let entry = entry.map_err(|source| WalkError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let file_type = entry.file_type().map_err(|source| WalkError::ReadDir {
                path: entry.path(),
                source,
            })?;
            let path = entry.path();

            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                sent += walk_dir(&path, candidates, ctx)?;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            // Blacklist is checked by the classifiers to keep this loop fast
            candidates.send(path).map_err(|_| WalkError::QueueClosed)?;
            sent += 1;
        }
    }

    Ok(sent)
}

/// Walk all scan roots, then close the candidate queue
fn walk_roots(
    root: &Path,
    ctx: &StageContext,
    candidates: Producer<PathBuf>,
) -> Result<u64, WalkError> {
    let mut total = 0u64;

    for scan_path in &ctx.config.scan_paths {
        let dir = scan_root(root, scan_path);
        debug!(path = %dir.display(), "Scanning");

        match walk_dir(&dir, &candidates, ctx) {
            Ok(sent) => total += sent,
            Err(e) => {
                error!(error = %e, "Directory walk failed, aborting");
                ctx.shutdown.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
    }

    candidates.finish();
    Ok(total)
}

/// Running finder stage
pub struct Finder {
    walker: JoinHandle<Result<u64, WalkError>>,
    classifiers: WorkerPool,
}

impl Finder {
    /// Start the walker and classifier pool. One producer handle of
    /// `requests` is registered per classifier before this returns.
    pub fn start(
        ctx: &StageContext,
        root: PathBuf,
        classifier: Arc<dyn ImageClassifier>,
        resolver: Arc<dyn ArchResolver>,
        requests: &StageQueue<ExtractionRequest>,
    ) -> Result<Self, WorkerError> {
        let candidates = StageQueue::new(ctx.config.find_queue_size);
        let walk_producer = candidates.producer().ok_or_else(|| WorkerError::SpawnFailed {
            pool: "finder-walk".into(),
            id: 0,
            reason: "candidate queue closed".into(),
        })?;

        let shared = Arc::new(Classifier {
            ctx: ctx.clone(),
            root: root.clone(),
            classifier,
            resolver,
        });

        let mut request_producers = requests.producers(ctx.config.find_workers);
        let classifiers = WorkerPool::start("finder", ctx.config.find_workers, |_| {
            let shared = Arc::clone(&shared);
            let receiver = candidates.receiver();
            let producer = request_producers.pop();
            move || {
                if let Some(producer) = producer {
                    shared.run(receiver, producer);
                }
            }
        })?;

        let walk_ctx = ctx.clone();
        let walker = thread::Builder::new()
            .name("finder-walk".into())
            .spawn(move || walk_roots(&root, &walk_ctx, walk_producer))
            .map_err(|e| WorkerError::SpawnFailed {
                pool: "finder-walk".into(),
                id: 0,
                reason: e.to_string(),
            })?;

        info!(workers = classifiers.len(), "Finder started");
        Ok(Self {
            walker,
            classifiers,
        })
    }

    /// Block until the walk has finished and every classifier has drained.
    /// Returns the number of candidate files walked.
    pub fn wait(self) -> Result<u64, PipelineError> {
        let walked = match self.walker.join() {
            Ok(result) => result.map_err(PipelineError::from),
            Err(_) => Err(PipelineError::Worker(WorkerError::Panicked {
                pool: "finder-walk".into(),
                id: 0,
            })),
        };

        let failures = self.classifiers.join();
        if !failures.is_empty() {
            warn!(count = failures.len(), "Classifier workers panicked");
        }

        let walked = walked?;
        info!(files = walked, "Finder complete");
        Ok(walked)
    }
}
