//! Concurrent find → dump → upload pipeline
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────────────────┐
//!   │           Finder             │
//!   │  walker ─► classifier 1..N   │
//!   └──────────────┬───────────────┘
//!                  │ ExtractionRequest (path, arch)
//!                  ▼
//!   ┌──────────────────────────────┐
//!   │           Dumper             │
//!   │  dump_syms -a <arch> <path>  │
//!   └──────────────┬───────────────┘
//!                  │ artifact path (.sym)
//!                  ▼
//!   ┌──────────────────────────────┐
//!   │          Uploader            │
//!   │  symupload <sym> <endpoint>  │
//!   └──────────────────────────────┘
//! ```
//!
//! Stages are connected by [`StageQueue`]s. A queue closes only after all of
//! its registered producers have finished, so a downstream stage cannot see
//! end-of-input while an upstream worker still holds an item.

pub mod dumper;
pub mod finder;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod uploader;

pub use dumper::{artifact_name, Dumper};
pub use finder::{plan_requests, ExtractionRequest, Finder};
pub use orchestrator::{Orchestrator, PipelineResult, PipelineState};
pub use pool::WorkerPool;
pub use queue::{Producer, StageQueue, StageReceiver};
pub use stats::{PipelineStats, PipelineSummary};
pub use uploader::{upload_with_retry, Uploader};

use crate::config::PipelineConfig;
use crate::exec::CommandExecutor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, read-mostly state handed to every stage and worker
#[derive(Clone)]
pub struct StageContext {
    /// Validated configuration
    pub config: Arc<PipelineConfig>,

    /// Runs dump_syms and symupload
    pub executor: Arc<dyn CommandExecutor>,

    /// Live counters
    pub stats: Arc<PipelineStats>,

    /// Set on interrupt or fatal walk error; workers skip remaining items
    pub shutdown: Arc<AtomicBool>,
}

impl StageContext {
    /// Whether the run is shutting down
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
