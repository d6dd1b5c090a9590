//! upload-system-symbols - Breakpad symbols for macOS system libraries
//!
//! Scans a macOS system root for dynamic libraries and bundles, dumps
//! Breakpad symbol files for every architecture they contain, and uploads
//! the results to one or more symbol servers.
//!
//! # Features
//!
//! - **Fat and thin Mach-O**: every slice of a universal binary becomes its
//!   own extraction request.
//!
//! - **Bounded pipeline**: three worker pools connected by bounded queues
//!   with backpressure, so memory stays flat on large system roots.
//!
//! - **Ordered shutdown**: no stage sees end-of-input before all of its
//!   producers have finished.
//!
//! - **Retrying uploads**: each (symbol file, endpoint) pair gets several
//!   attempts before it is reported as failed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      System root                          │
//! │   /usr/lib   /System/Library/Frameworks   ...            │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ readdir (batches of 100)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Finder: walker ─► classifiers (blacklist, Mach-O, arch) │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ (path, arch)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Dumper: dump_syms -a <arch> <path> > <name>_<arch>.sym  │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ symbol file
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Uploader: symupload <file> <endpoint>, 3 attempts each  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Dump and upload everything from the running system
//! upload-system-symbols --system-root / --breakpad-tools out/Release
//!
//! # Dump arm64 symbols from a mounted image without uploading
//! upload-system-symbols --system-root /Volumes/MacOS --dump-to /tmp/syms --arch arm64
//!
//! # Upload a previously dumped directory
//! upload-system-symbols --upload-from /tmp/syms
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod macho;
pub mod pipeline;
pub mod progress;

pub use config::{Blacklist, CliArgs, PipelineConfig, RunMode};
pub use error::{PipelineError, Result};
pub use pipeline::{Orchestrator, PipelineResult, PipelineSummary};
