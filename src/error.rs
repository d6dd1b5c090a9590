//! Error types for upload-system-symbols
//!
//! This module defines the error hierarchy for the symbol pipeline:
//! - Configuration errors (fatal, reported before any stage starts)
//! - Directory walk errors (fatal, the tree is assumed stable during a run)
//! - Worker thread errors
//! - Per-image classification errors (recoverable, never escalate)
//!
//! Per-item dump and upload results are not errors at all; they are
//! reported through [`DumpOutcome`] and [`UploadOutcome`] and only logged.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Directory traversal errors
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (scratch directory, upload source listing, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid {stage} worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount {
        stage: &'static str,
        count: usize,
        max: usize,
    },

    /// Invalid blacklist pattern
    #[error("Invalid blacklist pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A full or dump-only run needs a system root
    #[error("Need a --system-root to dump symbols for")]
    MissingSystemRoot,

    /// More than one run mode was requested
    #[error("Conflicting run modes: {0}")]
    ConflictingModes(String),

    /// A path given on the command line is unusable
    #[error("Invalid {what} '{path}': {reason}")]
    InvalidPath {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// A Breakpad tool is missing from the tools directory
    #[error("Tool '{tool}' not found at '{path}'")]
    ToolNotFound { tool: &'static str, path: PathBuf },

    /// Uploading was requested with nowhere to upload to
    #[error("No upload endpoints configured")]
    NoEndpoints,

    /// A scan path must be relative to the system root
    #[error("Invalid scan path '{0}': must start with '/'")]
    InvalidScanPath(String),
}

/// Directory traversal errors
#[derive(Error, Debug)]
pub enum WalkError {
    /// A scan root could not be opened
    #[error("Could not open '{path}': {source}")]
    OpenRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a directory failed part way through
    #[error("Error reading directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The candidate queue was closed while the walk was still producing
    #[error("Candidate queue closed unexpectedly")]
    QueueClosed,
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker thread could not be spawned
    #[error("Failed to spawn {pool} worker {id}: {reason}")]
    SpawnFailed {
        pool: String,
        id: usize,
        reason: String,
    },

    /// Worker panicked
    #[error("{pool} worker {id} panicked")]
    Panicked { pool: String, id: usize },
}

/// Errors from classifying a candidate file
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The file could not be opened or read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not a Mach-O image or fat container
    #[error("Not a recognized binary")]
    NotBinary,

    /// Recognized magic, but the headers are malformed
    #[error("Malformed Mach-O: {0}")]
    Parse(String),
}

impl ClassifyError {
    /// Whether this is the silent "not a binary" case rather than a real fault
    pub fn is_not_binary(&self) -> bool {
        matches!(self, ClassifyError::NotBinary)
    }
}

impl From<object::read::Error> for ClassifyError {
    fn from(e: object::read::Error) -> Self {
        ClassifyError::Parse(e.to_string())
    }
}

/// Result type alias for PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of dumping a single (path, architecture) request
#[derive(Debug)]
pub enum DumpOutcome {
    /// dump_syms succeeded and the symbol file was kept
    Dumped { artifact: PathBuf, bytes: u64 },

    /// Skipped because the run is shutting down
    Skipped,

    /// dump_syms failed or the output file could not be written
    Failed { reason: String },
}

impl DumpOutcome {
    /// Returns true if this outcome produced an artifact
    pub fn is_success(&self) -> bool {
        matches!(self, DumpOutcome::Dumped { .. })
    }
}

/// Outcome of pushing one artifact to one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Uploaded on the given (1-based) attempt
    Uploaded { attempts: u32 },

    /// All attempts failed
    Failed { attempts: u32, last_error: String },
}

impl UploadOutcome {
    /// Returns true if the upload eventually succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }

    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            UploadOutcome::Uploaded { attempts } => *attempts,
            UploadOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_not_binary() {
        assert!(ClassifyError::NotBinary.is_not_binary());
        assert!(!ClassifyError::Parse("truncated".into()).is_not_binary());
    }

    #[test]
    fn test_error_conversion() {
        let walk_err = WalkError::QueueClosed;
        let err: PipelineError = walk_err.into();
        assert!(matches!(err, PipelineError::Walk(_)));

        let err: PipelineError = ConfigError::NoEndpoints.into();
        assert_eq!(
            err.to_string(),
            "Configuration error: No upload endpoints configured"
        );
    }

    #[test]
    fn test_upload_outcome_attempts() {
        let ok = UploadOutcome::Uploaded { attempts: 2 };
        assert!(ok.is_success());
        assert_eq!(ok.attempts(), 2);

        let failed = UploadOutcome::Failed {
            attempts: 3,
            last_error: "exit status 1".into(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.attempts(), 3);
    }
}
