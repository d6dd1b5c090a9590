//! Counters shared by all pipeline stages

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live statistics, updated concurrently by every worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Candidate files handed to the classifiers
    pub files_scanned: AtomicU64,

    /// Candidates dropped by the blacklist
    pub blacklisted: AtomicU64,

    /// Candidates that could not be opened or read
    pub unreadable: AtomicU64,

    /// Mach-O images skipped for their role or an unknown/filtered architecture
    pub images_skipped: AtomicU64,

    /// Extraction requests emitted by the finder
    pub requests: AtomicU64,

    /// Successful dump_syms runs
    pub dumped: AtomicU64,

    /// Failed dump_syms runs
    pub dump_failures: AtomicU64,

    /// Bytes of symbol data produced
    pub artifact_bytes: AtomicU64,

    /// (artifact, endpoint) pairs uploaded
    pub uploaded: AtomicU64,

    /// (artifact, endpoint) pairs that exhausted their attempts
    pub upload_failures: AtomicU64,

    /// symupload invocations, including retries
    pub upload_attempts: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn record_scanned(&self) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blacklisted(&self) {
        self.blacklisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unreadable(&self) {
        self.unreadable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_image_skipped(&self) {
        self.images_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dump(&self, bytes: u64) {
        self.dumped.fetch_add(1, Ordering::Relaxed);
        self.artifact_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_dump_failure(&self) {
        self.dump_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upload_attempt(&self) {
        self.upload_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upload(&self, success: bool) {
        if success {
            self.uploaded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.upload_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a plain snapshot of the counters
    pub fn snapshot(&self, elapsed: Duration) -> PipelineSummary {
        PipelineSummary {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            blacklisted: self.blacklisted.load(Ordering::Relaxed),
            unreadable: self.unreadable.load(Ordering::Relaxed),
            images_skipped: self.images_skipped.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            dumped: self.dumped.load(Ordering::Relaxed),
            dump_failures: self.dump_failures.load(Ordering::Relaxed),
            artifact_bytes: self.artifact_bytes.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            upload_attempts: self.upload_attempts.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub files_scanned: u64,
    pub blacklisted: u64,
    pub unreadable: u64,
    pub images_skipped: u64,
    pub requests: u64,
    pub dumped: u64,
    pub dump_failures: u64,
    pub artifact_bytes: u64,
    pub uploaded: u64,
    pub upload_failures: u64,
    pub upload_attempts: u64,
    pub elapsed: Duration,
}

impl PipelineSummary {
    /// Files classified per second
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files_scanned as f64 / secs
        } else {
            0.0
        }
    }

    /// Total per-item failures (dump and upload)
    pub fn failures(&self) -> u64 {
        self.dump_failures + self.upload_failures
    }
}
