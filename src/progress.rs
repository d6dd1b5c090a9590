//! Progress reporting for the symbol pipeline
//!
//! Provides a live spinner while the pipeline runs, plus the header and
//! summary printed around a run.

use crate::config::{PipelineConfig, RunMode};
use crate::pipeline::PipelineSummary;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays pipeline status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let spinner = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(spinner);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &PipelineSummary) {
        let msg = format!(
            "Scanned: {} | Requests: {} | Dumped: {} ({}) | Uploaded: {} | Failed: {} | Rate: {:.0}/s",
            format_number(progress.files_scanned),
            format_number(progress.requests),
            format_number(progress.dumped),
            format_size(progress.artifact_bytes, BINARY),
            format_number(progress.uploaded),
            format_number(progress.failures()),
            progress.files_per_second(),
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);

    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }

    out
}

/// Print a header at the start of the run
pub fn print_header(config: &PipelineConfig) {
    println!();
    println!(
        "{} {}",
        style("upload-system-symbols").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Mode:").bold(), config.mode.name());

    if let Some(system_root) = config.mode.system_root() {
        println!("  {} {}", style("System root:").bold(), system_root.display());
    }
    match &config.mode {
        RunMode::DumpOnly { dump_to, .. } => {
            println!("  {} {}", style("Dump to:").bold(), dump_to.display());
        }
        RunMode::UploadOnly { upload_from } => {
            println!("  {} {}", style("Upload from:").bold(), upload_from.display());
        }
        RunMode::Full { .. } => {}
    }

    if let Some(arch) = &config.arch_filter {
        println!("  {} {}", style("Arch:").bold(), arch);
    }
    if config.mode.dumps() {
        println!(
            "  {} find {} / dump {}",
            style("Workers:").bold(),
            config.find_workers,
            config.dump_workers
        );
    }
    if config.mode.uploads() {
        println!("  {} {}", style("Upload workers:").bold(), config.upload_workers);
        for endpoint in &config.endpoints {
            println!("  {} {}", style("Endpoint:").bold(), endpoint);
        }
    }
    println!();
}

/// Print a summary of the run
pub fn print_summary(summary: &PipelineSummary, mode: &RunMode, completed: bool) {
    let duration_secs = summary.elapsed.as_secs_f64();
    let title = if completed {
        style("Run Complete").green().bold()
    } else {
        style("Run Interrupted").yellow().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());

    if mode.dumps() {
        println!(
            "  {} {} ({} blacklisted)",
            style("Files scanned:").bold(),
            format_number(summary.files_scanned),
            format_number(summary.blacklisted)
        );
        println!(
            "  {} {}",
            style("Images skipped:").bold(),
            format_number(summary.images_skipped)
        );
        if summary.unreadable > 0 {
            println!(
                "  {} {}",
                style("Unreadable:").bold(),
                format_number(summary.unreadable)
            );
        }
        println!(
            "  {} {} of {} ({})",
            style("Dumped:").bold(),
            format_number(summary.dumped),
            format_number(summary.requests),
            format_size(summary.artifact_bytes, BINARY)
        );
    }
    if mode.uploads() {
        println!(
            "  {} {} ({} attempts)",
            style("Uploaded:").bold(),
            format_number(summary.uploaded),
            format_number(summary.upload_attempts)
        );
    }
    println!(
        "  {} {:.1}s ({:.0} files/sec)",
        style("Duration:").bold(),
        duration_secs,
        summary.files_per_second()
    );
    if summary.dump_failures > 0 {
        println!(
            "  {} {}",
            style("Dump failures:").yellow().bold(),
            format_number(summary.dump_failures)
        );
    }
    if summary.upload_failures > 0 {
        println!(
            "  {} {}",
            style("Upload failures:").yellow().bold(),
            format_number(summary.upload_failures)
        );
    }
    if let RunMode::DumpOnly { dump_to, .. } = mode {
        println!("  {} {}", style("Symbols:").bold(), dump_to.display());
    }
    println!();
}
