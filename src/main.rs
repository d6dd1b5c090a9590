//! upload-system-symbols - Breakpad symbols for macOS system libraries
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use upload_system_symbols::config::{CliArgs, PipelineConfig};
use upload_system_symbols::error::PipelineError;
use upload_system_symbols::pipeline::Orchestrator;
use upload_system_symbols::progress::{print_header, print_summary, ProgressReporter};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = PipelineConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(&config);
    }

    let show_progress = config.show_progress;
    let mode = config.mode.clone();
    let orchestrator = Orchestrator::new(config);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = orchestrator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let start = Instant::now();
    let result = if show_progress {
        let progress = Arc::new(ProgressReporter::new());
        progress.set_status("Scanning...");

        let reporter = Arc::clone(&progress);
        let result = orchestrator.run_with_progress(move |summary| reporter.update(&summary));

        match &result {
            Ok(_) => progress.finish("Run completed"),
            Err(PipelineError::Interrupted) => progress.finish("Run interrupted"),
            Err(_) => progress.finish_and_clear(),
        }
        result
    } else {
        orchestrator.run()
    };

    match result {
        Ok(result) => {
            if show_progress {
                print_summary(&result.summary, &mode, true);
            }
            if result.summary.failures() > 0 {
                info!(
                    failures = result.summary.failures(),
                    "Run completed with per-file failures"
                );
            }
            Ok(())
        }
        Err(PipelineError::Interrupted) => {
            if show_progress {
                let summary = orchestrator.stats().snapshot(start.elapsed());
                print_summary(&summary, &mode, false);
            }
            Err(PipelineError::Interrupted).context("Run did not complete")
        }
        Err(e) => Err(e).context("Pipeline failed"),
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("upload_system_symbols=debug,warn")
    } else {
        EnvFilter::new("upload_system_symbols=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
