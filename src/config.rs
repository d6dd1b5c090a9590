//! Configuration types for upload-system-symbols
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The run mode (full pipeline, dump-only, upload-only)
//! - The compiled path blacklist
//! - Validated, immutable runtime configuration

use crate::error::ConfigError;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable worker count for any stage
const MAX_WORKERS: usize = 256;

/// Name of the symbol extraction tool inside the tools directory
pub const DUMP_SYMS: &str = "dump_syms";

/// Name of the upload tool inside the tools directory
pub const SYMUPLOAD: &str = "symupload";

/// Subpaths of the system root that are scanned for shared libraries
pub const DEFAULT_SCAN_PATHS: &[&str] = &[
    "/Library/QuickTime",
    "/System/Library/Components",
    "/System/Library/Frameworks",
    "/System/Library/PrivateFrameworks",
    "/usr/lib",
];

/// Servers symbol files are uploaded to
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://clients2.google.com/cr/symbol",
    "https://clients2.google.com/cr/staging_symbol",
];

/// Paths matching any of these are never dumped
pub const DEFAULT_BLACKLIST: &[&str] = &[
    r"/System/Library/Frameworks/Python\.framework/",
    r"/System/Library/Frameworks/Ruby\.framework/",
    r"_profile\.dylib$",
    r"_debug\.dylib$",
    r"\.a$",
    r"\.dat$",
];

/// Default worker pool sizes. Discovery and extraction are disk and CPU
/// bound; upload is network bound and kept small.
pub const DEFAULT_FIND_WORKERS: usize = 12;
pub const DEFAULT_DUMP_WORKERS: usize = 12;
pub const DEFAULT_UPLOAD_WORKERS: usize = 5;

/// Attempts per (artifact, endpoint) pair
pub const UPLOAD_ATTEMPTS: u32 = 3;

/// Generate and upload Breakpad symbol files for macOS system libraries
#[derive(Parser, Debug, Clone)]
#[command(
    name = "upload-system-symbols",
    version,
    about = "Generate and upload Breakpad symbol files for macOS system libraries",
    long_about = "Finds all dynamic libraries and bundles under a system root, runs dump_syms \
                  on every architecture they contain, and uploads the resulting symbol files \
                  with symupload.\n\n\
                  Use --dump-to to only dump, or --upload-from to only upload a directory of \
                  symbol files that was dumped independently.",
    after_help = "EXAMPLES:\n    \
        upload-system-symbols --system-root / --breakpad-tools out/Release\n    \
        upload-system-symbols --system-root /Volumes/MacOS --dump-to /tmp/syms --arch arm64\n    \
        upload-system-symbols --upload-from /tmp/syms --endpoint https://example.com/symbol"
)]
pub struct CliArgs {
    /// Path to the Breakpad tools directory, containing dump_syms and symupload
    #[arg(long, default_value = "out/Release/", value_name = "DIR")]
    pub breakpad_tools: PathBuf,

    /// Upload a directory of symbol files that has been dumped independently
    #[arg(long, value_name = "DIR")]
    pub upload_from: Option<PathBuf>,

    /// Dump the symbols to the specified directory, but do not upload them
    #[arg(long, value_name = "DIR")]
    pub dump_to: Option<PathBuf>,

    /// Path to the root of the macOS system whose symbols will be dumped
    #[arg(long, value_name = "DIR")]
    pub system_root: Option<PathBuf>,

    /// CPU architecture to dump; all architectures if not specified
    #[arg(long, value_name = "NAME")]
    pub arch: Option<String>,

    /// Upload endpoint (can be repeated; replaces the built-in list)
    #[arg(long = "endpoint", value_name = "URL", action = clap::ArgAction::Append)]
    pub endpoints: Vec<String>,

    /// Subpath of the system root to scan (can be repeated; replaces the built-in list)
    #[arg(long = "scan-path", value_name = "PATH", action = clap::ArgAction::Append)]
    pub scan_paths: Vec<String>,

    /// Additional blacklist pattern (can be repeated)
    #[arg(long = "blacklist", value_name = "REGEX", action = clap::ArgAction::Append)]
    pub blacklist: Vec<String>,

    /// Number of classifier threads
    #[arg(long, default_value_t = DEFAULT_FIND_WORKERS, value_name = "NUM")]
    pub find_workers: usize,

    /// Number of dump_syms threads
    #[arg(long, default_value_t = DEFAULT_DUMP_WORKERS, value_name = "NUM")]
    pub dump_workers: usize,

    /// Number of symupload threads
    #[arg(long, default_value_t = DEFAULT_UPLOAD_WORKERS, value_name = "NUM")]
    pub upload_workers: usize,

    /// Delay between upload attempts in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub retry_delay_ms: u64,

    /// Quiet mode - suppress progress, header and summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// What the run does. Exactly one mode is selected per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Scan, dump into a scratch directory, upload, then remove the scratch directory
    Full { system_root: PathBuf },

    /// Scan and dump into an existing directory; nothing is uploaded
    DumpOnly {
        system_root: PathBuf,
        dump_to: PathBuf,
    },

    /// Upload every entry of an existing directory; nothing is scanned
    UploadOnly { upload_from: PathBuf },
}

impl RunMode {
    /// Whether the finder and dumper run in this mode
    pub fn dumps(&self) -> bool {
        !matches!(self, RunMode::UploadOnly { .. })
    }

    /// Whether an uploader is constructed in this mode
    pub fn uploads(&self) -> bool {
        !matches!(self, RunMode::DumpOnly { .. })
    }

    /// System root being scanned, if any
    pub fn system_root(&self) -> Option<&Path> {
        match self {
            RunMode::Full { system_root } | RunMode::DumpOnly { system_root, .. } => {
                Some(system_root)
            }
            RunMode::UploadOnly { .. } => None,
        }
    }

    /// Short name for logs and the header
    pub fn name(&self) -> &'static str {
        match self {
            RunMode::Full { .. } => "dump and upload",
            RunMode::DumpOnly { .. } => "dump only",
            RunMode::UploadOnly { .. } => "upload only",
        }
    }
}

/// Compiled path blacklist, evaluated with OR semantics
#[derive(Debug, Clone)]
pub struct Blacklist {
    patterns: Vec<Regex>,
}

impl Blacklist {
    /// Compile a set of patterns
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// The built-in blacklist
    pub fn builtin() -> Self {
        let patterns = DEFAULT_BLACKLIST
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { patterns }
    }

    /// Add more patterns on top of the existing ones
    pub fn extend<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, ConfigError> {
        let extra = Self::new(patterns)?;
        self.patterns.extend(extra.patterns);
        Ok(self)
    }

    /// Check if a root-relative path is blacklisted
    pub fn is_match(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    /// Number of compiled patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the blacklist has no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Validated runtime configuration, built once and shared read-only
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Selected run mode
    pub mode: RunMode,

    /// Path to dump_syms
    pub dump_syms: PathBuf,

    /// Path to symupload
    pub symupload: PathBuf,

    /// Root-relative subpaths to scan (each starts with '/')
    pub scan_paths: Vec<String>,

    /// Upload endpoints
    pub endpoints: Vec<String>,

    /// Paths never dumped
    pub blacklist: Blacklist,

    /// Only dump this architecture
    pub arch_filter: Option<String>,

    /// Classifier worker count
    pub find_workers: usize,

    /// dump_syms worker count
    pub dump_workers: usize,

    /// symupload worker count
    pub upload_workers: usize,

    /// Capacity of the candidate-path queue feeding the classifiers
    pub find_queue_size: usize,

    /// Capacity of the extraction request queue (0 = rendezvous)
    pub dump_queue_size: usize,

    /// Capacity of the artifact queue feeding the uploaders
    pub upload_queue_size: usize,

    /// Attempts per (artifact, endpoint)
    pub upload_attempts: u32,

    /// Delay between upload attempts
    pub retry_delay: Duration,

    /// Show progress spinner, header and summary
    pub show_progress: bool,
}

impl PipelineConfig {
    /// Configuration with the built-in defaults and tools under `tools_dir`.
    /// No validation is performed.
    pub fn new(mode: RunMode, tools_dir: impl AsRef<Path>) -> Self {
        let tools_dir = tools_dir.as_ref();
        Self {
            mode,
            dump_syms: tools_dir.join(DUMP_SYMS),
            symupload: tools_dir.join(SYMUPLOAD),
            scan_paths: DEFAULT_SCAN_PATHS.iter().map(|s| s.to_string()).collect(),
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            blacklist: Blacklist::builtin(),
            arch_filter: None,
            find_workers: DEFAULT_FIND_WORKERS,
            dump_workers: DEFAULT_DUMP_WORKERS,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            find_queue_size: 10,
            dump_queue_size: 0,
            upload_queue_size: 10,
            upload_attempts: UPLOAD_ATTEMPTS,
            retry_delay: Duration::from_secs(1),
            show_progress: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let mode = Self::select_mode(&args)?;

        match &mode {
            RunMode::Full { system_root } => {
                require_dir("system root", system_root)?;
            }
            RunMode::DumpOnly {
                system_root,
                dump_to,
            } => {
                require_dir("system root", system_root)?;
                require_dir("-dump-to location", dump_to)?;
            }
            RunMode::UploadOnly { upload_from } => {
                require_dir("upload directory", upload_from)?;
            }
        }

        for (stage, count) in [
            ("find", args.find_workers),
            ("dump", args.dump_workers),
            ("upload", args.upload_workers),
        ] {
            if count == 0 || count > MAX_WORKERS {
                return Err(ConfigError::InvalidWorkerCount {
                    stage,
                    count,
                    max: MAX_WORKERS,
                });
            }
        }

        let blacklist = Blacklist::builtin().extend(&args.blacklist)?;

        let scan_paths = if args.scan_paths.is_empty() {
            DEFAULT_SCAN_PATHS.iter().map(|s| s.to_string()).collect()
        } else {
            args.scan_paths.clone()
        };
        if let Some(bad) = scan_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::InvalidScanPath(bad.clone()));
        }

        let endpoints = if args.endpoints.is_empty() {
            DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect()
        } else {
            args.endpoints.clone()
        };
        if mode.uploads() && endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::NoEndpoints);
        }

        let mut config = Self::new(mode, &args.breakpad_tools);

        if config.mode.dumps() && !config.dump_syms.is_file() {
            return Err(ConfigError::ToolNotFound {
                tool: DUMP_SYMS,
                path: config.dump_syms,
            });
        }
        if config.mode.uploads() && !config.symupload.is_file() {
            return Err(ConfigError::ToolNotFound {
                tool: SYMUPLOAD,
                path: config.symupload,
            });
        }

        config.scan_paths = scan_paths;
        config.endpoints = endpoints;
        config.blacklist = blacklist;
        config.arch_filter = args.arch.filter(|a| !a.is_empty());
        config.find_workers = args.find_workers;
        config.dump_workers = args.dump_workers;
        config.upload_workers = args.upload_workers;
        config.retry_delay = Duration::from_millis(args.retry_delay_ms);
        config.show_progress = !args.quiet;

        Ok(config)
    }

    /// Pick the run mode. Modes are strictly exclusive rather than
    /// resolved by flag precedence.
    fn select_mode(args: &CliArgs) -> Result<RunMode, ConfigError> {
        if let Some(upload_from) = &args.upload_from {
            if args.dump_to.is_some() {
                return Err(ConfigError::ConflictingModes(
                    "--upload-from cannot be combined with --dump-to".into(),
                ));
            }
            if args.system_root.is_some() {
                return Err(ConfigError::ConflictingModes(
                    "--upload-from cannot be combined with --system-root".into(),
                ));
            }
            return Ok(RunMode::UploadOnly {
                upload_from: upload_from.clone(),
            });
        }

        let system_root = args
            .system_root
            .clone()
            .ok_or(ConfigError::MissingSystemRoot)?;

        Ok(match &args.dump_to {
            Some(dump_to) => RunMode::DumpOnly {
                system_root,
                dump_to: dump_to.clone(),
            },
            None => RunMode::Full { system_root },
        })
    }
}

fn require_dir(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ConfigError::InvalidPath {
            what,
            path: path.to_path_buf(),
            reason: "not a directory".into(),
        }),
        Err(e) => Err(ConfigError::InvalidPath {
            what,
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["upload-system-symbols"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    fn tools_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DUMP_SYMS), b"").unwrap();
        fs::write(dir.path().join(SYMUPLOAD), b"").unwrap();
        dir
    }

    #[test]
    fn test_builtin_blacklist() {
        let blacklist = Blacklist::builtin();
        assert_eq!(blacklist.len(), DEFAULT_BLACKLIST.len());

        assert!(blacklist.is_match("/System/Library/Frameworks/Python.framework/Versions/2.7/Python"));
        assert!(blacklist.is_match("/usr/lib/libSystem_profile.dylib"));
        assert!(blacklist.is_match("/usr/lib/libSystem_debug.dylib"));
        assert!(blacklist.is_match("/usr/lib/libfoo.a"));
        assert!(blacklist.is_match("/usr/lib/locale.dat"));
        assert!(!blacklist.is_match("/usr/lib/libSystem.B.dylib"));
        assert!(!blacklist.is_match("/System/Library/Frameworks/AppKit.framework/AppKit"));
    }

    #[test]
    fn test_blacklist_invalid_pattern() {
        let err = Blacklist::new(&["("]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_mode_full() {
        let root = tempdir().unwrap();
        let tools = tools_dir();
        let config = PipelineConfig::from_args(args(&[
            "--system-root",
            root.path().to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
        ]))
        .unwrap();

        assert_eq!(
            config.mode,
            RunMode::Full {
                system_root: root.path().to_path_buf()
            }
        );
        assert!(config.mode.dumps());
        assert!(config.mode.uploads());
        assert_eq!(config.endpoints.len(), DEFAULT_ENDPOINTS.len());
        assert_eq!(config.scan_paths.len(), DEFAULT_SCAN_PATHS.len());
        assert_eq!(config.dump_syms, tools.path().join(DUMP_SYMS));
    }

    #[test]
    fn test_mode_dump_only() {
        let root = tempdir().unwrap();
        let out = tempdir().unwrap();
        let tools = tools_dir();
        let config = PipelineConfig::from_args(args(&[
            "--system-root",
            root.path().to_str().unwrap(),
            "--dump-to",
            out.path().to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
            "--arch",
            "arm64",
        ]))
        .unwrap();

        assert!(matches!(config.mode, RunMode::DumpOnly { .. }));
        assert!(!config.mode.uploads());
        assert_eq!(config.arch_filter.as_deref(), Some("arm64"));
        assert_eq!(config.mode.system_root(), Some(root.path()));
    }

    #[test]
    fn test_mode_upload_only() {
        let from = tempdir().unwrap();
        let tools = tools_dir();
        let config = PipelineConfig::from_args(args(&[
            "--upload-from",
            from.path().to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
            "--endpoint",
            "https://a.example/symbol",
        ]))
        .unwrap();

        assert!(!config.mode.dumps());
        assert_eq!(config.mode.system_root(), None);
        assert_eq!(config.endpoints, vec!["https://a.example/symbol".to_string()]);
    }

    #[test]
    fn test_conflicting_modes() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let err = PipelineConfig::from_args(args(&["--upload-from", path, "--dump-to", path]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingModes(_)));

        let err = PipelineConfig::from_args(args(&["--upload-from", path, "--system-root", path]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingModes(_)));
    }

    #[test]
    fn test_missing_system_root() {
        let err = PipelineConfig::from_args(args(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSystemRoot));
    }

    #[test]
    fn test_dump_to_must_be_directory() {
        let root = tempdir().unwrap();
        let tools = tools_dir();
        let file = root.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        let err = PipelineConfig::from_args(args(&[
            "--system-root",
            root.path().to_str().unwrap(),
            "--dump-to",
            file.to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn test_missing_tool() {
        let root = tempdir().unwrap();
        let tools = tempdir().unwrap();
        let err = PipelineConfig::from_args(args(&[
            "--system-root",
            root.path().to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ToolNotFound { tool: DUMP_SYMS, .. }));
    }

    #[test]
    fn test_invalid_worker_count() {
        let root = tempdir().unwrap();
        let tools = tools_dir();
        let err = PipelineConfig::from_args(args(&[
            "--system-root",
            root.path().to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
            "--upload-workers",
            "0",
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidWorkerCount { stage: "upload", .. }
        ));
    }

    #[test]
    fn test_scan_path_must_be_rooted() {
        let root = tempdir().unwrap();
        let tools = tools_dir();
        let err = PipelineConfig::from_args(args(&[
            "--system-root",
            root.path().to_str().unwrap(),
            "--breakpad-tools",
            tools.path().to_str().unwrap(),
            "--scan-path",
            "usr/lib",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScanPath(_)));
    }
}
