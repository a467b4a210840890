//! Command-line interface for polyaudit.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use crate::config::{self, AuditConfig};
use crate::digest;
use crate::language::Lang;
use crate::registry;
use crate::report::{self, FileReport};

/// Exit codes.
pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_FINDINGS: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Static analysis for smart contracts and the services around them.
///
/// polyaudit scans Move, Solidity, Vyper, Go and Rust sources for
/// reentrancy, unchecked arithmetic, missing access control, unsafe
/// external calls, logic defects, misused randomness and freeze bypasses.
#[derive(Parser)]
#[command(name = "polyaudit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze files or directories
    #[command(visible_alias = "check")]
    Scan(ScanArgs),
    /// List supported language tags
    Languages,
    /// Read an audit request as JSON on stdin and answer on stdout
    AuditRequest(AuditRequestArgs),
}

/// Arguments for the scan command.
#[derive(Parser)]
pub struct ScanArgs {
    /// Files or directories to scan
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Analyze every file with this language tag instead of using extensions
    #[arg(short, long)]
    pub language: Option<String>,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the audit-request command.
#[derive(Parser)]
pub struct AuditRequestArgs {
    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Install the tracing subscriber. Logs go to stderr.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load the explicit config, a discovered one, or the defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<AuditConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config::discover(&std::env::current_dir()?),
    };

    let config = match path {
        Some(p) => {
            tracing::debug!(path = %p.display(), "loading config");
            AuditConfig::parse_file(&p)
                .with_context(|| format!("loading config {}", p.display()))?
        }
        None => AuditConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Language for a file: the override when given, otherwise the extension,
/// which equals the language tag.
pub fn lang_for_path(path: &Path, language: Option<Lang>) -> Option<Lang> {
    if language.is_some() {
        return language;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Lang::from_tag)
}

/// Collect files to scan under `root`.
pub fn collect_files(
    root: &Path,
    config: &AuditConfig,
    language: Option<Lang>,
) -> anyhow::Result<Vec<(PathBuf, Lang)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            // Skip hidden directories, but not the root itself
            if e.depth() > 0 && e.file_type().is_dir() && name.starts_with('.') {
                return false;
            }
            !config.is_path_excluded(e.path())
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(lang) = lang_for_path(entry.path(), language) {
            files.push((entry.path().to_path_buf(), lang));
        }
    }

    Ok(files)
}

/// Run the scan command.
pub fn run_scan(args: &ScanArgs) -> anyhow::Result<i32> {
    // Validate format
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let language = match &args.language {
        Some(tag) => match registry::get_analyzer(tag) {
            Ok(analyzer) => Some(analyzer.lang()),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Run 'polyaudit languages' to see supported tags");
                return Ok(EXIT_ERROR);
            }
        },
        None => None,
    };

    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(EXIT_ERROR);
        }
    };

    // Collect files to scan
    let mut files = Vec::new();
    for path in &args.paths {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Error: cannot access path {:?}: {}", path, e);
                return Ok(EXIT_ERROR);
            }
        };

        if metadata.is_dir() {
            files.extend(collect_files(path, &config, language)?);
        } else if let Some(lang) = lang_for_path(path, language) {
            files.push((path.clone(), lang));
        } else {
            tracing::warn!(path = %path.display(), "no analyzer for file, skipping");
        }
    }

    if files.is_empty() {
        eprintln!("Warning: no files to scan");
        return Ok(EXIT_CLEAN);
    }

    let mut reports = Vec::with_capacity(files.len());
    for (path, lang) in &files {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let path_str = path.to_string_lossy().to_string();
        let findings = registry::analyze_with(&config, lang.tag(), &source, &path_str)?;
        tracing::debug!(path = %path_str, findings = findings.len(), "analyzed file");
        reports.push(FileReport::new(&path_str, *lang, &source, findings));
    }

    match args.format.as_str() {
        "json" => report::write_json(&reports)?,
        _ => report::write_pretty(&reports),
    }

    // Return appropriate exit code
    if report::finding_count(&reports) == 0 {
        Ok(EXIT_CLEAN)
    } else {
        Ok(EXIT_FINDINGS)
    }
}

/// One row per supported tag: tag, display name and detectors in run order.
fn language_rows() -> anyhow::Result<Vec<String>> {
    let mut rows = Vec::new();
    for tag in registry::supported_languages() {
        let analyzer = registry::get_analyzer(tag)?;
        rows.push(format!(
            "  {:<8} {:<10} {}",
            tag,
            analyzer.lang().display_name(),
            analyzer.detector_names().join(", ")
        ));
    }
    Ok(rows)
}

/// Run the languages command.
pub fn run_languages() -> anyhow::Result<i32> {
    for row in language_rows()? {
        println!("{}", row);
    }
    Ok(EXIT_CLEAN)
}

/// Run the audit-request command.
pub fn run_audit_request(args: &AuditRequestArgs) -> anyhow::Result<i32> {
    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading request from stdin")?;

    match digest::handle_json(&config, &input) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.findings.is_empty() {
                Ok(EXIT_CLEAN)
            } else {
                Ok(EXIT_FINDINGS)
            }
        }
        Err(error) => {
            println!("{}", serde_json::to_string_pretty(&error)?);
            Ok(EXIT_ERROR)
        }
    }
}
