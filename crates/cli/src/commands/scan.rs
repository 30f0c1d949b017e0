//! Batch analysis over contract exports on disk.
//!
//! Every `*.json` file under the given paths is loaded before analysis
//! starts; each contract is then analyzed on its own, in parallel.

use super::report::{exit_status, output_report, read_source, OutputFormat};
use anyhow::{bail, Result};
use clap::Args;
use proxyguard_scanners::{qualify_duplicate_ids, AnalysisConfig, AnalysisTarget, ScanningEngine};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use walkdir::WalkDir;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Files or directories to scan
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

pub fn execute(args: &ScanArgs, config: AnalysisConfig) -> Result<ExitCode> {
    let engine = ScanningEngine::new(config).with_default_scanners();

    let mut files = Vec::new();
    for path in &args.paths {
        files.extend(find_json_files(path)?);
    }
    if files.is_empty() {
        bail!("no .json contract exports found");
    }
    info!(files = files.len(), "loading contract exports");

    let mut sources = Vec::new();
    let mut load_errors = Vec::new();
    for file in &files {
        let (versions, errors) = read_source(&engine, file)?;
        sources.push((file.display().to_string(), versions));
        load_errors.extend(errors);
    }
    let targets: Vec<AnalysisTarget> = qualify_duplicate_ids(sources)
        .into_iter()
        .map(AnalysisTarget::single)
        .collect();

    let report = engine.run_with_load_errors(&targets, load_errors);
    output_report(&report, args.format)?;
    Ok(exit_status(&report))
}

fn find_json_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}
