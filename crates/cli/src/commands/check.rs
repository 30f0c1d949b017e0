use super::report::{exit_status, output_report, read_source, OutputFormat};
use anyhow::Result;
use clap::Args;
use proxyguard_scanners::{AnalysisConfig, AnalysisTarget, ScanningEngine};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Contract export of the deployed (or only) version
    pub old: PathBuf,

    /// Contract export of the version to upgrade to
    pub new: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

pub fn execute(args: &CheckArgs, config: AnalysisConfig) -> Result<ExitCode> {
    let engine = ScanningEngine::new(config).with_default_scanners();

    let (old, mut load_errors) = read_source(&engine, &args.old)?;
    let targets = match &args.new {
        Some(path) => {
            let (new, errors) = read_source(&engine, path)?;
            load_errors.extend(errors);
            AnalysisTarget::pair(old, new)
        }
        None => old.into_iter().map(AnalysisTarget::single).collect(),
    };
    debug!(targets = targets.len(), "prepared check targets");

    let report = engine.run_with_load_errors(&targets, load_errors);
    output_report(&report, args.format)?;
    Ok(exit_status(&report))
}
