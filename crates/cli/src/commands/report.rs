//! Loading inputs and rendering reports shared by every command.

use super::{EXIT_BLOCKING, EXIT_CLEAN, EXIT_FAILURE};
use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use proxyguard_scanners::{AnalysisConfig, ContractVersion, LoadError, ScanReport, ScanningEngine};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    AnalysisConfig::from_json_str(&raw)
        .with_context(|| format!("invalid config {}", path.display()))
}

/// Reads and loads one contract export. IO failures are errors; contracts
/// that fail to load are returned as load errors so the rest of the batch
/// still runs.
pub fn read_source(
    engine: &ScanningEngine,
    path: &Path,
) -> Result<(Vec<Arc<ContractVersion>>, Vec<LoadError>)> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(engine.load_source(&path.display().to_string(), &json))
}

#[derive(Serialize)]
struct JsonReport<'a> {
    tool: &'static str,
    version: &'static str,
    generated_at: String,
    #[serde(flatten)]
    report: &'a ScanReport,
}

pub fn output_report(report: &ScanReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let wrapped = JsonReport {
                tool: "audit",
                version: proxyguard_scanners::VERSION,
                generated_at: chrono::Utc::now().to_rfc3339(),
                report,
            };
            println!("{}", serde_json::to_string_pretty(&wrapped)?);
        }
        OutputFormat::Text => print_text(report),
    }
    Ok(())
}

fn print_text(report: &ScanReport) {
    for error in report.load_errors() {
        let what = match &error.contract {
            Some(contract) => format!("{} ({})", error.source, contract),
            None => error.source.clone(),
        };
        eprintln!("{} {}: {}", "load error".red().bold(), what, error.error);
    }

    let findings = report.findings();
    if findings.is_empty() {
        println!(
            "{} ({} contract(s) analyzed)",
            "No findings".green().bold(),
            report.contracts_analyzed()
        );
        return;
    }

    for finding in findings {
        println!(
            "\n{} {} {}",
            format!("[{}]", finding.severity.as_str().to_uppercase())
                .color(finding.severity.color())
                .bold(),
            finding.category.as_str().bold(),
            finding.location.to_string().cyan()
        );
        println!("  {}", finding.title);
        println!("  {}", finding.explanation);
        for annotation in &finding.annotations {
            println!("  {} {}", "note:".yellow(), annotation);
        }
    }

    let count = report.count_by_severity();
    println!(
        "\n{} {} finding(s) across {} contract(s): {} critical, {} high, {} medium, {} low, {} info",
        "Summary:".bold(),
        findings.len(),
        report.contracts_analyzed(),
        count.critical,
        count.high,
        count.medium,
        count.low,
        count.info
    );

    if let Some(stats) = report.deduplication_stats() {
        if stats.removed_count > 0 {
            println!(
                "Merged {} duplicate finding(s) ({:.1}%)",
                stats.removed_count,
                stats.reduction_percentage()
            );
        }
    }
}

pub fn exit_status(report: &ScanReport) -> ExitCode {
    if report.contracts_analyzed() == 0 && !report.load_errors().is_empty() {
        ExitCode::from(EXIT_FAILURE)
    } else if report.has_blocking_findings() {
        ExitCode::from(EXIT_BLOCKING)
    } else {
        ExitCode::from(EXIT_CLEAN)
    }
}
