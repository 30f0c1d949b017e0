use super::report::OutputFormat;
use anyhow::Result;
use clap::Args;
use colored::*;
use proxyguard_scanners::{AnalysisConfig, ScanningEngine};
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

pub fn execute(args: &ListArgs, config: AnalysisConfig) -> Result<ExitCode> {
    let engine = ScanningEngine::new(config).with_default_scanners();
    let scanners = engine.list_scanners();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scanners)?),
        OutputFormat::Text => {
            for scanner in &scanners {
                let categories: Vec<&str> = scanner.categories.iter().map(|c| c.as_str()).collect();
                println!(
                    "{} {} (up to {})",
                    scanner.id.bold(),
                    scanner.name,
                    scanner.severity.as_str().color(scanner.severity.color())
                );
                println!("  {}", scanner.description);
                println!("  categories: {}", categories.join(", "));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
