//! Scanner execution and orchestration
//!
//! The scanning engine loads contract sources eagerly, runs the registered
//! scanners over every target in dependency order (targets in parallel) and
//! hands all findings to the aggregator for the final ordered report.

pub mod aggregator;
pub mod engine;

pub use aggregator::{sort_findings, FindingAggregator};
pub use engine::{qualify_duplicate_ids, AnalysisTarget, LoadError, ScanReport, ScannerInfo, ScanningEngine, SeverityCount};
