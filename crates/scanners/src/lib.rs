//! ProxyGuard Scanners - Upgradeable Contract Safety Analysis
//!
//! Static checks over a parsed contract model: unprotected or re-enterable
//! initializers, storage layout incompatibilities between versions, and
//! upgrade entry points without effective authorization. Each analyzer is a
//! [`Scanner`]; the [`ScanningEngine`] runs them as a pipeline and the
//! aggregator merges their findings into one ordered report.

pub mod analysis;
pub mod core;
pub mod model;
pub mod runner;

pub mod initialization;
pub mod storage_layout;
pub mod upgrade_authorization;

pub use core::{
    AnalysisConfig, AnalysisContext, Category, Finding, Location, ModelError, Scanner, Severity,
};

pub use model::{ContractLoader, ContractVersion};

pub use runner::{qualify_duplicate_ids, AnalysisTarget, FindingAggregator, LoadError, ScanReport, ScanningEngine};

pub use initialization::InitializationScanner;
pub use storage_layout::{diff_layouts, StorageLayoutScanner};
pub use upgrade_authorization::UpgradeAuthorizationScanner;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_registers_analyzers_in_pipeline_order() {
        let engine = ScanningEngine::default();
        let ids: Vec<String> = engine.list_scanners().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["storage-layout", "initialization", "upgrade-authorization"]);
    }
}
