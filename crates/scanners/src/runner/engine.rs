use crate::core::{
    AnalysisConfig, AnalysisContext, Category, DeduplicationStats, Finding, Scanner, Severity,
};
use crate::initialization::InitializationScanner;
use crate::model::{parse_contracts, ContractLoader, ContractVersion};
use crate::runner::aggregator::FindingAggregator;
use crate::storage_layout::StorageLayoutScanner;
use crate::upgrade_authorization::UpgradeAuthorizationScanner;
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One unit of analysis: a contract version, optionally paired with the
/// version it upgrades from.
#[derive(Debug, Clone)]
pub struct AnalysisTarget {
    pub current: Arc<ContractVersion>,
    pub previous: Option<Arc<ContractVersion>>,
}

impl AnalysisTarget {
    pub fn single(current: Arc<ContractVersion>) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    pub fn upgrade(previous: Arc<ContractVersion>, current: Arc<ContractVersion>) -> Self {
        Self {
            current,
            previous: Some(previous),
        }
    }

    /// Pairs versions by contract name. Contracts present on only one side
    /// are analyzed alone.
    pub fn pair(old: Vec<Arc<ContractVersion>>, new: Vec<Arc<ContractVersion>>) -> Vec<Self> {
        let mut old_by_name: BTreeMap<String, Arc<ContractVersion>> = old
            .into_iter()
            .map(|v| (v.name().to_string(), v))
            .collect();

        let mut targets = Vec::new();
        for current in new {
            match old_by_name.remove(current.name()) {
                Some(previous) => targets.push(Self::upgrade(previous, current)),
                None => targets.push(Self::single(current)),
            }
        }
        targets.extend(old_by_name.into_values().map(Self::single));
        targets
    }
}

/// Flattens per-source loads. Contracts whose id occurs in more than one
/// source get a source-qualified id, so the aggregator keeps their findings
/// apart instead of merging them.
pub fn qualify_duplicate_ids(sources: Vec<(String, Vec<Arc<ContractVersion>>)>) -> Vec<Arc<ContractVersion>> {
    let mut seen_in: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for (label, versions) in &sources {
        for version in versions {
            seen_in.entry(version.id().to_string()).or_default().insert(label.as_str());
        }
    }
    let shared: BTreeSet<String> = seen_in
        .into_iter()
        .filter(|(_, labels)| labels.len() > 1)
        .map(|(id, _)| id)
        .collect();

    let mut flattened = Vec::new();
    for (label, versions) in &sources {
        for version in versions {
            if shared.contains(version.id()) {
                debug!(contract = version.id(), source = %label, "contract id shared across sources");
                flattened.push(Arc::new(version.qualified_by_source(label)));
            } else {
                flattened.push(Arc::clone(version));
            }
        }
    }
    flattened
}

/// A contract (or a whole source) that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadError {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannerInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub categories: Vec<Category>,
}

pub struct ScanningEngine {
    scanners: Vec<Arc<dyn Scanner>>,
    config: Arc<AnalysisConfig>,
}

impl ScanningEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            scanners: Vec::new(),
            config: Arc::new(config),
        }
    }

    /// Registers the three analyzers in dependency order. The upgrade
    /// analyzer reads initialization findings, so it must come last.
    pub fn with_default_scanners(self) -> Self {
        self.add_scanner(StorageLayoutScanner::new())
            .add_scanner(InitializationScanner::new())
            .add_scanner(UpgradeAuthorizationScanner::new())
    }

    pub fn add_scanner<S: Scanner + 'static>(mut self, scanner: S) -> Self {
        self.scanners.push(Arc::new(scanner));
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn list_scanners(&self) -> Vec<ScannerInfo> {
        self.scanners
            .iter()
            .map(|s| ScannerInfo {
                id: s.id().to_string(),
                name: s.name().to_string(),
                description: s.description().to_string(),
                severity: s.severity(),
                categories: s.categories().to_vec(),
            })
            .collect()
    }

    /// Loads every contract of one JSON source. A source that does not parse
    /// yields a single error; otherwise each malformed contract yields its
    /// own error and the rest still load.
    pub fn load_source(&self, label: &str, json: &str) -> (Vec<Arc<ContractVersion>>, Vec<LoadError>) {
        let parsed = match parse_contracts(json) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(source = label, error = %e, "failed to parse contract source");
                return (
                    Vec::new(),
                    vec![LoadError {
                        source: label.to_string(),
                        contract: None,
                        error: e.to_string(),
                    }],
                );
            }
        };

        let loader = ContractLoader::new(&self.config);
        let mut versions = Vec::new();
        let mut errors = Vec::new();
        for (contract, result) in parsed.iter().zip(loader.load_all(&parsed)) {
            match result {
                Ok(version) => versions.push(Arc::new(version)),
                Err(e) => {
                    warn!(source = label, contract = %contract.name, error = %e, "failed to load contract");
                    errors.push(LoadError {
                        source: label.to_string(),
                        contract: Some(contract.name.clone()),
                        error: e.to_string(),
                    });
                }
            }
        }
        (versions, errors)
    }

    /// Runs every registered scanner over one target. Each stage sees the
    /// findings of the stages before it through a freshly derived context.
    pub fn analyze_target(&self, target: &AnalysisTarget) -> Vec<Finding> {
        let mut context = AnalysisContext::new(Arc::clone(&target.current), Arc::clone(&self.config))
            .with_previous(target.previous.clone());

        for scanner in &self.scanners {
            match scanner.scan(&context) {
                Ok(findings) => {
                    debug!(
                        scanner = scanner.id(),
                        contract = target.current.id(),
                        findings = findings.len(),
                        "scanner finished"
                    );
                    context = context.with_findings(&findings);
                }
                Err(e) => {
                    warn!(
                        scanner = scanner.id(),
                        contract = target.current.id(),
                        error = %e,
                        "scanner failed, skipping"
                    );
                }
            }
        }

        context.prior_findings().to_vec()
    }

    pub fn run(&self, targets: &[AnalysisTarget]) -> ScanReport {
        self.run_with_load_errors(targets, Vec::new())
    }

    pub fn run_with_load_errors(&self, targets: &[AnalysisTarget], load_errors: Vec<LoadError>) -> ScanReport {
        info!(targets = targets.len(), load_errors = load_errors.len(), "starting analysis");

        let findings: Vec<Finding> = if self.config.parallel_execution {
            targets
                .par_iter()
                .map(|target| self.analyze_target(target))
                .flatten()
                .collect()
        } else {
            targets
                .iter()
                .flat_map(|target| self.analyze_target(target))
                .collect()
        };

        let (findings, deduplication_stats) =
            FindingAggregator::new(self.config.deduplication_enabled).aggregate(findings);

        ScanReport {
            findings,
            load_errors,
            contracts_analyzed: targets.len(),
            deduplication_stats,
        }
    }
}

impl Default for ScanningEngine {
    fn default() -> Self {
        Self::new(AnalysisConfig::default()).with_default_scanners()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    findings: Vec<Finding>,
    load_errors: Vec<LoadError>,
    contracts_analyzed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    deduplication_stats: Option<DeduplicationStats>,
}

impl ScanReport {
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn load_errors(&self) -> &[LoadError] {
        &self.load_errors
    }

    pub fn contracts_analyzed(&self) -> usize {
        self.contracts_analyzed
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn deduplication_stats(&self) -> Option<&DeduplicationStats> {
        self.deduplication_stats.as_ref()
    }

    /// Critical or high findings block an upgrade.
    pub fn has_blocking_findings(&self) -> bool {
        self.findings.iter().any(|f| f.severity.is_blocking())
    }

    pub fn count_by_severity(&self) -> SeverityCount {
        let mut count = SeverityCount::default();
        for finding in &self.findings {
            match finding.severity {
                Severity::Critical => count.critical += 1,
                Severity::High => count.high += 1,
                Severity::Medium => count.medium += 1,
                Severity::Low => count.low += 1,
                Severity::Info => count.info += 1,
            }
        }
        count
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeverityCount {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingScanner;

    impl Scanner for FailingScanner {
        fn id(&self) -> &'static str {
            "failing"
        }

        fn name(&self) -> &'static str {
            "Failing"
        }

        fn severity(&self) -> Severity {
            Severity::Info
        }

        fn categories(&self) -> &'static [Category] {
            &[]
        }

        fn scan(&self, _context: &AnalysisContext) -> Result<Vec<Finding>> {
            anyhow::bail!("boom")
        }
    }

    const UNGUARDED: &str = r#"{
        "name": "Vault",
        "storage": [{"name": "owner", "type": "address"}],
        "functions": [{"name": "initialize", "visibility": "external",
            "parameters": [{"name": "_owner", "type": "address"}],
            "body": [{"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
                      "value": {"kind": "identifier", "name": "_owner"}}]}]
    }"#;

    #[test]
    fn test_failing_scanner_does_not_stop_the_pipeline() {
        let engine = ScanningEngine::new(AnalysisConfig::default())
            .add_scanner(FailingScanner)
            .add_scanner(InitializationScanner::new());
        let (versions, errors) = engine.load_source("vault.json", UNGUARDED);
        assert!(errors.is_empty());

        let targets: Vec<_> = versions.into_iter().map(AnalysisTarget::single).collect();
        let report = engine.run(&targets);
        assert_eq!(report.findings().len(), 2);
        assert!(report.has_blocking_findings());
    }

    #[test]
    fn test_load_errors_are_recorded_per_contract() {
        let engine = ScanningEngine::default();
        let source = r#"[
            {"name": "Good", "storage": []},
            {"name": "Bad", "functions": [{"name": "f", "body": []}]}
        ]"#;
        let (versions, errors) = engine.load_source("batch.json", source);
        assert_eq!(versions.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].contract.as_deref(), Some("Bad"));

        let (_, errors) = engine.load_source("broken.json", "{");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contract.is_none());
    }

    #[test]
    fn test_pairing_by_name() {
        let engine = ScanningEngine::default();
        let (old, _) = engine.load_source("old.json", r#"[{"name": "A", "storage": []}, {"name": "B"}]"#);
        let (new, _) = engine.load_source("new.json", r#"[{"name": "A", "storage": []}, {"name": "C"}]"#);
        let targets = AnalysisTarget::pair(old, new);
        assert_eq!(targets.len(), 3);
        assert!(targets[0].previous.is_some());
        assert!(targets[1].previous.is_none());
    }

    #[test]
    fn test_same_contract_in_two_sources_stays_apart() {
        let engine = ScanningEngine::new(AnalysisConfig::default()).with_default_scanners();
        let (first, _) = engine.load_source("a/vault.json", UNGUARDED);
        let (second, _) = engine.load_source("b/vault.json", UNGUARDED);
        let (other, _) = engine.load_source("c/other.json", r#"{"name": "Other", "storage": []}"#);

        let versions = qualify_duplicate_ids(vec![
            ("a/vault.json".to_string(), first),
            ("b/vault.json".to_string(), second),
            ("c/other.json".to_string(), other),
        ]);
        let ids: Vec<&str> = versions.iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec!["Vault (a/vault.json)", "Vault (b/vault.json)", "Other"]);

        let targets: Vec<_> = versions.into_iter().map(AnalysisTarget::single).collect();
        let report = engine.run(&targets);
        let unprotected: Vec<&str> = report
            .findings()
            .iter()
            .filter(|f| f.category == Category::InitUnprotected)
            .map(|f| f.location.contract.as_str())
            .collect();
        assert_eq!(unprotected, vec!["Vault (a/vault.json)", "Vault (b/vault.json)"]);
    }
}
