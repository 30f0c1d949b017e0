//! Finding Aggregator
//!
//! Merges findings from every analyzer and every target into one ordered
//! sequence. Findings agreeing on category and location are one issue: the
//! highest severity wins and annotations are unioned. Output is sorted by
//! severity (descending), then category name, location and explanation, so
//! the same input always yields the same sequence.

use crate::core::{DeduplicationStats, Finding, FindingFingerprint};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub struct FindingAggregator {
    deduplicate: bool,
}

impl FindingAggregator {
    pub fn new(deduplicate: bool) -> Self {
        Self { deduplicate }
    }

    pub fn aggregate(&self, findings: Vec<Finding>) -> (Vec<Finding>, Option<DeduplicationStats>) {
        if !self.deduplicate {
            let mut findings = findings;
            sort_findings(&mut findings);
            return (findings, None);
        }

        let original_count = findings.len();
        let mut merged: BTreeMap<FindingFingerprint, Finding> = BTreeMap::new();

        for finding in findings {
            let fingerprint = FindingFingerprint::from_finding(&finding);
            match merged.remove(&fingerprint) {
                Some(existing) => {
                    merged.insert(fingerprint, merge(existing, finding));
                }
                None => {
                    merged.insert(fingerprint, finding);
                }
            }
        }

        let mut deduped: Vec<Finding> = merged.into_values().collect();
        sort_findings(&mut deduped);

        let stats = DeduplicationStats {
            original_count,
            deduped_count: deduped.len(),
            removed_count: original_count - deduped.len(),
        };
        (deduped, Some(stats))
    }
}

impl Default for FindingAggregator {
    fn default() -> Self {
        Self::new(true)
    }
}

fn merge(existing: Finding, candidate: Finding) -> Finding {
    let (mut kept, other) = match candidate.severity.cmp(&existing.severity) {
        Ordering::Greater => (candidate, existing),
        Ordering::Equal if candidate.explanation < existing.explanation => (candidate, existing),
        _ => (existing, candidate),
    };
    for annotation in other.annotations {
        kept = kept.with_annotation(annotation);
    }
    kept
}

pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
            .then_with(|| a.location.cmp(&b.location))
            .then_with(|| a.explanation.cmp(&b.explanation))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Category, Location, Severity};

    fn finding(category: Category, severity: Severity, function: &str) -> Finding {
        Finding::new(
            "test",
            category,
            severity,
            Location::function("Vault", function),
            "title",
            "explanation",
        )
    }

    #[test]
    fn test_duplicates_keep_highest_severity_and_all_annotations() {
        let low = finding(Category::UpgradeUnauthorized, Severity::High, "upgradeTo(address)")
            .with_annotation("unclassified modifiers");
        let high = finding(Category::UpgradeUnauthorized, Severity::Critical, "upgradeTo(address)")
            .with_annotation("owner takeover chain");

        let (findings, stats) = FindingAggregator::default().aggregate(vec![low, high]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].annotations.len(), 2);
        assert_eq!(stats.map(|s| s.removed_count), Some(1));
    }

    #[test]
    fn test_order_is_severity_then_category_name() {
        let (findings, _) = FindingAggregator::default().aggregate(vec![
            finding(Category::InitUnvalidatedParam, Severity::Medium, "initialize(address)"),
            finding(Category::UpgradeEmptyGuard, Severity::Critical, "_authorizeUpgrade(address)"),
            finding(Category::InitUnprotected, Severity::Critical, "initialize(address)"),
        ]);
        let order: Vec<Category> = findings.iter().map(|f| f.category).collect();
        assert_eq!(
            order,
            vec![
                Category::InitUnprotected,
                Category::UpgradeEmptyGuard,
                Category::InitUnvalidatedParam
            ]
        );
    }
}
