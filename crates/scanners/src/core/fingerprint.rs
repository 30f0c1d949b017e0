//! Finding fingerprints for deduplication.
//!
//! Two findings are the same issue when they agree on category and location;
//! the scanner that produced them and the wording do not matter.

use crate::core::{Category, Finding, Location};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FindingFingerprint {
    category: Category,
    location: Location,
}

impl FindingFingerprint {
    pub fn from_finding(finding: &Finding) -> Self {
        Self {
            category: finding.category,
            location: finding.location.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeduplicationStats {
    pub original_count: usize,
    pub deduped_count: usize,
    pub removed_count: usize,
}

impl DeduplicationStats {
    pub fn reduction_percentage(&self) -> f64 {
        if self.original_count == 0 {
            0.0
        } else {
            (self.removed_count as f64 / self.original_count as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    fn finding(scanner: &str, severity: Severity, explanation: &str) -> Finding {
        Finding::new(
            scanner,
            Category::InitUnprotected,
            severity,
            Location::function("Vault", "initialize(address)"),
            "Unprotected initializer",
            explanation,
        )
    }

    #[test]
    fn test_fingerprint_ignores_wording_and_severity() {
        let a = FindingFingerprint::from_finding(&finding("a", Severity::Critical, "x"));
        let b = FindingFingerprint::from_finding(&finding("b", Severity::Medium, "y"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_reduction_percentage() {
        let stats = DeduplicationStats {
            original_count: 4,
            deduped_count: 3,
            removed_count: 1,
        };
        assert!((stats.reduction_percentage() - 25.0).abs() < f64::EPSILON);
        assert_eq!(DeduplicationStats::default().reduction_percentage(), 0.0);
    }
}
