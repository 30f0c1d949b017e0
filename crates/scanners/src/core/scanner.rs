//! Scanner trait shared by the upgrade-safety analyzers.
//!
//! Every analyzer is an independent scanner with no mutable state. The engine
//! feeds them one [`AnalysisContext`] at a time, in registration order, so a
//! scanner that needs an earlier scanner's results (the upgrade analyzer reads
//! initialization findings) only has to be registered after it.

use crate::core::{AnalysisContext, Category, Finding, Severity};
use anyhow::Result;

pub trait Scanner: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "No description provided"
    }

    /// Highest severity this scanner can emit.
    fn severity(&self) -> Severity;

    fn categories(&self) -> &'static [Category];

    fn scan(&self, context: &AnalysisContext) -> Result<Vec<Finding>>;
}
