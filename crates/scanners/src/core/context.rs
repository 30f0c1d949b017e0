use crate::core::{Category, Finding};
use crate::model::{ContractVersion, StorageSlot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reserved-slot convention. Whether a declared gap may absorb new variables
/// is a policy decision, so it can be switched off or pointed at other names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapPolicy {
    pub enabled: bool,
    pub name_prefixes: Vec<String>,
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            name_prefixes: vec!["__gap".to_string()],
        }
    }
}

impl GapPolicy {
    pub fn is_reserved(&self, slot: &StorageSlot) -> bool {
        self.enabled
            && slot.is_aggregate()
            && self
                .name_prefixes
                .iter()
                .any(|prefix| slot.name.starts_with(prefix.as_str()))
    }
}

/// Conventional names for guard modifiers whose definitions are not part of
/// the analyzed input (typically inherited from a library). Declared
/// modifiers are always classified by their body instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConventions {
    pub one_time: Vec<String>,
    pub initializing: Vec<String>,
    pub access: Vec<String>,
    /// Functions that permanently lock initialization when called from a
    /// constructor.
    pub initializer_locks: Vec<String>,
}

impl Default for GuardConventions {
    fn default() -> Self {
        Self {
            one_time: vec!["initializer".to_string(), "reinitializer".to_string()],
            initializing: vec!["onlyInitializing".to_string()],
            access: vec![
                "onlyOwner".to_string(),
                "onlyRole".to_string(),
                "onlyAdmin".to_string(),
                "onlyGovernance".to_string(),
            ],
            initializer_locks: vec!["_disableInitializers".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub parallel_execution: bool,
    pub deduplication_enabled: bool,
    pub gap_policy: GapPolicy,
    pub guards: GuardConventions,
    pub initializer_prefixes: Vec<String>,
    pub upgrade_entry_prefixes: Vec<String>,
    pub authorization_hooks: Vec<String>,
    pub implementation_slot_names: Vec<String>,
    pub authority_name_patterns: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parallel_execution: true,
            deduplication_enabled: true,
            gap_policy: GapPolicy::default(),
            guards: GuardConventions::default(),
            initializer_prefixes: vec!["initialize".to_string(), "reinitialize".to_string()],
            upgrade_entry_prefixes: vec!["upgradeTo".to_string()],
            authorization_hooks: vec!["_authorizeUpgrade".to_string()],
            implementation_slot_names: vec![
                "implementation".to_string(),
                "_implementation".to_string(),
            ],
            authority_name_patterns: vec![
                "owner".to_string(),
                "admin".to_string(),
                "governance".to_string(),
                "guardian".to_string(),
            ],
        }
    }
}

impl AnalysisConfig {
    /// Parses a (possibly partial) JSON override; missing fields keep their
    /// defaults.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn is_initializer_name(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.initializer_prefixes
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_ascii_lowercase()))
    }

    pub fn is_authorization_hook(&self, name: &str) -> bool {
        self.authorization_hooks.iter().any(|hook| hook == name)
    }

    pub fn is_upgrade_entry_name(&self, name: &str) -> bool {
        self.upgrade_entry_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
            || self.is_authorization_hook(name)
    }

    pub fn is_implementation_slot(&self, name: &str) -> bool {
        self.implementation_slot_names.iter().any(|n| n == name)
    }

    pub fn is_authority_name(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.authority_name_patterns
            .iter()
            .any(|pattern| lower.contains(&pattern.to_ascii_lowercase()))
    }
}

/// Read-only state handed to each scanner. Findings from earlier pipeline
/// stages accumulate here; a stage never mutates a context, it derives the
/// next one with [`AnalysisContext::with_findings`].
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    current: Arc<ContractVersion>,
    previous: Option<Arc<ContractVersion>>,
    config: Arc<AnalysisConfig>,
    findings: Arc<[Finding]>,
}

impl AnalysisContext {
    pub fn new(current: Arc<ContractVersion>, config: Arc<AnalysisConfig>) -> Self {
        Self {
            current,
            previous: None,
            config,
            findings: Arc::from(Vec::new()),
        }
    }

    pub fn with_previous(mut self, previous: Option<Arc<ContractVersion>>) -> Self {
        self.previous = previous;
        self
    }

    pub fn with_findings(&self, new_findings: &[Finding]) -> Self {
        if new_findings.is_empty() {
            return self.clone();
        }

        let mut findings = Vec::with_capacity(self.findings.len() + new_findings.len());
        findings.extend_from_slice(&self.findings);
        findings.extend_from_slice(new_findings);

        Self {
            current: Arc::clone(&self.current),
            previous: self.previous.clone(),
            config: Arc::clone(&self.config),
            findings: Arc::from(findings),
        }
    }

    pub fn current(&self) -> &ContractVersion {
        &self.current
    }

    pub fn previous(&self) -> Option<&ContractVersion> {
        self.previous.as_deref()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn prior_findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn prior_findings_of(&self, category: Category) -> impl Iterator<Item = &Finding> {
        let contract = self.current.id();
        self.findings
            .iter()
            .filter(move |f| f.category == category && f.is_in(contract))
    }
}
