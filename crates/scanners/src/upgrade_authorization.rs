//! Upgrade Authorization Analyzer
//!
//! Judges who can change the implementation of an upgradeable contract.
//! Entry points are externally callable upgrade candidates plus any external
//! function that reaches an internal one; authorization hooks are judged on
//! their own and entry points delegating to a hook are judged through it.
//!
//! When the access check of an upgrade path reads a slot that an unprotected
//! initializer can overwrite (reported earlier in the pipeline), the upgrade
//! is escalated as an owner takeover chain.

use crate::core::{
    AnalysisConfig, AnalysisContext, Category, Finding, Location, Scanner, Severity,
};
use crate::model::{ContractVersion, FunctionInfo};
use anyhow::Result;
use std::collections::BTreeSet;

const SCANNER_ID: &str = "upgrade-authorization";

pub struct UpgradeAuthorizationScanner;

impl UpgradeAuthorizationScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        version: &ContractVersion,
        config: &AnalysisConfig,
        prior: &[Finding],
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let hooks: BTreeSet<&str> = version
            .functions()
            .filter(|f| f.has_body && config.is_authorization_hook(&f.name))
            .map(|f| f.signature.as_str())
            .collect();

        for hook in &hooks {
            if let Some(function) = version.function(hook) {
                findings.extend(self.check_hook(version, function, prior));
            }
        }

        for entry in entry_points(version, config) {
            let delegates = version
                .call_graph()
                .reachable_from(&entry.signature)
                .into_iter()
                .any(|callee| hooks.contains(callee.as_str()));
            findings.extend(self.check_entry(version, entry, delegates, prior));
        }

        findings
    }

    fn check_hook(&self, version: &ContractVersion, hook: &FunctionInfo, prior: &[Finding]) -> Vec<Finding> {
        let protection = &hook.protection;

        if protection.has_access_control() {
            return takeover_chain(version, hook, &protection.access_slots(), prior)
                .into_iter()
                .collect();
        }

        // e.g. a timelock or approval registry consulted for the new implementation
        let state_check = hook
            .summary
            .checks
            .iter()
            .any(|c| !c.reads_caller && !c.slots.is_empty());
        if state_check && protection.noop_modifiers.is_empty() {
            return Vec::new();
        }

        if !protection.unresolved.is_empty() && protection.noop_modifiers.is_empty() {
            return vec![unauthorized(
                version,
                hook,
                format!(
                    "Authorization hook '{}' performs no check of its own and relies on \
                     modifiers {} that could not be classified as access control.",
                    hook.signature,
                    protection.unresolved.join(", ")
                ),
            )
            .with_annotation("unclassified modifiers")];
        }

        let detail = if !protection.noop_modifiers.is_empty() {
            format!(
                "its modifiers {} do nothing besides running the function body",
                protection.noop_modifiers.join(", ")
            )
        } else if hook.summary.checks.is_empty() {
            "its body contains no require, assert or revert condition".to_string()
        } else {
            "its checks depend on neither the caller nor contract state".to_string()
        };

        vec![Finding::new(
            SCANNER_ID,
            Category::UpgradeEmptyGuard,
            Severity::Critical,
            Location::function(version.id(), &hook.signature),
            "Empty upgrade authorization",
            format!(
                "Authorization hook '{}' guards upgrades, but {}. Anyone can replace the \
                 implementation.",
                hook.signature, detail
            ),
        )]
    }

    fn check_entry(
        &self,
        version: &ContractVersion,
        entry: &FunctionInfo,
        delegates_to_hook: bool,
        prior: &[Finding],
    ) -> Vec<Finding> {
        let protection = &entry.protection;

        if protection.has_access_control() {
            return takeover_chain(version, entry, &protection.access_slots(), prior)
                .into_iter()
                .collect();
        }

        if delegates_to_hook {
            return Vec::new();
        }

        if !protection.noop_modifiers.is_empty() && protection.unresolved.is_empty() {
            return vec![Finding::new(
                SCANNER_ID,
                Category::UpgradeEmptyGuard,
                Severity::Critical,
                Location::function(version.id(), &entry.signature),
                "Empty upgrade authorization",
                format!(
                    "'{}' changes the implementation behind modifiers {} that perform no \
                     check. Anyone can replace the implementation.",
                    entry.signature,
                    protection.noop_modifiers.join(", ")
                ),
            )];
        }

        let mut explanation = format!(
            "'{}' is {} and changes the implementation without any access control. \
             Anyone can replace the implementation.",
            entry.signature, entry.visibility
        );
        let mut finding_annotation = None;
        if !protection.unresolved.is_empty() {
            explanation.push_str(&format!(
                " Modifiers {} could not be classified as access control.",
                protection.unresolved.join(", ")
            ));
            finding_annotation = Some("unclassified modifiers");
        }

        let finding = unauthorized(version, entry, explanation);
        vec![match finding_annotation {
            Some(annotation) => finding.with_annotation(annotation),
            None => finding,
        }]
    }
}

impl Default for UpgradeAuthorizationScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for UpgradeAuthorizationScanner {
    fn id(&self) -> &'static str {
        SCANNER_ID
    }

    fn name(&self) -> &'static str {
        "Upgrade Authorization Analyzer"
    }

    fn description(&self) -> &'static str {
        "Detects upgrade entry points and authorization hooks without effective access control"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn categories(&self) -> &'static [Category] {
        &[Category::UpgradeUnauthorized, Category::UpgradeEmptyGuard]
    }

    fn scan(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let prior: Vec<Finding> = context
            .prior_findings_of(Category::InitUnprotected)
            .cloned()
            .collect();
        Ok(self.analyze(context.current(), context.config(), &prior))
    }
}

/// Externally callable, implemented functions that are upgrade candidates or
/// reach one. Authorization hooks are judged separately.
fn entry_points<'v>(version: &'v ContractVersion, config: &AnalysisConfig) -> Vec<&'v FunctionInfo> {
    let internal_candidates: BTreeSet<&str> = version
        .upgrade_candidates()
        .filter(|f| !f.is_externally_callable() && !config.is_authorization_hook(&f.name))
        .map(|f| f.signature.as_str())
        .collect();

    version
        .functions()
        .filter(|f| f.is_externally_callable() && f.has_body && !f.is_constructor())
        .filter(|f| !config.is_authorization_hook(&f.name))
        .filter(|f| {
            f.is_upgrade_candidate
                || version
                    .call_graph()
                    .reachable_from(&f.signature)
                    .iter()
                    .any(|callee| internal_candidates.contains(callee.as_str()))
        })
        .collect()
}

fn unauthorized(version: &ContractVersion, function: &FunctionInfo, explanation: String) -> Finding {
    Finding::new(
        SCANNER_ID,
        Category::UpgradeUnauthorized,
        Severity::Critical,
        Location::function(version.id(), &function.signature),
        "Unauthorized upgrade",
        explanation,
    )
}

/// Escalates when an unprotected initializer can overwrite a slot that the
/// upgrade access check depends on.
fn takeover_chain(
    version: &ContractVersion,
    function: &FunctionInfo,
    access_slots: &BTreeSet<usize>,
    prior: &[Finding],
) -> Option<Finding> {
    if access_slots.is_empty() {
        return None;
    }

    for finding in prior {
        if finding.category != Category::InitUnprotected || !finding.is_in(version.id()) {
            continue;
        }
        let Some(initializer) = finding.location.function.as_deref() else {
            continue;
        };
        let overwritten: Vec<String> = version
            .effective_writes(initializer)
            .intersection(access_slots)
            .map(|index| version.slot_label(*index))
            .collect();
        if overwritten.is_empty() {
            continue;
        }

        return Some(
            unauthorized(
                version,
                function,
                format!(
                    "'{}' is access controlled through {}, but unprotected initializer '{}' \
                     lets anyone overwrite {} and then authorize an upgrade.",
                    function.signature,
                    overwritten.join(", "),
                    initializer,
                    overwritten.join(", ")
                ),
            )
            .with_annotation("owner takeover chain"),
        );
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContractLoader;

    fn load(json: &str) -> ContractVersion {
        let config = AnalysisConfig::default();
        ContractLoader::new(&config)
            .load_json(json)
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_entry_delegating_to_guarded_hook_is_clean() {
        let version = load(
            r#"{
            "name": "Token",
            "storage": [{"name": "owner", "type": "address"}],
            "modifiers": [{"name": "onlyOwner", "body": [
                {"kind": "require", "condition": {"kind": "binary", "op": "==",
                    "left": {"kind": "member", "object": {"kind": "identifier", "name": "msg"}, "member": "sender"},
                    "right": {"kind": "identifier", "name": "owner"}}},
                {"kind": "placeholder"}]}],
            "functions": [
                {"name": "upgradeTo", "visibility": "external",
                 "parameters": [{"name": "next", "type": "address"}],
                 "body": [{"kind": "call", "callee": "_authorizeUpgrade",
                           "arguments": [{"kind": "identifier", "name": "next"}]}]},
                {"name": "_authorizeUpgrade", "visibility": "internal",
                 "parameters": [{"name": "next", "type": "address"}],
                 "modifiers": ["onlyOwner"], "body": []}
            ]
        }"#,
        );
        let findings =
            UpgradeAuthorizationScanner::new().analyze(&version, &AnalysisConfig::default(), &[]);
        assert!(findings.is_empty(), "unexpected findings: {:?}", findings);
    }

    #[test]
    fn test_external_function_reaching_internal_setter_is_an_entry_point() {
        let version = load(
            r#"{
            "name": "Proxy",
            "storage": [{"name": "implementation", "type": "address"}],
            "functions": [
                {"name": "migrate", "visibility": "external",
                 "parameters": [{"name": "next", "type": "address"}],
                 "body": [{"kind": "call", "callee": "_setImplementation",
                           "arguments": [{"kind": "identifier", "name": "next"}]}]},
                {"name": "_setImplementation", "visibility": "private",
                 "parameters": [{"name": "next", "type": "address"}],
                 "body": [{"kind": "assign", "target": {"kind": "identifier", "name": "implementation"},
                           "value": {"kind": "identifier", "name": "next"}}]}
            ]
        }"#,
        );
        let findings =
            UpgradeAuthorizationScanner::new().analyze(&version, &AnalysisConfig::default(), &[]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::UpgradeUnauthorized);
        assert_eq!(findings[0].location.function.as_deref(), Some("migrate(address)"));
    }
}
