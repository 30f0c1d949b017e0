//! Initialization Analyzer
//!
//! Checks initializer candidates of one contract version:
//!
//! - externally callable initializers without a one-time guard
//!   (`init-unprotected`, critical; the explanation calls out direct exposure
//!   when the version is a proxy implementation)
//! - proxy implementations whose guarded initializers were never locked by
//!   the constructor (`init-unprotected`, medium)
//! - helpers reached from a guarded initializer, or internal initializers,
//!   that write critical slots and can also be reached without any guard
//!   (`init-reentry`, high)
//! - parameters written into critical slots without a zero or range check
//!   anywhere along the call chain (`init-unvalidated-param`, medium)

use crate::analysis::behavior::{normalize_callee, ArithmeticRole, Requirement, ValueSource};
use crate::core::{AnalysisConfig, AnalysisContext, Category, Finding, Location, Scanner, Severity};
use crate::model::{ContractVersion, FunctionInfo, SlotRole};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

const SCANNER_ID: &str = "initialization";

pub struct InitializationScanner;

impl InitializationScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, version: &ContractVersion, config: &AnalysisConfig) -> Vec<Finding> {
        let mut findings = Vec::new();
        findings.extend(self.check_unprotected(version));
        findings.extend(self.check_implementation_lock(version, config));
        findings.extend(self.check_reentry(version));
        findings.extend(self.check_unvalidated_params(version));
        findings
    }

    fn check_unprotected(&self, version: &ContractVersion) -> Vec<Finding> {
        let mut findings = Vec::new();

        for function in version.initializer_candidates() {
            if function.is_constructor() || !function.is_externally_callable() || !function.has_body {
                continue;
            }
            if function.protection.is_initialization_guarded() {
                continue;
            }

            let critical: Vec<String> = version
                .effective_writes(&function.signature)
                .intersection(&version.critical_slots())
                .map(|index| version.slot_label(*index))
                .collect();

            let mut explanation = format!(
                "'{}' is {} and has no one-time guard: anyone can call it, any number of times.",
                function.signature, function.visibility
            );
            if !critical.is_empty() {
                explanation.push_str(&format!(" It writes {}.", critical.join(", ")));
            }
            if !function.protection.unresolved.is_empty() {
                explanation.push_str(&format!(
                    " Modifiers {} could not be classified and were not counted as guards.",
                    function.protection.unresolved.join(", ")
                ));
            }

            if version.is_proxy_implementation() {
                explanation.push_str(
                    " This is a proxy implementation, so the logic contract itself can be \
                     initialized directly outside the proxy context.",
                );
            }

            let finding = Finding::new(
                SCANNER_ID,
                Category::InitUnprotected,
                Severity::Critical,
                Location::function(version.id(), &function.signature),
                "Unprotected initializer",
                explanation,
            );
            let finding = if version.is_proxy_implementation() {
                finding.with_annotation("implementation directly callable")
            } else {
                finding
            };

            findings.push(finding);
        }

        findings
    }

    fn check_implementation_lock(&self, version: &ContractVersion, config: &AnalysisConfig) -> Vec<Finding> {
        if !version.is_proxy_implementation() {
            return Vec::new();
        }

        let guarded: Vec<&FunctionInfo> = version
            .initializer_candidates()
            .filter(|f| !f.is_constructor() && f.is_externally_callable() && f.has_body)
            .filter(|f| f.protection.is_initialization_guarded())
            .collect();
        if guarded.is_empty() {
            return Vec::new();
        }

        let flags = version.slots_with_role(SlotRole::InitializationFlag);
        let locked = version.functions().filter(|f| f.is_constructor()).any(|ctor| {
            let writes_flag = !version.effective_writes(&ctor.signature).is_disjoint(&flags);
            let calls_lock = ctor.summary.calls.iter().any(|call| {
                let callee = normalize_callee(&call.callee);
                config.guards.initializer_locks.iter().any(|lock| lock == callee)
            });
            let runs_guard = ctor.modifiers.iter().any(|m| {
                version.modifier(m).is_some_and(|info| info.protection.one_time)
                    || config.guards.one_time.iter().any(|name| name == m)
            });
            writes_flag || calls_lock || runs_guard
        });
        if locked {
            return Vec::new();
        }

        let names: Vec<&str> = guarded.iter().map(|f| f.signature.as_str()).collect();
        vec![Finding::new(
            SCANNER_ID,
            Category::InitUnprotected,
            Severity::Medium,
            Location::contract(version.id()),
            "Implementation left initializable",
            format!(
                "Initializers {} are guarded, but no constructor consumes the guard on the \
                 implementation itself. Anyone can initialize the logic contract directly and \
                 become its owner.",
                names.join(", ")
            ),
        )]
    }

    fn check_reentry(&self, version: &ContractVersion) -> Vec<Finding> {
        let critical = version.critical_slots();
        let graph = version.call_graph();

        // helper signature -> (initializers reaching it, critical slots it writes)
        let mut targets: BTreeMap<String, (BTreeSet<String>, BTreeSet<usize>)> = BTreeMap::new();

        for init in version.initializer_candidates() {
            if init.is_constructor() || !init.protection.is_initialization_guarded() {
                continue;
            }
            for callee in graph.reachable_from(&init.signature) {
                let Some(helper) = version.function(&callee) else {
                    continue;
                };
                let writes: BTreeSet<usize> = helper.storage_writes.intersection(&critical).copied().collect();
                if writes.is_empty() {
                    continue;
                }
                let entry = targets.entry(callee).or_default();
                entry.0.insert(init.signature.clone());
                entry.1.extend(writes);
            }
        }

        for init in version.initializer_candidates() {
            if init.is_constructor() || init.is_externally_callable() {
                continue;
            }
            let writes: BTreeSet<usize> = version
                .effective_writes(&init.signature)
                .intersection(&critical)
                .copied()
                .collect();
            if !writes.is_empty() {
                targets.entry(init.signature.clone()).or_default().1.extend(writes);
            }
        }

        let mut findings = Vec::new();
        for (signature, (initializers, slots)) in targets {
            let Some(helper) = version.function(&signature) else {
                continue;
            };
            if !helper.protection.is_unprotected() {
                continue;
            }

            let open_entries: Vec<String> = graph
                .callers_reaching(&signature)
                .into_iter()
                .filter(|caller| {
                    version.function(caller).is_some_and(|f| {
                        f.is_externally_callable() && !f.is_constructor() && f.protection.is_unprotected()
                    })
                })
                .collect();

            let exposure = if helper.is_externally_callable() {
                format!("it is {} itself", helper.visibility)
            } else if !open_entries.is_empty() {
                format!("it is reachable from unguarded {}", open_entries.join(", "))
            } else {
                continue;
            };

            let slot_names: Vec<String> = slots.iter().map(|i| version.slot_label(*i)).collect();
            let context = if initializers.is_empty() {
                "This internal initializer".to_string()
            } else {
                let paths: Vec<String> = initializers
                    .iter()
                    .map(|init| {
                        graph
                            .find_call_path(init, &signature)
                            .map_or_else(|| init.clone(), |path| path.join(" -> "))
                    })
                    .collect();
                format!("Reached from a guarded initializer ({}), this function", paths.join("; "))
            };

            findings.push(Finding::new(
                SCANNER_ID,
                Category::InitReentry,
                Severity::High,
                Location::function(version.id(), &signature),
                "Initialization guard not applied transitively",
                format!(
                    "{} writes {} without any initialization or access guard of its own, and {}. \
                     The one-time guard on the initializer does not protect this path.",
                    context,
                    slot_names.join(", "),
                    exposure
                ),
            ));
        }

        findings
    }

    fn check_unvalidated_params(&self, version: &ContractVersion) -> Vec<Finding> {
        let divisors: HashSet<usize> = version
            .functions()
            .map(|f| &f.summary)
            .chain(version.modifiers().map(|m| &m.summary))
            .flat_map(|s| s.arithmetic.iter())
            .filter(|(_, role)| *role == ArithmeticRole::Divisor)
            .map(|(slot, _)| *slot)
            .collect();

        let mut findings = Vec::new();
        for init in version.initializer_candidates() {
            if !init.has_body {
                continue;
            }
            let mut reported = BTreeSet::new();

            for parameter in &init.parameters {
                for flow in trace_parameter(version, init, &parameter.name) {
                    let Some(slot) = version.slot(flow.slot) else {
                        continue;
                    };
                    let requirement = match slot.role {
                        SlotRole::Authority => Requirement::NonZero,
                        SlotRole::Rate if divisors.contains(&slot.index) => Requirement::NonZero,
                        SlotRole::Rate => Requirement::Bounded,
                        _ => continue,
                    };

                    let validated = flow.chain.iter().any(|(signature, param)| {
                        version
                            .function(signature)
                            .is_some_and(|f| f.summary.validates(param, requirement))
                    });
                    if validated || !reported.insert(slot.index) {
                        continue;
                    }

                    let expected = match (slot.role, requirement) {
                        (SlotRole::Authority, _) => "a zero-address check",
                        (_, Requirement::NonZero) => "a non-zero check (the slot is used as a divisor)",
                        _ => "a range check (the slot is used as a multiplier)",
                    };
                    let path: Vec<&str> = flow.chain.iter().map(|(sig, _)| sig.as_str()).collect();

                    findings.push(Finding::new(
                        SCANNER_ID,
                        Category::InitUnvalidatedParam,
                        Severity::Medium,
                        Location::function(version.id(), &init.signature).with_slot(slot.index, &slot.name),
                        "Unvalidated initializer parameter",
                        format!(
                            "Parameter '{}' is stored in critical slot '{}' ({}) via {} without {}.",
                            parameter.name,
                            slot.name,
                            slot.type_name,
                            path.join(" -> "),
                            expected
                        ),
                    ));
                }
            }
        }

        findings
    }
}

impl Default for InitializationScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for InitializationScanner {
    fn id(&self) -> &'static str {
        SCANNER_ID
    }

    fn name(&self) -> &'static str {
        "Initialization Analyzer"
    }

    fn description(&self) -> &'static str {
        "Detects unprotected or re-enterable initializers and unvalidated critical parameters"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn categories(&self) -> &'static [Category] {
        &[
            Category::InitUnprotected,
            Category::InitReentry,
            Category::InitUnvalidatedParam,
        ]
    }

    fn scan(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        Ok(self.analyze(context.current(), context.config()))
    }
}

/// A parameter value reaching a storage write, with every (function,
/// parameter name) pair it passed through.
struct ParameterFlow {
    slot: usize,
    chain: Vec<(String, String)>,
}

fn trace_parameter(version: &ContractVersion, start: &FunctionInfo, parameter: &str) -> Vec<ParameterFlow> {
    let mut flows = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([vec![(start.signature.clone(), parameter.to_string())]]);

    while let Some(chain) = queue.pop_front() {
        let Some((signature, param)) = chain.last().cloned() else {
            continue;
        };
        if !visited.insert((signature.clone(), param.clone())) {
            continue;
        }
        let Some(function) = version.function(&signature) else {
            continue;
        };

        for write in &function.summary.writes {
            if matches!(&write.value, ValueSource::Param(p) if *p == param)
                && version.slot(write.slot).is_some_and(|s| s.role.is_critical())
            {
                flows.push(ParameterFlow {
                    slot: write.slot,
                    chain: chain.clone(),
                });
            }
        }

        for call in &function.summary.calls {
            let Some(callee) = resolve_call_site(version, &signature, &call.callee, call.arguments.len()) else {
                continue;
            };
            for (position, argument) in call.arguments.iter().enumerate() {
                if !matches!(argument, ValueSource::Param(p) if *p == param) {
                    continue;
                }
                if let Some(target) = callee.parameters.get(position) {
                    let mut next = chain.clone();
                    next.push((callee.signature.clone(), target.name.clone()));
                    queue.push_back(next);
                }
            }
        }
    }

    flows
}

fn resolve_call_site<'v>(
    version: &'v ContractVersion,
    caller: &str,
    callee: &str,
    arity: usize,
) -> Option<&'v FunctionInfo> {
    let name = normalize_callee(callee);
    let name = name.rsplit_once('.').map_or(name, |(_, n)| n);
    let candidates: Vec<&FunctionInfo> = version
        .call_graph()
        .callees_of(caller)
        .filter_map(|sig| version.function(sig))
        .filter(|f| f.name == name)
        .collect();

    match candidates.iter().find(|f| f.parameters.len() == arity) {
        Some(f) => Some(*f),
        None if candidates.len() == 1 => Some(candidates[0]),
        None => None,
    }
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
    fn test_parameter_forwarded_to_helper_is_traced() {
        let version = load(
            r#"{
            "name": "Vault",
            "storage": [{"name": "owner", "type": "address"}],
            "functions": [
                {"name": "initialize", "visibility": "external",
                 "parameters": [{"name": "admin", "type": "address"}],
                 "modifiers": ["initializer"],
                 "body": [{"kind": "call", "callee": "_setOwner",
                           "arguments": [{"kind": "identifier", "name": "admin"}]}]},
                {"name": "_setOwner", "visibility": "internal",
                 "parameters": [{"name": "next", "type": "address"}],
                 "body": [{"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
                           "value": {"kind": "identifier", "name": "next"}}]}
            ]
        }"#,
        );
        let init = version.function("initialize(address)").unwrap();
        let flows = trace_parameter(&version, init, "admin");
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].chain.len(), 2);
        assert_eq!(flows[0].chain[1], ("_setOwner(address)".to_string(), "next".to_string()));

        let findings = InitializationScanner::new().analyze(&version, &AnalysisConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::InitUnvalidatedParam);
        assert!(findings[0].explanation.contains("_setOwner(address)"));
    }

    #[test]
    fn test_check_in_helper_counts_as_validation() {
        let version = load(
            r#"{
            "name": "Vault",
            "storage": [{"name": "owner", "type": "address"}],
            "functions": [
                {"name": "initialize", "visibility": "external",
                 "parameters": [{"name": "admin", "type": "address"}],
                 "modifiers": ["initializer"],
                 "body": [{"kind": "call", "callee": "_setOwner",
                           "arguments": [{"kind": "identifier", "name": "admin"}]}]},
                {"name": "_setOwner", "visibility": "internal",
                 "parameters": [{"name": "next", "type": "address"}],
                 "body": [
                    {"kind": "require", "condition": {"kind": "binary", "op": "!=",
                        "left": {"kind": "identifier", "name": "next"},
                        "right": {"kind": "call", "callee": "address",
                                  "arguments": [{"kind": "literal", "value": "0"}]}}},
                    {"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
                     "value": {"kind": "identifier", "name": "next"}}]}
            ]
        }"#,
        );
        let findings = InitializationScanner::new().analyze(&version, &AnalysisConfig::default());
        assert!(findings.is_empty(), "unexpected findings: {:?}", findings);
    }
}
