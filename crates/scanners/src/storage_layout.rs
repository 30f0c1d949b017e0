//! Storage Layout Differ
//!
//! Compares the storage layout of two versions of the same contract in
//! upgrade direction. Every populated position of the old version must hold
//! the same variable, with the same type, in the new version. New variables
//! may be appended after the old layout or placed inside a reserved gap.
//!
//! Aggregates (structs, fixed arrays) are compared as whole runs by type
//! identity first and element-wise only when the identities match, so a
//! struct is never split into per-word comparisons.

use crate::core::error::ModelError;
use crate::core::{AnalysisContext, Category, Finding, GapPolicy, Location, Scanner, Severity};
use crate::model::{ContractVersion, Position, StorageSlot, StorageType};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const SCANNER_ID: &str = "storage-layout";

pub struct StorageLayoutScanner;

impl StorageLayoutScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StorageLayoutScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for StorageLayoutScanner {
    fn id(&self) -> &'static str {
        SCANNER_ID
    }

    fn name(&self) -> &'static str {
        "Storage Layout Differ"
    }

    fn description(&self) -> &'static str {
        "Detects storage slots that are shifted, retyped or truncated between two versions"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn categories(&self) -> &'static [Category] {
        &[Category::StorageShift, Category::StorageShrink]
    }

    fn scan(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let Some(previous) = context.previous() else {
            return Ok(Vec::new());
        };

        match diff_layouts(previous, context.current(), &context.config().gap_policy) {
            Ok(findings) => Ok(findings),
            Err(ModelError::IncomparableVersions { old, new, reason }) => {
                debug!(%old, %new, %reason, "versions are not comparable");
                Ok(vec![Finding::new(
                    SCANNER_ID,
                    Category::StorageShift,
                    Severity::Critical,
                    Location::contract(context.current().id()),
                    "Storage layouts cannot be compared",
                    format!(
                        "'{}' and '{}' cannot be compared ({}). Treating the upgrade as \
                         incompatible.",
                        old, new, reason
                    ),
                )
                .with_annotation("incomparable versions")])
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// Diffs `old` against `new`. Fails with `IncomparableVersions` when either
/// side has no storage layout to compare.
pub fn diff_layouts(
    old: &ContractVersion,
    new: &ContractVersion,
    policy: &GapPolicy,
) -> Result<Vec<Finding>, ModelError> {
    for (version, side) in [(old, "old"), (new, "new")] {
        if !version.has_storage_layout() {
            return Err(ModelError::IncomparableVersions {
                old: old.id().to_string(),
                new: new.id().to_string(),
                reason: format!("the {} version carries no storage layout", side),
            });
        }
    }

    if old.slots().is_empty() {
        return Ok(Vec::new());
    }

    let differ = LayoutDiff::new(old, new, policy);
    let mut findings: BTreeMap<usize, Finding> = BTreeMap::new();

    for slot in old.slots().iter().filter(|s| !policy.is_reserved(s)) {
        if let Some(finding) = differ.compare_slot(slot) {
            findings.entry(slot.index).or_insert(finding);
        }
    }
    // An index shift outranks a truncation found at the same old slot.
    for (index, finding) in differ.check_insertions() {
        let keep_existing = findings
            .get(&index)
            .is_some_and(|existing| existing.category == Category::StorageShift);
        if !keep_existing {
            findings.insert(index, finding);
        }
    }

    let bases_changed = !old.bases().is_empty() && !new.bases().is_empty() && old.bases() != new.bases();
    let findings: Vec<Finding> = findings
        .into_values()
        .map(|finding| {
            if bases_changed && finding.category == Category::StorageShift {
                finding.with_annotation(format!(
                    "base contract order changed: [{}] -> [{}]",
                    old.bases().join(", "),
                    new.bases().join(", ")
                ))
            } else {
                finding
            }
        })
        .collect();

    debug!(old = old.id(), new = new.id(), findings = findings.len(), "diffed storage layouts");
    Ok(findings)
}

struct LayoutDiff<'a> {
    old: &'a ContractVersion,
    new: &'a ContractVersion,
    policy: &'a GapPolicy,
    new_at: HashMap<Position, &'a StorageSlot>,
    new_by_name: HashMap<&'a str, &'a StorageSlot>,
    old_by_name: HashMap<&'a str, &'a StorageSlot>,
}

impl<'a> LayoutDiff<'a> {
    fn new(old: &'a ContractVersion, new: &'a ContractVersion, policy: &'a GapPolicy) -> Self {
        Self {
            old,
            new,
            policy,
            new_at: new.slots().iter().map(|s| (s.position, s)).collect(),
            new_by_name: new.slots().iter().map(|s| (s.name.as_str(), s)).collect(),
            old_by_name: old
                .slots()
                .iter()
                .filter(|s| !policy.is_reserved(s))
                .map(|s| (s.name.as_str(), s))
                .collect(),
        }
    }

    fn compare_slot(&self, slot: &StorageSlot) -> Option<Finding> {
        let Some(current) = self.new_at.get(&slot.position) else {
            return Some(self.vacated(slot));
        };

        if current.identity() != slot.identity() {
            return Some(self.shift(
                slot,
                format!(
                    "'{}' ({}) at {} is now occupied by '{}' ({}). Existing data will be \
                     reinterpreted under the new type.",
                    slot.name,
                    slot.type_name,
                    describe(slot.position),
                    current.name,
                    current.type_name
                ),
            ));
        }

        let moved = self
            .new_by_name
            .get(slot.name.as_str())
            .filter(|_| current.name != slot.name);
        if let Some(moved) = moved {
            return Some(self.shift(
                slot,
                format!(
                    "'{}' moved from index {} to index {} ({} -> {}); '{}' now sits at its old \
                     position. Anything reading the old position reads the wrong variable.",
                    slot.name,
                    slot.index,
                    moved.index,
                    describe(slot.position),
                    describe(moved.position),
                    current.name
                ),
            ));
        }

        if let Some((category, reason)) = compare_elements(&slot.storage_type, &current.storage_type) {
            let explanation = format!("'{}' at {}: {}.", slot.name, describe(slot.position), reason);
            return Some(match category {
                Category::StorageShrink => self.shrink(slot, explanation),
                _ => self.shift(slot, explanation),
            });
        }

        if current.name == slot.name {
            return None;
        }

        if self.old_by_name.contains_key(current.name.as_str()) {
            return Some(self.shrink(
                slot,
                format!(
                    "'{}' was removed and its position {} is reused by '{}'.",
                    slot.name,
                    describe(slot.position),
                    current.name
                ),
            ));
        }

        // Same type, new name, nothing else moved: a rename.
        None
    }

    /// Nothing in the new layout starts where `slot` started.
    fn vacated(&self, slot: &StorageSlot) -> Finding {
        if let Some(moved) = self.new_by_name.get(slot.name.as_str()) {
            return self.shift(
                slot,
                format!(
                    "'{}' moved from index {} to index {} ({} -> {}).",
                    slot.name,
                    slot.index,
                    moved.index,
                    describe(slot.position),
                    describe(moved.position)
                ),
            );
        }

        let overlapping = self.new.slots().iter().find(|n| {
            n.position.word <= slot.position.word && slot.position.word < n.end_word() && n.position != slot.position
        });
        match overlapping {
            Some(n) if n.is_aggregate() || n.position.word != slot.position.word => self.shift(
                slot,
                format!(
                    "'{}' at {} now falls inside '{}' ({}).",
                    slot.name,
                    describe(slot.position),
                    n.name,
                    n.type_name
                ),
            ),
            _ => self.shrink(
                slot,
                format!(
                    "'{}' ({}) at {} is no longer declared. Its data is orphaned and the \
                     position may be reused.",
                    slot.name,
                    slot.type_name,
                    describe(slot.position)
                ),
            ),
        }
    }

    /// New variables must come after every old variable or inside an old
    /// reserved gap. Returns one finding per old variable displaced by an
    /// insertion, keyed by that variable's old index.
    fn check_insertions(&self) -> Vec<(usize, Finding)> {
        let last_old = self
            .old
            .slots()
            .iter()
            .filter(|s| !self.policy.is_reserved(s))
            .map(|s| s.position)
            .max();
        let Some(last_old) = last_old else {
            return Vec::new();
        };

        let gaps: Vec<(u64, u64)> = self
            .old
            .slots()
            .iter()
            .filter(|s| self.policy.is_reserved(s))
            .map(|s| (s.position.word, s.end_word()))
            .collect();

        let renamed_positions: Vec<Position> = self
            .old
            .slots()
            .iter()
            .filter(|s| !self.new_by_name.contains_key(s.name.as_str()))
            .map(|s| s.position)
            .collect();

        let mut displaced = Vec::new();
        for inserted in self.new.slots() {
            if self.policy.is_reserved(inserted)
                || self.old_by_name.contains_key(inserted.name.as_str())
                || renamed_positions.contains(&inserted.position)
                || inserted.position > last_old
            {
                continue;
            }
            let in_gap = gaps
                .iter()
                .any(|(start, end)| *start <= inserted.position.word && inserted.end_word() <= *end);
            if in_gap {
                continue;
            }

            for old in self.old.slots().iter().filter(|s| !self.policy.is_reserved(s)) {
                let Some(now) = self.new_by_name.get(old.name.as_str()) else {
                    continue;
                };
                if now.position > inserted.position && old.index != now.index {
                    displaced.push((
                        old.index,
                        self.shift(
                            old,
                            format!(
                                "'{}' ({}) was inserted before '{}', moving it from index {} to \
                                 index {}. References by index no longer match.",
                                inserted.name, inserted.type_name, old.name, old.index, now.index
                            ),
                        ),
                    ));
                }
            }
        }

        displaced
    }

    fn shift(&self, slot: &StorageSlot, explanation: String) -> Finding {
        Finding::new(
            SCANNER_ID,
            Category::StorageShift,
            Severity::Critical,
            Location::slot(self.new.id(), slot.index, &slot.name),
            "Storage slot shifted",
            explanation,
        )
    }

    fn shrink(&self, slot: &StorageSlot, explanation: String) -> Finding {
        Finding::new(
            SCANNER_ID,
            Category::StorageShrink,
            Severity::High,
            Location::slot(self.new.id(), slot.index, &slot.name),
            "Storage truncated",
            explanation,
        )
    }
}

/// Element-wise comparison of two types with the same identity.
fn compare_elements(old: &StorageType, new: &StorageType) -> Option<(Category, String)> {
    match (old, new) {
        (
            StorageType::Struct { name, members: old_members },
            StorageType::Struct { members: new_members, .. },
        ) => {
            let shared = old_members.len().min(new_members.len());
            for (i, (a, b)) in old_members.iter().zip(new_members).enumerate().take(shared) {
                if a.identity() != b.identity() {
                    return Some((
                        Category::StorageShift,
                        format!(
                            "member {} of struct {} changed from {} to {}",
                            i,
                            name,
                            a.identity(),
                            b.identity()
                        ),
                    ));
                }
                if let Some(inner) = compare_elements(a, b) {
                    return Some(inner);
                }
            }
            (new_members.len() < old_members.len()).then(|| {
                (
                    Category::StorageShrink,
                    format!(
                        "struct {} lost {} trailing member(s)",
                        name,
                        old_members.len() - new_members.len()
                    ),
                )
            })
        }
        (
            StorageType::FixedArray { element: a, length: old_len },
            StorageType::FixedArray { element: b, length: new_len },
        ) => {
            if let Some(inner) = compare_elements(a, b) {
                return Some(inner);
            }
            (new_len < old_len).then(|| {
                (
                    Category::StorageShrink,
                    format!("array shrank from {} to {} elements", old_len, new_len),
                )
            })
        }
        _ => None,
    }
}

fn describe(position: Position) -> String {
    if position.offset == 0 {
        format!("slot {}", position.word)
    } else {
        format!("slot {} offset {}", position.word, position.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AnalysisConfig;
    use crate::model::input::{Parameter, ParsedContract, StateVariable, StructDefinition};
    use crate::model::ContractLoader;

    fn version(vars: &[(&str, &str)]) -> ContractVersion {
        version_with_struct(None, vars)
    }

    /// `definition` is `(name, member types)`.
    fn version_with_struct(definition: Option<(&str, &[&str])>, vars: &[(&str, &str)]) -> ContractVersion {
        let structs = definition
            .into_iter()
            .map(|(name, members)| StructDefinition {
                name: name.to_string(),
                members: members
                    .iter()
                    .enumerate()
                    .map(|(i, t)| Parameter {
                        name: format!("m{}", i),
                        type_name: t.to_string(),
                    })
                    .collect(),
            })
            .collect();
        let parsed = ParsedContract {
            name: "Vault".to_string(),
            version: None,
            is_proxy_implementation: true,
            inherits: Vec::new(),
            storage: Some(vars.iter().map(|(n, t)| StateVariable::new(*n, *t)).collect()),
            structs,
            enums: Vec::new(),
            modifiers: Vec::new(),
            functions: Vec::new(),
        };
        ContractLoader::new(&AnalysisConfig::default()).load(&parsed).unwrap()
    }

    #[test]
    fn test_packed_retype_is_a_shift() {
        let old = version(&[("a", "uint128"), ("b", "uint128")]);
        let new = version(&[("a", "uint128"), ("b", "uint64")]);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShift);
    }

    #[test]
    fn test_removed_tail_is_a_shrink() {
        let old = version(&[("a", "uint256"), ("b", "uint256")]);
        let new = version(&[("a", "uint256")]);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShrink);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_rename_in_place_is_allowed() {
        let old = version(&[("a", "uint256"), ("b", "address")]);
        let new = version(&[("a", "uint256"), ("treasury", "address")]);
        assert!(diff_layouts(&old, &new, &GapPolicy::default()).unwrap().is_empty());
    }

    #[test]
    fn test_gap_consumption_depends_on_policy() {
        let old = version(&[("a", "uint256"), ("__gap", "uint256[50]")]);
        let new = version(&[("a", "uint256"), ("b", "uint256"), ("__gap", "uint256[49]")]);

        assert!(diff_layouts(&old, &new, &GapPolicy::default()).unwrap().is_empty());

        let disabled = GapPolicy {
            enabled: false,
            ..GapPolicy::default()
        };
        let findings = diff_layouts(&old, &new, &disabled).unwrap();
        assert!(findings.iter().any(|f| f.category == Category::StorageShift));
    }

    #[test]
    fn test_shrinking_array_keeps_identity() {
        let old = version(&[("values", "uint256[10]")]);
        let new = version(&[("values", "uint256[8]")]);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShrink);
    }

    #[test]
    fn test_retyped_struct_member_is_a_shift() {
        let old = version_with_struct(Some(("Stake", &["uint128", "uint128"])), &[("stake", "Stake")]);
        let new = version_with_struct(Some(("Stake", &["uint128", "uint64"])), &[("stake", "Stake")]);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShift);
        assert!(findings[0].explanation.contains("member 1 of struct Stake"));
    }

    #[test]
    fn test_struct_losing_trailing_members_is_a_shrink() {
        let old = version_with_struct(Some(("Stake", &["uint256", "address"])), &[("stake", "Stake")]);
        let new = version_with_struct(Some(("Stake", &["uint256"])), &[("stake", "Stake")]);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShrink);
    }

    #[test]
    fn test_renamed_struct_is_a_shift() {
        let old = version_with_struct(Some(("Stake", &["uint256"])), &[("stake", "Stake")]);
        let new = version_with_struct(Some(("Deposit", &["uint256"])), &[("stake", "Deposit")]);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShift);
    }

    #[test]
    fn test_grown_struct_pushes_later_variables() {
        let vars = [("stake", "Stake"), ("fee", "uint256")];
        let old = version_with_struct(Some(("Stake", &["uint256"])), &vars);
        let new = version_with_struct(Some(("Stake", &["uint256", "uint256"])), &vars);
        let findings = diff_layouts(&old, &new, &GapPolicy::default()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::StorageShift);
        assert_eq!(findings[0].location.slot.as_ref().map(|s| s.name.as_str()), Some("fee"));
    }

    #[test]
    fn test_equivalent_mapping_spellings_are_compatible() {
        let old = version(&[("balances", "mapping(address => uint)")]);
        let new = version(&[("balances", "mapping(address=>uint256)")]);
        assert!(diff_layouts(&old, &new, &GapPolicy::default()).unwrap().is_empty());

        let retyped = version(&[("balances", "mapping(address => uint128)")]);
        let findings = diff_layouts(&old, &retyped, &GapPolicy::default()).unwrap();
        assert_eq!(findings[0].category, Category::StorageShift);
    }
}
