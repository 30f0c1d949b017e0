use crate::analysis::behavior::BodySummary;
use crate::analysis::call_graph::CallGraph;
use crate::model::input::{FunctionKind, Parameter};
use crate::model::types::{Position, StorageType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

impl Visibility {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "public" => Some(Self::Public),
            "external" => Some(Self::External),
            "internal" => Some(Self::Internal),
            "private" => Some(Self::Private),
            _ => None,
        }
    }

    pub fn is_externally_callable(&self) -> bool {
        matches!(self, Self::Public | Self::External)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::External => "external",
            Self::Internal => "internal",
            Self::Private => "private",
        };
        f.write_str(s)
    }
}

/// What a slot is used for, as observed in the contract's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotRole {
    Plain,
    /// Address-like slot that gates access (owner, admin, ...).
    Authority,
    /// Numeric slot used as a divisor or multiplier.
    Rate,
    /// Flag written by a one-time initialization guard.
    InitializationFlag,
}

impl SlotRole {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Authority | Self::Rate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSlot {
    pub index: usize,
    pub name: String,
    pub type_name: String,
    pub byte_size: u64,
    pub position: Position,
    /// Words occupied; value types report 1 even when packed.
    pub span: u64,
    pub storage_type: StorageType,
    pub role: SlotRole,
}

impl StorageSlot {
    pub fn is_aggregate(&self) -> bool {
        self.storage_type.is_aggregate()
    }

    pub fn identity(&self) -> String {
        self.storage_type.identity()
    }

    /// First word after this slot's run.
    pub fn end_word(&self) -> u64 {
        self.position.word.saturating_add(self.span)
    }
}

/// Guard capabilities in effect for a function or modifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protection {
    pub one_time: bool,
    pub initializing_only: bool,
    /// Slots read by the access check; `Some(empty)` for checks against
    /// state this model cannot see.
    pub access: Option<BTreeSet<usize>>,
    /// Human readable origins of the guards above.
    pub sources: Vec<String>,
    /// Applied modifiers that could not be classified.
    pub unresolved: Vec<String>,
    /// Applied modifiers whose body does nothing besides `_`.
    pub noop_modifiers: Vec<String>,
}

impl Protection {
    pub fn is_initialization_guarded(&self) -> bool {
        self.one_time || self.initializing_only
    }

    pub fn has_access_control(&self) -> bool {
        self.access.is_some()
    }

    pub fn is_unprotected(&self) -> bool {
        !self.is_initialization_guarded() && !self.has_access_control()
    }

    pub fn access_slots(&self) -> BTreeSet<usize> {
        self.access.clone().unwrap_or_default()
    }

    pub fn merge_guards(&mut self, other: &Protection, origin: &str) {
        let before = (self.one_time, self.initializing_only, self.access.clone());
        self.one_time |= other.one_time;
        self.initializing_only |= other.initializing_only;
        if let Some(slots) = &other.access {
            self.access.get_or_insert_with(BTreeSet::new).extend(slots);
        }
        if before != (self.one_time, self.initializing_only, self.access.clone()) {
            self.sources.push(origin.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifierInfo {
    pub name: String,
    pub summary: BodySummary,
    pub protection: Protection,
}

impl ModifierInfo {
    pub fn is_noop(&self) -> bool {
        self.summary.is_noop()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: String,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub parameters: Vec<Parameter>,
    /// Applied modifier names without arguments.
    pub modifiers: BTreeSet<String>,
    /// Slots written directly by this function's body.
    pub storage_writes: BTreeSet<usize>,
    pub is_initializer_candidate: bool,
    pub is_upgrade_candidate: bool,
    pub has_body: bool,
    pub summary: BodySummary,
    /// Guards from applied modifiers, the body and transitively called
    /// internal functions.
    pub protection: Protection,
}

impl FunctionInfo {
    pub fn is_externally_callable(&self) -> bool {
        self.visibility.is_externally_callable()
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == FunctionKind::Constructor
    }
}

/// One loaded version of a contract. Built once by the loader and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct ContractVersion {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) version: Option<String>,
    pub(crate) is_proxy_implementation: bool,
    pub(crate) bases: Vec<String>,
    pub(crate) slots: Option<Vec<StorageSlot>>,
    pub(crate) functions: BTreeMap<String, FunctionInfo>,
    pub(crate) modifiers: BTreeMap<String, ModifierInfo>,
    pub(crate) call_graph: CallGraph,
}

impl ContractVersion {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy whose id also names the source it was loaded from.
    pub fn qualified_by_source(&self, source: &str) -> Self {
        Self {
            id: format!("{} ({})", self.id, source),
            ..self.clone()
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_proxy_implementation(&self) -> bool {
        self.is_proxy_implementation
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    pub fn has_storage_layout(&self) -> bool {
        self.slots.is_some()
    }

    /// Storage slots in ascending index order; empty when no layout was
    /// provided.
    pub fn slots(&self) -> &[StorageSlot] {
        self.slots.as_deref().unwrap_or(&[])
    }

    pub fn slot(&self, index: usize) -> Option<&StorageSlot> {
        self.slots().get(index)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }

    pub fn function(&self, signature: &str) -> Option<&FunctionInfo> {
        self.functions.get(signature)
    }

    pub fn modifiers(&self) -> impl Iterator<Item = &ModifierInfo> {
        self.modifiers.values()
    }

    pub fn modifier(&self, name: &str) -> Option<&ModifierInfo> {
        self.modifiers.get(name)
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn initializer_candidates(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions().filter(|f| f.is_initializer_candidate)
    }

    pub fn upgrade_candidates(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions().filter(|f| f.is_upgrade_candidate)
    }

    pub fn critical_slots(&self) -> BTreeSet<usize> {
        self.slots()
            .iter()
            .filter(|s| s.role.is_critical())
            .map(|s| s.index)
            .collect()
    }

    pub fn slots_with_role(&self, role: SlotRole) -> BTreeSet<usize> {
        self.slots()
            .iter()
            .filter(|s| s.role == role)
            .map(|s| s.index)
            .collect()
    }

    /// Slots written by `signature` directly or by any internal function it
    /// reaches.
    pub fn effective_writes(&self, signature: &str) -> BTreeSet<usize> {
        let mut writes = self
            .function(signature)
            .map(|f| f.storage_writes.clone())
            .unwrap_or_default();
        for callee in self.call_graph.reachable_from(signature) {
            if let Some(f) = self.function(&callee) {
                writes.extend(f.storage_writes.iter().copied());
            }
        }
        writes
    }

    pub fn slot_label(&self, index: usize) -> String {
        self.slot(index)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("#{}", index))
    }
}
