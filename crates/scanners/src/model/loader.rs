//! Contract Model Loader
//!
//! Normalizes a [`ParsedContract`] into an immutable [`ContractVersion`]:
//! storage positions, body summaries, the internal call graph, slot roles,
//! guard capabilities and initializer/upgrade candidates.

use crate::analysis::behavior::{BodySummary, Scope};
use crate::analysis::call_graph::CallGraph;
use crate::core::error::{ModelError, ModelResult};
use crate::core::AnalysisConfig;
use crate::model::contract::{
    ContractVersion, FunctionInfo, ModifierInfo, Protection, SlotRole, StorageSlot, Visibility,
};
use crate::model::input::{
    parse_contracts, FunctionDefinition, FunctionKind, ParsedContract, StateVariable,
};
use crate::model::types::{pack, Position, StorageType, TypeResolver, WORD_SIZE};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

pub struct ContractLoader<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> ContractLoader<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Parses a JSON source and loads every contract in it, failing on the
    /// first contract that cannot be normalized.
    pub fn load_json(&self, json: &str) -> ModelResult<Vec<ContractVersion>> {
        parse_contracts(json)?
            .iter()
            .map(|contract| self.load(contract))
            .collect()
    }

    /// Loads each contract independently so one malformed contract does not
    /// prevent the others from loading.
    pub fn load_all(&self, contracts: &[ParsedContract]) -> Vec<ModelResult<ContractVersion>> {
        contracts.iter().map(|c| self.load(c)).collect()
    }

    pub fn load(&self, parsed: &ParsedContract) -> ModelResult<ContractVersion> {
        let contract = parsed.name.trim();
        if contract.is_empty() {
            return Err(ModelError::malformed("<unnamed>", "contract has no name"));
        }

        let mut slots = match &parsed.storage {
            Some(variables) => Some(build_layout(parsed, variables)?),
            None => None,
        };
        let slot_index: HashMap<String, usize> = slots
            .iter()
            .flatten()
            .map(|s| (s.name.clone(), s.index))
            .collect();

        let modifier_summaries = summarize_modifiers(parsed, &slot_index);
        let mut functions = self.summarize_functions(parsed, &slot_index)?;

        let mut call_graph = CallGraph::new();
        for function in functions.values() {
            for call in &function.summary.calls {
                if let Some(callee) = resolve_callee(parsed, &functions, &call.callee, call.arguments.len()) {
                    call_graph.add_call(&function.signature, &callee);
                }
            }
        }

        let flag_slots: BTreeSet<usize> = slots
            .iter()
            .flatten()
            .filter(|s| s.storage_type.is_flag_like())
            .map(|s| s.index)
            .collect();
        let flag_like = |index: usize| flag_slots.contains(&index);

        // A one-time guard owns every slot it writes (`_initialized` and the
        // transient `_initializing`); inline guards only own their flag.
        let mut init_flags = BTreeSet::new();
        for summary in modifier_summaries.values() {
            if summary.one_time_flag(flag_like).is_some() {
                init_flags.extend(summary.write_slots());
            }
        }
        for function in functions.values() {
            if let Some(flag) = function.summary.one_time_flag(flag_like) {
                init_flags.insert(flag);
            }
        }

        if let Some(slots) = slots.as_mut() {
            self.assign_roles(slots, &init_flags, modifier_summaries.values(), functions.values());
        }
        let authority: BTreeSet<usize> = slots
            .iter()
            .flatten()
            .filter(|s| s.role == SlotRole::Authority)
            .map(|s| s.index)
            .collect();

        let body_protections: HashMap<String, Protection> = functions
            .iter()
            .map(|(sig, f)| (sig.clone(), body_protection(&f.summary, &init_flags, flag_like)))
            .collect();

        let mut modifiers = BTreeMap::new();
        for (name, summary) in modifier_summaries {
            let mut protection = body_protection(&summary, &init_flags, flag_like);
            let mut unknown_calls = Vec::new();
            for call in &summary.calls {
                let Some(callee) = resolve_callee(parsed, &functions, &call.callee, call.arguments.len()) else {
                    unknown_calls.push(call.callee.clone());
                    continue;
                };
                let reached = std::iter::once(callee.clone()).chain(call_graph.reachable_from(&callee));
                for signature in reached {
                    if let Some(inner) = body_protections.get(&signature) {
                        protection.merge_guards(inner, &format!("{} via {}", name, signature));
                    }
                }
            }
            // the guard may live in a callee this model cannot see
            if protection.is_unprotected() {
                protection.unresolved = unknown_calls;
            }
            modifiers.insert(
                name.clone(),
                ModifierInfo {
                    name,
                    summary,
                    protection,
                },
            );
        }

        let implementation_slots: BTreeSet<usize> = slots
            .iter()
            .flatten()
            .filter(|s| self.config.is_implementation_slot(&s.name))
            .map(|s| s.index)
            .collect();

        for function in functions.values_mut() {
            let mut protection = Protection::default();
            if function.is_constructor() {
                protection.one_time = true;
                protection.sources.push("constructor".to_string());
            }

            for modifier in &function.modifiers {
                if let Some(info) = modifiers.get(modifier) {
                    protection.merge_guards(&info.protection, &format!("modifier {}", modifier));
                    if info.is_noop() {
                        protection.noop_modifiers.push(modifier.clone());
                    } else if !info.protection.unresolved.is_empty() {
                        protection.unresolved.push(modifier.clone());
                    }
                } else if parsed.inherits.iter().any(|base| base == modifier) || modifier == contract {
                    // base constructor invocation
                } else if let Some(conventional) = self.conventional_guard(modifier, &authority) {
                    protection.merge_guards(&conventional, &format!("modifier {} (by name)", modifier));
                } else {
                    protection.unresolved.push(modifier.clone());
                }
            }

            if let Some(own) = body_protections.get(&function.signature) {
                protection.merge_guards(own, "function body");
            }
            for callee in call_graph.reachable_from(&function.signature) {
                if let Some(inner) = body_protections.get(&callee) {
                    protection.merge_guards(inner, &format!("call to {}", callee));
                }
            }

            function.is_initializer_candidate = function.is_constructor()
                || (function.kind == FunctionKind::Function
                    && self.config.is_initializer_name(&function.name));
            function.is_upgrade_candidate = function.kind == FunctionKind::Function
                && (self.config.is_upgrade_entry_name(&function.name)
                    || !function.storage_writes.is_disjoint(&implementation_slots));
            function.protection = protection;
        }

        let version = parsed.version.clone().filter(|v| !v.trim().is_empty());
        let id = match &version {
            Some(v) => format!("{}@{}", contract, v),
            None => contract.to_string(),
        };

        debug!(
            contract = %id,
            slots = slots.as_ref().map_or(0, Vec::len),
            functions = functions.len(),
            modifiers = modifiers.len(),
            "loaded contract version"
        );

        Ok(ContractVersion {
            id,
            name: contract.to_string(),
            version,
            is_proxy_implementation: parsed.is_proxy_implementation,
            bases: parsed.inherits.clone(),
            slots,
            functions,
            modifiers,
            call_graph,
        })
    }

    fn summarize_functions(
        &self,
        parsed: &ParsedContract,
        slot_index: &HashMap<String, usize>,
    ) -> ModelResult<BTreeMap<String, FunctionInfo>> {
        let mut functions = BTreeMap::new();

        for def in &parsed.functions {
            let visibility = resolve_visibility(&parsed.name, def)?;
            let name = if def.name.trim().is_empty() {
                kind_name(def.kind).to_string()
            } else {
                def.name.trim().to_string()
            };
            let signature = format!(
                "{}({})",
                name,
                def.parameters
                    .iter()
                    .map(|p| p.type_name.trim())
                    .collect::<Vec<_>>()
                    .join(",")
            );

            let scope = Scope::new(slot_index, def.parameters.iter().map(|p| p.name.as_str()));
            let summary = def
                .body
                .as_deref()
                .map(|body| BodySummary::summarize(body, &scope))
                .unwrap_or_default();

            // Later definitions override earlier ones, matching a linearized
            // inheritance flattening.
            functions.insert(
                signature.clone(),
                FunctionInfo {
                    name,
                    signature,
                    kind: def.kind,
                    visibility,
                    parameters: def.parameters.clone(),
                    modifiers: def.modifiers.iter().map(|m| modifier_base_name(m)).collect(),
                    storage_writes: summary.write_slots(),
                    is_initializer_candidate: false,
                    is_upgrade_candidate: false,
                    has_body: def.body.is_some(),
                    summary,
                    protection: Protection::default(),
                },
            );
        }

        Ok(functions)
    }

    fn conventional_guard(&self, modifier: &str, authority: &BTreeSet<usize>) -> Option<Protection> {
        let guards = &self.config.guards;
        let named = |list: &[String]| list.iter().any(|n| n == modifier);

        if named(&guards.one_time) {
            Some(Protection {
                one_time: true,
                ..Protection::default()
            })
        } else if named(&guards.initializing) {
            Some(Protection {
                initializing_only: true,
                ..Protection::default()
            })
        } else if named(&guards.access) {
            Some(Protection {
                access: Some(authority.clone()),
                ..Protection::default()
            })
        } else {
            None
        }
    }

    fn assign_roles<'s>(
        &self,
        slots: &mut [StorageSlot],
        init_flags: &BTreeSet<usize>,
        modifiers: impl Iterator<Item = &'s BodySummary>,
        functions: impl Iterator<Item = &'s FunctionInfo>,
    ) {
        let mut access_reads = BTreeSet::new();
        let mut arithmetic = BTreeSet::new();
        let summaries = modifiers.chain(functions.map(|f| &f.summary));
        for summary in summaries {
            if let Some(slots) = summary.access_slots() {
                access_reads.extend(slots);
            }
            arithmetic.extend(summary.arithmetic.iter().map(|(slot, _)| *slot));
        }

        for slot in slots.iter_mut() {
            slot.role = if init_flags.contains(&slot.index) {
                SlotRole::InitializationFlag
            } else if slot.storage_type.is_address_like()
                && (access_reads.contains(&slot.index) || self.config.is_authority_name(&slot.name))
            {
                SlotRole::Authority
            } else if slot.storage_type.is_numeric() && arithmetic.contains(&slot.index) {
                SlotRole::Rate
            } else {
                SlotRole::Plain
            };
        }
    }
}

fn build_layout(parsed: &ParsedContract, variables: &[StateVariable]) -> ModelResult<Vec<StorageSlot>> {
    let contract = parsed.name.as_str();
    let variables: Vec<&StateVariable> = variables.iter().filter(|v| v.occupies_storage()).collect();

    let mut seen = HashSet::new();
    for variable in &variables {
        if !seen.insert(variable.name.as_str()) {
            return Err(ModelError::malformed(
                contract,
                format!("state variable '{}' declared twice", variable.name),
            ));
        }
    }

    let resolver = TypeResolver::new(&parsed.structs, &parsed.enums);
    let types = variables
        .iter()
        .map(|v| {
            resolver
                .resolve(&v.type_name)
                .map_err(|reason| ModelError::malformed(contract, format!("variable '{}': {}", v.name, reason)))
        })
        .collect::<ModelResult<Vec<_>>>()?;

    let mut sizes = Vec::with_capacity(types.len());
    for (variable, storage_type) in variables.iter().zip(&types) {
        match (storage_type.byte_size(), storage_type.word_span()) {
            (Some(byte_size), Some(span)) => sizes.push((byte_size, span)),
            _ => return Err(too_large(contract, &variable.name)),
        }
    }

    let explicit = variables.iter().filter(|v| v.slot.is_some()).count();
    let positions: Vec<Position> = if explicit == 0 {
        pack(&types)
            .map(|(positions, _)| positions)
            .ok_or_else(|| too_large(contract, variables.last().map_or("", |v| v.name.as_str())))?
    } else if explicit == variables.len() {
        let positions: Vec<Position> = variables
            .iter()
            .map(|v| Position {
                word: v.slot.unwrap_or_default(),
                offset: v.offset.unwrap_or_default(),
            })
            .collect();
        check_explicit_slots(contract, &variables, &types, &sizes, &positions)?;
        positions
    } else {
        return Err(ModelError::malformed(
            contract,
            "storage ordering cannot be determined: some variables carry explicit slots and some do not",
        ));
    };

    let mut ordered: Vec<_> = variables
        .into_iter()
        .zip(types)
        .zip(sizes)
        .zip(positions)
        .map(|(((variable, storage_type), size), position)| (position, variable, storage_type, size))
        .collect();
    ordered.sort_by_key(|(position, ..)| *position);

    Ok(ordered
        .into_iter()
        .enumerate()
        .map(|(index, (position, variable, storage_type, (byte_size, span)))| StorageSlot {
            index,
            name: variable.name.clone(),
            type_name: variable.type_name.trim().to_string(),
            byte_size,
            position,
            span,
            storage_type,
            role: SlotRole::Plain,
        })
        .collect())
}

fn too_large(contract: &str, variable: &str) -> ModelError {
    ModelError::malformed(
        contract,
        format!("variable '{}' runs past the last addressable storage word", variable),
    )
}

/// Explicit positions must not collide: value types may share a word at
/// disjoint byte ranges, anything else owns every word of its run.
fn check_explicit_slots(
    contract: &str,
    variables: &[&StateVariable],
    types: &[StorageType],
    sizes: &[(u64, u64)],
    positions: &[Position],
) -> ModelResult<()> {
    for (i, position) in positions.iter().enumerate() {
        if types[i].is_value() && u64::from(position.offset) + sizes[i].0 > WORD_SIZE {
            return Err(ModelError::malformed(
                contract,
                format!(
                    "variable '{}' at offset {} does not fit in slot {}",
                    variables[i].name, position.offset, position.word
                ),
            ));
        }
    }

    let mut order: Vec<usize> = (0..variables.len()).collect();
    order.sort_by_key(|&i| positions[i]);

    for pair in order.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let (prev_pos, next_pos) = (positions[prev], positions[next]);
        let collides = if prev_pos.word != next_pos.word {
            !types[prev].is_value() && next_pos.word - prev_pos.word < sizes[prev].1
        } else {
            !types[prev].is_value()
                || !types[next].is_value()
                || u64::from(prev_pos.offset) + sizes[prev].0 > u64::from(next_pos.offset)
        };
        if collides {
            return Err(ModelError::malformed(
                contract,
                format!(
                    "variable '{}' at slot {} offset {} overlaps '{}'",
                    variables[next].name, next_pos.word, next_pos.offset, variables[prev].name
                ),
            ));
        }
    }

    for (variable, (position, (_, span))) in variables.iter().zip(positions.iter().zip(sizes)) {
        if position.word.checked_add(*span).is_none() {
            return Err(too_large(contract, &variable.name));
        }
    }
    Ok(())
}

fn summarize_modifiers(
    parsed: &ParsedContract,
    slot_index: &HashMap<String, usize>,
) -> BTreeMap<String, BodySummary> {
    parsed
        .modifiers
        .iter()
        .map(|def| {
            let scope = Scope::new(slot_index, def.parameters.iter().map(|p| p.name.as_str()));
            (def.name.trim().to_string(), BodySummary::summarize(&def.body, &scope))
        })
        .collect()
}

fn body_protection(
    summary: &BodySummary,
    init_flags: &BTreeSet<usize>,
    flag_like: impl Fn(usize) -> bool,
) -> Protection {
    let one_time = summary.one_time_flag(flag_like).is_some();
    let initializing_only =
        !one_time && summary.checks_any(init_flags) && summary.write_slots().is_disjoint(init_flags);

    Protection {
        one_time,
        initializing_only,
        access: summary.access_slots(),
        ..Protection::default()
    }
}

fn resolve_visibility(contract: &str, def: &FunctionDefinition) -> ModelResult<Visibility> {
    match def.visibility.as_deref().map(str::trim) {
        Some(raw) => Visibility::parse(raw).ok_or_else(|| {
            ModelError::malformed(
                contract,
                format!("function '{}' has unknown visibility '{}'", def.name, raw),
            )
        }),
        None => match def.kind {
            FunctionKind::Constructor => Ok(Visibility::Public),
            FunctionKind::Fallback | FunctionKind::Receive => Ok(Visibility::External),
            FunctionKind::Function => Err(ModelError::malformed(
                contract,
                format!("visibility of function '{}' is unresolvable", def.name),
            )),
        },
    }
}

/// Resolves an internal call by name and arity. Qualified calls resolve only
/// when the qualifier is this contract or one of its bases; anything else is
/// a call on another contract.
fn resolve_callee(
    parsed: &ParsedContract,
    functions: &BTreeMap<String, FunctionInfo>,
    callee: &str,
    arity: usize,
) -> Option<String> {
    let name = match callee.rsplit_once('.') {
        Some((qualifier, name))
            if qualifier == parsed.name || parsed.inherits.iter().any(|b| b == qualifier) =>
        {
            name
        }
        Some(_) => return None,
        None => callee,
    };

    let candidates: Vec<&FunctionInfo> = functions
        .values()
        .filter(|f| f.name == name && f.kind == FunctionKind::Function)
        .collect();
    let matched = match candidates.iter().find(|f| f.parameters.len() == arity) {
        Some(f) => Some(*f),
        None if candidates.len() == 1 => Some(candidates[0]),
        None => None,
    };
    matched.map(|f| f.signature.clone())
}

fn modifier_base_name(applied: &str) -> String {
    applied
        .split('(')
        .next()
        .unwrap_or(applied)
        .trim()
        .to_string()
}

fn kind_name(kind: FunctionKind) -> &'static str {
    match kind {
        FunctionKind::Function => "function",
        FunctionKind::Constructor => "constructor",
        FunctionKind::Fallback => "fallback",
        FunctionKind::Receive => "receive",
    }
}
