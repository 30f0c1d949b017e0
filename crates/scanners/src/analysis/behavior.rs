//! Behavioral summaries of function and modifier bodies.
//!
//! Guards are recognized by what a body does, not by what it is called: a
//! check on a flag followed by a single write to that flag is a one-time
//! guard whatever its name, and a check that compares the caller against
//! storage is an access check whatever library it came from.

use crate::model::input::{Expr, Statement};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Param(String),
    Literal(String),
    Caller,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWrite {
    pub slot: usize,
    pub value: ValueSource,
}

/// A condition that must hold for execution to continue. `if (c) revert()`
/// is stored as `!c` with the negation pushed inward.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub condition: Expr,
    pub reads_caller: bool,
    pub slots: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub callee: String,
    pub arguments: Vec<ValueSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArithmeticRole {
    Divisor,
    Multiplier,
}

/// What a parameter check must establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    NonZero,
    Bounded,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodySummary {
    pub checks: Vec<Check>,
    pub writes: Vec<StorageWrite>,
    pub reads: BTreeSet<usize>,
    pub calls: Vec<CallSite>,
    pub arithmetic: BTreeSet<(usize, ArithmeticRole)>,
    pub has_placeholder: bool,
}

/// Name resolution for one body: parameters shadow state variables.
pub struct Scope<'a> {
    slots: &'a HashMap<String, usize>,
    params: BTreeSet<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn new(slots: &'a HashMap<String, usize>, params: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            slots,
            params: params.into_iter().collect(),
        }
    }

    fn slot_of(&self, name: &str) -> Option<usize> {
        if self.params.contains(name) {
            None
        } else {
            self.slots.get(name).copied()
        }
    }

    fn is_param(&self, name: &str) -> bool {
        self.params.contains(name)
    }
}

impl BodySummary {
    pub fn summarize(body: &[Statement], scope: &Scope<'_>) -> Self {
        let mut summary = Self::default();
        for statement in body {
            summary.visit_statement(statement, scope);
        }
        summary
    }

    /// Nothing but the placeholder (or nothing at all).
    pub fn is_noop(&self) -> bool {
        self.checks.is_empty() && self.writes.is_empty() && self.calls.is_empty()
    }

    pub fn write_slots(&self) -> BTreeSet<usize> {
        self.writes.iter().map(|w| w.slot).collect()
    }

    /// The flag slot of a check-and-set guard: read by a caller-independent
    /// check and written exactly once with a value that does not come from a
    /// parameter. A reentrancy lock writes its flag twice and does not match.
    pub fn one_time_flag(&self, is_flag_like: impl Fn(usize) -> bool) -> Option<usize> {
        self.checks
            .iter()
            .filter(|c| !c.reads_caller)
            .flat_map(|c| c.slots.iter().copied())
            .filter(|slot| is_flag_like(*slot))
            .find(|slot| {
                let writes: Vec<_> = self.writes.iter().filter(|w| w.slot == *slot).collect();
                writes.len() == 1 && !matches!(writes[0].value, ValueSource::Param(_))
            })
    }

    /// Slots read by checks that involve the caller; `None` when no such
    /// check exists.
    pub fn access_slots(&self) -> Option<BTreeSet<usize>> {
        let mut found = false;
        let mut slots = BTreeSet::new();
        for check in self.checks.iter().filter(|c| c.reads_caller) {
            found = true;
            slots.extend(check.slots.iter().copied());
        }
        found.then_some(slots)
    }

    /// Whether a caller-independent check reads any of `slots`.
    pub fn checks_any(&self, slots: &BTreeSet<usize>) -> bool {
        self.checks
            .iter()
            .filter(|c| !c.reads_caller)
            .any(|c| !c.slots.is_disjoint(slots))
    }

    pub fn validates(&self, param: &str, requirement: Requirement) -> bool {
        self.checks.iter().any(|check| {
            conjuncts(&check.condition)
                .into_iter()
                .any(|c| satisfies(c, param, requirement))
        })
    }

    fn visit_statement(&mut self, statement: &Statement, scope: &Scope<'_>) {
        match statement {
            Statement::Require { condition } | Statement::Assert { condition } => {
                self.add_check(condition.clone(), scope);
                self.visit_expr(condition, scope);
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                if then.iter().any(is_revert) {
                    self.add_check(Expr::not(condition.clone()), scope);
                } else if otherwise.iter().any(is_revert) {
                    self.add_check(condition.clone(), scope);
                }
                self.visit_expr(condition, scope);
                for s in then.iter().chain(otherwise) {
                    self.visit_statement(s, scope);
                }
            }
            Statement::Assign { target, value, op } => {
                if let Some(slot) = root_identifier(target).and_then(|name| scope.slot_of(name)) {
                    let source = match op.as_deref() {
                        None | Some("=") => value_source(value, scope),
                        Some(_) => ValueSource::Other,
                    };
                    self.writes.push(StorageWrite {
                        slot,
                        value: source,
                    });
                    match op.as_deref() {
                        Some("*=") => {
                            self.arithmetic.insert((slot, ArithmeticRole::Multiplier));
                            if let Some(factor) = direct_slot(value, scope) {
                                self.arithmetic.insert((factor, ArithmeticRole::Multiplier));
                            }
                        }
                        Some("/=") | Some("%=") => {
                            if let Some(divisor) = direct_slot(value, scope) {
                                self.arithmetic.insert((divisor, ArithmeticRole::Divisor));
                            }
                        }
                        _ => {}
                    }
                }
                self.visit_target(target, scope);
                self.visit_expr(value, scope);
            }
            Statement::Call { callee, arguments } => {
                self.visit_call(callee, arguments, scope);
            }
            Statement::Placeholder => self.has_placeholder = true,
            Statement::Return { value: Some(value) } => self.visit_expr(value, scope),
            Statement::Emit { arguments, .. } => {
                for argument in arguments {
                    self.visit_expr(argument, scope);
                }
            }
            Statement::Expression { expr } => self.visit_expr(expr, scope),
            Statement::Return { value: None } | Statement::Revert | Statement::Other => {}
        }
    }

    fn visit_call(&mut self, callee: &str, arguments: &[Expr], scope: &Scope<'_>) {
        match callee {
            "require" | "assert" => {
                if let Some(condition) = arguments.first() {
                    self.add_check(condition.clone(), scope);
                }
            }
            _ if is_builtin(callee) => {}
            _ => self.calls.push(CallSite {
                callee: normalize_callee(callee).to_string(),
                arguments: arguments.iter().map(|a| value_source(a, scope)).collect(),
            }),
        }
        for argument in arguments {
            self.visit_expr(argument, scope);
        }
    }

    fn visit_target(&mut self, target: &Expr, scope: &Scope<'_>) {
        match target {
            Expr::Index { base, index } => {
                self.visit_target(base, scope);
                self.visit_expr(index, scope);
            }
            Expr::Member { object, .. } => self.visit_target(object, scope),
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr, scope: &Scope<'_>) {
        match expr {
            Expr::Identifier { name } => {
                if let Some(slot) = scope.slot_of(name) {
                    self.reads.insert(slot);
                }
            }
            Expr::Member { object, .. } => self.visit_expr(object, scope),
            Expr::Index { base, index } => {
                self.visit_expr(base, scope);
                self.visit_expr(index, scope);
            }
            Expr::Binary { op, left, right } => {
                match op.as_str() {
                    "/" | "%" => {
                        if let Some(slot) = direct_slot(right, scope) {
                            self.arithmetic.insert((slot, ArithmeticRole::Divisor));
                        }
                    }
                    "*" => {
                        for side in [left, right] {
                            if let Some(slot) = direct_slot(side, scope) {
                                self.arithmetic.insert((slot, ArithmeticRole::Multiplier));
                            }
                        }
                    }
                    _ => {}
                }
                self.visit_expr(left, scope);
                self.visit_expr(right, scope);
            }
            Expr::Unary { operand, .. } => self.visit_expr(operand, scope),
            Expr::Call { callee, arguments } => self.visit_call(callee, arguments, scope),
            Expr::Literal { .. } | Expr::Other => {}
        }
    }

    fn add_check(&mut self, condition: Expr, scope: &Scope<'_>) {
        let condition = normalize(&condition);
        let mut slots = BTreeSet::new();
        collect_slots(&condition, scope, &mut slots);
        self.checks.push(Check {
            reads_caller: mentions_caller(&condition),
            slots,
            condition,
        });
    }
}

fn is_builtin(callee: &str) -> bool {
    matches!(
        callee,
        "revert" | "address" | "payable" | "bool" | "type" | "keccak256" | "sha256" | "ecrecover"
    ) || callee.starts_with("abi.")
        || ["uint", "int", "bytes"]
            .iter()
            .any(|p| callee.strip_prefix(p).is_some_and(|bits| bits.chars().all(|c| c.is_ascii_digit())))
}

fn is_revert(statement: &Statement) -> bool {
    match statement {
        Statement::Revert => true,
        Statement::Call { callee, .. } => callee == "revert",
        _ => false,
    }
}

/// `super.f` and `this.f` both land on a function of the same contract.
pub fn normalize_callee(callee: &str) -> &str {
    callee
        .strip_prefix("super.")
        .or_else(|| callee.strip_prefix("this."))
        .unwrap_or(callee)
}

fn root_identifier(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Identifier { name } => Some(name),
        Expr::Index { base, .. } => root_identifier(base),
        Expr::Member { object, .. } => root_identifier(object),
        _ => None,
    }
}

fn direct_slot(expr: &Expr, scope: &Scope<'_>) -> Option<usize> {
    match expr {
        Expr::Identifier { name } => scope.slot_of(name),
        _ => None,
    }
}

fn value_source(expr: &Expr, scope: &Scope<'_>) -> ValueSource {
    match expr {
        Expr::Identifier { name } if scope.is_param(name) => ValueSource::Param(name.clone()),
        Expr::Literal { value } => ValueSource::Literal(value.clone()),
        _ if is_caller(expr) => ValueSource::Caller,
        _ if is_zero(expr) => ValueSource::Literal("0".to_string()),
        _ => ValueSource::Other,
    }
}

fn collect_slots(expr: &Expr, scope: &Scope<'_>, slots: &mut BTreeSet<usize>) {
    match expr {
        Expr::Identifier { name } => {
            if let Some(slot) = scope.slot_of(name) {
                slots.insert(slot);
            }
        }
        Expr::Member { object, .. } => collect_slots(object, scope, slots),
        Expr::Index { base, index } => {
            collect_slots(base, scope, slots);
            collect_slots(index, scope, slots);
        }
        Expr::Binary { left, right, .. } => {
            collect_slots(left, scope, slots);
            collect_slots(right, scope, slots);
        }
        Expr::Unary { operand, .. } => collect_slots(operand, scope, slots),
        Expr::Call { arguments, .. } => {
            for argument in arguments {
                collect_slots(argument, scope, slots);
            }
        }
        Expr::Literal { .. } | Expr::Other => {}
    }
}

fn is_caller(expr: &Expr) -> bool {
    match expr {
        Expr::Member { object, member } => {
            member == "sender" && matches!(object.as_ref(), Expr::Identifier { name } if name == "msg")
        }
        Expr::Identifier { name } => name == "msg.sender",
        Expr::Call { callee, arguments } => callee == "_msgSender" && arguments.is_empty(),
        _ => false,
    }
}

fn mentions_caller(expr: &Expr) -> bool {
    if is_caller(expr) {
        return true;
    }
    match expr {
        Expr::Member { object, .. } => mentions_caller(object),
        Expr::Index { base, index } => mentions_caller(base) || mentions_caller(index),
        Expr::Binary { left, right, .. } => mentions_caller(left) || mentions_caller(right),
        Expr::Unary { operand, .. } => mentions_caller(operand),
        Expr::Call { arguments, .. } => arguments.iter().any(mentions_caller),
        _ => false,
    }
}

fn is_zero(expr: &Expr) -> bool {
    match expr {
        Expr::Literal { value } => {
            let digits = value
                .strip_prefix("0x")
                .or_else(|| value.strip_prefix("0X"))
                .unwrap_or(value);
            (!digits.is_empty() && digits.chars().all(|c| c == '0')) || value == "address(0)"
        }
        Expr::Call { callee, arguments } => {
            matches!(callee.as_str(), "address" | "payable") && arguments.len() == 1 && is_zero(&arguments[0])
        }
        _ => false,
    }
}

fn is_param_ref(expr: &Expr, param: &str) -> bool {
    match expr {
        Expr::Identifier { name } => name == param,
        Expr::Call { callee, arguments } if callee == "address" || callee.starts_with("uint") => {
            arguments.len() == 1 && is_param_ref(&arguments[0], param)
        }
        _ => false,
    }
}

/// Pushes `!` inward so conditions end up as conjunctions and disjunctions of
/// comparisons wherever possible.
pub fn normalize(expr: &Expr) -> Expr {
    match expr {
        Expr::Unary { op, operand } if op == "!" => negate(&normalize(operand)),
        Expr::Binary { op, left, right } if op == "&&" || op == "||" => {
            Expr::binary(op.clone(), normalize(left), normalize(right))
        }
        _ => expr.clone(),
    }
}

/// Negation of an already normalized condition.
pub fn negate(expr: &Expr) -> Expr {
    match expr {
        Expr::Unary { op, operand } if op == "!" => operand.as_ref().clone(),
        Expr::Binary { op, left, right } => {
            let flipped = match op.as_str() {
                "&&" => return Expr::binary("||", negate(left), negate(right)),
                "||" => return Expr::binary("&&", negate(left), negate(right)),
                "==" => "!=",
                "!=" => "==",
                "<" => ">=",
                ">=" => "<",
                ">" => "<=",
                "<=" => ">",
                _ => return Expr::not(expr.clone()),
            };
            Expr::binary(flipped, left.as_ref().clone(), right.as_ref().clone())
        }
        _ => Expr::not(expr.clone()),
    }
}

fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary { op, left, right } if op == "&&" => {
            let mut parts = conjuncts(left);
            parts.extend(conjuncts(right));
            parts
        }
        _ => vec![expr],
    }
}

fn satisfies(condition: &Expr, param: &str, requirement: Requirement) -> bool {
    let (op, left, right) = match condition {
        Expr::Binary { op, left, right } => (op.as_str(), left.as_ref(), right.as_ref()),
        _ => return false,
    };

    let on_left = is_param_ref(left, param);
    let on_right = is_param_ref(right, param);
    if !on_left && !on_right {
        return false;
    }
    let other = if on_left { right } else { left };

    match requirement {
        Requirement::Bounded => matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">="),
        Requirement::NonZero => match (op, on_left) {
            ("!=", _) => is_zero(other),
            (">", true) | ("<", false) => true,
            (">=", true) | ("<=", false) => !is_zero(other),
            _ => false,
        },
    }
}
