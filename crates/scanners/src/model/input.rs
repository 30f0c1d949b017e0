//! Parsed-contract representation consumed by the loader.
//!
//! This is the shape an external front end (compiler AST export, a parser
//! service) is expected to hand over as JSON. It is deliberately loose: the
//! loader, not serde, decides what is malformed so it can name the contract
//! and the reason.

use crate::core::error::ModelResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedContract {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub is_proxy_implementation: bool,

    /// Linearized base contracts, most base first.
    #[serde(default)]
    pub inherits: Vec<String>,

    /// `None` means the front end could not provide a storage layout.
    #[serde(default)]
    pub storage: Option<Vec<StateVariable>>,

    #[serde(default)]
    pub structs: Vec<StructDefinition>,

    #[serde(default)]
    pub enums: Vec<String>,

    #[serde(default)]
    pub modifiers: Vec<ModifierDefinition>,

    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub constant: bool,

    #[serde(default)]
    pub immutable: bool,

    #[serde(default)]
    pub slot: Option<u64>,

    #[serde(default)]
    pub offset: Option<u8>,
}

impl StateVariable {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            constant: false,
            immutable: false,
            slot: None,
            offset: None,
        }
    }

    pub fn occupies_storage(&self) -> bool {
        !self.constant && !self.immutable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDefinition {
    pub name: String,
    pub members: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierDefinition {
    pub name: String,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    #[default]
    Function,
    Constructor,
    Fallback,
    Receive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(default)]
    pub kind: FunctionKind,

    #[serde(default)]
    pub visibility: Option<String>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub modifiers: Vec<String>,

    /// `None` for declarations without an implementation.
    #[serde(default)]
    pub body: Option<Vec<Statement>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Require {
        condition: Expr,
    },
    Assert {
        condition: Expr,
    },
    If {
        condition: Expr,
        #[serde(default)]
        then: Vec<Statement>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Statement>,
    },
    Revert,
    Assign {
        target: Expr,
        value: Expr,
        #[serde(default)]
        op: Option<String>,
    },
    Call {
        callee: String,
        #[serde(default)]
        arguments: Vec<Expr>,
    },
    Placeholder,
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Emit {
        event: String,
        #[serde(default)]
        arguments: Vec<Expr>,
    },
    Expression {
        expr: Expr,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Identifier {
        name: String,
    },
    Literal {
        value: String,
    },
    Member {
        object: Box<Expr>,
        member: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Call {
        callee: String,
        #[serde(default)]
        arguments: Vec<Expr>,
    },
    #[serde(other)]
    Other,
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Self::Identifier { name: name.into() }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn binary(op: impl Into<String>, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op: op.into(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Self::Unary {
            op: "!".to_string(),
            operand: Box::new(operand),
        }
    }

    pub fn call(callee: impl Into<String>, arguments: Vec<Expr>) -> Self {
        Self::Call {
            callee: callee.into(),
            arguments,
        }
    }

    pub fn msg_sender() -> Self {
        Self::Member {
            object: Box::new(Self::ident("msg")),
            member: "sender".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParsedSource {
    Wrapped { contracts: Vec<ParsedContract> },
    Many(Vec<ParsedContract>),
    Single(Box<ParsedContract>),
}

/// Accepts a single contract object, an array of contracts, or an object
/// with a `contracts` array.
pub fn parse_contracts(json: &str) -> ModelResult<Vec<ParsedContract>> {
    let source: ParsedSource = serde_json::from_str(json)?;
    Ok(match source {
        ParsedSource::Wrapped { contracts } => contracts,
        ParsedSource::Many(contracts) => contracts,
        ParsedSource::Single(contract) => vec![*contract],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_wrapped_sources() {
        let single = r#"{"name": "Vault", "storage": []}"#;
        let wrapped = r#"{"contracts": [{"name": "A"}, {"name": "B"}]}"#;
        let many = r#"[{"name": "A"}]"#;

        assert_eq!(parse_contracts(single).unwrap()[0].name, "Vault");
        assert_eq!(parse_contracts(wrapped).unwrap().len(), 2);
        assert_eq!(parse_contracts(many).unwrap().len(), 1);
    }

    #[test]
    fn test_statement_shapes() {
        let json = r#"[
            {"kind": "require", "condition": {"kind": "binary", "op": "!=",
                "left": {"kind": "identifier", "name": "_owner"},
                "right": {"kind": "call", "callee": "address", "arguments": [{"kind": "literal", "value": "0"}]}}},
            {"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
                "value": {"kind": "identifier", "name": "_owner"}},
            {"kind": "placeholder"},
            {"kind": "unchecked_block"}
        ]"#;
        let statements: Vec<Statement> = serde_json::from_str(json).unwrap();
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[2], Statement::Placeholder);
        assert_eq!(statements[3], Statement::Other);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(parse_contracts("{not json").is_err());
    }
}
