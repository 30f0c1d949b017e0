//! Storage types and the word-packing rules used to place state variables.
//!
//! Value types are packed into 32-byte words in declaration order. Structs,
//! arrays, mappings, `bytes` and `string` always begin a fresh word and the
//! item declared after them begins a fresh word too.

use std::collections::HashMap;

pub const WORD_SIZE: u64 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageType {
    /// Fixed-size value types: integers, address, bool, bytesN, enums.
    Value { name: String, size: u64 },
    /// Occupies one full word whose content lives elsewhere.
    Dynamic { name: String },
    FixedArray {
        element: Box<StorageType>,
        length: u64,
    },
    Struct {
        name: String,
        members: Vec<StorageType>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub word: u64,
    pub offset: u8,
}

impl StorageType {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::FixedArray { .. } | Self::Struct { .. })
    }

    /// Bytes occupied inside a word for value types; whole words otherwise.
    /// `None` when the size does not fit the 256-bit slot space.
    pub fn byte_size(&self) -> Option<u64> {
        match self {
            Self::Value { size, .. } => Some(*size),
            _ => self.word_span()?.checked_mul(WORD_SIZE),
        }
    }

    /// Words occupied, or `None` when the count overflows.
    pub fn word_span(&self) -> Option<u64> {
        match self {
            Self::Value { .. } | Self::Dynamic { .. } => Some(1),
            Self::FixedArray { element, length } => match element.as_ref() {
                Self::Value { size, .. } => {
                    let per_word = (WORD_SIZE / (*size).max(1)).max(1);
                    Some(length.div_ceil(per_word))
                }
                _ => length.checked_mul(element.word_span()?),
            },
            Self::Struct { members, .. } => pack(members).map(|(_, words)| words),
        }
    }

    /// Identity used before any element-wise comparison: the struct name, or
    /// the element type for fixed arrays (so `uint256[50]` and `uint256[49]`
    /// share the identity `uint256[N]` and differ only element-wise).
    pub fn identity(&self) -> String {
        match self {
            Self::Value { name, .. } | Self::Dynamic { name } => name.clone(),
            Self::FixedArray { element, .. } => format!("{}[N]", element.identity()),
            Self::Struct { name, .. } => format!("struct {}", name),
        }
    }

    pub fn is_address_like(&self) -> bool {
        matches!(self, Self::Value { name, .. } if name == "address")
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Value { name, .. } if name.starts_with("uint") || name.starts_with("int"))
    }

    pub fn is_flag_like(&self) -> bool {
        matches!(self, Self::Value { name, .. } if name == "bool" || name.starts_with("uint"))
    }
}

/// Places `items` by the packing rules and returns each item's position
/// together with the total number of words used. `None` when the layout runs
/// past the last addressable word.
pub fn pack(items: &[StorageType]) -> Option<(Vec<Position>, u64)> {
    let mut positions = Vec::with_capacity(items.len());
    let mut word = 0u64;
    let mut offset = 0u64;

    for item in items {
        match item {
            StorageType::Value { size, .. } => {
                if offset + size > WORD_SIZE {
                    word = word.checked_add(1)?;
                    offset = 0;
                }
                positions.push(Position {
                    word,
                    offset: offset as u8,
                });
                offset += size;
            }
            _ => {
                if offset > 0 {
                    word = word.checked_add(1)?;
                    offset = 0;
                }
                positions.push(Position { word, offset: 0 });
                word = word.checked_add(item.word_span()?)?;
            }
        }
    }

    let total = if offset > 0 { word.checked_add(1)? } else { word };
    Some((positions, total))
}

/// Resolves declared type names against the contract's structs and enums.
pub struct TypeResolver<'a> {
    structs: HashMap<&'a str, &'a [crate::model::input::Parameter]>,
    enums: Vec<&'a str>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(
        structs: &'a [crate::model::input::StructDefinition],
        enums: &'a [String],
    ) -> Self {
        Self {
            structs: structs
                .iter()
                .map(|s| (s.name.as_str(), s.members.as_slice()))
                .collect(),
            enums: enums.iter().map(String::as_str).collect(),
        }
    }

    pub fn resolve(&self, type_name: &str) -> Result<StorageType, String> {
        self.resolve_nested(type_name, &mut Vec::new())
    }

    fn resolve_nested(&self, raw: &str, stack: &mut Vec<String>) -> Result<StorageType, String> {
        let name = raw.trim();
        if name.is_empty() {
            return Err("empty type name".to_string());
        }

        if name.starts_with("mapping") {
            return Ok(StorageType::Dynamic {
                name: self.mapping_identity(name)?,
            });
        }

        if let Some(stripped) = name.strip_suffix(']') {
            let open = stripped
                .rfind('[')
                .ok_or_else(|| format!("unbalanced array type '{}'", name))?;
            let length = stripped[open + 1..].trim();
            if length.is_empty() {
                // elements live elsewhere, so a struct may contain itself here
                return Ok(StorageType::Dynamic {
                    name: format!("{}[]", self.identity_of(&stripped[..open])?),
                });
            }
            let element = self.resolve_nested(&stripped[..open], stack)?;
            let length: u64 = length
                .parse()
                .map_err(|_| format!("array length '{}' in '{}' is not a number", length, name))?;
            return Ok(StorageType::FixedArray {
                element: Box::new(element),
                length,
            });
        }

        let name = name
            .strip_prefix("struct ")
            .or_else(|| name.strip_prefix("enum "))
            .or_else(|| name.strip_prefix("contract "))
            .unwrap_or(name)
            .trim();

        if let Some(value) = elementary(name) {
            return Ok(value);
        }

        if let Some(members) = self.structs.get(name) {
            if stack.iter().any(|s| s == name) {
                return Err(format!("struct '{}' contains itself", name));
            }
            stack.push(name.to_string());
            let members = members
                .iter()
                .map(|m| self.resolve_nested(&m.type_name, stack))
                .collect::<Result<Vec<_>, _>>()?;
            stack.pop();
            return Ok(StorageType::Struct {
                name: name.to_string(),
                members,
            });
        }

        if self.enums.contains(&name) {
            return Ok(StorageType::Value {
                name: format!("enum {}", name),
                size: 1,
            });
        }

        if is_identifier(name) {
            // contract and interface references are stored as addresses
            return Ok(StorageType::Value {
                name: "address".to_string(),
                size: 20,
            });
        }

        Err(format!("unknown type '{}'", name))
    }

    /// Identity of a type that is only referenced, never laid out: elements
    /// of dynamic arrays and mapping keys and values.
    fn identity_of(&self, raw: &str) -> Result<String, String> {
        let name = raw.trim();
        if name.starts_with("mapping") {
            return self.mapping_identity(name);
        }

        if let Some(stripped) = name.strip_suffix(']') {
            let open = stripped
                .rfind('[')
                .ok_or_else(|| format!("unbalanced array type '{}'", name))?;
            let element = self.identity_of(&stripped[..open])?;
            return Ok(if stripped[open + 1..].trim().is_empty() {
                format!("{}[]", element)
            } else {
                format!("{}[N]", element)
            });
        }

        let name = name
            .strip_prefix("struct ")
            .or_else(|| name.strip_prefix("enum "))
            .or_else(|| name.strip_prefix("contract "))
            .unwrap_or(name)
            .trim();

        if let Some(value) = elementary(name) {
            Ok(value.identity())
        } else if self.structs.contains_key(name) {
            Ok(format!("struct {}", name))
        } else if self.enums.contains(&name) {
            Ok(format!("enum {}", name))
        } else if is_identifier(name) {
            Ok("address".to_string())
        } else {
            Err(format!("unknown type '{}'", name))
        }
    }

    /// `mapping(K => V)` with both sides canonicalized, so `uint` and
    /// `uint256` keys or values give the same identity.
    fn mapping_identity(&self, name: &str) -> Result<String, String> {
        let inner = name
            .strip_prefix("mapping")
            .map(str::trim)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| format!("malformed mapping type '{}'", name))?;
        let (key, value) = inner
            .split_once("=>")
            .ok_or_else(|| format!("malformed mapping type '{}'", name))?;

        Ok(format!(
            "mapping({}=>{})",
            self.identity_of(&drop_binding_name(key))?,
            self.identity_of(&drop_binding_name(value))?
        ))
    }
}

/// Strips the optional name in `mapping(address owner => uint256 balance)`.
fn drop_binding_name(part: &str) -> String {
    let part = part.trim();
    if part.starts_with("mapping") {
        return part.to_string();
    }
    let tokens: Vec<&str> = part.split_whitespace().collect();
    let kept = match tokens.as_slice() {
        ["struct" | "enum" | "contract", ..] | ["address", "payable", ..] => 2,
        _ => 1,
    };
    tokens.iter().take(kept).copied().collect::<Vec<_>>().join(" ")
}

fn elementary(name: &str) -> Option<StorageType> {
    let value = |name: &str, size: u64| StorageType::Value {
        name: name.to_string(),
        size,
    };

    match name {
        "bool" => return Some(value("bool", 1)),
        "address" | "address payable" => return Some(value("address", 20)),
        "uint" => return Some(value("uint256", 32)),
        "int" => return Some(value("int256", 32)),
        "byte" => return Some(value("bytes1", 1)),
        "string" | "bytes" => {
            return Some(StorageType::Dynamic {
                name: name.to_string(),
            })
        }
        _ => {}
    }

    for (prefix, unit) in [("uint", 8), ("int", 8), ("bytes", 1)] {
        if let Some(bits) = name.strip_prefix(prefix) {
            if let Ok(n) = bits.parse::<u64>() {
                let size = n / unit;
                if size >= 1 && size <= WORD_SIZE && n % unit == 0 {
                    return Some(value(name, size));
                }
            }
        }
    }

    None
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
