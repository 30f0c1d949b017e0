use crate::core::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "init-unprotected")]
    InitUnprotected,
    #[serde(rename = "init-reentry")]
    InitReentry,
    #[serde(rename = "init-unvalidated-param")]
    InitUnvalidatedParam,
    #[serde(rename = "storage-shift")]
    StorageShift,
    #[serde(rename = "storage-shrink")]
    StorageShrink,
    #[serde(rename = "upgrade-unauthorized")]
    UpgradeUnauthorized,
    #[serde(rename = "upgrade-empty-guard")]
    UpgradeEmptyGuard,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitUnprotected => "init-unprotected",
            Self::InitReentry => "init-reentry",
            Self::InitUnvalidatedParam => "init-unvalidated-param",
            Self::StorageShift => "storage-shift",
            Self::StorageShrink => "storage-shrink",
            Self::UpgradeUnauthorized => "upgrade-unauthorized",
            Self::UpgradeEmptyGuard => "upgrade-empty-guard",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub index: usize,
    pub name: String,
}

/// Where a finding points: a contract version plus, optionally, a function
/// signature and/or a storage slot inside it. The contract is referenced by
/// id only; findings never own the version they describe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub contract: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub slot: Option<SlotRef>,
}

impl Location {
    pub fn contract(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            function: None,
            slot: None,
        }
    }

    pub fn function(contract: impl Into<String>, signature: impl Into<String>) -> Self {
        Self::contract(contract).with_function(signature)
    }

    pub fn slot(contract: impl Into<String>, index: usize, name: impl Into<String>) -> Self {
        Self::contract(contract).with_slot(index, name)
    }

    pub fn with_function(mut self, signature: impl Into<String>) -> Self {
        self.function = Some(signature.into());
        self
    }

    pub fn with_slot(mut self, index: usize, name: impl Into<String>) -> Self {
        self.slot = Some(SlotRef {
            index,
            name: name.into(),
        });
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.contract)?;
        if let Some(function) = &self.function {
            write!(f, "::{}", function)?;
        }
        if let Some(slot) = &self.slot {
            write!(f, " [slot {} `{}`]", slot.index, slot.name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub scanner_id: String,

    pub category: Category,

    pub severity: Severity,

    pub location: Location,

    pub title: String,

    pub explanation: String,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub annotations: Vec<String>,
}

impl Finding {
    pub fn new(
        scanner_id: impl Into<String>,
        category: Category,
        severity: Severity,
        location: Location,
        title: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            scanner_id: scanner_id.into(),
            category,
            severity,
            location,
            title: title.into(),
            explanation: explanation.into(),
            annotations: Vec::new(),
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        let annotation = annotation.into();
        if !self.annotations.contains(&annotation) {
            self.annotations.push(annotation);
        }
        self
    }

    pub fn is_in(&self, contract: &str) -> bool {
        self.location.contract == contract
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_names() {
        let json = serde_json::to_string(&Category::InitUnvalidatedParam).unwrap();
        assert_eq!(json, "\"init-unvalidated-param\"");
        assert_eq!(Category::UpgradeEmptyGuard.as_str(), "upgrade-empty-guard");
    }

    #[test]
    fn test_location_display() {
        let location = Location::function("Vault@v1", "initialize(address)").with_slot(0, "owner");
        assert_eq!(
            location.to_string(),
            "Vault@v1::initialize(address) [slot 0 `owner`]"
        );
    }

    #[test]
    fn test_annotations_are_not_repeated() {
        let finding = Finding::new(
            "upgrade-authorization",
            Category::UpgradeUnauthorized,
            Severity::Critical,
            Location::contract("Vault"),
            "t",
            "e",
        )
        .with_annotation("owner takeover chain")
        .with_annotation("owner takeover chain");
        assert_eq!(finding.annotations.len(), 1);
    }
}
