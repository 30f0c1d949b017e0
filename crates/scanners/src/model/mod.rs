//! Contract model: the parsed input shape, the normalized ContractVersion
//! built from it, and the loader that turns one into the other.

pub mod contract;
pub mod input;
pub mod loader;
pub mod types;

pub use contract::{
    ContractVersion, FunctionInfo, ModifierInfo, Protection, SlotRole, StorageSlot, Visibility,
};
pub use input::{parse_contracts, FunctionKind, ParsedContract};
pub use loader::ContractLoader;
pub use types::{Position, StorageType};
