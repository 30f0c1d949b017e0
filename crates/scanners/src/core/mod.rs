//! Core abstractions shared by every analyzer
//!
//! The Scanner trait is the interface each analyzer implements, findings and
//! their locations are the only thing analyzers produce, and the analysis
//! context carries the contract versions, configuration and the findings of
//! earlier pipeline stages.

pub mod context;
pub mod error;
pub mod fingerprint;
pub mod result;
pub mod scanner;
pub mod severity;

pub use context::{AnalysisConfig, AnalysisContext, GapPolicy, GuardConventions};
pub use error::ModelError;
pub use fingerprint::{DeduplicationStats, FindingFingerprint};
pub use result::{Category, Finding, Location, SlotRef};
pub use scanner::Scanner;
pub use severity::Severity;
