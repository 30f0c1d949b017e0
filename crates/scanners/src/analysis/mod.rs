//! Behavioral analysis shared by the loader and the analyzers
//!
//! Body summaries classify guards by what they do rather than what they are
//! called, and the call graph lets guards, writes and parameter flows be
//! followed through internal helpers.

pub mod behavior;
pub mod call_graph;

pub use behavior::{
    ArithmeticRole, BodySummary, CallSite, Check, Requirement, Scope, StorageWrite, ValueSource,
};
pub use call_graph::CallGraph;
