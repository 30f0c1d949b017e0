//! Command implementations for the audit CLI
//!
//! `check` analyzes one version or an upgrade pair and is the command meant
//! for CI gates, `scan` runs the same pipeline over whole directories of
//! contract exports, and `list` shows which analyzers are registered.

pub mod check;
pub mod list;
pub mod report;
pub mod scan;

/// No critical or high findings.
pub const EXIT_CLEAN: u8 = 0;
/// At least one critical or high finding.
pub const EXIT_BLOCKING: u8 = 1;
/// Usage or IO error, or nothing could be loaded.
pub const EXIT_FAILURE: u8 = 2;
