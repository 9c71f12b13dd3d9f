//! Command implementations for the CLI.
//!
//! Each command group lives in its own module.

pub mod ask;
pub mod documents;
pub mod init;
pub mod maintenance;
