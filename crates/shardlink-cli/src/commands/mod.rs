//! CLI subcommand implementations.

pub mod check;
pub mod init;
pub mod query;
pub mod run;
