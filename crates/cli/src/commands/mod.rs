//! CLI subcommands.

pub mod menu;
pub mod migrate;
