//! CLI subcommands

pub mod check;
pub mod mutate;
pub mod shutdown;
