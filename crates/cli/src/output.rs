//! Output formatting utilities

use aux_lib::{ContainerState, Readiness};
use clap::ValueEnum;
use colored::Colorize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a container state
pub fn color_state(state: &ContainerState) -> String {
    let text = state.to_string();
    match state {
        ContainerState::Running => text.green().to_string(),
        ContainerState::Waiting => text.yellow().to_string(),
        ContainerState::Terminated { exit_code: 0 } => text.normal().to_string(),
        ContainerState::Terminated { .. } => text.red().to_string(),
    }
}

/// Color a classifier verdict
pub fn color_readiness(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Ready => "ready for shutdown".green().bold().to_string(),
        Readiness::NotReady(reason) => reason.to_string().dimmed().to_string(),
    }
}
