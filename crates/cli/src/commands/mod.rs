mod demo;
mod seed;

pub use demo::{DemoArgs, demo_command};
pub use seed::seed_command;

use colored::Colorize;

/// Print a titled step of a command's output
fn section(title: &str) {
    println!("\n{}", title.bold().cyan());
}

/// Print a labelled value
fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<24} {}", format!("{label}:").dimmed(), value);
}
