//! Plain status lines for interactive commands
//!
//! `run` never prints here: its stdout carries the protocol.

use console::style;

/// Display a success step
pub fn step_ok(message: &str) {
    println!("  {} {}", style("[OK]").green(), message);
}

/// Display a success step with detail
pub fn step_ok_detail(message: &str, detail: &str) {
    println!("  {} {} ({})", style("[OK]").green(), message, detail);
}

/// Display a warning step with a hint
pub fn step_warn_hint(message: &str, hint: &str) {
    println!("  {} {}", style("[WARN]").yellow(), message);
    println!("       {}", style(hint).dim());
}
