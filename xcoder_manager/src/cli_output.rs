//! Shared output helpers so every `xcoder-rsrc` command reads the same way.
//!
//! Status lines go through these; device tables and records are written to a
//! caller-supplied writer by [`crate::commands`].

use colored::*;

pub const ICON_SUCCESS: &str = "\u{2713}"; // ✓
pub const ICON_INFO: &str = "\u{25b6}"; // ▶
pub const ICON_HINT: &str = "\u{00b7}"; // ·

/// ✓ message
pub fn success(msg: &str) {
    println!("{} {}", ICON_SUCCESS.green(), msg);
}

/// ▶ message
pub fn info(msg: &str) {
    println!("{} {}", ICON_INFO.cyan(), msg);
}

/// Dimmed follow-up line under a status message.
pub fn hint(msg: &str) {
    println!("  {} {}", ICON_HINT.dimmed(), msg.dimmed());
}

/// Empty-state message with an optional tip.
pub fn empty(msg: &str, tip: Option<&str>) {
    println!("{}", msg.yellow());
    if let Some(t) = tip {
        hint(t);
    }
}

/// Module count phrase, "1 module" / "3 modules".
pub fn modules(count: usize) -> String {
    if count == 1 {
        "1 module".to_string()
    } else {
        format!("{} modules", count)
    }
}
