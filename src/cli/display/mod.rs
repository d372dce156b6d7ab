//! Display helpers for CLI output formatting.

pub mod colors;
pub mod table;

use console::style;
use serde::Serialize;

pub use colors::colorize_status;
pub use table::{list_table, render_list};

/// Trait for types that can be rendered as human-readable or JSON output.
pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Dispatch output based on JSON mode flag.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Render a success action result.
pub fn action_success(message: &str) -> String {
    format!("{} {message}", style("\u{2713}").green().bold())
}

/// Render a failure action result.
pub fn action_failure(message: &str) -> String {
    format!("{} {message}", style("\u{2717}").red().bold())
}

/// Truncate to `max_chars` characters, appending "..." if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer line of text", 10), "a longe...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_action_markers() {
        let ok = console::strip_ansi_codes(&action_success("added")).to_string();
        assert_eq!(ok, "\u{2713} added");
        let err = console::strip_ansi_codes(&action_failure("nope")).to_string();
        assert_eq!(err, "\u{2717} nope");
    }
}
