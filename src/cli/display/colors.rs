//! Status colouring for CLI output.
//!
//! `console` drops styling when stdout is not a terminal or `NO_COLOR` is set.

use console::{style, StyledObject};

use crate::domain::models::TaskStatus;

/// Colour scheme:
/// - Blue:   pending
/// - Yellow: running
/// - Green:  completed
/// - Red:    failed
pub fn colorize_status(status: TaskStatus) -> StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        TaskStatus::Pending => style(text).blue(),
        TaskStatus::Running => style(text).yellow(),
        TaskStatus::Completed => style(text).green().bold(),
        TaskStatus::Failed => style(text).red().bold(),
    }
}
