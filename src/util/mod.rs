//! Terminal text helpers for the CLI output.

mod text;

pub use text::{display_width, fit_column, strip_control_chars, truncate_to_width};
