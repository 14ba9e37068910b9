//! Utility functions for string formatting.

pub mod format;

pub use format::{format_age, truncate_string};
