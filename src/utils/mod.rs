//! Utility modules

pub mod fuzzy;

pub use fuzzy::{collapse_whitespace, edit_distance, normalize_text};
