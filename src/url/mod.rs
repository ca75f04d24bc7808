//! URL handling module
//!
//! This module provides domain extraction and comparison, fragment stripping,
//! and the `LinkPattern` used to admit discovered links.

mod domain;
mod matcher;
mod pattern;

// Re-export main functions
pub use domain::{extract_domain, parse_http_url, same_domain, strip_fragment};
pub use matcher::{is_valid_glob, matches_glob};
pub use pattern::LinkPattern;
