//! Validation constants for domain types
//!
//! This module centralizes the limits used when validating identifiers and
//! names at the ingestion boundary.

/// Identifier validation constants
pub mod identifiers {
    /// Maximum length of event, conversation and user identifiers
    pub const MAX_IDENTIFIER_LENGTH: usize = 128;
}

/// Metric name validation constants
pub mod metric_name {
    /// Maximum metric name length
    pub const MAX_LENGTH: usize = 128;

    /// Characters allowed after the leading lowercase letter
    pub fn is_allowed_char(c: char) -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
    }
}
