//! Wildcard topic filters.
//!
//! A filter is matched segment by segment against `/`-delimited topics:
//! - `+` matches exactly one non-empty alphanumeric segment
//! - `#` matches the alphanumeric remainder of the topic, `/` included
//! - anything else matches itself literally
//!
//! Filters are compiled into an anchored regular expression once, at
//! subscribe time.

use crate::transport::TransportError;
use regex::Regex;

/// Single-level wildcard.
pub const WILDCARD_SINGLE: &str = "+";
/// Multi-level wildcard.
pub const WILDCARD_MULTI: &str = "#";

const SINGLE_LEVEL: &str = "[A-Za-z0-9]+";
const MULTI_LEVEL: &str = "[A-Za-z0-9/]*";

/// A compiled subscription filter.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    filter: String,
    matcher: Regex,
}

impl TopicFilter {
    /// Compile a filter.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidFilter`] if the resulting expression
    /// cannot be compiled.
    pub fn new(filter: &str) -> Result<Self, TransportError> {
        let translated = filter
            .split('/')
            .map(|segment| match segment {
                WILDCARD_SINGLE => SINGLE_LEVEL.to_string(),
                WILDCARD_MULTI => MULTI_LEVEL.to_string(),
                literal => regex::escape(literal),
            })
            .collect::<Vec<_>>()
            .join("/");

        let matcher =
            Regex::new(&format!("^{translated}$")).map_err(|e| TransportError::InvalidFilter {
                filter: filter.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            filter: filter.to_string(),
            matcher,
        })
    }

    /// The filter as it was subscribed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.filter
    }

    /// Check whether a concrete topic matches this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.matcher.is_match(topic)
    }
}
