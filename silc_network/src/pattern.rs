//! Glob matching for host ACLs and invite/ban list patterns.
//!
//! Permitted wildcards are * (match zero or more characters) and ? (match exactly one character)

use std::fmt::Display;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

/// A wildcard pattern
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct Pattern(String);

impl Deref for Pattern
{
    type Target = String;

    fn deref(&self) -> &String { &self.0 }
}

impl Display for Pattern
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        self.0.fmt(f)
    }
}

impl Pattern
{
    pub fn new(s: impl Into<String>) -> Self
    {
        Self(s.into())
    }

    /// Test whether the given string matches this pattern, ignoring case
    pub fn matches(&self, s: &str) -> bool
    {
        WildMatch::new(&self.0.to_lowercase()).matches(&s.to_lowercase())
    }
}
