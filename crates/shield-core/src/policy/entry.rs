//! Block/allow list entries and matching

use crate::error::{Error, Result};
use crate::packet::MAX_HOSTNAME_LEN;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Which list an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    /// Matching domains are blocked
    Block,
    /// Matching domains are always allowed
    Allow,
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListType::Block => write!(f, "blocklist"),
            ListType::Allow => write!(f, "allowlist"),
        }
    }
}

impl FromStr for ListType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "block" | "blocklist" | "black" | "blacklist" => Ok(ListType::Block),
            "allow" | "allowlist" | "white" | "whitelist" => Ok(ListType::Allow),
            other => Err(Error::config_value(
                "list_type",
                format!("unknown list '{other}' (expected block or allow)"),
            )),
        }
    }
}

/// A single block or allow list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Normalized pattern, including the `*.` prefix for wildcards
    pub domain: String,
    /// Owning list
    pub list_type: ListType,
    /// Whether the pattern is `*.suffix`
    pub wildcard: bool,
    /// When the entry was first added
    pub added_at: DateTime<Utc>,
}

impl PolicyEntry {
    /// Validate `pattern` and build an entry stamped with the current time
    pub fn new(pattern: &str, list_type: ListType) -> Result<Self> {
        let (domain, wildcard) = validate_pattern(pattern)?;
        Ok(Self {
            domain,
            list_type,
            wildcard,
            added_at: Utc::now(),
        })
    }

    /// Suffix a wildcard entry applies to
    pub fn suffix(&self) -> Option<&str> {
        self.domain.strip_prefix("*.")
    }
}

/// Normalize and validate a list pattern
///
/// Returns the normalized pattern and whether it is a wildcard.
pub fn validate_pattern(raw: &str) -> Result<(String, bool)> {
    let pattern = raw.trim().to_lowercase();
    let pattern = pattern.strip_suffix('.').unwrap_or(&pattern).to_string();

    if pattern.is_empty() {
        return Err(Error::invalid_pattern(raw, "pattern is empty"));
    }
    if pattern.chars().any(char::is_whitespace) {
        return Err(Error::invalid_pattern(raw, "pattern contains whitespace"));
    }
    if pattern.len() > MAX_HOSTNAME_LEN {
        return Err(Error::invalid_pattern(
            raw,
            format!("pattern longer than {MAX_HOSTNAME_LEN} bytes"),
        ));
    }

    let (body, wildcard) = match pattern.strip_prefix("*.") {
        Some(suffix) => {
            if suffix.is_empty() {
                return Err(Error::invalid_pattern(raw, "wildcard has no suffix"));
            }
            if !suffix.contains('.') {
                return Err(Error::invalid_pattern(
                    raw,
                    "wildcard suffix must contain a dot",
                ));
            }
            (suffix, true)
        }
        None => (pattern.as_str(), false),
    };

    if body.contains('*') {
        return Err(Error::invalid_pattern(
            raw,
            "'*' is only allowed as a leading '*.'",
        ));
    }
    if let Some(bad) = body
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_' | '+')))
    {
        return Err(Error::invalid_pattern(
            raw,
            format!("invalid character '{bad}'"),
        ));
    }

    Ok((pattern, wildcard))
}

/// Compiled list of patterns for one list type
///
/// Plain patterns match by substring containment, wildcards match the
/// suffix itself and any subdomain of it.
#[derive(Debug, Clone, Default)]
pub struct DomainList {
    entries: BTreeMap<String, PolicyEntry>,
    plain: BTreeSet<String>,
    wildcards: HashSet<String>,
}

impl DomainList {
    /// Build from entries (later duplicates are ignored)
    pub fn from_entries(entries: impl IntoIterator<Item = PolicyEntry>) -> Self {
        let mut list = Self::default();
        for entry in entries {
            list.insert(entry);
        }
        list
    }

    /// Insert an entry, keeping the original timestamp if already present
    ///
    /// Returns `false` when the pattern was already listed.
    pub(crate) fn insert(&mut self, entry: PolicyEntry) -> bool {
        if self.entries.contains_key(&entry.domain) {
            return false;
        }
        match entry.suffix() {
            Some(suffix) => {
                self.wildcards.insert(suffix.to_string());
            }
            None => {
                self.plain.insert(entry.domain.clone());
            }
        }
        self.entries.insert(entry.domain.clone(), entry);
        true
    }

    /// Remove a pattern, returning whether it was listed
    pub(crate) fn remove(&mut self, pattern: &str) -> bool {
        let Some(entry) = self.entries.remove(pattern) else {
            return false;
        };
        match entry.suffix() {
            Some(suffix) => self.wildcards.remove(suffix),
            None => self.plain.remove(&entry.domain),
        };
        true
    }

    /// Find the first pattern matching an already-normalized domain
    pub fn find_match(&self, domain: &str) -> Option<&str> {
        if domain.is_empty() {
            return None;
        }

        // Walk parents: a.b.example.com -> b.example.com -> example.com -> com
        let mut current = domain;
        loop {
            if let Some(suffix) = self.wildcards.get(current) {
                return self.entries.get(&format!("*.{suffix}")).map(|e| e.domain.as_str());
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => break,
            }
        }

        self.plain
            .iter()
            .find(|pattern| domain.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Whether any pattern matches
    pub fn matches(&self, domain: &str) -> bool {
        self.find_match(domain).is_some()
    }

    /// Whether the exact pattern is listed
    pub fn contains(&self, pattern: &str) -> bool {
        self.entries.contains_key(pattern)
    }

    /// Entries in pattern order
    pub fn entries(&self) -> impl Iterator<Item = &PolicyEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
