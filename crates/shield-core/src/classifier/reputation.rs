//! External reputation signals

use serde::{Deserialize, Serialize};

/// One source's opinion about a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationVerdict {
    /// Name of the reporting source
    pub source: String,
    /// Whether the source flags the domain
    pub malicious: bool,
}

impl ReputationVerdict {
    /// A clean verdict
    pub fn clean(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            malicious: false,
        }
    }

    /// A malicious verdict
    pub fn malicious(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            malicious: true,
        }
    }
}

/// A reputation lookup consulted on the query path
///
/// Implementations must answer synchronously and cheaply.
pub trait ReputationSource: Send + Sync {
    /// Source name used in verdicts
    fn name(&self) -> &str;

    /// Check a normalized domain
    fn check(&self, domain: &str) -> ReputationVerdict;
}

/// Offline pattern list of known-bad substrings
#[derive(Debug, Clone)]
pub struct LocalReputation {
    patterns: Vec<String>,
}

const LOCAL_PATTERNS: &[&str] = &[
    "phishing",
    "hack",
    "crack",
    "keygen",
    "malware",
    "virus",
    "trojan",
    "ransomware",
    "scam",
    "warez",
    "torrent",
    "pirate",
];

impl Default for LocalReputation {
    fn default() -> Self {
        Self::with_patterns(LOCAL_PATTERNS.iter().copied())
    }
}

impl LocalReputation {
    /// Use a custom pattern list
    pub fn with_patterns<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

impl ReputationSource for LocalReputation {
    fn name(&self) -> &str {
        "local"
    }

    fn check(&self, domain: &str) -> ReputationVerdict {
        let malicious = self.patterns.iter().any(|p| domain.contains(p.as_str()));
        ReputationVerdict {
            source: self.name().to_string(),
            malicious,
        }
    }
}
