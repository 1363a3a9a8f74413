//! Domain classification
//!
//! A pure function of (domain, [`PolicySnapshot`]). Rules are evaluated in a
//! fixed order and the first match decides:
//!
//! 1. Allowlist (always wins)
//! 2. Custom blocklist
//! 3. Category rules enabled in the snapshot
//! 4. Suspicious keywords
//! 5. Phishing-shaped names
//! 6. Allowed by default

mod heuristics;
mod reputation;

pub use heuristics::{phishing_pattern, suspicious_keyword, SUSPICIOUS_KEYWORDS};
pub use reputation::{LocalReputation, ReputationSource, ReputationVerdict};

use crate::policy::{ListType, PolicySnapshot};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Block category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    /// Adult content
    Adult,
    /// Violence and gore
    Violence,
    /// Malware and scam downloads
    Malware,
    /// Phishing
    Phishing,
    /// Gambling
    Gambling,
    /// Social networks
    SocialMedia,
    /// Online games
    Gaming,
    /// Video streaming
    Streaming,
    /// Suspicious keyword heuristic
    Heuristic,
    /// Anything else, e.g. the custom blocklist or the schedule
    Custom(String),
}

impl Category {
    /// Evaluation order of category rules
    pub const RULE_ORDER: [Category; 8] = [
        Category::Adult,
        Category::Violence,
        Category::Malware,
        Category::Phishing,
        Category::Gambling,
        Category::SocialMedia,
        Category::Gaming,
        Category::Streaming,
    ];

    /// Category reported for custom blocklist hits
    pub fn custom() -> Self {
        Category::Custom("Custom".to_string())
    }

    /// Category reported for out-of-schedule blocks
    pub fn schedule() -> Self {
        Category::Custom("Schedule".to_string())
    }

    /// Position in [`Category::RULE_ORDER`], `None` for non-rule categories
    pub fn rule_rank(&self) -> Option<usize> {
        Self::RULE_ORDER.iter().position(|c| c == self)
    }

    /// Threat level assigned when a rule of this category matches
    pub fn default_threat(&self) -> ThreatLevel {
        match self {
            Category::Malware => ThreatLevel::Critical,
            Category::Adult | Category::Violence | Category::Phishing => ThreatLevel::High,
            Category::Gambling | Category::Heuristic | Category::Custom(_) => ThreatLevel::Medium,
            Category::SocialMedia | Category::Gaming | Category::Streaming => ThreatLevel::Low,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Adult => write!(f, "Adult"),
            Category::Violence => write!(f, "Violence"),
            Category::Malware => write!(f, "Malware"),
            Category::Phishing => write!(f, "Phishing"),
            Category::Gambling => write!(f, "Gambling"),
            Category::SocialMedia => write!(f, "SocialMedia"),
            Category::Gaming => write!(f, "Gaming"),
            Category::Streaming => write!(f, "Streaming"),
            Category::Heuristic => write!(f, "Heuristic"),
            Category::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for Category {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_lowercase().replace(['_', '-', ' '], "").as_str() {
            "adult" => Category::Adult,
            "violence" => Category::Violence,
            "malware" => Category::Malware,
            "phishing" => Category::Phishing,
            "gambling" => Category::Gambling,
            "socialmedia" | "social" => Category::SocialMedia,
            "gaming" => Category::Gaming,
            "streaming" => Category::Streaming,
            "heuristic" => Category::Heuristic,
            _ => Category::Custom(s.trim().to_string()),
        };
        Ok(category)
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(category) => category,
            Err(never) => match never {},
        }
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.to_string()
    }
}

/// Severity attached to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    /// Low
    #[default]
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl ThreatLevel {
    /// Integer form used in reports (1..=4)
    pub fn as_int(self) -> u8 {
        match self {
            ThreatLevel::Low => 1,
            ThreatLevel::Medium => 2,
            ThreatLevel::High => 3,
            ThreatLevel::Critical => 4,
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatLevel::Low => write!(f, "low"),
            ThreatLevel::Medium => write!(f, "medium"),
            ThreatLevel::High => write!(f, "high"),
            ThreatLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Which rule decided a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Allowlist entry
    Allowlist,
    /// Custom blocklist entry
    Blocklist,
    /// Category rule set
    CategoryRule,
    /// Suspicious keyword heuristic
    Keyword,
    /// Phishing-pattern heuristic
    PhishingPattern,
    /// External reputation signal
    Reputation,
    /// Active profile's allowed hours
    Schedule,
    /// Nothing matched
    Default,
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerdictSource::Allowlist => "allowlist",
            VerdictSource::Blocklist => "blocklist",
            VerdictSource::CategoryRule => "category rule",
            VerdictSource::Keyword => "suspicious keyword",
            VerdictSource::PhishingPattern => "phishing pattern",
            VerdictSource::Reputation => "reputation",
            VerdictSource::Schedule => "schedule",
            VerdictSource::Default => "default",
        };
        f.write_str(name)
    }
}

/// Outcome of classifying one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Whether the domain is blocked
    pub is_blocked: bool,
    /// Matched category
    pub category: Option<Category>,
    /// Severity
    pub threat_level: ThreatLevel,
    /// Pattern, keyword or reason that matched
    pub matched_rule: Option<String>,
    /// Rule that decided
    pub source: VerdictSource,
}

impl ClassificationResult {
    fn allowed(source: VerdictSource, matched_rule: Option<String>) -> Self {
        Self {
            is_blocked: false,
            category: None,
            threat_level: ThreatLevel::Low,
            matched_rule,
            source,
        }
    }

    /// Block issued outside the allowed window `HH:MM-HH:MM`
    pub fn out_of_schedule(window: &str) -> Self {
        Self::blocked(
            Category::schedule(),
            ThreatLevel::Low,
            format!("schedule {window}"),
            VerdictSource::Schedule,
        )
    }

    fn blocked(
        category: Category,
        threat_level: ThreatLevel,
        matched_rule: impl Into<String>,
        source: VerdictSource,
    ) -> Self {
        Self {
            is_blocked: true,
            category: Some(category),
            threat_level,
            matched_rule: Some(matched_rule.into()),
            source,
        }
    }
}

/// Canonical form of a queried name
///
/// Trims, lowercases, strips one trailing dot and a leading `www.`.
pub fn normalize(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    let domain = domain.strip_suffix('.').unwrap_or(&domain);
    domain.strip_prefix("www.").unwrap_or(domain).to_string()
}

/// Classify a domain against a policy snapshot
pub fn classify(domain: &str, policy: &PolicySnapshot) -> ClassificationResult {
    let domain = normalize(domain);
    let result = evaluate(&domain, policy);
    trace!(
        domain = %domain,
        blocked = result.is_blocked,
        source = %result.source,
        "Classified domain"
    );
    result
}

fn evaluate(domain: &str, policy: &PolicySnapshot) -> ClassificationResult {
    if domain.is_empty() {
        return ClassificationResult::allowed(VerdictSource::Default, None);
    }

    if let Some(pattern) = policy.list(ListType::Allow).find_match(domain) {
        return ClassificationResult::allowed(VerdictSource::Allowlist, Some(pattern.to_string()));
    }

    if let Some(pattern) = policy.list(ListType::Block).find_match(domain) {
        return ClassificationResult::blocked(
            Category::custom(),
            ThreatLevel::Medium,
            pattern,
            VerdictSource::Blocklist,
        );
    }

    for rule in policy.rules() {
        if !policy.is_enabled(&rule.category) {
            continue;
        }
        if let Some(needle) = rule.find_match(domain) {
            return ClassificationResult::blocked(
                rule.category.clone(),
                rule.category.default_threat(),
                needle,
                VerdictSource::CategoryRule,
            );
        }
    }

    if let Some(keyword) = suspicious_keyword(domain) {
        return ClassificationResult::blocked(
            Category::Heuristic,
            ThreatLevel::Medium,
            keyword,
            VerdictSource::Keyword,
        );
    }

    if let Some(reason) = phishing_pattern(domain) {
        return ClassificationResult::blocked(
            Category::Phishing,
            ThreatLevel::High,
            reason,
            VerdictSource::PhishingPattern,
        );
    }

    ClassificationResult::allowed(VerdictSource::Default, None)
}

/// Classify, then fold in external reputation signals
///
/// Any malicious signal blocks with [`ThreatLevel::Critical`] unless the
/// domain is allowlisted.
pub fn classify_with_signals(
    domain: &str,
    policy: &PolicySnapshot,
    signals: &[ReputationVerdict],
) -> ClassificationResult {
    let mut result = classify(domain, policy);
    if result.source == VerdictSource::Allowlist {
        return result;
    }

    let Some(flagged) = signals.iter().find(|s| s.malicious) else {
        return result;
    };

    if !result.is_blocked {
        result.is_blocked = true;
        result.category = Some(Category::Malware);
        result.matched_rule = Some(format!("reputation:{}", flagged.source));
        result.source = VerdictSource::Reputation;
    }
    result.threat_level = ThreatLevel::Critical;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyStore, Profile, RestrictionLevel};

    fn store_with(block: &[&str], allow: &[&str]) -> PolicyStore {
        let store = PolicyStore::new();
        store.add_entries(block.iter().copied(), ListType::Block).unwrap();
        store.add_entries(allow.iter().copied(), ListType::Allow).unwrap();
        store
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  WWW.Example.COM. "), "example.com");
        assert_eq!(normalize("www.www.example.com"), "www.example.com");
        assert_eq!(normalize("."), "");
    }

    #[test]
    fn test_empty_domain_allowed() {
        let store = PolicyStore::new();
        let result = classify("   ", &store.snapshot());
        assert!(!result.is_blocked);
        assert_eq!(result.source, VerdictSource::Default);
    }

    #[test]
    fn test_allowlist_beats_blocklist() {
        let store = store_with(&["example.com"], &["example.com"]);
        let result = classify("example.com", &store.snapshot());
        assert!(!result.is_blocked);
        assert_eq!(result.source, VerdictSource::Allowlist);
    }

    #[test]
    fn test_allowlist_beats_category_rules() {
        let store = store_with(&[], &["*.pornhub.com"]);
        let result = classify("www.pornhub.com", &store.snapshot());
        assert!(!result.is_blocked);
        assert_eq!(result.matched_rule.as_deref(), Some("*.pornhub.com"));
    }

    #[test]
    fn test_custom_blocklist() {
        let store = store_with(&["*.instagram.com"], &[]);
        let result = classify("api.instagram.com", &store.snapshot());
        assert!(result.is_blocked);
        assert_eq!(result.category, Some(Category::custom()));
        assert_eq!(result.threat_level, ThreatLevel::Medium);
        assert_eq!(result.source, VerdictSource::Blocklist);

        let result = classify("instagramclone.com", &store.snapshot());
        assert_ne!(result.source, VerdictSource::Blocklist);
    }

    #[test]
    fn test_category_rule_adult() {
        let store = PolicyStore::new();
        let result = classify("pornhub.com", &store.snapshot());
        assert!(result.is_blocked);
        assert_eq!(result.category, Some(Category::Adult));
        assert_eq!(result.threat_level, ThreatLevel::High);
        assert_eq!(result.source, VerdictSource::CategoryRule);
    }

    #[test]
    fn test_category_disabled_falls_through() {
        let store = PolicyStore::new();
        // Social media is off by default
        let result = classify("tiktok.com", &store.snapshot());
        assert!(!result.is_blocked);

        let mut profile = Profile::new(1, "kid").activated();
        profile.restriction_level = RestrictionLevel::Strict;
        store.upsert_profile(profile).unwrap();

        let result = classify("tiktok.com", &store.snapshot());
        assert_eq!(result.category, Some(Category::SocialMedia));
        assert_eq!(result.threat_level, ThreatLevel::Low);
    }

    #[test]
    fn test_malware_is_critical() {
        let store = PolicyStore::new();
        let result = classify("free-robux.com", &store.snapshot());
        assert_eq!(result.category, Some(Category::Malware));
        assert_eq!(result.threat_level, ThreatLevel::Critical);
    }

    #[test]
    fn test_suspicious_keyword() {
        let store = PolicyStore::new();
        let result = classify("keygen-tools.net", &store.snapshot());
        assert!(result.is_blocked);
        assert_eq!(result.category, Some(Category::Heuristic));
        assert_eq!(result.source, VerdictSource::Keyword);
        assert_eq!(result.matched_rule.as_deref(), Some("keygen"));
    }

    #[test]
    fn test_phishing_pattern() {
        let store = PolicyStore::new();
        let result = classify("secure-login-bank-verify-now.com", &store.snapshot());
        assert!(result.is_blocked);
        assert_eq!(result.category, Some(Category::Phishing));
        assert_eq!(result.threat_level, ThreatLevel::High);
        assert_eq!(result.source, VerdictSource::PhishingPattern);
    }

    #[test]
    fn test_default_allowed() {
        let store = PolicyStore::new();
        let result = classify("wikipedia.org", &store.snapshot());
        assert!(!result.is_blocked);
        assert_eq!(result.threat_level, ThreatLevel::Low);
        assert_eq!(result.source, VerdictSource::Default);
        assert!(result.category.is_none());
    }

    #[test]
    fn test_reputation_escalates() {
        let store = PolicyStore::new();
        let bad = [ReputationVerdict::malicious("feed")];

        let result = classify_with_signals("wikipedia.org", &store.snapshot(), &bad);
        assert!(result.is_blocked);
        assert_eq!(result.threat_level, ThreatLevel::Critical);
        assert_eq!(result.category, Some(Category::Malware));
        assert_eq!(result.source, VerdictSource::Reputation);

        let result = classify_with_signals("pornhub.com", &store.snapshot(), &bad);
        assert_eq!(result.category, Some(Category::Adult));
        assert_eq!(result.threat_level, ThreatLevel::Critical);
        assert_eq!(result.source, VerdictSource::CategoryRule);
    }

    #[test]
    fn test_reputation_never_overrides_allowlist() {
        let store = store_with(&[], &["school.example"]);
        let bad = [ReputationVerdict::malicious("feed")];
        let result = classify_with_signals("school.example", &store.snapshot(), &bad);
        assert!(!result.is_blocked);
    }

    #[test]
    fn test_category_string_roundtrip() {
        for category in Category::RULE_ORDER {
            let parsed: Category = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert_eq!("Custom".parse::<Category>().unwrap(), Category::custom());
        assert_eq!("social_media".parse::<Category>().unwrap(), Category::SocialMedia);
    }

    #[test]
    fn test_threat_level_ordering() {
        assert!(ThreatLevel::Critical > ThreatLevel::High);
        assert_eq!(ThreatLevel::Low.as_int(), 1);
        assert_eq!(ThreatLevel::Critical.as_int(), 4);
    }

    #[test]
    fn test_out_of_schedule_verdict() {
        let result = ClassificationResult::out_of_schedule("08:00-21:00");
        assert!(result.is_blocked);
        assert_eq!(result.category, Some(Category::schedule()));
        assert_eq!(result.threat_level, ThreatLevel::Low);
        assert_eq!(result.matched_rule.as_deref(), Some("schedule 08:00-21:00"));
        assert_eq!(result.source.to_string(), "schedule");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn allowlisted_domain_never_blocked(
                label in "[a-z]{1,12}",
                tld in "(com|net|org)",
                sub in proptest::option::of("[a-z0-9]{1,8}"),
            ) {
                let base = format!("{label}.{tld}");
                let store = PolicyStore::new();
                store.add_entry(&format!("*.{base}"), ListType::Allow).unwrap();
                store.add_entry(&base, ListType::Block).unwrap();

                let domain = match sub {
                    Some(sub) => format!("{sub}.{base}"),
                    None => base,
                };
                let signals = [ReputationVerdict::malicious("test")];
                let result = classify_with_signals(&domain, &store.snapshot(), &signals);
                prop_assert!(!result.is_blocked);
            }

            #[test]
            fn classify_never_panics(domain in "\\PC{0,300}") {
                let store = PolicyStore::new();
                let _ = classify(&domain, &store.snapshot());
            }
        }
    }
}
