//! Category rule sets and the curated default lists

use super::profile::{Profile, RestrictionLevel};
use crate::classifier::Category;
use bitflags::bitflags;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Keyword and domain sets for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Category assigned on match
    pub category: Category,
    /// Substrings that mark a domain
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Curated domains, also matched as substrings
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

impl CategoryRule {
    /// Build a rule from string slices
    pub fn new(category: Category, keywords: &[&str], domains: &[&str]) -> Self {
        Self {
            category,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    /// First domain or keyword contained in `domain`
    pub fn find_match(&self, domain: &str) -> Option<&str> {
        self.domains
            .iter()
            .chain(self.keywords.iter())
            .find(|needle| domain.contains(needle.as_str()))
            .map(String::as_str)
    }
}

const ADULT_DOMAINS: &[&str] = &[
    "pornhub.com",
    "xvideos.com",
    "xnxx.com",
    "redtube.com",
    "youporn.com",
    "tube8.com",
    "spankbang.com",
    "xhamster.com",
    "chaturbate.com",
    "stripchat.com",
    "livejasmin.com",
    "onlyfans.com",
    "pornhd.com",
    "beeg.com",
    "sex.com",
    "eporner.com",
    "tnaflix.com",
    "drtuber.com",
    "txxx.com",
    "motherless.com",
    "4chan.org",
];
const ADULT_KEYWORDS: &[&str] = &["porn", "xxx", "erotic", "hentai", "nude", "escort"];

const VIOLENCE_DOMAINS: &[&str] = &[
    "bestgore.com",
    "goregrish.com",
    "theync.com",
    "kaotic.com",
    "documentingreality.com",
];

const MALWARE_DOMAINS: &[&str] = &[
    "free-minecraft.com",
    "free-robux.com",
    "download-fortnite-free.com",
    "win-iphone-now.com",
    "your-prize-here.com",
];

const GAMBLING_KEYWORDS: &[&str] = &[
    "casino", "gambling", "betting", "poker", "slots", "apuestas", "bet365", "bwin",
];

const SOCIAL_DOMAINS: &[&str] = &[
    "tiktok.com",
    "instagram.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "snapchat.com",
    "discord.com",
    "reddit.com",
];

static DEFAULT_RULES: Lazy<Arc<Vec<CategoryRule>>> = Lazy::new(|| {
    Arc::new(vec![
        CategoryRule::new(Category::Adult, ADULT_KEYWORDS, ADULT_DOMAINS),
        CategoryRule::new(Category::Violence, &["gore"], VIOLENCE_DOMAINS),
        CategoryRule::new(
            Category::Malware,
            &["malware", "ransomware", "trojan"],
            MALWARE_DOMAINS,
        ),
        CategoryRule::new(Category::Phishing, &["phishing"], &[]),
        CategoryRule::new(Category::Gambling, GAMBLING_KEYWORDS, &[]),
        CategoryRule::new(
            Category::SocialMedia,
            &["tiktok", "instagram", "facebook", "snapchat"],
            SOCIAL_DOMAINS,
        ),
        CategoryRule::new(
            Category::Gaming,
            &["roblox", "fortnite", "minecraft", "steampowered", "epicgames"],
            &[],
        ),
        CategoryRule::new(
            Category::Streaming,
            &["netflix", "disneyplus", "hbomax", "primevideo", "twitch.tv", "hulu"],
            &[],
        ),
    ])
});

/// Shared handle to the built-in rule sets
pub fn default_rules() -> Arc<Vec<CategoryRule>> {
    Arc::clone(&DEFAULT_RULES)
}

/// Order rules by category evaluation rank, dropping unranked categories
pub(crate) fn order_rules(mut rules: Vec<CategoryRule>) -> Vec<CategoryRule> {
    rules.retain(|r| r.category.rule_rank().is_some());
    rules.sort_by_key(|r| r.category.rule_rank());
    rules
}

bitflags! {
    /// Categories whose rules are evaluated
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CategorySet: u16 {
        /// Adult content
        const ADULT = 1 << 0;
        /// Violence and gore
        const VIOLENCE = 1 << 1;
        /// Malware and scam downloads
        const MALWARE = 1 << 2;
        /// Phishing
        const PHISHING = 1 << 3;
        /// Gambling
        const GAMBLING = 1 << 4;
        /// Social networks
        const SOCIAL_MEDIA = 1 << 5;
        /// Online games
        const GAMING = 1 << 6;
        /// Video streaming
        const STREAMING = 1 << 7;
    }
}

impl CategorySet {
    /// Categories enabled regardless of profile
    pub const ALWAYS_ON: Self = Self::VIOLENCE.union(Self::MALWARE).union(Self::PHISHING);

    /// Flag for a rule category, `None` for heuristic and custom ones
    pub fn flag(category: &Category) -> Option<Self> {
        match category {
            Category::Adult => Some(Self::ADULT),
            Category::Violence => Some(Self::VIOLENCE),
            Category::Malware => Some(Self::MALWARE),
            Category::Phishing => Some(Self::PHISHING),
            Category::Gambling => Some(Self::GAMBLING),
            Category::SocialMedia => Some(Self::SOCIAL_MEDIA),
            Category::Gaming => Some(Self::GAMING),
            Category::Streaming => Some(Self::STREAMING),
            Category::Heuristic | Category::Custom(_) => None,
        }
    }

    /// Enabled categories for an optional active profile
    pub fn for_profile(profile: Option<&Profile>) -> Self {
        let flags = profile.map(|p| p.block_flags).unwrap_or_default();
        let mut set = Self::ALWAYS_ON;
        set.set(Self::ADULT, flags.adult);
        set.set(Self::GAMBLING, flags.gambling);
        set.set(Self::SOCIAL_MEDIA, flags.social_media);
        set.set(Self::GAMING, flags.gaming);
        set.set(Self::STREAMING, flags.streaming);

        if profile.is_some_and(|p| p.restriction_level == RestrictionLevel::Strict) {
            set |= Self::ADULT | Self::GAMBLING | Self::SOCIAL_MEDIA;
        }
        set
    }

    /// Whether rules for `category` are evaluated
    pub fn enables(self, category: &Category) -> bool {
        Self::flag(category).is_some_and(|flag| self.contains(flag))
    }
}
