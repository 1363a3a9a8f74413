//! Child profiles: restriction level, allowed hours and category flags

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Last minute of the day (23:59)
pub const LAST_MINUTE: u16 = 1439;

/// Overall restriction level of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionLevel {
    /// Forces adult, gambling and social media blocking
    Strict,
    /// Block flags decide
    #[default]
    Moderate,
    /// Block flags decide
    Mild,
}

impl fmt::Display for RestrictionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestrictionLevel::Strict => write!(f, "strict"),
            RestrictionLevel::Moderate => write!(f, "moderate"),
            RestrictionLevel::Mild => write!(f, "mild"),
        }
    }
}

impl FromStr for RestrictionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "strict" | "high" => Ok(RestrictionLevel::Strict),
            "moderate" | "medium" => Ok(RestrictionLevel::Moderate),
            "mild" | "low" => Ok(RestrictionLevel::Mild),
            other => Err(Error::config_value(
                "restriction_level",
                format!("unknown level '{other}' (expected strict, moderate or mild)"),
            )),
        }
    }
}

/// Optional categories a profile can turn on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockFlags {
    /// Adult content
    pub adult: bool,
    /// Gambling and betting
    pub gambling: bool,
    /// Social networks
    pub social_media: bool,
    /// Online games
    pub gaming: bool,
    /// Video streaming
    pub streaming: bool,
}

impl Default for BlockFlags {
    fn default() -> Self {
        Self {
            adult: true,
            gambling: true,
            social_media: false,
            gaming: false,
            streaming: false,
        }
    }
}

impl BlockFlags {
    /// Every flag set
    pub fn all() -> Self {
        Self {
            adult: true,
            gambling: true,
            social_media: true,
            gaming: true,
            streaming: true,
        }
    }
}

/// A child profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Unique id
    pub id: u32,
    /// Display name
    pub name: String,
    /// Restriction level
    pub restriction_level: RestrictionLevel,
    /// Whether allowed hours are enforced
    pub schedule_enabled: bool,
    /// Start of allowed hours, minutes of day
    pub allowed_start: u16,
    /// End of allowed hours, minutes of day (inclusive)
    pub allowed_end: u16,
    /// Optional category flags
    pub block_flags: BlockFlags,
    /// Whether this is the applied profile
    pub is_active: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Default".to_string(),
            restriction_level: RestrictionLevel::default(),
            schedule_enabled: false,
            allowed_start: 480,
            allowed_end: 1260,
            block_flags: BlockFlags::default(),
            is_active: false,
        }
    }
}

impl Profile {
    /// Create a profile with default settings
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Enable allowed hours `start..=end` (minutes of day)
    #[must_use]
    pub fn with_schedule(mut self, start: u16, end: u16) -> Self {
        self.schedule_enabled = true;
        self.allowed_start = start;
        self.allowed_end = end;
        self
    }

    /// Mark as the active profile
    #[must_use]
    pub fn activated(mut self) -> Self {
        self.is_active = true;
        self
    }

    /// Check invariants enforced at the store boundary
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config_value("profile.name", "name cannot be empty"));
        }
        if self.allowed_start > LAST_MINUTE || self.allowed_end > LAST_MINUTE {
            return Err(Error::InvalidSchedule {
                start: self.allowed_start,
                end: self.allowed_end,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = Profile::default();
        assert_eq!(profile.allowed_start, 480);
        assert_eq!(profile.allowed_end, 1260);
        assert!(!profile.schedule_enabled);
        assert!(profile.block_flags.adult);
        assert!(profile.block_flags.gambling);
        assert!(!profile.block_flags.social_media);
        assert_eq!(profile.restriction_level, RestrictionLevel::Moderate);
    }

    #[test]
    fn test_validate_schedule_bounds() {
        assert!(Profile::new(1, "kid").with_schedule(0, 1439).validate().is_ok());

        let err = Profile::new(1, "kid").with_schedule(480, 1440).validate();
        assert!(matches!(
            err,
            Err(Error::InvalidSchedule {
                start: 480,
                end: 1440
            })
        ));
    }

    #[test]
    fn test_validate_empty_name() {
        assert!(Profile::new(1, "  ").validate().is_err());
    }

    #[test]
    fn test_restriction_level_parse() {
        assert_eq!("HIGH".parse::<RestrictionLevel>().unwrap(), RestrictionLevel::Strict);
        assert_eq!("medium".parse::<RestrictionLevel>().unwrap(), RestrictionLevel::Moderate);
        assert!("extreme".parse::<RestrictionLevel>().is_err());
    }

    #[test]
    fn test_profile_toml_partial() {
        let profile: Profile = toml::from_str(
            r#"
            id = 7
            name = "Ana"
            restriction_level = "strict"

            [block_flags]
            gaming = true
            "#,
        )
        .unwrap();

        assert_eq!(profile.id, 7);
        assert_eq!(profile.restriction_level, RestrictionLevel::Strict);
        assert!(profile.block_flags.gaming);
        assert!(profile.block_flags.adult);
        assert_eq!(profile.allowed_end, 1260);
    }
}
