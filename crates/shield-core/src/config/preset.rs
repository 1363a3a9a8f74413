//! Age-group presets
//!
//! Each preset fills the `[profile]` section with sensible defaults for a
//! child's age.

use super::Config;
use crate::error::{Error, Result};
use crate::policy::{BlockFlags, Profile, RestrictionLevel};
use serde::{Deserialize, Serialize};

/// Predefined age-group configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Ages 0-7: strict, everything blocked, 08:00-19:00
    YoungChild,
    /// Ages 8-12: adult, gambling and games blocked, 08:00-21:00
    Child,
    /// Ages 13-17: adult and gambling blocked, no schedule
    Teen,
}

impl Preset {
    /// All presets
    pub const ALL: [Preset; 3] = [Preset::YoungChild, Preset::Child, Preset::Teen];

    /// Convert preset to full configuration
    pub fn into_config(self) -> Config {
        let mut config = Config {
            preset: Some(self),
            ..Config::default()
        };
        config.general.name = self.name().to_string();
        config.profile = Some(self.profile());
        config
    }

    /// Profile applied by this preset
    pub fn profile(self) -> Profile {
        let mut profile = Profile::new(1, self.display_name()).activated();

        match self {
            Preset::YoungChild => {
                profile.restriction_level = RestrictionLevel::Strict;
                profile.block_flags = BlockFlags::all();
                profile = profile.with_schedule(480, 1140);
            }
            Preset::Child => {
                profile.restriction_level = RestrictionLevel::Moderate;
                profile.block_flags = BlockFlags {
                    gaming: true,
                    ..BlockFlags::default()
                };
                profile = profile.with_schedule(480, 1260);
            }
            Preset::Teen => {
                profile.restriction_level = RestrictionLevel::Mild;
                profile.block_flags = BlockFlags::default();
            }
        }

        profile
    }

    /// Get preset name
    pub fn name(&self) -> &'static str {
        match self {
            Preset::YoungChild => "young-child",
            Preset::Child => "child",
            Preset::Teen => "teen",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Preset::YoungChild => "Young child",
            Preset::Child => "Child",
            Preset::Teen => "Teen",
        }
    }

    /// Get preset description
    pub fn description(&self) -> &'static str {
        match self {
            Preset::YoungChild => "Ages 0-7: strict filtering, all categories, 08:00-19:00",
            Preset::Child => "Ages 8-12: adult, gambling and gaming blocked, 08:00-21:00",
            Preset::Teen => "Ages 13-17: adult and gambling blocked, no schedule",
        }
    }

    /// Parse preset from name string
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "young-child" | "youngchild" | "0-7" => Ok(Preset::YoungChild),
            "child" | "8-12" => Ok(Preset::Child),
            "teen" | "13-17" => Ok(Preset::Teen),
            _ => Err(Error::config_value("preset", format!("Unknown preset: {s}"))),
        }
    }
}
