//! Policy persistence: TOML store document and plain-text list files

use super::entry::{ListType, PolicyEntry};
use super::profile::Profile;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serializable contents of a policy store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    /// Block and allow list entries
    pub entries: Vec<PolicyEntry>,
    /// All profiles, at most one active
    pub profiles: Vec<Profile>,
}

impl PolicyDocument {
    /// The active profile, if any
    pub fn active_profile(&self) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.is_active)
    }
}

/// Load/save collaborator for the policy store
pub trait PolicyPersistence {
    /// Load entries and profiles
    fn load_policy(&self) -> Result<PolicyDocument>;

    /// Load the profile to apply, if any
    fn load_active_profile(&self) -> Result<Option<Profile>> {
        Ok(self.load_policy()?.active_profile().cloned())
    }

    /// Persist entries and profiles
    fn save_policy(&self, document: &PolicyDocument) -> Result<()>;
}

/// Policy document stored as a TOML file
#[derive(Debug, Clone)]
pub struct TomlPolicyFile {
    path: PathBuf,
}

impl TomlPolicyFile {
    /// Use the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyPersistence for TomlPolicyFile {
    fn load_policy(&self) -> Result<PolicyDocument> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Policy store file missing, starting empty");
            return Ok(PolicyDocument::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::policy_file(self.path.display().to_string(), e.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| Error::policy_file(self.path.display().to_string(), e.to_string()))
    }

    fn save_policy(&self, document: &PolicyDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(document)?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::policy_file(self.path.display().to_string(), e.to_string()))?;

        info!(
            path = %self.path.display(),
            entries = document.entries.len(),
            profiles = document.profiles.len(),
            "Saved policy store"
        );
        Ok(())
    }
}

/// Patterns listed in a plain-text list file
///
/// One domain per line, `#` starts a comment, blank lines are ignored.
pub fn parse_list(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
}

/// Render entries as a list file with a commented header
pub fn render_list<'a>(list_type: ListType, entries: impl IntoIterator<Item = &'a PolicyEntry>) -> String {
    let mut content = String::new();

    content.push_str("# Shield - Domain ");
    content.push_str(match list_type {
        ListType::Block => "Blocklist\n",
        ListType::Allow => "Allowlist\n",
    });
    content.push_str("#\n");
    content.push_str("# One domain per line\n");
    content.push_str("# Plain entries match anywhere in the name (instagram.com blocks api.instagram.com)\n");
    content.push_str("# Use *.example.com to match example.com and its subdomains only\n");
    content.push_str("# Lines starting with # are comments\n");
    content.push_str("#\n\n");

    for entry in entries {
        content.push_str(&entry.domain);
        content.push('\n');
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_list_skips_comments() {
        let content = "# header\n\nexample.com\n  *.ads.net  # trailing\n#disabled.org\n";
        let patterns: Vec<_> = parse_list(content).collect();
        assert_eq!(patterns, vec!["example.com", "*.ads.net"]);
    }

    #[test]
    fn test_render_list_parses_back() {
        let entries = vec![
            PolicyEntry::new("example.com", ListType::Block).unwrap(),
            PolicyEntry::new("*.ads.net", ListType::Block).unwrap(),
        ];
        let content = render_list(ListType::Block, &entries);
        assert!(content.starts_with("# Shield - Domain Blocklist"));

        let patterns: Vec<_> = parse_list(&content).collect();
        assert_eq!(patterns, vec!["example.com", "*.ads.net"]);
    }

    #[test]
    fn test_toml_file_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let file = TomlPolicyFile::new(dir.path().join("policy.toml"));
        assert_eq!(file.load_policy().unwrap(), PolicyDocument::default());
        assert!(file.load_active_profile().unwrap().is_none());
    }

    #[test]
    fn test_toml_file_save_load() {
        let dir = TempDir::new().unwrap();
        let file = TomlPolicyFile::new(dir.path().join("nested").join("policy.toml"));

        let document = PolicyDocument {
            entries: vec![PolicyEntry::new("*.casino.example", ListType::Block).unwrap()],
            profiles: vec![
                Profile::new(1, "Ana").activated(),
                Profile::new(2, "Leo").with_schedule(1320, 360),
            ],
        };
        file.save_policy(&document).unwrap();

        let loaded = file.load_policy().unwrap();
        assert_eq!(loaded, document);
        assert_eq!(file.load_active_profile().unwrap().unwrap().name, "Ana");
    }

    #[test]
    fn test_toml_file_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "entries = 5").unwrap();

        let err = TomlPolicyFile::new(&path).load_policy().unwrap_err();
        assert!(matches!(err, Error::PolicyFile { .. }));
    }
}
