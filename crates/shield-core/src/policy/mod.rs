//! Policy store
//!
//! Block/allow lists, category rule sets and child profiles. Readers take an
//! immutable [`PolicySnapshot`]; every mutation builds a new snapshot and swaps
//! it in, so an evaluation in progress never sees a half-applied update.
//!
//! List patterns:
//! - Plain: `instagram.com` (matches any domain containing it)
//! - Wildcard: `*.instagram.com` (matches `instagram.com` and its subdomains)

mod category;
mod entry;
mod file;
mod profile;

pub use category::{default_rules, CategoryRule, CategorySet};
pub use entry::{validate_pattern, DomainList, ListType, PolicyEntry};
pub use file::{parse_list, render_list, PolicyDocument, PolicyPersistence, TomlPolicyFile};
pub use profile::{BlockFlags, Profile, RestrictionLevel, LAST_MINUTE};

use crate::classifier::Category;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Immutable point-in-time view of the policy
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    version: u64,
    blocklist: DomainList,
    allowlist: DomainList,
    rules: Arc<Vec<CategoryRule>>,
    profiles: BTreeMap<u32, Profile>,
    enabled: CategorySet,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            blocklist: DomainList::default(),
            allowlist: DomainList::default(),
            rules: default_rules(),
            profiles: BTreeMap::new(),
            enabled: CategorySet::for_profile(None),
        }
    }
}

impl PolicySnapshot {
    /// Monotonic version, bumped by every store mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Compiled list for `list_type`
    pub fn list(&self, list_type: ListType) -> &DomainList {
        match list_type {
            ListType::Block => &self.blocklist,
            ListType::Allow => &self.allowlist,
        }
    }

    fn list_mut(&mut self, list_type: ListType) -> &mut DomainList {
        match list_type {
            ListType::Block => &mut self.blocklist,
            ListType::Allow => &mut self.allowlist,
        }
    }

    /// Category rules in evaluation order
    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// All profiles ordered by id
    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// The applied profile, if any
    pub fn active_profile(&self) -> Option<&Profile> {
        self.profiles.values().find(|p| p.is_active)
    }

    /// Categories whose rules are evaluated
    pub fn enabled_categories(&self) -> CategorySet {
        self.enabled
    }

    /// Whether rules for `category` are evaluated
    pub fn is_enabled(&self, category: &Category) -> bool {
        self.enabled.enables(category)
    }

    fn refresh(&mut self) {
        self.enabled = CategorySet::for_profile(self.active_profile());
    }

    fn put_profile(&mut self, profile: Profile) {
        if profile.is_active {
            for other in self.profiles.values_mut() {
                other.is_active = false;
            }
        }
        self.profiles.insert(profile.id, profile);
    }

    fn to_document(&self) -> PolicyDocument {
        PolicyDocument {
            entries: self
                .blocklist
                .entries()
                .chain(self.allowlist.entries())
                .cloned()
                .collect(),
            profiles: self.profiles.values().cloned().collect(),
        }
    }
}

#[derive(Debug)]
struct TrackedList {
    path: PathBuf,
    list_type: ListType,
    modified: Option<SystemTime>,
    patterns: HashSet<String>,
}

/// Shared, read-mostly policy store
///
/// Thread-safe; mutations are serialized and published as new snapshots.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
    writer: Mutex<()>,
    list_files: Mutex<Vec<TrackedList>>,
}

impl PolicyStore {
    /// Create an empty store with the default category rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Current snapshot version
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    fn update<T>(&self, apply: impl FnOnce(&mut PolicySnapshot) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock();

        let mut next = PolicySnapshot::clone(&self.current.read());
        let out = apply(&mut next)?;
        next.version += 1;
        next.refresh();

        *self.current.write() = Arc::new(next);
        Ok(out)
    }

    /// Add a pattern to a list
    ///
    /// Returns `false` if the pattern was already listed; its original
    /// timestamp is kept.
    pub fn add_entry(&self, pattern: &str, list_type: ListType) -> Result<bool> {
        let entry = PolicyEntry::new(pattern, list_type)?;
        let domain = entry.domain.clone();
        let added = self.update(|snap| Ok(snap.list_mut(list_type).insert(entry)))?;
        if added {
            debug!(domain = %domain, list = %list_type, "Added policy entry");
        }
        Ok(added)
    }

    /// Add several patterns, all validated before any is applied
    pub fn add_entries<'a>(
        &self,
        patterns: impl IntoIterator<Item = &'a str>,
        list_type: ListType,
    ) -> Result<usize> {
        let entries = patterns
            .into_iter()
            .map(|p| PolicyEntry::new(p, list_type))
            .collect::<Result<Vec<_>>>()?;

        self.update(|snap| {
            let list = snap.list_mut(list_type);
            Ok(entries.into_iter().filter(|e| list.insert(e.clone())).count())
        })
    }

    /// Remove a pattern, returning whether it was listed
    pub fn remove_entry(&self, pattern: &str, list_type: ListType) -> bool {
        let Ok((domain, _)) = validate_pattern(pattern) else {
            return false;
        };
        if !self.snapshot().list(list_type).contains(&domain) {
            return false;
        }
        self.update(|snap| Ok(snap.list_mut(list_type).remove(&domain)))
            .unwrap_or(false)
    }

    /// Remove every entry of a list
    pub fn clear(&self, list_type: ListType) {
        let cleared = self.update(|snap| {
            let count = snap.list(list_type).len();
            *snap.list_mut(list_type) = DomainList::default();
            Ok(count)
        });
        if let Ok(count) = cleared {
            info!(list = %list_type, count, "Cleared policy list");
        }
    }

    /// Entries of a list in pattern order
    pub fn entries(&self, list_type: ListType) -> Vec<PolicyEntry> {
        self.snapshot().list(list_type).entries().cloned().collect()
    }

    /// Insert or replace a profile
    ///
    /// An active profile deactivates every other one.
    pub fn upsert_profile(&self, profile: Profile) -> Result<()> {
        profile.validate()?;
        let (id, active) = (profile.id, profile.is_active);
        self.update(|snap| {
            snap.put_profile(profile);
            Ok(())
        })?;
        debug!(profile = id, active, "Stored profile");
        Ok(())
    }

    /// Make a profile the active one
    pub fn activate_profile(&self, id: u32) -> Result<()> {
        self.update(|snap| {
            let mut profile = snap
                .profiles
                .get(&id)
                .cloned()
                .ok_or(Error::ProfileNotFound { id })?;
            profile.is_active = true;
            snap.put_profile(profile);
            Ok(())
        })?;
        info!(profile = id, "Activated profile");
        Ok(())
    }

    /// Deactivate a profile
    pub fn deactivate_profile(&self, id: u32) -> Result<()> {
        self.update(|snap| {
            let profile = snap
                .profiles
                .get_mut(&id)
                .ok_or(Error::ProfileNotFound { id })?;
            profile.is_active = false;
            Ok(())
        })
    }

    /// Remove an inactive profile
    pub fn remove_profile(&self, id: u32) -> Result<Profile> {
        self.update(|snap| {
            match snap.profiles.get(&id) {
                None => return Err(Error::ProfileNotFound { id }),
                Some(p) if p.is_active => return Err(Error::ProfileActive { id }),
                Some(_) => {}
            }
            snap.profiles.remove(&id).ok_or(Error::ProfileNotFound { id })
        })
    }

    /// The applied profile, if any
    pub fn active_profile(&self) -> Option<Profile> {
        self.snapshot().active_profile().cloned()
    }

    /// All profiles ordered by id
    pub fn profiles(&self) -> Vec<Profile> {
        self.snapshot().profiles().cloned().collect()
    }

    /// Replace the category rule sets
    pub fn set_category_rules(&self, rules: Vec<CategoryRule>) {
        let rules = Arc::new(category::order_rules(rules));
        let _ = self.update(|snap| {
            snap.rules = rules;
            Ok(())
        });
    }

    /// Replace lists and profiles with the persisted policy
    pub fn load_from(&self, persistence: &dyn PolicyPersistence) -> Result<()> {
        let document = persistence.load_policy()?;
        let active = persistence.load_active_profile()?;

        let mut block = Vec::new();
        let mut allow = Vec::new();
        for mut entry in document.entries {
            let (domain, wildcard) = validate_pattern(&entry.domain)?;
            entry.domain = domain;
            entry.wildcard = wildcard;
            match entry.list_type {
                ListType::Block => block.push(entry),
                ListType::Allow => allow.push(entry),
            }
        }
        for profile in document.profiles.iter().chain(active.iter()) {
            profile.validate()?;
        }

        let (entries, profiles) = (block.len() + allow.len(), document.profiles.len());
        self.update(|snap| {
            snap.blocklist = DomainList::from_entries(block);
            snap.allowlist = DomainList::from_entries(allow);
            snap.profiles.clear();
            for mut profile in document.profiles {
                profile.is_active = false;
                snap.profiles.insert(profile.id, profile);
            }
            if let Some(mut profile) = active {
                profile.is_active = true;
                snap.put_profile(profile);
            }
            Ok(())
        })?;

        info!(entries, profiles, "Loaded policy");
        Ok(())
    }

    /// Persist lists and profiles
    pub fn save_to(&self, persistence: &dyn PolicyPersistence) -> Result<()> {
        persistence.save_policy(&self.to_document())
    }

    /// Lists and profiles as a serializable document
    pub fn to_document(&self) -> PolicyDocument {
        self.snapshot().to_document()
    }

    /// Load a plain-text list file and track it for reloading
    ///
    /// Patterns previously loaded from the same file and no longer listed in
    /// it are removed. Invalid lines are skipped with a warning.
    pub fn load_list_file(&self, path: impl AsRef<Path>, list_type: ListType) -> Result<usize> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::policy_file(&path_str, e.to_string()))?;
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        let mut entries = Vec::new();
        for pattern in parse_list(&content) {
            match PolicyEntry::new(pattern, list_type) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path_str, error = %e, "Skipping invalid list entry"),
            }
        }
        let patterns: HashSet<String> = entries.iter().map(|e| e.domain.clone()).collect();

        let mut files = self.list_files.lock();
        let index = files.iter().position(|t| t.path == path && t.list_type == list_type);
        let stale: Vec<String> = index
            .map(|i| files[i].patterns.difference(&patterns).cloned().collect())
            .unwrap_or_default();

        self.update(|snap| {
            let list = snap.list_mut(list_type);
            for pattern in &stale {
                list.remove(pattern);
            }
            for entry in entries {
                list.insert(entry);
            }
            Ok(())
        })?;

        let count = patterns.len();
        let tracked = TrackedList {
            path: path.to_path_buf(),
            list_type,
            modified,
            patterns,
        };
        match index {
            Some(i) => files[i] = tracked,
            None => files.push(tracked),
        }

        info!(path = %path_str, list = %list_type, count, "Loaded list file");
        Ok(count)
    }

    /// Write a list to a plain-text file and track it for reloading
    pub fn save_list_file(&self, path: impl AsRef<Path>, list_type: ListType) -> Result<()> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let snapshot = self.snapshot();
        let list = snapshot.list(list_type);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, render_list(list_type, list.entries()))
            .map_err(|e| Error::policy_file(&path_str, e.to_string()))?;

        let tracked = TrackedList {
            path: path.to_path_buf(),
            list_type,
            modified: std::fs::metadata(path).and_then(|m| m.modified()).ok(),
            patterns: list.entries().map(|e| e.domain.clone()).collect(),
        };
        let mut files = self.list_files.lock();
        files.retain(|t| !(t.path == path && t.list_type == list_type));
        files.push(tracked);

        info!(path = %path_str, list = %list_type, count = list.len(), "Saved list file");
        Ok(())
    }

    /// Reload tracked list files whose modification time advanced
    ///
    /// Returns how many files were reloaded.
    pub fn reload_if_changed(&self) -> Result<usize> {
        let changed: Vec<(PathBuf, ListType)> = {
            let files = self.list_files.lock();
            files
                .iter()
                .filter(|t| {
                    let current = std::fs::metadata(&t.path).and_then(|m| m.modified()).ok();
                    match (current, t.modified) {
                        (Some(now), Some(last)) => now > last,
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
                })
                .map(|t| (t.path.clone(), t.list_type))
                .collect()
        };

        for (path, list_type) in &changed {
            info!(path = %path.display(), "List file changed, reloading");
            self.load_list_file(path, *list_type)?;
        }
        Ok(changed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_isolated_from_later_mutation() {
        let store = PolicyStore::new();
        let before = store.snapshot();
        store.add_entry("example.com", ListType::Block).unwrap();

        assert!(before.list(ListType::Block).is_empty());
        assert_eq!(store.snapshot().list(ListType::Block).len(), 1);
        assert!(store.version() > before.version());
    }

    #[test]
    fn test_add_entry_rejects_invalid() {
        let store = PolicyStore::new();
        let version = store.version();
        assert!(store.add_entry("*.com", ListType::Block).is_err());
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_add_entry_duplicate() {
        let store = PolicyStore::new();
        assert!(store.add_entry("Example.com", ListType::Block).unwrap());
        assert!(!store.add_entry("example.com", ListType::Block).unwrap());
        assert!(store.add_entry("example.com", ListType::Allow).unwrap());
        assert_eq!(store.entries(ListType::Block).len(), 1);
    }

    #[test]
    fn test_add_entries_all_or_nothing() {
        let store = PolicyStore::new();
        assert!(store.add_entries(["a.com", "bad pattern"], ListType::Block).is_err());
        assert!(store.entries(ListType::Block).is_empty());
        assert_eq!(store.add_entries(["a.com", "b.com", "a.com"], ListType::Block).unwrap(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = PolicyStore::new();
        store.add_entries(["a.com", "*.b.com"], ListType::Block).unwrap();

        assert!(store.remove_entry("*.B.com", ListType::Block));
        assert!(!store.remove_entry("*.b.com", ListType::Block));
        assert!(!store.remove_entry("not valid", ListType::Block));

        store.clear(ListType::Block);
        assert!(store.entries(ListType::Block).is_empty());
    }

    #[test]
    fn test_single_active_profile() {
        let store = PolicyStore::new();
        store.upsert_profile(Profile::new(1, "Ana").activated()).unwrap();
        store.upsert_profile(Profile::new(2, "Leo").activated()).unwrap();

        let active: Vec<_> = store.profiles().into_iter().filter(|p| p.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 2);

        store.activate_profile(1).unwrap();
        assert_eq!(store.active_profile().unwrap().id, 1);
    }

    #[test]
    fn test_remove_active_profile_refused() {
        let store = PolicyStore::new();
        store.upsert_profile(Profile::new(1, "Ana").activated()).unwrap();

        assert!(matches!(store.remove_profile(1), Err(Error::ProfileActive { id: 1 })));
        store.deactivate_profile(1).unwrap();
        assert_eq!(store.remove_profile(1).unwrap().name, "Ana");
        assert!(matches!(store.remove_profile(1), Err(Error::ProfileNotFound { id: 1 })));
    }

    #[test]
    fn test_upsert_profile_validates() {
        let store = PolicyStore::new();
        let err = store.upsert_profile(Profile::new(1, "Ana").with_schedule(0, 2000));
        assert!(matches!(err, Err(Error::InvalidSchedule { .. })));
        assert!(store.profiles().is_empty());
    }

    #[test]
    fn test_enabled_categories_follow_active_profile() {
        let store = PolicyStore::new();
        assert!(!store.snapshot().is_enabled(&Category::SocialMedia));

        let mut profile = Profile::new(1, "Ana").activated();
        profile.restriction_level = RestrictionLevel::Strict;
        store.upsert_profile(profile).unwrap();
        assert!(store.snapshot().is_enabled(&Category::SocialMedia));

        store.deactivate_profile(1).unwrap();
        assert!(!store.snapshot().is_enabled(&Category::SocialMedia));
    }

    #[test]
    fn test_set_category_rules() {
        let store = PolicyStore::new();
        store.set_category_rules(vec![CategoryRule::new(Category::Gambling, &["lottery"], &[])]);
        let snap = store.snapshot();
        assert_eq!(snap.rules().len(), 1);
        assert!(snap.rules()[0].keywords.contains("lottery"));
    }

    #[test]
    fn test_save_and_load_persistence() {
        let dir = TempDir::new().unwrap();
        let file = TomlPolicyFile::new(dir.path().join("policy.toml"));

        let store = PolicyStore::new();
        store.add_entry("*.casino.example", ListType::Block).unwrap();
        store.add_entry("school.example", ListType::Allow).unwrap();
        store.upsert_profile(Profile::new(3, "Mia").activated()).unwrap();
        store.save_to(&file).unwrap();

        let restored = PolicyStore::new();
        restored.load_from(&file).unwrap();
        assert_eq!(restored.entries(ListType::Block), store.entries(ListType::Block));
        assert_eq!(restored.entries(ListType::Allow).len(), 1);
        assert_eq!(restored.active_profile().unwrap().id, 3);
    }

    #[test]
    fn test_list_file_roundtrip_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocklist.txt");
        std::fs::write(&path, "# kids\nexample.com\n*.ads.net\nnot valid\n").unwrap();

        let store = PolicyStore::new();
        assert_eq!(store.load_list_file(&path, ListType::Block).unwrap(), 2);
        assert_eq!(store.reload_if_changed().unwrap(), 0);

        // Make sure the new mtime is strictly later on coarse filesystems
        std::thread::sleep(Duration::from_millis(1100));
        std::fs::write(&path, "*.ads.net\nother.org\n").unwrap();
        assert_eq!(store.reload_if_changed().unwrap(), 1);

        let domains: Vec<_> = store
            .entries(ListType::Block)
            .into_iter()
            .map(|e| e.domain)
            .collect();
        assert_eq!(domains, vec!["*.ads.net", "other.org"]);
    }

    #[test]
    fn test_reload_keeps_manual_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allow.txt");
        std::fs::write(&path, "school.example\n").unwrap();

        let store = PolicyStore::new();
        store.add_entry("manual.example", ListType::Allow).unwrap();
        store.load_list_file(&path, ListType::Allow).unwrap();
        std::fs::write(&path, "\n").unwrap();
        store.load_list_file(&path, ListType::Allow).unwrap();

        let domains: Vec<_> = store
            .entries(ListType::Allow)
            .into_iter()
            .map(|e| e.domain)
            .collect();
        assert_eq!(domains, vec!["manual.example"]);
    }

    #[test]
    fn test_save_list_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lists").join("block.txt");

        let store = PolicyStore::new();
        store.add_entries(["a.com", "*.b.com"], ListType::Block).unwrap();
        store.save_list_file(&path, ListType::Block).unwrap();

        let fresh = PolicyStore::new();
        assert_eq!(fresh.load_list_file(&path, ListType::Block).unwrap(), 2);
    }

    #[test]
    fn test_missing_list_file() {
        let store = PolicyStore::new();
        let err = store.load_list_file("/nonexistent/shield/list.txt", ListType::Block);
        assert!(matches!(err, Err(Error::PolicyFile { .. })));
    }
}
