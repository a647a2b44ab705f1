//! Name-based process discovery.
//!
//! Two independent tables live side by side: a *unique* table (at most one
//! [`ProcessId`] per name) and a *duplicate* table (an ordered list of
//! distinct ids per key). Both are `DashMap`-backed for lock-striped
//! concurrent access; callers never block each other except on the single
//! bucket they touch.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::error::RegistryError;
use crate::ids::ProcessId;

/// Opaque metadata attached to a registry entry. Kept as `Any` so callers
/// can stash whatever they like without the registry knowing about it.
pub type Metadata = std::sync::Arc<dyn std::any::Any + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: ProcessId,
    metadata: Option<Metadata>,
    registered_at: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Unique-mode name registry: `register`/`lookup`/`whereis`/`unregister`.
#[derive(Default)]
pub struct Registry {
    unique: DashMap<String, Entry>,
    /// Reverse index so process termination can clean up in O(names for
    /// that process) instead of scanning the whole table.
    names_by_id: DashMap<ProcessId, Vec<String>>,
    duplicate: DashMap<String, Vec<Entry>>,
    dup_keys_by_id: DashMap<ProcessId, Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` under `name`. Fails if `name` is already bound to a
    /// live entry.
    pub fn register(&self, name: &str, id: ProcessId) -> Result<(), RegistryError> {
        self.register_with_metadata(name, id, None)
    }

    pub fn register_with_metadata(
        &self,
        name: &str,
        id: ProcessId,
        metadata: Option<Metadata>,
    ) -> Result<(), RegistryError> {
        use dashmap::mapref::entry::Entry as DashEntry;
        match self.unique.entry(name.to_string()) {
            DashEntry::Occupied(_) => Err(RegistryError::AlreadyRegistered(name.to_string())),
            DashEntry::Vacant(slot) => {
                slot.insert(Entry {
                    id: id.clone(),
                    metadata,
                    registered_at: now_ms(),
                });
                self.names_by_id.entry(id).or_default().push(name.to_string());
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<ProcessId, RegistryError> {
        self.whereis(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn whereis(&self, name: &str) -> Option<ProcessId> {
        self.unique.get(name).map(|e| e.id.clone())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.unique.contains_key(name)
    }

    /// Idempotent: unregistering an absent name is not an error.
    pub fn unregister(&self, name: &str) {
        if let Some((_, entry)) = self.unique.remove(name) {
            if let Some(mut names) = self.names_by_id.get_mut(&entry.id) {
                names.retain(|n| n != name);
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.unique.iter().map(|e| e.key().clone()).collect()
    }

    /// Adds `id` under `key` in duplicate mode. A given ref may appear at
    /// most once per key.
    pub fn register_duplicate(&self, key: &str, id: ProcessId, metadata: Option<Metadata>) {
        let mut bucket = self.duplicate.entry(key.to_string()).or_default();
        if bucket.iter().any(|e| e.id == id) {
            return;
        }
        bucket.push(Entry {
            id: id.clone(),
            metadata,
            registered_at: now_ms(),
        });
        drop(bucket);
        self.dup_keys_by_id.entry(id).or_default().push(key.to_string());
    }

    pub fn lookup_all(&self, key: &str) -> Vec<ProcessId> {
        self.duplicate
            .get(key)
            .map(|b| b.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Invokes `f` once per id currently registered under `key`.
    pub fn dispatch<F: FnMut(&ProcessId)>(&self, key: &str, mut f: F) {
        if let Some(bucket) = self.duplicate.get(key) {
            for entry in bucket.iter() {
                f(&entry.id);
            }
        }
    }

    /// Ids across all duplicate-mode keys satisfying `predicate(key, id)`.
    pub fn select<F: Fn(&str, &ProcessId) -> bool>(&self, predicate: F) -> Vec<ProcessId> {
        let mut out = Vec::new();
        for bucket in self.duplicate.iter() {
            for entry in bucket.value() {
                if predicate(bucket.key(), &entry.id) {
                    out.push(entry.id.clone());
                }
            }
        }
        out
    }

    /// Glob match over duplicate-mode keys: `*` matches a single path
    /// segment (no `/`), `**` matches anything, `?` matches one character.
    pub fn match_names(&self, pattern: &str) -> Vec<String> {
        self.duplicate
            .iter()
            .map(|b| b.key().clone())
            .filter(|key| glob_match(pattern, key))
            .collect()
    }

    /// Removes every binding (unique and duplicate) for `id`. Called once
    /// per process, on termination.
    pub fn remove_process(&self, id: &str) {
        if let Some((_, names)) = self.names_by_id.remove(id) {
            for name in names {
                self.unique.remove(&name);
            }
        }
        if let Some((_, keys)) = self.dup_keys_by_id.remove(id) {
            for key in keys {
                if let Some(mut bucket) = self.duplicate.get_mut(&key) {
                    bucket.retain(|e| e.id != id);
                }
            }
        }
    }
}

/// `*` matches a run of non-`/` characters, `**` matches anything
/// (including `/`), `?` matches exactly one character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    glob_match_rec(&pat, &txt)
}

fn glob_match_rec(pat: &[char], txt: &[char]) -> bool {
    match pat.first() {
        None => txt.is_empty(),
        Some('*') if pat.get(1) == Some(&'*') => {
            let rest = &pat[2..];
            (0..=txt.len()).any(|i| glob_match_rec(rest, &txt[i..]))
        }
        Some('*') => {
            let rest = &pat[1..];
            let split = txt.iter().position(|c| *c == '/').map(|p| p + 1).unwrap_or(txt.len());
            (0..=split).any(|i| glob_match_rec(rest, &txt[i..]))
        }
        Some('?') => !txt.is_empty() && glob_match_rec(&pat[1..], &txt[1..]),
        Some(c) => txt.first() == Some(c) && glob_match_rec(&pat[1..], &txt[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_register_conflicts() {
        let reg = Registry::new();
        reg.register("alice", "pid-1".to_string()).unwrap();
        assert!(matches!(
            reg.register("alice", "pid-2".to_string()),
            Err(RegistryError::AlreadyRegistered(_))
        ));
        assert_eq!(reg.whereis("alice"), Some("pid-1".to_string()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = Registry::new();
        reg.register("alice", "pid-1".to_string()).unwrap();
        reg.unregister("alice");
        reg.unregister("alice");
        assert!(!reg.is_registered("alice"));
    }

    #[test]
    fn remove_process_clears_unique_and_duplicate() {
        let reg = Registry::new();
        reg.register("alice", "pid-1".to_string()).unwrap();
        reg.register_duplicate("workers", "pid-1".to_string(), None);
        reg.register_duplicate("workers", "pid-2".to_string(), None);
        reg.remove_process("pid-1");
        assert!(!reg.is_registered("alice"));
        assert_eq!(reg.lookup_all("workers"), vec!["pid-2".to_string()]);
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("workers/*", "workers/1"));
        assert!(!glob_match("workers/*", "workers/1/2"));
        assert!(glob_match("workers/**", "workers/1/2"));
        assert!(glob_match("w?rker", "worker"));
        assert!(!glob_match("w?rker", "wrker"));
    }
}
