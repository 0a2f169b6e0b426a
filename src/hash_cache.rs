//! Content-hash cache used to skip files whose body has not changed
//!
//! Keys are vault-relative paths, values are lowercase hex SHA-256 digests of
//! the trimmed file content. A missing entry simply means "not seen yet".

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Digest of the UTF-8 bytes of `content`, hex encoded
pub fn compute_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Persisted path -> digest mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashCache {
    entries: BTreeMap<String, String>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// True only when an entry exists and equals the digest of `content`
    pub fn matches(&self, path: &str, content: &str) -> bool {
        match self.entries.get(path) {
            Some(cached) => *cached == compute_hash(content),
            None => false,
        }
    }

    /// Store the digest of `content` for `path`, replacing any previous one
    pub fn populate(&mut self, path: &str, content: &str) {
        self.entries.insert(path.to_string(), compute_hash(content));
    }

    /// Move the entry for `old_path` to `new_path`. Returns whether anything moved.
    pub fn on_rename(&mut self, old_path: &str, new_path: &str) -> bool {
        match self.entries.remove(old_path) {
            Some(digest) => {
                self.entries.insert(new_path.to_string(), digest);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `path`. Returns whether anything was removed.
    pub fn on_delete(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Move every entry below folder `old_prefix` to `new_prefix`. Returns how many moved.
    pub fn on_folder_rename(&mut self, old_prefix: &str, new_prefix: &str) -> usize {
        let old_dir = format!("{}/", old_prefix.trim_end_matches('/'));
        let new_dir = format!("{}/", new_prefix.trim_end_matches('/'));

        let moved: Vec<String> = self
            .entries
            .keys()
            .filter(|path| path.starts_with(&old_dir))
            .cloned()
            .collect();
        for path in &moved {
            if let Some(digest) = self.entries.remove(path) {
                let renamed = format!("{}{}", new_dir, &path[old_dir.len()..]);
                self.entries.insert(renamed, digest);
            }
        }
        moved.len()
    }

    /// Drop every entry below folder `prefix`. Returns how many were removed.
    pub fn on_folder_delete(&mut self, prefix: &str) -> usize {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let before = self.entries.len();
        self.entries.retain(|path, _| !path.starts_with(&dir));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
