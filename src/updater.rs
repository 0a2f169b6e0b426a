//! The intake point for change events
//!
//! [`Updater`] owns the settings (and with them the hash cache) for the whole
//! process. Every call runs the full pipeline for one file: policy check,
//! timestamp decision, metadata write, cache refresh and settings save. A call
//! only returns once all of that is done, which keeps the cache and the
//! persisted settings consistent without any locking.

use std::fmt::Display;
use crate::config::{Settings, SettingsStore};
use crate::events::{ChangeOutcome, ChangeSource, VaultEvent};
use crate::filter::{IgnorePolicy, IgnoreReason, SpecializedFormat};
use crate::hash_cache::compute_hash;
use crate::store::{ContentStore, FileRecord, MetadataStore, StatProvider, VaultError};
use crate::timestamp::{apply_timestamps, StampChanges};

pub struct Updater<S> {
    store: S,
    settings: Settings,
    settings_store: SettingsStore,
    specialized: Option<Box<dyn SpecializedFormat>>,
}

impl<S> Updater<S>
where
    S: ContentStore + MetadataStore + StatProvider,
{
    pub fn new(store: S, settings: Settings, settings_store: SettingsStore) -> Self {
        Self {
            store,
            settings,
            settings_store,
            specialized: None,
        }
    }

    /// Install the predicate used to skip documents in a specialized format
    pub fn with_specialized<D>(mut self, detector: D) -> Self
    where
        D: SpecializedFormat + 'static,
    {
        self.specialized = Some(Box::new(detector));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn policy(&self) -> IgnorePolicy<'_> {
        IgnorePolicy::new(&self.settings).with_specialized(self.specialized.as_deref())
    }

    fn persist_settings(&self) -> Result<(), VaultError> {
        self.settings_store.save(&self.settings)
    }

    fn failure(path: &str, err: impl Display) -> ChangeOutcome {
        tracing::error!("Failed to update {}: {}", path, err);
        ChangeOutcome::Error {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// Load `path` and run the ignore rules against it
    pub fn evaluate(&self, path: &str) -> Result<Option<IgnoreReason>, VaultError> {
        let record = FileRecord::load(&self.store, path)?;
        Ok(self.policy().evaluate(&record))
    }

    /// Every document in the vault the ignore rules let through, in path order
    pub fn get_all_eligible_files(&self) -> Result<Vec<String>, VaultError> {
        let mut eligible = Vec::new();

        for path in self.store.list_documents()? {
            match self.evaluate(&path) {
                Ok(None) => eligible.push(path),
                Ok(Some(reason)) => tracing::debug!("Skipping {}: {}", path, reason),
                Err(err) => tracing::warn!("Skipping {}: {}", path, err),
            }
        }

        Ok(eligible)
    }

    /// Record the digest of the current trimmed content of `path`
    pub fn populate_cache_for_file(&mut self, path: &str) -> Result<(), VaultError> {
        let content = self.store.read(path)?;
        let content = content.trim();

        if self.settings.file_hash_map.get(path) == Some(compute_hash(content).as_str()) {
            return Ok(());
        }
        self.settings.file_hash_map.populate(path, content);
        self.persist_settings()
    }

    /// Run the full update pipeline for one document
    pub fn handle_file_change(&mut self, path: &str, source: ChangeSource) -> ChangeOutcome {
        tracing::debug!("Handling {:?} change for {}", source, path);

        if !self.store.is_file(path) {
            tracing::debug!("Ignoring {}: {}", path, IgnoreReason::NotAFile);
            return ChangeOutcome::Ignored { reason: IgnoreReason::NotAFile };
        }

        let record = match FileRecord::load(&self.store, path) {
            Ok(record) => record,
            Err(err) => return Self::failure(path, err),
        };

        if let Some(reason) = self.policy().evaluate(&record) {
            tracing::debug!("Ignoring {}: {}", path, reason);
            return ChangeOutcome::Ignored { reason };
        }

        let settings = &self.settings;
        let stat = record.stat;
        let mut decision = Ok(StampChanges::default());
        let applied = self.store.apply_mutation(path, stat, &mut |metadata| {
            decision = apply_timestamps(metadata, path, stat, settings);
        });

        if let Err(err) = applied {
            return Self::failure(path, err);
        }
        match decision {
            Ok(changes) if changes.any() => {
                tracing::debug!("Wrote created={} updated={} for {}", changes.created, changes.updated, path);
            }
            Ok(_) => {}
            Err(err) => return Self::failure(path, err),
        }

        if let Err(err) = self.populate_cache_for_file(path) {
            return Self::failure(path, err);
        }
        ChangeOutcome::Ok
    }

    /// Single intake point for host notifications
    pub fn handle_event(&mut self, event: &VaultEvent) -> ChangeOutcome {
        match event {
            VaultEvent::Modify { path } => self.handle_file_change(path, ChangeSource::Modify),
            VaultEvent::Rename { from, to } => {
                let cache = &mut self.settings.file_hash_map;
                let moved = cache.on_rename(from, to) || cache.on_folder_rename(from, to) > 0;
                self.persist_if(moved, to)
            }
            VaultEvent::Delete { path } => {
                let cache = &mut self.settings.file_hash_map;
                let removed = cache.on_delete(path) || cache.on_folder_delete(path) > 0;
                self.persist_if(removed, path)
            }
        }
    }

    fn persist_if(&self, changed: bool, path: &str) -> ChangeOutcome {
        if !changed {
            return ChangeOutcome::Ok;
        }
        match self.persist_settings() {
            Ok(()) => ChangeOutcome::Ok,
            Err(err) => Self::failure(path, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::config::TimeZoneMode;
    use crate::filter::ExcalidrawDetector;
    use crate::store::{millis_to_system_time, parse_metadata, split_front_matter, FsVault, Metadata};
    use serde_json::json;
    use tempfile::TempDir;

    /// 2024-01-01T10:00:00Z
    const T: i64 = 1_704_103_200_000;

    fn updater(temp_dir: &TempDir, settings: Settings) -> Updater<FsVault> {
        let settings = Settings {
            timezone: TimeZoneMode::Utc,
            ..settings
        };
        Updater::new(
            FsVault::new(temp_dir.path()),
            settings,
            SettingsStore::for_vault(temp_dir.path()),
        )
    }

    fn write_note(updater: &Updater<FsVault>, path: &str, content: &str, mtime: i64) {
        let absolute = updater.store().absolute(path);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&absolute, content).unwrap();
        touch(updater, path, mtime);
    }

    fn touch(updater: &Updater<FsVault>, path: &str, mtime: i64) {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(updater.store().absolute(path))
            .unwrap();
        file.set_modified(millis_to_system_time(mtime)).unwrap();
    }

    fn metadata(updater: &Updater<FsVault>, path: &str) -> Metadata {
        let raw = updater.store().read(path).unwrap();
        parse_metadata(split_front_matter(&raw).0.unwrap_or_default()).unwrap()
    }

    #[test]
    fn test_modify_writes_timestamps_and_caches_hash() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());
        write_note(&updater, "Notes/a.md", "body\n", T);

        let outcome = updater.handle_event(&VaultEvent::modify("Notes/a.md"));

        assert_eq!(outcome, ChangeOutcome::Ok);
        assert_eq!(metadata(&updater, "Notes/a.md").get("updated"), Some(&json!("2024-01-01T10:00")));
        let content = updater.store().read("Notes/a.md").unwrap();
        assert!(updater.settings().file_hash_map.matches("Notes/a.md", content.trim()));
        // The cache is persisted along with the settings
        let saved = SettingsStore::for_vault(temp_dir.path()).load().unwrap();
        assert_eq!(saved.file_hash_map, updater.settings().file_hash_map);
    }

    #[test]
    fn test_unchanged_hash_is_ignored_without_touching_metadata() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = Settings {
            enable_experimental_hash: true,
            ..Settings::default()
        };
        let mut updater = updater(&temp_dir, settings);
        write_note(&updater, "a.md", "---\ntitle: x\n---\nbody", T);
        updater.populate_cache_for_file("a.md").unwrap();

        let outcome = updater.handle_file_change("a.md", ChangeSource::Modify);

        assert_eq!(outcome, ChangeOutcome::Ignored { reason: IgnoreReason::UnchangedContent });
        assert_eq!(updater.store().read("a.md").unwrap(), "---\ntitle: x\n---\nbody");
    }

    #[test]
    fn test_structural_error_is_reported_and_file_left_alone() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());
        let original = "---\ntitle: [unclosed\n---\nbody";
        write_note(&updater, "bad.md", original, T);

        let outcome = updater.handle_file_change("bad.md", ChangeSource::Modify);

        match outcome {
            ChangeOutcome::Error { path, message } => {
                assert_eq!(path, "bad.md");
                assert!(message.contains("Malformed front matter"));
            }
            other => panic!("Expected error outcome, got {:?}", other),
        }
        assert_eq!(updater.store().read("bad.md").unwrap(), original);
        assert!(updater.settings().file_hash_map.get("bad.md").is_none());
    }

    #[test]
    fn test_missing_paths_and_folders_are_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());
        fs::create_dir_all(updater.store().absolute("Folder.md")).unwrap();

        for path in ["vanished.md", "Folder.md"] {
            assert_eq!(
                updater.handle_file_change(path, ChangeSource::Modify),
                ChangeOutcome::Ignored { reason: IgnoreReason::NotAFile }
            );
        }
        assert_eq!(
            updater.handle_event(&VaultEvent::modify("Folder.md")),
            ChangeOutcome::Ignored { reason: IgnoreReason::NotAFile }
        );
        assert!(updater.settings().file_hash_map.is_empty());
    }

    #[test]
    fn test_rename_moves_hash_and_delete_removes_it() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = Settings {
            enable_experimental_hash: true,
            ..Settings::default()
        };
        let mut updater = updater(&temp_dir, settings);
        write_note(&updater, "old.md", "body", T);
        assert!(updater.handle_file_change("old.md", ChangeSource::Modify).is_ok());

        fs::rename(updater.store().absolute("old.md"), updater.store().absolute("new.md")).unwrap();
        assert!(updater.handle_event(&VaultEvent::rename("old.md", "new.md")).is_ok());

        assert!(updater.settings().file_hash_map.get("old.md").is_none());
        assert!(updater.settings().file_hash_map.get("new.md").is_some());
        assert_eq!(
            updater.handle_event(&VaultEvent::modify("new.md")),
            ChangeOutcome::Ignored { reason: IgnoreReason::UnchangedContent }
        );

        fs::remove_file(updater.store().absolute("new.md")).unwrap();
        assert!(updater.handle_event(&VaultEvent::delete("new.md")).is_ok());
        assert!(updater.settings().file_hash_map.is_empty());
    }

    #[test]
    fn test_folder_rename_moves_every_entry_below_it() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());
        write_note(&updater, "Projects/a.md", "a", T);
        write_note(&updater, "Projects/deep/b.md", "b", T);
        updater.populate_cache_for_file("Projects/a.md").unwrap();
        updater.populate_cache_for_file("Projects/deep/b.md").unwrap();

        updater.handle_event(&VaultEvent::rename("Projects", "Archive/Projects"));

        let paths: Vec<_> = updater.settings().file_hash_map.paths().collect();
        assert_eq!(paths, vec!["Archive/Projects/a.md", "Archive/Projects/deep/b.md"]);

        updater.handle_event(&VaultEvent::delete("Archive"));
        assert!(updater.settings().file_hash_map.is_empty());
    }

    #[test]
    fn test_untracked_rename_is_silent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());

        assert!(updater.handle_event(&VaultEvent::rename("ghost.md", "other.md")).is_ok());
        assert!(updater.handle_event(&VaultEvent::delete("ghost.md")).is_ok());
        // Nothing changed, so nothing was written
        assert!(!temp_dir.path().join(".editstamp").exists());
    }

    #[test]
    fn test_eligible_files_apply_the_policy() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = Settings {
            ignore_global_folder: vec!["Archive".to_string()],
            ..Settings::default()
        };
        let updater = updater(&temp_dir, settings).with_specialized(ExcalidrawDetector);
        write_note(&updater, "Notes/a.md", "body", T);
        write_note(&updater, "Notes/empty.md", "  ", T);
        write_note(&updater, "Archive/old.md", "body", T);
        write_note(&updater, "Canvas.md", "body", T);
        write_note(&updater, "Drawings/x.excalidraw.md", "body", T);
        write_note(&updater, "Notes/z.md", "body", T);

        assert_eq!(updater.get_all_eligible_files().unwrap(), vec!["Notes/a.md", "Notes/z.md"]);
    }

    #[test]
    fn test_populate_cache_skips_save_when_digest_is_current() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());
        write_note(&updater, "a.md", "body", T);

        updater.populate_cache_for_file("a.md").unwrap();
        let settings_path = temp_dir.path().join(".editstamp").join("settings.json");
        fs::remove_file(&settings_path).unwrap();

        updater.populate_cache_for_file("a.md").unwrap();
        assert!(!settings_path.exists());

        write_note(&updater, "a.md", "changed", T);
        updater.populate_cache_for_file("a.md").unwrap();
        assert!(settings_path.exists());
        assert!(updater.settings().file_hash_map.matches("a.md", "changed"));
    }

    #[test]
    fn test_metadata_only_write_keeps_mtime() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = updater(&temp_dir, Settings::default());
        write_note(&updater, "a.md", "body", T + 42_000);

        assert!(updater.handle_file_change("a.md", ChangeSource::Bulk).is_ok());
        assert_eq!(updater.store().stat("a.md").unwrap().mtime, T + 42_000);

        // A second pass sees the same mtime and leaves the file alone
        let before = updater.store().read("a.md").unwrap();
        touch(&updater, "a.md", T + 42_000);
        assert!(updater.handle_file_change("a.md", ChangeSource::Modify).is_ok());
        assert_eq!(updater.store().read("a.md").unwrap(), before);
    }
}
