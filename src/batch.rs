//! Sequential bulk runs over many documents
//!
//! A batch either refreshes timestamps or only seeds the hash cache. Files are
//! processed strictly one after another; the cancellation flag is checked
//! before each file, so a cancelled run stops between files and keeps what it
//! already wrote.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use serde::Serialize;
use crate::events::{ChangeOutcome, ChangeSource};
use crate::store::{ContentStore, MetadataStore, StatProvider};
use crate::updater::Updater;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchMode {
    /// Run the full timestamp update for every file
    UpdateTimestamps,
    /// Only record content hashes
    PopulateCache,
}

/// Progress after a file finished
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    pub done: usize,
    pub total: usize,
    pub path: &'a str,
    pub outcome: &'a ChangeOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub ok: usize,
    pub ignored: usize,
    pub errors: Vec<ChangeOutcome>,
    pub cancelled: bool,
}

pub struct BatchRunner {
    mode: BatchMode,
    cancel: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(mode: BatchMode) -> Self {
        Self {
            mode,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Flag another thread (e.g. a signal handler) can set to stop the run
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn run<S, F>(&self, updater: &mut Updater<S>, files: &[String], mut on_progress: F) -> BatchReport
    where
        S: ContentStore + MetadataStore + StatProvider,
        F: FnMut(BatchProgress<'_>),
    {
        let mut report = BatchReport {
            total: files.len(),
            ..BatchReport::default()
        };

        for (index, path) in files.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!("Batch stopped after {} of {} files", report.processed, report.total);
                report.cancelled = true;
                break;
            }

            let outcome = match self.mode {
                BatchMode::UpdateTimestamps => updater.handle_file_change(path, ChangeSource::Bulk),
                BatchMode::PopulateCache => match updater.populate_cache_for_file(path) {
                    Ok(()) => ChangeOutcome::Ok,
                    Err(err) => {
                        tracing::error!("Failed to cache {}: {}", path, err);
                        ChangeOutcome::Error {
                            path: path.clone(),
                            message: err.to_string(),
                        }
                    }
                },
            };

            report.processed += 1;
            match &outcome {
                ChangeOutcome::Ok => report.ok += 1,
                ChangeOutcome::Ignored { .. } => report.ignored += 1,
                ChangeOutcome::Error { .. } => report.errors.push(outcome.clone()),
            }

            on_progress(BatchProgress {
                done: index + 1,
                total: report.total,
                path,
                outcome: &outcome,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::config::{Settings, SettingsStore, TimeZoneMode};
    use crate::store::{millis_to_system_time, FsVault};
    use tempfile::TempDir;

    const T: i64 = 1_704_103_200_000;

    fn vault_with(temp_dir: &TempDir, notes: &[(&str, &str)]) -> Updater<FsVault> {
        for (path, content) in notes {
            let absolute = temp_dir.path().join(path);
            fs::create_dir_all(absolute.parent().unwrap()).unwrap();
            fs::write(&absolute, content).unwrap();
            let file = fs::OpenOptions::new().write(true).open(&absolute).unwrap();
            file.set_modified(millis_to_system_time(T)).unwrap();
        }
        let settings = Settings {
            timezone: TimeZoneMode::Utc,
            ..Settings::default()
        };
        Updater::new(FsVault::new(temp_dir.path()), settings, SettingsStore::in_memory())
    }

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_update_run_reports_progress_in_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = vault_with(&temp_dir, &[("a.md", "a"), ("b.md", "b"), ("c.md", "c")]);
        let runner = BatchRunner::new(BatchMode::UpdateTimestamps);

        let mut seen = Vec::new();
        let report = runner.run(&mut updater, &files(&["a.md", "b.md", "c.md"]), |progress| {
            seen.push((progress.done, progress.total, progress.path.to_string()));
        });

        assert_eq!(report.processed, 3);
        assert_eq!(report.ok, 3);
        assert!(!report.cancelled);
        assert_eq!(
            seen,
            vec![
                (1, 3, "a.md".to_string()),
                (2, 3, "b.md".to_string()),
                (3, 3, "c.md".to_string()),
            ]
        );
        for path in ["a.md", "b.md", "c.md"] {
            assert!(fs::read_to_string(temp_dir.path().join(path)).unwrap().contains("updated:"));
        }
    }

    #[test]
    fn test_cancellation_stops_between_files_without_rollback() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = vault_with(&temp_dir, &[("a.md", "a"), ("b.md", "b"), ("c.md", "c")]);
        let runner = BatchRunner::new(BatchMode::UpdateTimestamps);
        let cancel = runner.cancel_handle();

        let report = runner.run(&mut updater, &files(&["a.md", "b.md", "c.md"]), |progress| {
            if progress.done == 2 {
                cancel.store(true, Ordering::SeqCst);
            }
        });

        assert!(report.cancelled);
        assert_eq!(report.processed, 2);
        assert!(fs::read_to_string(temp_dir.path().join("a.md")).unwrap().contains("updated:"));
        assert!(fs::read_to_string(temp_dir.path().join("b.md")).unwrap().contains("updated:"));
        assert_eq!(fs::read_to_string(temp_dir.path().join("c.md")).unwrap(), "c");
    }

    #[test]
    fn test_cancel_before_start_processes_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = vault_with(&temp_dir, &[("a.md", "a")]);
        let runner = BatchRunner::new(BatchMode::PopulateCache);
        runner.cancel();

        let report = runner.run(&mut updater, &files(&["a.md"]), |_| {});

        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert!(updater.settings().file_hash_map.is_empty());
    }

    #[test]
    fn test_errors_do_not_stop_the_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = vault_with(
            &temp_dir,
            &[("a.md", "a"), ("bad.md", "---\nx: [oops\n---\nbody"), ("c.md", "c")],
        );
        let runner = BatchRunner::new(BatchMode::UpdateTimestamps);

        let report = runner.run(&mut updater, &files(&["a.md", "bad.md", "c.md"]), |_| {});

        assert_eq!(report.processed, 3);
        assert_eq!(report.ok, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(&report.errors[0], ChangeOutcome::Error { path, .. } if path == "bad.md"));
        assert!(fs::read_to_string(temp_dir.path().join("c.md")).unwrap().contains("updated:"));
    }

    #[test]
    fn test_file_deleted_during_run_is_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = vault_with(&temp_dir, &[("a.md", "a"), ("b.md", "b")]);
        let runner = BatchRunner::new(BatchMode::UpdateTimestamps);

        let report = runner.run(&mut updater, &files(&["a.md", "b.md"]), |progress| {
            if progress.done == 1 {
                fs::remove_file(temp_dir.path().join("b.md")).unwrap();
            }
        });

        assert_eq!(report.ok, 1);
        assert_eq!(report.ignored, 1);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_populate_cache_does_not_touch_documents() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut updater = vault_with(&temp_dir, &[("a.md", " a \n"), ("b.md", "b")]);
        let runner = BatchRunner::new(BatchMode::PopulateCache);

        let report = runner.run(&mut updater, &files(&["a.md", "b.md", "missing.md"]), |_| {});

        assert_eq!(report.ok, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(updater.settings().file_hash_map.matches("a.md", "a"));
        assert!(updater.settings().file_hash_map.matches("b.md", "b"));
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.md")).unwrap(), " a \n");
    }
}
