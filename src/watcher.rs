use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use crate::events::VaultEvent;
use crate::filter::should_watch;
use crate::store::FsVault;

/// Rapid repeats of a modify on the same path inside this window are dropped
const EVENT_DEBOUNCE: Duration = Duration::from_millis(100);
/// How long the "from" half of a rename waits for its "to" half before it counts as a delete
const RENAME_PAIR_TIMEOUT: Duration = Duration::from_millis(500);

/// Watches a vault and delivers [`VaultEvent`]s over a channel
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    event_rx: Receiver<VaultEvent>,
}

impl VaultWatcher {
    pub fn new(vault: &FsVault) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let (event_tx, event_rx) = mpsc::channel::<VaultEvent>();

        let mut watcher = notify::recommended_watcher(tx)
            .context("Failed to create file system watcher")?;

        watcher
            .watch(vault.root(), RecursiveMode::Recursive)
            .context("Failed to start watching vault")?;

        let mut translator = EventTranslator::new(vault.clone());

        // Translate notify events on a background thread
        thread::spawn(move || loop {
            let events = match rx.recv_timeout(RENAME_PAIR_TIMEOUT) {
                Ok(Ok(event)) => translator.translate(&event, Instant::now()),
                Ok(Err(err)) => {
                    tracing::error!("File watcher error: {}", err);
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => translator.flush_expired(Instant::now()),
                Err(RecvTimeoutError::Disconnected) => break,
            };

            for event in events {
                if event_tx.send(event).is_err() {
                    return; // Receiver dropped, exit thread
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            event_rx,
        })
    }

    pub fn try_recv(&self) -> Result<VaultEvent, mpsc::TryRecvError> {
        self.event_rx.try_recv()
    }

    pub fn recv(&self) -> Result<VaultEvent, mpsc::RecvError> {
        self.event_rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<VaultEvent, RecvTimeoutError> {
        self.event_rx.recv_timeout(timeout)
    }
}

/// Turns raw notify events into vault events.
///
/// Backends report renames differently: inotify sends a "from" and a "to"
/// half sharing a tracker id and then a combined event, FSEvents sends one
/// ambiguous event per path. Unpaired "from" halves become deletes once
/// [`RENAME_PAIR_TIMEOUT`] has passed.
pub struct EventTranslator {
    vault: FsVault,
    pending_from: HashMap<Option<usize>, (String, Instant)>,
    paired_trackers: HashMap<usize, Instant>,
    last_modify: HashMap<String, Instant>,
}

impl EventTranslator {
    pub fn new(vault: FsVault) -> Self {
        Self {
            vault,
            pending_from: HashMap::new(),
            paired_trackers: HashMap::new(),
            last_modify: HashMap::new(),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = self.vault.to_vault_path(path)?;
        // Hidden entries (settings, editor swap files) never matter
        if relative.split('/').any(|part| part.starts_with('.')) {
            return None;
        }
        Some(relative)
    }

    fn modify(&mut self, path: &Path, now: Instant) -> Option<VaultEvent> {
        let relative = self.relative(path)?;
        if !should_watch(&relative) {
            return None;
        }
        if let Some(last) = self.last_modify.get(&relative) {
            if now.duration_since(*last) < EVENT_DEBOUNCE {
                return None;
            }
        }
        self.last_modify.insert(relative.clone(), now);
        Some(VaultEvent::modify(relative))
    }

    fn delete(&mut self, path: &Path) -> Option<VaultEvent> {
        let relative = self.relative(path)?;
        self.last_modify.remove(&relative);
        Some(VaultEvent::delete(relative))
    }

    fn rename(&mut self, from: &Path, to: &Path, now: Instant) -> Option<VaultEvent> {
        match (self.relative(from), self.relative(to)) {
            (Some(from), Some(to)) => {
                self.last_modify.remove(&from);
                Some(VaultEvent::rename(from, to))
            }
            // Moved out of the vault
            (Some(_), None) => self.delete(from),
            // Moved in from outside
            (None, Some(_)) => self.modify(to, now),
            (None, None) => None,
        }
    }

    pub fn translate(&mut self, event: &Event, now: Instant) -> Vec<VaultEvent> {
        let mut out = self.flush_expired(now);
        let tracker = event.attrs.tracker();

        match event.kind {
            EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Other) => {
                out.extend(event.paths.iter().filter_map(|path| self.modify(path, now)));
            }
            EventKind::Remove(_) => {
                out.extend(event.paths.iter().filter_map(|path| self.delete(path)));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                if let Some(path) = event.paths.first().and_then(|p| self.relative(p)) {
                    self.pending_from.insert(tracker, (path, now));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if let Some(to) = event.paths.first() {
                    let paired = self.pending_from.remove(&tracker);
                    match paired {
                        Some((from, _)) => {
                            if let Some(id) = tracker {
                                self.paired_trackers.insert(id, now);
                            }
                            let from = self.vault.absolute(&from);
                            out.extend(self.rename(&from, to, now));
                        }
                        None => out.extend(self.modify(to, now)),
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let already_paired = tracker.is_some_and(|id| self.paired_trackers.remove(&id).is_some());
                if let (false, [from, to]) = (already_paired, event.paths.as_slice()) {
                    self.pending_from.remove(&tracker);
                    out.extend(self.rename(from, to, now));
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Ambiguous rename half: whatever still exists was the target
                for path in &event.paths {
                    let event = if path.exists() {
                        self.modify(path, now)
                    } else {
                        self.delete(path)
                    };
                    out.extend(event);
                }
            }
            // Metadata changes include our own mtime restores
            EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }

        out
    }

    /// Turn "from" halves that never found a partner into deletes and drop stale bookkeeping
    pub fn flush_expired(&mut self, now: Instant) -> Vec<VaultEvent> {
        self.last_modify
            .retain(|_, last| now.duration_since(*last) < EVENT_DEBOUNCE);
        self.paired_trackers
            .retain(|_, paired| now.duration_since(*paired) < RENAME_PAIR_TIMEOUT);

        let expired: Vec<Option<usize>> = self
            .pending_from
            .iter()
            .filter(|(_, (_, since))| now.duration_since(*since) >= RENAME_PAIR_TIMEOUT)
            .map(|(tracker, _)| *tracker)
            .collect();

        expired
            .into_iter()
            .filter_map(|tracker| self.pending_from.remove(&tracker))
            .map(|(path, _)| VaultEvent::delete(path))
            .collect()
    }
}
