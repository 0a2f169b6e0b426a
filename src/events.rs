use serde::{Deserialize, Serialize};
use crate::filter::IgnoreReason;

/// A change notification from the host, with vault-relative paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VaultEvent {
    Modify { path: String },
    Rename { from: String, to: String },
    Delete { path: String },
}

impl VaultEvent {
    pub fn modify(path: impl Into<String>) -> Self {
        Self::Modify { path: path.into() }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Rename { from: from.into(), to: to.into() }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    /// The path the event leaves behind (the new path for renames)
    pub fn path(&self) -> &str {
        match self {
            VaultEvent::Modify { path } | VaultEvent::Delete { path } => path,
            VaultEvent::Rename { to, .. } => to,
        }
    }
}

/// What triggered a timestamp update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// A single edit reported by the watcher
    Modify,
    /// Part of an update-all batch
    Bulk,
}

/// Result of handling one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChangeOutcome {
    Ok,
    Ignored { reason: IgnoreReason },
    Error { path: String, message: String },
}

impl ChangeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ChangeOutcome::Ok)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, ChangeOutcome::Ignored { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ChangeOutcome::Error { .. })
    }
}
