//! Collaborators the updater consumes: content, metadata and stat access
//!
//! The traits keep the decision code independent from where documents live.
//! [`FsVault`] is the filesystem implementation used by the CLI; it treats a
//! leading `---` YAML block as the metadata block and delegates the YAML
//! itself to `serde_yaml`.

use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ignore::WalkBuilder;
use serde_json::Value;
use serde_yaml::{Mapping, Value as YamlValue};
use thiserror::Error;

/// Opaque key-value view of a document's metadata block
pub type Metadata = serde_json::Map<String, Value>;

/// Extension of the documents editstamp manages
pub const DOCUMENT_EXTENSION: &str = "md";

/// Errors reported by the vault collaborators
#[derive(Debug, Error)]
pub enum VaultError {
    /// The metadata block exists but cannot be parsed as a key-value mapping
    #[error("Malformed front matter in {path}: {message}")]
    Structural { path: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist settings to {path}: {message}")]
    Settings { path: PathBuf, message: String },
}

impl VaultError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// File times in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mtime: i64,
    pub ctime: i64,
}

/// Everything the ignore policy needs to know about one document
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Vault-relative path with `/` separators
    pub path: String,
    pub name: String,
    pub extension: String,
    /// Content with surrounding whitespace removed
    pub content: String,
    pub stat: FileStat,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: &str, stat: FileStat) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let extension = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
            _ => String::new(),
        };
        Self {
            path,
            name,
            extension,
            content: content.trim().to_string(),
            stat,
        }
    }

    /// Read content and stat for `path` from the given store
    pub fn load<S>(store: &S, path: &str) -> Result<Self, VaultError>
    where
        S: ContentStore + StatProvider + ?Sized,
    {
        let content = store.read(path)?;
        let stat = store.stat(path)?;
        Ok(Self::new(path, &content, stat))
    }
}

pub trait ContentStore {
    fn read(&self, path: &str) -> Result<String, VaultError>;

    /// Whether `path` currently names a regular document (false for folders and missing paths)
    fn is_file(&self, path: &str) -> bool;

    /// All documents in the vault, sorted by path
    fn list_documents(&self) -> Result<Vec<String>, VaultError>;
}

pub trait StatProvider {
    fn stat(&self, path: &str) -> Result<FileStat, VaultError>;
}

pub trait MetadataStore {
    /// Run `mutator` against the metadata of `path` and persist the result if it changed.
    ///
    /// `stat_hint` carries the file times to keep after the write. Returns
    /// whether the document was rewritten.
    fn apply_mutation(
        &self,
        path: &str,
        stat_hint: FileStat,
        mutator: &mut dyn FnMut(&mut Metadata),
    ) -> Result<bool, VaultError>;
}

/// Split a document into its front-matter block (without fences) and body.
///
/// A block must open on the first line and be closed by a line holding only `---`.
pub fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw.strip_prefix("---\n").or_else(|| raw.strip_prefix("---\r\n")) else {
        return (None, raw);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(|c| c == '\r' || c == '\n') == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, raw)
}

fn parse_mapping(block: &str) -> Result<Mapping, String> {
    if block.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<YamlValue>(block).map_err(|e| e.to_string())? {
        YamlValue::Mapping(mapping) => Ok(mapping),
        YamlValue::Null => Ok(Mapping::new()),
        _ => Err("front matter is not a key-value mapping".to_string()),
    }
}

/// JSON view of the string-keyed entries. Lossy for values JSON cannot hold (`.nan`, tags).
fn metadata_view(mapping: &Mapping) -> Metadata {
    mapping
        .iter()
        .filter_map(|(key, value)| {
            let key = key.as_str()?;
            Some((key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null)))
        })
        .collect()
}

/// Parse a front-matter block into a key-value view
pub fn parse_metadata(block: &str) -> Result<Metadata, String> {
    parse_mapping(block).map(|mapping| metadata_view(&mapping))
}

/// Copy the keys the mutator added, changed or removed back into the YAML mapping.
///
/// Untouched entries keep their original YAML value.
fn merge_changes(mapping: &mut Mapping, before: &Metadata, after: &Metadata) -> Result<(), String> {
    for key in before.keys().filter(|key| !after.contains_key(key.as_str())) {
        mapping.remove(key.as_str());
    }
    for (key, value) in after {
        if before.get(key) != Some(value) {
            let value = serde_yaml::to_value(value).map_err(|e| e.to_string())?;
            mapping.insert(YamlValue::String(key.clone()), value);
        }
    }
    Ok(())
}

fn render_document(mapping: &Mapping, body: &str) -> Result<String, String> {
    let yaml = serde_yaml::to_string(mapping).map_err(|e| e.to_string())?;
    Ok(format!("---\n{}---\n{}", yaml, body))
}

/// Set the mtime of a freshly written file; failures only cost the restore
fn restore_mtime(path: &str, absolute: &Path, mtime: i64) -> bool {
    let restored = OpenOptions::new()
        .write(true)
        .open(absolute)
        .and_then(|file| file.set_modified(millis_to_system_time(mtime)));
    match restored {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("Failed to restore modification time of {}: {}", path, err);
            false
        }
    }
}

pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

pub fn millis_to_system_time(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

/// A directory of markdown documents on the local filesystem
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Vault-relative `/`-separated path for an absolute path inside the vault
    pub fn to_vault_path(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }
}

impl ContentStore for FsVault {
    fn read(&self, path: &str) -> Result<String, VaultError> {
        fs::read_to_string(self.absolute(path)).map_err(|e| VaultError::io(path, e))
    }

    fn is_file(&self, path: &str) -> bool {
        self.absolute(path).is_file()
    }

    fn list_documents(&self) -> Result<Vec<String>, VaultError> {
        let mut documents = Vec::new();

        for result in WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build()
        {
            match result {
                Ok(entry) => {
                    let path = entry.path();
                    let is_document = path.is_file()
                        && path.extension().and_then(|s| s.to_str()) == Some(DOCUMENT_EXTENSION);
                    if is_document {
                        if let Some(vault_path) = self.to_vault_path(path) {
                            documents.push(vault_path);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("Error walking vault: {}", err);
                }
            }
        }

        documents.sort();
        Ok(documents)
    }
}

impl StatProvider for FsVault {
    fn stat(&self, path: &str) -> Result<FileStat, VaultError> {
        let metadata = fs::metadata(self.absolute(path)).map_err(|e| VaultError::io(path, e))?;
        let modified = metadata.modified().map_err(|e| VaultError::io(path, e))?;
        // Birth time is not available everywhere
        let created = metadata.created().unwrap_or(modified);
        Ok(FileStat {
            mtime: system_time_to_millis(modified),
            ctime: system_time_to_millis(created),
        })
    }
}

impl MetadataStore for FsVault {
    fn apply_mutation(
        &self,
        path: &str,
        stat_hint: FileStat,
        mutator: &mut dyn FnMut(&mut Metadata),
    ) -> Result<bool, VaultError> {
        let absolute = self.absolute(path);
        let raw = fs::read_to_string(&absolute).map_err(|e| VaultError::io(path, e))?;
        let (block, body) = split_front_matter(&raw);

        let structural = |message: String| VaultError::Structural {
            path: path.to_string(),
            message,
        };
        let mut mapping = parse_mapping(block.unwrap_or_default()).map_err(structural)?;
        let before = metadata_view(&mapping);
        let mut metadata = before.clone();

        mutator(&mut metadata);
        if metadata == before {
            return Ok(false);
        }

        merge_changes(&mut mapping, &before, &metadata).map_err(structural)?;
        let rendered = render_document(&mapping, body).map_err(structural)?;
        fs::write(&absolute, rendered).map_err(|e| VaultError::io(path, e))?;

        // Keep the original mtime so the rewrite is not seen as a content edit
        restore_mtime(path, &absolute, stat_hint.mtime);

        tracing::info!("Updated front matter of {}", path);
        Ok(true)
    }
}
