use std::fmt;
use std::path::{Component, Path};
use serde::Serialize;
use crate::config::Settings;
use crate::store::{parse_metadata, split_front_matter, FileRecord, DOCUMENT_EXTENSION};

/// Files another tool generates and rewrites on its own; touching their front matter breaks them
pub const RESERVED_NAMES: &[&str] = &["Canvas.md"];

/// Why a file was excluded, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IgnoreReason {
    /// The path is missing or names a folder by the time it is processed
    NotAFile,
    EmptyPath,
    UnsupportedExtension,
    ReservedName,
    IgnoredFile,
    EmptyContent,
    UnchangedContent,
    SpecializedFormat,
    IgnoredFolder,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IgnoreReason::NotAFile => "not a file",
            IgnoreReason::EmptyPath => "empty path",
            IgnoreReason::UnsupportedExtension => "not a markdown file",
            IgnoreReason::ReservedName => "reserved file name",
            IgnoreReason::IgnoredFile => "in the ignored files list",
            IgnoreReason::EmptyContent => "empty content",
            IgnoreReason::UnchangedContent => "content unchanged since last run",
            IgnoreReason::SpecializedFormat => "specialized format",
            IgnoreReason::IgnoredFolder => "in an ignored folder",
        };
        f.write_str(text)
    }
}

/// Detects documents that use the markdown extension for a format of their own
pub trait SpecializedFormat {
    fn is_specialized(&self, record: &FileRecord) -> bool;
}

impl<F> SpecializedFormat for F
where
    F: Fn(&FileRecord) -> bool,
{
    fn is_specialized(&self, record: &FileRecord) -> bool {
        self(record)
    }
}

/// Excalidraw drawings: `*.excalidraw.md` files or documents tagged with `excalidraw-plugin`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcalidrawDetector;

impl SpecializedFormat for ExcalidrawDetector {
    fn is_specialized(&self, record: &FileRecord) -> bool {
        if record.name.ends_with(".excalidraw.md") {
            return true;
        }
        match split_front_matter(&record.content) {
            (Some(block), _) => parse_metadata(block)
                .map(|metadata| metadata.contains_key("excalidraw-plugin"))
                .unwrap_or(false),
            (None, _) => false,
        }
    }
}

/// Ordered exclusion rules; the first matching rule decides
pub struct IgnorePolicy<'a> {
    settings: &'a Settings,
    specialized: Option<&'a dyn SpecializedFormat>,
}

impl<'a> IgnorePolicy<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings, specialized: None }
    }

    pub fn with_specialized(mut self, specialized: Option<&'a dyn SpecializedFormat>) -> Self {
        self.specialized = specialized;
        self
    }

    pub fn evaluate(&self, record: &FileRecord) -> Option<IgnoreReason> {
        let settings = self.settings;

        if record.path.is_empty() {
            return Some(IgnoreReason::EmptyPath);
        }
        if record.extension != DOCUMENT_EXTENSION {
            return Some(IgnoreReason::UnsupportedExtension);
        }
        if RESERVED_NAMES.contains(&record.name.as_str()) {
            return Some(IgnoreReason::ReservedName);
        }
        if settings.ignore_files.iter().any(|file| *file == record.path) {
            return Some(IgnoreReason::IgnoredFile);
        }
        if record.content.is_empty() {
            return Some(IgnoreReason::EmptyContent);
        }
        if settings.enable_experimental_hash
            && settings.file_hash_map.matches(&record.path, &record.content)
        {
            return Some(IgnoreReason::UnchangedContent);
        }
        if self.specialized.is_some_and(|detector| detector.is_specialized(record)) {
            return Some(IgnoreReason::SpecializedFormat);
        }
        if settings.is_ignored_folder(&record.path) {
            return Some(IgnoreReason::IgnoredFolder);
        }
        None
    }

    pub fn should_ignore(&self, record: &FileRecord) -> bool {
        self.evaluate(record).is_some()
    }
}

/// Cheap check for raw watcher events: markdown files outside hidden directories.
///
/// Expects a path relative to the vault root.
pub fn should_watch<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();

    let hidden = path.components().any(|component| match component {
        Component::Normal(part) => part.to_str().map_or(true, |part| part.starts_with('.')),
        _ => false,
    });
    if hidden {
        return false;
    }

    path.extension().and_then(|s| s.to_str()) == Some(DOCUMENT_EXTENSION)
}
