use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::app::adb::apk::{is_bundle_file, is_package_file, scrape_manifest_label};
use crate::app::config::app_data_dir;
use crate::app::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShortcutKind {
    #[serde(rename = "APK")]
    SinglePackage,
    #[serde(rename = "XAPK")]
    Bundle,
}

impl ShortcutKind {
    pub fn from_path(path: &str) -> Option<Self> {
        if is_package_file(path) {
            Some(ShortcutKind::SinglePackage)
        } else if is_bundle_file(path) {
            Some(ShortcutKind::Bundle)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shortcut {
    #[serde(rename = "name")]
    pub label: String,
    #[serde(rename = "path")]
    pub source_path: String,
    #[serde(rename = "type")]
    pub kind: ShortcutKind,
}

impl Shortcut {
    /// Builds a shortcut for a file picked by the user. The kind is fixed here,
    /// from the extension, and never re-derived.
    pub fn from_file(path: &str, trace_id: &str) -> Result<Self, AppError> {
        let kind = ShortcutKind::from_path(path).ok_or_else(|| {
            AppError::validation("Shortcut must point to an .apk or .xapk file", trace_id)
        })?;
        let file_name = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        let label = match kind {
            ShortcutKind::SinglePackage => {
                scrape_manifest_label(Path::new(path)).unwrap_or(file_name)
            }
            ShortcutKind::Bundle => file_name,
        };
        Ok(Self {
            label,
            source_path: path.to_string(),
            kind,
        })
    }
}

pub fn shortcuts_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADB_MANAGER_SHORTCUTS_PATH") {
        return PathBuf::from(path);
    }
    app_data_dir().join("shortcuts.json")
}

/// Ordered shortcut list mirrored to a JSON file on every mutation.
pub struct ShortcutStore {
    path: PathBuf,
    items: Vec<Shortcut>,
}

impl ShortcutStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: Vec::new(),
        }
    }

    /// Store at `path` with its contents already loaded.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        store.restore(&Uuid::new_v4().to_string());
        store
    }

    pub fn list(&self) -> &[Shortcut] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Shortcut> {
        self.items.get(index)
    }

    /// Appends and flushes. The entry stays in memory even if the write fails.
    pub fn add(&mut self, shortcut: Shortcut, trace_id: &str) -> Result<(), AppError> {
        self.items.push(shortcut);
        self.persist(trace_id)
    }

    /// Removes the entry at `index` and flushes. The entry is gone from memory
    /// even when the write fails; the second value carries that failure.
    /// Out-of-range indices are logged and ignored.
    pub fn remove_at(
        &mut self,
        index: usize,
        trace_id: &str,
    ) -> Option<(Shortcut, Result<(), AppError>)> {
        if index >= self.items.len() {
            warn!(trace_id = %trace_id, index, len = self.items.len(), "shortcut index out of range");
            return None;
        }
        let removed = self.items.remove(index);
        let persisted = self.persist(trace_id);
        Some((removed, persisted))
    }

    pub fn persist(&self, trace_id: &str) -> Result<(), AppError> {
        let saving = |err: &dyn std::fmt::Display| {
            AppError::system(format!("Error saving shortcuts: {err}"), trace_id)
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| saving(&err))?;
        }
        let payload = serde_json::to_string(&self.items).map_err(|err| saving(&err))?;
        fs::write(&self.path, payload).map_err(|err| saving(&err))
    }

    /// Replaces the in-memory list with the file contents. A missing file is an
    /// empty list; an unreadable one is logged, left as is, and treated as empty.
    pub fn restore(&mut self, trace_id: &str) -> &[Shortcut] {
        self.items = match load_shortcuts(&self.path, trace_id) {
            Ok(items) => items,
            Err(err) => {
                warn!(trace_id = %trace_id, path = %self.path.display(), code = %err.code, error = %err.error, "ignoring shortcut file");
                Vec::new()
            }
        };
        &self.items
    }
}

pub fn load_shortcuts(path: &Path, trace_id: &str) -> Result<Vec<Shortcut>, AppError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::storage_corrupt(format!("Error loading shortcuts: {err}"), trace_id)
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        AppError::storage_corrupt(format!("Error loading shortcuts: {err}"), trace_id)
    })
}
