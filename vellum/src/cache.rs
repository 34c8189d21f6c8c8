//! The cache store for compiled fragments
//!
//! Entries are flat files named `<view name>.compiled.vlm` directly under
//! the cache root. An entry is valid for as long as it exists: source edits
//! never invalidate it, only [`CacheStore::clear`] does.

use crate::error::{Result, StorageAction, ViewError};
use crate::resolver::ViewName;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing::{debug, info};

/// File name suffix of every cache entry
pub const COMPILED_SUFFIX: &str = ".compiled.vlm";

/// Directory of compiled fragments, keyed by view name
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Where the entry for `name` lives, whether or not it exists
    pub fn entry_path(&self, name: &ViewName) -> Utf8PathBuf {
        self.root.join(format!("{}{COMPILED_SUFFIX}", name.as_str()))
    }

    /// The entry for `name`, if one has been persisted
    pub fn lookup(&self, name: &ViewName) -> Option<Utf8PathBuf> {
        let path = self.entry_path(name);
        if path.is_file() {
            debug!(view = %name, %path, "cache hit");
            Some(path)
        } else {
            debug!(view = %name, %path, "cache miss");
            None
        }
    }

    /// Write the compiled fragment for `name`, creating the root if needed
    pub fn persist(&self, name: &ViewName, fragment: &str) -> Result<Utf8PathBuf> {
        fs::create_dir_all(&self.root)
            .map_err(|e| ViewError::storage(StorageAction::CreateDir, &self.root, e))?;
        let path = self.entry_path(name);
        fs::write(&path, fragment)
            .map_err(|e| ViewError::storage(StorageAction::Write, &path, e))?;
        debug!(view = %name, %path, bytes = fragment.len(), "persisted compiled view");
        Ok(path)
    }

    /// Remove every entry, returning how many were removed.
    ///
    /// Other files and subdirectories are left alone.
    pub fn clear(&self) -> Result<usize> {
        let entries = self
            .root
            .read_dir_utf8()
            .map_err(|e| ViewError::storage(StorageAction::ListDir, &self.root, e))?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ViewError::storage(StorageAction::ListDir, &self.root, e))?;
            if !entry.file_name().ends_with(COMPILED_SUFFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| ViewError::storage(StorageAction::Read, entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            fs::remove_file(entry.path())
                .map_err(|e| ViewError::storage(StorageAction::Remove, entry.path(), e))?;
            removed += 1;
        }

        info!(root = %self.root, removed, "cleared view cache");
        Ok(removed)
    }
}
