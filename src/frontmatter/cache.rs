use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::types::{ParseResult, PromptMetadata};

/// Parsed state of one file at a given mtime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: PromptMetadata,
    pub content: String,
    /// mtime in milliseconds since the epoch at parse time
    pub last_modified: u64,
    pub file_path: PathBuf,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CacheEntry {
    pub fn from_result(path: &Path, last_modified: u64, result: &ParseResult) -> Self {
        Self {
            metadata: result.metadata.clone(),
            content: result.content.clone(),
            last_modified,
            file_path: path.to_path_buf(),
            errors: result.errors.clone(),
            warnings: result.warnings.clone(),
        }
    }

    pub fn to_result(&self) -> ParseResult {
        ParseResult {
            success: self.errors.is_empty(),
            metadata: self.metadata.clone(),
            content: self.content.clone(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Parse cache keyed by absolute path. An entry is only ever served when its
/// stored mtime equals the file's current mtime; otherwise it is replaced.
#[derive(Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path, mtime_ms: u64) -> Option<CacheEntry> {
        let hit = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(path).cloned())
            .filter(|entry| entry.last_modified == mtime_ms);

        match hit {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, entry: CacheEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.file_path.clone(), entry);
        }
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(path);
        }
    }

    /// Drop entries for `dir` and everything beneath it.
    pub fn invalidate_under(&self, dir: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|path, _| !path.starts_with(dir));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

pub fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// mtime in ms, `None` where the platform does not report one.
pub fn mtime_ms(metadata: &Metadata) -> Option<u64> {
    metadata.modified().ok().map(system_time_ms)
}
