//! Filesystem side of the index: atomic publish, cleanup, naming, and the
//! per-path write locks.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::error::{PromptError, Result};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

static DISALLOWED_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s_-]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static REPEATED_HYPHENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());

/// Sibling temp path: hidden and `.tmp`-suffixed so the watcher ignores it.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}-{}.tmp", file_name, std::process::id(), n))
}

/// Write `content` to a sibling temp file, fsync, then rename it over `path`.
/// Readers see either the old file or the new one, never a partial write.
pub async fn atomic_write_file(path: &Path, content: &[u8]) -> Result<()> {
    atomic_write_with(path, content, |_| Ok(())).await
}

/// [`atomic_write_file`] with a hook run between the temp write and the
/// rename. A hook error aborts the publish like any other failure.
pub async fn atomic_write_with<F>(path: &Path, content: &[u8], before_publish: F) -> Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let temp_path = temp_path_for(path);

    match write_then_rename(&temp_path, path, content, before_publish).await {
        Ok(()) => Ok(()),
        Err(source) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(PromptError::AtomicWrite {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

async fn write_then_rename<F>(
    temp_path: &Path,
    path: &Path,
    content: &[u8],
    before_publish: F,
) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let mut file = tokio::fs::File::create(temp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    before_publish(temp_path)?;
    tokio::fs::rename(temp_path, path).await
}

/// Remove empty directories from `start` upward, stopping at `root`, which is
/// never removed. Stops at the first non-empty or unremovable directory.
pub async fn remove_empty_ancestors(start: &Path, root: &Path) {
    let mut current = start.to_path_buf();
    while current != root && current.starts_with(root) {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        if !matches!(entries.next_entry().await, Ok(None)) {
            return;
        }
        if tokio::fs::remove_dir(&current).await.is_err() {
            return;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return,
        }
    }
}

/// File-system-safe name: drop disallowed characters, whitespace runs become
/// one hyphen, lowercase. `"My Prompt!"` → `"my-prompt"`.
pub fn slugify(name: &str) -> String {
    let cleaned = DISALLOWED_CHARS.replace_all(name.trim(), "");
    let hyphenated = WHITESPACE.replace_all(cleaned.trim(), "-");
    let collapsed = REPEATED_HYPHENS.replace_all(&hyphenated, "-");
    collapsed.trim_matches('-').to_lowercase()
}

/// One async mutex per file path, so saves and deletes of the same file are
/// serialized while different files proceed concurrently.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &Path) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = match self.locks.lock() {
            Ok(mut locks) => {
                // Forget locks nobody holds or waits on.
                locks.retain(|_, l| Arc::strong_count(l) > 1);
                Arc::clone(locks.entry(path.to_path_buf()).or_default())
            }
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Prompt"), "my-prompt");
        assert_eq!(slugify("  Code   Review: v2!  "), "code-review-v2");
        assert_eq!(slugify("snake_case-ok"), "snake_case-ok");
        assert_eq!(slugify("???"), "");
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, "old").unwrap();

        atomic_write_file(&path, b"new").await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_write_leaves_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, "original bytes").unwrap();

        let mut seen_temp = None;
        let err = atomic_write_with(&path, b"replacement", |temp| {
            assert!(temp.exists());
            seen_temp = Some(temp.to_path_buf());
            Err(io::Error::new(io::ErrorKind::Interrupted, "crash before rename"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PromptError::AtomicWrite { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original bytes");
        assert!(!seen_temp.unwrap().exists());
    }

    #[tokio::test]
    async fn test_remove_empty_ancestors_stops_at_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/keep.md"), "x").unwrap();

        remove_empty_ancestors(&root.join("a/b/c"), &root).await;
        assert!(!root.join("a/b").exists());
        assert!(root.join("a").exists());

        fs::remove_file(root.join("a/keep.md")).unwrap();
        remove_empty_ancestors(&root.join("a"), &root).await;
        assert!(!root.join("a").exists());
        assert!(root.exists());
    }

    #[tokio::test]
    async fn test_path_locks_serialize_same_path() {
        let locks = PathLocks::new();
        let path = Path::new("/vault/a.md");

        let guard = locks.lock(path).await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.lock(path),
        )
        .await;
        assert!(blocked.is_err());

        // A different path is not blocked.
        let _other = locks.lock(Path::new("/vault/b.md")).await;
        drop(guard);
        let _again = locks.lock(path).await;
    }
}
