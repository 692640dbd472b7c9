use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::FileMatcher;
use crate::error::{PromptError, Result};
use crate::logging::Logger;

/// Traversal limits for [`scan_directory`].
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub max_depth: usize,
    pub follow_symlinks: bool,
}

impl ScanOptions {
    /// Limits for scanning a subdirectory `depth` levels below the root, or
    /// `None` when that directory is already past `max_depth`.
    pub fn below(self, depth: usize) -> Option<Self> {
        if depth > self.max_depth {
            return None;
        }
        Some(Self {
            max_depth: self.max_depth - depth,
            ..self
        })
    }
}

/// Collect every recognized prompt file under `root`.
///
/// Walks with an explicit stack; excluded directories are pruned before they
/// are opened. Unreadable subdirectories are logged and skipped, only an
/// unreadable root is an error. Results are sorted for stable output.
pub async fn scan_directory(
    root: &Path,
    matcher: &FileMatcher,
    options: ScanOptions,
    logger: &Logger,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    if options.follow_symlinks {
        if let Ok(canonical) = tokio::fs::canonicalize(root).await {
            visited.insert(canonical);
        }
    }

    while let Some((dir, depth)) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(PromptError::io(root, e)),
            Err(e) => {
                logger.warn(format_args!(
                    "[scan_directory] skipping unreadable directory {}: {}",
                    dir.display(),
                    e
                ));
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    logger.warn(format_args!(
                        "[scan_directory] error reading {}: {}",
                        dir.display(),
                        e
                    ));
                    break;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    logger.debug(format_args!(
                        "[scan_directory] cannot stat {}: {}",
                        path.display(),
                        e
                    ));
                    continue;
                }
            };

            let (is_dir, is_file) = if file_type.is_symlink() {
                if !options.follow_symlinks {
                    continue;
                }
                match tokio::fs::metadata(&path).await {
                    Ok(target) => (target.is_dir(), target.is_file()),
                    // Dangling link
                    Err(_) => continue,
                }
            } else {
                (file_type.is_dir(), file_type.is_file())
            };

            if is_dir {
                if depth >= options.max_depth || matcher.is_excluded_dir(&path) {
                    continue;
                }
                if options.follow_symlinks {
                    // Guard against link cycles.
                    match tokio::fs::canonicalize(&path).await {
                        Ok(canonical) => {
                            if !visited.insert(canonical) {
                                continue;
                            }
                        }
                        Err(_) => continue,
                    }
                }
                stack.push((path, depth + 1));
            } else if is_file && matcher.is_prompt_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptConfig;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> ScanOptions {
        ScanOptions {
            max_depth: 10,
            follow_symlinks: false,
        }
    }

    #[tokio::test]
    async fn test_collects_recognized_files_and_prunes_excluded() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("team/deep")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".obsidian")).unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("notes.txt"), "skip").unwrap();
        fs::write(root.join("team/b.markdown"), "b").unwrap();
        fs::write(root.join("team/deep/c.md"), "c").unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "x").unwrap();
        fs::write(root.join(".obsidian/workspace.md"), "x").unwrap();

        let matcher = PromptConfig::with_root(root).matcher().unwrap();
        let found = scan_directory(root, &matcher, options(), &Logger::default())
            .await
            .unwrap();

        assert_eq!(
            found,
            vec![
                root.join("a.md"),
                root.join("team/b.markdown"),
                root.join("team/deep/c.md"),
            ]
        );
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("one/two")).unwrap();
        fs::write(root.join("one/a.md"), "a").unwrap();
        fs::write(root.join("one/two/b.md"), "b").unwrap();

        let matcher = PromptConfig::with_root(root).matcher().unwrap();
        let shallow = ScanOptions {
            max_depth: 1,
            follow_symlinks: false,
        };
        let found = scan_directory(root, &matcher, shallow, &Logger::default())
            .await
            .unwrap();
        assert_eq!(found, vec![root.join("one/a.md")]);
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("missing");
        let matcher = PromptConfig::with_root(&root).matcher().unwrap();
        let result = scan_directory(&root, &matcher, options(), &Logger::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_depth_remaining_below_root() {
        let options = ScanOptions {
            max_depth: 3,
            follow_symlinks: false,
        };
        assert_eq!(options.below(1).map(|o| o.max_depth), Some(2));
        assert_eq!(options.below(3).map(|o| o.max_depth), Some(0));
        assert!(options.below(4).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_cycle_is_walked_once() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("team")).unwrap();
        fs::write(root.join("team/a.md"), "a").unwrap();
        std::os::unix::fs::symlink(&root, root.join("team/loop")).unwrap();

        let matcher = PromptConfig::with_root(&root).matcher().unwrap();
        let following = ScanOptions {
            max_depth: 10,
            follow_symlinks: true,
        };
        let found = scan_directory(&root, &matcher, following, &Logger::default())
            .await
            .unwrap();
        assert_eq!(found, vec![root.join("team/a.md")]);
    }
}
