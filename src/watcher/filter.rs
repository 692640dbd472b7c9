use std::path::{Component, Path};

use crate::error::Result;
use crate::patterns::{relative_key, PatternSet};

/// Editor swap/backup files and our own atomic-write temp files.
const BUILTIN_IGNORES: &[&str] = &[
    "**/*.tmp",
    "**/*.swp",
    "**/*.swo",
    "**/*.swx",
    "**/*.bak",
    "**/*.orig",
    "**/*~",
    "**/#*#",
    "**/.#*",
];

const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg", "CVS", "_darcs"];

/// Decides which raw filesystem paths are dropped before debouncing.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    builtin: PatternSet,
    user: PatternSet,
    max_depth: usize,
    follow_symlinks: bool,
}

impl IgnoreRules {
    pub fn new(user_patterns: &[String], max_depth: usize, follow_symlinks: bool) -> Result<Self> {
        let builtin: Vec<String> = BUILTIN_IGNORES.iter().map(|p| p.to_string()).collect();
        Ok(Self {
            builtin: PatternSet::compile(&builtin)?,
            user: PatternSet::compile(user_patterns)?,
            max_depth,
            follow_symlinks,
        })
    }

    /// Path-only checks (no filesystem access).
    pub fn is_ignored_path(&self, root: &Path, path: &Path) -> bool {
        let relative = match relative_key(root, path) {
            Some(rel) if !rel.is_empty() => rel,
            // Outside the root, or the root itself
            _ => return true,
        };

        let depth = path
            .strip_prefix(root)
            .map(|r| r.components().filter(|c| matches!(c, Component::Normal(_))).count())
            .unwrap_or(0);
        if depth > self.max_depth + 1 {
            return true;
        }

        for part in relative.split('/') {
            if part.starts_with('.') || VCS_DIRS.contains(&part) {
                return true;
            }
        }

        self.builtin.is_match(&relative) || self.user.is_match(&relative)
    }

    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        if self.is_ignored_path(root, path) {
            return true;
        }
        if !self.follow_symlinks {
            if let Ok(meta) = std::fs::symlink_metadata(path) {
                return meta.file_type().is_symlink();
            }
        }
        false
    }
}
