//! Configuration consumed by the core.
//!
//! The host owns these settings (a settings UI, a JSON file, …); the core only
//! reads them and reacts when they change through [`ConfigPatch`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PromptError, Result};
use crate::patterns::{relative_key, PatternSet};

/// Debounce window applied to "changed" events
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Poll interval when native watching is unavailable (network drives)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Title,
    Modified,
    Category,
    Author,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    /// Extra ignore globs on top of the built-in ones (dotfiles, editor
    /// temp/backup files, version-control directories).
    pub ignore_patterns: Vec<String>,
    pub use_polling: bool,
    pub polling_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_depth: DEFAULT_MAX_DEPTH,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            use_polling: false,
            polling_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptConfig {
    pub root_directory: PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub sort_by: SortField,
    pub sort_direction: SortDirection,
    /// Author stamped on prompts created through `create_prompt`.
    pub default_author: Option<String>,
    pub watch: WatchConfig,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("prompts"),
            include_patterns: vec!["**/*.md".to_string(), "**/*.markdown".to_string()],
            exclude_patterns: vec![
                "node_modules".to_string(),
                ".git".to_string(),
                "**/.*/**".to_string(),
            ],
            sort_by: SortField::default(),
            sort_direction: SortDirection::default(),
            default_author: None,
            watch: WatchConfig::default(),
        }
    }
}

impl PromptConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PromptError::io(path, e))?;
        Self::from_json(&content).map_err(|e| {
            PromptError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    pub fn matcher(&self) -> Result<FileMatcher> {
        FileMatcher::new(&self.root_directory, &self.include_patterns, &self.exclude_patterns)
    }

    /// Merge a partial update, reporting what kind of change happened.
    pub fn apply(&mut self, patch: ConfigPatch) -> ConfigChange {
        let before = self.clone();

        if let Some(root) = patch.root_directory {
            self.root_directory = root;
        }
        if let Some(include) = patch.include_patterns {
            self.include_patterns = include;
        }
        if let Some(exclude) = patch.exclude_patterns {
            self.exclude_patterns = exclude;
        }
        if let Some(field) = patch.sort_by {
            self.sort_by = field;
        }
        if let Some(direction) = patch.sort_direction {
            self.sort_direction = direction;
        }
        if let Some(author) = patch.default_author {
            self.default_author = author;
        }
        if let Some(enabled) = patch.watch_enabled {
            self.watch.enabled = enabled;
        }
        if let Some(ms) = patch.debounce_ms {
            self.watch.debounce_ms = ms;
        }
        if let Some(depth) = patch.max_depth {
            self.watch.max_depth = depth;
        }
        if let Some(follow) = patch.follow_symlinks {
            self.watch.follow_symlinks = follow;
        }
        if let Some(ignore) = patch.ignore_patterns {
            self.watch.ignore_patterns = ignore;
        }
        if let Some(polling) = patch.use_polling {
            self.watch.use_polling = polling;
        }
        if let Some(ms) = patch.polling_interval_ms {
            self.watch.polling_interval_ms = ms;
        }

        ConfigChange {
            root: before.root_directory != self.root_directory,
            patterns: before.include_patterns != self.include_patterns
                || before.exclude_patterns != self.exclude_patterns,
            sort: before.sort_by != self.sort_by || before.sort_direction != self.sort_direction,
            watch: before.watch != self.watch,
        }
    }
}

/// Partial configuration update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub root_directory: Option<PathBuf>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub sort_by: Option<SortField>,
    pub sort_direction: Option<SortDirection>,
    pub default_author: Option<Option<String>>,
    pub watch_enabled: Option<bool>,
    pub debounce_ms: Option<u64>,
    pub max_depth: Option<usize>,
    pub follow_symlinks: Option<bool>,
    pub ignore_patterns: Option<Vec<String>>,
    pub use_polling: Option<bool>,
    pub polling_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigChange {
    pub root: bool,
    pub patterns: bool,
    pub sort: bool,
    pub watch: bool,
}

impl ConfigChange {
    /// The on-disk view must be rebuilt (and the watcher restarted).
    pub fn needs_reload(&self) -> bool {
        self.root || self.patterns
    }

    pub fn needs_watch_restart(&self) -> bool {
        self.root || self.patterns || self.watch
    }
}

/// Decides which files under the root are prompt documents.
#[derive(Debug, Clone)]
pub struct FileMatcher {
    root: PathBuf,
    include: PatternSet,
    exclude: PatternSet,
}

impl FileMatcher {
    pub fn new(root: &Path, include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            include: PatternSet::compile(include)?,
            exclude: PatternSet::compile(exclude)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Recognized document: included, not excluded, under the root.
    pub fn is_prompt_file(&self, path: &Path) -> bool {
        match relative_key(&self.root, path) {
            Some(rel) if !rel.is_empty() => {
                self.include.is_match(&rel) && !self.exclude.is_match(&rel)
            }
            _ => false,
        }
    }

    /// Directory that must not be descended into.
    pub fn is_excluded_dir(&self, path: &Path) -> bool {
        match relative_key(&self.root, path) {
            Some(rel) if !rel.is_empty() => self.exclude.is_match(&rel),
            _ => false,
        }
    }
}
