use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{PromptError, Result};

/// Compiled include/exclude globs, matched against root-relative paths that
/// always use `/` as separator.
#[derive(Debug, Clone)]
pub struct PatternSet {
    set: GlobSet,
    len: usize,
}

impl PatternSet {
    /// A bare name such as `node_modules` matches that entry anywhere in the
    /// tree and everything beneath it; `dir/**` also matches `dir` itself so
    /// directories can be pruned before descent.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            let mut variants = Vec::new();
            if has_glob_meta(pattern) {
                variants.push(pattern.to_string());
                if let Some(stem) = pattern.strip_suffix("/**") {
                    variants.push(stem.to_string());
                }
            } else {
                let name = pattern.trim_matches('/');
                variants.push(format!("**/{}", name));
                variants.push(format!("**/{}/**", name));
            }
            for variant in variants {
                let glob = Glob::new(&variant).map_err(|e| PromptError::Pattern {
                    pattern: pattern.to_string(),
                    source: e,
                })?;
                builder.add(glob);
            }
        }
        let set = builder.build().map_err(|e| PromptError::Pattern {
            pattern: patterns.join(", "),
            source: e,
        })?;
        Ok(Self {
            set,
            len: patterns.len(),
        })
    }

    pub fn is_match(&self, relative: &str) -> bool {
        self.len > 0 && self.set.is_match(relative)
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// `path` relative to `root`, `/`-separated, without `.` components.
/// Returns `None` when `path` is not under `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}
