use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SortDirection, SortField};
use crate::frontmatter::types::PromptMetadata;
use crate::patterns::relative_key;

/// Stable prompt identity: the path relative to the library root, with `/`
/// separators. Two distinct paths under one root never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptId(String);

impl PromptId {
    /// `None` when `path` is not strictly under `root`.
    pub fn from_path(root: &Path, path: &Path) -> Option<Self> {
        match relative_key(root, path) {
            Some(rel) if !rel.is_empty() => Some(Self(rel)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PromptId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Live state of one prompt document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: PromptId,
    pub file_path: PathBuf,
    pub file_name: String,
    pub metadata: PromptMetadata,
    pub content: String,
    pub last_modified: DateTime<Utc>,
    pub is_valid: bool,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default)]
    pub validation_warnings: Vec<String>,
}

impl Prompt {
    fn matches_text(&self, needle: &str) -> bool {
        let m = &self.metadata;
        m.title.to_lowercase().contains(needle)
            || m.description
                .as_deref()
                .map(|d| d.to_lowercase().contains(needle))
                .unwrap_or(false)
            || self.content.to_lowercase().contains(needle)
            || m.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

/// Search criteria; every populated field must hold (logical AND).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilter {
    /// Case-insensitive substring over title, description, body and tags.
    pub query: Option<String>,
    pub category: Option<String>,
    /// Matches when the prompt carries at least one of these tags.
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub has_parameters: Option<bool>,
}

impl SearchFilter {
    pub fn matches(&self, prompt: &Prompt) -> bool {
        let m = &prompt.metadata;

        if let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            if !prompt.matches_text(&query.to_lowercase()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if m.category.as_ref() != Some(category) {
                return false;
            }
        }
        if !self.tags.is_empty() && !m.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if let Some(author) = &self.author {
            if m.author.as_ref() != Some(author) {
                return false;
            }
        }
        if let Some(after) = self.modified_after {
            if prompt.last_modified < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if prompt.last_modified > before {
                return false;
            }
        }
        if let Some(wanted) = self.has_parameters {
            if m.has_parameters() != wanted {
                return false;
            }
        }
        true
    }
}

fn compare_text(a: Option<&str>, b: Option<&str>) -> Ordering {
    let a = a.unwrap_or("").to_lowercase();
    let b = b.unwrap_or("").to_lowercase();
    a.cmp(&b)
}

/// Order two prompts by `field`; the id breaks ties so the order is total.
pub fn compare_prompts(a: &Prompt, b: &Prompt, field: SortField, direction: SortDirection) -> Ordering {
    let primary = match field {
        SortField::Title => compare_text(Some(&a.metadata.title), Some(&b.metadata.title)),
        SortField::Modified => a.last_modified.cmp(&b.last_modified),
        SortField::Category => {
            compare_text(a.metadata.category.as_deref(), b.metadata.category.as_deref())
        }
        SortField::Author => compare_text(a.metadata.author.as_deref(), b.metadata.author.as_deref()),
    };
    let ordered = primary.then_with(|| a.id.cmp(&b.id));
    match direction {
        SortDirection::Asc => ordered,
        SortDirection::Desc => ordered.reverse(),
    }
}

pub fn sort_prompts(prompts: &mut [Prompt], field: SortField, direction: SortDirection) {
    prompts.sort_by(|a, b| compare_prompts(a, b, field, direction));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prompt(id: &str, title: &str, category: Option<&str>, tags: &[&str]) -> Prompt {
        let mut metadata = PromptMetadata::titled(title);
        metadata.category = category.map(str::to_string);
        metadata.tags = tags.iter().map(|t| t.to_string()).collect();
        Prompt {
            id: PromptId::from(id),
            file_path: PathBuf::from("/vault").join(id),
            file_name: id.to_string(),
            metadata,
            content: String::new(),
            last_modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            is_valid: true,
            validation_errors: vec![],
            validation_warnings: vec![],
        }
    }

    #[test]
    fn test_id_is_relative_path() {
        let root = Path::new("/vault");
        let id = PromptId::from_path(root, Path::new("/vault/team/a.md")).unwrap();
        assert_eq!(id.as_str(), "team/a.md");
        assert_eq!(id.to_path(root), PathBuf::from("/vault/team/a.md"));
        assert!(PromptId::from_path(root, Path::new("/elsewhere/a.md")).is_none());
        assert!(PromptId::from_path(root, root).is_none());
    }

    #[test]
    fn test_ids_do_not_collide() {
        let root = Path::new("/vault");
        let a = PromptId::from_path(root, Path::new("/vault/a-b.md")).unwrap();
        let b = PromptId::from_path(root, Path::new("/vault/a/b.md")).unwrap();
        let c = PromptId::from_path(root, Path::new("/vault/a_b.md")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_filter_is_intersection() {
        let both = prompt("a.md", "A", Some("general"), &["x"]);
        let category_only = prompt("b.md", "B", Some("general"), &["y"]);
        let tag_only = prompt("c.md", "C", Some("other"), &["x"]);

        let filter = SearchFilter {
            category: Some("general".to_string()),
            tags: vec!["x".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&both));
        assert!(!filter.matches(&category_only));
        assert!(!filter.matches(&tag_only));
    }

    #[test]
    fn test_query_is_case_insensitive() {
        let mut p = prompt("a.md", "Code Review", None, &["Rust"]);
        p.content = "Check the DIFF carefully".to_string();
        for query in ["review", "rust", "diff", "CODE"] {
            let filter = SearchFilter {
                query: Some(query.to_string()),
                ..Default::default()
            };
            assert!(filter.matches(&p), "query {query}");
        }
    }

    #[test]
    fn test_modified_range_is_inclusive() {
        let p = prompt("a.md", "A", None, &[]);
        let filter = SearchFilter {
            modified_after: Some(p.last_modified),
            modified_before: Some(p.last_modified),
            ..Default::default()
        };
        assert!(filter.matches(&p));
    }

    #[test]
    fn test_sort_is_case_insensitive_with_id_tiebreak() {
        let mut prompts = vec![
            prompt("c.md", "beta", None, &[]),
            prompt("b.md", "Alpha", None, &[]),
            prompt("a.md", "Beta", None, &[]),
        ];
        sort_prompts(&mut prompts, SortField::Title, SortDirection::Asc);
        let ids: Vec<&str> = prompts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b.md", "a.md", "c.md"]);

        sort_prompts(&mut prompts, SortField::Title, SortDirection::Desc);
        let ids: Vec<&str> = prompts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c.md", "a.md", "b.md"]);
    }

    /// Test: folding covers non-ASCII letters; order beyond that is code point
    #[test]
    fn test_sort_folds_non_ascii_case() {
        let mut prompts = vec![
            prompt("z.md", "Zebra", None, &[]),
            prompt("b.md", "éclair", None, &[]),
            prompt("a.md", "Éclair", None, &[]),
        ];
        sort_prompts(&mut prompts, SortField::Title, SortDirection::Asc);
        let ids: Vec<&str> = prompts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["z.md", "a.md", "b.md"]);
    }
}
