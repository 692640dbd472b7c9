pub mod cache;
pub mod schemas;
pub mod types;

use std::path::Path;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PromptError, Result};
use crate::logging::Logger;
use cache::{mtime_ms, CacheEntry, CacheStats, MetadataCache};
use schemas::ADVISORY_VALIDATOR;
use types::{ParseResult, PromptMetadata};

/// Exact line that opens and closes the metadata block.
pub const DELIMITER: &str = "---";

static TITLE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_\-.]+").unwrap());

/// Split a document into `(metadata block, body)`.
///
/// The block is recognized only when the very first line is exactly the
/// delimiter and a later line is exactly the delimiter too. One blank line
/// right after the closing delimiter belongs to the separator, not the body.
pub fn split_document(raw: &str) -> Option<(&str, &str)> {
    let first_end = raw.find('\n')?;
    if strip_cr(&raw[..first_end]) != DELIMITER {
        return None;
    }

    let block_start = first_end + 1;
    let mut line_start = block_start;
    while line_start <= raw.len() {
        let line_end = raw[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(raw.len());

        if strip_cr(&raw[line_start..line_end]) == DELIMITER {
            let block = &raw[block_start..line_start];
            let mut body = if line_end < raw.len() {
                &raw[line_end + 1..]
            } else {
                ""
            };
            if let Some(rest) = body.strip_prefix("\r\n") {
                body = rest;
            } else if let Some(rest) = body.strip_prefix('\n') {
                body = rest;
            }
            return Some((block, body));
        }

        if line_end == raw.len() {
            break;
        }
        line_start = line_end + 1;
    }
    None
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Derive a display title from a file name: `my_api-prompt.md` → `My Api Prompt`.
pub fn title_from_file_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    TITLE_SEPARATORS
        .split(&stem)
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outcome of `parse_file`: the parse plus the mtime it corresponds to.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub result: ParseResult,
    pub last_modified: SystemTime,
    pub from_cache: bool,
}

pub struct MetadataParser {
    cache: MetadataCache,
    logger: Logger,
}

impl MetadataParser {
    pub fn new(logger: Logger) -> Self {
        Self {
            cache: MetadataCache::new(),
            logger: logger.scoped("promptshelf::frontmatter"),
        }
    }

    /// Parse raw text that has no file behind it (no title fallback).
    pub fn parse_content(&self, raw: &str) -> ParseResult {
        Self::parse_document(raw, None)
    }

    /// Parse one file, serving the cached parse when the mtime is unchanged.
    ///
    /// Only I/O failures are errors; malformed metadata is reported inside
    /// the returned [`ParseResult`].
    pub async fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| PromptError::io(path, e))?;
        let last_modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        let stamp = mtime_ms(&metadata);

        if let Some(ms) = stamp {
            if let Some(entry) = self.cache.get(path, ms) {
                self.logger
                    .debug(format_args!("[parse_file] cache hit: {}", path.display()));
                return Ok(ParsedFile {
                    result: entry.to_result(),
                    last_modified,
                    from_cache: true,
                });
            }
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PromptError::io(path, e))?;
        let raw = String::from_utf8_lossy(&bytes);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let result = Self::parse_document(&raw, Some(&file_name));
        if !result.errors.is_empty() {
            self.logger.warn(format_args!(
                "[parse_file] {} loaded with errors: {}",
                path.display(),
                result.errors.join("; ")
            ));
        }

        if let Some(ms) = stamp {
            self.cache.insert(CacheEntry::from_result(path, ms, &result));
        }

        Ok(ParsedFile {
            result,
            last_modified,
            from_cache: false,
        })
    }

    /// Parse a whole document, defaulting the title from `file_name`.
    pub fn parse_document(raw: &str, file_name: Option<&str>) -> ParseResult {
        let mut errors = Vec::new();

        let (mut metadata, content) = match split_document(raw) {
            Some((block, body)) => (Self::parse_block(block, &mut errors), body.to_string()),
            None => (PromptMetadata::default(), raw.to_string()),
        };

        if metadata.title.trim().is_empty() {
            metadata.title = file_name.map(title_from_file_name).unwrap_or_default();
        }

        let (mut blocking, warnings) = Self::validate(&metadata);
        errors.append(&mut blocking);

        ParseResult {
            success: errors.is_empty(),
            metadata,
            content,
            errors,
            warnings,
        }
    }

    fn parse_block(block: &str, errors: &mut Vec<String>) -> PromptMetadata {
        let value = match serde_yaml::from_str::<serde_yaml::Value>(block) {
            Ok(value) => value,
            Err(e) => {
                errors.push(format!("Invalid metadata block: {}", e));
                return PromptMetadata::default();
            }
        };
        if value.is_null() {
            return PromptMetadata::default();
        }
        match serde_yaml::from_value::<PromptMetadata>(value) {
            Ok(metadata) => metadata,
            Err(e) => {
                errors.push(format!("Invalid metadata block: {}", e));
                PromptMetadata::default()
            }
        }
    }

    /// Validate metadata, returning `(errors, warnings)`.
    ///
    /// A missing title is the only blocking rule. Everything else is advisory.
    pub fn validate(metadata: &PromptMetadata) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if metadata.title.trim().is_empty() {
            errors.push("Title is required".to_string());
        }

        match serde_json::to_value(metadata) {
            Ok(json_value) => match ADVISORY_VALIDATOR.as_ref() {
                Ok(validator) => {
                    if let Err(validation_errors) = validator.validate(&json_value) {
                        for error in validation_errors {
                            let path = error.instance_path.to_string();
                            let field = if path.is_empty() { "/".to_string() } else { path };
                            warnings.push(format!("{}: {}", field, error));
                        }
                    }
                }
                Err(e) => warnings.push(format!("Metadata schema unavailable: {}", e)),
            },
            Err(e) => warnings.push(format!("Metadata could not be checked: {}", e)),
        }

        let mut seen = std::collections::HashSet::new();
        for param in &metadata.parameters {
            if !seen.insert(param.name.as_str()) {
                warnings.push(format!("Duplicate parameter name: {}", param.name));
            }
        }

        (errors, warnings)
    }

    /// Render metadata and body back into a document.
    pub fn serialize(metadata: &PromptMetadata, body: &str) -> Result<String> {
        let yaml = serde_yaml::to_string(metadata)?;
        Ok(format!("{}\n{}{}\n\n{}", DELIMITER, yaml, DELIMITER, body))
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.invalidate(path);
    }

    pub fn invalidate_under(&self, dir: &Path) {
        self.cache.invalidate_under(dir);
    }

    /// Force every file to be re-read on its next parse.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.logger.debug(format_args!("[clear_cache] metadata cache cleared"));
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
