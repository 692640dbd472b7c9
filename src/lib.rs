//! Indexing core for a library of Markdown prompt documents.
//!
//! A [`PromptManager`] keeps an in-memory index of every prompt under one
//! root directory, kept current by a debounced file watcher, and performs
//! atomic writes back to disk.

pub mod config;
pub mod error;
pub mod events;
pub mod frontmatter;
pub mod logging;
pub mod patterns;
pub mod prompts;
pub mod watcher;


#[cfg(test)]
mod watch_pipeline_test;

pub use config::{ConfigPatch, PromptConfig, SortDirection, SortField, WatchConfig};
pub use error::{PromptError, Result};
pub use events::{Emitter, Subscription};
pub use frontmatter::types::{ParseResult, PromptMetadata, PromptParameter};
pub use frontmatter::MetadataParser;
pub use logging::Logger;
pub use prompts::{Prompt, PromptId, PromptManager, SearchFilter};
pub use watcher::{PathWatcher, WatchSession, WatcherEvent, WatcherEventKind};
