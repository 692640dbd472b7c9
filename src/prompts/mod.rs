pub mod scan;
pub mod store;
pub mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ConfigPatch, FileMatcher, PromptConfig, SortDirection, SortField};
use crate::error::{PromptError, Result};
use crate::events::{Emitter, Subscription};
use crate::frontmatter::cache::CacheStats;
use crate::frontmatter::types::PromptMetadata;
use crate::frontmatter::MetadataParser;
use crate::logging::Logger;
use crate::watcher::{WatchSession, WatcherEvent, WatcherEventKind};
use scan::ScanOptions;
use store::{atomic_write_file, remove_empty_ancestors, slugify, PathLocks};
pub use types::{compare_prompts, sort_prompts, Prompt, PromptId, SearchFilter};

const NEW_PROMPT_EXTENSION: &str = "md";
const NEW_PROMPT_VERSION: &str = "1.0";

#[derive(Default)]
struct IndexState {
    prompts: HashMap<PromptId, Prompt>,
    paths: HashMap<PathBuf, PromptId>,
}

impl IndexState {
    /// Returns false when an identical prompt was already stored.
    fn upsert(&mut self, prompt: Prompt) -> bool {
        if self.prompts.get(&prompt.id) == Some(&prompt) {
            return false;
        }
        self.paths.insert(prompt.file_path.clone(), prompt.id.clone());
        self.prompts.insert(prompt.id.clone(), prompt);
        true
    }

    fn remove_path(&mut self, path: &Path) -> bool {
        match self.paths.remove(path) {
            Some(id) => self.prompts.remove(&id).is_some(),
            None => false,
        }
    }

    fn remove_under(&mut self, dir: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .paths
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        doomed.iter().filter(|p| self.remove_path(p)).count()
    }

    fn replace_all(&mut self, prompts: Vec<Prompt>) {
        self.prompts.clear();
        self.paths.clear();
        for prompt in prompts {
            self.upsert(prompt);
        }
    }
}

struct Watching {
    session: WatchSession,
    apply_task: JoinHandle<()>,
    _events: Subscription,
}

impl Watching {
    fn stop(self) {
        self.session.stop();
        self.apply_task.abort();
    }
}

struct Inner {
    config: RwLock<PromptConfig>,
    /// Resolved (canonical) root; ids are relative to this path.
    root: RwLock<PathBuf>,
    state: RwLock<IndexState>,
    parser: MetadataParser,
    changes: Emitter<Vec<Prompt>>,
    watching: Mutex<Option<Watching>>,
    write_locks: PathLocks,
    initialized: AtomicBool,
    logger: Logger,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut watching) = self.watching.lock() {
            if let Some(watching) = watching.take() {
                watching.stop();
            }
        }
    }
}

/// The in-memory prompt index.
///
/// Cheap to clone; all clones share one index. Reads return owned snapshots.
/// Writes go to disk first (atomically) and then update the index, which also
/// tracks the library directory through the file watcher once initialized.
#[derive(Clone)]
pub struct PromptManager {
    inner: Arc<Inner>,
}

impl PromptManager {
    pub fn new(config: PromptConfig, logger: Logger) -> Self {
        let root = config.root_directory.clone();
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                root: RwLock::new(root),
                state: RwLock::new(IndexState::default()),
                parser: MetadataParser::new(logger.clone()),
                changes: Emitter::new(),
                watching: Mutex::new(None),
                write_locks: PathLocks::new(),
                initialized: AtomicBool::new(false),
                logger: logger.scoped("promptshelf::index"),
            }),
        }
    }

    /// Create the root if needed, start watching it and load every prompt.
    pub async fn initialize(&self) -> Result<()> {
        let configured = self.get_config().root_directory;
        self.prepare_root(&configured).await?;
        self.inner.initialized.store(true, Ordering::Release);

        // Watch first so edits made during the initial load are not lost.
        self.start_watching()?;
        let prompts = self.refresh_prompts().await?;
        self.inner.logger.info(format_args!(
            "[initialize] {} prompts loaded from {}",
            prompts.len(),
            self.root().display()
        ));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn root(&self) -> PathBuf {
        self.inner
            .root
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    // ---- reads ----

    /// Every prompt, sorted by the configured field and direction.
    pub fn get_all_prompts(&self) -> Vec<Prompt> {
        self.snapshot()
    }

    pub fn get_prompt(&self, id: &PromptId) -> Option<Prompt> {
        self.inner
            .state
            .read()
            .ok()
            .and_then(|state| state.prompts.get(id).cloned())
    }

    pub fn search_prompts(&self, filter: &SearchFilter) -> Vec<Prompt> {
        let mut found: Vec<Prompt> = match self.inner.state.read() {
            Ok(state) => state
                .prompts
                .values()
                .filter(|p| filter.matches(p))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };
        let (field, direction) = self.sort_settings();
        sort_prompts(&mut found, field, direction);
        found
    }

    pub fn get_config(&self) -> PromptConfig {
        self.inner
            .config
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.parser.cache_stats()
    }

    /// Receive the full sorted snapshot after every index mutation.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[Prompt]) + Send + Sync + 'static,
    {
        self.inner
            .changes
            .subscribe(move |prompts: &Vec<Prompt>| callback(prompts.as_slice()))
    }

    // ---- loading ----

    /// Rebuild the whole index from disk.
    pub async fn refresh_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_initialized()?;
        let root = self.root();
        let prompts = self.load_all_prompts(&root).await?;
        if let Ok(mut state) = self.inner.state.write() {
            state.replace_all(prompts);
        }
        Ok(self.notify())
    }

    /// Recognized prompt files under `root`, honoring the configured
    /// include/exclude patterns and depth.
    pub async fn scan_directory(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let config = self.get_config();
        let matcher = FileMatcher::new(root, &config.include_patterns, &config.exclude_patterns)?;
        scan::scan_directory(root, &matcher, scan_options(&config), &self.inner.logger).await
    }

    /// Parse one file under the current root into a [`Prompt`].
    pub async fn load_prompt(&self, path: &Path) -> Result<Prompt> {
        let root = self.root();
        self.load_prompt_under(&root, path).await
    }

    /// Parse every prompt under `root` concurrently. Files that fail to load
    /// are logged and left out.
    pub async fn load_all_prompts(&self, root: &Path) -> Result<Vec<Prompt>> {
        let files = self.scan_directory(root).await?;
        let mut prompts = self.load_files(root, &files).await;
        let (field, direction) = self.sort_settings();
        sort_prompts(&mut prompts, field, direction);
        Ok(prompts)
    }

    pub(crate) async fn load_files(&self, root: &Path, files: &[PathBuf]) -> Vec<Prompt> {
        let results = join_all(files.iter().map(|path| self.load_prompt_under(root, path))).await;

        let mut prompts = Vec::with_capacity(results.len());
        for (path, result) in files.iter().zip(results) {
            match result {
                Ok(prompt) => prompts.push(prompt),
                Err(e) => self.inner.logger.warn(format_args!(
                    "[load_all_prompts] skipping {}: {}",
                    path.display(),
                    e
                )),
            }
        }
        prompts
    }

    async fn load_prompt_under(&self, root: &Path, path: &Path) -> Result<Prompt> {
        let id = PromptId::from_path(root, path).ok_or_else(|| PromptError::OutsideRoot {
            path: path.to_path_buf(),
        })?;
        let parsed = self.inner.parser.parse_file(path).await?;
        let result = parsed.result;

        Ok(Prompt {
            id,
            file_path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            metadata: result.metadata,
            content: result.content,
            last_modified: DateTime::<Utc>::from(parsed.last_modified),
            is_valid: result.success,
            validation_errors: result.errors,
            validation_warnings: result.warnings,
        })
    }

    // ---- writes ----

    /// Write the prompt to its `file_path` atomically and re-index it.
    ///
    /// `metadata.modified` is stamped with the current time. Returns the
    /// prompt as re-read from disk.
    pub async fn save_prompt(&self, prompt: &Prompt) -> Result<Prompt> {
        self.ensure_initialized()?;
        let root = self.root();
        let path = self.locate(&prompt.file_path).await;
        let _guard = self.inner.write_locks.lock(&path).await;
        self.publish(&root, &path, &prompt.metadata, &prompt.content)
            .await
    }

    /// Remove a prompt file and any directories it leaves empty, up to but
    /// not including the root.
    pub async fn delete_prompt(&self, path: &Path) -> Result<()> {
        self.ensure_initialized()?;
        let root = self.root();
        let path = self.locate(path).await;
        if PromptId::from_path(&root, &path).is_none() {
            return Err(PromptError::OutsideRoot { path });
        }

        let _guard = self.inner.write_locks.lock(&path).await;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| PromptError::io(&path, e))?;
        self.inner.parser.invalidate(&path);
        if let Some(parent) = path.parent() {
            remove_empty_ancestors(parent, &root).await;
        }

        let removed = self
            .inner
            .state
            .write()
            .map(|mut state| state.remove_path(&path))
            .unwrap_or(false);
        if removed {
            self.notify();
        }
        self.inner
            .logger
            .info(format_args!("[delete_prompt] deleted {}", path.display()));
        Ok(())
    }

    /// Create `<root>/[<category>/]<slug>.md` with a minimal document.
    ///
    /// Fails with [`PromptError::DuplicateName`] before touching the
    /// filesystem when the target already exists.
    pub async fn create_prompt(&self, name: &str, category: Option<&str>) -> Result<Prompt> {
        self.ensure_initialized()?;
        let name = name.trim();
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(PromptError::InvalidName(name.to_string()));
        }

        let root = self.root();
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        let dir = match category {
            Some(category) => {
                let dir_name = slugify(category);
                if dir_name.is_empty() {
                    return Err(PromptError::InvalidName(category.to_string()));
                }
                root.join(dir_name)
            }
            None => root.clone(),
        };
        let path = dir.join(format!("{}.{}", slug, NEW_PROMPT_EXTENSION));

        let _guard = self.inner.write_locks.lock(&path).await;
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            return Err(PromptError::DuplicateName {
                name: name.to_string(),
                path,
            });
        }

        let now = Utc::now().to_rfc3339();
        let mut metadata = PromptMetadata::titled(name);
        metadata.category = category.map(str::to_string);
        metadata.author = self.get_config().default_author;
        metadata.version = Some(NEW_PROMPT_VERSION.to_string());
        metadata.created = Some(now);
        let content = format!("# {}\n\n", name);

        let created = self.publish(&root, &path, &metadata, &content).await?;
        self.inner
            .logger
            .info(format_args!("[create_prompt] created {}", created.id));
        Ok(created)
    }

    /// Serialize, write atomically, re-parse, upsert. Caller holds the path lock.
    async fn publish(
        &self,
        root: &Path,
        path: &Path,
        metadata: &PromptMetadata,
        content: &str,
    ) -> Result<Prompt> {
        if PromptId::from_path(root, path).is_none() {
            return Err(PromptError::OutsideRoot {
                path: path.to_path_buf(),
            });
        }

        let mut metadata = metadata.clone();
        metadata.modified = Some(Utc::now().to_rfc3339());
        let document = MetadataParser::serialize(&metadata, content)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PromptError::io(parent, e))?;
        }
        if let Err(e) = atomic_write_file(path, document.as_bytes()).await {
            self.inner
                .logger
                .error(format_args!("[save_prompt] {}", e));
            return Err(e);
        }

        // Same-millisecond rewrites would otherwise hit the old cache entry.
        self.inner.parser.invalidate(path);
        let saved = self.load_prompt_under(root, path).await?;
        self.upsert(saved.clone());
        Ok(saved)
    }

    // ---- configuration and lifecycle ----

    /// Merge a partial config. Reloads when the root or patterns change,
    /// restarts the watcher when watch settings change, re-sorts otherwise.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        let change = self
            .inner
            .config
            .write()
            .map(|mut config| config.apply(patch))
            .unwrap_or_default();

        if !self.is_initialized() {
            if change.root {
                let root = self.get_config().root_directory;
                if let Ok(mut current) = self.inner.root.write() {
                    *current = root;
                }
            }
            return Ok(());
        }

        if change.needs_watch_restart() {
            self.stop_watching();
        }
        if change.root {
            let configured = self.get_config().root_directory;
            self.prepare_root(&configured).await?;
        }
        if change.needs_watch_restart() {
            self.start_watching()?;
        }

        if change.needs_reload() {
            self.refresh_prompts().await?;
        } else if change.sort {
            self.notify();
        }
        Ok(())
    }

    /// Suspend watcher delivery, e.g. around a bulk write.
    pub fn pause_watching(&self) {
        if let Ok(watching) = self.inner.watching.lock() {
            if let Some(watching) = watching.as_ref() {
                watching.session.pause();
            }
        }
    }

    pub fn resume_watching(&self) {
        if let Ok(watching) = self.inner.watching.lock() {
            if let Some(watching) = watching.as_ref() {
                watching.session.resume();
            }
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .watching
            .lock()
            .map(|w| w.is_some())
            .unwrap_or(false)
    }

    /// Stop watching, drop listeners and forget all state.
    pub fn dispose(&self) {
        self.stop_watching();
        self.inner.changes.clear();
        if let Ok(mut state) = self.inner.state.write() {
            state.replace_all(Vec::new());
        }
        self.inner.parser.clear_cache();
        self.inner.initialized.store(false, Ordering::Release);
        self.inner.logger.debug(format_args!("[dispose] disposed"));
    }

    // ---- internals ----

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(PromptError::NotInitialized)
        }
    }

    async fn prepare_root(&self, configured: &Path) -> Result<()> {
        if tokio::fs::metadata(configured).await.is_err() {
            tokio::fs::create_dir_all(configured)
                .await
                .map_err(|e| PromptError::io(configured, e))?;
            self.inner.logger.info(format_args!(
                "[initialize] created prompt directory {}",
                configured.display()
            ));
        }
        let resolved = tokio::fs::canonicalize(configured)
            .await
            .unwrap_or_else(|_| configured.to_path_buf());
        if let Ok(mut root) = self.inner.root.write() {
            *root = resolved;
        }
        Ok(())
    }

    /// Map a caller-supplied path onto the resolved root (symlinked temp
    /// dirs, relative roots).
    async fn locate(&self, path: &Path) -> PathBuf {
        let root = self.root();
        if path.starts_with(&root) {
            return path.to_path_buf();
        }
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return path.to_path_buf();
        };
        match tokio::fs::canonicalize(parent).await {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        }
    }

    fn sort_settings(&self) -> (SortField, SortDirection) {
        self.inner
            .config
            .read()
            .map(|c| (c.sort_by, c.sort_direction))
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .inner
            .state
            .read()
            .map(|state| state.prompts.values().cloned().collect())
            .unwrap_or_default();
        let (field, direction) = self.sort_settings();
        sort_prompts(&mut prompts, field, direction);
        prompts
    }

    fn notify(&self) -> Vec<Prompt> {
        let snapshot = self.snapshot();
        self.inner.changes.emit(&snapshot);
        snapshot
    }

    fn upsert(&self, prompt: Prompt) {
        let changed = self
            .inner
            .state
            .write()
            .map(|mut state| state.upsert(prompt))
            .unwrap_or(false);
        if changed {
            self.notify();
        }
    }

    fn start_watching(&self) -> Result<()> {
        let mut config = self.get_config();
        if !config.watch.enabled {
            self.inner
                .logger
                .debug(format_args!("[watch] disabled by configuration"));
            return Ok(());
        }
        let root = self.root();
        config.root_directory = root.clone();

        let session = WatchSession::start(&root, &config, self.inner.logger.clone())?;
        let (tx, mut rx) = mpsc::unbounded_channel::<WatcherEvent>();
        let events = session.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });

        // Weak so a forgotten manager does not keep itself alive.
        let weak = Arc::downgrade(&self.inner);
        let apply_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                PromptManager { inner }.apply_event(event).await;
            }
        });

        let previous = match self.inner.watching.lock() {
            Ok(mut watching) => watching.replace(Watching {
                session,
                apply_task,
                _events: events,
            }),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    fn stop_watching(&self) {
        let previous = self
            .inner
            .watching
            .lock()
            .ok()
            .and_then(|mut watching| watching.take());
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// Bring the index in line with one debounced watcher event.
    async fn apply_event(&self, event: WatcherEvent) {
        let root = self.root();
        let path = event.file_path;

        match event.kind {
            WatcherEventKind::FileAdded | WatcherEventKind::FileChanged => {
                match self.load_prompt_under(&root, &path).await {
                    Ok(prompt) => self.upsert(prompt),
                    Err(e) => {
                        self.inner.logger.warn(format_args!(
                            "[watch] could not reload {}: {}",
                            path.display(),
                            e
                        ));
                        // Deleted again before we got to read it.
                        if tokio::fs::metadata(&path).await.is_err() {
                            self.forget(&path);
                        }
                    }
                }
            }
            WatcherEventKind::FileDeleted => {
                // Not a prompt we know: a directory that looked like a file went away.
                if !self.forget(&path) {
                    self.forget_under(&path);
                }
            }
            WatcherEventKind::DirectoryAdded => {
                // Files moved in with the directory may not get their own events.
                let config = self.get_config();
                let matcher =
                    match FileMatcher::new(&root, &config.include_patterns, &config.exclude_patterns) {
                        Ok(matcher) => matcher,
                        Err(e) => {
                            self.inner.logger.warn(format_args!("[watch] {}", e));
                            return;
                        }
                    };
                let depth = path
                    .strip_prefix(&root)
                    .map(|rel| rel.components().count())
                    .unwrap_or(usize::MAX);
                let Some(options) = scan_options(&config).below(depth) else {
                    return;
                };
                let files = match scan::scan_directory(&path, &matcher, options, &self.inner.logger)
                    .await
                {
                    Ok(files) => files,
                    Err(e) => {
                        self.inner.logger.debug(format_args!("[watch] {}", e));
                        return;
                    }
                };
                let prompts = self.load_files(&root, &files).await;
                let changed = self
                    .inner
                    .state
                    .write()
                    .map(|mut state| {
                        prompts
                            .into_iter()
                            .fold(false, |changed, p| state.upsert(p) || changed)
                    })
                    .unwrap_or(false);
                if changed {
                    self.notify();
                }
            }
            WatcherEventKind::DirectoryDeleted => self.forget_under(&path),
            WatcherEventKind::Error => {
                self.inner.logger.warn(format_args!(
                    "[watch] {}: {}",
                    path.display(),
                    event.details.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    fn forget(&self, path: &Path) -> bool {
        self.inner.parser.invalidate(path);
        let removed = self
            .inner
            .state
            .write()
            .map(|mut state| state.remove_path(path))
            .unwrap_or(false);
        if removed {
            self.notify();
        }
        removed
    }

    fn forget_under(&self, dir: &Path) {
        self.inner.parser.invalidate_under(dir);
        let removed = self
            .inner
            .state
            .write()
            .map(|mut state| state.remove_under(dir))
            .unwrap_or(0);
        if removed > 0 {
            self.notify();
        }
    }
}

fn scan_options(config: &PromptConfig) -> ScanOptions {
    ScanOptions {
        max_depth: config.watch.max_depth,
        follow_symlinks: config.watch.follow_symlinks,
    }
}
