pub mod debouncer;
pub mod filter;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::{PromptConfig, WatchConfig};
use crate::error::Result;
use crate::events::Subscription;
use crate::logging::Logger;
use debouncer::{Debouncer, EventDebouncer, SystemClock};
use filter::IgnoreRules;

/// Undebounced notification straight from the OS watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Add(PathBuf),
    Change(PathBuf),
    Unlink(PathBuf),
    /// Gone, and whether it was a file or a directory is unknown.
    Removed(PathBuf),
    AddDir(PathBuf),
    UnlinkDir(PathBuf),
    Error {
        kind: WatchErrorKind,
        path: Option<PathBuf>,
        message: String,
    },
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WatcherEventKind {
    FileAdded,
    FileChanged,
    FileDeleted,
    DirectoryAdded,
    DirectoryDeleted,
    Error,
}

/// Coalesced notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherEvent {
    #[serde(rename = "type")]
    pub kind: WatcherEventKind,
    pub file_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl WatcherEvent {
    pub fn new(kind: WatcherEventKind, file_path: PathBuf) -> Self {
        Self {
            kind,
            file_path,
            timestamp: Utc::now(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchErrorKind {
    /// inotify/kqueue handle limit hit; recover by polling
    ResourceExhausted,
    PermissionDenied,
    Other,
}

impl fmt::Display for WatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchErrorKind::ResourceExhausted => "resource exhausted",
            WatchErrorKind::PermissionDenied => "permission denied",
            WatchErrorKind::Other => "watcher error",
        };
        f.write_str(s)
    }
}

const ENOSPC: i32 = 28;
const EMFILE: i32 = 24;

pub fn classify_error(error: &notify::Error) -> WatchErrorKind {
    match &error.kind {
        notify::ErrorKind::MaxFilesWatch => WatchErrorKind::ResourceExhausted,
        notify::ErrorKind::Io(io) => {
            if io.kind() == std::io::ErrorKind::PermissionDenied {
                WatchErrorKind::PermissionDenied
            } else if matches!(io.raw_os_error(), Some(ENOSPC) | Some(EMFILE)) {
                WatchErrorKind::ResourceExhausted
            } else {
                WatchErrorKind::Other
            }
        }
        notify::ErrorKind::Generic(message) => {
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("access is denied") {
                WatchErrorKind::PermissionDenied
            } else if lower.contains("too many") || lower.contains("no space left") {
                WatchErrorKind::ResourceExhausted
            } else {
                WatchErrorKind::Other
            }
        }
        _ => WatchErrorKind::Other,
    }
}

// A path we can no longer stat; the debouncer decides what it was.
fn removal(path: &Path) -> RawEvent {
    RawEvent::Removed(path.to_path_buf())
}

fn appearance(path: &Path) -> RawEvent {
    if path.is_dir() {
        RawEvent::AddDir(path.to_path_buf())
    } else {
        RawEvent::Add(path.to_path_buf())
    }
}

/// Map one `notify` event onto raw add/change/unlink notifications.
pub fn translate(event: &Event) -> Vec<RawEvent> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => {
            event.paths.iter().map(|p| RawEvent::AddDir(p.clone())).collect()
        }
        EventKind::Create(CreateKind::File) => {
            event.paths.iter().map(|p| RawEvent::Add(p.clone())).collect()
        }
        EventKind::Create(_) => event.paths.iter().map(|p| appearance(p)).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(|p| removal(p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(|p| appearance(p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![removal(&event.paths[0]), appearance(&event.paths[1])]
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| if p.exists() { appearance(p) } else { removal(p) })
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| RawEvent::Change(p.clone()))
            .collect(),
        EventKind::Remove(RemoveKind::Folder) => {
            event.paths.iter().map(|p| RawEvent::UnlinkDir(p.clone())).collect()
        }
        EventKind::Remove(RemoveKind::File) => {
            event.paths.iter().map(|p| RawEvent::Unlink(p.clone())).collect()
        }
        EventKind::Remove(_) => event.paths.iter().map(|p| removal(p)).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn raw_path(event: &RawEvent) -> Option<&Path> {
    match event {
        RawEvent::Add(p)
        | RawEvent::Change(p)
        | RawEvent::Unlink(p)
        | RawEvent::Removed(p)
        | RawEvent::AddDir(p)
        | RawEvent::UnlinkDir(p) => Some(p),
        RawEvent::Error { .. } | RawEvent::Ready => None,
    }
}

// Held only to keep the OS watch registered.
#[allow(dead_code)]
enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

struct Active {
    root: PathBuf,
    tx: UnboundedSender<RawEvent>,
    backend: Backend,
}

/// OS-level observer of one root directory.
///
/// Keeps the `notify` watcher alive; dropping it (or calling [`stop`])
/// deregisters the OS watch.
///
/// [`stop`]: PathWatcher::stop
pub struct PathWatcher {
    config: WatchConfig,
    rules: Arc<IgnoreRules>,
    paused: Arc<AtomicBool>,
    degraded: AtomicBool,
    active: Mutex<Option<Active>>,
    logger: Logger,
}

impl PathWatcher {
    pub fn new(config: &WatchConfig, exclude_patterns: &[String], logger: Logger) -> Result<Self> {
        let mut patterns = config.ignore_patterns.clone();
        patterns.extend(exclude_patterns.iter().cloned());
        let rules = IgnoreRules::new(&patterns, config.max_depth, config.follow_symlinks)?;
        Ok(Self {
            config: config.clone(),
            rules: Arc::new(rules),
            paused: Arc::new(AtomicBool::new(false)),
            degraded: AtomicBool::new(false),
            active: Mutex::new(None),
            logger: logger.scoped("promptshelf::watcher"),
        })
    }

    /// Start watching `root`, tearing down any existing watch first.
    /// Returns the stream of raw notifications.
    pub fn start(&self, root: &Path) -> Result<UnboundedReceiver<RawEvent>> {
        self.stop();
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = self.create_backend(root, &tx, self.config.use_polling)?;
        let _ = tx.send(RawEvent::Ready);

        if let Ok(mut active) = self.active.lock() {
            *active = Some(Active {
                root: root.to_path_buf(),
                tx,
                backend,
            });
        }
        Ok(rx)
    }

    /// Release OS handles and close the raw stream.
    pub fn stop(&self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.take() {
                self.logger
                    .debug(format_args!("[stop] releasing watch on {}", previous.root.display()));
            }
        }
        self.degraded.store(false, Ordering::Release);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_watching(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    pub fn is_polling(&self) -> bool {
        self.active
            .lock()
            .map(|a| matches!(a.as_ref().map(|a| &a.backend), Some(Backend::Poll(_))))
            .unwrap_or(false)
    }

    /// True after a permission error: still running, possibly missing events.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub(crate) fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    /// Replace the native backend with a poller on the same root and stream.
    pub fn switch_to_polling(&self) -> Result<()> {
        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(_) => return Ok(()),
        };
        let Some(current) = active.as_mut() else {
            return Ok(());
        };
        if matches!(current.backend, Backend::Poll(_)) {
            return Ok(());
        }
        let poller = self.create_poller(&current.root, &current.tx)?;
        current.backend = Backend::Poll(poller);
        self.logger.warn(format_args!(
            "[switch_to_polling] now polling {} every {}ms",
            current.root.display(),
            self.config.polling_interval_ms
        ));
        Ok(())
    }

    fn create_backend(
        &self,
        root: &Path,
        tx: &UnboundedSender<RawEvent>,
        polling: bool,
    ) -> Result<Backend> {
        if polling {
            return Ok(Backend::Poll(self.create_poller(root, tx)?));
        }

        let mut native = RecommendedWatcher::new(self.handler(root, tx), Config::default())?;
        match native.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                self.logger
                    .info(format_args!("[start] watching {}", root.display()));
                Ok(Backend::Native(native))
            }
            Err(e) => match classify_error(&e) {
                WatchErrorKind::ResourceExhausted => {
                    self.logger.warn(format_args!(
                        "[start] native watch limit reached for {} ({}), falling back to polling",
                        root.display(),
                        e
                    ));
                    drop(native);
                    Ok(Backend::Poll(self.create_poller(root, tx)?))
                }
                WatchErrorKind::PermissionDenied => {
                    // Keep whatever part of the tree could be registered.
                    self.logger.warn(format_args!(
                        "[start] permission denied while watching {}: {}",
                        root.display(),
                        e
                    ));
                    self.mark_degraded();
                    Ok(Backend::Native(native))
                }
                WatchErrorKind::Other => Err(e.into()),
            },
        }
    }

    fn create_poller(&self, root: &Path, tx: &UnboundedSender<RawEvent>) -> Result<PollWatcher> {
        // mtimes have one-second resolution on some filesystems; hash contents too.
        let config = Config::default()
            .with_poll_interval(Duration::from_millis(self.config.polling_interval_ms.max(10)))
            .with_compare_contents(true);
        let mut poller = PollWatcher::new(self.handler(root, tx), config)?;
        poller.watch(root, RecursiveMode::Recursive)?;
        Ok(poller)
    }

    /// Callback run on notify's thread: filter, translate, forward.
    fn handler(
        &self,
        root: &Path,
        tx: &UnboundedSender<RawEvent>,
    ) -> impl FnMut(notify::Result<Event>) + Send + 'static {
        let root = root.to_path_buf();
        let tx = tx.clone();
        let rules = Arc::clone(&self.rules);
        let paused = Arc::clone(&self.paused);

        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if paused.load(Ordering::Acquire) {
                    return;
                }
                for raw in translate(&event) {
                    let keep = raw_path(&raw)
                        .map(|p| !rules.is_ignored(&root, p))
                        .unwrap_or(true);
                    if keep {
                        let _ = tx.send(raw);
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(RawEvent::Error {
                    kind: classify_error(&e),
                    path: e.paths.first().cloned(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// PathWatcher + EventDebouncer wired together for one root.
pub struct WatchSession {
    watcher: Arc<PathWatcher>,
    debouncer: EventDebouncer,
    root: PathBuf,
}

impl WatchSession {
    /// Must be called from within a tokio runtime.
    pub fn start(root: &Path, config: &PromptConfig, logger: Logger) -> Result<Self> {
        let watcher = Arc::new(PathWatcher::new(
            &config.watch,
            &config.exclude_patterns,
            logger.clone(),
        )?);
        let raw_rx = watcher.start(root)?;

        let matcher = config.matcher()?;
        let window = Duration::from_millis(config.watch.debounce_ms);
        let debouncer = EventDebouncer::new(logger);
        debouncer.run(
            raw_rx,
            Debouncer::new(window, matcher, SystemClock),
            Arc::clone(&watcher),
        );

        Ok(Self {
            watcher,
            debouncer,
            root: root.to_path_buf(),
        })
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.debouncer.subscribe(callback)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watcher(&self) -> &PathWatcher {
        &self.watcher
    }

    pub fn pause(&self) {
        self.watcher.pause();
    }

    pub fn resume(&self) {
        self.watcher.resume();
    }

    pub fn stop(&self) {
        self.debouncer.cancel();
        self.watcher.stop();
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}
