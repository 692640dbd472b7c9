//! Per-path debounce state machine and the async loop that drives it.
//!
//! `Debouncer` is pure: it never sleeps and reads time only through its
//! [`Clock`], so the coalescing rules can be tested deterministically.
//! `EventDebouncer` owns one on a tokio task and turns its deadlines into
//! real timers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::{PathWatcher, RawEvent, WatchErrorKind, WatcherEvent, WatcherEventKind};
use crate::config::FileMatcher;
use crate::events::{Emitter, Subscription};
use crate::logging::Logger;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    /// A "changed" notification is waiting for the quiet period to end.
    Pending(Instant),
    /// Deadline passed; listeners are being notified.
    Firing,
}

pub struct Debouncer<C: Clock = SystemClock> {
    window: Duration,
    clock: C,
    matcher: FileMatcher,
    states: HashMap<PathBuf, DebounceState>,
}

impl<C: Clock> Debouncer<C> {
    pub fn new(window: Duration, matcher: FileMatcher, clock: C) -> Self {
        Self {
            window,
            clock,
            matcher,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, path: &Path) -> DebounceState {
        self.states.get(path).copied().unwrap_or(DebounceState::Idle)
    }

    pub fn pending_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, DebounceState::Pending(_)))
            .count()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.states
            .values()
            .filter_map(|s| match s {
                DebounceState::Pending(deadline) => Some(*deadline),
                _ => None,
            })
            .min()
    }

    /// Feed one raw notification; returns what must be delivered right now.
    pub fn handle(&mut self, raw: RawEvent) -> Vec<WatcherEvent> {
        match raw {
            RawEvent::Change(path) => {
                if self.matcher.is_prompt_file(&path) {
                    // Idle, Pending and Firing all restart the quiet period.
                    let deadline = self.clock.now() + self.window;
                    self.states.insert(path, DebounceState::Pending(deadline));
                }
                Vec::new()
            }
            RawEvent::Add(path) => {
                if !self.matcher.is_prompt_file(&path) {
                    return Vec::new();
                }
                self.states.remove(&path);
                vec![WatcherEvent::new(WatcherEventKind::FileAdded, path)]
            }
            RawEvent::Unlink(path) => {
                if !self.matcher.is_prompt_file(&path) {
                    return Vec::new();
                }
                // Delete wins over a stale pending change.
                self.states.remove(&path);
                vec![WatcherEvent::new(WatcherEventKind::FileDeleted, path)]
            }
            RawEvent::Removed(path) => {
                // Anything that is not a prompt file may have held some.
                if self.matcher.is_prompt_file(&path) {
                    self.handle(RawEvent::Unlink(path))
                } else {
                    self.handle(RawEvent::UnlinkDir(path))
                }
            }
            RawEvent::AddDir(path) => {
                vec![WatcherEvent::new(WatcherEventKind::DirectoryAdded, path)]
            }
            RawEvent::UnlinkDir(path) => {
                self.states
                    .retain(|pending, state| {
                        !(pending.starts_with(&path) && matches!(state, DebounceState::Pending(_)))
                    });
                vec![WatcherEvent::new(WatcherEventKind::DirectoryDeleted, path)]
            }
            RawEvent::Error {
                kind,
                path,
                message,
            } => {
                let mut event = WatcherEvent::new(WatcherEventKind::Error, path.unwrap_or_default());
                event.details = Some(format!("{}: {}", kind, message));
                vec![event]
            }
            RawEvent::Ready => Vec::new(),
        }
    }

    /// Move every expired timer to `Firing` and return its notification.
    pub fn take_due(&mut self) -> Vec<WatcherEvent> {
        let now = self.clock.now();
        let mut due: Vec<(Instant, PathBuf)> = self
            .states
            .iter()
            .filter_map(|(path, state)| match state {
                DebounceState::Pending(deadline) if *deadline <= now => {
                    Some((*deadline, path.clone()))
                }
                _ => None,
            })
            .collect();
        due.sort();

        due.into_iter()
            .map(|(_, path)| {
                self.states.insert(path.clone(), DebounceState::Firing);
                WatcherEvent::new(WatcherEventKind::FileChanged, path)
            })
            .collect()
    }

    /// Delivery done. A change that arrived meanwhile keeps its new timer.
    pub fn finish(&mut self, path: &Path) {
        if self.state(path) == DebounceState::Firing {
            self.states.remove(path);
        }
    }
}

/// Async driver: raw notifications in, coalesced [`WatcherEvent`]s out.
pub struct EventDebouncer {
    events: Emitter<WatcherEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

impl EventDebouncer {
    pub fn new(logger: Logger) -> Self {
        Self {
            events: Emitter::new(),
            task: Mutex::new(None),
            logger: logger.scoped("promptshelf::debouncer"),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Spawn the driver loop on the current tokio runtime. Any previous loop
    /// is cancelled first.
    pub fn run<C: Clock>(
        &self,
        raw_rx: UnboundedReceiver<RawEvent>,
        debouncer: Debouncer<C>,
        watcher: Arc<PathWatcher>,
    ) {
        self.cancel();
        let handle = tokio::spawn(drive(
            raw_rx,
            debouncer,
            watcher,
            self.events.clone(),
            self.logger.clone(),
        ));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Abort the loop; pending timers die with it.
    pub fn cancel(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for EventDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn drive<C: Clock>(
    mut raw_rx: UnboundedReceiver<RawEvent>,
    mut debouncer: Debouncer<C>,
    watcher: Arc<PathWatcher>,
    events: Emitter<WatcherEvent>,
    logger: Logger,
) {
    loop {
        let deadline = debouncer.next_deadline();
        let wake_at = deadline
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            raw = raw_rx.recv() => {
                let Some(raw) = raw else {
                    logger.debug(format_args!("[debouncer] raw channel closed, stopping"));
                    break;
                };
                match &raw {
                    RawEvent::Ready => {
                        logger.info(format_args!("[debouncer] watcher ready"));
                        continue;
                    }
                    RawEvent::Error { kind, message, .. } => {
                        handle_watch_error(&watcher, *kind, message, &logger);
                    }
                    _ => {}
                }
                for event in debouncer.handle(raw) {
                    events.emit(&event);
                }
            }
            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                for event in debouncer.take_due() {
                    // Timers scheduled before a pause still fire; drop them here.
                    if watcher.is_paused() {
                        logger.debug(format_args!(
                            "[debouncer] paused, dropping change for {}",
                            event.file_path.display()
                        ));
                    } else {
                        events.emit(&event);
                    }
                    debouncer.finish(&event.file_path);
                }
            }
        }
    }
}

fn handle_watch_error(watcher: &PathWatcher, kind: WatchErrorKind, message: &str, logger: &Logger) {
    match kind {
        WatchErrorKind::ResourceExhausted => {
            logger.warn(format_args!(
                "[debouncer] native watch limit reached ({}), switching to polling",
                message
            ));
            if let Err(e) = watcher.switch_to_polling() {
                logger.error(format_args!("[debouncer] polling fallback failed: {}", e));
            }
        }
        WatchErrorKind::PermissionDenied => {
            logger.warn(format_args!(
                "[debouncer] permission denied, continuing degraded: {}",
                message
            ));
            watcher.mark_degraded();
        }
        WatchErrorKind::Other => {
            logger.warn(format_args!("[debouncer] watcher error: {}", message));
        }
    }
}
