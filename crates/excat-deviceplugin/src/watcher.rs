//! Change notifications from the resctrl tree.
//!
//! resctrl raises inotify events when a group directory is created or
//! removed and when its `schemata`, `size` or `tasks` file is written.
//! Removing a PID from a `tasks` file (the task exited) raises nothing, so a
//! buffer becoming free again cannot be observed here.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use excat_resctrl::TASKS_FILE;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn, Span};

use crate::error::Result;

/// Receiving half of the watcher bridge.
pub type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// What a filesystem event asks the lifecycle manager to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A `tasks` file changed: the PIDs are logged, the devices stay as they are.
    Tasks(PathBuf),
    /// Anything else changed: devices are rebuilt.
    Buffers(Vec<PathBuf>),
}

/// Maps a raw event to the action it triggers, `None` for events to ignore.
///
/// Access events are ignored since reading the tree ourselves raises them.
pub fn classify(event: &Event) -> Option<WatchEvent> {
    if matches!(event.kind, EventKind::Access(_)) {
        return None;
    }

    if let Some(tasks) = event
        .paths
        .iter()
        .find(|path| path.file_name().is_some_and(|name| name == TASKS_FILE))
    {
        return Some(WatchEvent::Tasks(tasks.clone()));
    }

    Some(WatchEvent::Buffers(event.paths.clone()))
}

/// Non-recursive watches on a set of resctrl directories.
pub struct ResctrlWatcher {
    watcher: RecommendedWatcher,
    watched: BTreeSet<PathBuf>,
    span: Span,
}

impl ResctrlWatcher {
    /// Creates a watcher with no directories, events arrive on the returned
    /// receiver.
    pub fn new(span: Span) -> Result<(Self, EventReceiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res| {
            // Receiver gone means the watch loop ended.
            let _ = tx.send(res);
        })?;

        Ok((
            Self {
                watcher,
                watched: BTreeSet::new(),
                span,
            },
            rx,
        ))
    }

    /// Watches exactly `dirs` afterwards: new directories are added, the
    /// ones no longer listed are dropped.
    pub fn rearm<I>(&mut self, dirs: I) -> Result<()>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let _enter = self.span.enter();
        let wanted: BTreeSet<PathBuf> = dirs.into_iter().collect();

        let stale: Vec<PathBuf> = self.watched.difference(&wanted).cloned().collect();
        for dir in stale {
            // The kernel drops the watch itself when the directory is removed.
            if let Err(e) = self.watcher.unwatch(&dir) {
                debug!("Unwatching {} failed: {}", dir.display(), e);
            }
            self.watched.remove(&dir);
            debug!("Stopped watching {}", dir.display());
        }

        for dir in wanted {
            if self.watched.contains(&dir) {
                continue;
            }
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!("Watching {}", dir.display());
                    self.watched.insert(dir);
                }
                Err(e) if !dir.exists() => {
                    warn!("Directory {} vanished before it could be watched: {}", dir.display(), e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Currently watched directories, sorted.
    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }
}
