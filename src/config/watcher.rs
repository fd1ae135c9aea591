//! Route file watcher for hot reload.
//!
//! # Design Decisions
//! - Watches the directories holding the route files, not the files. Editors
//!   and config managers save by renaming a new file over the old one, which
//!   would orphan a watch on the file itself
//! - A file landing on a watched path by create or rename counts as a content
//!   change of that path

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// The kind of change observed on a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File content was written.
    Modified,
    Created,
    Removed,
    Renamed,
    /// Metadata changes, access events and anything unclassified.
    Other,
}

impl From<&EventKind> for ChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                ChangeKind::Modified
            }
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            _ => ChangeKind::Other,
        }
    }
}

/// A change to one watched route file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ConfigEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self { path: path.into(), kind }
    }
}

/// How the file at position `index` of a notify event changed, seen from its path.
fn path_change(kind: &EventKind, index: usize) -> ChangeKind {
    match kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Modified,
        // Both = [from, to]; only the destination received new content.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if index == 1 => ChangeKind::Modified,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => ChangeKind::Renamed,
        other => ChangeKind::from(other),
    }
}

/// Bound route files keyed by directory and file name.
#[derive(Debug, Default)]
struct WatchedFiles {
    files: HashMap<(PathBuf, std::ffi::OsString), PathBuf>,
}

impl WatchedFiles {
    fn new(paths: &[PathBuf]) -> Self {
        let mut files = HashMap::new();
        for path in paths {
            if let Some(key) = file_key(path) {
                files.insert(key, path.clone());
            }
        }
        Self { files }
    }

    fn directories(&self) -> BTreeSet<PathBuf> {
        self.files.keys().map(|(dir, _)| dir.clone()).collect()
    }

    /// The bound path `path` refers to, if any.
    fn bound(&self, path: &Path) -> Option<&PathBuf> {
        self.files.get(&file_key(path)?)
    }

    /// Keep events for bound files, reported under the path they were bound with.
    fn filter(&self, event: &Event) -> Vec<ConfigEvent> {
        event
            .paths
            .iter()
            .enumerate()
            .filter_map(|(index, path)| {
                let bound = self.bound(path)?;
                Some(ConfigEvent::new(bound.clone(), path_change(&event.kind, index)))
            })
            .collect()
    }
}

/// Canonical parent directory plus file name. The directory must exist.
fn file_key(path: &Path) -> Option<(PathBuf, std::ffi::OsString)> {
    let name = path.file_name()?.to_os_string();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Some((dir.canonicalize().ok()?, name))
}

/// A watcher that reports changes to a set of route files.
///
/// Only events for the bound files are forwarded; parsing happens in the
/// reload loop.
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    event_tx: mpsc::UnboundedSender<ConfigEvent>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for change events.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> (Self, mpsc::UnboundedReceiver<ConfigEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (Self {
            paths: paths.into_iter().collect(),
            event_tx,
        }, event_rx)
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.event_tx.clone();
        let watched = WatchedFiles::new(&self.paths);
        let directories = watched.directories();

        let mut watcher = RecommendedWatcher::new(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for change in watched.filter(&event) {
                        tracing::trace!(path = ?change.path, kind = ?change.kind, "Route file event");
                        let _ = tx.send(change);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            }
        }, Config::default().with_poll_interval(Duration::from_secs(2)))?;

        for dir in &directories {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(
            files = self.paths.len(),
            directories = directories.len(),
            "Config watcher started"
        );
        Ok(watcher)
    }
}
