//! Change watchers.
//!
//! A backend either brings a native event source (the local backend uses
//! the platform notifier) or inherits the polling watcher, which compares
//! successive directory snapshots and emits create/modify/delete events.
//!
//! Watcher threads deliver event batches over a `flume` channel and stop
//! when asked: the polling loop checks a flag between sleeps, native
//! sources get a bounded wait so the flag is observed promptly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::base::{walk_files, Result, StorageBackend, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventType {
    Create,
    Modify,
    Delete,
}

/// A single observed change, with a storage-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub event_type: FileEventType,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(event_type: FileEventType, path: impl Into<PathBuf>) -> Self {
        FileEvent {
            event_type,
            path: path.into(),
        }
    }
}

/// A native source of change events with a bounded wait.
pub trait EventSource: Send {
    /// Block up to `timeout` and return any events observed. An empty
    /// vector is a normal timeout.
    fn wait(&mut self, timeout: Duration) -> Result<Vec<FileEvent>>;
}

/// How a backend wants to be watched.
pub enum Watcher {
    /// The backend produces events itself.
    Native(Box<dyn EventSource>),
    /// Poll `walk_files` snapshots at this interval.
    Polling { interval: Duration },
}

/// A running watcher thread.
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Ask the thread to stop and wait for it (bounded by the watcher's
    /// own poll granularity).
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Materialize a backend's watcher into a running thread feeding `tx`.
///
/// Returns `None` when the backend does not support watching.
pub fn start_watcher(
    backend: Arc<dyn StorageBackend>,
    tx: flume::Sender<Vec<FileEvent>>,
) -> Option<WatcherHandle> {
    match backend.watcher()? {
        Watcher::Native(source) => Some(spawn_native(source, backend, tx)),
        Watcher::Polling { interval } => Some(spawn_polling(backend, interval, tx)),
    }
}

fn spawn_native(
    mut source: Box<dyn EventSource>,
    backend: Arc<dyn StorageBackend>,
    tx: flume::Sender<Vec<FileEvent>>,
) -> WatcherHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread = std::thread::spawn(move || {
        while !stop_flag.load(Ordering::SeqCst) {
            match source.wait(Duration::from_millis(500)) {
                Ok(events) if events.is_empty() => {}
                Ok(events) => {
                    backend.clear_cache();
                    if tx.send(events).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!("watcher event source failed: {err}");
                    break;
                }
            }
        }
    });
    WatcherHandle {
        stop,
        thread: Some(thread),
    }
}

/// The fallback watcher: snapshot the whole tree, diff against the last
/// snapshot, report differences.
fn spawn_polling(
    backend: Arc<dyn StorageBackend>,
    interval: Duration,
    tx: flume::Sender<Vec<FileEvent>>,
) -> WatcherHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread = std::thread::spawn(move || {
        let mut previous = snapshot(backend.as_ref()).unwrap_or_default();
        while !stop_flag.load(Ordering::SeqCst) {
            // Sleep in small steps so stop() is honored promptly.
            let mut slept = Duration::ZERO;
            while slept < interval && !stop_flag.load(Ordering::SeqCst) {
                let step = Duration::from_millis(200).min(interval - slept);
                std::thread::sleep(step);
                slept += step;
            }
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }

            backend.clear_cache();
            let current = match snapshot(backend.as_ref()) {
                Ok(current) => current,
                Err(err) => {
                    tracing::debug!("polling watcher snapshot failed: {err}");
                    continue;
                }
            };
            let events = diff_snapshots(&previous, &current);
            previous = current;
            if !events.is_empty() && tx.send(events).is_err() {
                break;
            }
        }
    });
    WatcherHandle {
        stop,
        thread: Some(thread),
    }
}

type Snapshot = HashMap<PathBuf, (u64, i64)>;

fn snapshot(backend: &dyn StorageBackend) -> Result<Snapshot> {
    Ok(walk_files(backend, Path::new(""))?
        .into_iter()
        .map(|(path, attr)| (path, (attr.size, attr.timestamp)))
        .collect())
}

fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> Vec<FileEvent> {
    let mut events = Vec::new();
    for (path, meta) in current {
        match previous.get(path) {
            None => events.push(FileEvent::new(FileEventType::Create, path.clone())),
            Some(old) if old != meta => {
                events.push(FileEvent::new(FileEventType::Modify, path.clone()))
            }
            Some(_) => {}
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            events.push(FileEvent::new(FileEventType::Delete, path.clone()));
        }
    }
    events
}

/// Event source over the platform file notifier, for backends rooted in
/// the local filesystem.
pub struct NotifyEventSource {
    root: PathBuf,
    rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    // Held to keep the watches alive.
    _watcher: notify::RecommendedWatcher,
}

impl NotifyEventSource {
    pub fn new(root: &Path) -> Result<Self> {
        use notify::Watcher as _;
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| StorageError::BackendInit(format!("notify init failed: {e}")))?;
        watcher
            .watch(root, notify::RecursiveMode::Recursive)
            .map_err(|e| StorageError::BackendInit(format!("notify watch failed: {e}")))?;
        Ok(NotifyEventSource {
            root: root.to_path_buf(),
            rx,
            _watcher: watcher,
        })
    }

    fn translate(&self, event: notify::Event) -> Vec<FileEvent> {
        use notify::EventKind;
        let event_type = match event.kind {
            EventKind::Create(_) => FileEventType::Create,
            EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
                // Renames surface as create+delete pairs on the paths.
                FileEventType::Create
            }
            EventKind::Modify(_) => FileEventType::Modify,
            EventKind::Remove(_) => FileEventType::Delete,
            _ => return vec![],
        };
        event
            .paths
            .into_iter()
            .filter_map(|abs| abs.strip_prefix(&self.root).ok().map(Path::to_path_buf))
            .map(|rel| FileEvent::new(event_type, rel))
            .collect()
    }
}

impl EventSource for NotifyEventSource {
    fn wait(&mut self, timeout: Duration) -> Result<Vec<FileEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(self.translate(event)),
            Ok(Err(err)) => {
                tracing::debug!("notify error: {err}");
                Ok(vec![])
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(vec![]),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(StorageError::BackendInit(
                "notify channel disconnected".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_snapshots() {
        let mut previous = Snapshot::new();
        previous.insert("a.txt".into(), (1, 10));
        previous.insert("b.txt".into(), (2, 10));

        let mut current = Snapshot::new();
        current.insert("a.txt".into(), (1, 20));
        current.insert("c.txt".into(), (3, 10));

        let mut events = diff_snapshots(&previous, &current);
        events.sort_by_key(|e| e.path.clone());
        assert_eq!(
            events,
            vec![
                FileEvent::new(FileEventType::Modify, "a.txt"),
                FileEvent::new(FileEventType::Delete, "b.txt"),
                FileEvent::new(FileEventType::Create, "c.txt"),
            ]
        );
    }
}
