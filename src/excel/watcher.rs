use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::reader::{compute_checksum, sheet_checksums};
use super::types::*;

/// Watches workbooks and reports which sheets changed
pub struct ExcelWatcher {
    watchers: Arc<Mutex<HashMap<String, WatcherHandle>>>,
    event_sender: Sender<FileChangeEvent>,
}

struct WatcherHandle {
    #[allow(dead_code)]
    watcher: RecommendedWatcher,
    last_checksum: String,
    sheet_checksums: Vec<String>,
}

impl ExcelWatcher {
    pub fn new(event_sender: Sender<FileChangeEvent>) -> Self {
        ExcelWatcher {
            watchers: Arc::new(Mutex::new(HashMap::new())),
            event_sender,
        }
    }

    /// Start watching a file for changes
    pub fn watch_file(&self, path: &str) -> Result<(), ExcelError> {
        let path_buf = PathBuf::from(path);

        if !path_buf.exists() {
            return Err(ExcelError::file_not_found(path));
        }

        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| ExcelError::watch_error("Failed to acquire lock"))?;

        if watchers.contains_key(path) {
            return Ok(());
        }

        let initial_checksum = compute_checksum(path)?;
        let initial_sheets = sheet_checksums(path)?;

        let (tx, rx): (Sender<Result<Event, notify::Error>>, Receiver<Result<Event, notify::Error>>) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| ExcelError::watch_error(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&path_buf, RecursiveMode::NonRecursive)
            .map_err(|e| ExcelError::watch_error(format!("Failed to watch file: {}", e)))?;

        watchers.insert(
            path.to_string(),
            WatcherHandle {
                watcher,
                last_checksum: initial_checksum,
                sheet_checksums: initial_sheets,
            },
        );

        let event_sender = self.event_sender.clone();
        let watchers_ref = self.watchers.clone();
        let watched_path = path.to_string();

        thread::spawn(move || {
            process_watch_events(rx, event_sender, watchers_ref, watched_path);
        });

        tracing::debug!(path, "watching workbook");
        Ok(())
    }

    /// Stop watching a file
    pub fn unwatch_file(&self, path: &str) -> Result<(), ExcelError> {
        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| ExcelError::watch_error("Failed to acquire lock"))?;

        watchers.remove(path);
        Ok(())
    }

    pub fn is_watching(&self, path: &str) -> bool {
        self.watchers
            .lock()
            .map(|w| w.contains_key(path))
            .unwrap_or(false)
    }
}

/// Process watch events in a background thread
fn process_watch_events(
    rx: Receiver<Result<Event, notify::Error>>,
    event_sender: Sender<FileChangeEvent>,
    watchers: Arc<Mutex<HashMap<String, WatcherHandle>>>,
    path: String,
) {
    // Spreadsheet apps save in bursts; let them settle
    let debounce_duration = Duration::from_millis(500);
    let mut pending = false;

    loop {
        let timeout = if pending { debounce_duration } else { Duration::from_secs(1) };

        match rx.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                if is_relevant(&event.kind) {
                    pending = true;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Watch error for {}: {}", path, e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if pending {
                    pending = false;
                    if let Some(change_event) = detect_change(&watchers, &path) {
                        if event_sender.send(change_event).is_err() {
                            break;
                        }
                    }
                }

                let should_continue = watchers
                    .lock()
                    .map(|w| w.contains_key(&path))
                    .unwrap_or(false);

                if !should_continue {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                break;
            }
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_))
}

/// Compare the file against the last known state
fn detect_change(
    watchers: &Arc<Mutex<HashMap<String, WatcherHandle>>>,
    path: &str,
) -> Option<FileChangeEvent> {
    if !std::path::Path::new(path).exists() {
        return Some(FileChangeEvent {
            path: path.to_string(),
            change_type: FileChangeType::Deleted,
            new_checksum: None,
            changed_sheets: Vec::new(),
        });
    }

    let new_checksum = match compute_checksum(path) {
        Ok(checksum) => checksum,
        Err(e) => {
            tracing::warn!("Could not checksum {}: {}", path, e);
            return None;
        }
    };

    {
        let watchers_guard = watchers.lock().ok()?;
        if watchers_guard.get(path)?.last_checksum == new_checksum {
            return None;
        }
    }

    // Parsed without the lock held
    let sheets = sheet_checksums(path);

    let mut watchers_guard = watchers.lock().ok()?;
    let handle = watchers_guard.get_mut(path)?;

    // Another pass may have recorded this save while the sheets were read
    if new_checksum == handle.last_checksum {
        return None;
    }
    handle.last_checksum = new_checksum.clone();

    // A save that is still being written can fail to parse; report it as unknown
    let changed_sheets = match sheets {
        Ok(sheets) => {
            let changed = changed_sheet_indices(&handle.sheet_checksums, &sheets);
            handle.sheet_checksums = sheets;
            changed
        }
        Err(e) => {
            tracing::warn!("Could not read sheets of {}: {}", path, e);
            Vec::new()
        }
    };

    Some(FileChangeEvent {
        path: path.to_string(),
        change_type: FileChangeType::Modified,
        new_checksum: Some(new_checksum),
        changed_sheets,
    })
}

/// Sheets whose checksum differs, including sheets that were added or removed
fn changed_sheet_indices(old: &[String], new: &[String]) -> Vec<usize> {
    let len = old.len().max(new.len());
    (0..len).filter(|&i| old.get(i) != new.get(i)).collect()
}

/// Create a channel for receiving file change events
pub fn create_event_channel() -> (Sender<FileChangeEvent>, Receiver<FileChangeEvent>) {
    channel()
}
