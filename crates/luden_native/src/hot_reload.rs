//! Hot-reload support for module binaries
//!
//! Watches the binaries of hot-reloadable slots and reports which slots
//! should be reloaded once their file changes have settled. The reload
//! itself is done by the host between frames.

use crate::error::{LoadError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

/// Configuration for hot-reload
#[derive(Debug, Clone)]
pub struct HotReloadConfig {
    /// Debounce duration (wait for file changes to settle)
    pub debounce_duration: Duration,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// Watches module binaries on disk
pub struct ModuleWatcher {
    config: HotReloadConfig,
    watcher: Option<RecommendedWatcher>,
    event_receiver: Option<Receiver<notify::Result<Event>>>,
    /// Binary path -> slot name
    watched: RwLock<HashMap<PathBuf, String>>,
    /// Directories registered with the watcher
    directories: RwLock<HashSet<PathBuf>>,
    /// Slot name -> time the last change was seen
    pending: RwLock<HashMap<String, Instant>>,
    enabled: bool,
}

impl ModuleWatcher {
    /// Create a watcher backed by the platform's file notification API
    pub fn new(config: HotReloadConfig) -> Result<Self> {
        let (tx, rx) = channel();

        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| LoadError::WatchFailed {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;

        Ok(Self {
            config,
            watcher: Some(watcher),
            event_receiver: Some(rx),
            watched: RwLock::new(HashMap::new()),
            directories: RwLock::new(HashSet::new()),
            pending: RwLock::new(HashMap::new()),
            enabled: true,
        })
    }

    /// Create a disabled watcher (for testing)
    pub fn disabled() -> Self {
        Self {
            config: HotReloadConfig::default(),
            watcher: None,
            event_receiver: None,
            watched: RwLock::new(HashMap::new()),
            directories: RwLock::new(HashSet::new()),
            pending: RwLock::new(HashMap::new()),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.watcher.is_some()
    }

    pub fn config(&self) -> &HotReloadConfig {
        &self.config
    }

    /// Watch the binary of a slot.
    ///
    /// The parent directory is watched rather than the file, since builds
    /// usually replace the file instead of writing into it.
    pub fn watch(&mut self, slot: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let slot = slot.into();
        let path = normalize(path.as_ref());
        self.watched.write().insert(path.clone(), slot.clone());

        if !self.is_enabled() {
            return Ok(());
        }

        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if self.directories.read().contains(&directory) {
            return Ok(());
        }
        if let Some(watcher) = self.watcher.as_mut() {
            watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .map_err(|e| LoadError::WatchFailed {
                    path: directory.clone(),
                    message: e.to_string(),
                })?;
        }
        self.directories.write().insert(directory);

        log::debug!("Watching module '{}' for hot-reload: {}", slot, path.display());
        Ok(())
    }

    /// Stop watching a slot
    pub fn unwatch(&self, slot: &str) {
        self.watched.write().retain(|_, watched| watched != slot);
        self.pending.write().remove(slot);
    }

    /// Collect file events; returns slots whose debounce has elapsed
    pub fn poll(&self) -> Vec<String> {
        if let Some(ref rx) = self.event_receiver {
            while let Ok(result) = rx.try_recv() {
                match result {
                    Ok(event) => self.handle_event(&event),
                    Err(e) => log::warn!("File watcher error: {}", e),
                }
            }
        }

        let now = Instant::now();
        let mut ready: Vec<String> = {
            let pending = self.pending.read();
            pending
                .iter()
                .filter(|(_, time)| now.duration_since(**time) >= self.config.debounce_duration)
                .map(|(slot, _)| slot.clone())
                .collect()
        };
        ready.sort();

        if !ready.is_empty() {
            let mut pending = self.pending.write();
            for slot in &ready {
                pending.remove(slot);
            }
        }
        ready
    }

    fn handle_event(&self, event: &Event) {
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return;
        }
        for path in &event.paths {
            if !Self::is_library_file(path) {
                continue;
            }
            let slot = self.watched.read().get(&normalize(path)).cloned();
            if let Some(slot) = slot {
                log::debug!("Detected change in module '{}': {}", slot, path.display());
                self.pending.write().insert(slot, Instant::now());
            }
        }
    }

    /// Request a reload of a watched slot
    pub fn trigger(&self, slot: &str) {
        let watched = self.watched.read().values().any(|watched| watched == slot);
        if watched {
            // Backdate past the debounce so the next poll reports it
            let when = Instant::now()
                .checked_sub(self.config.debounce_duration)
                .unwrap_or_else(Instant::now);
            self.pending.write().insert(slot.to_string(), when);
        }
    }

    /// Slots with a change that has not settled yet
    pub fn pending_slots(&self) -> Vec<String> {
        let mut slots: Vec<String> = self.pending.read().keys().cloned().collect();
        slots.sort();
        slots
    }

    /// Watched slots, sorted
    pub fn watched_slots(&self) -> Vec<String> {
        let mut slots: Vec<String> = self.watched.read().values().cloned().collect();
        slots.sort();
        slots.dedup();
        slots
    }

    pub fn is_library_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("dll") | Some("so") | Some("dylib")
        )
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        log::debug!("Shutting down module watcher");
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
