// Persistent set of item ids that have already been handled.
//
// This is what makes reconnects safe: a feed may replay items after an error, and the
// supervisor skips anything found here. Membership only ever grows.
//
// Snapshot format on disk: {"ids": [...], "count": N}. A bare JSON array is also
// accepted on load so older snapshots keep working.

use crate::core::metrics::MetricsCollector;
use crate::core::telemetry::ScopedTimer;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const DEFAULT_AUTOSAVE_EVERY: usize = 50;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct SnapshotOut<'a> {
    ids: &'a [String],
    count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotIn {
    Structured {
        ids: Vec<String>,
        #[allow(dead_code)]
        #[serde(default)]
        count: Option<usize>,
    },
    Bare(Vec<String>),
}

impl SnapshotIn {
    fn into_ids(self) -> Vec<String> {
        match self {
            SnapshotIn::Structured { ids, .. } => ids,
            SnapshotIn::Bare(ids) => ids,
        }
    }
}

pub struct DedupStore {
    path: PathBuf,
    autosave_every: usize,
    seen: DashSet<String>,
    /// Insertions since the last successful snapshot.
    dirty: AtomicUsize,
    /// Serializes writers so two flushes never share the temp file.
    write_lock: Mutex<()>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl DedupStore {
    /// Open the store at `path`, loading any existing snapshot.
    ///
    /// Never fails: an unreadable snapshot is logged and the store starts empty.
    pub fn open(path: impl Into<PathBuf>, autosave_every: usize) -> Self {
        Self::build(path.into(), autosave_every, None)
    }

    /// Like `open`, but load and flush failures also land in `metrics` as the last error.
    pub fn open_with_metrics(
        path: impl Into<PathBuf>,
        autosave_every: usize,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::build(path.into(), autosave_every, Some(metrics))
    }

    fn build(path: PathBuf, autosave_every: usize, metrics: Option<Arc<MetricsCollector>>) -> Self {
        let store = Self {
            path,
            autosave_every: autosave_every.max(1),
            seen: DashSet::new(),
            dirty: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            metrics,
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Merge the on-disk snapshot into memory. Returns how many ids were read.
    pub fn load(&self) -> usize {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No seen cache found; starting fresh");
            return 0;
        }

        match Self::read_snapshot(&self.path) {
            Ok(ids) => {
                let count = ids.len();
                for id in ids {
                    self.seen.insert(id);
                }
                tracing::info!(path = %self.path.display(), count, "Seen cache loaded");
                count
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Failed to load seen cache, starting empty: {}",
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(format!("seen_cache_load: {}", e));
                }
                0
            }
        }
    }

    fn read_snapshot(path: &Path) -> Result<Vec<String>, DedupError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: SnapshotIn = serde_json::from_reader(reader)?;
        Ok(snapshot.into_ids())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Mark `id` as handled. Returns `true` if this call inserted it.
    ///
    /// Crossing the autosave threshold triggers a synchronous flush.
    pub fn add(&self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }

        let dirty = self.dirty.fetch_add(1, Ordering::AcqRel) + 1;
        if dirty >= self.autosave_every {
            self.flush();
        }
        true
    }

    /// Write the full id set to `<path>.tmp` and atomically rename it over the snapshot.
    ///
    /// On failure the previous snapshot is left untouched.
    pub fn save(&self) -> Result<usize, DedupError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Anything inserted after this point stays dirty for the next flush.
        let pending = self.dirty.swap(0, Ordering::AcqRel);
        let ids: Vec<String> = self.seen.iter().map(|id| id.key().clone()).collect();

        match self.write_snapshot(&ids) {
            Ok(()) => Ok(ids.len()),
            Err(e) => {
                self.dirty.fetch_add(pending, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    fn write_snapshot(&self, ids: &[String]) -> Result<(), DedupError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.tmp_path();
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer(
            &mut writer,
            &SnapshotOut {
                ids,
                count: ids.len(),
            },
        )?;
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Save, logging the outcome instead of returning it.
    pub fn flush(&self) {
        let timer = ScopedTimer::start("seen_cache_save");
        match self.save() {
            Ok(count) => {
                tracing::info!(path = %self.path.display(), count, "Seen cache saved");
                timer.finish();
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(format!("seen_cache_save: {}", e));
                }
                timer.fail(&e);
            }
        }
    }

    /// Final flush on the way out.
    pub fn shutdown(&self) {
        self.flush();
    }
}
