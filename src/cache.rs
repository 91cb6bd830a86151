//! On-disk profile cache.
//!
//! Entries are keyed by the SHA-256 of
//! `path|size|mtime_ns|group|target|profiler settings`, so a file that changes
//! on disk, or is profiled with a different grouping or configuration, never
//! hits a stale entry. Each entry is one JSON file under the cache directory;
//! `cache_index.json` tracks last access and size per entry for LRU eviction.
//!
//! Entry and index writes go to a temporary file first and are renamed into
//! place. The index is read-modify-written under a process-local lock.
//! Read failures of any kind are treated as a miss.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::{CacheConfig, ProfilerConfig},
    error::Result,
    profile::{FileProfile, Grouping},
};

pub const INDEX_FILE: &str = "cache_index.json";

const INTERMEDIATE_EXTENSIONS: [&str; 3] = ["tmp", "partial", "bak"];
const INTERMEDIATE_GRACE: Duration = Duration::from_secs(60);

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// Seconds since the Unix epoch.
    pub last_access: f64,
    pub size_bytes: u64,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "profile".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
}

pub struct ProfileCache {
    config: CacheConfig,
    index_lock: Mutex<()>,
}

impl ProfileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            index_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.dir.join(INDEX_FILE)
    }

    pub fn key(
        path: &Path,
        grouping: Option<&Grouping>,
        profiler: &ProfilerConfig,
    ) -> Result<String> {
        let canonical = fs::canonicalize(path)?;
        let metadata = fs::metadata(&canonical)?;
        let mtime_ns = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let (group, target) = match grouping {
            Some(g) => (g.group_column.as_str(), g.target_column.as_str()),
            None => ("None", "None"),
        };
        let raw = format!(
            "{}|{}|{}|{}|{}|{}",
            canonical.display(),
            metadata.len(),
            mtime_ns,
            group,
            target,
            profiler.cache_tag()
        );
        Ok(format!("{:x}", Sha256::digest(raw.as_bytes())))
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.config.dir.join(format!("{key}.json"))
    }

    /// Returns the cached profile for `path`, or `None` on any kind of miss.
    pub fn load(
        &self,
        path: &Path,
        grouping: Option<&Grouping>,
        profiler: &ProfilerConfig,
    ) -> Option<FileProfile> {
        let key = match Self::key(path, grouping, profiler) {
            Ok(key) => key,
            Err(err) => {
                debug!("Cache key unavailable for {path:?}: {err}");
                return None;
            }
        };
        let entry = self.entry_path(&key);
        let metadata = fs::metadata(&entry).ok()?;

        if !self.config.ttl.is_zero() && age(&metadata) > self.config.ttl {
            debug!("Cache entry {entry:?} expired");
            self.remove_entry(&entry);
            return None;
        }

        let profile = fs::read(&entry)
            .map_err(|err| err.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<FileProfile>(&bytes).map_err(|err| err.to_string())
            });
        match profile {
            Ok(profile) => {
                if let Err(err) = self.record_access(&entry, metadata.len()) {
                    debug!("Failed to update cache index: {err}");
                }
                debug!("Cache hit for {path:?}");
                Some(profile)
            }
            Err(err) => {
                debug!("Unreadable cache entry {entry:?} treated as miss: {err}");
                None
            }
        }
    }

    pub fn store(
        &self,
        path: &Path,
        grouping: Option<&Grouping>,
        profiler: &ProfilerConfig,
        profile: &FileProfile,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.dir)?;
        let key = Self::key(path, grouping, profiler)?;
        let entry = self.entry_path(&key);
        let bytes = serde_json::to_vec(profile)?;
        write_atomic(&entry, &bytes)?;
        self.record_access(&entry, bytes.len() as u64)?;
        self.enforce_limits()?;
        debug!("Cached profile for {path:?} at {entry:?}");
        Ok(entry)
    }

    /// Entries currently tracked by the index.
    pub fn tracked_entries(&self) -> BTreeMap<String, IndexEntry> {
        let _guard = self.index_lock.lock();
        self.read_index().entries
    }

    /// Drops vanished entries, stale intermediates and expired entries, then
    /// evicts least recently used entries until under the byte ceiling.
    pub fn enforce_limits(&self) -> Result<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.read_index();
        self.cleanup_intermediates();

        let now = now_secs();
        let ttl = self.config.ttl.as_secs_f64();
        let mut live = Vec::new();
        let mut stale = Vec::new();
        for (raw_path, meta) in &index.entries {
            let path = PathBuf::from(raw_path);
            let Ok(metadata) = fs::metadata(&path) else {
                stale.push(raw_path.clone());
                continue;
            };
            if ttl > 0.0 && now - meta.last_access > ttl {
                let _ = fs::remove_file(&path);
                stale.push(raw_path.clone());
                continue;
            }
            live.push((raw_path.clone(), meta.last_access, metadata.len()));
        }
        for raw_path in stale {
            index.entries.remove(&raw_path);
        }

        for (raw_path, _, size) in &live {
            if let Some(meta) = index.entries.get_mut(raw_path) {
                meta.size_bytes = *size;
            }
        }

        let mut total = live.iter().map(|(_, _, size)| *size).sum::<u64>();
        let ceiling = self.config.max_total_bytes;
        if ceiling > 0 && total > ceiling {
            live.sort_by(|a, b| a.1.total_cmp(&b.1));
            for (raw_path, _, size) in &live {
                if total <= ceiling {
                    break;
                }
                debug!("Evicting cache entry {raw_path} ({size} bytes)");
                let _ = fs::remove_file(raw_path);
                index.entries.remove(raw_path);
                total = total.saturating_sub(*size);
            }
        }

        self.write_index(&index)
    }

    fn record_access(&self, entry: &Path, size_bytes: u64) -> Result<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.read_index();
        index.entries.insert(
            entry.display().to_string(),
            IndexEntry {
                last_access: now_secs(),
                size_bytes,
                kind: default_kind(),
            },
        );
        self.write_index(&index)
    }

    fn remove_entry(&self, entry: &Path) {
        let _ = fs::remove_file(entry);
        let _guard = self.index_lock.lock();
        let mut index = self.read_index();
        if index.entries.remove(&entry.display().to_string()).is_some()
            && let Err(err) = self.write_index(&index)
        {
            warn!("Failed to rewrite cache index: {err}");
        }
    }

    fn read_index(&self) -> CacheIndex {
        let path = self.index_path();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!("Ignoring unreadable cache index {path:?}: {err}");
                CacheIndex::default()
            }),
            Err(_) => CacheIndex::default(),
        }
    }

    fn write_index(&self, index: &CacheIndex) -> Result<()> {
        fs::create_dir_all(&self.config.dir)?;
        let bytes = serde_json::to_vec(index)?;
        write_atomic(&self.index_path(), &bytes)
    }

    fn cleanup_intermediates(&self) {
        let Ok(read_dir) = fs::read_dir(&self.config.dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let is_intermediate = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| INTERMEDIATE_EXTENSIONS.contains(&ext));
            if !is_intermediate {
                continue;
            }
            let old_enough = entry
                .metadata()
                .map(|m| age(&m) > INTERMEDIATE_GRACE)
                .unwrap_or(false);
            if old_enough {
                debug!("Removing stale cache intermediate {path:?}");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Writes `bytes` next to `target` under a unique temporary name, then
/// renames it over `target`.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(
        "{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    if let Err(err) = fs::write(&temp, bytes).and_then(|_| fs::rename(&temp, target)) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}

fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn age(metadata: &fs::Metadata) -> Duration {
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or_default()
}
