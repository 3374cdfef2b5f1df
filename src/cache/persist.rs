// =============================================================================
// Durable Store -- best-effort persistence behind the kline cache
// =============================================================================
//
// The cache mirrors its entries here so a restart can warm-load instead of
// refetching. Nothing above this layer depends on persistence working: every
// failure is reported to the caller, who logs it and moves on.
//
// Two real backends plus a stub:
//
//   - directory: one JSON record per cache key under a root directory. The
//     record embeds its own key, so filenames only need to be filesystem-safe,
//     not reversible.
//   - flatFile:  a single JSON blob holding the whole key -> entry map, used
//     when the root directory cannot be created.
//   - disabled:  `NullStore`, when persistence is switched off.
//
// Writes are atomic (write to `.tmp`, then rename) so a crash mid-write never
// leaves a half-record behind.
// =============================================================================

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::KlinePayload;

// =============================================================================
// Contract
// =============================================================================

/// One persisted cache entry: the payload plus its insertion time in epoch
/// milliseconds. Validity under TTL is the cache's call, not the store's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub data: KlinePayload,
    pub timestamp: i64,
}

/// Which persistence backend is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "flatFile")]
    FlatFile,
    #[serde(rename = "disabled")]
    Disabled,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Directory => "directory",
            BackendKind::FlatFile => "flatFile",
            BackendKind::Disabled => "disabled",
        }
    }
}

/// Snapshot of the store for the cache-statistics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub backend_kind: BackendKind,
    pub item_count: usize,
    pub estimated_size_bytes: u64,
    pub keys: Vec<String>,
}

/// Synchronous persistence contract the cache mirrors into.
///
/// Implementations must be safe to call from a blocking task; the cache never
/// invokes them on the async runtime threads.
pub trait DurableStore: Send + Sync {
    fn save(&self, key: &str, entry: &StoredEntry) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<StoredEntry>>;
    fn get_all(&self) -> Result<HashMap<String, StoredEntry>>;
    fn clear(&self) -> Result<()>;
    fn stats(&self) -> StoreStats;
}

// =============================================================================
// FileStore
// =============================================================================

/// On-disk shape of one directory-backend record. The key rides inside the
/// record because the filename is a sanitized, lossy rendering of it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskRecord {
    key: String,
    #[serde(flatten)]
    entry: StoredEntry,
}

enum Layout {
    Directory { root: PathBuf },
    Flat { path: PathBuf },
}

/// Filesystem-backed store: directory-per-key JSON records, degrading to a
/// single flat blob when the directory cannot be created.
pub struct FileStore {
    layout: Layout,
}

impl FileStore {
    /// Open (or create) the store rooted at `root`. Never fails: if the root
    /// directory cannot be created, the store degrades to a flat JSON blob
    /// beside it.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        match fs::create_dir_all(&root) {
            Ok(()) => Self {
                layout: Layout::Directory { root },
            },
            Err(e) => {
                let path = root.with_extension("json");
                warn!(
                    root = %root.display(),
                    fallback = %path.display(),
                    error = %e,
                    "cache directory unavailable; falling back to flat-file store"
                );
                Self {
                    layout: Layout::Flat { path },
                }
            }
        }
    }

    fn record_path(root: &Path, key: &str) -> PathBuf {
        // Keys are fingerprints like BTCUSDT_1m_1000; anything odd is mapped
        // to '_' so the name stays a plain single-component filename.
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        root.join(format!("{name}.json"))
    }

    fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");

        fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write tmp record to {}", tmp_path.display()))?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp record to {}", path.display()))?;

        Ok(())
    }

    fn read_flat_map(path: &Path) -> Result<HashMap<String, StoredEntry>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read flat store at {}", path.display()))
            }
        };
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse flat store at {}", path.display()))
    }

    fn write_flat_map(path: &Path, map: &HashMap<String, StoredEntry>) -> Result<()> {
        let content = serde_json::to_string(map).context("failed to serialize flat store")?;
        Self::write_atomic(path, &content)
    }

    /// All record files currently under the directory root. A root that has
    /// vanished reads as empty rather than failing.
    fn record_files(root: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to list cache records in {}", root.display()))
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.context("failed to read cache directory entry")?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl DurableStore for FileStore {
    fn save(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        match &self.layout {
            Layout::Directory { root } => {
                let record = DiskRecord {
                    key: key.to_string(),
                    entry: entry.clone(),
                };
                let content =
                    serde_json::to_string(&record).context("failed to serialize cache record")?;
                Self::write_atomic(&Self::record_path(root, key), &content)
            }
            Layout::Flat { path } => {
                let mut map = Self::read_flat_map(path)?;
                map.insert(key.to_string(), entry.clone());
                Self::write_flat_map(path, &map)
            }
        }
    }

    fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        match &self.layout {
            Layout::Directory { root } => {
                let path = Self::record_path(root, key);
                let content = match fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("failed to read cache record at {}", path.display())
                        })
                    }
                };
                let record: DiskRecord = serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse cache record at {}", path.display()))?;
                Ok(Some(record.entry))
            }
            Layout::Flat { path } => {
                let mut map = Self::read_flat_map(path)?;
                Ok(map.remove(key))
            }
        }
    }

    fn get_all(&self) -> Result<HashMap<String, StoredEntry>> {
        match &self.layout {
            Layout::Directory { root } => {
                let mut map = HashMap::new();
                for path in Self::record_files(root)? {
                    // One corrupt record must not take down hydration.
                    match fs::read_to_string(&path)
                        .map_err(anyhow::Error::from)
                        .and_then(|c| serde_json::from_str::<DiskRecord>(&c).map_err(Into::into))
                    {
                        Ok(record) => {
                            map.insert(record.key, record.entry);
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping unreadable cache record");
                        }
                    }
                }
                Ok(map)
            }
            Layout::Flat { path } => Self::read_flat_map(path),
        }
    }

    fn clear(&self) -> Result<()> {
        match &self.layout {
            Layout::Directory { root } => {
                for path in Self::record_files(root)? {
                    fs::remove_file(&path).with_context(|| {
                        format!("failed to remove cache record at {}", path.display())
                    })?;
                }
                Ok(())
            }
            Layout::Flat { path } => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e)
                    .with_context(|| format!("failed to remove flat store at {}", path.display())),
            },
        }
    }

    fn stats(&self) -> StoreStats {
        match &self.layout {
            Layout::Directory { root } => {
                let files = Self::record_files(root).unwrap_or_default();
                let estimated_size_bytes = files
                    .iter()
                    .filter_map(|p| fs::metadata(p).ok())
                    .map(|m| m.len())
                    .sum();
                let keys = self
                    .get_all()
                    .map(|map| {
                        let mut keys: Vec<String> = map.into_keys().collect();
                        keys.sort();
                        keys
                    })
                    .unwrap_or_default();
                StoreStats {
                    backend_kind: BackendKind::Directory,
                    item_count: keys.len(),
                    estimated_size_bytes,
                    keys,
                }
            }
            Layout::Flat { path } => {
                let map = Self::read_flat_map(path).unwrap_or_default();
                let mut keys: Vec<String> = map.into_keys().collect();
                keys.sort();
                StoreStats {
                    backend_kind: BackendKind::FlatFile,
                    item_count: keys.len(),
                    estimated_size_bytes: fs::metadata(path).map(|m| m.len()).unwrap_or(0),
                    keys,
                }
            }
        }
    }
}

// =============================================================================
// NullStore
// =============================================================================

/// Inert store used when persistence is disabled. Accepts everything,
/// remembers nothing.
pub struct NullStore;

impl DurableStore for NullStore {
    fn save(&self, _key: &str, _entry: &StoredEntry) -> Result<()> {
        Ok(())
    }

    fn get(&self, _key: &str) -> Result<Option<StoredEntry>> {
        Ok(None)
    }

    fn get_all(&self) -> Result<HashMap<String, StoredEntry>> {
        Ok(HashMap::new())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            backend_kind: BackendKind::Disabled,
            item_count: 0,
            estimated_size_bytes: 0,
            keys: Vec::new(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, VolumeBar};
    use tempfile::TempDir;

    fn sample_entry(timestamp: i64) -> StoredEntry {
        StoredEntry {
            data: KlinePayload {
                bars: vec![Bar::new(1_700_000_000, 1.0, 2.0, 0.5, 1.5)],
                volume_bars: vec![VolumeBar::new(1_700_000_000, 10.0, 4.0, 15.0)],
                is_time_series: false,
            },
            timestamp,
        }
    }

    #[test]
    fn directory_backend_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("cache"));

        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        store.save("ETHUSDT_5m_500", &sample_entry(200)).unwrap();

        let entry = store.get("BTCUSDT_1m_1000").unwrap().unwrap();
        assert_eq!(entry.timestamp, 100);
        assert_eq!(entry.data.bars.len(), 1);
        assert!((entry.data.bars[0].close - 1.5).abs() < 1e-12);

        assert!(store.get("SOLUSDT_1h_100").unwrap().is_none());

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["ETHUSDT_5m_500"].timestamp, 200);
    }

    #[test]
    fn directory_save_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("cache"));

        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        store.save("BTCUSDT_1m_1000", &sample_entry(300)).unwrap();

        assert_eq!(store.get_all().unwrap().len(), 1);
        assert_eq!(store.get("BTCUSDT_1m_1000").unwrap().unwrap().timestamp, 300);
    }

    #[test]
    fn directory_stats_report_items_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("cache"));
        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        store.save("ETHUSDT_5m_500", &sample_entry(200)).unwrap();

        let stats = store.stats();
        assert_eq!(stats.backend_kind, BackendKind::Directory);
        assert_eq!(stats.item_count, 2);
        assert!(stats.estimated_size_bytes > 0);
        assert_eq!(stats.keys, vec!["BTCUSDT_1m_1000", "ETHUSDT_5m_500"]);
    }

    #[test]
    fn clear_removes_every_record() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("cache"));
        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        store.save("ETHUSDT_5m_500", &sample_entry(200)).unwrap();

        store.clear().unwrap();
        assert!(store.get_all().unwrap().is_empty());
        assert_eq!(store.stats().item_count, 0);
    }

    #[test]
    fn corrupt_record_is_skipped_on_get_all() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let store = FileStore::open(&root);
        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        std::fs::write(root.join("junk.json"), "not json at all").unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("BTCUSDT_1m_1000"));
    }

    #[test]
    fn falls_back_to_flat_file_when_directory_is_blocked() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        // A plain file where the directory should be forces the fallback.
        std::fs::write(&root, "occupied").unwrap();

        let store = FileStore::open(&root);
        assert_eq!(store.stats().backend_kind, BackendKind::FlatFile);

        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        store.save("ETHUSDT_5m_500", &sample_entry(200)).unwrap();
        assert_eq!(store.get_all().unwrap().len(), 2);
        assert_eq!(store.get("BTCUSDT_1m_1000").unwrap().unwrap().timestamp, 100);

        store.clear().unwrap();
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn null_store_is_inert() {
        let store = NullStore;
        store.save("BTCUSDT_1m_1000", &sample_entry(100)).unwrap();
        assert!(store.get("BTCUSDT_1m_1000").unwrap().is_none());
        assert!(store.get_all().unwrap().is_empty());
        store.clear().unwrap();
        assert_eq!(store.stats().backend_kind, BackendKind::Disabled);
    }
}
