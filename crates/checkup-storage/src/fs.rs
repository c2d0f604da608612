//! Filesystem storage.
//!
//! ```text
//! <dir>/
//!   index.json                 { "<name>": <unix ns>, ... }
//!   1718000000000000000-check.json
//!   1718000030000000000-check.json
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use checkup_core::{
    duration, timestamp, CheckResult, CheckupError, CheckupResult, Storage, StorageReader,
};

pub const KIND: &str = "fs";

pub const INDEX_NAME: &str = "index.json";

/// Name of the file a batch stored at `ts` (Unix ns) is written to.
pub fn batch_name(ts: i64) -> String {
    format!("{ts}-check.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FsConfig {
    dir: PathBuf,
    #[serde(with = "duration::text", default)]
    check_expiry: Duration,
}

/// Stores each batch as a JSON file in `dir`.
#[derive(Debug)]
pub struct FsStorage {
    dir: PathBuf,
    check_expiry: Duration,
    /// Serializes read-modify-write cycles of the index.
    index_lock: Mutex<()>,
}

impl FsStorage {
    /// `check_expiry` of zero keeps batches forever.
    pub fn new(dir: impl Into<PathBuf>, check_expiry: Duration) -> Self {
        Self {
            dir: dir.into(),
            check_expiry,
            index_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: serde_json::Value) -> CheckupResult<Self> {
        let cfg: FsConfig = serde_json::from_value(config)?;
        if cfg.dir.as_os_str().is_empty() {
            return Err(CheckupError::Config("fs storage requires dir".to_string()));
        }
        Ok(Self::new(cfg.dir, cfg.check_expiry))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn check_expiry(&self) -> Duration {
        self.check_expiry
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.index_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_index(&self) -> CheckupResult<BTreeMap<String, i64>> {
        let path = self.dir.join(INDEX_NAME);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| storage_error(&path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    fn write_index(&self, index: &BTreeMap<String, i64>) -> CheckupResult<()> {
        write_json(&self.dir.join(INDEX_NAME), index)
    }

    /// Store `results` as if it were `now` (Unix ns). Returns the batch name.
    pub fn store_at(&self, results: &[CheckResult], now: i64) -> CheckupResult<String> {
        fs::create_dir_all(&self.dir).map_err(|e| storage_error(&self.dir, e))?;
        let name = batch_name(now);
        write_json(&self.dir.join(&name), results)?;

        let _guard = self.lock();
        let mut index = self.read_index()?;
        index.insert(name.clone(), now);
        self.write_index(&index)?;

        debug!(dir = %self.dir.display(), batch = %name, results = results.len(), "stored batch");
        Ok(name)
    }

    /// Delete batches older than `check_expiry` relative to `now` (Unix ns).
    /// Returns how many were removed.
    pub fn maintain_at(&self, now: i64) -> CheckupResult<usize> {
        if self.check_expiry.is_zero() {
            return Ok(0);
        }
        let expiry = i64::try_from(self.check_expiry.as_nanos()).unwrap_or(i64::MAX);

        let _guard = self.lock();
        let mut index = self.read_index()?;
        let expired: Vec<String> = index
            .iter()
            .filter(|(_, stored)| now.saturating_sub(**stored) > expiry)
            .map(|(name, _)| name.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        for name in &expired {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(storage_error(&path, e)),
            }
            index.remove(name);
        }
        self.write_index(&index)?;

        info!(dir = %self.dir.display(), removed = expired.len(), "expired stored batches");
        Ok(expired.len())
    }
}

/// Failures of the store itself are storage errors, whatever their source.
fn storage_error(path: &Path, e: impl fmt::Display) -> CheckupError {
    CheckupError::Storage(format!("{}: {e}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> CheckupResult<()> {
    let file = fs::File::create(path).map_err(|e| storage_error(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|e| storage_error(path, e))?;
    writer.flush().map_err(|e| storage_error(path, e))
}

impl Storage for FsStorage {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn store(&self, results: &[CheckResult]) -> CheckupResult<()> {
        self.store_at(results, timestamp()).map(|_| ())
    }

    fn maintain(&self) -> CheckupResult<()> {
        self.maintain_at(timestamp()).map(|_| ())
    }

    fn reader(&self) -> Option<&dyn StorageReader> {
        Some(self)
    }
}

impl StorageReader for FsStorage {
    fn fetch(&self, name: &str) -> CheckupResult<Vec<CheckResult>> {
        // Batch names are plain file names inside `dir`.
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(CheckupError::Storage(format!("invalid batch name {name:?}")));
        }
        let path = self.dir.join(name);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CheckupError::Storage(format!("no stored batch {name:?}")),
            _ => storage_error(&path, e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| storage_error(&path, e))
    }

    fn index(&self) -> CheckupResult<BTreeMap<String, i64>> {
        let _guard = self.lock();
        self.read_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use checkup_core::Attempt;

    const SECOND: i64 = 1_000_000_000;

    fn batch(title: &str) -> Vec<CheckResult> {
        vec![CheckResult::new("tcp", title, "127.0.0.1:80")
            .with_attempts(vec![Attempt::ok(Duration::from_millis(3))])
            .conclude(Duration::ZERO)
            .unwrap()]
    }

    #[test]
    fn from_config_requires_dir() {
        let storage = FsStorage::from_config(serde_json::json!({
            "type": "fs",
            "dir": "/var/lib/checkup",
            "check_expiry": "24h"
        }))
        .unwrap();
        assert_eq!(storage.dir(), Path::new("/var/lib/checkup"));
        assert_eq!(storage.check_expiry(), Duration::from_secs(86_400));

        let err = FsStorage::from_config(serde_json::json!({"type": "fs"})).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn store_then_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path(), Duration::ZERO);

        let results = batch("web");
        let name = storage.store_at(&results, 10 * SECOND).unwrap();
        assert_eq!(name, "10000000000-check.json");

        let index = storage.index().unwrap();
        assert_eq!(index.get(&name), Some(&(10 * SECOND)));

        assert_eq!(storage.fetch(&name).unwrap(), results);
    }

    #[test]
    fn empty_dir_has_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path().join("missing"), Duration::ZERO);
        assert!(storage.index().unwrap().is_empty());
    }

    #[test]
    fn fetch_rejects_unknown_and_escaping_names() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path(), Duration::ZERO);
        assert!(matches!(
            storage.fetch("1-check.json"),
            Err(CheckupError::Storage(_))
        ));
        assert!(matches!(
            storage.fetch("../etc/passwd"),
            Err(CheckupError::Storage(_))
        ));
    }

    #[test]
    fn maintain_removes_expired_batches() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path(), Duration::from_secs(60));

        let old = storage.store_at(&batch("old"), 100 * SECOND).unwrap();
        let fresh = storage.store_at(&batch("fresh"), 150 * SECOND).unwrap();

        assert_eq!(storage.maintain_at(170 * SECOND).unwrap(), 1);
        let index = storage.index().unwrap();
        assert!(!index.contains_key(&old));
        assert!(index.contains_key(&fresh));
        assert!(!tmp.path().join(&old).exists());
        assert!(tmp.path().join(&fresh).exists());

        assert_eq!(storage.maintain_at(170 * SECOND).unwrap(), 0);
    }

    #[test]
    fn zero_expiry_keeps_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path(), Duration::ZERO);
        storage.store_at(&batch("a"), SECOND).unwrap();
        assert_eq!(storage.maintain_at(i64::MAX).unwrap(), 0);
        assert_eq!(storage.index().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_files_are_storage_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path(), Duration::from_secs(60));
        let name = storage.store_at(&batch("a"), SECOND).unwrap();

        fs::write(tmp.path().join(&name), b"{not json").unwrap();
        let err = storage.fetch(&name).unwrap_err();
        assert!(matches!(err, CheckupError::Storage(_)), "{err:?}");
        assert!(!err.is_config());

        fs::write(tmp.path().join(INDEX_NAME), b"[1, 2").unwrap();
        for err in [
            storage.store_at(&batch("b"), 2 * SECOND).unwrap_err(),
            storage.maintain_at(i64::MAX).unwrap_err(),
            storage.index().unwrap_err(),
        ] {
            assert!(matches!(err, CheckupError::Storage(_)), "{err:?}");
            assert!(!err.is_config());
        }
    }

    #[test]
    fn exposes_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(tmp.path(), Duration::ZERO);
        storage.store(&batch("a")).unwrap();
        let reader = storage.reader().unwrap();
        assert_eq!(reader.index().unwrap().len(), 1);
    }
}
