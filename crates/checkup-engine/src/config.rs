//! Configuration loading.
//!
//! Every checker, storage and notifier object carries a `type`
//! discriminator. Decoding reads the discriminator, looks the kind up in a
//! static table of constructors, and hands the whole object to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use checkup_core::{CheckupError, CheckupResult, Notifier, Probe, Storage};
use checkup_probe::{ExecProbe, HttpProbe, TcpProbe};
use checkup_storage::FsStorage;

use crate::checkup::Checkup;
use crate::notifier::LogNotifier;

type ProbeFactory = fn(Value) -> CheckupResult<Arc<dyn Probe>>;
type StorageFactory = fn(Value) -> CheckupResult<Arc<dyn Storage>>;
type NotifierFactory = fn(Value) -> CheckupResult<Arc<dyn Notifier>>;

const CHECKERS: &[(&str, ProbeFactory)] = &[
    (checkup_probe::tcp::KIND, tcp_probe),
    (checkup_probe::http::KIND, http_probe),
    (checkup_probe::exec::KIND, exec_probe),
];

const STORAGE: &[(&str, StorageFactory)] = &[(checkup_storage::fs::KIND, fs_storage)];

const NOTIFIERS: &[(&str, NotifierFactory)] = &[(crate::notifier::KIND, log_notifier)];

fn tcp_probe(config: Value) -> CheckupResult<Arc<dyn Probe>> {
    Ok(Arc::new(TcpProbe::from_config(config)?))
}

fn http_probe(config: Value) -> CheckupResult<Arc<dyn Probe>> {
    Ok(Arc::new(HttpProbe::from_config(config)?))
}

fn exec_probe(config: Value) -> CheckupResult<Arc<dyn Probe>> {
    Ok(Arc::new(ExecProbe::from_config(config)?))
}

fn fs_storage(config: Value) -> CheckupResult<Arc<dyn Storage>> {
    Ok(Arc::new(FsStorage::from_config(config)?))
}

fn log_notifier(config: Value) -> CheckupResult<Arc<dyn Notifier>> {
    Ok(Arc::new(LogNotifier::from_config(config)?))
}

/// Kinds the registry can build, by category.
pub fn known_kinds() -> [(&'static str, Vec<&'static str>); 3] {
    [
        ("checker", CHECKERS.iter().map(|(k, _)| *k).collect()),
        ("storage", STORAGE.iter().map(|(k, _)| *k).collect()),
        ("notifier", NOTIFIERS.iter().map(|(k, _)| *k).collect()),
    ]
}

fn build<T: ?Sized>(
    category: &'static str,
    table: &[(&str, fn(Value) -> CheckupResult<Arc<T>>)],
    config: Value,
) -> CheckupResult<Arc<T>> {
    let kind = match config.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => {
            return Err(CheckupError::Config(format!(
                "{category} type must be a string, got {other}"
            )));
        }
        None => {
            return Err(CheckupError::Config(format!(
                "{category} is missing its type"
            )));
        }
    };

    let (_, factory) = table
        .iter()
        .find(|(name, _)| *name == kind)
        .ok_or(CheckupError::UnknownKind { category, kind })?;
    factory(config)
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    checkers: Vec<Value>,
    #[serde(default)]
    concurrent_checks: Option<i64>,
    #[serde(default)]
    storage: Option<Value>,
    #[serde(default)]
    notifiers: Vec<Value>,
}

impl Checkup {
    /// Decode a JSON configuration document.
    ///
    /// `concurrent_checks` is kept as written; it is validated by
    /// [`Checkup::concurrency_limit`].
    pub fn from_json(json: &str) -> CheckupResult<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let probes = raw
            .checkers
            .into_iter()
            .map(|c| build("checker", CHECKERS, c))
            .collect::<CheckupResult<Vec<_>>>()?;
        let storage = raw
            .storage
            .map(|s| build("storage", STORAGE, s))
            .transpose()?;
        let notifiers = raw
            .notifiers
            .into_iter()
            .map(|n| build("notifier", NOTIFIERS, n))
            .collect::<CheckupResult<Vec<_>>>()?;

        Ok(Self {
            probes,
            concurrent_checks: raw.concurrent_checks,
            storage,
            notifiers,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> CheckupResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CheckupError::Config(format!("reading {}: {e}", path.display()))
        })?;
        let checkup = Self::from_json(&json)?;
        debug!(
            path = %path.display(),
            checkers = checkup.probes.len(),
            notifiers = checkup.notifiers.len(),
            storage = checkup.storage.is_some(),
            "loaded configuration"
        );
        Ok(checkup)
    }
}

/// Where the controller gets a fresh configuration from on start and on
/// every reload.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> CheckupResult<Checkup>;
}

impl<F> ConfigSource for F
where
    F: Fn() -> CheckupResult<Checkup> + Send + Sync,
{
    fn load(&self) -> CheckupResult<Checkup> {
        self()
    }
}

/// Re-reads a JSON file on every load.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> CheckupResult<Checkup> {
        Checkup::from_file(&self.path)
    }
}
