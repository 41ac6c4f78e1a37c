//! Durable STS policy storage.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::StsPolicy;
use crate::error::Result;

/// Backing store for learned policies, keyed by normalised host.
pub trait StsStore: Send + Sync {
    /// Every stored policy, expired ones included.
    fn load(&self) -> Result<BTreeMap<String, StsPolicy>>;

    /// Insert or replace the policy for `host`.
    fn save(&self, host: &str, policy: &StsPolicy) -> Result<()>;

    /// Delete the policy for `host`; absent hosts are not an error.
    fn remove(&self, host: &str) -> Result<()>;
}

/// In-process store. Clones share the same map, so a second service built
/// on a clone sees what the first one learned.
#[derive(Clone, Debug, Default)]
pub struct MemoryStsStore {
    policies: Arc<Mutex<BTreeMap<String, StsPolicy>>>,
}

impl MemoryStsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StsStore for MemoryStsStore {
    fn load(&self) -> Result<BTreeMap<String, StsPolicy>> {
        Ok(self.policies.lock().clone())
    }

    fn save(&self, host: &str, policy: &StsPolicy) -> Result<()> {
        self.policies.lock().insert(host.to_owned(), policy.clone());
        Ok(())
    }

    fn remove(&self, host: &str) -> Result<()> {
        self.policies.lock().remove(host);
        Ok(())
    }
}

/// JSON file store: `{ "<host>": { "tls": true, "port": 6697, ... } }`.
///
/// Every change rewrites the whole file through a temp file and rename.
#[derive(Debug)]
pub struct JsonFileStsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, StsPolicy>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(&self.path)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_map(&self, map: &BTreeMap<String, StsPolicy>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(map)?;

        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;

        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), policies = map.len(), "sts store written");
        Ok(())
    }
}

impl StsStore for JsonFileStsStore {
    fn load(&self) -> Result<BTreeMap<String, StsPolicy>> {
        let _guard = self.write_lock.lock();
        self.read_map()
    }

    fn save(&self, host: &str, policy: &StsPolicy) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        map.insert(host.to_owned(), policy.clone());
        self.write_map(&map)
    }

    fn remove(&self, host: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        if map.remove(host).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}
