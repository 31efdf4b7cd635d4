use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use sled::Db;

use crate::key::CacheKey;
use crate::stores::StoreError;
use crate::{Namespace, PersistentStore, Timestamp};

const STORE_VERSION: u64 = 1;

/// Derive a filesystem-safe name for a store directory.
///
/// The result is a readable ASCII form of `name` (every maximal run of
/// non-alphanumeric characters collapsed to a single `-`), an underscore,
/// and a URL-safe base64 encoding of the full UTF-8 bytes so distinct names
/// never collide.
#[must_use]
pub fn slug_filename(name: &str) -> String {
    let mut safe = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            safe.push(c);
            in_run = false;
        } else if !in_run {
            safe.push('-');
            in_run = true;
        }
    }
    format!("{}_{}", safe, URL_SAFE.encode(name.as_bytes()))
}

enum StorePath {
    Explicit(PathBuf),
    Named { name: String, dir: Option<PathBuf> },
}

pub struct DiskStoreBuilder {
    path: StorePath,
    sync_on_write: bool,
    connection_config: Option<sled::Config>,
}

impl DiskStoreBuilder {
    /// Use `path` verbatim as the store location.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        DiskStoreBuilder {
            path: StorePath::Explicit(path.as_ref().into()),
            sync_on_write: false,
            connection_config: None,
        }
    }

    /// Derive the store location from a logical name: a slugified,
    /// version-suffixed directory under the parent set with
    /// [`directory`](Self::directory) (default: the current directory).
    pub fn named<S: ToString>(name: S) -> Self {
        DiskStoreBuilder {
            path: StorePath::Named {
                name: name.to_string(),
                dir: None,
            },
            sync_on_write: false,
            connection_config: None,
        }
    }

    /// Set the parent directory for a [`named`](Self::named) store.
    #[must_use]
    pub fn directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        if let StorePath::Named { dir: slot, .. } = &mut self.path {
            *slot = Some(dir.as_ref().into());
        }
        self
    }

    /// Flush to disk after every write instead of relying on sled's
    /// periodic flushing.
    #[must_use]
    pub fn sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Supply a [`sled::Config`] for the underlying database. Any path set
    /// on it is overwritten with the path this builder computes.
    #[must_use]
    pub fn connection_config(mut self, config: sled::Config) -> Self {
        self.connection_config = Some(config);
        self
    }

    pub fn build(self) -> Result<DiskStore, StoreError> {
        let path = match self.path {
            StorePath::Explicit(p) => p,
            StorePath::Named { name, dir } => {
                let file = format!("{}_v{}", slug_filename(&name), STORE_VERSION);
                dir.unwrap_or_else(|| PathBuf::from(".")).join(file)
            }
        };
        let db = match self.connection_config {
            Some(config) => config.path(path.clone()).open()?,
            None => sled::open(path.clone())?,
        };
        Ok(DiskStore {
            sync_on_write: self.sync_on_write,
            path,
            db,
        })
    }
}

/// Durable target-key store backed by sled.
///
/// One sled database holds every entry; keys carry an `obj:` or `model:`
/// namespace prefix depending on which codec produced the payload, and
/// lookups try `obj:` before `model:`.
pub struct DiskStore {
    sync_on_write: bool,
    #[allow(unused)]
    path: PathBuf,
    db: Db,
}

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    ts: Timestamp,
    payload: Vec<u8>,
    version: u64,
}

impl DiskStore {
    /// Open (or create) a store at `path` with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DiskStore, StoreError> {
        DiskStoreBuilder::open(path).build()
    }

    /// Start a builder for a store identified by a logical name.
    #[must_use]
    pub fn named(name: &str) -> DiskStoreBuilder {
        DiskStoreBuilder::named(name)
    }

    /// Access the underlying [`Db`], e.g. to flush manually.
    #[must_use]
    pub fn connection(&self) -> &Db {
        &self.db
    }

    fn sled_key(ns: Namespace, key: &CacheKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(ns.prefix().len() + key.as_bytes().len());
        out.extend_from_slice(ns.prefix());
        out.extend_from_slice(key.as_bytes());
        out
    }

    fn read_entry(&self, key: &CacheKey) -> Result<Option<DiskEntry>, StoreError> {
        for ns in Namespace::ALL {
            if let Some(raw) = self.db.get(Self::sled_key(ns, key))? {
                return Ok(Some(rmp_serde::from_slice(&raw)?));
            }
        }
        Ok(None)
    }
}

impl PersistentStore for DiskStore {
    fn put(
        &self,
        key: &CacheKey,
        namespace: Namespace,
        ts: Timestamp,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let entry = DiskEntry {
            ts,
            payload: bytes.to_vec(),
            version: STORE_VERSION,
        };
        self.db.insert(Self::sled_key(namespace, key), rmp_serde::to_vec(&entry)?)?;
        // At most one namespace stays live per key, so lookups can't
        // resurrect a stale entry after the value changes shape.
        for ns in Namespace::ALL {
            if ns != namespace {
                self.db.remove(Self::sled_key(ns, key))?;
            }
        }
        if self.sync_on_write {
            self.db.flush()?;
        }
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> Result<Option<(Timestamp, Vec<u8>)>, StoreError> {
        Ok(self.read_entry(key)?.map(|e| (e.ts, e.payload)))
    }

    fn mtime(&self, key: &CacheKey) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.read_entry(key)?.map(|e| e.ts))
    }
}
