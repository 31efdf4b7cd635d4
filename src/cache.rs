//! The two-tier cache: an in-memory table over a persistent store.
//!
//! Writes go to both tiers (subject to flags); reads prefer memory and fall
//! back to disk. The memory tier is write-through only, so a disk read
//! never populates it and a `volatile` value can be produced, consumed,
//! and dropped deterministically.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use thiserror::Error;

use crate::codec::{CodecError, CodecRegistry, ValueCodec};
use crate::key::CacheKey;
use crate::stores::{MemoryStore, StoreError};
use crate::value::Value;
use crate::{PersistentStore, Timestamp};

/// Seconds since the epoch, as the cache stamps them.
pub(crate) fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Per-target caching flags.
///
/// `ephemeral` values are never written to the persistent store; `volatile`
/// values are never retained in memory. Combining both would cache the
/// value nowhere and is rejected at registration time.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Flags {
    pub ephemeral: bool,
    pub volatile: bool,
}

impl Flags {
    pub const NONE: Flags = Flags {
        ephemeral: false,
        volatile: false,
    };
    pub const EPHEMERAL: Flags = Flags {
        ephemeral: true,
        volatile: false,
    };
    pub const VOLATILE: Flags = Flags {
        ephemeral: false,
        volatile: true,
    };

    /// Parse string-form flags. Unrecognized strings are silently ignored.
    pub fn from_strs<'a, I>(flags: I) -> Flags
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Flags::NONE;
        for flag in flags {
            match flag {
                "ephemeral" => out.ephemeral = true,
                "volatile" => out.volatile = true,
                _ => {}
            }
        }
        out
    }

    pub(crate) fn unstorable(self) -> bool {
        self.ephemeral && self.volatile
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("persistent store failure")]
    Store(#[from] StoreError),
    #[error("value codec failure")]
    Codec(#[from] CodecError),
}

pub(crate) struct CacheManager {
    memory: MemoryStore,
    disk: Box<dyn PersistentStore + Send + Sync>,
    codecs: CodecRegistry,
}

impl CacheManager {
    pub(crate) fn new(disk: Box<dyn PersistentStore + Send + Sync>) -> CacheManager {
        CacheManager {
            memory: MemoryStore::new(),
            disk,
            codecs: CodecRegistry::standard(),
        }
    }

    pub(crate) fn register_codec(&mut self, codec: Box<dyn ValueCodec + Send + Sync>) {
        self.codecs.register(codec);
    }

    /// Cache `value` under `key`, honoring `flags`. Returns the timestamp
    /// the entry was stamped with.
    pub(crate) fn store(
        &self,
        key: &CacheKey,
        value: Value,
        flags: Flags,
    ) -> Result<Timestamp, CacheError> {
        let ts = now();
        if !flags.ephemeral {
            let (ns, bytes) = self.codecs.encode(&value)?;
            self.disk.put(key, ns, ts, &bytes)?;
        }
        if flags.volatile {
            self.memory.remove(key);
        } else {
            self.memory.set(key.clone(), ts, value);
        }
        trace!("cached '{key}' at {ts} ({flags:?})");
        Ok(ts)
    }

    /// Fetch the cached entry for `key`, or `None` when it isn't available.
    ///
    /// All read-side failures (missing entry, store I/O, undecodable bytes)
    /// degrade to `None`, which the engine treats as "must rebuild".
    pub(crate) fn load(&self, key: &CacheKey) -> Option<(Timestamp, Value)> {
        if let Some(hit) = self.memory.get(key) {
            return Some(hit);
        }
        match self.disk.get(key) {
            Ok(Some((ts, bytes))) => match self.codecs.decode(&bytes) {
                Ok(value) => Some((ts, value)),
                Err(e) => {
                    debug!("treating undecodable entry for '{key}' as missing: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!("treating unreadable entry for '{key}' as missing: {e}");
                None
            }
        }
    }

    /// The timestamp `key` was last cached at, from either tier.
    pub(crate) fn mtime(&self, key: &CacheKey) -> Option<Timestamp> {
        self.memory
            .mtime(key)
            .or_else(|| self.disk.mtime(key).ok().flatten())
    }
}
