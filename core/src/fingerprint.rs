use blake3::Hasher;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

pub const SHORT_LEN: usize = 8;
pub const MIN_PREFIX_LEN: usize = 4;
const INDEX_CAPACITY: usize = 64;

/// Hex-encoded blake3 digest of a clipboard payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update(data);
    Fingerprint(hasher.finalize().to_hex().to_string())
}

/// Accepts prefixes typed by a user to address an item.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix.len() >= MIN_PREFIX_LEN
        && prefix.len() <= blake3::OUT_LEN * 2
        && prefix.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Recently seen fingerprints mapped to their row ids.
///
/// Owned by the store, which keeps it coherent on insert and delete.
pub struct FingerprintIndex {
    recent: Mutex<LruCache<Fingerprint, i64>>,
}

impl Default for FingerprintIndex {
    fn default() -> Self {
        Self::new(INDEX_CAPACITY)
    }
}

impl FingerprintIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<i64> {
        self.recent.lock().get(fp).copied()
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.recent.lock().contains(fp)
    }

    pub fn remember(&self, fp: Fingerprint, id: i64) {
        self.recent.lock().put(fp, id);
    }

    pub fn forget(&self, fp: &Fingerprint) {
        self.recent.lock().pop(fp);
    }

    pub fn clear(&self) {
        self.recent.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.lock().is_empty()
    }
}
