//! Minimal key-value capability set: point reads/writes, ordered prefix
//! scans, and atomic batches. Backends: in-memory (tests) and sled (disk).
//!
//! Stores are safe to read from anywhere; all writes are funneled through a
//! single logical writer (the node's engine task), so backends only need
//! batch atomicity, not cross-batch transactions.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::RwLock;

use clawnet_core::error::ClawError;

/// One mutation inside an atomic batch.
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Storage capability the event store is written against.
pub trait Kv: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ClawError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ClawError>;

    fn delete(&self, key: &[u8]) -> Result<(), ClawError>;

    /// Ordered scan of keys beginning with `prefix`. `start` (inclusive) and
    /// `end` (exclusive) further bound the scan; `limit` caps the result.
    fn range(
        &self,
        prefix: &[u8],
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ClawError>;

    /// Apply all ops atomically: either every op lands or none do.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), ClawError>;

    /// Flush pending writes to durable storage.
    fn flush(&self) -> Result<(), ClawError>;
}

/// Smallest key strictly greater than every key with `prefix`, or `None`
/// when the prefix is all 0xFF.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

// ── In-memory backend ────────────────────────────────────────────────────────

/// BTreeMap-backed store used by unit tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ClawError> {
        Ok(self.map.read().expect("kv lock poisoned").get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ClawError> {
        self.map
            .write()
            .expect("kv lock poisoned")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), ClawError> {
        self.map.write().expect("kv lock poisoned").remove(key);
        Ok(())
    }

    fn range(
        &self,
        prefix: &[u8],
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ClawError> {
        let lower: Vec<u8> = match start {
            Some(s) if s > prefix => s.to_vec(),
            _ => prefix.to_vec(),
        };
        let upper = match (end, prefix_successor(prefix)) {
            (Some(e), Some(succ)) if e.to_vec() < succ => Bound::Excluded(e.to_vec()),
            (Some(e), None) => Bound::Excluded(e.to_vec()),
            (_, Some(succ)) => Bound::Excluded(succ),
            (None, None) => Bound::Unbounded,
        };
        let map = self.map.read().expect("kv lock poisoned");
        let iter = map
            .range((Bound::Included(lower), upper))
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), ClawError> {
        let mut map = self.map.write().expect("kv lock poisoned");
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), ClawError> {
        Ok(())
    }
}

// ── Sled backend ─────────────────────────────────────────────────────────────

/// Disk-backed store. One sled tree holds every index as byte-prefixed keys
/// so a single `sled::Batch` covers a whole event append atomically.
pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ClawError> {
        let db = sled::open(path).map_err(|e| ClawError::StoreIo(e.to_string()))?;
        Ok(Self { db })
    }
}

impl Kv for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ClawError> {
        self.db
            .get(key)
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(|e| ClawError::StoreIo(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ClawError> {
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| ClawError::StoreIo(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), ClawError> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| ClawError::StoreIo(e.to_string()))
    }

    fn range(
        &self,
        prefix: &[u8],
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ClawError> {
        let lower: Vec<u8> = match start {
            Some(s) if s > prefix => s.to_vec(),
            _ => prefix.to_vec(),
        };
        let mut out = Vec::new();
        for item in self.db.range(lower..) {
            let (k, v) = item.map_err(|e| ClawError::StoreIo(e.to_string()))?;
            if !k.starts_with(prefix) {
                break;
            }
            if let Some(e) = end {
                if k.as_ref() >= e {
                    break;
                }
            }
            out.push((k.to_vec(), v.to_vec()));
            if let Some(n) = limit {
                if out.len() >= n {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), ClawError> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key, value),
                BatchOp::Delete { key } => batch.remove(key),
            }
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| ClawError::StoreIo(e.to_string()))
    }

    fn flush(&self) -> Result<(), ClawError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| ClawError::StoreIo(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(kv: &dyn Kv) {
        kv.put(b"a/1", b"one").unwrap();
        kv.put(b"a/2", b"two").unwrap();
        kv.put(b"b/1", b"other").unwrap();

        assert_eq!(kv.get(b"a/1").unwrap().as_deref(), Some(b"one".as_ref()));
        assert_eq!(kv.get(b"missing").unwrap(), None);

        let scanned = kv.range(b"a/", None, None, None).unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"a/1");

        let limited = kv.range(b"a/", None, None, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);

        let bounded = kv
            .range(b"a/", Some(b"a/2".as_ref()), None, None)
            .unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].1, b"two");

        kv.batch(vec![
            BatchOp::Put { key: b"a/3".to_vec(), value: b"three".to_vec() },
            BatchOp::Delete { key: b"a/1".to_vec() },
        ])
        .unwrap();
        assert_eq!(kv.get(b"a/1").unwrap(), None);
        assert_eq!(kv.get(b"a/3").unwrap().as_deref(), Some(b"three".as_ref()));

        kv.delete(b"b/1").unwrap();
        assert_eq!(kv.get(b"b/1").unwrap(), None);
        kv.flush().unwrap();
    }

    #[test]
    fn memory_backend() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn sled_backend() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&SledKv::open(dir.path()).unwrap());
    }

    #[test]
    fn prefix_successor_carries() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x61, 0xFF]), Some(vec![0x62]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }
}
