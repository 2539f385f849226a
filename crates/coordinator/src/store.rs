//! Typed keyed storage over the replicated key-value store.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::{Error, Result};

/// Backing key-value store provided by the host state machine.
///
/// Replicated and deterministic: every honest replica observes
/// identical contents at identical heights, and iteration is in
/// lexicographic key order.
pub trait KvStore {
    /// Fetch a raw value.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Store a raw value.
    fn set(&mut self, key: &[u8], value: Vec<u8>);

    /// Remove a raw value.
    fn delete(&mut self, key: &[u8]);

    /// Whether a key is present.
    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// All `(key, value)` pairs under a prefix, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// In-memory store used by tests and single-process hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Full contents, for determinism assertions across replicas.
    pub fn dump(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.entries
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.entries.insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }

    fn has(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Typed view over one keyspace of the backing store.
///
/// Keys are `{prefix}/{key}` strings; composite keys join their parts
/// with `:` (see [`pair_key`]) so a `"{id}:"` scan yields exactly one
/// session's rows.
pub(crate) struct Table<V> {
    prefix: &'static str,
    marker: PhantomData<fn() -> V>,
}

impl<V> Table<V>
where
    V: Serialize + DeserializeOwned,
{
    pub(crate) const fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            marker: PhantomData,
        }
    }

    fn raw_key(&self, key: &str) -> Vec<u8> {
        let mut raw =
            Vec::with_capacity(self.prefix.len() + 1 + key.len());
        raw.extend_from_slice(self.prefix.as_bytes());
        raw.push(b'/');
        raw.extend_from_slice(key.as_bytes());
        raw
    }

    pub(crate) fn get<S: KvStore>(
        &self,
        store: &S,
        key: &str,
    ) -> Result<Option<V>> {
        match store.get(&self.raw_key(key)) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`Table::get`] but a miss is a [`Error::NotFound`].
    pub(crate) fn must_get<S: KvStore>(
        &self,
        store: &S,
        key: &str,
    ) -> Result<V> {
        self.get(store, key)?.ok_or_else(|| {
            Error::NotFound(format!("{} {key}", self.prefix))
        })
    }

    pub(crate) fn set<S: KvStore>(
        &self,
        store: &mut S,
        key: &str,
        value: &V,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        store.set(&self.raw_key(key), bytes);
        Ok(())
    }

    pub(crate) fn has<S: KvStore>(&self, store: &S, key: &str) -> bool {
        store.has(&self.raw_key(key))
    }

    pub(crate) fn delete<S: KvStore>(&self, store: &mut S, key: &str) {
        store.delete(&self.raw_key(key));
    }

    /// All values whose key starts with `key_prefix`, in key order.
    pub(crate) fn scan<S: KvStore>(
        &self,
        store: &S,
        key_prefix: &str,
    ) -> Result<Vec<V>> {
        store
            .scan_prefix(&self.raw_key(key_prefix))
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
            .collect()
    }
}

/// Composite `(a, b)` key encoded as `a:b`.
pub(crate) fn pair_key(a: &str, b: &str) -> String {
    format!("{a}:{b}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(
        Debug, Clone, PartialEq, Serialize, Deserialize,
    )]
    struct Row {
        id: String,
        value: u64,
    }

    const ROWS: Table<Row> = Table::new("test/rows");

    #[test]
    fn get_set_has_delete() -> crate::Result<()> {
        let mut store = MemoryStore::new();
        let row = Row {
            id: "a".into(),
            value: 1,
        };
        assert!(ROWS.get(&store, "a")?.is_none());
        ROWS.set(&mut store, "a", &row)?;
        assert!(ROWS.has(&store, "a"));
        assert_eq!(ROWS.get(&store, "a")?, Some(row));
        ROWS.delete(&mut store, "a");
        assert!(!ROWS.has(&store, "a"));
        Ok(())
    }

    #[test]
    fn must_get_reports_not_found() {
        let store = MemoryStore::new();
        let err = ROWS.must_get(&store, "missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn scan_is_ordered_and_prefix_scoped() -> crate::Result<()> {
        let mut store = MemoryStore::new();
        for (key, value) in [
            ("s1:bb", 2),
            ("s1:aa", 1),
            ("s10:aa", 3),
            ("s2:aa", 4),
        ] {
            ROWS.set(
                &mut store,
                key,
                &Row {
                    id: key.into(),
                    value,
                },
            )?;
        }

        let rows = ROWS.scan(&store, "s1:")?;
        let values: Vec<u64> = rows.iter().map(|r| r.value).collect();
        // Lexicographic within the session, and `s10` rows excluded.
        assert_eq!(values, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn tables_do_not_collide() -> crate::Result<()> {
        const OTHER: Table<Row> = Table::new("test/rows2");
        let mut store = MemoryStore::new();
        ROWS.set(
            &mut store,
            "a",
            &Row {
                id: "a".into(),
                value: 1,
            },
        )?;
        assert!(OTHER.get(&store, "a")?.is_none());
        assert!(OTHER.scan(&store, "")?.is_empty());
        Ok(())
    }
}
