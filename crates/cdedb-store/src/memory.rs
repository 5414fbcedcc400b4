//! In-memory storage with optimistic concurrency control.
//!
//! Every committed write stamps its key with a new version. A transaction
//! remembers the version counter at its start together with every key and
//! prefix it read; at commit, any of those that was written after the start
//! aborts the transaction with [`StoreError::Conflict`]. This gives
//! serializable transactions, including phantom protection for scans.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, StoreError};
use crate::schema::all_column_families;
use crate::{KeyValue, Store, StoreTx};

#[derive(Debug, Clone)]
struct Versioned {
    /// `None` marks a deleted key, kept so readers notice the deletion.
    value: Option<Vec<u8>>,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    version: u64,
    families: HashMap<String, BTreeMap<Vec<u8>, Versioned>>,
}

impl State {
    fn family(&self, name: &str) -> Result<&BTreeMap<Vec<u8>, Versioned>> {
        self.families
            .get(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }
}

/// In-memory storage backend.
///
/// Used by tests and by deployments configured with `STORE_BACKEND=memory`.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store with all column families.
    #[must_use]
    pub fn new() -> Self {
        let families = all_column_families()
            .into_iter()
            .map(|name| (name.to_string(), BTreeMap::new()))
            .collect();
        Self {
            state: Mutex::new(State {
                version: 0,
                families,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // commits apply without fallible steps, so poisoned state is consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let start = self.lock().version;
        Ok(Box::new(MemoryTx {
            store: self,
            start,
            reads: HashSet::new(),
            scans: Vec::new(),
            writes: BTreeMap::new(),
        }))
    }
}

struct MemoryTx<'a> {
    store: &'a MemoryStore,
    start: u64,
    reads: HashSet<(String, Vec<u8>)>,
    scans: Vec<(String, Vec<u8>)>,
    writes: BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>,
}

impl MemoryTx<'_> {
    fn validate(&self, state: &State) -> Result<()> {
        for (family, key) in &self.reads {
            let changed = state
                .family(family)?
                .get(key)
                .is_some_and(|entry| entry.version > self.start);
            if changed {
                return Err(StoreError::Conflict);
            }
        }
        for (family, prefix) in &self.scans {
            let changed = state
                .family(family)?
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .any(|(_, entry)| entry.version > self.start);
            if changed {
                return Err(StoreError::Conflict);
            }
        }
        Ok(())
    }
}

impl StoreTx for MemoryTx<'_> {
    fn get(&mut self, family: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(&(family.to_string(), key.to_vec())) {
            return Ok(pending.clone());
        }
        self.reads.insert((family.to_string(), key.to_vec()));
        let state = self.store.lock();
        Ok(state
            .family(family)?
            .get(key)
            .and_then(|entry| entry.value.clone()))
    }

    fn put(&mut self, family: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.store.lock().family(family)?;
        self.writes
            .insert((family.to_string(), key.to_vec()), Some(value));
        Ok(())
    }

    fn delete(&mut self, family: &str, key: &[u8]) -> Result<()> {
        self.store.lock().family(family)?;
        self.writes.insert((family.to_string(), key.to_vec()), None);
        Ok(())
    }

    fn scan_prefix(&mut self, family: &str, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        self.scans.push((family.to_string(), prefix.to_vec()));
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = {
            let state = self.store.lock();
            state
                .family(family)?
                .range(prefix.to_vec()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .filter_map(|(key, entry)| entry.value.clone().map(|value| (key.clone(), value)))
                .collect()
        };
        let pending = self
            .writes
            .range((family.to_string(), prefix.to_vec())..)
            .take_while(|((name, key), _)| name == family && key.starts_with(prefix));
        for ((_, key), value) in pending {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let store = self.store;
        let mut state = store.lock();
        if let Err(err) = self.validate(&state) {
            tracing::debug!(start = self.start, current = state.version, "memory transaction conflict");
            return Err(err);
        }
        state.version += 1;
        let version = state.version;
        let writes = self.writes;
        for ((family, key), value) in writes {
            if let Some(entries) = state.families.get_mut(&family) {
                entries.insert(key, Versioned { value, version });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Records;
    use crate::{StoreExt, TxExt};
    use cdedb_core::{Persona, PersonaId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn persona(id: i64) -> Persona {
        Persona::new(PersonaId::new(id), "Berta", "Beispiel", Utc::now())
    }

    #[test]
    fn failed_closure_writes_nothing() {
        let store = MemoryStore::new();
        let result: std::result::Result<(), StoreError> = store.atomic(|tx| {
            tx.put_persona(&persona(1))?;
            Err(StoreError::NotFound)
        });
        assert!(result.is_err());
        assert!(store.atomic(|tx| tx.get_persona(PersonaId::new(1))).unwrap().is_none());
    }

    #[test]
    fn simulate_discards_writes() {
        let store = MemoryStore::new();
        let seen = store
            .simulate(|tx| {
                tx.put_persona(&persona(1))?;
                tx.get_persona(PersonaId::new(1))
            })
            .unwrap();
        assert!(seen.is_some());
        assert!(store.atomic(|tx| tx.get_persona(PersonaId::new(1))).unwrap().is_none());
    }

    #[test]
    fn concurrent_read_modify_write_conflicts() {
        let store = MemoryStore::new();
        store.atomic(|tx| tx.put_persona(&persona(1))).unwrap();

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();

        let mut a = first.get_persona(PersonaId::new(1)).unwrap().unwrap();
        let mut b = second.get_persona(PersonaId::new(1)).unwrap().unwrap();
        a.balance += dec!(10);
        b.balance += dec!(20);
        first.put_persona(&a).unwrap();
        second.put_persona(&b).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(StoreError::Conflict)));

        let stored = store.atomic(|tx| tx.get_persona(PersonaId::new(1))).unwrap().unwrap();
        assert_eq!(stored.balance, dec!(10));
    }

    #[test]
    fn scans_detect_phantoms() {
        let store = MemoryStore::new();
        let mut reader = store.begin().unwrap();
        assert!(reader.list_personas().unwrap().is_empty());
        reader.put_persona(&persona(2)).unwrap();

        store.atomic(|tx| tx.put_persona(&persona(1))).unwrap();
        assert!(matches!(reader.commit(), Err(StoreError::Conflict)));
    }

    #[test]
    fn scans_see_own_writes_and_deletes() {
        let store = MemoryStore::new();
        store
            .atomic(|tx| {
                tx.put_persona(&persona(1))?;
                tx.put_persona(&persona(2))
            })
            .unwrap();
        let ids = store
            .simulate(|tx| {
                tx.delete(crate::schema::cf::PERSONAS, &crate::keys::id_key(1))?;
                tx.put_persona(&persona(3))?;
                tx.list_personas()
            })
            .unwrap()
            .into_iter()
            .map(|p| p.id.get())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn sequences_are_transactional() {
        let store = MemoryStore::new();
        assert_eq!(store.atomic(|tx| tx.next_id("personas")).unwrap(), 1);
        let _ = store.simulate(|tx| tx.next_id("personas")).unwrap();
        assert_eq!(store.atomic(|tx| tx.next_id("personas")).unwrap(), 2);
    }
}
