//! Transactional storage layer for CdEDB.
//!
//! Records are CBOR-encoded serde structs stored in named column families.
//! Every read and write happens inside a [`StoreTx`]; [`StoreExt::atomic`]
//! commits the transaction when the closure succeeds and discards it
//! otherwise, [`StoreExt::simulate`] always discards it.
//!
//! # Architecture
//!
//! - [`Store`] / [`StoreTx`]: raw byte-level transaction interface
//! - [`TxExt`]: typed CBOR access, index scans and id sequences
//! - [`Records`]: typed accessors for every domain record
//! - [`MemoryStore`]: in-memory backend with optimistic concurrency control
//! - [`RocksStore`]: `RocksDB` optimistic transactions (feature `rocksdb-backend`)
//!
//! Both backends validate at commit time and fail with
//! [`StoreError::Conflict`] if data read by the transaction changed in the
//! meantime.
//!
//! # Example
//!
//! ```
//! use cdedb_store::{MemoryStore, Records, StoreError, StoreExt, TxExt};
//! use cdedb_core::{Persona, PersonaId};
//!
//! let store = MemoryStore::new();
//! let id = store
//!     .atomic(|tx| {
//!         let id = PersonaId::new(tx.next_id("personas")?);
//!         tx.put_persona(&Persona::new(id, "Anton", "Armin", chrono::Utc::now()))?;
//!         Ok::<_, StoreError>(id)
//!     })
//!     .unwrap();
//! let persona = store.atomic(|tx| tx.get_persona(id)).unwrap();
//! assert!(persona.is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod records;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::Records;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::schema::cf;

/// A key/value pair returned by prefix scans.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// A storage backend able to start transactions.
pub trait Store: Send + Sync {
    /// Start a new transaction.
    ///
    /// Dropping the transaction without calling [`StoreTx::commit`] discards
    /// every write.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>>;
}

/// An open transaction.
///
/// Reads see the transaction's own writes.
pub trait StoreTx {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get(&mut self, family: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put(&mut self, family: &str, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete(&mut self, family: &str, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_prefix(&mut self, family: &str, prefix: &[u8]) -> Result<Vec<KeyValue>>;

    /// Commit all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if a concurrent transaction changed
    /// data this transaction depends on.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Transaction helpers available on every [`Store`].
pub trait StoreExt: Store {
    /// Run `f` inside a transaction and commit it.
    ///
    /// If `f` fails the transaction is discarded and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or the commit error converted into `E`.
    fn atomic<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut tx = self.begin()?;
        let value = f(tx.as_mut())?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside a transaction and discard every write.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`.
    fn simulate<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut tx = self.begin()?;
        f(tx.as_mut())
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Typed helpers on top of the raw transaction interface.
pub trait TxExt: StoreTx {
    /// Read and decode a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the record does not decode.
    fn get_record<V: DeserializeOwned>(&mut self, family: &str, key: &[u8]) -> Result<Option<V>> {
        self.get(family, key)?
            .map(|data| deserialize(&data))
            .transpose()
    }

    /// Encode and write a record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    fn put_record<V: Serialize>(&mut self, family: &str, key: &[u8], value: &V) -> Result<()> {
        let data = serialize(value)?;
        self.put(family, key, data)
    }

    /// Decode every record whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a record does not decode.
    fn scan_records<V: DeserializeOwned>(&mut self, family: &str, prefix: &[u8]) -> Result<Vec<V>> {
        self.scan_prefix(family, prefix)?
            .into_iter()
            .map(|(_, data)| deserialize(&data))
            .collect()
    }

    /// Child ids listed in an index under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or an index key is malformed.
    fn index_children(&mut self, family: &str, parent: i64) -> Result<Vec<i64>> {
        self.scan_prefix(family, &keys::index_prefix(parent))?
            .into_iter()
            .map(|(key, _)| {
                keys::index_child(&key).ok_or_else(|| {
                    StoreError::Database(format!("malformed index key in {family}"))
                })
            })
            .collect()
    }

    /// Hand out the next id of a sequence, starting at 1.
    ///
    /// The allocation is part of the transaction: concurrent allocations
    /// conflict, and an aborted transaction does not consume the id.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence cannot be read or written.
    fn next_id(&mut self, sequence: &str) -> Result<i64> {
        let key = keys::sequence_key(sequence);
        let last: i64 = self.get_record(cf::SEQUENCES, &key)?.unwrap_or(0);
        let next = last + 1;
        self.put_record(cf::SEQUENCES, &key, &next)?;
        Ok(next)
    }
}

impl<T: StoreTx + ?Sized> TxExt for T {}

/// Serialize a value using CBOR.
pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
pub(crate) fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}
