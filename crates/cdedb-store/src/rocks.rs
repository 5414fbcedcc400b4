//! `RocksDB` storage implementation.
//!
//! Transactions are `RocksDB` optimistic transactions with a snapshot taken
//! at begin. Point reads go through `get_for_update`, so a commit fails with
//! [`StoreError::Conflict`] when a key read or written by the transaction
//! was changed by another transaction after the snapshot.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, OptimisticTransactionOptions, Options, Transaction, WriteOptions,
};

use crate::error::{Result, StoreError};
use crate::schema::all_column_families;
use crate::{KeyValue, Store, StoreTx};

type Db = OptimisticTransactionDB<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors).map_err(database_error)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Store for RocksStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let mut txn_opts = OptimisticTransactionOptions::default();
        txn_opts.set_snapshot(true);
        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);
        Ok(Box::new(RocksTx { db: &self.db, txn }))
    }
}

struct RocksTx<'a> {
    db: &'a Db,
    txn: Transaction<'a, Db>,
}

impl<'a> RocksTx<'a> {
    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }
}

impl StoreTx for RocksTx<'_> {
    fn get(&mut self, family: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(family)?;
        self.txn
            .get_for_update_cf(&cf, key, true)
            .map_err(database_error)
    }

    fn put(&mut self, family: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        let cf = self.cf(family)?;
        self.txn.put_cf(&cf, key, value).map_err(database_error)
    }

    fn delete(&mut self, family: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(family)?;
        self.txn.delete_cf(&cf, key).map_err(database_error)
    }

    fn scan_prefix(&mut self, family: &str, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let cf = self.cf(family)?;
        let iter = self
            .txn
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(database_error)?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().map_err(|e| match e.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain => {
                tracing::debug!(error = %e, "rocksdb transaction conflict");
                StoreError::Conflict
            }
            _ => database_error(e),
        })
    }
}

fn database_error(e: rocksdb::Error) -> StoreError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TryAgain => StoreError::Conflict,
        _ => StoreError::Database(e.to_string()),
    }
}
