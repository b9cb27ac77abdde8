// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded key-value database backed by redb (pure Rust, ACID).
//!
//! Each namespace maps to its own redb table of `&str -> &[u8]`. Tables are
//! created lazily by the first write; reading from a namespace that has never
//! been written yields [`StorageError::NotFound`].

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};

use super::{KeyValueStore, StorageError, StorageResult};

fn table(namespace: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(namespace)
}

fn not_found(namespace: &str, key: &str) -> StorageError {
    StorageError::NotFound(format!("{namespace}/{key}"))
}

/// Embedded ACID key-value database.
pub struct KvDatabase {
    db: Database,
}

impl KvDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let db = Database::create(path)?;
        Ok(Self { db })
    }
}

impl KeyValueStore for KvDatabase {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Vec<u8>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(table(namespace)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Err(not_found(namespace, key)),
            Err(e) => return Err(e.into()),
        };

        match table.get(key)? {
            Some(value) => Ok(value.value().to_vec()),
            None => Err(not_found(namespace, key)),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table(namespace))?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_new(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        // redb serializes write transactions, so check-then-insert is atomic.
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table(namespace))?;
            let exists = table.get(key)?.is_some();
            if exists {
                return Err(StorageError::AlreadyExists(format!("{namespace}/{key}")));
            }
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
