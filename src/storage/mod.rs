// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Durable key-value persistence for user records, keyed by subject and
//! separated into namespaces so that unrelated records never collide.
//!
//! ## Namespaces
//!
//! ```text
//! users        subject -> UserIdentity (JSON)
//! user_tokens  subject -> UserTokens   (JSON, with bootstrap data once provisioned)
//! ```
//!
//! Two backends implement [`KeyValueStore`]:
//!
//! - [`KvDatabase`]: embedded redb file, one redb table per namespace
//! - [`MemStore`]: process-local map, for development and tests
//!
//! Reads distinguish [`StorageError::NotFound`] from every other failure, and
//! [`KeyValueStore::insert_new`] gives a create-if-absent write so concurrent
//! first logins cannot overwrite each other.

pub mod kv_database;
pub mod memory;
pub mod repository;

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::config::{AppConfig, DatabaseType};

pub use kv_database::KvDatabase;
pub use memory::MemStore;
pub use repository::{TokenRepository, UserRepository};

/// File name of the redb database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "wallet.redb";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Namespaced byte store. Implementations must be safe for concurrent use.
pub trait KeyValueStore: Send + Sync {
    /// Read a value; a missing key is [`StorageError::NotFound`].
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Write a value, replacing any previous one.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Write a value only if the key is absent; otherwise
    /// [`StorageError::AlreadyExists`] and the stored value is untouched.
    fn insert_new(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()>;
}

pub(crate) fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    namespace: &str,
    key: &str,
) -> StorageResult<T> {
    let bytes = store.get(namespace, key)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Open the backend selected by `DATABASE_TYPE`.
pub fn open_store(config: &AppConfig) -> StorageResult<Arc<dyn KeyValueStore>> {
    match config.database {
        DatabaseType::Mem => {
            tracing::warn!("using in-memory storage, user records will not survive a restart");
            Ok(Arc::new(MemStore::new()))
        }
        DatabaseType::Redb => {
            let path = config.data_dir.join(DATABASE_FILE);
            tracing::info!(path = %path.display(), "opening redb storage");
            Ok(Arc::new(KvDatabase::open(&path)?))
        }
    }
}
