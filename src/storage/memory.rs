// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{KeyValueStore, StorageError, StorageResult};

type Namespaces = HashMap<String, HashMap<String, Vec<u8>>>;

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemStore {
    data: RwLock<Namespaces>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemStore {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Vec<u8>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        data.get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{namespace}/{key}")))
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn insert_new(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let entries = data.entry(namespace.to_string()).or_default();
        if entries.contains_key(key) {
            return Err(StorageError::AlreadyExists(format!("{namespace}/{key}")));
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
