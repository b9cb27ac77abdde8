// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User identity repository.
//!
//! The identity (subject and profile claims) is recorded once, on the first
//! successful callback, and never rewritten afterward.

use super::super::{read_json, to_json, KeyValueStore, StorageResult};
use crate::models::UserIdentity;

pub const USERS_NAMESPACE: &str = "users";

pub struct UserRepository<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> UserRepository<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn get(&self, sub: &str) -> StorageResult<UserIdentity> {
        read_json(self.store, USERS_NAMESPACE, sub)
    }

    /// Record an identity unless one already exists for the subject.
    ///
    /// Returns `true` when the record was created.
    pub fn record(&self, identity: &UserIdentity) -> StorageResult<bool> {
        let bytes = to_json(identity)?;
        match self.store.insert_new(USERS_NAMESPACE, &identity.sub, &bytes) {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
