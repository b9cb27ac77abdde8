// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User token repository.
//!
//! Tokens are overwritten on every login; bootstrap data rides along in the
//! same record once the user has been provisioned.

use super::super::{read_json, to_json, KeyValueStore, StorageResult};
use crate::models::UserTokens;

pub const TOKENS_NAMESPACE: &str = "user_tokens";

pub struct TokenRepository<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> TokenRepository<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Look up tokens by subject; a missing record is `NotFound`.
    pub fn get(&self, sub: &str) -> StorageResult<UserTokens> {
        read_json(self.store, TOKENS_NAMESPACE, sub)
    }

    /// Overwrite the record for `tokens.sub`.
    pub fn put(&self, tokens: &UserTokens) -> StorageResult<()> {
        let bytes = to_json(tokens)?;
        self.store.put(TOKENS_NAMESPACE, &tokens.sub, &bytes)
    }

    /// Create the record only if none exists; a conflict is `AlreadyExists`.
    pub fn create(&self, tokens: &UserTokens) -> StorageResult<()> {
        let bytes = to_json(tokens)?;
        self.store.insert_new(TOKENS_NAMESPACE, &tokens.sub, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_bootstrap;
    use crate::storage::KvDatabase;

    fn tokens(sub: &str, access: &str) -> UserTokens {
        UserTokens {
            sub: sub.into(),
            access_token: access.into(),
            refresh_token: "refresh".into(),
            token_type: "Bearer".into(),
            bootstrap: Some(sample_bootstrap()),
        }
    }

    #[test]
    fn create_then_put_overwrites_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let db = KvDatabase::open(&dir.path().join("tokens.redb")).unwrap();
        let repo = TokenRepository::new(&db);

        assert!(repo.get("alice").unwrap_err().is_not_found());
        repo.create(&tokens("alice", "first")).unwrap();
        assert!(repo.create(&tokens("alice", "racer")).unwrap_err().is_conflict());
        assert_eq!(repo.get("alice").unwrap().access_token, "first");

        repo.put(&tokens("alice", "second")).unwrap();
        let stored = repo.get("alice").unwrap();
        assert_eq!(stored.access_token, "second");
        assert_eq!(stored.bootstrap, Some(sample_bootstrap()));
    }
}
