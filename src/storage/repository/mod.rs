// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the key-value store.
//!
//! Each repository owns one namespace and (de)serializes its entity as JSON.

pub mod tokens;
pub mod users;

pub use tokens::TokenRepository;
pub use users::UserRepository;
