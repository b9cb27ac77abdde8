// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! 2-of-2 secret splitting.
//!
//! The user secret is split by XOR with a random pad: either share alone is
//! uniformly random, both together give the secret back. One share goes to
//! the authorization server, the other rides along on KMS calls.

use ring::rand::SecureRandom;

pub const SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("random generator failure")]
    Rng,
}

pub struct SecretShares {
    /// Attached to authorization KMS calls.
    pub kms_share: Vec<u8>,
    /// Posted to the authorization server.
    pub server_share: Vec<u8>,
}

impl std::fmt::Debug for SecretShares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretShares(<redacted>)")
    }
}

/// Generate a fresh secret and split it.
pub fn generate(rng: &dyn SecureRandom) -> Result<SecretShares, SecretError> {
    let mut secret = [0u8; SECRET_LEN];
    rng.fill(&mut secret).map_err(|_| SecretError::Rng)?;
    split(&secret, rng)
}

pub fn split(secret: &[u8], rng: &dyn SecureRandom) -> Result<SecretShares, SecretError> {
    let mut pad = vec![0u8; secret.len()];
    rng.fill(&mut pad).map_err(|_| SecretError::Rng)?;

    let server_share = secret.iter().zip(&pad).map(|(s, p)| s ^ p).collect();
    Ok(SecretShares {
        kms_share: pad,
        server_share,
    })
}

/// Recover the secret from both shares.
#[cfg(test)]
pub(crate) fn combine(first: &[u8], second: &[u8]) -> Vec<u8> {
    assert_eq!(first.len(), second.len(), "share lengths differ");
    first.iter().zip(second).map(|(a, b)| a ^ b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    #[test]
    fn shares_recombine() {
        let rng = SystemRandom::new();
        let secret = [42u8; SECRET_LEN];
        let shares = split(&secret, &rng).unwrap();

        assert_ne!(shares.kms_share, secret);
        assert_ne!(shares.server_share, secret);
        assert_eq!(combine(&shares.kms_share, &shares.server_share), secret);
        assert_eq!(combine(&shares.server_share, &shares.kms_share), secret);
    }

    #[test]
    fn generated_secrets_differ() {
        let rng = SystemRandom::new();
        let a = generate(&rng).unwrap();
        let b = generate(&rng).unwrap();
        assert_eq!(a.kms_share.len(), SECRET_LEN);
        assert_ne!(
            combine(&a.kms_share, &a.server_share),
            combine(&b.kms_share, &b.server_share)
        );
    }

    #[test]
    fn split_keeps_secret_length() {
        let shares = split(&[1, 2, 3], &SystemRandom::new()).unwrap();
        assert_eq!(shares.kms_share.len(), 3);
        assert_eq!(shares.server_share.len(), 3);
    }
}
