//! Provably-fair outcome generation.
//!
//! Every round commits to its outcome before betting opens. The commitment is
//! an HMAC of the outcome, written as a decimal string, keyed with a random
//! secret. Publishing the hash binds the round to its outcome; revealing the
//! secret and outcome later lets anyone recompute and check it.

use std::fmt;

use hmac::{Hmac, Mac, digest::KeyInit};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::{options::GameOptions, traits::EntropySource};

/// Keyed-hash algorithm used for round commitments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// HMAC-SHA1.
    Sha1,
    /// HMAC-SHA224.
    Sha224,
    /// HMAC-SHA256.
    Sha256,
    /// HMAC-SHA384.
    Sha384,
    /// HMAC-SHA512.
    Sha512,
}

impl HashAlgorithm {
    /// Length of the hex-encoded digest.
    pub const fn hex_len(self) -> usize {
        let bits = match self {
            Self::Sha1 => 160,
            Self::Sha224 => 224,
            Self::Sha256 => 256,
            Self::Sha384 => 384,
            Self::Sha512 => 512,
        };
        bits / 4
    }

    /// Computes the hex-encoded HMAC of `message` under `key`.
    pub fn keyed_hash(self, key: &[u8], message: &[u8]) -> String {
        match self {
            Self::Sha1 => mac_hex::<Hmac<Sha1>>(key, message),
            Self::Sha224 => mac_hex::<Hmac<Sha224>>(key, message),
            Self::Sha256 => mac_hex::<Hmac<Sha256>>(key, message),
            Self::Sha384 => mac_hex::<Hmac<Sha384>>(key, message),
            Self::Sha512 => mac_hex::<Hmac<Sha512>>(key, message),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

fn mac_hex<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> String {
    // HMAC pads or hashes the key, so every key length is valid.
    let mut mac = <M as KeyInit>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Computes the commitment hash binding `secret` and `lucky_number`.
pub fn commitment_hash(algorithm: HashAlgorithm, secret: &str, lucky_number: i64) -> String {
    algorithm.keyed_hash(secret.as_bytes(), lucky_number.to_string().as_bytes())
}

/// A round's secret, outcome, and the hash committing to them.
#[derive(Clone, PartialEq, Eq)]
pub struct Commitment {
    secret: String,
    lucky_number: i64,
    hash: String,
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commitment").field("hash", &self.hash).finish_non_exhaustive()
    }
}

impl Commitment {
    /// Draws a fresh secret and outcome and commits to them.
    pub fn generate(options: &GameOptions, entropy: &mut (impl EntropySource + ?Sized)) -> Self {
        let secret = entropy.random_string(options.round_secret_length);
        let lucky_number =
            entropy.random_integer(options.min_lucky_number, options.max_lucky_number);
        Self::from_reveal(secret, lucky_number, options.round_hash_algorithm)
    }

    /// Rebuilds a commitment from a known secret and outcome.
    pub fn from_reveal(secret: String, lucky_number: i64, algorithm: HashAlgorithm) -> Self {
        let hash = commitment_hash(algorithm, &secret, lucky_number);
        Self { secret, lucky_number, hash }
    }

    /// Returns the commitment hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Returns the secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns the outcome.
    pub const fn lucky_number(&self) -> i64 {
        self.lucky_number
    }

    /// Returns true if `hash` is the commitment of this secret and outcome.
    pub fn matches(&self, algorithm: HashAlgorithm, hash: &str) -> bool {
        commitment_hash(algorithm, &self.secret, self.lucky_number).eq_ignore_ascii_case(hash)
    }
}
