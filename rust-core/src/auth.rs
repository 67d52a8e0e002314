//! auth.rs – PBKDF2-SHA256 credential store for the entry form.

use anyhow::{Context, Result};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{collections::BTreeMap, fs, path::Path};
use subtle::ConstantTimeEq;

pub const PBKDF2_SHA256: &str = "pbkdf2_sha256";
pub const DEFAULT_ITERATIONS: u32 = 200_000;
const KEY_LEN: usize = 32;
const DUMMY_SALT: [u8; 16] = [0x5a; 16];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub algo: String,
    #[serde(rename = "iter")]
    pub iterations: u32,
    /// hex
    pub salt: String,
    /// hex, 32 bytes
    pub hash: String,
}

impl CredentialRecord {
    /// Derives a record for `password`; used to provision users.
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Self {
        let mut dk = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut dk);
        Self {
            algo: PBKDF2_SHA256.to_owned(),
            iterations,
            salt: hex::encode(salt),
            hash: hex::encode(dk),
        }
    }

    fn matches(&self, password: &str) -> bool {
        if self.algo != PBKDF2_SHA256 {
            return false;
        }
        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.hash)) else {
            return false;
        };
        if expected.is_empty() {
            return false;
        }
        let mut got = vec![0u8; expected.len()];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, self.iterations, &mut got);
        bool::from(got.as_slice().ct_eq(&expected))
    }
}

/// Username → record, read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialStore {
    users: BTreeMap<String, CredentialRecord>,
}

impl CredentialStore {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("credential store is not valid JSON")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading credential store {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, username: &str, record: CredentialRecord) {
        self.users.insert(username.to_owned(), record);
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// Unknown users still pay for one derivation so the answer takes as long.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(rec) => rec.matches(password),
            None => {
                let iterations = self
                    .users
                    .values()
                    .map(|r| r.iterations)
                    .max()
                    .unwrap_or(DEFAULT_ITERATIONS);
                let mut sink = [0u8; KEY_LEN];
                pbkdf2_hmac::<Sha256>(password.as_bytes(), &DUMMY_SALT, iterations, &mut sink);
                let _ = sink.as_slice().ct_eq(&[0u8; KEY_LEN][..]);
                false
            }
        }
    }
}
