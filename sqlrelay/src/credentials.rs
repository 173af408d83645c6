//! A trivial in-memory [`CredentialStore`]. The user/ACL database is an
//! external collaborator out of scope for this core; this exists so the
//! binary and its end-to-end tests have something concrete to authenticate
//! against.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use serde::Deserialize;
use sqlrelay_protocol::CredentialStore;

#[derive(Deserialize)]
struct UserFile {
    #[serde(default)]
    users: HashMap<String, String>,
}

/// Maps username to `SHA1(SHA1(password))`, computed once at load time so
/// no plaintext password is retained for the lifetime of the process.
pub struct StaticCredentialStore {
    double_hashes: HashMap<String, Vec<u8>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        StaticCredentialStore {
            double_hashes: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>, password: &[u8]) -> Self {
        self.double_hashes
            .insert(user.into(), sqlrelay_crypto::sha1_twice(password).to_vec());
        self
    }

    /// Loads a TOML file shaped like:
    /// ```toml
    /// [users]
    /// alice = "secret"
    /// ```
    /// Plaintext passwords only ever live for the duration of this call.
    pub fn from_file(path: &str) -> std::io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let parsed: UserFile = toml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut store = StaticCredentialStore::new();
        for (user, password) in parsed.users {
            store = store.with_user(user, password.as_bytes());
        }
        Ok(store)
    }
}

impl Default for StaticCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for StaticCredentialStore {
    fn stored_double_hash(&self, user: &str) -> Option<Vec<u8>> {
        self.double_hashes.get(user).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_has_no_hash() {
        let store = StaticCredentialStore::new().with_user("alice", b"secret");
        assert!(store.stored_double_hash("bob").is_none());
    }

    #[test]
    fn known_user_hashes_match_double_sha1() {
        let store = StaticCredentialStore::new().with_user("alice", b"secret");
        assert_eq!(
            store.stored_double_hash("alice"),
            Some(sqlrelay_crypto::sha1_twice(b"secret").to_vec())
        );
    }
}
