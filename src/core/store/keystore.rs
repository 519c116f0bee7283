//! API-key store.
//!
//! A JSON file mapping `user_id → exchange_id → entry`, with secrets held
//! base64-encoded at rest. The loader filters inactive entries, decodes each
//! secret, lowercases the exchange id and returns ready-to-use account
//! descriptors. Entries whose secrets fail to decode are dropped with an
//! error log; a missing file is an empty follower set, not an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::core::domain::{AccountDescriptor, ApiCredentials};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct KeystoreEntry {
    api_key: String,
    api_secret: String,
    #[serde(default)]
    api_passphrase: Option<String>,
    status: String,
    #[serde(default)]
    copy_trade_enabled: bool,
}

/// Handle to the keystore file. Stateless: every load re-reads the file, so
/// followers can be added or disabled without a restart.
#[derive(Debug, Clone)]
pub struct Keystore {
    path: PathBuf,
}

impl Keystore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load active account descriptors, optionally keeping only accounts
    /// with copy trading enabled.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed. A missing
    /// file yields an empty list.
    pub fn load_accounts(&self, only_copy_enabled: bool) -> Result<Vec<AccountDescriptor>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Keystore file not found");
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        let raw: BTreeMap<String, BTreeMap<String, KeystoreEntry>> =
            serde_json::from_str(&contents)?;

        let mut accounts = Vec::new();
        for (user_id, exchanges) in raw {
            for (exchange_id, entry) in exchanges {
                if entry.status != "active" {
                    continue;
                }
                if only_copy_enabled && !entry.copy_trade_enabled {
                    continue;
                }

                let (Some(api_key), Some(api_secret)) =
                    (decode_secret(&entry.api_key), decode_secret(&entry.api_secret))
                else {
                    error!(
                        user_id = %user_id,
                        exchange_id = %exchange_id,
                        "Could not decode API credentials, dropping entry"
                    );
                    continue;
                };
                let api_passphrase = match entry.api_passphrase.as_deref() {
                    None => None,
                    Some(encoded) => match decode_secret(encoded) {
                        Some(passphrase) => Some(passphrase),
                        None => {
                            error!(
                                user_id = %user_id,
                                exchange_id = %exchange_id,
                                "Could not decode API passphrase, dropping entry"
                            );
                            continue;
                        }
                    },
                };

                accounts.push(AccountDescriptor {
                    user_id: user_id.clone(),
                    exchange_id: exchange_id.to_lowercase(),
                    credentials: ApiCredentials {
                        api_key,
                        api_secret,
                        api_passphrase,
                    },
                    copy_enabled: entry.copy_trade_enabled,
                });
            }
        }

        debug!(
            count = accounts.len(),
            only_copy_enabled,
            "Loaded accounts from keystore"
        );
        Ok(accounts)
    }
}

fn decode_secret(encoded: &str) -> Option<String> {
    let bytes = BASE64_STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn encoded(value: &str) -> String {
        BASE64_STANDARD.encode(value)
    }

    fn write_keystore(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn sample_keystore() -> tempfile::NamedTempFile {
        let contents = format!(
            r#"{{
                "alice": {{
                    "Binance": {{
                        "api_key": "{}",
                        "api_secret": "{}",
                        "status": "active",
                        "copy_trade_enabled": true
                    }}
                }},
                "bob": {{
                    "binance": {{
                        "api_key": "{}",
                        "api_secret": "{}",
                        "status": "active",
                        "copy_trade_enabled": false
                    }}
                }},
                "carol": {{
                    "binance": {{
                        "api_key": "{}",
                        "api_secret": "{}",
                        "status": "disabled",
                        "copy_trade_enabled": true
                    }}
                }}
            }}"#,
            encoded("alice-key"),
            encoded("alice-secret"),
            encoded("bob-key"),
            encoded("bob-secret"),
            encoded("carol-key"),
            encoded("carol-secret"),
        );
        write_keystore(&contents)
    }

    #[test]
    fn loads_active_accounts_and_decodes_secrets() {
        let file = sample_keystore();
        let keystore = Keystore::new(file.path());

        let accounts = keystore.load_accounts(false).unwrap();
        assert_eq!(accounts.len(), 2); // carol is disabled

        let alice = accounts.iter().find(|a| a.user_id == "alice").unwrap();
        assert_eq!(alice.exchange_id, "binance"); // lowercased
        assert_eq!(alice.credentials.api_key, "alice-key");
        assert_eq!(alice.credentials.api_secret, "alice-secret");
        assert!(alice.copy_enabled);
    }

    #[test]
    fn copy_filter_keeps_only_enabled_accounts() {
        let file = sample_keystore();
        let keystore = Keystore::new(file.path());

        let followers = keystore.load_accounts(true).unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].user_id, "alice");
    }

    #[test]
    fn undecodable_secret_drops_the_entry() {
        let contents = format!(
            r#"{{
                "alice": {{
                    "binance": {{
                        "api_key": "%%% not base64 %%%",
                        "api_secret": "{}",
                        "status": "active",
                        "copy_trade_enabled": true
                    }}
                }}
            }}"#,
            encoded("secret"),
        );
        let file = write_keystore(&contents);
        let accounts = Keystore::new(file.path()).load_accounts(false).unwrap();
        assert!(accounts.is_empty());
    }

    #[test]
    fn missing_file_is_an_empty_set() {
        let keystore = Keystore::new("/nonexistent/keystore.json");
        assert!(keystore.load_accounts(false).unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let file = write_keystore("{not json");
        assert!(Keystore::new(file.path()).load_accounts(false).is_err());
    }

    #[test]
    fn passphrase_is_decoded_when_present() {
        let contents = format!(
            r#"{{
                "dana": {{
                    "binance": {{
                        "api_key": "{}",
                        "api_secret": "{}",
                        "api_passphrase": "{}",
                        "status": "active",
                        "copy_trade_enabled": true
                    }}
                }}
            }}"#,
            encoded("key"),
            encoded("secret"),
            encoded("phrase"),
        );
        let file = write_keystore(&contents);
        let accounts = Keystore::new(file.path()).load_accounts(true).unwrap();
        assert_eq!(accounts[0].credentials.api_passphrase.as_deref(), Some("phrase"));
    }
}
