//! Account descriptors and credentials.

use std::fmt;

/// The reserved user id that resolves against the process-wide leader slot.
pub const LEADER_USER_ID: &str = "leader";

/// Decrypted API credentials for one exchange account.
///
/// `Debug` is implemented by hand so secrets never end up in logs.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: Option<String>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("api_passphrase", &self.api_passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One exchange account known to the engine.
#[derive(Debug, Clone)]
pub struct AccountDescriptor {
    pub user_id: String,
    pub exchange_id: String,
    pub credentials: ApiCredentials,
    pub copy_enabled: bool,
}

impl AccountDescriptor {
    /// Cache key for the connection registry: at most one live adapter per
    /// `(user_id, exchange_id)`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.user_id, self.exchange_id)
    }

    /// A credential-less token that the connection registry resolves against
    /// the stored leader descriptor.
    #[must_use]
    pub fn leader_token() -> Self {
        Self {
            user_id: LEADER_USER_ID.to_string(),
            exchange_id: String::new(),
            credentials: ApiCredentials {
                api_key: String::new(),
                api_secret: String::new(),
                api_passphrase: None,
            },
            copy_enabled: false,
        }
    }

    #[must_use]
    pub fn is_leader_token(&self) -> bool {
        self.user_id == LEADER_USER_ID
    }
}
