//! Credential holder - process-wide optional bearer token.
//!
//! The token is opaque: there is no refresh and no expiry tracking. It is set
//! by login, cleared by logout, and cleared by the sync engine when the
//! collector rejects it.

use crate::error::CredentialError;
use crate::storage::state::AUTH_TOKEN_KEY;
use crate::storage::StateStore;
use tracing::{info, warn};

/// Keyring service name for the bearer token.
const KEYRING_SERVICE: &str = "tabtrail";
/// Keyring user name for the bearer token.
const KEYRING_USER: &str = "collector_token";

/// Persisted slot holding at most one token.
pub trait TokenSlot: Send + Sync {
    /// Backend name (local, keyring)
    fn name(&self) -> &'static str;

    fn load(&self) -> Result<Option<String>, CredentialError>;

    fn store(&self, token: &str) -> Result<(), CredentialError>;

    /// Remove the token. Removing an absent token is not an error.
    fn erase(&self) -> Result<(), CredentialError>;
}

/// Token kept in the local database's state table.
pub struct LocalSlot {
    state: StateStore,
}

impl LocalSlot {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl TokenSlot for LocalSlot {
    fn name(&self) -> &'static str {
        "local"
    }

    fn load(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.state.get(AUTH_TOKEN_KEY)?)
    }

    fn store(&self, token: &str) -> Result<(), CredentialError> {
        Ok(self.state.set(AUTH_TOKEN_KEY, token)?)
    }

    fn erase(&self) -> Result<(), CredentialError> {
        Ok(self.state.remove(AUTH_TOKEN_KEY)?)
    }
}

/// Token kept in the OS keychain.
pub struct KeyringSlot {
    service: String,
    user: String,
}

impl Default for KeyringSlot {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_USER)
    }
}

impl KeyringSlot {
    pub fn new(service: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            user: user.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, CredentialError> {
        Ok(keyring::Entry::new(&self.service, &self.user)?)
    }
}

impl TokenSlot for KeyringSlot {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn load(&self) -> Result<Option<String>, CredentialError> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, token: &str) -> Result<(), CredentialError> {
        self.entry()?.set_password(token)?;
        Ok(())
    }

    fn erase(&self) -> Result<(), CredentialError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Holds the bearer token used to authorize sync requests.
pub struct CredentialHolder {
    slot: Box<dyn TokenSlot>,
}

impl CredentialHolder {
    pub fn new(slot: Box<dyn TokenSlot>) -> Self {
        Self { slot }
    }

    /// Token stored in the local database.
    pub fn local(state: StateStore) -> Self {
        Self::new(Box::new(LocalSlot::new(state)))
    }

    /// Token stored in the OS keychain.
    pub fn keyring() -> Self {
        Self::new(Box::new(KeyringSlot::default()))
    }

    pub fn backend(&self) -> &'static str {
        self.slot.name()
    }

    pub fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        self.slot.store(token)?;
        info!("[Credentials] Token stored ({} backend)", self.slot.name());
        Ok(())
    }

    pub fn clear_token(&self) -> Result<(), CredentialError> {
        self.slot.erase()?;
        info!("[Credentials] Token cleared ({} backend)", self.slot.name());
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.slot.load()?.filter(|token| !token.is_empty()))
    }

    /// Whether a token is present. A backend that cannot be read counts as
    /// no token.
    pub fn is_present(&self) -> bool {
        match self.token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!("[Credentials] Cannot read token: {}", e);
                false
            }
        }
    }
}
