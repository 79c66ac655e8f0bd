//! Session credential storage.
//!
//! The bearer token that authorizes every request lives in a [`SecretStore`]
//! (the OS keyring behind the `os-keyring` feature, or memory). Gateways read
//! it through [`CredentialSource`] on each call so a cleared token takes
//! effect immediately.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::{debug, warn};

/// Keyring service name under which session tokens are stored.
pub const TOKEN_SERVICE: &str = "chatsync";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret not found")]
    NotFound,
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    #[error("secret store backend failure: {0}")]
    Backend(String),
}

/// Key/value secret storage addressed by `(service, account)`.
pub trait SecretStore: Send + Sync {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError>;

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError>;

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError>;
}

type SecretKey = (String, String);

/// Process-local store; contents vanish with the process.
#[derive(Clone, Default, Debug)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<SecretKey, String>>>,
}

impl InMemorySecretStore {
    fn key(service: &str, account: &str) -> SecretKey {
        (service.to_owned(), account.to_owned())
    }
}

fn poisoned<T>(_: T) -> SecretStoreError {
    SecretStoreError::Backend("secret map lock poisoned".to_owned())
}

impl SecretStore for InMemorySecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        self.secrets
            .write()
            .map_err(poisoned)?
            .insert(Self::key(service, account), secret.to_owned());
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        self.secrets
            .read()
            .map_err(poisoned)?
            .get(&Self::key(service, account))
            .cloned()
            .ok_or(SecretStoreError::NotFound)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        self.secrets
            .write()
            .map_err(poisoned)?
            .remove(&Self::key(service, account))
            .map(drop)
            .ok_or(SecretStoreError::NotFound)
    }
}

/// Store backed by the platform keychain.
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy, Debug)]
pub struct OsKeyringSecretStore;

#[cfg(feature = "os-keyring")]
fn keyring_entry(service: &str, account: &str) -> Result<keyring::Entry, SecretStoreError> {
    keyring::Entry::new(service, account).map_err(map_keyring_error)
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> SecretStoreError {
    match err {
        keyring::Error::NoEntry => SecretStoreError::NotFound,
        keyring::Error::PlatformFailure(inner) | keyring::Error::NoStorageAccess(inner) => {
            SecretStoreError::Unavailable(inner.to_string())
        }
        other => SecretStoreError::Backend(other.to_string()),
    }
}

#[cfg(feature = "os-keyring")]
impl SecretStore for OsKeyringSecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        keyring_entry(service, account)?
            .set_password(secret)
            .map_err(map_keyring_error)
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        keyring_entry(service, account)?
            .get_password()
            .map_err(map_keyring_error)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        keyring_entry(service, account)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}

/// Supplies the bearer token attached to outgoing requests.
pub trait CredentialSource: Send + Sync {
    /// Current token, or `None` when no session exists.
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, typically read from the environment at startup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StaticCredential {
    token: Option<String>,
}

impl StaticCredential {
    /// Credential for `token`; blank tokens count as missing.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Session token persisted per user-service URL.
#[derive(Clone, Debug)]
pub struct TokenStore<S: SecretStore> {
    inner: S,
    account: String,
}

impl<S: SecretStore> TokenStore<S> {
    /// Token slot for `user_service` inside `inner`.
    pub fn new(inner: S, user_service: &str) -> Self {
        Self {
            inner,
            account: token_account_for_service(user_service),
        }
    }

    /// Keyring account name for this slot.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Stored token; a missing entry is `Ok(None)`.
    pub fn load(&self) -> Result<Option<String>, SecretStoreError> {
        match self.inner.get_secret(TOKEN_SERVICE, &self.account) {
            Ok(token) => Ok(Some(token)),
            Err(SecretStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Persist `token`, replacing any stored one.
    pub fn save(&self, token: &str) -> Result<(), SecretStoreError> {
        debug!(account = %self.account, "storing session token");
        self.inner.set_secret(TOKEN_SERVICE, &self.account, token)
    }

    /// Remove the stored token; clearing an absent token succeeds.
    pub fn clear(&self) -> Result<(), SecretStoreError> {
        match self.inner.delete_secret(TOKEN_SERVICE, &self.account) {
            Ok(()) | Err(SecretStoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl<S: SecretStore> CredentialSource for TokenStore<S> {
    fn bearer_token(&self) -> Option<String> {
        match self.load() {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                warn!(account = %self.account, error = %err, "session token unreadable");
                None
            }
        }
    }
}

fn token_account_for_service(user_service: &str) -> String {
    format!("session-token:{}", user_service.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_sets_reads_and_deletes() {
        let store = InMemorySecretStore::default();
        store
            .set_secret(TOKEN_SERVICE, "acct", "t0k3n")
            .expect("set should work");
        assert_eq!(
            store.get_secret(TOKEN_SERVICE, "acct").expect("get should work"),
            "t0k3n"
        );
        store
            .delete_secret(TOKEN_SERVICE, "acct")
            .expect("delete should work");
        assert_eq!(
            store.get_secret(TOKEN_SERVICE, "acct"),
            Err(SecretStoreError::NotFound)
        );
        assert_eq!(
            store.delete_secret(TOKEN_SERVICE, "acct"),
            Err(SecretStoreError::NotFound)
        );
    }

    #[test]
    fn token_account_ignores_trailing_slash() {
        let a = TokenStore::new(InMemorySecretStore::default(), "http://localhost:5000/");
        let b = TokenStore::new(InMemorySecretStore::default(), "http://localhost:5000");
        assert_eq!(a.account(), "session-token:http://localhost:5000");
        assert_eq!(a.account(), b.account());
    }

    #[test]
    fn token_store_reports_missing_token_as_none() {
        let tokens = TokenStore::new(InMemorySecretStore::default(), "http://users");
        assert_eq!(tokens.load(), Ok(None));
        assert_eq!(tokens.bearer_token(), None);
        tokens.clear().expect("clearing an absent token should work");
    }

    #[test]
    fn token_store_serves_saved_token_until_cleared() {
        let tokens = TokenStore::new(InMemorySecretStore::default(), "http://users");
        tokens.save("abc").expect("save should work");
        assert_eq!(tokens.bearer_token().as_deref(), Some("abc"));

        tokens.clear().expect("clear should work");
        assert_eq!(tokens.bearer_token(), None);
    }

    #[test]
    fn static_credential_treats_blank_as_missing_and_redacts() {
        assert_eq!(StaticCredential::new(Some("  ".into())).bearer_token(), None);
        let credential = StaticCredential::new(Some("secret".into()));
        assert_eq!(credential.bearer_token().as_deref(), Some("secret"));
        assert!(!format!("{credential:?}").contains("secret"));
    }
}
