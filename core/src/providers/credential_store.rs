//! Credential store trait.

use crate::error::StoreError;

/// Keys the session manager persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    /// Current access token.
    AccessToken,
    /// Current refresh token.
    RefreshToken,
    /// Cached user record (JSON).
    User,
}

impl CredentialKey {
    /// Every key, in the order they are cleared.
    pub const ALL: [Self; 3] = [Self::AccessToken, Self::RefreshToken, Self::User];

    /// Storage key string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::User => "user",
        }
    }
}

/// Durable key-value store for credentials.
///
/// This trait abstracts over platform secure storage (keychain, keystore,
/// encrypted preferences).
///
/// # Implementation Notes
///
/// - Each write must be atomic at the key level
/// - Concurrent writers are last-writer-wins; no transactions are required
/// - `delete` of an absent key is not an error
pub trait CredentialStore: Send + Sync + 'static {
    /// Read a value.
    ///
    /// # Returns
    ///
    /// `None` if the key has never been written or was deleted.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read.
    fn get(
        &self,
        key: CredentialKey,
    ) -> impl std::future::Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store rejects the write.
    fn set(
        &self,
        key: CredentialKey,
        value: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove a value.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store rejects the delete.
    fn delete(
        &self,
        key: CredentialKey,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
