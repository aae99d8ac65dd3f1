//! Auth endpoint trait.

use crate::error::AuthApiError;
use crate::session::{Credentials, OtpVerification, TokenGrant};
use crate::token::RefreshToken;

/// Sign-in and token exchange endpoints.
///
/// # Implementation Notes
///
/// - `refresh` must distinguish an explicit rejection of the refresh token
///   ([`AuthApiError::RefreshRejected`]) from a transport failure
///   ([`AuthApiError::Transport`]); only the former ends the session
/// - Refresh tokens are assumed single-use: callers guarantee at most one
///   outstanding `refresh` per session
pub trait AuthApi: Send + Sync + 'static {
    /// Exchange identifier and secret for a token pair.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Credentials are rejected → `AuthApiError::InvalidCredentials`
    /// - Network request fails → `AuthApiError::Transport`
    fn sign_in(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<TokenGrant, AuthApiError>> + Send;

    /// Exchange a one-time password for a token pair.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The code is wrong or expired → `AuthApiError::InvalidCredentials`
    /// - Network request fails → `AuthApiError::Transport`
    fn verify_otp(
        &self,
        verification: &OtpVerification,
    ) -> impl std::future::Future<Output = Result<TokenGrant, AuthApiError>> + Send;

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The refresh token is invalid, expired or revoked → `AuthApiError::RefreshRejected`
    /// - Network request fails → `AuthApiError::Transport`
    fn refresh(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl std::future::Future<Output = Result<TokenGrant, AuthApiError>> + Send;
}
