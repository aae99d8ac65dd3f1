//! Auth endpoints over HTTP.

use courier_session_core::config::ApiConfig;
use courier_session_core::error::AuthApiError;
use courier_session_core::providers::AuthApi;
use courier_session_core::session::{Credentials, OtpVerification, TokenGrant};
use courier_session_core::token::RefreshToken;
use reqwest::{Client, StatusCode};
use serde::Serialize;

/// Sign-in path.
pub const LOGIN_PATH: &str = "/auth/login";
/// OTP verification path.
pub const VERIFY_OTP_PATH: &str = "/auth/verify-otp";
/// Token refresh path.
pub const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct VerifyOtpRequest<'a> {
    identifier: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Which rejection a 400/401/403 means for the endpoint being called.
#[derive(Clone, Copy)]
enum Rejection {
    Credentials,
    RefreshToken,
}

/// [`AuthApi`] over the JSON REST endpoints.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    config: ApiConfig,
}

impl std::fmt::Debug for HttpAuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthApi")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpAuthApi {
    /// Create a client for the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthApiError::Transport`] if the HTTP client cannot be built
    /// (TLS backend initialisation failure).
    pub fn new(config: ApiConfig) -> Result<Self, AuthApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthApiError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Use an existing `reqwest` client (shared connection pool).
    #[must_use]
    pub const fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        rejection: Rejection,
    ) -> Result<TokenGrant, AuthApiError> {
        let url = self.config.endpoint(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthApiError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<TokenGrant>()
                .await
                .map_err(|e| AuthApiError::Protocol(e.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::debug!(path, status = %response.status(), "Auth endpoint rejected request");
                Err(match rejection {
                    Rejection::Credentials => AuthApiError::InvalidCredentials,
                    Rejection::RefreshToken => AuthApiError::RefreshRejected,
                })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AuthApiError::Transport(format!("HTTP {}: {body}", status.as_u16())))
            }
        }
    }
}

impl AuthApi for HttpAuthApi {
    async fn sign_in(&self, credentials: &Credentials) -> Result<TokenGrant, AuthApiError> {
        let body = LoginRequest {
            identifier: &credentials.identifier,
            password: &credentials.secret,
        };
        self.post(LOGIN_PATH, &body, Rejection::Credentials).await
    }

    async fn verify_otp(&self, verification: &OtpVerification) -> Result<TokenGrant, AuthApiError> {
        let body = VerifyOtpRequest {
            identifier: &verification.identifier,
            code: &verification.code,
        };
        self.post(VERIFY_OTP_PATH, &body, Rejection::Credentials).await
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, AuthApiError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.as_str(),
        };
        self.post(REFRESH_PATH, &body, Rejection::RefreshToken).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_body_is_camel_case() {
        let body = RefreshRequest { refresh_token: "r-1" };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"refreshToken":"r-1"}"#
        );
    }

    #[test]
    fn test_client_creation() {
        let api = HttpAuthApi::new(ApiConfig::default()).unwrap();
        assert_eq!(api.config.endpoint(LOGIN_PATH), "http://localhost:3000/auth/login");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let config = ApiConfig {
            // Reserved port; nothing listens there.
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: std::time::Duration::from_secs(2),
        };
        let api = HttpAuthApi::new(config).unwrap();
        let result = api.refresh(&RefreshToken::new("r")).await;
        assert!(matches!(result, Err(AuthApiError::Transport(_))));
    }
}
