//! Hosted auth backend: trait seam plus a client for a Supabase-compatible
//! REST API (GoTrue endpoints and PostgREST RPCs).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AuthConfig;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("This account has been deleted.")]
    AccountDeleted,
    #[error("No account found with this email address.")]
    EmailNotRegistered,
    #[error("You need to sign in first.")]
    NotSignedIn,
    #[error("Password must be at least {MIN_PASSWORD_LEN} characters.")]
    WeakPassword,
    #[error("Email and password are required.")]
    MissingCredentials,
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error("Auth service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthError {
    /// Errors that mean the stored session is no longer usable.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, AuthError::AccountDeleted)
            || matches!(self, AuthError::Backend { status, .. } if *status == 401 || *status == 403 || *status == 404)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendSession {
    pub tokens: AuthTokens,
    pub user: AuthUser,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(BackendSession),
    ConfirmationSent(AuthUser),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(())
    }
}

pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<BackendSession, AuthError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<BackendSession, AuthError>;

    /// RPC `check_email_exists`.
    async fn email_exists(&self, email: &str) -> Result<bool, AuthError>;

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError>;

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<AuthUser, AuthError>;

    /// RPC `delete_my_account`.
    async fn delete_account(&self, access_token: &str) -> Result<(), AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

pub struct SupabaseAuth {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    user: AuthUser,
}

impl From<TokenResponse> for BackendSession {
    fn from(value: TokenResponse) -> Self {
        BackendSession {
            tokens: AuthTokens {
                access_token: value.access_token,
                refresh_token: value.refresh_token,
                expires_in: value.expires_in,
            },
            user: value.user,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

#[derive(Deserialize, Default)]
struct BackendErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl SupabaseAuth {
    pub fn new(client: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.anon_key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: BackendErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .msg
            .or(body.message)
            .or(body.error_description)
            .unwrap_or_else(|| format!("Auth request failed ({})", status));
        debug!("Auth backend answered {}: {}", status, message);

        Err(AuthError::Backend {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AuthBackend for SupabaseAuth {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let response = self
            .request(reqwest::Method::GET, "/auth/v1/user")
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<BackendSession, AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await?;
        let token: TokenResponse = Self::check(response).await?.json().await?;
        Ok(token.into())
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/signup")
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await?;
        match Self::check(response).await?.json::<SignUpResponse>().await? {
            SignUpResponse::Session(token) => Ok(SignUpOutcome::SignedIn(token.into())),
            SignUpResponse::User(user) => Ok(SignUpOutcome::ConfirmationSent(user)),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<BackendSession, AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let token: TokenResponse = Self::check(response).await?.json().await?;
        Ok(token.into())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/rest/v1/rpc/check_email_exists")
            .json(&json!({ "email_to_check": email }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/recover")
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<AuthUser, AuthError> {
        let response = self
            .request(reqwest::Method::PUT, "/auth/v1/user")
            .bearer_auth(access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_account(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/rest/v1/rpc/delete_my_account")
            .bearer_auth(access_token)
            .json(&json!({}))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/logout")
            .bearer_auth(access_token)
            .send()
            .await?;
        if let Err(e) = Self::check(response).await {
            // Already-invalid tokens still count as signed out locally
            warn!("Backend sign-out failed: {}", e);
        }
        Ok(())
    }
}
