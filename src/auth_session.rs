//! Session context for one browser: a read-through cache of the auth
//! backend's session, updated through a single transition function.

use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::{
    validate_new_password, AuthBackend, AuthError, AuthTokens, AuthUser, BackendSession,
    Credentials, SignUpOutcome,
};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    PasswordRecovery,
    UserUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    InitialSession(Option<AuthUser>),
    SignedIn(AuthUser),
    SignedOut,
    TokenRefreshed(AuthUser),
    PasswordRecovery(AuthUser),
    UserUpdated(AuthUser),
}

impl AuthEvent {
    pub fn kind(&self) -> AuthEventKind {
        match self {
            AuthEvent::InitialSession(_) => AuthEventKind::InitialSession,
            AuthEvent::SignedIn(_) => AuthEventKind::SignedIn,
            AuthEvent::SignedOut => AuthEventKind::SignedOut,
            AuthEvent::TokenRefreshed(_) => AuthEventKind::TokenRefreshed,
            AuthEvent::PasswordRecovery(_) => AuthEventKind::PasswordRecovery,
            AuthEvent::UserUpdated(_) => AuthEventKind::UserUpdated,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub user: Option<AuthUser>,
    pub is_recovery_mode: bool,
}

impl SessionState {
    /// The only place session state changes.
    pub fn apply(&mut self, event: &AuthEvent) {
        match event {
            AuthEvent::InitialSession(user) => self.user = user.clone(),
            AuthEvent::SignedIn(user) | AuthEvent::TokenRefreshed(user) => {
                self.user = Some(user.clone())
            }
            AuthEvent::SignedOut => {
                self.user = None;
                self.is_recovery_mode = false;
            }
            AuthEvent::PasswordRecovery(user) => {
                self.user = Some(user.clone());
                self.is_recovery_mode = true;
            }
            // Only a successful password update leaves recovery mode
            AuthEvent::UserUpdated(user) => {
                self.user = Some(user.clone());
                self.is_recovery_mode = false;
            }
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignUpResult {
    pub user: AuthUser,
    pub confirmation_required: bool,
}

/// Running subscription to auth events; dropping it unsubscribes.
pub struct AuthSubscription {
    handle: JoinHandle<()>,
}

impl AuthSubscription {
    pub fn spawn<F>(mut receiver: broadcast::Receiver<AuthEvent>, mut handler: F) -> Self
    where
        F: FnMut(AuthEvent) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Auth subscriber lagged, skipped {} events", skipped)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { handle }
    }

    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct AuthSession {
    backend: Arc<dyn AuthBackend>,
    state: RwLock<SessionState>,
    tokens: RwLock<Option<AuthTokens>>,
    events: broadcast::Sender<AuthEvent>,
    reset_redirect: String,
    bootstrap_timeout: Duration,
}

impl AuthSession {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        reset_redirect: impl Into<String>,
        bootstrap_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            state: RwLock::new(SessionState::default()),
            tokens: RwLock::new(None),
            events,
            reset_redirect: reset_redirect.into(),
            bootstrap_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|t| t.as_ref().map(|t| t.access_token.clone()))
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|t| t.as_ref().and_then(|t| t.refresh_token.clone()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn dispatch(&self, event: AuthEvent) {
        if let Ok(mut state) = self.state.write() {
            state.apply(&event);
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn store_tokens(&self, tokens: Option<AuthTokens>) {
        if let Ok(mut slot) = self.tokens.write() {
            *slot = tokens;
        }
    }

    /// Initial pull, bounded by the bootstrap timeout. Anything but a
    /// confirmed user leaves the session signed out.
    pub async fn initialize(&self, tokens: Option<AuthTokens>) -> SessionState {
        let Some(tokens) = tokens else {
            self.dispatch(AuthEvent::InitialSession(None));
            return self.state();
        };

        let lookup = self.backend.get_user(&tokens.access_token);
        match tokio::time::timeout(self.bootstrap_timeout, lookup).await {
            Ok(Ok(user)) => {
                info!("Restored session for user {}", user.id);
                self.store_tokens(Some(tokens));
                self.dispatch(AuthEvent::InitialSession(Some(user)));
            }
            Ok(Err(e)) => {
                info!("No valid session found: {}", e);
                if e.invalidates_session() {
                    let _ = self.backend.sign_out(&tokens.access_token).await;
                }
                self.dispatch(AuthEvent::InitialSession(None));
            }
            Err(_) => {
                warn!(
                    "Auth check timed out after {:?}, continuing signed out",
                    self.bootstrap_timeout
                );
                self.dispatch(AuthEvent::InitialSession(None));
            }
        }

        self.state()
    }

    /// Password sign-in with a follow-up user lookup on the fresh token. A
    /// token whose account no longer exists is signed out instead of
    /// producing a session.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<AuthUser, AuthError> {
        credentials.validate()?;
        let session = self.backend.sign_in_with_password(credentials).await?;

        match self.backend.get_user(&session.tokens.access_token).await {
            Ok(user) => {
                self.accept_session(BackendSession { user: user.clone(), ..session });
                self.dispatch(AuthEvent::SignedIn(user.clone()));
                Ok(user)
            }
            Err(e) => {
                warn!("Ghost login detected ({}), forcing sign-out", e);
                let _ = self.backend.sign_out(&session.tokens.access_token).await;
                self.store_tokens(None);
                self.dispatch(AuthEvent::SignedOut);
                Err(AuthError::AccountDeleted)
            }
        }
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResult, AuthError> {
        credentials.validate()?;
        validate_new_password(&credentials.password)?;

        match self.backend.sign_up(credentials).await? {
            SignUpOutcome::SignedIn(session) => {
                let user = session.user.clone();
                self.accept_session(session);
                self.dispatch(AuthEvent::SignedIn(user.clone()));
                Ok(SignUpResult {
                    user,
                    confirmation_required: false,
                })
            }
            SignUpOutcome::ConfirmationSent(user) => Ok(SignUpResult {
                user,
                confirmation_required: true,
            }),
        }
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if !self.backend.email_exists(email).await? {
            return Err(AuthError::EmailNotRegistered);
        }
        self.backend
            .send_password_reset(email, &self.reset_redirect)
            .await
    }

    pub async fn update_password(&self, new_password: &str) -> Result<AuthUser, AuthError> {
        validate_new_password(new_password)?;
        let token = self.access_token().ok_or(AuthError::NotSignedIn)?;

        let user = self.backend.update_password(&token, new_password).await?;
        self.dispatch(AuthEvent::UserUpdated(user.clone()));
        Ok(user)
    }

    /// Signs out locally even when the backend call fails.
    pub async fn sign_out(&self) {
        if let Some(token) = self.access_token() {
            if let Err(e) = self.backend.sign_out(&token).await {
                warn!("Sign-out request failed: {}", e);
            }
        }
        self.store_tokens(None);
        self.dispatch(AuthEvent::SignedOut);
    }

    pub async fn delete_account(&self) -> Result<(), AuthError> {
        let token = self.access_token().ok_or(AuthError::NotSignedIn)?;
        self.backend.delete_account(&token).await?;
        self.sign_out().await;
        Ok(())
    }

    pub async fn refresh(&self) -> Result<AuthUser, AuthError> {
        let refresh_token = self.refresh_token().ok_or(AuthError::NotSignedIn)?;

        match self.backend.refresh_session(&refresh_token).await {
            Ok(session) => {
                let user = session.user.clone();
                self.accept_session(session);
                self.dispatch(AuthEvent::TokenRefreshed(user.clone()));
                Ok(user)
            }
            Err(e) => {
                if e.invalidates_session() {
                    self.store_tokens(None);
                    self.dispatch(AuthEvent::SignedOut);
                }
                Err(e)
            }
        }
    }

    /// Entry point for the emailed reset link: validates the recovery
    /// session and switches into recovery mode.
    pub async fn handle_recovery_callback(&self, tokens: AuthTokens) -> Result<AuthUser, AuthError> {
        let user = self.backend.get_user(&tokens.access_token).await?;
        self.store_tokens(Some(tokens));
        self.dispatch(AuthEvent::PasswordRecovery(user.clone()));
        Ok(user)
    }

    fn accept_session(&self, session: BackendSession) {
        self.store_tokens(Some(session.tokens));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            email: Some(format!("{}@example.com", id)),
            created_at: None,
            last_sign_in_at: None,
        }
    }

    fn session(id: &str) -> BackendSession {
        BackendSession {
            tokens: AuthTokens {
                access_token: format!("token-{}", id),
                refresh_token: Some(format!("refresh-{}", id)),
                expires_in: Some(3600),
            },
            user: user(id),
        }
    }

    /// Tokens as they come back from the browser's cookies.
    fn cookie_tokens(access: &str, refresh: Option<&str>) -> AuthTokens {
        AuthTokens {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in: None,
        }
    }

    /// In-memory backend; `account_exists` false simulates a deleted account.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub account_exists: AtomicBool,
        pub lookup_delay_ms: u64,
        pub sign_outs: AtomicUsize,
        pub registered_email: Option<String>,
        pub resets_sent: AtomicUsize,
    }

    impl FakeBackend {
        pub(crate) fn healthy() -> Self {
            Self {
                account_exists: AtomicBool::new(true),
                registered_email: Some("shop@example.com".to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AuthBackend for FakeBackend {
        async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
            tokio::time::sleep(Duration::from_millis(self.lookup_delay_ms)).await;
            if !self.account_exists.load(Ordering::SeqCst) {
                return Err(AuthError::Backend {
                    status: 404,
                    message: "User not found".to_string(),
                });
            }
            Ok(user(access_token.trim_start_matches("token-")))
        }

        async fn sign_in_with_password(
            &self,
            credentials: &Credentials,
        ) -> Result<BackendSession, AuthError> {
            if credentials.password == "wrong" {
                return Err(AuthError::Backend {
                    status: 400,
                    message: "Invalid login credentials".to_string(),
                });
            }
            Ok(session("u1"))
        }

        async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, AuthError> {
            if credentials.email.starts_with("confirm") {
                return Ok(SignUpOutcome::ConfirmationSent(user("new")));
            }
            Ok(SignUpOutcome::SignedIn(session("new")))
        }

        async fn refresh_session(&self, refresh_token: &str) -> Result<BackendSession, AuthError> {
            Ok(session(refresh_token.trim_start_matches("refresh-")))
        }

        async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
            Ok(self.registered_email.as_deref() == Some(email))
        }

        async fn send_password_reset(&self, _email: &str, _redirect: &str) -> Result<(), AuthError> {
            self.resets_sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_password(&self, token: &str, _pw: &str) -> Result<AuthUser, AuthError> {
            Ok(user(token.trim_start_matches("token-")))
        }

        async fn delete_account(&self, _token: &str) -> Result<(), AuthError> {
            self.account_exists.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn sign_out(&self, _token: &str) -> Result<(), AuthError> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn auth_with(backend: Arc<FakeBackend>) -> AuthSession {
        AuthSession::new(backend, "http://localhost/update-password", Duration::from_millis(50))
    }

    fn creds(password: &str) -> Credentials {
        Credentials {
            email: "shop@example.com".to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_transitions() {
        let mut state = SessionState::default();

        state.apply(&AuthEvent::PasswordRecovery(user("a")));
        assert!(state.is_recovery_mode);
        assert!(state.is_signed_in());

        // Refreshing a token does not end recovery
        state.apply(&AuthEvent::TokenRefreshed(user("a")));
        assert!(state.is_recovery_mode);

        state.apply(&AuthEvent::UserUpdated(user("a")));
        assert!(!state.is_recovery_mode);

        state.apply(&AuthEvent::PasswordRecovery(user("a")));
        state.apply(&AuthEvent::SignedOut);
        assert_eq!(state, SessionState::default());
    }

    #[tokio::test]
    async fn test_sign_in_sets_user() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));

        let user = auth.sign_in(&creds("secret")).await.unwrap();

        assert_eq!(user.id, "u1");
        assert_eq!(auth.state().user, Some(user));
        assert_eq!(auth.access_token().as_deref(), Some("token-u1"));
    }

    #[tokio::test]
    async fn test_ghost_login_is_signed_out() {
        let backend = Arc::new(FakeBackend::healthy());
        backend.account_exists.store(false, Ordering::SeqCst);
        let auth = auth_with(backend.clone());

        let result = auth.sign_in(&creds("secret")).await;

        assert!(matches!(result, Err(AuthError::AccountDeleted)));
        assert_eq!(auth.state().user, None);
        assert_eq!(auth.access_token(), None);
        assert_eq!(backend.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_password_reports_backend_message() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        let err = auth.sign_in(&creds("wrong")).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert!(!auth.state().is_signed_in());
    }

    #[tokio::test]
    async fn test_initialize_times_out_signed_out() {
        let backend = Arc::new(FakeBackend {
            lookup_delay_ms: 500,
            ..FakeBackend::healthy()
        });
        let auth = auth_with(backend);

        let state = auth.initialize(Some(cookie_tokens("token-u1", None))).await;

        assert_eq!(state, SessionState::default());
    }

    #[tokio::test]
    async fn test_initialize_restores_user() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        let state = auth.initialize(Some(cookie_tokens("token-u7", None))).await;
        assert_eq!(state.user.map(|u| u.id), Some("u7".to_string()));

        let anonymous = auth_with(Arc::new(FakeBackend::healthy()));
        assert!(!anonymous.initialize(None).await.is_signed_in());
    }

    #[tokio::test]
    async fn test_restored_session_keeps_refresh_token() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        auth.initialize(Some(cookie_tokens("token-u3", Some("refresh-u3"))))
            .await;

        assert_eq!(auth.refresh_token().as_deref(), Some("refresh-u3"));
        assert_eq!(auth.refresh().await.unwrap().id, "u3");

        let access_only = auth_with(Arc::new(FakeBackend::healthy()));
        access_only
            .initialize(Some(cookie_tokens("token-u3", None)))
            .await;
        assert!(matches!(
            access_only.refresh().await,
            Err(AuthError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_reset_requires_registered_email() {
        let backend = Arc::new(FakeBackend::healthy());
        let auth = auth_with(backend.clone());

        assert!(matches!(
            auth.reset_password("nobody@example.com").await,
            Err(AuthError::EmailNotRegistered)
        ));
        auth.reset_password("shop@example.com").await.unwrap();
        assert_eq!(backend.resets_sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovery_cleared_only_by_password_update() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        auth.handle_recovery_callback(AuthTokens {
            access_token: "token-u1".to_string(),
            refresh_token: Some("refresh-u1".to_string()),
            expires_in: None,
        })
        .await
        .unwrap();
        assert!(auth.state().is_recovery_mode);

        assert!(matches!(
            auth.update_password("123").await,
            Err(AuthError::WeakPassword)
        ));
        assert!(auth.state().is_recovery_mode);

        auth.refresh().await.unwrap();
        assert!(auth.state().is_recovery_mode);

        auth.update_password("new-secret").await.unwrap();
        assert!(!auth.state().is_recovery_mode);
        assert!(auth.state().is_signed_in());
    }

    #[tokio::test]
    async fn test_update_password_needs_session() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        assert!(matches!(
            auth.update_password("long-enough").await,
            Err(AuthError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_delete_account_signs_out() {
        let backend = Arc::new(FakeBackend::healthy());
        let auth = auth_with(backend.clone());
        auth.sign_in(&creds("secret")).await.unwrap();

        auth.delete_account().await.unwrap();

        assert!(!auth.state().is_signed_in());
        assert_eq!(backend.sign_outs.load(Ordering::SeqCst), 1);
        // The deleted account can no longer sign in
        assert!(matches!(
            auth.sign_in(&creds("secret")).await,
            Err(AuthError::AccountDeleted)
        ));
    }

    #[tokio::test]
    async fn test_sign_up_outcomes() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));

        let confirm = auth
            .sign_up(&Credentials {
                email: "confirm@example.com".to_string(),
                password: "secret1".to_string(),
            })
            .await
            .unwrap();
        assert!(confirm.confirmation_required);
        assert!(!auth.state().is_signed_in());

        let direct = auth
            .sign_up(&Credentials {
                email: "direct@example.com".to_string(),
                password: "secret1".to_string(),
            })
            .await
            .unwrap();
        assert!(!direct.confirmation_required);
        assert!(auth.state().is_signed_in());
    }

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        let mut events = auth.subscribe();

        auth.sign_in(&creds("secret")).await.unwrap();
        auth.sign_out().await;

        assert_eq!(events.recv().await.unwrap().kind(), AuthEventKind::SignedIn);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_subscription_handler_and_unsubscribe() {
        let auth = auth_with(Arc::new(FakeBackend::healthy()));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = AuthSubscription::spawn(auth.subscribe(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        auth.sign_out().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(5)).await;
        auth.sign_out().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
