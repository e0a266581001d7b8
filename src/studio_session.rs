//! Per-browser studio state and the registry that owns it.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::auth::{AuthBackend, AuthTokens};
use crate::auth_session::{AuthEvent, AuthSession, AuthSubscription};
use crate::background_removal::{BackgroundColor, BackgroundError, BackgroundRemover};
use crate::chat_assistant::{ChatAssistant, FallbackChain};
use crate::image_crop::{CropError, CropSelection};
use crate::layout_renderer::RenderPlan;
use crate::package_catalog::{self, PhotoPackage};
use crate::print_sheet::{self, SheetError};
use crate::working_image::{ImageData, UploadError, WorkingImage, WorkingImageInfo};

#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("No image uploaded yet")]
    NoImage,
    #[error("Unknown package '{0}'")]
    UnknownPackage(String),
    #[error("There is no background removal to undo")]
    NothingToUndo,
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Crop(#[from] CropError),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

/// Shared services every new session is wired to.
#[derive(Clone)]
pub struct SessionServices {
    pub auth_backend: Arc<dyn AuthBackend>,
    pub remover: Arc<dyn BackgroundRemover>,
    pub chat_chain: FallbackChain,
    pub reset_redirect: String,
    pub auth_bootstrap_timeout: Duration,
}

#[derive(Debug)]
struct StudioState {
    image: Option<WorkingImage>,
    package: &'static PhotoPackage,
}

impl StudioState {
    fn release(&mut self) {
        self.image = None;
    }
}

pub struct StudioSession {
    id: String,
    state: Arc<Mutex<StudioState>>,
    chat: Arc<ChatAssistant>,
    auth: AuthSession,
    remover: Arc<dyn BackgroundRemover>,
    background_in_flight: AtomicBool,
    last_seen: Mutex<DateTime<Utc>>,
    subscription: Mutex<Option<AuthSubscription>>,
}

/// Clears the in-flight flag when the removal finishes or is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl StudioSession {
    /// Must be called inside a tokio runtime: the session subscribes to its
    /// auth events right away.
    pub fn new(id: impl Into<String>, services: &SessionServices) -> Arc<Self> {
        let state = Arc::new(Mutex::new(StudioState {
            image: None,
            package: package_catalog::default_package(),
        }));
        let chat = Arc::new(ChatAssistant::new(services.chat_chain.clone()));
        let auth = AuthSession::new(
            services.auth_backend.clone(),
            services.reset_redirect.clone(),
            services.auth_bootstrap_timeout,
        );

        let subscription = {
            let state = state.clone();
            let chat = chat.clone();
            AuthSubscription::spawn(auth.subscribe(), move |event| {
                if event == AuthEvent::SignedOut {
                    debug!("Signed out, releasing working image and transcript");
                    if let Ok(mut state) = state.lock() {
                        state.release();
                    }
                    chat.reset();
                }
            })
        };

        Arc::new(Self {
            id: id.into(),
            state,
            chat,
            auth,
            remover: services.remover.clone(),
            background_in_flight: AtomicBool::new(false),
            last_seen: Mutex::new(Utc::now()),
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    pub fn chat(&self) -> &ChatAssistant {
        &self.chat
    }

    pub fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Utc::now();
        }
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen.lock().map(|t| *t).unwrap_or_else(|_| Utc::now())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StudioState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    /// Replaces the working image. Decoding happens outside the lock.
    pub fn upload(&self, bytes: &[u8]) -> Result<WorkingImageInfo, StudioError> {
        let image = WorkingImage::upload(bytes)?;
        let info = image.info();
        self.with_state(|state| state.image = Some(image));
        info!(
            "Session {} uploaded {}x{} image",
            self.short_id(),
            info.original.width,
            info.original.height
        );
        Ok(info)
    }

    pub fn image_info(&self) -> Option<WorkingImageInfo> {
        self.with_state(|state| state.image.as_ref().map(WorkingImage::info))
    }

    pub fn original(&self) -> Option<Arc<ImageData>> {
        self.with_state(|state| state.image.as_ref().map(|i| i.original().clone()))
    }

    pub fn current(&self) -> Option<Arc<ImageData>> {
        self.with_state(|state| state.image.as_ref().map(|i| i.current().clone()))
    }

    pub fn crop(&self, selection: &CropSelection) -> Result<WorkingImageInfo, StudioError> {
        self.with_state(|state| {
            let image = state.image.as_mut().ok_or(StudioError::NoImage)?;
            image.apply_crop(selection)?;
            Ok(image.info())
        })
    }

    /// Sends `current` to the removal service. Only one removal per session
    /// runs at a time; the result is dropped if the image changed meanwhile.
    pub async fn remove_background(
        &self,
        color: BackgroundColor,
    ) -> Result<WorkingImageInfo, StudioError> {
        if self
            .background_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BackgroundError::AlreadyRunning.into());
        }
        let _guard = InFlightGuard(&self.background_in_flight);

        let source = self.current().ok_or(StudioError::NoImage)?;
        let processed = self.remover.remove_background(&source, color).await?;

        self.with_state(|state| {
            let image = state.image.as_mut().ok_or(StudioError::NoImage)?;
            if image.current().hash() != source.hash() {
                warn!(
                    "Session {} changed its image during background removal, discarding result",
                    self.short_id()
                );
                return Ok(image.info());
            }
            image.apply_background_result(processed);
            Ok(image.info())
        })
    }

    pub fn is_removing_background(&self) -> bool {
        self.background_in_flight.load(Ordering::SeqCst)
    }

    pub fn undo_background(&self) -> Result<WorkingImageInfo, StudioError> {
        self.with_state(|state| {
            let image = state.image.as_mut().ok_or(StudioError::NoImage)?;
            if !image.undo_background() {
                return Err(StudioError::NothingToUndo);
            }
            Ok(image.info())
        })
    }

    pub fn package(&self) -> &'static PhotoPackage {
        self.with_state(|state| state.package)
    }

    /// Switches the package. The working image is left alone.
    pub fn select_package(&self, id: &str) -> Result<&'static PhotoPackage, StudioError> {
        let package = package_catalog::find_package(id)
            .ok_or_else(|| StudioError::UnknownPackage(id.to_string()))?;
        self.with_state(|state| state.package = package);
        Ok(package)
    }

    pub fn render_plan(&self) -> RenderPlan {
        self.with_state(|state| {
            let version = state.image.as_ref().map(|i| i.current().hash().to_string());
            RenderPlan::build(state.package, version.as_deref())
        })
    }

    /// PNG of the print sheet. CPU bound, call from a blocking context.
    pub fn sheet_png(&self, dpi: u32) -> Result<Vec<u8>, StudioError> {
        let (plan, current) = self.with_state(|state| {
            let current = state.image.as_ref().map(|i| i.current().clone());
            let version = current.as_ref().map(|c| c.hash().to_string());
            (RenderPlan::build(state.package, version.as_deref()), current)
        });
        let sheet = print_sheet::compose_sheet(&plan, current.as_deref(), dpi)?;
        Ok(print_sheet::encode_png(sheet)?)
    }

    /// Unsubscribes from auth events and drops image and transcript.
    pub fn teardown(&self) {
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(subscription) = subscription.take() {
                subscription.unsubscribe();
            }
        }
        self.with_state(StudioState::release);
        self.chat.reset();
    }

    fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

fn new_session_id() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<StudioSession>>>>,
    services: SessionServices,
    ttl: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(services: SessionServices, ttl_minutes: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            services,
            ttl: chrono::Duration::minutes(ttl_minutes),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<StudioSession>> {
        let session = self.sessions.read().ok()?.get(id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Looks up the browser's session or creates one. New sessions pull the
    /// auth state for the browser's stored `tokens` before they are
    /// registered. The bool is true when the session was created.
    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        tokens: Option<AuthTokens>,
    ) -> (Arc<StudioSession>, bool) {
        if let Some(session) = session_id.and_then(|id| self.get(id)) {
            return (session, false);
        }

        let session = StudioSession::new(new_session_id(), &self.services);
        session.auth().initialize(tokens).await;

        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session.id().to_string(), session.clone());
        }
        debug!("Created studio session {}", session.short_id());
        (session, true)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().ok().and_then(|mut s| s.remove(id));
        match removed {
            Some(session) => {
                session.teardown();
                true
            }
            None => false,
        }
    }

    /// Tears down every session not seen since `now - ttl`. Returns the
    /// number of sessions removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let expired: Vec<Arc<StudioSession>> = match self.sessions.write() {
            Ok(mut sessions) => {
                let ids: Vec<String> = sessions
                    .iter()
                    .filter(|(_, s)| s.last_seen() < cutoff)
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.iter().filter_map(|id| sessions.remove(id)).collect()
            }
            Err(_) => Vec::new(),
        };

        for session in &expired {
            session.teardown();
        }
        expired.len()
    }
}
