use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use warp::http::header::{HeaderValue, SET_COOKIE};
use warp::{reject, Filter, Rejection, Reply};

use crate::auth::AuthTokens;
use crate::background_removal::BackgroundError;
use crate::config::Config;
use crate::image_crop::CropError;
use crate::print_sheet::SheetError;
use crate::studio_session::{SessionRegistry, StudioError, StudioSession};

pub const SESSION_COOKIE: &str = "portra_sid";
pub const TOKEN_COOKIE: &str = "portra_token";
pub const REFRESH_COOKIE: &str = "portra_refresh";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
}
impl reject::Reject for ValidationError {}

#[derive(Debug)]
pub struct UnauthorizedError;
impl reject::Reject for UnauthorizedError {}

#[derive(Debug)]
pub struct NotFoundError {
    pub message: String,
}
impl reject::Reject for NotFoundError {}

#[derive(Debug)]
pub struct ConflictError {
    pub message: String,
}
impl reject::Reject for ConflictError {}

#[derive(Debug)]
pub struct UpstreamError {
    pub message: String,
}
impl reject::Reject for UpstreamError {}

#[derive(Debug)]
pub struct ProcessingError {
    pub message: String,
}
impl reject::Reject for ProcessingError {}

pub fn validation(message: impl Into<String>) -> Rejection {
    reject::custom(ValidationError {
        message: message.into(),
    })
}

pub fn not_found(message: impl Into<String>) -> Rejection {
    reject::custom(NotFoundError {
        message: message.into(),
    })
}

pub fn conflict(message: impl Into<String>) -> Rejection {
    reject::custom(ConflictError {
        message: message.into(),
    })
}

pub fn processing(message: impl Into<String>) -> Rejection {
    reject::custom(ProcessingError {
        message: message.into(),
    })
}

/// Maps studio failures onto HTTP rejections. Remote service failures are
/// reported as 502, local processing failures as 500.
pub fn studio_rejection(err: StudioError) -> Rejection {
    let message = err.to_string();
    match err {
        StudioError::NoImage | StudioError::Background(BackgroundError::NoImage) => {
            not_found(message)
        }
        StudioError::UnknownPackage(_)
        | StudioError::Upload(_)
        | StudioError::Background(BackgroundError::InvalidColor(_))
        | StudioError::Sheet(SheetError::InvalidDpi(_)) => validation(message),
        StudioError::Crop(CropError::Rasterize(_)) | StudioError::Sheet(SheetError::Encode(_)) => {
            log::error!("Processing failed: {}", message);
            processing(message)
        }
        StudioError::Crop(_) => validation(message),
        StudioError::NothingToUndo | StudioError::Background(BackgroundError::AlreadyRunning) => {
            conflict(message)
        }
        StudioError::Background(_) => reject::custom(UpstreamError { message }),
    }
}

/// Resolved studio session plus whether it was created by this request.
#[derive(Clone)]
pub struct SessionHandle {
    pub session: Arc<StudioSession>,
    pub is_new: bool,
}

pub fn with_registry(
    registry: SessionRegistry,
) -> impl Filter<Extract = (SessionRegistry,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

pub fn with_config(
    config: Arc<Config>,
) -> impl Filter<Extract = (Arc<Config>,), Error = Infallible> + Clone {
    warp::any().map(move || config.clone())
}

/// Looks up the caller's studio session from its cookie, creating one (and
/// restoring auth from the token cookies) when missing.
pub fn with_session(
    registry: SessionRegistry,
) -> impl Filter<Extract = (SessionHandle,), Error = Rejection> + Clone {
    warp::cookie::optional(SESSION_COOKIE)
        .and(warp::cookie::optional(TOKEN_COOKIE))
        .and(warp::cookie::optional(REFRESH_COOKIE))
        .and(with_registry(registry))
        .and_then(
            |session_id: Option<String>,
             access_token: Option<String>,
             refresh_token: Option<String>,
             registry: SessionRegistry| async move {
                let tokens = access_token.map(|access_token| AuthTokens {
                    access_token,
                    refresh_token,
                    expires_in: None,
                });
                let (session, is_new) = registry.resolve(session_id.as_deref(), tokens).await;
                Ok::<_, Rejection>(SessionHandle { session, is_new })
            },
        )
}

/// Session filter for the gated studio API. Only an already registered,
/// signed-in session passes; anything else is a 401 and nothing is created.
pub fn with_signed_in_session(
    registry: SessionRegistry,
) -> impl Filter<Extract = (SessionHandle,), Error = Rejection> + Clone {
    warp::cookie::optional(SESSION_COOKIE)
        .and(with_registry(registry))
        .and_then(
            |session_id: Option<String>, registry: SessionRegistry| async move {
                let session = session_id
                    .and_then(|id| registry.get(&id))
                    .ok_or_else(|| reject::custom(UnauthorizedError))?;
                let handle = SessionHandle {
                    session,
                    is_new: false,
                };
                require_signed_in(&handle)?;
                Ok::<_, Rejection>(handle)
            },
        )
}

pub fn require_signed_in(handle: &SessionHandle) -> Result<(), Rejection> {
    if handle.session.auth().state().is_signed_in() {
        Ok(())
    } else {
        Err(reject::custom(UnauthorizedError))
    }
}

pub fn cookie_header(name: &str, value: &str, max_age: Option<u64>) -> String {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", name, value);
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    cookie
}

pub fn append_cookie(response: &mut warp::reply::Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => log::warn!("Dropping invalid cookie header: {}", e),
    }
}

/// Finishes a studio reply, handing out the session cookie on first contact.
pub fn session_reply(reply: impl Reply, handle: &SessionHandle) -> warp::reply::Response {
    let mut response = reply.into_response();
    if handle.is_new {
        append_cookie(
            &mut response,
            &cookie_header(SESSION_COOKIE, handle.session.id(), None),
        );
    }
    response
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;
    let timestamp = chrono::Utc::now().to_rfc3339();

    if err.is_not_found() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(not_found) = err.find::<NotFoundError>() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = not_found.message.clone();
    } else if let Some(validation_error) = err.find::<ValidationError>() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = validation_error.message.clone();
    } else if err.find::<UnauthorizedError>().is_some() {
        code = warp::http::StatusCode::UNAUTHORIZED;
        message = "Sign in required".to_string();
    } else if let Some(conflict) = err.find::<ConflictError>() {
        code = warp::http::StatusCode::CONFLICT;
        message = conflict.message.clone();
    } else if let Some(upstream) = err.find::<UpstreamError>() {
        code = warp::http::StatusCode::BAD_GATEWAY;
        message = upstream.message.clone();
    } else if let Some(processing) = err.find::<ProcessingError>() {
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = processing.message.clone();
    } else if let Some(body_error) = err.find::<warp::body::BodyDeserializeError>() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = format!("Invalid request body: {}", body_error);
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        code = warp::http::StatusCode::PAYLOAD_TOO_LARGE;
        message = "Payload too large".to_string();
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        code = warp::http::StatusCode::UNSUPPORTED_MEDIA_TYPE;
        message = "Unsupported media type".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = warp::http::StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    let error_response = ErrorResponse {
        error: message,
        code: code.as_u16(),
        timestamp,
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_response),
        code,
    ))
}

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
}
