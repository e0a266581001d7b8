use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{AuthError, AuthTokens, Credentials};
use crate::studio_session::SessionRegistry;
use crate::warp_helpers::{
    append_cookie, cookie_header, session_reply, with_session, SessionHandle, REFRESH_COOKIE,
    TOKEN_COOKIE,
};

#[derive(Debug, Serialize)]
pub struct AuthErrorBody {
    pub message: String,
}

/// Uniform auth response: exactly one of `data` and `error` is set.
#[derive(Debug, Serialize)]
pub struct AuthEnvelope<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<AuthErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::NotSignedIn => StatusCode::UNAUTHORIZED,
        AuthError::AccountDeleted => StatusCode::FORBIDDEN,
        AuthError::EmailNotRegistered => StatusCode::NOT_FOUND,
        AuthError::Transport(_) => StatusCode::BAD_GATEWAY,
        AuthError::Backend { status, .. } if *status >= 500 => StatusCode::BAD_GATEWAY,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Wraps the result in the envelope and keeps the token cookies in step with
/// the session: set while signed in, cleared otherwise.
fn auth_reply<T: Serialize>(
    result: Result<T, AuthError>,
    handle: &SessionHandle,
) -> warp::reply::Response {
    let (envelope, status) = match result {
        Ok(data) => (
            AuthEnvelope {
                data: Some(data),
                error: None,
            },
            StatusCode::OK,
        ),
        Err(e) => {
            log::info!("Auth request failed: {}", e);
            (
                AuthEnvelope {
                    data: None,
                    error: Some(AuthErrorBody {
                        message: e.to_string(),
                    }),
                },
                status_for(&e),
            )
        }
    };

    let mut response = session_reply(
        warp::reply::with_status(warp::reply::json(&envelope), status),
        handle,
    );

    let auth = handle.session.auth();
    let signed_in = auth.state().is_signed_in();
    for (name, value) in [
        (TOKEN_COOKIE, auth.access_token()),
        (REFRESH_COOKIE, auth.refresh_token()),
    ] {
        match value {
            Some(value) if signed_in => {
                append_cookie(&mut response, &cookie_header(name, &value, None))
            }
            _ => append_cookie(&mut response, &cookie_header(name, "", Some(0))),
        }
    }
    response
}

pub async fn get_session(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let state = handle.session.auth().state();
    Ok(auth_reply(Ok::<_, AuthError>(state), &handle))
}

pub async fn sign_in(
    credentials: Credentials,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let result = handle.session.auth().sign_in(&credentials).await;
    Ok(auth_reply(result, &handle))
}

pub async fn sign_up(
    credentials: Credentials,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let result = handle.session.auth().sign_up(&credentials).await;
    Ok(auth_reply(result, &handle))
}

pub async fn reset_password(
    request: EmailRequest,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let result = handle
        .session
        .auth()
        .reset_password(&request.email)
        .await
        .map(|_| serde_json::json!({ "sent": true }));
    Ok(auth_reply(result, &handle))
}

pub async fn update_password(
    request: PasswordRequest,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let result = handle
        .session
        .auth()
        .update_password(&request.password)
        .await;
    Ok(auth_reply(result, &handle))
}

pub async fn sign_out(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    handle.session.auth().sign_out().await;
    Ok(auth_reply(
        Ok::<_, AuthError>(serde_json::json!({ "signed_out": true })),
        &handle,
    ))
}

pub async fn delete_account(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let result = handle
        .session
        .auth()
        .delete_account()
        .await
        .map(|_| serde_json::json!({ "deleted": true }));
    Ok(auth_reply(result, &handle))
}

pub async fn refresh(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let result = handle.session.auth().refresh().await;
    Ok(auth_reply(result, &handle))
}

/// The update-password page posts the tokens from the emailed link here.
pub async fn recovery(tokens: AuthTokens, handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let result = handle.session.auth().handle_recovery_callback(tokens).await;
    Ok(auth_reply(result, &handle))
}

pub fn build_auth_routes(
    registry: SessionRegistry,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let session = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("session"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_session(registry.clone()))
        .and_then(get_session);

    let signin = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("signin"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<Credentials>())
        .and(with_session(registry.clone()))
        .and_then(sign_in);

    let signup = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("signup"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<Credentials>())
        .and(with_session(registry.clone()))
        .and_then(sign_up);

    let reset = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("reset"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<EmailRequest>())
        .and(with_session(registry.clone()))
        .and_then(reset_password);

    let update = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("update-password"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<PasswordRequest>())
        .and(with_session(registry.clone()))
        .and_then(update_password);

    let signout = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("signout"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_session(registry.clone()))
        .and_then(sign_out);

    let delete = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("delete-account"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_session(registry.clone()))
        .and_then(delete_account);

    let refresh_route = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("refresh"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_session(registry.clone()))
        .and_then(refresh);

    let recovery_route = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path("recovery"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<AuthTokens>())
        .and(with_session(registry))
        .and_then(recovery);

    session
        .or(signin)
        .or(signup)
        .or(reset)
        .or(update)
        .or(signout)
        .or(delete)
        .or(refresh_route)
        .or(recovery_route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(status_for(&AuthError::NotSignedIn), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::AccountDeleted), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&AuthError::WeakPassword), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&AuthError::Backend {
                status: 503,
                message: "down".to_string()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_envelope_shape() {
        let ok = AuthEnvelope {
            data: Some(1),
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({ "data": 1, "error": null })
        );
    }
}
