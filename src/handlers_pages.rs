use warp::{Filter, Rejection, Reply};

use crate::pages;
use crate::studio_session::SessionRegistry;
use crate::warp_helpers::{session_reply, with_session, SessionHandle};

enum Gate {
    Recovery,
    SignedOut,
    SignedIn(crate::auth::AuthUser),
}

/// Recovery mode wins over everything, then the sign-in requirement.
fn gate(handle: &SessionHandle) -> Gate {
    let state = handle.session.auth().state();
    if state.is_recovery_mode {
        return Gate::Recovery;
    }
    match state.user {
        Some(user) => Gate::SignedIn(user),
        None => Gate::SignedOut,
    }
}

pub async fn studio(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let html = match gate(&handle) {
        Gate::Recovery => pages::update_password_page(),
        Gate::SignedOut => pages::sign_in_page(&handle.session.chat().messages()),
        Gate::SignedIn(user) => pages::studio_page(
            &handle.session.render_plan(),
            &user,
            &handle.session.chat().messages(),
        ),
    };
    Ok(session_reply(warp::reply::html(html), &handle))
}

pub async fn update_password(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    Ok(session_reply(
        warp::reply::html(pages::update_password_page()),
        &handle,
    ))
}

pub async fn print(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let html = match gate(&handle) {
        Gate::Recovery => pages::update_password_page(),
        Gate::SignedOut => pages::sign_in_page(&handle.session.chat().messages()),
        Gate::SignedIn(_) => pages::print_page(&handle.session.render_plan()),
    };
    Ok(session_reply(warp::reply::html(html), &handle))
}

pub fn build_page_routes(
    registry: SessionRegistry,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_session(registry.clone()))
        .and_then(studio);

    let update = warp::path("update-password")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_session(registry.clone()))
        .and_then(update_password);

    let print_route = warp::path("print")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_session(registry))
        .and_then(print);

    index.or(update).or(print_route)
}
