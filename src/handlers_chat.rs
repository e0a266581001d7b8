use serde::{Deserialize, Serialize};
use warp::{Filter, Rejection, Reply};

use crate::chat_assistant::{ChatError, ChatMessage};
use crate::studio_session::SessionRegistry;
use crate::warp_helpers::{conflict, session_reply, validation, with_session, SessionHandle};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub messages: Vec<ChatMessage>,
    pub awaiting_response: bool,
}

pub async fn get_transcript(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let chat = handle.session.chat();
    let response = TranscriptResponse {
        messages: chat.messages(),
        awaiting_response: chat.is_awaiting_response(),
    };
    Ok(session_reply(warp::reply::json(&response), &handle))
}

/// Available without signing in. Provider failures never surface here, they
/// end up as a single bot reply in the transcript.
pub async fn send_message(
    request: ChatRequest,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let added = match handle.session.chat().submit(&request.message).await {
        Ok(added) => added,
        Err(e @ (ChatError::Busy | ChatError::Reset)) => return Err(conflict(e.to_string())),
        Err(e) => return Err(validation(e.to_string())),
    };

    Ok(session_reply(
        warp::reply::json(&serde_json::json!({ "messages": added })),
        &handle,
    ))
}

pub fn build_chat_routes(
    registry: SessionRegistry,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let transcript = warp::path("api")
        .and(warp::path("chat"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_session(registry.clone()))
        .and_then(get_transcript);

    let send = warp::path("api")
        .and(warp::path("chat"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<ChatRequest>())
        .and(with_session(registry))
        .and_then(send_message);

    transcript.or(send)
}
