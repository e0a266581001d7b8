pub mod auth;
pub mod auth_session;
pub mod background_removal;
pub mod chat_assistant;
pub mod config;
pub mod handlers_auth;
pub mod handlers_chat;
pub mod handlers_health;
pub mod handlers_pages;
pub mod handlers_static;
pub mod handlers_studio;
pub mod image_crop;
pub mod layout_renderer;
pub mod package_catalog;
pub mod pages;
pub mod print_sheet;
pub mod session_sweeper;
pub mod studio_session;
pub mod warp_helpers;
pub mod working_image;

use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

use auth::SupabaseAuth;
use background_removal::HttpBackgroundRemover;
use chat_assistant::FallbackChain;
use config::Config;
use studio_session::{SessionRegistry, SessionServices};
use warp_helpers::{cors, handle_rejection};

/// Wires the remote service clients from configuration.
pub fn session_services(config: &Config, client: &reqwest::Client) -> SessionServices {
    SessionServices {
        auth_backend: Arc::new(SupabaseAuth::new(client.clone(), &config.auth)),
        remover: Arc::new(HttpBackgroundRemover::new(
            client.clone(),
            config.background_removal_url.clone(),
        )),
        chat_chain: FallbackChain::from_config(client, &config.chat),
        reset_redirect: format!(
            "{}/update-password",
            config.public_url.trim_end_matches('/')
        ),
        auth_bootstrap_timeout: config.auth.bootstrap_timeout,
    }
}

pub fn build_routes(
    registry: SessionRegistry,
    config: Arc<Config>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    handlers_health::build_health_routes(registry.clone())
        .or(handlers_studio::build_studio_routes(registry.clone(), config))
        .or(handlers_chat::build_chat_routes(registry.clone()))
        .or(handlers_auth::build_auth_routes(registry.clone()))
        .or(handlers_static::build_static_routes())
        .or(handlers_pages::build_page_routes(registry))
        .with(cors())
        .with(warp::log("portra_cv"))
        .recover(handle_rejection)
}
