use log::{error, info};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;

use portra_cv::config::Config;
use portra_cv::session_sweeper::SessionSweeper;
use portra_cv::studio_session::SessionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::from_env()?;
    let port = config.port;
    let host: IpAddr = config.host.parse()?;

    info!("Starting PortraCV server on Port {}", port);
    info!("Public URL: {}", config.public_url);
    info!("Background removal: {}", config.background_removal_url);
    info!("Print DPI: {}", config.print_dpi);

    // Check if port is available BEFORE initializing services
    if !is_port_available(host, port) {
        error!(
            "Port {} is already in use. Please stop any existing PortraCV instances or use a different port.",
            port
        );
        error!(
            "You can check what's using the port with: lsof -i :{}",
            port
        );
        return Err(format!("Port {} is already in use", port).into());
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("portra-cv/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let services = portra_cv::session_services(&config, &client);
    let chat_providers = services.chat_chain.provider_names();
    if chat_providers.is_empty() {
        info!("No chat provider configured, the assistant will answer with a notice");
    } else {
        info!("Chat providers: {:?}", chat_providers);
    }

    let registry = SessionRegistry::new(services, config.session_ttl_minutes);
    let _sweeper_handle = SessionSweeper::new(registry.clone()).start();

    let routes = portra_cv::build_routes(registry, Arc::new(config));

    info!(
        "Server started successfully, listening on http://localhost:{}",
        port
    );

    warp::serve(routes).run(SocketAddr::new(host, port)).await;

    Ok(())
}

fn is_port_available(host: IpAddr, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}
