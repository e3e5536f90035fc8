mod echo_server;

use std::error::Error;

use echo_server::EchoServer;
use log::info;
use xchannel::{KeepAliveConfig, ListenerConfig};

const LISTEN_ADDR: &str = "127.0.0.1:8080";
const ENDPOINT: &str = "/";
const MAX_CONNECTIONS: usize = 16;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ListenerConfig::default()
        .with_endpoint(ENDPOINT)
        .with_max_connections(MAX_CONNECTIONS);
    let server = EchoServer::new(LISTEN_ADDR, config, KeepAliveConfig::default());
    server.run().await?;

    info!("server stopped");
    Ok(())
}
