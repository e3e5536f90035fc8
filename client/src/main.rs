mod echo_client;

use std::error::Error;

use echo_client::EchoClient;
use log::info;
use xchannel::KeepAliveConfig;

const SERVER_ADDR: &str = "127.0.0.1:8080";
const ENDPOINT: &str = "/";
const MESSAGE_COUNT: usize = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let client = EchoClient::new(SERVER_ADDR, ENDPOINT, KeepAliveConfig::default());
    let report = client.run(MESSAGE_COUNT).await?;

    info!("=== Echo Complete ===");
    info!("Messages: {}", report.messages);
    info!("Time: {:.2} seconds", report.elapsed.as_secs_f64());
    info!(
        "Rate: {:.2} msg/s",
        report.messages as f64 / report.elapsed.as_secs_f64()
    );
    Ok(())
}
