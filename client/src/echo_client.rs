use std::error::Error;
use std::time::{Duration, Instant};

use log::{debug, info};
use serde_json::json;
use xchannel::{KeepAliveConfig, Message, dial};

/// Outcome of one echo run.
pub struct EchoReport {
    pub messages: usize,
    pub elapsed: Duration,
}

/// Sends numbered messages to an echo server and checks each reply.
pub struct EchoClient {
    addr: String,
    endpoint: String,
    keepalive: KeepAliveConfig,
}

impl EchoClient {
    pub fn new(addr: impl Into<String>, endpoint: impl Into<String>, keepalive: KeepAliveConfig) -> Self {
        Self {
            addr: addr.into(),
            endpoint: endpoint.into(),
            keepalive,
        }
    }

    pub async fn run(&self, count: usize) -> Result<EchoReport, Box<dyn Error>> {
        info!("Connecting to ws://{}{}...", self.addr, self.endpoint);
        let channel = dial(&self.addr, &self.endpoint, self.keepalive).await?;
        info!("Connected to {:?}", channel.peer_addr());

        let start = Instant::now();
        for seq in 0..count {
            let request = Message::from(json!({"seq": seq, "body": "echo"}));
            channel.send(request.clone()).await?;
            let reply = channel.receive().await?;
            if reply != request {
                channel.close().await?;
                return Err(format!("echo mismatch at {}: {}", seq, reply.as_value()).into());
            }
            debug!("echo {} verified", seq);
        }
        let elapsed = start.elapsed();

        channel.close().await?;
        Ok(EchoReport {
            messages: count,
            elapsed,
        })
    }
}
