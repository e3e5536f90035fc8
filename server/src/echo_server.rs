use std::sync::Arc;

use log::{info, warn};
use xchannel::{ChannelInstance, Error, KeepAliveConfig, Listener, ListenerConfig};

/// Accepts channels and echoes every message back to its sender.
pub struct EchoServer {
    addr: String,
    config: ListenerConfig,
    keepalive: KeepAliveConfig,
}

impl EchoServer {
    pub fn new(addr: impl Into<String>, config: ListenerConfig, keepalive: KeepAliveConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            keepalive,
        }
    }

    /// Serves until Ctrl-C, then stops accepting and returns.
    pub async fn run(&self) -> xchannel::Result<()> {
        let (listener, mut incoming) =
            Listener::bind(self.addr.as_str(), self.config.clone(), self.keepalive).await?;
        info!("echo server listening on {}", listener.local_addr());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }
                instance = incoming.recv() => match instance {
                    Some(instance) => {
                        tokio::spawn(Self::handle_channel(Arc::new(instance)));
                    }
                    None => break,
                },
            }
        }

        listener.shutdown().await;
        Ok(())
    }

    async fn handle_channel(instance: Arc<ChannelInstance>) {
        let peer = instance.peer_addr();
        info!("serving channel from {:?}", peer);

        let mut echoed = 0usize;
        loop {
            match instance.receive().await {
                Ok(message) => {
                    if let Err(err) = instance.send(message).await {
                        warn!("echo to {:?} failed: {}", peer, err);
                        if err.is_fatal() {
                            break;
                        }
                        continue;
                    }
                    echoed += 1;
                }
                Err(Error::Decode(err)) => warn!("undecodable message from {:?}: {}", peer, err),
                Err(Error::ConnectionClosed) | Err(Error::ChannelClosed) => break,
                Err(err) => {
                    warn!("channel from {:?} failed: {}", peer, err);
                    break;
                }
            }
        }

        let _ = instance.close().await;
        info!("channel from {:?} finished, {} messages echoed", peer, echoed);
    }
}
