use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelInstance;
use crate::config::{KeepAliveConfig, ListenerConfig};
use crate::error::Result;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server side of the transport.
///
/// Dropping the listener stops accepting; channels already delivered or
/// still upgrading are unaffected.
pub struct Listener {
    local_addr: SocketAddr,
    queued: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

/// Delivery queue of upgraded channels.
///
/// Holds at most `max_connections` channels; upgrades completing while it
/// is full wait until an entry is taken.
pub struct Incoming {
    receiver: mpsc::Receiver<ChannelInstance>,
    queued: Arc<AtomicUsize>,
}

impl Listener {
    /// Binds `addr` and starts accepting connections.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: ListenerConfig,
        keepalive: KeepAliveConfig,
    ) -> Result<(Listener, Incoming)> {
        config.validate()?;
        keepalive.validate()?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "listening on ws://{}{}, max {} queued connections",
            local_addr,
            config.endpoint(),
            config.max_connections()
        );

        let (sender, receiver) = mpsc::channel(config.max_connections());
        let queued = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let acceptor = Acceptor {
            listener,
            sender,
            queued: queued.clone(),
            shutdown: shutdown.clone(),
            config,
            keepalive,
        };
        let handle = tokio::spawn(acceptor.run());

        Ok((
            Listener {
                local_addr,
                queued: queued.clone(),
                shutdown,
                acceptor: Mutex::new(Some(handle)),
            },
            Incoming { receiver, queued },
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of channels waiting in the delivery queue.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Stops accepting and waits for the accept loop to exit.
    ///
    /// Connections already accepted finish their upgrade and are still
    /// delivered. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.acceptor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("accept loop ended abnormally: {}", err);
            }
            info!("listener on {} shut down", self.local_addr);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Incoming {
    /// Waits for the next upgraded channel.
    ///
    /// Returns `None` once the listener is gone and every in-flight upgrade
    /// has finished.
    pub async fn recv(&mut self) -> Option<ChannelInstance> {
        let instance = self.receiver.recv().await?;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Some(instance)
    }

    pub fn try_recv(&mut self) -> Option<ChannelInstance> {
        let instance = self.receiver.try_recv().ok()?;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Some(instance)
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Acceptor {
    listener: TcpListener,
    sender: mpsc::Sender<ChannelInstance>,
    queued: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    config: ListenerConfig,
    keepalive: KeepAliveConfig,
}

impl Acceptor {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted TCP connection from {}", peer);
                        tokio::spawn(upgrade(
                            stream,
                            peer,
                            self.sender.clone(),
                            self.queued.clone(),
                            self.config.clone(),
                            self.keepalive,
                        ));
                    }
                    Err(err) => {
                        warn!("accept failed: {}", err);
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                },
            }
        }
        debug!("accept loop stopped");
    }
}

/// Upgrades one accepted connection and hands it to the delivery queue.
async fn upgrade(
    stream: TcpStream,
    peer: SocketAddr,
    sender: mpsc::Sender<ChannelInstance>,
    queued: Arc<AtomicUsize>,
    config: ListenerConfig,
    keepalive: KeepAliveConfig,
) {
    let tcp_keepalive = TcpKeepalive::new().with_time(config.tcp_keepalive());
    if let Err(err) = SockRef::from(&stream).set_tcp_keepalive(&tcp_keepalive) {
        warn!("failed to enable TCP keepalive for {}: {}", peer, err);
    }

    let endpoint = config.endpoint().to_owned();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == endpoint {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("not found".to_owned()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let handshake = accept_hdr_async_with_config(
        stream,
        check_path,
        Some(keepalive.websocket_config()),
    );
    let ws = match timeout(keepalive.write_wait(), handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(err)) => {
            error!("upgrade from {} failed: {}", peer, err);
            return;
        }
        Err(_) => {
            error!("upgrade from {} timed out", peer);
            return;
        }
    };

    let instance = match ChannelInstance::websocket(ws, keepalive) {
        Ok(instance) => instance.with_peer_addr(peer),
        Err(err) => {
            error!("failed to start channel for {}: {}", peer, err);
            return;
        }
    };
    info!("channel opened with {}", peer);

    match sender.reserve().await {
        Ok(permit) => {
            queued.fetch_add(1, Ordering::SeqCst);
            permit.send(instance);
        }
        Err(_) => {
            debug!("delivery queue gone, closing channel with {}", peer);
            let _ = instance.close().await;
        }
    }
}
