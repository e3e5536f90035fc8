//! Rendezvous between a caller and one background I/O worker.
//!
//! A [`HandlerPipe`] is the caller end, a [`WorkerPipe`] the worker end. The
//! pipe carries three things:
//!
//! - a one-slot request/response exchange: the caller hands over a
//!   [`MessagePacket`] and blocks until the worker returns a completed one;
//! - a quit handshake: the requester passes an acknowledgment sender that
//!   the worker fires only after it has released its half of the connection;
//! - an error-report channel for fatal errors found outside an exchange.
//!
//! ```text
//!   caller                         worker
//!     | -- Exchange(packet, reply) --> |
//!     | <------- completed packet ---- |
//!     | -- quit(ack) ----------------> |  release connection half
//!     | <------- ack ----------------- |
//!     | <------- error report -------- |  fatal error, then Close()
//! ```

use std::fmt;
use std::sync::Weak;

use log::{debug, error, warn};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::adapter::Closer;
use crate::error::{Error, Result};
use crate::message::MessagePacket;

/// Direction served by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    Read,
    Write,
}

impl fmt::Display for PipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeMode::Read => write!(f, "read"),
            PipeMode::Write => write!(f, "write"),
        }
    }
}

type QuitAck = oneshot::Sender<()>;

/// One pending request: the packet and where to return it.
pub(crate) struct Exchange {
    packet: MessagePacket,
    reply: oneshot::Sender<MessagePacket>,
}

impl Exchange {
    pub(crate) fn packet(&self) -> &MessagePacket {
        &self.packet
    }

    pub(crate) fn packet_mut(&mut self) -> &mut MessagePacket {
        &mut self.packet
    }

    /// Returns the request's own packet to the caller.
    pub(crate) fn respond(self) {
        let _ = self.reply.send(self.packet);
    }

    /// Returns `packet` in place of the request's one. Hands it back if
    /// the caller is gone.
    pub(crate) fn respond_with(self, packet: MessagePacket) -> std::result::Result<(), MessagePacket> {
        self.reply.send(packet)
    }
}

/// Why a worker left its loop.
pub(crate) enum Stop {
    /// Quit requested; the acknowledgment is sent once resources are released.
    Quit(QuitAck),
    /// The owning adapter was dropped without closing.
    Detached,
    /// The connection is unusable.
    Fatal(Error),
}

/// What the worker end observed.
pub(crate) enum PipeEvent {
    Request(Exchange),
    Stop(Stop),
}

/// Caller end of a pipe. Owned by the adapter.
///
/// The pipe does not serialize callers: two concurrent exchanges on the
/// same pipe are each answered, in no particular order. Single-flight access
/// is enforced by [`ChannelInstance`](crate::ChannelInstance).
pub struct HandlerPipe {
    mode: PipeMode,
    requests: mpsc::Sender<Exchange>,
    quit: mpsc::Sender<QuitAck>,
    errors: Mutex<mpsc::UnboundedReceiver<Error>>,
}

/// Worker end of a pipe.
pub(crate) struct WorkerPipe {
    mode: PipeMode,
    requests: mpsc::Receiver<Exchange>,
    quit: mpsc::Receiver<QuitAck>,
    errors: mpsc::UnboundedSender<Error>,
}

impl HandlerPipe {
    pub(crate) fn new(mode: PipeMode) -> (Self, WorkerPipe) {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (quit_tx, quit_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let handler = HandlerPipe {
            mode,
            requests: request_tx,
            quit: quit_tx,
            errors: Mutex::new(error_rx),
        };
        let worker = WorkerPipe {
            mode,
            requests: request_rx,
            quit: quit_rx,
            errors: error_tx,
        };
        (handler, worker)
    }

    pub fn mode(&self) -> PipeMode {
        self.mode
    }

    /// Returns true while the worker end is alive.
    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Hands `packet` to the worker and waits for the completed packet.
    ///
    /// If the worker stops before answering, the error it reported is
    /// returned instead; a worker that stopped without error yields
    /// [`Error::ChannelClosed`].
    pub async fn exchange(&self, packet: MessagePacket) -> Result<MessagePacket> {
        let (reply, response) = oneshot::channel();
        if self.requests.send(Exchange { packet, reply }).await.is_err() {
            return Err(self.pending_error().await);
        }
        match response.await {
            Ok(packet) => Ok(packet),
            Err(_) => Err(self.pending_error().await),
        }
    }

    /// Asks the worker to stop and waits for its acknowledgment.
    ///
    /// Returns at once if the worker has already stopped.
    pub async fn request_quit(&self) {
        let (ack, acked) = oneshot::channel();
        if self.quit.send(ack).await.is_err() {
            debug!("{} worker already stopped", self.mode);
            return;
        }
        // A dropped acknowledgment means the worker exited on its own,
        // after releasing its resources.
        let _ = acked.await;
    }

    /// Waits for the next fatal error reported by the worker.
    ///
    /// Returns `None` once the worker has stopped and every report has
    /// been taken.
    pub async fn error_report(&self) -> Option<Error> {
        self.errors.lock().await.recv().await
    }

    /// Takes a pending error report without waiting.
    pub fn try_error_report(&self) -> Option<Error> {
        self.errors.try_lock().ok()?.try_recv().ok()
    }

    async fn pending_error(&self) -> Error {
        self.error_report().await.unwrap_or(Error::ChannelClosed)
    }
}

impl fmt::Debug for HandlerPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerPipe")
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish()
    }
}

impl WorkerPipe {
    /// Waits for a quit request or, when `accept_requests` is set, for the
    /// next exchange. Quit wins when both are ready.
    pub(crate) async fn next_event(&mut self, accept_requests: bool) -> PipeEvent {
        tokio::select! {
            biased;
            ack = self.quit.recv() => match ack {
                Some(ack) => PipeEvent::Stop(Stop::Quit(ack)),
                None => PipeEvent::Stop(Stop::Detached),
            },
            request = self.requests.recv(), if accept_requests => match request {
                Some(request) => PipeEvent::Request(request),
                None => PipeEvent::Stop(Stop::Detached),
            },
        }
    }

    /// Completes the worker's exit. Must be called after the worker has
    /// released its half of the connection.
    ///
    /// A fatal error is reported on the error channel and closes the
    /// adapter from a separate task. Dropping the pipe afterwards unblocks
    /// any quit request that raced with the exit.
    pub(crate) fn finish(self, stop: Stop, closer: &Weak<dyn Closer>) {
        match stop {
            Stop::Quit(ack) => {
                debug!("{} worker stopped on request", self.mode);
                let _ = ack.send(());
            }
            Stop::Detached => {
                debug!("{} worker stopped, adapter dropped", self.mode);
            }
            Stop::Fatal(err) => {
                warn!("{} worker stopped: {}", self.mode, err);
                let _ = self.errors.send(err);
                if let Some(closer) = closer.upgrade() {
                    let mode = self.mode;
                    tokio::spawn(async move {
                        if let Err(err) = closer.close().await {
                            error!("closing channel after {} failure: {}", mode, err);
                        }
                    });
                }
            }
        }
    }
}
