use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced by the channel transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket level failure (bind, accept, keepalive setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the WebSocket layer, including upgrade and
    /// oversized inbound frames.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A data frame arrived but its payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// No frame was received within the liveness deadline.
    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    /// A write did not complete within the write deadline.
    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// Outgoing message is larger than the configured maximum.
    #[error("Message of {size} bytes exceeds the limit of {max} bytes")]
    MessageTooLarge {
        /// Encoded size of the rejected message.
        size: usize,
        /// Configured maximum message size.
        max: usize,
    },

    /// The channel has been shut down locally or its worker is gone.
    #[error("Channel closed")]
    ChannelClosed,

    /// A configuration value violates its invariants.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true if the error invalidates the connection.
    ///
    /// Fatal errors close the channel; the others only fail the single
    /// send or receive that produced them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ConnectionClosed
            | Error::Timeout(_)
            | Error::WriteTimeout(_)
            | Error::Io(_) => true,
            // Invalid UTF-8 in a text frame fails the connection, and the
            // stream yields nothing after any read error.
            Error::WebSocket(err) => !matches!(err, tungstenite::Error::WriteBufferFull(_)),
            Error::Decode(_)
            | Error::MessageTooLarge { .. }
            | Error::ChannelClosed
            | Error::InvalidConfig(_) => false,
        }
    }

    /// Maps a WebSocket error onto the transport taxonomy.
    ///
    /// Both ways tungstenite reports a finished connection are folded into
    /// [`Error::ConnectionClosed`].
    pub(crate) fn from_ws(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Error::ConnectionClosed
            }
            other => Error::WebSocket(other),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
