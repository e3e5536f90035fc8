//! Payload unit and the packet that carries it through a handler pipe.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One application message.
///
/// The transport treats the content as opaque; it is only encoded to and
/// decoded from a data frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Value);

impl Message {
    /// Builds a message from any serializable value.
    pub fn new<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Decodes the message into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.0)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Encodes the message into the text carried by a data frame.
    pub(crate) fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub(crate) fn from_text(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A message together with the outcome of moving it through a pipe.
///
/// Write requests enter the pipe carrying a message and come back with the
/// outcome filled in. Read requests enter empty and come back carrying the
/// received message or the decode error.
#[derive(Debug, Default)]
pub struct MessagePacket {
    message: Option<Message>,
    error: Option<Error>,
}

impl MessagePacket {
    /// Packet carrying a message, outcome not yet known.
    pub fn new(message: Message) -> Self {
        Self {
            message: Some(message),
            error: None,
        }
    }

    /// Packet used to ask the read worker for the next message.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Packet carrying only a failure.
    pub fn failed(error: Error) -> Self {
        Self {
            message: None,
            error: Some(error),
        }
    }

    /// Wraps the result of decoding one inbound frame.
    pub(crate) fn received(decoded: Result<Message>) -> Self {
        match decoded {
            Ok(message) => Self::new(message),
            Err(err) => Self::failed(err),
        }
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Records the outcome of the operation performed on this packet.
    pub(crate) fn set_outcome(&mut self, outcome: Result<()>) {
        self.error = outcome.err();
    }

    /// Outcome of a write request.
    pub fn into_outcome(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Outcome of a read request.
    pub fn into_message(self) -> Result<Message> {
        match (self.error, self.message) {
            (Some(err), _) => Err(err),
            (None, Some(message)) => Ok(message),
            (None, None) => Err(Error::ChannelClosed),
        }
    }
}
