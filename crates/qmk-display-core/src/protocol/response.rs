//! Outcome of one host → keyboard round trip.
//!
//! A send never fails with a panic or an `Err` crossing the session boundary;
//! every outcome is a [`Response`].  Transport failures, protocol violations
//! and invalid input all land in [`ResponseError`] so the caller can log the
//! cause (including the offending bytes) and decide whether to retry.

use std::error::Error as StdError;

use thiserror::Error;

use crate::protocol::codec::CodecError;
use crate::protocol::messages::{Message, Opcode, Packet};

/// Why an echoed report was not accepted as an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckFailure {
    /// Nothing arrived before the read timeout.
    #[error("no response within timeout")]
    Empty,

    /// The echoed report is shorter or longer than the request.
    #[error("response length {actual} does not match packet length {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The status byte is not [`crate::protocol::messages::ACK_OK`].
    #[error("device returned status {status:#04x}")]
    Rejected { status: u8 },
}

/// Every way a send can fail.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The message could not be encoded; nothing was written.
    #[error("invalid message: {0}")]
    Codec(#[from] CodecError),

    /// The transport reported a negative write result.
    #[error("failed to write {opcode:?} packet (transport returned {code})")]
    WriteFailed { opcode: Opcode, code: i32 },

    /// The echoed report did not acknowledge the request.
    #[error("invalid response to packet {:#04x}: {reason}", .request[0])]
    InvalidResponse {
        reason: AckFailure,
        request: Packet,
        received: Vec<u8>,
    },

    /// The underlying transport raised an error.
    #[error("transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// The session handle is closed.
    #[error("device session is closed")]
    SessionClosed,

    /// The session already sent its final `StopCommunication` packet.
    #[error("device session already finished")]
    SessionFinished,
}

impl ResponseError {
    /// Wraps any transport-level error, keeping its message and the source.
    pub fn transport<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ResponseError::Transport {
            reason: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

/// Result of sending a [`Message`].
#[derive(Debug)]
pub enum Response {
    /// Every packet of the message was echoed back with an OK status.
    Acknowledge(Message),
    /// The first failure encountered; later packets were not sent.
    Error(ResponseError),
}

impl Response {
    pub fn is_acknowledge(&self) -> bool {
        matches!(self, Response::Acknowledge(_))
    }

    pub fn error(&self) -> Option<&ResponseError> {
        match self {
            Response::Acknowledge(_) => None,
            Response::Error(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Message, ResponseError> {
        match self {
            Response::Acknowledge(m) => Ok(m),
            Response::Error(e) => Err(e),
        }
    }
}

impl From<Result<Message, ResponseError>> for Response {
    fn from(result: Result<Message, ResponseError>) -> Self {
        match result {
            Ok(m) => Response::Acknowledge(m),
            Err(e) => Response::Error(e),
        }
    }
}
