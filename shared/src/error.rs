//! Error taxonomy shared by the client and the relay server
//!
//! Failures are split by how far they are allowed to travel:
//! - `DecodeError` stays at frame granularity and never ends a session
//! - `ChatError::Transport` and `ChatError::IdleTimeout` end one connection
//! - `ChatError::Connect` and `ChatError::NotConnected` are reported to the caller
//! - `ChatError::Bind` is the only failure that stops the server binary

use std::io;
use std::string::FromUtf8Error;
use std::time::Duration;
use thiserror::Error;

/// A single frame could not be turned back into plaintext
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Wrong key, bad padding, empty input or a length that is not a block multiple
    #[error("frame could not be decrypted")]
    Decrypt,

    #[error("decrypted payload is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("could not bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Client is not connected to the server.")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("connection idle for more than {0:?}")]
    IdleTimeout(Duration),

    /// A second receive loop was started on the same connection
    #[error("connection already has an active receive loop")]
    ReceiverBusy,
}
