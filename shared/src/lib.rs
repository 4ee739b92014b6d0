//! # Chat Relay Shared Library
//!
//! Building blocks used by both the relay server and the chat client:
//!
//! - [`codec`]: turns plaintext into a single base64 line and back, using the
//!   pre-shared AES key
//! - [`connection`]: one encrypted line stream over TCP with a receive loop,
//!   serialized writes and an idempotent close
//! - [`envelope`]: the `verb,timestamp,senderIp,senderId,text` payload grammar
//! - [`error`]: the error taxonomy every crate reports through
//!
//! ## Wire Format
//!
//! Every message is one frame: `base64(aes128_ecb(utf8(payload)))` followed by
//! a single `\n`. Receivers strip the terminator, decode, decrypt and UTF-8
//! decode. A frame that fails any of those steps is dropped on its own; it
//! never tears down the connection it arrived on.

pub mod codec;
pub mod connection;
pub mod envelope;
pub mod error;

pub use codec::{CipherCodec, CipherKey, DEFAULT_KEY};
pub use connection::{Connection, ConnectionState, ReceiveOutcome};
pub use envelope::{MessageEnvelope, Payload, Verb};
pub use error::{ChatError, DecodeError};

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";
