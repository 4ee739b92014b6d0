//! # Chat Relay Server Library
//!
//! Accepts encrypted line connections, decrypts what each client sends and
//! relays it, re-encrypted, to every other connected client.
//!
//! ## Module Organization
//!
//! ### Client Module (`client`)
//! Server-side bookkeeping for one accepted connection:
//! - Server-assigned session id and peer address
//! - Identity placeholder (sender IP, sender id, last-seen timestamp) taken
//!   from the envelopes the client sends
//!
//! ### Client Manager Module (`client_manager`)
//! The registry of live sessions:
//! - Registration with a capacity limit
//! - Idempotent removal from any exit path
//! - Ordered snapshots used for fan-out without holding the lock during writes
//!
//! ### Network Module (`network`)
//! The relay itself:
//! - Accept loop and one task per connection
//! - Payload parsing and the relay policy
//! - Broadcast to every session except the sender
//! - Shutdown that closes every live session
//!
//! ## Session Lifecycle
//!
//! `Accepted → Reading → (Broadcasting)* → Closed`. A session ends when the
//! client closes the stream, the transport fails, the idle timeout expires or
//! the server shuts down. Whatever the cause, the session is removed from the
//! registry and its connection closed exactly once. A frame that fails to
//! decode is skipped and the session keeps reading.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ChatServer::bind(ServerConfig::default()).await?;
//!     let shutdown = server.shutdown_handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! Every party shares one compiled-in AES key and frames are encrypted in ECB
//! mode. This hides message text from casual observers only: anyone with the
//! binary can decrypt the traffic and identical messages produce identical
//! frames.

pub mod client;
pub mod client_manager;
pub mod network;
