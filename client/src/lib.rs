//! # Chat Client Library
//!
//! Client side of the encrypted chat relay. A `ChatClient` keeps one
//! connection to the server, sends messages wrapped in envelopes and runs a
//! background receive loop that decrypts whatever the server relays.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The `ChatClient` itself:
//! - Background connect and receive tasks
//! - `SendMessage` / `SendMessageWithDetails` envelopes stamped with local
//!   time, local IP and a random per-client id
//! - Idempotent disconnect with exactly one terminal notification
//!
//! ### Events Module (`events`)
//! Notifications (`Connected`, `Disconnected`, `MessageReceived`,
//! `ErrorOccurred`) and the dispatchers that move them from network tasks to
//! the caller's own context.
//!
//! ### Input and Rendering Modules (`input`, `rendering`)
//! Console command parsing and event formatting used by the `client` binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::events::{ChannelDispatcher, ClientEvent};
//! use client::network::ChatClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (dispatcher, mut events) = ChannelDispatcher::new();
//!     let client = ChatClient::new(dispatcher);
//!
//!     client.connect_to_server("127.0.0.1", 12345);
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Connected => {
//!                 let _ = client.send_message("hello, everyone").await;
//!             }
//!             ClientEvent::MessageReceived(text) => println!("{}", text),
//!             ClientEvent::ErrorOccurred(message) => eprintln!("{}", message),
//!             ClientEvent::Disconnected => break,
//!         }
//!     }
//! }
//! ```

pub mod events;
pub mod input;
pub mod network;
pub mod rendering;
