//! Client notifications and how they reach the caller
//!
//! The network tasks never call into user code directly. They hand every
//! event to an `EventDispatcher`, which decides on which execution context
//! the caller sees it. `ChannelDispatcher` queues events for the caller to
//! drain on its own task; any `Fn(ClientEvent)` closure is invoked directly.

use log::debug;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    MessageReceived(String),
    ErrorOccurred(String),
}

pub trait EventDispatcher: Send + Sync + 'static {
    fn dispatch(&self, event: ClientEvent);
}

impl<F> EventDispatcher for F
where
    F: Fn(ClientEvent) + Send + Sync + 'static,
{
    fn dispatch(&self, event: ClientEvent) {
        self(event)
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// Forwards events into a queue owned by the caller's context
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: ClientEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Dropping {:?}: event receiver is gone", e.0);
        }
    }
}
