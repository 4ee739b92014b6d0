use crate::events::{ClientEvent, EventDispatcher};
use log::{error, info, warn};
use shared::{
    ChatError, CipherCodec, CipherKey, Connection, MessageEnvelope, ReceiveOutcome, Verb,
    DEFAULT_KEY,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

const ALREADY_CONNECTED: &str = "Client is already connected to the server.";
const CONNECT_IN_PROGRESS: &str = "A connection attempt is already in progress.";

/// Chat client keeping one encrypted connection to the relay server
///
/// Every outcome is reported through the injected `EventDispatcher`:
/// `Connected`, `MessageReceived`, `ErrorOccurred`, and at most one terminal
/// `Disconnected` or `ErrorOccurred` per connection. Cloning yields another
/// handle to the same client.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

struct Inner {
    client_id: String,
    codec: CipherCodec,
    dispatcher: Box<dyn EventDispatcher>,
    connection: Mutex<Option<Arc<Connection>>>,
    connecting: AtomicBool,
}

impl ChatClient {
    pub fn new(dispatcher: impl EventDispatcher) -> Self {
        Self::with_key(DEFAULT_KEY, dispatcher)
    }

    pub fn with_key(key: CipherKey, dispatcher: impl EventDispatcher) -> Self {
        ChatClient {
            inner: Arc::new(Inner {
                client_id: Uuid::new_v4().to_string(),
                codec: CipherCodec::new(key),
                dispatcher: Box::new(dispatcher),
                connection: Mutex::new(None),
                connecting: AtomicBool::new(false),
            }),
        }
    }

    /// Random identifier sent with every envelope
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .current()
            .is_some_and(|connection| connection.is_connected())
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    /// Connects in the background
    ///
    /// Dispatches `Connected` and starts the receive loop on success, or
    /// `ErrorOccurred` with the failure reason.
    pub fn connect_to_server(&self, host: &str, port: u16) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let host = host.to_string();
        tokio::spawn(async move { inner.connect(&host, port).await })
    }

    pub async fn send_message(&self, text: &str) -> Result<(), ChatError> {
        self.send_envelope(Verb::SendMessage, text).await
    }

    /// Like `send_message`, but asks the server to relay the sender's IP, id and timestamp too
    pub async fn send_message_with_details(&self, text: &str) -> Result<(), ChatError> {
        self.send_envelope(Verb::SendMessageWithDetails, text).await
    }

    async fn send_envelope(&self, verb: Verb, text: &str) -> Result<(), ChatError> {
        let Some(connection) = self.inner.current().filter(|c| c.is_connected()) else {
            let err = ChatError::NotConnected;
            error!("{}", err);
            self.inner.dispatch(ClientEvent::ErrorOccurred(err.to_string()));
            return Err(err);
        };

        let sender_ip = connection.local_addr().ip().to_string();
        let envelope = MessageEnvelope::new(verb, &sender_ip, &self.inner.client_id, text);

        if let Err(e) = connection.send_line(&envelope.to_payload()).await {
            error!("Send Message failed: {}", e);
            self.inner.dispatch(ClientEvent::ErrorOccurred(e.to_string()));
            return Err(e);
        }

        Ok(())
    }

    /// Closes the connection; does nothing if there is none
    pub async fn disconnect_from_server(&self) {
        let Some(connection) = self.inner.slot().take() else {
            return;
        };

        match connection.close().await {
            Ok(true) => self.inner.dispatch(ClientEvent::Disconnected),
            // The receive loop already reported the connection loss
            Ok(false) => {}
            Err(e) => {
                warn!("Error while disconnecting: {}", e);
                self.inner.dispatch(ClientEvent::ErrorOccurred(e.to_string()));
            }
        }
    }

    pub fn encrypt_message(&self, text: &str) -> String {
        self.inner.codec.encode(text)
    }

    pub fn decrypt_message(&self, line: &str) -> Option<String> {
        match self.inner.codec.decode(line) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Could not decrypt message: {}", e);
                None
            }
        }
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.slot().clone()
    }

    fn dispatch(&self, event: ClientEvent) {
        self.dispatcher.dispatch(event);
    }

    async fn connect(self: Arc<Self>, host: &str, port: u16) {
        if self.connecting.swap(true, Ordering::SeqCst) {
            self.dispatch(ClientEvent::ErrorOccurred(CONNECT_IN_PROGRESS.to_string()));
            return;
        }
        if self.current().is_some() {
            self.connecting.store(false, Ordering::SeqCst);
            self.dispatch(ClientEvent::ErrorOccurred(ALREADY_CONNECTED.to_string()));
            return;
        }

        match Connection::connect(host, port, self.codec.clone()).await {
            Ok(connection) => {
                let connection = Arc::new(connection);
                *self.slot() = Some(Arc::clone(&connection));
                self.connecting.store(false, Ordering::SeqCst);

                info!("Connected to {}:{} as {}", host, port, self.client_id);
                self.dispatch(ClientEvent::Connected);

                tokio::spawn(Arc::clone(&self).receive(connection));
            }
            Err(e) => {
                self.connecting.store(false, Ordering::SeqCst);
                warn!("Connection failed: {}", e);
                self.dispatch(ClientEvent::ErrorOccurred(e.to_string()));
            }
        }
    }

    async fn receive(self: Arc<Self>, connection: Arc<Connection>) {
        let outcome = connection
            .receive_loop(|message| {
                self.dispatch(ClientEvent::MessageReceived(message));
                std::future::ready(())
            })
            .await;

        match outcome {
            ReceiveOutcome::Shutdown => {}
            ReceiveOutcome::Closed => {
                if self.release(&connection).await {
                    info!("Server closed the connection");
                    self.dispatch(ClientEvent::Disconnected);
                }
            }
            ReceiveOutcome::Failed(e) => {
                if self.release(&connection).await {
                    warn!("Connection lost: {}", e);
                    self.dispatch(ClientEvent::ErrorOccurred(e.to_string()));
                }
            }
        }
    }

    /// Forgets `connection` and closes it. True if this call did the teardown.
    async fn release(&self, connection: &Arc<Connection>) -> bool {
        {
            let mut slot = self.slot();
            if slot
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, connection))
            {
                slot.take();
            }
        }

        match connection.close().await {
            Ok(transitioned) => transitioned,
            // Peer is already gone; the teardown still happened
            Err(_) => true,
        }
    }
}
