//! Server network layer: TCP accept loop, per-session read tasks and fan-out

use crate::client::{ClientSession, SessionId};
use crate::client_manager::ClientRegistry;
use log::{debug, error, info, warn};
use shared::{
    ChatError, CipherCodec, CipherKey, Connection, Payload, ReceiveOutcome, DEFAULT_KEY,
    DEFAULT_PORT, DEFAULT_SERVER_HOST,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    /// Drop sessions that stay silent for this long
    pub idle_timeout: Option<Duration>,
    pub key: CipherKey,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: 64,
            idle_timeout: None,
            key: DEFAULT_KEY,
        }
    }
}

/// Stops a running `ChatServer` from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Relay server accepting encrypted line connections and fanning messages out
pub struct ChatServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    codec: CipherCodec,
    idle_timeout: Option<Duration>,
    next_session_id: SessionId,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ChatServer {
    pub async fn bind(config: ServerConfig) -> Result<Self, ChatError> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (shutdown_tx, _) = watch::channel(false);

        Ok(ChatServer {
            listener,
            local_addr,
            registry: Arc::new(ClientRegistry::new(config.max_clients)),
            codec: CipherCodec::new(config.key),
            idle_timeout: config.idle_timeout,
            next_session_id: 1,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Accepts connections until shut down, then closes every live session
    pub async fn run(mut self) -> Result<(), ChatError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Server started successfully");

        while !*shutdown_rx.borrow_and_update() {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("Connection established with {}", addr);
                            self.accept_session(stream).await;
                        }
                        Err(e) => {
                            // Usually descriptor exhaustion; back off so closing sessions can free some
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },
                _ = shutdown_rx.changed() => {},
            }
        }

        info!("Server shutting down");
        for session in self.registry.snapshot().await {
            if let Err(e) = session.connection().close().await {
                debug!("Error closing client {}: {}", session.id, e);
            }
        }

        Ok(())
    }

    async fn accept_session(&mut self, stream: TcpStream) {
        let connection = match Connection::from_stream(stream, self.codec.clone()) {
            Ok(connection) => connection.with_idle_timeout(self.idle_timeout),
            Err(e) => {
                warn!("Dropping connection that failed setup: {}", e);
                return;
            }
        };

        let id = self.next_session_id;
        self.next_session_id += 1;
        let session = Arc::new(ClientSession::new(id, Arc::new(connection)));

        if !self.registry.add(Arc::clone(&session)).await {
            warn!(
                "Rejecting {}: server full ({} clients)",
                session.addr,
                self.registry.max_clients()
            );
            if let Err(e) = session.connection().close().await {
                debug!("Error closing rejected client {}: {}", session.id, e);
            }
            return;
        }

        spawn_session(session, Arc::clone(&self.registry));
    }
}

/// Runs the read loop for one session and always cleans it up afterwards
fn spawn_session(session: Arc<ClientSession>, registry: Arc<ClientRegistry>) {
    tokio::spawn(async move {
        let reader = tokio::spawn(read_session(Arc::clone(&session), Arc::clone(&registry)));
        if let Err(e) = reader.await {
            error!("Client {} task failed: {}", session.id, e);
        }

        finish_session(&session, &registry).await;
    });
}

async fn read_session(session: Arc<ClientSession>, registry: Arc<ClientRegistry>) {
    let outcome = session
        .connection()
        .receive_loop(|message| relay_message(&session, &registry, message))
        .await;

    match outcome {
        ReceiveOutcome::Closed => debug!("Client {} closed the stream", session.id),
        ReceiveOutcome::Shutdown => debug!("Client {} closed by server", session.id),
        ReceiveOutcome::Failed(e) => warn!("Client {} dropped: {}", session.id, e),
    }
}

async fn finish_session(session: &ClientSession, registry: &ClientRegistry) {
    registry.remove(session.id).await;
    if let Err(e) = session.connection().close().await {
        debug!("Error closing client {}: {}", session.id, e);
    }
}

/// Handles one decoded line from `sender`
async fn relay_message(sender: &ClientSession, registry: &ClientRegistry, message: String) {
    let payload = Payload::parse(&message);

    match &payload {
        Payload::Envelope(envelope) => {
            sender.update_identity(envelope);
            debug!(
                "{} from {} (IP: {}, ID: {}, timestamp: {}): {}",
                envelope.verb,
                sender.id,
                envelope.sender_ip,
                envelope.sender_id,
                envelope.timestamp,
                envelope.text
            );
        }
        Payload::Opaque(text) => debug!("Message from {}: {}", sender.id, text),
    }

    let delivered = broadcast(registry, sender, &payload.relay_text()).await;
    debug!("Relayed message from {} to {} clients", sender.id, delivered);
}

/// Sends `text` to every registered session except `sender`
///
/// The message is encrypted once and written to each peer in turn. Returns
/// the number of peers that accepted the write. A peer whose write fails is
/// closed; its own task then removes it from the registry.
pub async fn broadcast(registry: &ClientRegistry, sender: &ClientSession, text: &str) -> usize {
    let peers = registry.snapshot_excluding(sender.id).await;
    if peers.is_empty() {
        return 0;
    }

    let line = sender.connection().codec().encode(text);
    let mut delivered = 0;

    for peer in peers {
        match peer.connection().send_encoded(&line).await {
            Ok(()) => delivered += 1,
            Err(ChatError::NotConnected) => {
                debug!("Skipping client {}: already disconnected", peer.id);
            }
            Err(e) => {
                warn!("Failed to relay to client {}: {}", peer.id, e);
                if let Err(e) = peer.connection().close().await {
                    debug!("Error closing client {}: {}", peer.id, e);
                }
            }
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    async fn start(config: ServerConfig) -> (SocketAddr, Arc<ClientRegistry>, ShutdownHandle) {
        let server = ChatServer::bind(config).await.unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        tokio::spawn(server.run());
        (addr, registry, shutdown)
    }

    async fn join(addr: SocketAddr) -> Arc<Connection> {
        let connection = Connection::connect("127.0.0.1", addr.port(), CipherCodec::default())
            .await
            .unwrap();
        Arc::new(connection)
    }

    async fn wait_for_clients(registry: &ClientRegistry, expected: usize) {
        timeout(WAIT, async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry never reached the expected size");
    }

    /// Session backed by a loopback socket, plus the peer end of that socket
    async fn loopback_session(id: SessionId) -> (Arc<ClientSession>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let connection = Connection::from_stream(accepted.unwrap().0, CipherCodec::default()).unwrap();
        (Arc::new(ClientSession::new(id, Arc::new(connection))), peer.unwrap())
    }

    async fn read_relayed(peer: TcpStream) -> String {
        let mut lines = BufReader::new(peer).lines();
        let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
        CipherCodec::default().decode(&line).unwrap()
    }

    async fn next_message(connection: &Connection) -> Option<String> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let receive = connection.receive_loop(|message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
            }
        });

        tokio::select! {
            message = rx.recv() => message,
            _ = receive => None,
            _ = tokio::time::sleep(Duration::from_millis(500)) => None,
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 12345);
        assert_eq!(config.addr(), "0.0.0.0:12345");
        assert!(config.idle_timeout.is_none());
        assert!(config.max_clients > 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..test_config()
        };

        let result = ChatServer::bind(config).await;
        assert!(matches!(result, Err(ChatError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_relay_reaches_peer_but_not_sender() {
        let (addr, registry, shutdown) = start(test_config()).await;
        let alice = join(addr).await;
        let bob = join(addr).await;
        wait_for_clients(&registry, 2).await;

        assert_ok!(alice.send_line("SendMessage,2023-10-15 10:00:00,10.0.0.5,alice,hi").await);

        assert_eq!(next_message(&bob).await.as_deref(), Some("hi"));

        // An echo of "hi" would already be buffered ahead of "ping"
        let carol = join(addr).await;
        wait_for_clients(&registry, 3).await;
        assert_ok!(carol.send_line("ping").await);
        assert_eq!(next_message(&alice).await.as_deref(), Some("ping"));

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_detailed_message_is_annotated() {
        let (addr, registry, shutdown) = start(test_config()).await;
        let alice = join(addr).await;
        let bob = join(addr).await;
        wait_for_clients(&registry, 2).await;

        alice
            .send_line("SendMessageWithDetails,2023-10-15 10:00:00,10.0.0.5,abc-123,hello, world")
            .await
            .unwrap();

        assert_eq!(
            next_message(&bob).await.as_deref(),
            Some("hello, world, 10.0.0.5, abc-123, 2023-10-15 10:00:00")
        );

        let sender = registry.snapshot().await.into_iter().next().unwrap();
        assert_eq!(sender.identity().sender_id.as_deref(), Some("abc-123"));

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_removes_session() {
        let (addr, registry, shutdown) = start(test_config()).await;
        let alice = join(addr).await;
        wait_for_clients(&registry, 1).await;

        alice.close().await.unwrap();
        wait_for_clients(&registry, 0).await;

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_server_full_rejects_connection() {
        let config = ServerConfig {
            max_clients: 1,
            ..test_config()
        };
        let (addr, registry, shutdown) = start(config).await;

        let _alice = join(addr).await;
        wait_for_clients(&registry, 1).await;

        let bob = join(addr).await;
        let outcome = timeout(WAIT, bob.receive_loop(|_| async {})).await.unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Closed | ReceiveOutcome::Failed(_)));
        assert_eq!(registry.len().await, 1);

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_idle_session_is_dropped() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..test_config()
        };
        let (addr, registry, shutdown) = start(config).await;

        let _alice = join(addr).await;
        wait_for_clients(&registry, 1).await;
        wait_for_clients(&registry, 0).await;

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let (addr, registry, shutdown) = start(test_config()).await;
        let alice = join(addr).await;
        wait_for_clients(&registry, 1).await;

        shutdown.shutdown();

        let outcome = timeout(WAIT, alice.receive_loop(|_| async {})).await.unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Closed | ReceiveOutcome::Failed(_)));
        wait_for_clients(&registry, 0).await;
    }

    #[tokio::test]
    async fn test_shutdown_completes_with_stalled_peer() {
        let server = ChatServer::bind(test_config()).await.unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        let run = tokio::spawn(server.run());

        let alice = join(addr).await;
        // Connected but never reads
        let _bob = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&registry, 2).await;

        let flood = {
            let alice = Arc::clone(&alice);
            tokio::spawn(async move {
                let text = "x".repeat(64 * 1024);
                while alice.send_line(&text).await.is_ok() {}
            })
        };

        // Give bob's buffers time to fill so the relay blocks writing to him
        tokio::time::sleep(Duration::from_millis(500)).await;

        shutdown.shutdown();

        let finished = timeout(WAIT, run).await;
        assert!(matches!(finished, Ok(Ok(Ok(())))));
        wait_for_clients(&registry, 0).await;

        flood.abort();
    }

    #[tokio::test]
    async fn test_broadcast_closes_peer_whose_write_fails() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (alice, _alice_peer) = loopback_session(1).await;
        let (bob, bob_peer) = loopback_session(2).await;
        let (carol, carol_peer) = loopback_session(3).await;
        for session in [&alice, &bob, &carol] {
            assert!(registry.add(Arc::clone(session)).await);
        }

        // Reset bob's end so the next write to him fails
        #[allow(deprecated)]
        bob_peer.set_linger(Some(Duration::ZERO)).unwrap();
        drop(bob_peer);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let delivered = broadcast(&registry, &alice, "hello").await;

        assert_eq!(delivered, 1);
        assert!(!bob.connection().is_connected());
        assert!(alice.connection().is_connected());
        assert_eq!(read_relayed(carol_peer).await, "hello");

        // Bob's own task sees the close and leaves the registry
        spawn_session(Arc::clone(&bob), Arc::clone(&registry));
        wait_for_clients(&registry, 2).await;
        assert!(!registry.contains(bob.id).await);
        assert!(registry.contains(alice.id).await);
        assert!(registry.contains(carol.id).await);
    }

    #[tokio::test]
    async fn test_broadcast_skips_peer_already_closed() {
        let registry = ClientRegistry::new(8);
        let (alice, _alice_peer) = loopback_session(1).await;
        let (bob, _bob_peer) = loopback_session(2).await;
        let (carol, carol_peer) = loopback_session(3).await;
        for session in [&alice, &bob, &carol] {
            assert!(registry.add(Arc::clone(session)).await);
        }

        // Closed, but its task has not removed it yet
        assert!(bob.connection().close().await.unwrap());

        let delivered = broadcast(&registry, &alice, "hello").await;

        assert_eq!(delivered, 1);
        assert!(registry.contains(bob.id).await);
        assert_eq!(read_relayed(carol_peer).await, "hello");
    }
}
