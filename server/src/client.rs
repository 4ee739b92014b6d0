use chrono::NaiveDateTime;
use shared::{Connection, MessageEnvelope};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type SessionId = u64;

/// What the peer last told us about itself through an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub sender_ip: Option<String>,
    pub sender_id: Option<String>,
    /// Raw envelope timestamp
    pub last_seen: Option<String>,
    pub last_seen_at: Option<NaiveDateTime>,
}

// Server-side representation of one accepted connection
#[derive(Debug)]
pub struct ClientSession {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    connection: Arc<Connection>,
    identity: Mutex<SessionIdentity>,
}

impl ClientSession {
    pub fn new(id: SessionId, connection: Arc<Connection>) -> Self {
        ClientSession {
            id,
            addr: connection.peer_addr(),
            connected_at: Instant::now(),
            connection,
            identity: Mutex::new(SessionIdentity::default()),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn identity(&self) -> SessionIdentity {
        self.identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // Refresh identity from the metadata carried by an envelope
    pub fn update_identity(&self, envelope: &MessageEnvelope) {
        let mut identity = self
            .identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        identity.sender_ip = Some(envelope.sender_ip.clone());
        identity.sender_id = Some(envelope.sender_id.clone());
        identity.last_seen = Some(envelope.timestamp.clone());
        identity.last_seen_at = envelope.parsed_timestamp();
    }

    // Label used in log lines
    pub fn display_name(&self) -> String {
        match self.identity().sender_id {
            Some(sender_id) => format!("{} ({})", self.id, sender_id),
            None => format!("{} ({})", self.id, self.addr),
        }
    }
}
