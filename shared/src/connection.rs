//! Full-duplex encrypted line stream over a TCP socket
//!
//! Used on both sides of the relay: the client dials with `connect`, the server
//! wraps accepted sockets with `from_stream`. A connection has one receive loop
//! and any number of concurrent writers; writes are serialized through a mutex
//! so frames never interleave on the wire.

use log::{debug, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::codec::CipherCodec;
use crate::error::{ChatError, DecodeError};

/// Longest encoded line accepted from a peer, excluding the newline
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Why a receive loop stopped
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// The peer ended the stream
    Closed,
    /// `close()` was called locally
    Shutdown,
    /// Transport failure or idle timeout
    Failed(ChatError),
}

pub struct Connection {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    codec: CipherCodec,
    idle_timeout: Option<Duration>,
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    /// Opens a TCP connection to `host:port`
    pub async fn connect(host: &str, port: u16, codec: CipherCodec) -> Result<Self, ChatError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ChatError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;

        let connection = Self::from_stream(stream, codec)?;
        info!("Connected to {}", connection.peer_addr);
        Ok(connection)
    }

    /// Wraps an already established socket, e.g. one returned by `accept`
    pub fn from_stream(stream: TcpStream, codec: CipherCodec) -> Result<Self, ChatError> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        // Chat lines are tiny; don't let Nagle hold them back
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (close_tx, _) = watch::channel(false);

        Ok(Self {
            peer_addr,
            local_addr,
            codec,
            idle_timeout: None,
            reader: Mutex::new(Some(BufReader::new(read_half))),
            writer: Mutex::new(Some(write_half)),
            connected: AtomicBool::new(true),
            close_tx,
        })
    }

    /// Ends the receive loop with `ChatError::IdleTimeout` when nothing arrives in time
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn codec(&self) -> &CipherCodec {
        &self.codec
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Encrypts `plaintext` and writes it as one frame
    pub async fn send_line(&self, plaintext: &str) -> Result<(), ChatError> {
        let line = self.codec.encode(plaintext);
        self.send_encoded(&line).await
    }

    /// Writes an already encoded frame. Lets a broadcast encrypt once for all peers.
    ///
    /// A write stuck behind a peer that stopped reading is abandoned with
    /// `NotConnected` as soon as `close` is called.
    pub async fn send_encoded(&self, line: &str) -> Result<(), ChatError> {
        let mut closed = self.close_tx.subscribe();
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        let write = async {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(ChatError::NotConnected)?;
            writer.write_all(&frame).await.map_err(ChatError::Send)?;
            writer.flush().await.map_err(ChatError::Send)
        };

        tokio::select! {
            result = write => result,
            _ = closed.changed() => Err(ChatError::NotConnected),
        }
    }

    /// Reads frames until the stream ends, the transport fails or `close` is called
    ///
    /// Every successfully decoded line is handed to `on_message`, which is
    /// awaited before the next line is read so per-connection ordering holds.
    /// Frames that fail to decode or exceed `MAX_FRAME_LEN` are logged and
    /// skipped. If the returned future is dropped early the reader is handed
    /// back, so a later loop can resume; a partially read frame is lost.
    pub async fn receive_loop<F, Fut>(&self, mut on_message: F) -> ReceiveOutcome
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut closed = self.close_tx.subscribe();
        let Some(taken) = self.reader.lock().await.take() else {
            if *closed.borrow() {
                return ReceiveOutcome::Shutdown;
            }
            return ReceiveOutcome::Failed(ChatError::ReceiverBusy);
        };
        let mut lease = ReaderLease {
            connection: self,
            reader: None,
        };
        let reader = lease.reader.insert(taken);

        if *closed.borrow() {
            return ReceiveOutcome::Shutdown;
        }

        let mut buffer = Vec::new();
        let mut oversized = false;
        loop {
            buffer.clear();

            let idle = async {
                match self.idle_timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let read = tokio::select! {
                result = read_frame(reader, &mut buffer) => result,
                _ = closed.changed() => return ReceiveOutcome::Shutdown,
                _ = idle => {
                    let timeout = self.idle_timeout.unwrap_or_default();
                    return ReceiveOutcome::Failed(ChatError::IdleTimeout(timeout));
                }
            };

            match read {
                Ok(0) => {
                    debug!("{} ended the stream", self.peer_addr);
                    return ReceiveOutcome::Closed;
                }
                Ok(_) if buffer.len() > MAX_FRAME_LEN && buffer.last() != Some(&b'\n') => {
                    if !oversized {
                        warn!("Skipping oversized frame from {}", self.peer_addr);
                    }
                    oversized = true;
                }
                // Tail of an oversized frame
                Ok(_) if oversized => oversized = false,
                Ok(_) => match self.decode_frame(&buffer) {
                    Ok(message) => on_message(message).await,
                    Err(e) => warn!("Skipping malformed frame from {}: {}", self.peer_addr, e),
                },
                Err(e) => return ReceiveOutcome::Failed(ChatError::Transport(e)),
            }
        }
    }

    fn decode_frame(&self, raw: &[u8]) -> Result<String, DecodeError> {
        let line = String::from_utf8(raw.to_vec())?;
        self.codec.decode(&line)
    }

    /// Moves the connection to `Disconnected` and releases the socket
    ///
    /// Only the first call performs the teardown and returns `Ok(true)` (or the
    /// error hit while shutting the write half down). Later or concurrent calls
    /// return `Ok(false)`.
    pub async fn close(&self) -> Result<bool, ChatError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        self.close_tx.send_replace(true);

        // Present whenever no receive loop holds it
        drop(self.reader.lock().await.take());

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }

        debug!("Closed connection with {}", self.peer_addr);
        Ok(true)
    }
}

/// Reads one line, stopping after `MAX_FRAME_LEN + 1` bytes without a newline
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    buffer: &mut Vec<u8>,
) -> std::io::Result<usize> {
    reader
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', buffer)
        .await
}

/// Reader checked out by a running receive loop
struct ReaderLease<'a> {
    connection: &'a Connection,
    reader: Option<BufReader<OwnedReadHalf>>,
}

impl Drop for ReaderLease<'_> {
    fn drop(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        // `close` takes the slot after clearing `connected`, so a closed
        // connection never gets its reader back
        if let Ok(mut slot) = self.connection.reader.try_lock() {
            if self.connection.is_connected() {
                *slot = Some(reader);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish()
    }
}
