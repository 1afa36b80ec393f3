//! Channel-pool setup between exactly two parties.
//!
//! The pool holds `num_threads + 1` channels; channel 0 is reserved for the
//! base-OT handshake and control traffic so it never interleaves with
//! extension transfers. Immediately after a raw stream connects, the client
//! sends a 4-byte little-endian slot index; the server reads it before doing
//! anything else with the connection, so accept order does not matter.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channel::TcpChannel;
use crate::config::Role;

pub const DEFAULT_PORT: u16 = 7766;

/// Bounded, non-exponential client retry policy.
const RETRY_CONNECT: usize = 50;
const RETRY_DELAY: Duration = Duration::from_millis(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("could not resolve {address}:{port}")]
    Resolve { address: String, port: u16 },
    #[error("bind/listen on {addr} failed: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
    #[error("accept failed: {source}")]
    Accept { source: io::Error },
    #[error("server not available at {addr} after {attempts} connect attempts")]
    RetriesExhausted { addr: SocketAddr, attempts: usize },
    #[error("thread-id handshake failed: {source}")]
    Handshake { source: io::Error },
    #[error("socket setup failed: {source}")]
    Socket {
        #[from]
        source: io::Error,
    },
}

/// Established channels, indexed by worker-thread id.
pub struct ChannelPool {
    channels: Vec<TcpChannel>,
}

impl ChannelPool {
    fn new(channels: Vec<TcpChannel>) -> Self {
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut TcpChannel> {
        self.channels.get_mut(i)
    }

    /// Splits off the control channel (slot 0) from the worker channels.
    /// Returns `None` after `close_all`.
    pub fn split_control(&mut self) -> Option<(&mut TcpChannel, &mut [TcpChannel])> {
        self.channels.split_first_mut()
    }

    /// Closes every channel. Idempotent; also runs implicitly on drop.
    pub fn close_all(&mut self) {
        self.channels.clear();
    }
}

/// Capability for establishing the channel pool, with one variant per role.
/// Both variants share only configuration data.
pub enum ConnectionManager {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl ConnectionManager {
    pub fn new(role: Role, address: impl Into<String>, port: u16, num_threads: usize) -> Self {
        let address = address.into();
        match role {
            Role::Sender => ConnectionManager::Server(ServerConnection {
                address,
                port,
                num_threads,
            }),
            Role::Receiver => ConnectionManager::Client(ClientConnection {
                address,
                port,
                num_threads,
            }),
        }
    }

    /// Blocks until all `num_threads + 1` channels are established or a
    /// fatal error / retry exhaustion occurs. No partial pool is ever
    /// returned.
    pub fn setup(&self) -> Result<ChannelPool, ConnectionError> {
        match self {
            ConnectionManager::Server(s) => s.setup_connection(),
            ConnectionManager::Client(c) => c.setup_connection(),
        }
    }
}

pub struct ServerConnection {
    address: String,
    port: u16,
    num_threads: usize,
}

impl ServerConnection {
    fn setup_connection(&self) -> Result<ChannelPool, ConnectionError> {
        let n = self.num_threads + 1;
        let addr = resolve(&self.address, self.port)?;
        debug!(%addr, channels = n, "listening for channel pool");

        let listener = TcpListener::bind(addr)
            .map_err(|source| ConnectionError::Listen { addr, source })?;

        let mut slots: Vec<Option<TcpChannel>> = (0..n).map(|_| None).collect();
        let mut filled = 0;
        while filled < n {
            let (mut stream, peer) = listener
                .accept()
                .map_err(|source| ConnectionError::Accept { source })?;

            // The thread id is the first thing sent on every connection.
            let mut id_bytes = [0u8; 4];
            if let Err(err) = stream.read_exact(&mut id_bytes) {
                warn!(%peer, %err, "dropping connection without thread-id handshake");
                continue;
            }
            let id = u32::from_le_bytes(id_bytes) as usize;

            // Out-of-range or duplicate ids are rejected and do not count
            // against the pool; accepting keeps going.
            if id >= n {
                warn!(%peer, id, "rejecting out-of-range thread id");
                continue;
            }
            if slots[id].is_some() {
                warn!(%peer, id, "rejecting duplicate thread id");
                continue;
            }

            slots[id] = Some(TcpChannel::from_stream(stream)?);
            filled += 1;
            debug!(%peer, id, filled, "channel accepted");
        }

        let channels = slots.into_iter().flatten().collect();
        Ok(ChannelPool::new(channels))
    }
}

pub struct ClientConnection {
    address: String,
    port: u16,
    num_threads: usize,
}

impl ClientConnection {
    fn setup_connection(&self) -> Result<ChannelPool, ConnectionError> {
        let n = self.num_threads + 1;
        let addr = resolve(&self.address, self.port)?;
        debug!(%addr, channels = n, "connecting channel pool");

        let mut slots: Vec<Option<TcpChannel>> = (0..n).map(|_| None).collect();
        // Slot 0 connects last; success is only reported once it is up.
        for k in (0..n).rev() {
            let mut stream = self.connect_slot(addr, k)?;
            stream
                .write_all(&(k as u32).to_le_bytes())
                .map_err(|source| ConnectionError::Handshake { source })?;
            slots[k] = Some(TcpChannel::from_stream(stream)?);
            debug!(slot = k, "channel connected");
        }

        let channels = slots.into_iter().flatten().collect();
        Ok(ChannelPool::new(channels))
    }

    fn connect_slot(&self, addr: SocketAddr, slot: usize) -> Result<TcpStream, ConnectionError> {
        for attempt in 0..RETRY_CONNECT {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    if attempt + 1 == RETRY_CONNECT {
                        warn!(%addr, slot, %err, "connect retries exhausted");
                        return Err(ConnectionError::RetriesExhausted {
                            addr,
                            attempts: RETRY_CONNECT,
                        });
                    }
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
    (address, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConnectionError::Resolve {
            address: address.to_string(),
            port,
        })
}
