//! TCP transport layer for KC868 communication.
//!
//! This module provides the [`Transport`] struct which owns the single
//! stream to a relay controller. The transport layer only knows about
//! sockets and text lines; command grammar lives in the protocol layer.
//!
//! # Design
//!
//! - **One stream, one peer** - every channel shares the same socket
//! - **Serialized** - the stream is reachable only through a [`TransportGuard`],
//!   so a full command/reply exchange is atomic
//! - **Lazy** - the stream is opened on the first call and reopened after failures
//! - **Bounded recovery** - a send that hits a closed peer is retried once on a
//!   fresh connection; every other failure is surfaced immediately
//! - **Terminal close** - after [`Transport::close`] every call fails with
//!   [`RelayError::Closed`]
//!
//! # Constants
//!
//! - [`DEFAULT_PORT`] - Default controller TCP port (4196)
//! - [`DEFAULT_TIMEOUT`] - Default connect and I/O timeout (5 seconds)
//! - [`DEFAULT_RECONNECT_BACKOFF`] - Pause before the reconnect attempt (1 second)
//! - [`READ_BUFFER_SIZE`] - Size of the single read that carries a reply (1024 bytes)
//!
//! # Example
//!
//! ```no_run
//! use kc868_relay::{TcpConnector, Transport, DEFAULT_TIMEOUT};
//!
//! let transport = Transport::new(TcpConnector::new(
//!     "192.168.1.200",
//!     4196,
//!     DEFAULT_TIMEOUT,
//!     DEFAULT_TIMEOUT,
//! ));
//!
//! let reply = transport.lock().call("RELAY-TEST-NOW")?;
//! println!("{reply}");
//! # Ok::<(), kc868_relay::RelayError>(())
//! ```

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{RelayError, Result};

/// Default controller TCP port.
pub const DEFAULT_PORT: u16 = 4196;

/// Default timeout for connecting and for each socket read/write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between dropping a dead stream and reconnecting.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Size of the buffer for the single read that carries one reply.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Total send attempts for one exchange: the first try plus one reconnect.
pub const MAX_SEND_ATTEMPTS: usize = 2;

/// Opens streams to the controller.
///
/// [`TcpConnector`] is the production implementation. Tests plug in
/// connectors producing in-memory streams.
pub trait Connector: Send + Sync {
    /// Stream type produced by this connector.
    type Stream: Read + Write + Send;

    /// Opens a new stream to the peer.
    fn connect(&self) -> io::Result<Self::Stream>;

    /// Human readable peer address, used in logs and errors.
    fn peer(&self) -> &str;
}

/// Connects to a controller over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    peer: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    ///
    /// # Arguments
    ///
    /// * `host` - Hostname or IP address of the controller
    /// * `port` - TCP port (usually [`DEFAULT_PORT`])
    /// * `connect_timeout` - Bound on each connection attempt
    /// * `io_timeout` - Read/write timeout applied to the stream
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        let host = host.into();
        let peer = format!("{host}:{port}");
        Self {
            host,
            port,
            peer,
            connect_timeout,
            io_timeout,
        }
    }

    /// Returns the controller host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the controller port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_error = None;

        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", self.peer),
            )
        }))
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

struct State<S> {
    stream: Option<S>,
}

/// Shared, self-healing command channel to one controller.
///
/// All relay channels multiplex this one stream. Callers obtain a
/// [`TransportGuard`] through [`lock`](Transport::lock) and perform their
/// whole exchange while holding it.
pub struct Transport<C: Connector = TcpConnector> {
    connector: C,
    reconnect_backoff: Duration,
    read_buffer_size: usize,
    state: Mutex<State<C::Stream>>,
    closed: AtomicBool,
}

impl<C: Connector> Transport<C> {
    /// Creates a transport. No connection is made until the first call.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            read_buffer_size: READ_BUFFER_SIZE,
            state: Mutex::new(State { stream: None }),
            closed: AtomicBool::new(false),
        }
    }

    /// Sets the pause before the single reconnect attempt (default 1 second).
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Sets the reply read buffer size (default 1024 bytes).
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Acquires exclusive use of the stream.
    ///
    /// Blocks until any exchange in progress on another thread completes.
    pub fn lock(&self) -> TransportGuard<'_, C> {
        TransportGuard {
            transport: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Closes the stream and retires the transport.
    ///
    /// Waits for an exchange in progress, then drops the stream. Calling
    /// `close` again is a no-op.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.stream = None;
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(peer = %self.connector.peer(), "transport closed");
        }
    }

    /// Returns whether a stream is currently open.
    ///
    /// Never waits for the lock: while another thread holds a
    /// [`TransportGuard`], the exchange in progress counts as connected.
    pub fn is_connected(&self) -> bool {
        match self.state.try_lock() {
            Ok(state) => state.stream.is_some(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().stream.is_some(),
            Err(TryLockError::WouldBlock) => true,
        }
    }

    /// Returns whether the transport has been closed. Never blocks.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the connector used to open streams.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> std::fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.connector.peer())
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("read_buffer_size", &self.read_buffer_size)
            .finish()
    }
}

/// Exclusive access to the transport stream for one exchange.
///
/// Dropping the guard releases the transport for other channels.
pub struct TransportGuard<'a, C: Connector> {
    transport: &'a Transport<C>,
    state: MutexGuard<'a, State<C::Stream>>,
}

impl<C: Connector> TransportGuard<'_, C> {
    /// Sends a command and returns the reply text.
    ///
    /// Connects first if needed. If the send fails because the peer closed
    /// the connection, the stream is replaced and the exchange is retried
    /// once after the reconnect backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The transport has been closed (`RelayError::Closed`)
    /// - The connection cannot be established (`RelayError::Connection`)
    /// - The send fails again after the reconnect, or fails for a reason
    ///   other than a closed peer (`RelayError::Connection`)
    /// - The reply cannot be read (`RelayError::Connection`)
    pub fn call(&mut self, command: &str) -> Result<String> {
        // `close` flips the flag while holding the lock, so no stream can be
        // opened after it.
        if self.transport.is_closed() {
            return Err(RelayError::Closed);
        }

        let transport = self.transport;
        let peer = transport.connector.peer();
        let mut attempt = 1;
        loop {
            let stream = self.ensure_connected()?;
            let sent = stream
                .write_all(command.as_bytes())
                .and_then(|()| stream.flush());

            match sent {
                Ok(()) => break,
                Err(e) if is_peer_closed(&e) && attempt < MAX_SEND_ATTEMPTS => {
                    info!(peer = %peer, error = %e, "peer closed the connection, reconnecting");
                    self.disconnect();
                    thread::sleep(transport.reconnect_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    self.disconnect();
                    return Err(RelayError::connection(
                        format!("socket send error on {peer}"),
                        e,
                    ));
                }
            }
        }

        let reply = self.read_reply();
        if reply.is_err() {
            self.disconnect();
        }
        let reply = reply
            .map_err(|e| RelayError::connection(format!("socket read error on {peer}"), e))?;

        debug!(peer = %peer, request = %command, response = %reply, "exchange complete");
        Ok(reply)
    }

    /// Returns whether a stream is currently open.
    pub fn is_connected(&self) -> bool {
        self.state.stream.is_some()
    }

    fn ensure_connected(&mut self) -> Result<&mut C::Stream> {
        let stream = match self.state.stream.take() {
            Some(stream) => stream,
            None => {
                let transport = self.transport;
                let connector = &transport.connector;
                let stream = connector.connect().map_err(|e| {
                    RelayError::connection(format!("cannot connect to {}", connector.peer()), e)
                })?;
                debug!(peer = %connector.peer(), "connected");
                stream
            }
        };
        Ok(self.state.stream.insert(stream))
    }

    fn read_reply(&mut self) -> io::Result<String> {
        let Some(stream) = self.state.stream.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let mut buffer = vec![0u8; self.transport.read_buffer_size];
        let size = loop {
            match stream.read(&mut buffer) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };

        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            ));
        }

        Ok(decode_reply(&buffer[..size]))
    }

    /// Drops the stream so the next call starts on a fresh connection.
    ///
    /// Used when a reply cannot be trusted and unread bytes may still be
    /// in flight.
    pub fn disconnect(&mut self) {
        self.state.stream = None;
    }
}

/// Errors meaning the peer has gone away and a fresh connection may succeed.
fn is_peer_closed(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

fn decode_reply(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::testing::{Plan, ScriptedConnector};
    use super::*;

    fn transport(connector: &ScriptedConnector) -> Transport<ScriptedConnector> {
        Transport::new(connector.clone()).with_reconnect_backoff(Duration::ZERO)
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_PORT, 4196);
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(5));
        assert_eq!(DEFAULT_RECONNECT_BACKOFF, Duration::from_secs(1));
        assert_eq!(READ_BUFFER_SIZE, 1024);
        assert_eq!(MAX_SEND_ATTEMPTS, 2);
    }

    #[test]
    fn test_connects_lazily_and_reuses_stream() {
        let connector = ScriptedConnector::new([Plan::replying(&["one", "two"])]);
        let transport = transport(&connector);
        assert!(!transport.is_connected());
        assert_eq!(connector.connects(), 0);

        assert_eq!(transport.lock().call("A").unwrap(), "one");
        assert_eq!(transport.lock().call("B").unwrap(), "two");
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.sent(), vec!["A", "B"]);
        assert!(transport.is_connected());
    }

    #[test]
    fn test_broken_pipe_reconnects_once() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::BrokenPipe),
            Plan::replying(&["RELAY-TEST-NOW,OK"]),
        ]);
        let transport = transport(&connector);

        let reply = transport.lock().call("RELAY-TEST-NOW").unwrap();
        assert_eq!(reply, "RELAY-TEST-NOW,OK");
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.sent(), vec!["RELAY-TEST-NOW"]);
    }

    #[test]
    fn test_second_broken_pipe_is_not_retried() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::BrokenPipe),
            Plan::failing_write(io::ErrorKind::BrokenPipe),
            Plan::replying(&["never used"]),
        ]);
        let transport = transport(&connector);

        let err = transport.lock().call("RELAY-TEST-NOW").unwrap_err();
        assert!(err.is_connection());
        assert_eq!(connector.connects(), 2);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_connection_reset_counts_as_peer_closed() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::ConnectionReset),
            Plan::replying(&["ok"]),
        ]);
        let transport = transport(&connector);

        assert_eq!(transport.lock().call("X").unwrap(), "ok");
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_connection_aborted_counts_as_peer_closed() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::ConnectionAborted),
            Plan::replying(&["ok"]),
        ]);
        let transport = transport(&connector);

        assert_eq!(transport.lock().call("X").unwrap(), "ok");
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.sent(), vec!["X"]);
    }

    #[test]
    fn test_not_connected_counts_as_peer_closed() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::NotConnected),
            Plan::replying(&["ok"]),
        ]);
        let transport = transport(&connector);

        assert_eq!(transport.lock().call("X").unwrap(), "ok");
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.sent(), vec!["X"]);
    }

    #[test]
    fn test_reconnect_refused_after_broken_pipe() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::BrokenPipe),
            Plan::Refuse,
        ]);
        let transport = transport(&connector);

        let err = transport.lock().call("X").unwrap_err();
        assert!(err.is_connection());
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_connect_failure_is_not_retried() {
        let connector = ScriptedConnector::new([Plan::Refuse, Plan::replying(&["ok"])]);
        let transport = transport(&connector);

        let err = transport.lock().call("X").unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("cannot connect"));
        assert_eq!(connector.connects(), 1);

        // The caller may retry.
        assert_eq!(transport.lock().call("X").unwrap(), "ok");
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_other_send_errors_are_not_retried() {
        let connector = ScriptedConnector::new([
            Plan::failing_write(io::ErrorKind::TimedOut),
            Plan::replying(&["ok"]),
        ]);
        let transport = transport(&connector);

        let err = transport.lock().call("X").unwrap_err();
        assert!(err.is_connection());
        assert_eq!(connector.connects(), 1);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_read_error_drops_stream() {
        let connector = ScriptedConnector::new([
            Plan::failing_read(io::ErrorKind::TimedOut),
            Plan::replying(&["ok"]),
        ]);
        let transport = transport(&connector);

        let err = transport.lock().call("X").unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("read error"));
        assert_eq!(connector.connects(), 1);
        assert!(!transport.is_connected());

        assert_eq!(transport.lock().call("X").unwrap(), "ok");
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_eof_is_a_read_error() {
        let connector = ScriptedConnector::new([Plan::replying(&[])]);
        let transport = transport(&connector);

        let err = transport.lock().call("X").unwrap_err();
        assert!(err.is_connection());
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_reply_is_trimmed() {
        let connector = ScriptedConnector::new([Plan::replying(&["RELAY-READ-255,1,1,OK\r\n\0"])]);
        let transport = transport(&connector);

        assert_eq!(transport.lock().call("X").unwrap(), "RELAY-READ-255,1,1,OK");
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let connector = ScriptedConnector::new([Plan::replying(&["ok"]), Plan::replying(&["ok"])]);
        let transport = transport(&connector);

        assert_eq!(transport.lock().call("X").unwrap(), "ok");
        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(!transport.is_connected());

        let err = transport.lock().call("X").unwrap_err();
        assert!(matches!(err, RelayError::Closed));
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn test_state_queries_do_not_wait_for_lock() {
        let connector = ScriptedConnector::new([Plan::replying(&["ok"])]);
        let transport = transport(&connector);

        // Same thread: a blocking query would deadlock here.
        let mut guard = transport.lock();
        assert!(!transport.is_closed());
        assert!(transport.is_connected());
        assert_eq!(guard.call("X").unwrap(), "ok");
        drop(guard);

        assert!(transport.is_connected());
        transport.close();
        let _guard = transport.lock();
        assert!(transport.is_closed());
    }

    #[test]
    fn test_disconnect_forces_fresh_stream() {
        let connector = ScriptedConnector::new([Plan::replying(&["one", "stale"]), Plan::replying(&["two"])]);
        let transport = transport(&connector);

        let mut guard = transport.lock();
        assert_eq!(guard.call("A").unwrap(), "one");
        guard.disconnect();
        assert!(!guard.is_connected());
        assert_eq!(guard.call("B").unwrap(), "two");
        drop(guard);
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_tcp_connector_peer() {
        let connector = TcpConnector::new("10.0.0.5", DEFAULT_PORT, DEFAULT_TIMEOUT, DEFAULT_TIMEOUT);
        assert_eq!(connector.peer(), "10.0.0.5:4196");
        assert_eq!(connector.host(), "10.0.0.5");
        assert_eq!(connector.port(), 4196);
    }

    #[test]
    fn test_transport_debug() {
        let connector = TcpConnector::new("127.0.0.1", DEFAULT_PORT, DEFAULT_TIMEOUT, DEFAULT_TIMEOUT);
        let transport = Transport::new(connector);
        let debug_str = format!("{:?}", transport);
        assert!(debug_str.contains("Transport"));
        assert!(debug_str.contains("127.0.0.1:4196"));
    }
}
