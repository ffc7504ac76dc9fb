//! Async relay client for KC868 controllers.
//!
//! This module provides the [`RelayClient`] struct, the primary interface for
//! controlling relays from async code, and its [`ClientConfig`].
//!
//! # Overview
//!
//! The client:
//! - Shares one [`Transport`] between every channel and every clone
//! - Builds a short-lived [`Connection`] per call
//! - Runs the blocking exchange on the tokio blocking pool, so the caller's
//!   executor is never stalled by socket I/O
//!
//! # Example
//!
//! ```no_run
//! use kc868_relay::{ClientConfig, RelayClient};
//!
//! # async fn demo() -> kc868_relay::Result<()> {
//! let client = RelayClient::new(ClientConfig::new("192.168.1.200"))?;
//!
//! client.ping().await?;
//! let channels = client.channel_count().await?;
//!
//! client.turn_on(3).await?;
//! println!("relay 3 on: {}", client.status(3).await?);
//! client.turn_off_all().await?;
//!
//! client.close().await?;
//! # let _ = channels;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! `RelayClient` is cheap to clone. All clones talk through the same socket;
//! concurrent calls are serialized by the transport lock in arrival order
//! of the lock, with no further fairness guarantee.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::Channel;
use crate::connection::{AckPolicy, Connection};
use crate::error::{RelayError, Result};
use crate::switch::{RelaySwitch, MAX_CHANNEL_COUNT};
use crate::transport::{
    Connector, TcpConnector, Transport, DEFAULT_PORT, DEFAULT_RECONNECT_BACKOFF,
    DEFAULT_TIMEOUT, READ_BUFFER_SIZE,
};

/// Channel count assumed when the device does not report one.
pub const DEFAULT_CHANNEL_COUNT: u8 = 32;

/// Configuration for creating a relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Controller hostname or IP address.
    pub host: String,
    /// Controller TCP port.
    pub port: u16,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Read/write timeout on the socket.
    pub io_timeout: Duration,
    /// Pause before reconnecting after the peer closed the connection.
    pub reconnect_backoff: Duration,
    /// Size of the single read that carries a reply.
    pub read_buffer_size: usize,
    /// Channel count used when the device does not report one.
    pub default_channel_count: u8,
    /// Treatment of missing on/off acknowledgements.
    pub ack_policy: AckPolicy,
}

impl ClientConfig {
    /// Creates a configuration for `host` with default settings.
    ///
    /// # Example
    ///
    /// ```
    /// use kc868_relay::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.200");
    /// assert_eq!(config.port, 4196);
    /// assert_eq!(config.default_channel_count, 32);
    /// ```
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            read_buffer_size: READ_BUFFER_SIZE,
            default_channel_count: DEFAULT_CHANNEL_COUNT,
            ack_policy: AckPolicy::default(),
        }
    }

    /// Sets a custom port (default is 4196).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connect timeout (default is 5 seconds).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the socket read/write timeout (default is 5 seconds).
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff (default is 1 second).
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Sets the reply buffer size (default is 1024 bytes).
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the fallback channel count (default is 32).
    pub fn with_default_channel_count(mut self, count: u8) -> Self {
        self.default_channel_count = count;
        self
    }

    /// Sets the on/off acknowledgement policy (default is strict).
    ///
    /// # Example
    ///
    /// ```
    /// use kc868_relay::{AckPolicy, ClientConfig};
    ///
    /// let config = ClientConfig::new("192.168.1.200").with_ack_policy(AckPolicy::Lenient);
    /// assert_eq!(config.ack_policy, AckPolicy::Lenient);
    /// ```
    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    /// Checks the settings that would make every call fail.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidParameter` for an empty host, zero
    /// timeouts, a zero buffer size or a zero default channel count.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RelayError::invalid_parameter("host", "must not be empty"));
        }
        if self.connect_timeout.is_zero() {
            return Err(RelayError::invalid_parameter(
                "connect_timeout",
                "must be greater than 0",
            ));
        }
        if self.io_timeout.is_zero() {
            return Err(RelayError::invalid_parameter(
                "io_timeout",
                "must be greater than 0",
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(RelayError::invalid_parameter(
                "read_buffer_size",
                "must be greater than 0",
            ));
        }
        if self.default_channel_count == 0 {
            return Err(RelayError::invalid_parameter(
                "default_channel_count",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Result of probing a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Controller host.
    pub host: String,
    /// Controller port.
    pub port: u16,
    /// Number of relay channels to expose.
    pub channel_count: u8,
    /// Whether `channel_count` was reported by the device.
    pub detected: bool,
}

/// Async client for one relay controller.
///
/// Every operation runs a blocking exchange on the tokio blocking pool and
/// must therefore be awaited inside a tokio runtime.
pub struct RelayClient<C: Connector = TcpConnector> {
    transport: Arc<Transport<C>>,
    host: String,
    port: u16,
    default_channel_count: u8,
    ack_policy: AckPolicy,
}

impl RelayClient {
    /// Creates a client for the controller described by `config`.
    ///
    /// No connection is made until the first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connector = TcpConnector::new(
            config.host.clone(),
            config.port,
            config.connect_timeout,
            config.io_timeout,
        );
        Ok(Self::from_transport(Transport::new(connector), &config))
    }
}

impl<C> RelayClient<C>
where
    C: Connector + 'static,
    C::Stream: 'static,
{
    /// Creates a client over an existing transport.
    ///
    /// The transport's own reconnect and buffer settings are replaced by
    /// those in `config`; `host` and `port` are used for identification only.
    pub fn from_transport(transport: Transport<C>, config: &ClientConfig) -> Self {
        let transport = transport
            .with_reconnect_backoff(config.reconnect_backoff)
            .with_read_buffer_size(config.read_buffer_size);
        Self {
            transport: Arc::new(transport),
            host: config.host.clone(),
            port: config.port,
            default_channel_count: config.default_channel_count.max(1),
            ack_policy: config.ack_policy,
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

    /// Returns the fallback channel count.
    pub fn default_channel_count(&self) -> u8 {
        self.default_channel_count
    }

    /// Returns whether [`close`](Self::close) has been called.
    ///
    /// Does not wait for an exchange in progress on another clone.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Switches relay `channel` on.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is 0, the exchange fails, or the
    /// device does not acknowledge under [`AckPolicy::Strict`].
    pub async fn turn_on(&self, channel: u8) -> Result<()> {
        let channel = Channel::index(channel)?;
        self.run(channel, |relay| relay.turn_on()).await
    }

    /// Switches relay `channel` off.
    ///
    /// # Errors
    ///
    /// Same as [`turn_on`](Self::turn_on).
    pub async fn turn_off(&self, channel: u8) -> Result<()> {
        let channel = Channel::index(channel)?;
        self.run(channel, |relay| relay.turn_off()).await
    }

    /// Switches every relay on.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or is not acknowledged.
    pub async fn turn_on_all(&self) -> Result<()> {
        self.run(Channel::All, |relay| relay.turn_on()).await
    }

    /// Switches every relay off.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or is not acknowledged.
    pub async fn turn_off_all(&self) -> Result<()> {
        self.run(Channel::All, |relay| relay.turn_off()).await
    }

    /// Reads the state of relay `channel`; `true` means on.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Parse` for a malformed reply and
    /// `RelayError::Connection` on transport failure.
    pub async fn status(&self, channel: u8) -> Result<bool> {
        let channel = Channel::index(channel)?;
        self.run(channel, |relay| relay.status()).await
    }

    /// Checks that the controller answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn ping(&self) -> Result<()> {
        self.run(Channel::Index(1), |relay| relay.ping()).await
    }

    /// Asks the controller for its relay count; `None` if it does not say.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn scan_channel_count(&self) -> Result<Option<u8>> {
        self.run(Channel::Index(1), |relay| relay.scan()).await
    }

    /// Returns the controller's relay count, or the configured default when
    /// the controller does not report one.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn channel_count(&self) -> Result<u8> {
        Ok(self
            .scan_channel_count()
            .await?
            .unwrap_or(self.default_channel_count))
    }

    /// Validates reachability and determines how many relays to expose.
    ///
    /// Tries the channel scan first. If the scan fails, falls back to a ping
    /// and the default channel count. Reported counts above
    /// [`MAX_CHANNEL_COUNT`] are clamped.
    ///
    /// # Errors
    ///
    /// Returns the ping error when neither the scan nor the ping succeeds.
    pub async fn probe(&self) -> Result<DeviceInfo> {
        let (channel_count, detected) = match self.scan_channel_count().await {
            Ok(Some(count)) => (count, true),
            Ok(None) => (self.default_channel_count, false),
            Err(e) => {
                warn!(host = %self.host, error = %e, "channel scan failed, falling back to ping");
                self.ping().await?;
                (self.default_channel_count, false)
            }
        };

        if channel_count > MAX_CHANNEL_COUNT {
            warn!(
                host = %self.host,
                reported = channel_count,
                "clamping channel count to {MAX_CHANNEL_COUNT}"
            );
        }

        let info = DeviceInfo {
            host: self.host.clone(),
            port: self.port,
            channel_count: channel_count.min(MAX_CHANNEL_COUNT),
            detected,
        };
        info!(host = %info.host, channels = info.channel_count, detected, "controller probed");
        Ok(info)
    }

    /// Builds one switch per relay, numbered `1..=count`.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is 0 or above [`MAX_CHANNEL_COUNT`].
    pub fn switches(&self, count: u8) -> Result<Vec<RelaySwitch<C>>> {
        if count == 0 || count > MAX_CHANNEL_COUNT {
            return Err(RelayError::invalid_parameter(
                "count",
                format!("must be 1-{MAX_CHANNEL_COUNT}"),
            ));
        }
        (1..=count)
            .map(|channel| RelaySwitch::new(self.clone(), channel))
            .collect()
    }

    /// Closes the socket and retires the client and all of its clones.
    ///
    /// Waits for an exchange in progress. Closing twice is harmless; every
    /// operation after close fails with `RelayError::Closed`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Worker` if the blocking task could not run.
    pub async fn close(&self) -> Result<()> {
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || transport.close())
            .await
            .map_err(|e| RelayError::Worker(e.to_string()))
    }

    async fn run<T, F>(&self, channel: Channel, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection<'_, C>) -> Result<T> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let ack_policy = self.ack_policy;
        tokio::task::spawn_blocking(move || {
            let connection = Connection::new(&*transport, channel).with_ack_policy(ack_policy);
            op(&connection)
        })
        .await
        .map_err(|e| RelayError::Worker(e.to_string()))?
    }
}

impl<C: Connector> Clone for RelayClient<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            host: self.host.clone(),
            port: self.port,
            default_channel_count: self.default_channel_count,
            ack_policy: self.ack_policy,
        }
    }
}

impl<C: Connector> std::fmt::Debug for RelayClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("default_channel_count", &self.default_channel_count)
            .field("ack_policy", &self.ack_policy)
            .finish()
    }
}
