//! Polled on/off switches, one per relay channel.
//!
//! A [`RelaySwitch`] keeps the caller-side view of one relay: its last known
//! state and whether the controller is currently reachable. The relay client
//! itself caches nothing; a switch refreshes its view by polling.
//!
//! | Event | `is_on` | `available` | Returns |
//! |-------|---------|-------------|---------|
//! | `update` succeeds | relay state | `true` | — |
//! | `update` fails | unchanged | `false` | — (error is logged) |
//! | `turn_on`/`turn_off` succeeds | requested state | `true` | `Ok` |
//! | `turn_on`/`turn_off` fails | unchanged | `false` | `Err` |

use tracing::error;

use crate::channel::Channel;
use crate::client::RelayClient;
use crate::error::Result;
use crate::transport::{Connector, TcpConnector};

/// Largest number of switches exposed for one controller.
pub const MAX_CHANNEL_COUNT: u8 = 32;

/// Caller-side state of one relay channel.
pub struct RelaySwitch<C: Connector = TcpConnector> {
    client: RelayClient<C>,
    channel: u8,
    name: String,
    unique_id: String,
    is_on: bool,
    available: bool,
}

impl<C> RelaySwitch<C>
where
    C: Connector + 'static,
    C::Stream: 'static,
{
    /// Creates a switch for relay `channel`, initially off and available.
    ///
    /// # Errors
    ///
    /// Returns an error if `channel` is 0.
    pub fn new(client: RelayClient<C>, channel: u8) -> Result<Self> {
        Channel::index(channel)?;
        Ok(Self {
            name: format!("Relay {channel}"),
            unique_id: format!("{}-relay-{channel}", client.host()),
            client,
            channel,
            is_on: false,
            available: true,
        })
    }

    /// Relay index.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Display name, `Relay <n>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable identifier, `<host>-relay-<n>`.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Last known relay state.
    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Whether the last exchange with the controller succeeded.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Polls the relay state. Failures mark the switch unavailable.
    pub async fn update(&mut self) {
        match self.client.status(self.channel).await {
            Ok(is_on) => {
                self.is_on = is_on;
                self.available = true;
            }
            Err(e) => {
                error!(
                    channel = self.channel,
                    host = %self.client.host(),
                    error = %e,
                    "Failed to poll relay"
                );
                self.available = false;
            }
        }
    }

    /// Switches the relay on.
    ///
    /// # Errors
    ///
    /// Returns the client error after marking the switch unavailable.
    pub async fn turn_on(&mut self) -> Result<()> {
        let result = self.client.turn_on(self.channel).await;
        self.apply(result, true)
    }

    /// Switches the relay off.
    ///
    /// # Errors
    ///
    /// Returns the client error after marking the switch unavailable.
    pub async fn turn_off(&mut self) -> Result<()> {
        let result = self.client.turn_off(self.channel).await;
        self.apply(result, false)
    }

    fn apply(&mut self, result: Result<()>, on: bool) -> Result<()> {
        match result {
            Ok(()) => {
                self.is_on = on;
                self.available = true;
                Ok(())
            }
            Err(e) => {
                self.available = false;
                Err(e)
            }
        }
    }
}

impl<C: Connector> std::fmt::Debug for RelaySwitch<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySwitch")
            .field("unique_id", &self.unique_id)
            .field("is_on", &self.is_on)
            .field("available", &self.available)
            .finish()
    }
}
