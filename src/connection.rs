//! Per-channel protocol operations.
//!
//! A [`Connection`] binds one [`Channel`] to the shared [`Transport`]. Each
//! operation builds its [`RelayCommand`], sends it, and parses the reply while
//! holding the transport lock, so the exchange cannot interleave with
//! another channel's traffic on the socket.
//!
//! Connections are cheap, borrow the transport, and hold no relay state.
//!
//! # Example
//!
//! ```no_run
//! use kc868_relay::{Channel, Connection, TcpConnector, Transport, DEFAULT_PORT, DEFAULT_TIMEOUT};
//!
//! let transport = Transport::new(TcpConnector::new(
//!     "192.168.1.200",
//!     DEFAULT_PORT,
//!     DEFAULT_TIMEOUT,
//!     DEFAULT_TIMEOUT,
//! ));
//!
//! let relay = Connection::new(&transport, Channel::index(3)?);
//! relay.turn_on()?;
//! assert!(relay.status()?);
//! # Ok::<(), kc868_relay::RelayError>(())
//! ```

use tracing::{debug, warn};

use crate::channel::Channel;
use crate::command::RelayCommand;
use crate::error::Result;
use crate::response::RelayResponse;
use crate::transport::{Connector, TcpConnector, Transport};

/// How a missing or mismatched on/off acknowledgement is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AckPolicy {
    /// Fail with `RelayError::Parse`, like a malformed status reply.
    #[default]
    Strict,
    /// Log a warning and report success; the next status poll reveals the
    /// real relay state.
    Lenient,
}

/// Protocol operations for one channel over a shared transport.
#[derive(Debug)]
pub struct Connection<'a, C: Connector = TcpConnector> {
    transport: &'a Transport<C>,
    channel: Channel,
    ack_policy: AckPolicy,
}

impl<'a, C: Connector> Connection<'a, C> {
    /// Binds `channel` to `transport` with the strict acknowledgement policy.
    pub fn new(transport: &'a Transport<C>, channel: Channel) -> Self {
        Self {
            transport,
            channel,
            ack_policy: AckPolicy::default(),
        }
    }

    /// Sets the acknowledgement policy for [`turn_on`](Self::turn_on) and
    /// [`turn_off`](Self::turn_off).
    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    /// Returns the channel this connection addresses.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Switches the relay (or every relay, for [`Channel::All`]) on.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Connection` on transport failure, and
    /// `RelayError::Parse` if the device does not acknowledge the change
    /// under [`AckPolicy::Strict`].
    pub fn turn_on(&self) -> Result<()> {
        self.set(true)
    }

    /// Switches the relay (or every relay, for [`Channel::All`]) off.
    ///
    /// # Errors
    ///
    /// Same as [`turn_on`](Self::turn_on).
    pub fn turn_off(&self) -> Result<()> {
        self.set(false)
    }

    /// Reads the current relay state; `true` means on.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidParameter` for [`Channel::All`] (nothing
    /// is sent), `RelayError::Connection` on transport failure, and
    /// `RelayError::Parse` if the reply is not a read reply for this relay.
    pub fn status(&self) -> Result<bool> {
        let command = RelayCommand::read(self.channel)?;
        self.exchange(command, RelayResponse::to_status)
    }

    /// Sends the connectivity test. Any reply counts as success.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Connection` on transport failure.
    pub fn ping(&self) -> Result<()> {
        self.exchange(RelayCommand::Test, RelayResponse::check_ack)
    }

    /// Asks the device for its relay count.
    ///
    /// Returns `Ok(None)` when the device answers without a usable count.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Connection` on transport failure.
    pub fn scan(&self) -> Result<Option<u8>> {
        self.exchange(RelayCommand::Scan, |response| {
            Ok(response.to_channel_count())
        })
    }

    fn set(&self, on: bool) -> Result<()> {
        let command = RelayCommand::set(self.channel, on)?;
        self.exchange(command, |response| match response.check_ack() {
            Ok(()) => Ok(()),
            Err(e) if self.ack_policy == AckPolicy::Lenient => {
                warn!(
                    channel = %self.channel,
                    response = %response.raw,
                    "Unexpected turn {} response",
                    if on { "on" } else { "off" }
                );
                debug!(error = %e, "acknowledgement ignored");
                Ok(())
            }
            Err(e) => Err(e),
        })
    }

    /// Runs one command/reply exchange and parses the reply, all under the
    /// transport lock.
    ///
    /// A reply that fails to parse drops the stream: the rest of it may
    /// still be unread and would be taken as the answer to the next command.
    fn exchange<T>(
        &self,
        command: RelayCommand,
        parse: impl FnOnce(&RelayResponse) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.transport.lock();
        let raw = guard.call(&command.to_string())?;
        let response = RelayResponse::new(command, raw);
        debug!(channel = %self.channel, request = %command, response = %response.raw, "relay exchange");
        let parsed = parse(&response);
        if parsed.is_err() {
            guard.disconnect();
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::transport::testing::{Plan, ScriptedConnector};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn transport(replies: &[&str]) -> (ScriptedConnector, Transport<ScriptedConnector>) {
        let connector = ScriptedConnector::new([Plan::replying(replies)]);
        let transport =
            Transport::new(connector.clone()).with_reconnect_backoff(Duration::ZERO);
        (connector, transport)
    }

    #[test]
    fn test_turn_on_sends_exact_command() {
        let replies: Vec<String> = (1..=32).map(|i| format!("RELAY-SET-255,{i},1,OK")).collect();
        let replies: Vec<&str> = replies.iter().map(String::as_str).collect();
        let (connector, transport) = transport(&replies);

        for i in 1..=32u8 {
            Connection::new(&transport, Channel::Index(i))
                .turn_on()
                .unwrap();
        }

        let expected: Vec<String> = (1..=32).map(|i| format!("RELAY-SET-255,{i},1")).collect();
        assert_eq!(connector.sent(), expected);
    }

    #[test]
    fn test_turn_off() {
        let (connector, transport) = transport(&["RELAY-SET-255,4,0,OK"]);
        Connection::new(&transport, Channel::Index(4))
            .turn_off()
            .unwrap();
        assert_eq!(connector.sent(), vec!["RELAY-SET-255,4,0"]);
    }

    #[test]
    fn test_turn_on_all() {
        let (connector, transport) = transport(&["RELAY-SET_ALL-255,255,OK", "RELAY-SET_ALL-255,0,OK"]);
        let all = Connection::new(&transport, Channel::All);
        all.turn_on().unwrap();
        all.turn_off().unwrap();
        assert_eq!(
            connector.sent(),
            vec!["RELAY-SET_ALL-255,255", "RELAY-SET_ALL-255,0"]
        );
    }

    #[test]
    fn test_strict_ack_mismatch_fails() {
        let (_, transport) = transport(&["RELAY-SET-255,2,0,OK"]);
        let err = Connection::new(&transport, Channel::Index(2))
            .turn_on()
            .unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    #[traced_test]
    fn test_lenient_ack_mismatch_warns() {
        let (_, transport) = transport(&["ERROR"]);
        Connection::new(&transport, Channel::Index(2))
            .with_ack_policy(AckPolicy::Lenient)
            .turn_on()
            .unwrap();
        assert!(logs_contain("Unexpected turn on response"));
    }

    #[test]
    fn test_lenient_still_surfaces_connection_errors() {
        let connector = ScriptedConnector::new([Plan::Refuse]);
        let transport = Transport::new(connector);
        let err = Connection::new(&transport, Channel::Index(2))
            .with_ack_policy(AckPolicy::Lenient)
            .turn_on()
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_status() {
        let (connector, transport) = transport(&["RELAY-READ-255,7,1,OK", "RELAY-READ-255,7,0,OK"]);
        let relay = Connection::new(&transport, Channel::Index(7));
        assert!(relay.status().unwrap());
        assert!(!relay.status().unwrap());
        assert_eq!(connector.sent(), vec!["RELAY-READ-255,7", "RELAY-READ-255,7"]);
    }

    #[test]
    fn test_status_malformed_is_parse_error() {
        let (_, transport) = transport(&["RELAY-READ-255,7,?,OK"]);
        let err = Connection::new(&transport, Channel::Index(7))
            .status()
            .unwrap_err();
        assert!(matches!(err, RelayError::Parse { .. }));
    }

    #[test]
    fn test_unchecked_index_zero_never_sent() {
        let (connector, transport) = transport(&["RELAY-SET-255,0,1,OK"]);
        let relay = Connection::new(&transport, Channel::Index(0));

        let err = relay.turn_on().unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameter { .. }));
        let err = relay.status().unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameter { .. }));
        assert_eq!(connector.connects(), 0);
        assert!(connector.sent().is_empty());
    }

    #[test]
    fn test_parse_failure_resynchronizes_stream() {
        // The first stream delivers a status reply split in two reads.
        let connector = ScriptedConnector::new([
            Plan::replying(&["RELAY-READ-255,", "7,1,OK"]),
            Plan::replying(&["RELAY-READ-255,7,0,OK"]),
        ]);
        let transport = Transport::new(connector.clone()).with_reconnect_backoff(Duration::ZERO);
        let relay = Connection::new(&transport, Channel::Index(7));

        assert!(relay.status().unwrap_err().is_parse());
        assert!(!transport.is_connected());

        assert!(!relay.status().unwrap());
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_status_all_rejected_locally() {
        let (connector, transport) = transport(&[]);
        let err = Connection::new(&transport, Channel::All).status().unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameter { .. }));
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn test_ping_accepts_any_reply() {
        let (connector, transport) = transport(&["hello"]);
        Connection::new(&transport, Channel::Index(1)).ping().unwrap();
        assert_eq!(connector.sent(), vec!["RELAY-TEST-NOW"]);
    }

    #[test]
    fn test_scan() {
        let (connector, transport) = transport(&["RELAY-SCAN_DEVICE-CHANNEL_8,OK", "nope"]);
        let relay = Connection::new(&transport, Channel::Index(1));
        assert_eq!(relay.scan().unwrap(), Some(8));
        assert_eq!(relay.scan().unwrap(), None);
        assert_eq!(
            connector.sent(),
            vec!["RELAY-SCAN_DEVICE-NOW", "RELAY-SCAN_DEVICE-NOW"]
        );
    }
}
