//! # KC868 Relay Library
//!
//! A Rust library for switching the relay outputs of Kincony KC868 network
//! I/O controllers over their plain-text TCP protocol.
//!
//! All relay channels of a controller share one TCP socket. The library
//! serializes every command/reply exchange on that socket, reconnects
//! transparently once when the controller has dropped the connection, and
//! exposes an async API that keeps blocking socket I/O off the caller's
//! executor.
//!
//! ## Features
//!
//! - **One socket per controller** - any number of channels, strictly serialized
//! - **Bounded recovery** - one reconnect-and-retry on a closed peer, never a loop
//! - **Type-safe commands** - a closed command set, no "unknown operation" at runtime
//! - **Distinct failures** - connectivity errors vs. malformed replies
//! - **Async façade** - blocking exchanges run on the tokio blocking pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use kc868_relay::{ClientConfig, RelayClient};
//!
//! #[tokio::main]
//! async fn main() -> kc868_relay::Result<()> {
//!     let client = RelayClient::new(ClientConfig::new("192.168.1.200"))?;
//!
//!     // Learn how many relays the controller has (falls back to 32)
//!     let info = client.probe().await?;
//!     println!("{} relays", info.channel_count);
//!
//!     client.turn_on(3).await?;
//!     assert!(client.status(3).await?);
//!     client.turn_off(3).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! | Operation | Command | Reply |
//! |-----------|---------|-------|
//! | Relay `i` on/off | `RELAY-SET-255,i,1` / `RELAY-SET-255,i,0` | `RELAY-SET-255,i,b,OK` |
//! | All on/off | `RELAY-SET_ALL-255,255` / `RELAY-SET_ALL-255,0` | `RELAY-SET_ALL-255,m,OK` |
//! | Read relay `i` | `RELAY-READ-255,i` | `RELAY-READ-255,i,b,OK` |
//! | Test | `RELAY-TEST-NOW` | anything |
//! | Scan | `RELAY-SCAN_DEVICE-NOW` | `RELAY-SCAN_DEVICE-CHANNEL_n,OK` |
//!
//! ## Blocking Use
//!
//! The protocol layer is synchronous and can be used without a runtime:
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
//! Connection::new(&transport, Channel::All).turn_off()?;
//! # Ok::<(), kc868_relay::RelayError>(())
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! use kc868_relay::{ClientConfig, RelayClient, RelayError};
//!
//! # async fn demo() -> kc868_relay::Result<()> {
//! let client = RelayClient::new(ClientConfig::new("192.168.1.200"))?;
//!
//! match client.status(1).await {
//!     Ok(on) => println!("relay 1 is {}", if on { "on" } else { "off" }),
//!     Err(RelayError::Connection { reason, .. }) => println!("unreachable: {reason}"),
//!     Err(RelayError::Parse { reply, .. }) => println!("bad reply: {reply}"),
//!     Err(e) => println!("error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The library emits [`tracing`] events (`debug` per exchange, `info` on
//! reconnect and close, `warn`/`error` on degraded paths) and never installs
//! a subscriber.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod channel;
mod client;
mod command;
mod connection;
mod error;
mod response;
mod switch;
mod transport;

// Public re-exports
pub use channel::Channel;
pub use client::{ClientConfig, DeviceInfo, RelayClient, DEFAULT_CHANNEL_COUNT};
pub use command::{RelayCommand, KCODE};
pub use connection::{AckPolicy, Connection};
pub use error::{RelayError, Result};
pub use response::RelayResponse;
pub use switch::{RelaySwitch, MAX_CHANNEL_COUNT};
pub use transport::{
    Connector, TcpConnector, Transport, TransportGuard, DEFAULT_PORT, DEFAULT_RECONNECT_BACKOFF,
    DEFAULT_TIMEOUT, MAX_SEND_ATTEMPTS, READ_BUFFER_SIZE,
};
