//! Relay channel addressing for the KC868 protocol.
//!
//! This module defines the [`Channel`] enum which identifies the relay output
//! a command applies to. A channel is either a single 1-based relay index or
//! the [`Channel::All`] sentinel that addresses every output at once.
//!
//! | Channel | Wire form | Turn on/off | Status read |
//! |---------|-----------|:-----------:|:-----------:|
//! | `Index(n)` | `n` (1-255) | ✓ | ✓ |
//! | `All` | `SET_ALL` command | ✓ | ✗ |
//!
//! # Example
//!
//! ```
//! use kc868_relay::Channel;
//!
//! let ch = Channel::index(3).unwrap();
//! assert_eq!(ch.to_string(), "3");
//! assert!(ch.supports_status());
//!
//! assert!(!Channel::All.supports_status());
//! assert!(Channel::index(0).is_err());
//! ```

use std::fmt;

use crate::error::{RelayError, Result};

/// A relay output on the controller.
///
/// Channels carry no state of their own: the on/off state of a relay is
/// always read fresh from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A single relay, numbered from 1.
    Index(u8),
    /// Every relay on the controller.
    All,
}

impl Channel {
    /// Creates a channel for a single relay index.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is 0 (relays are numbered from 1).
    pub fn index(index: u8) -> Result<Self> {
        if index == 0 {
            return Err(RelayError::invalid_parameter(
                "channel",
                "relay channels are numbered from 1",
            ));
        }
        Ok(Self::Index(index))
    }

    /// Returns the relay index, or `None` for [`Channel::All`].
    pub fn number(self) -> Option<u8> {
        match self {
            Channel::Index(index) => Some(index),
            Channel::All => None,
        }
    }

    /// Returns whether the device can report the state of this channel.
    pub fn supports_status(self) -> bool {
        matches!(self, Channel::Index(_))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Index(index) => write!(f, "{index}"),
            Channel::All => f.write_str("all"),
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = RelayError;

    fn try_from(index: u8) -> Result<Self> {
        Channel::index(index)
    }
}
