//! KC868 relay commands and their wire representation.
//!
//! Every command is a short ASCII line without terminator. The fixed device
//! tag [`KCODE`] (255) is embedded in all relay commands.
//!
//! | Command | Wire string |
//! |---------|-------------|
//! | Set relay `i` on / off | `RELAY-SET-255,i,1` / `RELAY-SET-255,i,0` |
//! | Set all on / off | `RELAY-SET_ALL-255,255` / `RELAY-SET_ALL-255,0` |
//! | Read relay `i` | `RELAY-READ-255,i` |
//! | Connectivity test | `RELAY-TEST-NOW` |
//! | Channel scan | `RELAY-SCAN_DEVICE-NOW` |
//!
//! # Example
//!
//! ```
//! use kc868_relay::{Channel, RelayCommand};
//!
//! let cmd = RelayCommand::set(Channel::Index(3), true)?;
//! assert_eq!(cmd.to_string(), "RELAY-SET-255,3,1");
//!
//! let cmd = RelayCommand::set(Channel::All, false)?;
//! assert_eq!(cmd.to_string(), "RELAY-SET_ALL-255,0");
//!
//! assert!(RelayCommand::set(Channel::Index(0), true).is_err());
//! # Ok::<(), kc868_relay::RelayError>(())
//! ```

use std::fmt;

use crate::channel::Channel;
use crate::error::{RelayError, Result};

/// Device protocol tag included in every relay command.
pub const KCODE: u8 = 255;

/// Bitmask sent with `SET_ALL` to switch every relay on.
pub(crate) const ALL_ON_MASK: u8 = 255;

/// A command from the fixed KC868 relay vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    /// Switch one relay on or off.
    Set {
        /// Relay index.
        index: u8,
        /// Requested state.
        on: bool,
    },
    /// Switch every relay on or off.
    SetAll {
        /// Requested state.
        on: bool,
    },
    /// Read the state of one relay.
    Read {
        /// Relay index.
        index: u8,
    },
    /// Connectivity test.
    Test,
    /// Ask the device how many relay channels it has.
    Scan,
}

impl RelayCommand {
    /// Creates the set command for a channel.
    ///
    /// # Errors
    ///
    /// Returns an error for relay index 0.
    pub fn set(channel: Channel, on: bool) -> Result<Self> {
        match channel {
            Channel::Index(index) => {
                Channel::index(index)?;
                Ok(RelayCommand::Set { index, on })
            }
            Channel::All => Ok(RelayCommand::SetAll { on }),
        }
    }

    /// Creates the status read command for a channel.
    ///
    /// # Errors
    ///
    /// Returns an error for relay index 0, and for [`Channel::All`]: the
    /// device only reports individual relays.
    pub fn read(channel: Channel) -> Result<Self> {
        match channel {
            Channel::Index(index) => {
                Channel::index(index)?;
                Ok(RelayCommand::Read { index })
            }
            Channel::All => Err(RelayError::invalid_parameter(
                "channel",
                "status can only be read for a single relay",
            )),
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RelayCommand::Set { index, on } => {
                write!(f, "RELAY-SET-{KCODE},{index},{}", u8::from(on))
            }
            RelayCommand::SetAll { on } => {
                let mask = if on { ALL_ON_MASK } else { 0 };
                write!(f, "RELAY-SET_ALL-{KCODE},{mask}")
            }
            RelayCommand::Read { index } => write!(f, "RELAY-READ-{KCODE},{index}"),
            RelayCommand::Test => f.write_str("RELAY-TEST-NOW"),
            RelayCommand::Scan => f.write_str("RELAY-SCAN_DEVICE-NOW"),
        }
    }
}
