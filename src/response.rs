//! KC868 reply parsing and validation.
//!
//! Replies are single ASCII lines matched against a grammar chosen by the
//! command that produced them. Matching is anchored at the start of the
//! reply; anything after the final `OK` is ignored.
//!
//! | Command | Expected reply |
//! |---------|----------------|
//! | `RELAY-SET-255,i,b` | `RELAY-SET-255,i,b,OK` |
//! | `RELAY-SET_ALL-255,m` | `RELAY-SET_ALL-255,m,OK` |
//! | `RELAY-READ-255,i` | `RELAY-READ-255,i,b,OK` with `b` in `{0,1}` |
//! | `RELAY-SCAN_DEVICE-NOW` | `RELAY-SCAN_DEVICE-CHANNEL_n,OK` |
//! | `RELAY-TEST-NOW` | anything |
//!
//! # Example
//!
//! ```
//! use kc868_relay::{RelayCommand, RelayResponse};
//!
//! let cmd = RelayCommand::Read { index: 4 };
//! let response = RelayResponse::new(cmd, "RELAY-READ-255,4,1,OK");
//! assert_eq!(response.to_status().unwrap(), true);
//!
//! let response = RelayResponse::new(RelayCommand::Scan, "RELAY-SCAN_DEVICE-CHANNEL_8,OK");
//! assert_eq!(response.to_channel_count(), Some(8));
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::command::{RelayCommand, ALL_ON_MASK, KCODE};
use crate::error::{RelayError, Result};

static SET_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^RELAY-SET-(\d+),(\d+),(\d+),OK").expect("set reply pattern is valid")
});

static SET_ALL_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^RELAY-SET_ALL-(\d+),(\d+),OK").expect("set-all reply pattern is valid")
});

static READ_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^RELAY-READ-(\d+),(\d+),([01]),OK").expect("read reply pattern is valid")
});

static SCAN_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^RELAY-SCAN_DEVICE-CHANNEL_(\d+),OK").expect("scan reply pattern is valid")
});

/// A reply paired with the command that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    /// Command that was sent.
    pub command: RelayCommand,
    /// Reply text as received (trailing whitespace removed).
    pub raw: String,
}

impl RelayResponse {
    /// Pairs a raw reply with its command.
    pub fn new(command: RelayCommand, raw: impl Into<String>) -> Self {
        Self {
            command,
            raw: raw.into(),
        }
    }

    /// Validates that the reply acknowledges a set command.
    ///
    /// The acknowledgement must echo the kcode, the relay (or mask) and the
    /// requested state. [`RelayCommand::Test`] accepts any reply.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Parse` if the reply does not acknowledge the
    /// command, or if the command is a read or scan (which carry data and
    /// are validated by [`to_status`](Self::to_status) and
    /// [`to_channel_count`](Self::to_channel_count)).
    ///
    /// # Example
    ///
    /// ```
    /// use kc868_relay::{RelayCommand, RelayResponse};
    ///
    /// let cmd = RelayCommand::Set { index: 2, on: true };
    /// assert!(RelayResponse::new(cmd, "RELAY-SET-255,2,1,OK").check_ack().is_ok());
    /// assert!(RelayResponse::new(cmd, "RELAY-SET-255,2,0,OK").check_ack().is_err());
    /// ```
    pub fn check_ack(&self) -> Result<()> {
        let acknowledged = match self.command {
            RelayCommand::Set { index, on } => SET_REPLY.captures(&self.raw).is_some_and(|caps| {
                number(&caps[1]) == Some(u32::from(KCODE))
                    && number(&caps[2]) == Some(u32::from(index))
                    && number(&caps[3]) == Some(u32::from(on))
            }),
            RelayCommand::SetAll { on } => {
                let mask = if on { ALL_ON_MASK } else { 0 };
                SET_ALL_REPLY.captures(&self.raw).is_some_and(|caps| {
                    number(&caps[1]) == Some(u32::from(KCODE))
                        && number(&caps[2]) == Some(u32::from(mask))
                })
            }
            RelayCommand::Test => true,
            RelayCommand::Read { .. } | RelayCommand::Scan => false,
        };

        if acknowledged {
            Ok(())
        } else {
            Err(self.parse_error())
        }
    }

    /// Extracts the relay state from a read reply.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Parse` if the reply is not a well-formed read
    /// reply for the same kcode and relay, or if the command was not a read.
    pub fn to_status(&self) -> Result<bool> {
        let RelayCommand::Read { index } = self.command else {
            return Err(self.parse_error());
        };

        let caps = READ_REPLY
            .captures(&self.raw)
            .ok_or_else(|| self.parse_error())?;

        if number(&caps[1]) != Some(u32::from(KCODE)) || number(&caps[2]) != Some(u32::from(index))
        {
            return Err(self.parse_error());
        }

        Ok(&caps[3] == "1")
    }

    /// Extracts the channel count from a scan reply.
    ///
    /// Returns `None` when the device did not report a usable count; a
    /// count of 0 or one beyond the addressable range counts as unreported.
    pub fn to_channel_count(&self) -> Option<u8> {
        if self.command != RelayCommand::Scan {
            return None;
        }
        let caps = SCAN_REPLY.captures(&self.raw)?;
        caps[1].parse::<u8>().ok().filter(|&count| count > 0)
    }

    fn parse_error(&self) -> RelayError {
        RelayError::parse(self.command.to_string(), self.raw.clone())
    }
}

fn number(digits: &str) -> Option<u32> {
    digits.parse().ok()
}
