//! Channel identity.
//!
//! A [`ChannelNumber`] is the opaque, stable key under which all per-channel
//! state lives. It doubles as the name of the channel's transcode folder, so
//! construction rejects anything that could escape that folder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Stable key for a channel (e.g. `"7"` or `"104.1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelNumber(String);

impl ChannelNumber {
    /// Validate and wrap a channel number.
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(Error::Validation("channel number is empty".into()));
        }

        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid || trimmed.starts_with('.') {
            return Err(Error::Validation(format!(
                "invalid channel number: {trimmed}"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the channel number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelNumber {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChannelNumber {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelNumber> for String {
    fn from(channel: ChannelNumber) -> Self {
        channel.0
    }
}

impl AsRef<str> for ChannelNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
