//! Outbound commands of the line protocol.
//!
//! Each command encodes to a single line without its terminator; the
//! framer appends the terminator and chunks the result.

use crate::protocol::Keyword;
use crate::types::Settings;

/// Commands sent to the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Answer to a peripheral ping.
    Pong,
    /// Request the battery level.
    GetBattery,
    /// Request the firmware version.
    GetFirmware,
    /// Request the peripheral clock, answered by `time`.
    GetTime,
    /// Request one motion sensor sample.
    GetImuData,
    /// Request the settings tuple.
    GetSettings,
    /// Write the settings tuple, acknowledged by `setsettings:ok`.
    SetSettings(Settings),
    /// Any other line, sent verbatim.
    Raw(String),
}

impl Command {
    /// Returns the keyword this command is sent with.
    ///
    /// Raw commands have no known keyword.
    #[must_use]
    pub const fn keyword(&self) -> Option<Keyword> {
        match self {
            Self::Pong => Some(Keyword::Pong),
            Self::GetBattery => Some(Keyword::Battery),
            Self::GetFirmware => Some(Keyword::Firmware),
            Self::GetTime => Some(Keyword::GetTime),
            Self::GetImuData => Some(Keyword::ImuData),
            Self::GetSettings => Some(Keyword::GetSettings),
            Self::SetSettings(_) => Some(Keyword::SetSettings),
            Self::Raw(_) => None,
        }
    }

    /// Returns the keyword the peripheral answers this command with.
    ///
    /// For raw commands this is the first field of the line.
    #[must_use]
    pub fn response_keyword(&self) -> &str {
        match self {
            Self::GetTime => Keyword::Time.as_str(),
            Self::Raw(line) => line.split(':').next().unwrap_or_default(),
            other => other.keyword().map_or("", Keyword::as_str),
        }
    }

    /// Encodes the command as a line without terminator.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::SetSettings(settings) => {
                format!("{}:{},{}", Keyword::SetSettings, settings.0, settings.1)
            }
            Self::Raw(line) => line.clone(),
            other => other.keyword().map_or_else(String::new, |k| k.as_str().to_owned()),
        }
    }
}
