//! Keywords of the line protocol.
//!
//! The keyword is the first colon-separated field of every line and
//! selects how the rest of the line is interpreted.

use std::fmt;

/// Known protocol keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// Liveness probe sent by the peripheral.
    Ping,
    /// Answer to a ping.
    Pong,
    /// Battery level request and response.
    Battery,
    /// Firmware version request and response.
    Firmware,
    /// Clock request.
    GetTime,
    /// Clock response.
    Time,
    /// Motion sensor request and response.
    ImuData,
    /// Settings request and response.
    GetSettings,
    /// Settings write and its acknowledgement.
    SetSettings,
    /// Alarm time response.
    Alarm,
}

impl Keyword {
    /// Looks up a keyword by its wire text.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "battery" => Some(Self::Battery),
            "firmware" => Some(Self::Firmware),
            "gettime" => Some(Self::GetTime),
            "time" => Some(Self::Time),
            "imudata" => Some(Self::ImuData),
            "getsettings" => Some(Self::GetSettings),
            "setsettings" => Some(Self::SetSettings),
            "alarm" => Some(Self::Alarm),
            _ => None,
        }
    }

    /// Returns the wire text of the keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Battery => "battery",
            Self::Firmware => "firmware",
            Self::GetTime => "gettime",
            Self::Time => "time",
            Self::ImuData => "imudata",
            Self::GetSettings => "getsettings",
            Self::SetSettings => "setsettings",
            Self::Alarm => "alarm",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
