//! Line and argument parsing for the text protocol.
//!
//! A line is a colon-separated record:
//! ```text
//! time:12,30,00,19,10,26
//! └┬─┘ └───────┬───────┘
//! keyword   argument 0
//! ```
//! Multi-value arguments are comma-separated inside one field.

use chrono::NaiveDateTime;

use crate::error::DecodeError;
use crate::types::{ImuSample, Settings, Vector3};

/// Clock layout used by `time` and `alarm` replies.
pub const CLOCK_FORMAT: &str = "%H,%M,%S,%d,%m,%y";

/// One decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// First field of the line.
    pub keyword: String,
    /// Remaining fields.
    pub args: Vec<String>,
}

impl Line {
    /// Splits a line into keyword and arguments.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::EmptyLine` if the keyword is empty.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let mut fields = text.split(':');
        let keyword = fields.next().unwrap_or_default();
        if keyword.is_empty() {
            return Err(DecodeError::EmptyLine);
        }

        Ok(Self {
            keyword: keyword.to_owned(),
            args: fields.map(str::to_owned).collect(),
        })
    }

    /// Returns the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MissingArgument` if the line is too short.
    pub fn arg(&self, index: usize) -> Result<&str, DecodeError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| DecodeError::MissingArgument {
                keyword: self.keyword.clone(),
                index,
            })
    }

    /// Returns the value handed to a waiter on this keyword.
    #[must_use]
    pub fn value(&self) -> Option<String> {
        self.args.first().cloned()
    }
}

fn split_fields(value: &str, expected: usize) -> Result<Vec<&str>, DecodeError> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    if fields.len() != expected {
        return Err(DecodeError::FieldCount {
            expected,
            got: fields.len(),
        });
    }
    Ok(fields)
}

fn parse_int<T: std::str::FromStr>(value: &str) -> Result<T, DecodeError> {
    value
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidInteger {
            value: value.to_owned(),
        })
}

fn parse_float(value: &str) -> Result<f64, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidFloat {
        value: value.to_owned(),
    })
}

/// Parses a battery level.
pub fn parse_battery(value: &str) -> Result<u8, DecodeError> {
    parse_int(value)
}

/// Parses a clock in `H,M,S,d,m,y` layout.
pub fn parse_clock(value: &str) -> Result<NaiveDateTime, DecodeError> {
    NaiveDateTime::parse_from_str(value.trim(), CLOCK_FORMAT).map_err(|_| {
        DecodeError::InvalidClock {
            value: value.to_owned(),
        }
    })
}

/// Parses an `ax,ay,az,gx,gy,gz` motion sample.
pub fn parse_imu(value: &str) -> Result<ImuSample, DecodeError> {
    let fields = split_fields(value, 6)?;
    let mut numbers = [0.0; 6];
    for (slot, field) in numbers.iter_mut().zip(&fields) {
        *slot = parse_float(field)?;
    }

    Ok(ImuSample {
        acceleration: Vector3::new(numbers[0], numbers[1], numbers[2]),
        gyro: Vector3::new(numbers[3], numbers[4], numbers[5]),
    })
}

/// Parses an `a,b` settings tuple.
pub fn parse_settings(value: &str) -> Result<Settings, DecodeError> {
    let fields = split_fields(value, 2)?;
    Ok(Settings(parse_int(fields[0])?, parse_int(fields[1])?))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_parse_line() {
        let line = Line::parse("battery:87").unwrap();
        assert_eq!(line.keyword, "battery");
        assert_eq!(line.args, vec!["87".to_owned()]);
        assert_eq!(line.value(), Some("87".to_owned()));
    }

    #[test]
    fn test_parse_line_without_args() {
        let line = Line::parse("ping").unwrap();
        assert_eq!(line.keyword, "ping");
        assert!(line.args.is_empty());
        assert_eq!(line.value(), None);
        assert_eq!(
            line.arg(0),
            Err(DecodeError::MissingArgument {
                keyword: "ping".into(),
                index: 0
            })
        );
    }

    #[test]
    fn test_parse_empty_line() {
        assert_eq!(Line::parse(""), Err(DecodeError::EmptyLine));
        assert_eq!(Line::parse(":87"), Err(DecodeError::EmptyLine));
    }

    #[test]
    fn test_parse_battery() {
        assert_eq!(parse_battery("87"), Ok(87));
        assert!(parse_battery("high").is_err());
        assert!(parse_battery("300").is_err());
    }

    #[test]
    fn test_parse_clock() {
        let clock = parse_clock("12,30,05,19,10,26").unwrap();
        assert_eq!(clock.hour(), 12);
        assert_eq!(clock.minute(), 30);
        assert_eq!(clock.second(), 5);
        assert_eq!(clock.day(), 19);
        assert_eq!(clock.month(), 10);
        assert_eq!(clock.year(), 2026);

        assert!(parse_clock("12:30").is_err());
        assert!(parse_clock("25,00,00,01,01,26").is_err());
    }

    #[test]
    fn test_parse_imu() {
        let sample = parse_imu("0.5,-1.0,9.81,10,20,-30.5").unwrap();
        assert_eq!(sample.acceleration, Vector3::new(0.5, -1.0, 9.81));
        assert_eq!(sample.gyro, Vector3::new(10.0, 20.0, -30.5));

        assert_eq!(
            parse_imu("1,2,3"),
            Err(DecodeError::FieldCount {
                expected: 6,
                got: 3
            })
        );
        assert!(parse_imu("1,2,3,4,5,x").is_err());
    }

    #[test]
    fn test_parse_settings() {
        assert_eq!(parse_settings("3,15"), Ok(Settings(3, 15)));
        assert!(parse_settings("3").is_err());
        assert!(parse_settings("a,b").is_err());
    }
}
