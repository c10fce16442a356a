//! Protocol definitions for the UART text protocol.
//!
//! This module contains the pure protocol types including:
//! - Line framing and chunking
//! - Keywords
//! - Outbound commands
//! - Line and argument parsing

pub mod command;
pub mod frame;
pub mod keyword;
pub mod parser;

pub use command::Command;
pub use frame::{LINE_TERMINATOR, LineDecoder, MAX_LINE_LEN, UART_SAFE_SIZE, chunk, encode_line};
pub use keyword::Keyword;
pub use parser::{CLOCK_FORMAT, Line, parse_battery, parse_clock, parse_imu, parse_settings};
