//! Wire protocol
//!
//! Implements the framed serial protocol spoken by the knitting machine
//! controller: SLIP byte-stuffed frames carrying single-token messages,
//! with a CRC-8/Maxim checksum on state-changing commands.

pub mod framing;
pub mod serial;
pub mod token;
pub mod transport;
mod error;

pub use error::ProtocolError;
pub use framing::{crc8_maxim, slip_encode, SlipDecoder};
pub use token::{Message, Token};
pub use transport::{PortSpec, SerialTransport, TcpTransport, Transport};

use std::time::Duration;

/// Fixed baud rate of the controller link
pub const BAUD_RATE: u32 = 115_200;

/// Bounded read timeout used by every poll iteration
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Lowest firmware API version this host can drive
pub const FIRST_SUPPORTED_API_VERSION: u8 = 6;
