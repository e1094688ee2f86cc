//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the machine controller.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Transport is not open")]
    NotConnected,

    #[error("Could not open port {0}")]
    OpenFailed(String),

    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    #[error("Requested line {actual} out of sequence (previous request {previous})")]
    LineOutOfSequence { previous: u8, actual: u8 },

    #[error("Knitting mode does not support {0} colors")]
    InvalidSettings(usize),

    #[error("Not a hardware-test command: {0:#04x}")]
    NotATestCommand(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
