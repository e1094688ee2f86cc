//! Session outputs
//!
//! Every `operate()` call returns exactly one [`Output`]; the presentation
//! layer maps it to a notification. Richer payloads (status snapshots,
//! hardware-test console text) are queued as [`Event`]s and drained
//! separately, so the core stays free of any UI runtime.

use serde::Serialize;

use super::status::Status;

/// Result of one `operate()` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Output {
    /// Nothing to report
    None,
    /// The mode/color configuration cannot be knitted
    ErrorInvalidSettings,
    /// The transport could not be opened or failed
    ErrorSerialPort,
    /// Waiting for the firmware information handshake
    ConnectingToMachine,
    /// Final flush in progress
    DisconnectingFromMachine,
    /// Waiting for the firmware initialization handshake
    InitializingFirmware,
    /// Firmware reported an initialization failure
    ErrorInitializingFirmware,
    /// Firmware API version is below the supported minimum
    ErrorWrongApi,
    /// Waiting for the operator to arm the carriage
    WaitForInit,
    /// Start confirmed, the operator can knit
    PleaseKnit,
    /// Device rejected the start request; the operator can retry
    DeviceNotReady,
    /// A line request was answered
    NextLine,
    /// A line request arrived out of sequence; the session was aborted
    ErrorLineSequence,
    /// Pattern transmission finished
    KnittingFinished,
}

impl Output {
    /// Canonical operator-facing message, if this output carries one.
    pub fn message(self) -> Option<&'static str> {
        match self {
            Output::None | Output::NextLine => None,
            Output::ErrorInvalidSettings => Some("Invalid machine settings for this pattern."),
            Output::ErrorSerialPort => Some("Error opening serial port"),
            Output::ConnectingToMachine => Some("Connecting to machine..."),
            Output::DisconnectingFromMachine => Some("Disconnecting from machine..."),
            Output::InitializingFirmware => Some("Initializing firmware"),
            Output::ErrorInitializingFirmware => Some("Error initializing firmware"),
            Output::ErrorWrongApi => Some(
                "Wrong firmware version. Please check that you have flashed the latest version.",
            ),
            Output::WaitForInit => Some(
                "Please start machine. (Set the carriage to mode KC-I or KC-II \
                 and move the carriage over the left turn mark).",
            ),
            Output::PleaseKnit => Some("Please knit."),
            Output::DeviceNotReady => Some("Device not ready, try again."),
            Output::ErrorLineSequence => Some("Requested line number out of sequence"),
            Output::KnittingFinished => Some(
                "Image transmission finished. Please knit until you \
                 hear the double beep sound.",
            ),
        }
    }

    /// Whether this output ends the session with an error.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Output::ErrorInvalidSettings
                | Output::ErrorSerialPort
                | Output::ErrorInitializingFirmware
                | Output::ErrorWrongApi
                | Output::ErrorLineSequence
        )
    }
}

/// Payload-carrying events queued during `operate()`.
#[derive(Debug, Clone)]
pub enum Event {
    /// Progress snapshot after an answered line request or telemetry update
    Status(Status),
    /// A line of hardware-test console output
    TestOutput(String),
}
