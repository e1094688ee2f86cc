//! Session configuration
//!
//! Everything the presentation layer decides before a knit or test
//! operation starts. Immutable for the duration of one session.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::mode::Mode;
use crate::machine::Machine;
use crate::pattern::Alignment;
use crate::protocol::ProtocolError;

/// Configuration for one knit or hardware-test session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Machine family being driven
    pub machine: Machine,
    /// Knitting topology
    pub mode: Mode,
    /// Number of colors to knit (2–6)
    pub num_colors: usize,
    /// First pattern row to knit
    pub start_row: usize,
    /// Repeat the pattern until cancelled
    pub inf_repeat: bool,
    /// Ask the firmware for continuous telemetry
    pub continuous_reporting: bool,
    /// Suppress the controller's beeper
    pub disable_hardware_beep: bool,
    /// First needle of the knit window (inclusive)
    pub start_needle: usize,
    /// Last needle of the knit window (inclusive)
    pub stop_needle: usize,
    /// Pattern placement within the knit window
    pub alignment: Alignment,
    /// Port identifier: device path, `simulation`, or `tcp://host[:port]`
    pub portname: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let machine = Machine::default();
        Self {
            machine,
            mode: Mode::default(),
            num_colors: 2,
            start_row: 0,
            inf_repeat: false,
            continuous_reporting: false,
            disable_hardware_beep: false,
            start_needle: 0,
            stop_needle: machine.width() - 1,
            alignment: Alignment::default(),
            portname: String::new(),
        }
    }
}

impl SessionConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ProtocolError> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}
