//! Machine status
//!
//! Parses `indState` telemetry (sensors, carriage) and carries the per-row
//! progress snapshot handed to the presentation layer.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

/// Carriage travel direction as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Direction {
    /// Not yet observed
    #[default]
    Unknown,
    /// Moving towards the left edge of the bed
    Left,
    /// Moving towards the right edge of the bed
    Right,
}

impl Direction {
    /// The opposite direction; `Unknown` stays `Unknown`.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Unknown => Direction::Unknown,
        }
    }

    /// Arrow symbol for progress displays.
    pub fn symbol(self) -> &'static str {
        match self {
            Direction::Left => "\u{2190}",
            Direction::Right => "\u{2192}",
            Direction::Unknown => "",
        }
    }
}

/// Carriage type as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Carriage {
    /// Not yet observed
    #[default]
    Unknown,
    /// Plain knit carriage
    Knit,
    /// Lace carriage
    Lace,
    /// Garter carriage
    Garter,
}

impl Carriage {
    /// One-letter symbol for progress displays.
    pub fn symbol(self) -> &'static str {
        match self {
            Carriage::Knit => "K",
            Carriage::Lace => "L",
            Carriage::Garter => "G",
            Carriage::Unknown => "",
        }
    }
}

/// Firmware version reported in `cnfInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Patch version
    pub patch: u8,
    /// Optional build suffix, e.g. a release-candidate tag
    pub suffix: String,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.suffix.is_empty() {
            write!(f, "-{}", self.suffix)?;
        }
        Ok(())
    }
}

/// Snapshot of session progress and device telemetry.
///
/// Owned by the session driver; observers get clones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    /// Whether telemetry parsing is active (continuous reporting)
    pub active: bool,
    /// Firmware state machine code from the last `indState`
    pub firmware_state: Option<u8>,
    /// Negotiated firmware API version
    pub api_version: Option<u8>,
    /// Firmware version from the information handshake
    pub firmware_version: Option<FirmwareVersion>,
    /// Total pattern rows in this session
    pub total_rows: Option<usize>,
    /// 1-based pattern row being knitted
    pub current_row: Option<usize>,
    /// Absolute line number of the last answered request
    pub line_number: Option<usize>,
    /// Completed pattern repeats (infinite-repeat sessions)
    pub repeats: Option<usize>,
    /// Palette index of the current yarn
    pub color: Option<usize>,
    /// RGB value of the current yarn
    pub color_rgb: Option<u32>,
    /// Symbol A–F of the current yarn (ribber modes)
    pub color_symbol: Option<char>,
    /// RGB of the second yarn (single-bed mode knits two at once)
    pub alt_color: Option<u32>,
    /// Stitch bits of the last answered line, active window only
    pub bits: Vec<bool>,
    /// Left hall sensor reading
    pub hall_left: u16,
    /// Right hall sensor reading
    pub hall_right: u16,
    /// Carriage type
    pub carriage_type: Carriage,
    /// Needle position of the carriage
    pub carriage_position: Option<u8>,
    /// Carriage travel direction
    pub carriage_direction: Direction,
    /// First needle of the reported stitch window
    pub knit_start_needle: usize,
    /// Carriage passes per pattern row
    pub passes_per_row: usize,
    /// Needle count of the machine
    pub machine_width: usize,
}

impl Status {
    /// Clear everything back to the not-yet-observed state.
    pub fn reset(&mut self) {
        *self = Status {
            active: true,
            ..Status::default()
        };
    }

    /// Parse an `indState` telemetry frame.
    ///
    /// Layout: token, ready code, firmware state, two big-endian sensor
    /// words, carriage type, position, direction. Truncated frames are
    /// ignored.
    pub fn parse_device_state(&mut self, msg: &[u8]) {
        if !self.active {
            return;
        }
        if msg.len() < 10 {
            tracing::debug!(len = msg.len(), "short indState frame");
            return;
        }

        self.firmware_state = Some(msg[2]);
        self.hall_left = BigEndian::read_u16(&msg[3..5]);
        self.hall_right = BigEndian::read_u16(&msg[5..7]);

        self.carriage_type = match msg[7] {
            0 => Carriage::Knit,
            1 => Carriage::Lace,
            2 => Carriage::Garter,
            _ => Carriage::Unknown,
        };

        self.carriage_position = Some(msg[8]);

        self.carriage_direction = match msg[9] {
            0 => Direction::Left,
            1 => Direction::Right,
            _ => Direction::Unknown,
        };
    }
}
