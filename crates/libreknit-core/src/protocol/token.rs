//! Protocol message catalogue
//!
//! Every message starts with a single token byte identifying it. Request
//! tokens flow to the device, confirmation tokens (`0xC0 | request`) and
//! indication tokens flow back to the host.

/// Protocol message identifiers with their fixed wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Token {
    /// Start-knitting request (start/stop needle, flags, checksum)
    ReqStart = 0x01,
    /// Firmware information request
    ReqInfo = 0x03,
    /// Hardware-test mode request
    ReqTest = 0x04,
    /// Firmware initialization request (machine type, checksum)
    ReqInit = 0x05,
    /// Hardware test: list available commands
    HelpCmd = 0x25,
    /// Hardware test: echo bytes back
    SendCmd = 0x26,
    /// Hardware test: sound the buzzer
    BeepCmd = 0x27,
    /// Hardware test: drive a single solenoid
    SetSingleCmd = 0x28,
    /// Hardware test: drive the whole solenoid bank
    SetAllCmd = 0x29,
    /// Hardware test: sample the end-of-line sensors
    ReadEolSensorsCmd = 0x2A,
    /// Hardware test: sample the carriage encoders
    ReadEncodersCmd = 0x2B,
    /// Hardware test: stream sensor readings
    AutoReadCmd = 0x2C,
    /// Hardware test: cycle solenoids continuously
    AutoTestCmd = 0x2D,
    /// Hardware test: stop auto modes
    StopCmd = 0x2E,
    /// Hardware test: leave test mode
    QuitCmd = 0x2F,
    /// Stitch data for one requested line (host → device)
    CnfLine = 0x42,
    /// Device-initiated request for the next line of stitch data
    ReqLine = 0x82,
    /// Device telemetry (sensors, carriage)
    IndState = 0x84,
    /// Firmware debug output
    Debug = 0x9F,
    /// Start-knitting confirmation (status byte)
    CnfStart = 0xC1,
    /// Firmware information response (API version, firmware version)
    CnfInfo = 0xC3,
    /// Hardware-test mode confirmation (status byte)
    CnfTest = 0xC4,
    /// Firmware initialization confirmation (status byte)
    CnfInit = 0xC5,
    /// Hardware-test console output (free-form text)
    TestRes = 0xEE,
}

impl Token {
    /// Map a wire byte to its token, or `None` for an unrecognized value.
    ///
    /// Unrecognized tokens are tolerated by the session driver so that
    /// firmware additions do not break the host.
    pub fn from_byte(byte: u8) -> Option<Token> {
        match byte {
            0x01 => Some(Token::ReqStart),
            0x03 => Some(Token::ReqInfo),
            0x04 => Some(Token::ReqTest),
            0x05 => Some(Token::ReqInit),
            0x25 => Some(Token::HelpCmd),
            0x26 => Some(Token::SendCmd),
            0x27 => Some(Token::BeepCmd),
            0x28 => Some(Token::SetSingleCmd),
            0x29 => Some(Token::SetAllCmd),
            0x2A => Some(Token::ReadEolSensorsCmd),
            0x2B => Some(Token::ReadEncodersCmd),
            0x2C => Some(Token::AutoReadCmd),
            0x2D => Some(Token::AutoTestCmd),
            0x2E => Some(Token::StopCmd),
            0x2F => Some(Token::QuitCmd),
            0x42 => Some(Token::CnfLine),
            0x82 => Some(Token::ReqLine),
            0x84 => Some(Token::IndState),
            0x9F => Some(Token::Debug),
            0xC1 => Some(Token::CnfStart),
            0xC3 => Some(Token::CnfInfo),
            0xC4 => Some(Token::CnfTest),
            0xC5 => Some(Token::CnfInit),
            0xEE => Some(Token::TestRes),
            _ => None,
        }
    }

    /// The wire value of this token.
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Whether this token is a hardware-test console sub-command.
    pub fn is_test_command(self) -> bool {
        matches!(
            self,
            Token::HelpCmd
                | Token::SendCmd
                | Token::BeepCmd
                | Token::SetSingleCmd
                | Token::SetAllCmd
                | Token::ReadEolSensorsCmd
                | Token::ReadEncodersCmd
                | Token::AutoReadCmd
                | Token::AutoTestCmd
                | Token::StopCmd
                | Token::QuitCmd
        )
    }
}

/// One decoded inbound frame: token byte plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    raw: Vec<u8>,
}

impl Message {
    /// Wrap a decoded frame. Empty frames never reach this point; the
    /// decoder drops them.
    pub(crate) fn new(raw: Vec<u8>) -> Self {
        debug_assert!(!raw.is_empty());
        Self { raw }
    }

    /// The recognized token, or `None` for an unknown message identifier.
    pub fn token(&self) -> Option<Token> {
        self.raw.first().copied().and_then(Token::from_byte)
    }

    /// First payload byte, used as the status/parameter of most replies.
    /// A truncated frame reads as parameter 0.
    pub fn param(&self) -> u8 {
        self.raw.get(1).copied().unwrap_or(0)
    }

    /// Raw frame bytes including the token.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}
