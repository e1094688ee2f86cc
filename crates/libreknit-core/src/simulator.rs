//! Simulated machine
//!
//! In-memory controllers that speak the wire protocol over the
//! [`Transport`] trait, so the session state machine can be exercised
//! without hardware: [`MachineSimulator`] walks through a complete knit
//! handshake and requests lines until it is told the pattern is done;
//! [`HardwareTestSimulator`] answers the hardware-test console.

use std::collections::VecDeque;
use std::io;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{slip_encode, SlipDecoder, Token, Transport};

const MOCK_API_VERSION: u8 = 6;

/// A simulated knitting machine controller.
///
/// Replies to the handshake like real firmware and, once started, issues a
/// line request for every non-terminal `cnfLine` it receives, wrapping its
/// 8-bit line counter like the hardware does.
pub struct MachineSimulator {
    open: bool,
    started: bool,
    decoder: SlipDecoder,
    outbox: VecDeque<u8>,
    line_count: u8,
    rng: StdRng,
}

impl MachineSimulator {
    /// Create a simulator ready to be polled.
    pub fn new() -> Self {
        Self {
            open: true,
            started: false,
            decoder: SlipDecoder::new(),
            outbox: VecDeque::new(),
            line_count: 0,
            rng: StdRng::from_entropy(),
        }
    }

    fn enqueue(&mut self, msg: &[u8]) {
        self.outbox.extend(slip_encode(msg));
    }

    fn cnf_info(&mut self) {
        // API v6, firmware v1.0.0-mock
        self.enqueue(&[
            Token::CnfInfo.byte(),
            MOCK_API_VERSION,
            1,
            0,
            0,
            b'm',
            b'o',
            b'c',
            b'k',
            0,
        ]);
    }

    fn ind_state_ready(&mut self) {
        // idle hall readings with a little sensor noise
        let hall_left: u16 = 0xFF00 | self.rng.gen_range(0..0x40);
        let hall_right: u16 = 0xFF00 | self.rng.gen_range(0..0x40);
        self.enqueue(&[
            Token::IndState.byte(),
            0, // ready
            1, // firmware state
            (hall_left >> 8) as u8,
            hall_left as u8,
            (hall_right >> 8) as u8,
            hall_right as u8,
            0xFF, // carriage type unknown
            0,    // position
            1,    // direction: right
        ]);
    }

    fn req_line(&mut self) {
        self.enqueue(&[Token::ReqLine.byte(), self.line_count]);
        self.line_count = self.line_count.wrapping_add(1);
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        match frame.first().copied().and_then(Token::from_byte) {
            Some(Token::ReqInfo) => self.cnf_info(),
            Some(Token::ReqInit) => {
                self.enqueue(&[Token::CnfInit.byte(), 0]);
                self.ind_state_ready();
            }
            Some(Token::ReqStart) => {
                self.started = true;
                self.line_count = 0;
                self.enqueue(&[Token::CnfStart.byte(), 0]);
                self.req_line();
            }
            Some(Token::CnfLine) => {
                let flags = frame.get(3).copied().unwrap_or(0);
                if self.started && flags & 0x01 == 0 {
                    self.req_line();
                } else {
                    self.started = false;
                }
            }
            _ => {}
        }
    }
}

impl Default for MachineSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MachineSimulator {
    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbox.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.outbox.len() as u32)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.decoder.feed(buf);
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_frame(&frame);
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        self.outbox.clear();
        Ok(())
    }
}

/// A simulated controller in hardware-test mode.
///
/// Echoes the console dialogue of the firmware's test build: a banner and
/// command list after `reqTest`, then one `Called <command>` line plus any
/// command-specific output per sub-command.
pub struct HardwareTestSimulator {
    open: bool,
    decoder: SlipDecoder,
    outbox: VecDeque<u8>,
    auto_read: bool,
    auto_test: bool,
    auto_test_odd: bool,
}

impl HardwareTestSimulator {
    /// Create a simulator ready to be polled.
    pub fn new() -> Self {
        Self {
            open: true,
            decoder: SlipDecoder::new(),
            outbox: VecDeque::new(),
            auto_read: false,
            auto_test: false,
            auto_test_odd: false,
        }
    }

    fn test_res(&mut self, text: &str) {
        let mut msg = Vec::with_capacity(1 + text.len());
        msg.push(Token::TestRes.byte());
        msg.extend_from_slice(text.as_bytes());
        self.outbox.extend(slip_encode(&msg));
    }

    fn help(&mut self) {
        self.test_res("The following commands are available:\n");
        self.test_res("setSingle [0..15] [1/0]\n");
        self.test_res("setAll [0..FFFF]\n");
        self.test_res("readEOLsensors\n");
        self.test_res("readEncoders\n");
        self.test_res("beep\n");
        self.test_res("autoRead\n");
        self.test_res("autoTest\n");
        self.test_res("send\n");
        self.test_res("stop\n");
        self.test_res("quit\n");
        self.test_res("help\n");
    }

    fn read_eol_sensors(&mut self) {
        self.test_res("  EOL_L: 0");
        self.test_res("  EOL_R: 0");
    }

    fn read_encoders(&mut self) {
        self.test_res("  ENC_A: LOW");
        self.test_res("  ENC_B: LOW");
        self.test_res("  ENC_C: LOW");
    }

    fn command_name(token: Token) -> &'static str {
        match token {
            Token::HelpCmd => "help",
            Token::SendCmd => "send",
            Token::BeepCmd => "beep",
            Token::SetSingleCmd => "setSingle",
            Token::SetAllCmd => "setAll",
            Token::ReadEolSensorsCmd => "readEOLsensors",
            Token::ReadEncodersCmd => "readEncoders",
            Token::AutoReadCmd => "autoRead",
            Token::AutoTestCmd => "autoTest",
            Token::StopCmd => "stop",
            Token::QuitCmd => "quit",
            _ => "",
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let token = match frame.first().copied().and_then(Token::from_byte) {
            Some(token) => token,
            None => return,
        };
        match token {
            Token::ReqInfo => {
                self.outbox.extend(slip_encode(&[
                    Token::CnfInfo.byte(),
                    MOCK_API_VERSION,
                    1,
                    0,
                    0,
                    0,
                ]));
                return;
            }
            Token::ReqInit => {
                self.outbox
                    .extend(slip_encode(&[Token::CnfInit.byte(), 0]));
                return;
            }
            Token::ReqTest => {
                self.outbox
                    .extend(slip_encode(&[Token::CnfTest.byte(), 0]));
                self.test_res("Hardware Test v1.0 API v6\n\n");
                self.help();
                return;
            }
            _ => {}
        }
        if !token.is_test_command() {
            return;
        }
        self.test_res(&format!("Called {}\n", Self::command_name(token)));
        match token {
            Token::HelpCmd => self.help(),
            Token::SendCmd => self.test_res("123\n"),
            Token::ReadEolSensorsCmd => {
                self.read_eol_sensors();
                self.test_res("\n");
            }
            Token::ReadEncodersCmd => {
                self.read_encoders();
                self.test_res("\n");
            }
            Token::SetSingleCmd => {
                let solenoid = frame.get(1).copied();
                let value = frame.get(2).copied();
                match (solenoid, value) {
                    (Some(s), Some(v)) if s <= 15 && v <= 1 => {}
                    (Some(s), _) if s > 15 => {
                        self.test_res(&format!("Invalid argument: {s}\n"));
                    }
                    (_, Some(v)) if v > 1 => {
                        self.test_res(&format!("Invalid argument: {v}\n"));
                    }
                    _ => {}
                }
            }
            Token::AutoReadCmd => self.auto_read = true,
            Token::AutoTestCmd => self.auto_test = true,
            Token::StopCmd => {
                self.auto_read = false;
                self.auto_test = false;
            }
            _ => {}
        }
    }

    /// Output the auto modes produce between polls.
    fn tick(&mut self) {
        if self.auto_read {
            self.read_eol_sensors();
            self.read_encoders();
            self.test_res("\n");
        }
        if self.auto_test {
            if self.auto_test_odd {
                self.test_res("Set odd solenoids\n");
            } else {
                self.test_res("Set even solenoids\n");
            }
            self.auto_test_odd = !self.auto_test_odd;
        }
    }
}

impl Default for HardwareTestSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HardwareTestSimulator {
    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.outbox.is_empty() {
            self.tick();
        }
        let n = buf.len().min(self.outbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbox.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.outbox.len() as u32)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.decoder.feed(buf);
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_frame(&frame);
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        self.outbox.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc8_maxim;

    fn read_frames(transport: &mut dyn Transport) -> Vec<Vec<u8>> {
        let mut decoder = SlipDecoder::new();
        let mut buf = [0u8; 256];
        loop {
            let n = transport.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            decoder.feed(&buf[..n]);
        }
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn checksummed(mut msg: Vec<u8>) -> Vec<u8> {
        let crc = crc8_maxim(&msg);
        msg.push(crc);
        msg
    }

    #[test]
    fn test_info_reply() {
        let mut sim = MachineSimulator::new();
        sim.write_all(&slip_encode(&[Token::ReqInfo.byte()])).unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], Token::CnfInfo.byte());
        assert_eq!(frames[0][1], 6);
    }

    #[test]
    fn test_init_reply_includes_ready_state() {
        let mut sim = MachineSimulator::new();
        sim.write_all(&slip_encode(&checksummed(vec![Token::ReqInit.byte(), 0])))
            .unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![Token::CnfInit.byte(), 0]);
        assert_eq!(frames[1][0], Token::IndState.byte());
        assert_eq!(frames[1][1], 0);
        assert_eq!(frames[1].len(), 10);
    }

    #[test]
    fn test_start_triggers_first_line_request() {
        let mut sim = MachineSimulator::new();
        sim.write_all(&slip_encode(&checksummed(vec![
            Token::ReqStart.byte(),
            0,
            199,
            2,
        ])))
        .unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(frames[0], vec![Token::CnfStart.byte(), 0]);
        assert_eq!(frames[1], vec![Token::ReqLine.byte(), 0]);
    }

    #[test]
    fn test_line_requests_advance_and_stop_on_terminal_flag() {
        let mut sim = MachineSimulator::new();
        sim.write_all(&slip_encode(&checksummed(vec![
            Token::ReqStart.byte(),
            0,
            199,
            2,
        ])))
        .unwrap();
        let _ = read_frames(&mut sim);

        // a non-terminal line elicits the next request
        let line = checksummed(vec![Token::CnfLine.byte(), 0, 0, 0, 0xFF]);
        sim.write_all(&slip_encode(&line)).unwrap();
        assert_eq!(read_frames(&mut sim), vec![vec![Token::ReqLine.byte(), 1]]);

        // a terminal line ends the session
        let last = checksummed(vec![Token::CnfLine.byte(), 1, 0, 1, 0x00]);
        sim.write_all(&slip_encode(&last)).unwrap();
        assert!(read_frames(&mut sim).is_empty());
    }

    #[test]
    fn test_hardware_test_banner_and_commands() {
        let mut sim = HardwareTestSimulator::new();
        sim.write_all(&slip_encode(&[Token::ReqTest.byte()])).unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(frames[0], vec![Token::CnfTest.byte(), 0]);
        assert!(frames[1..].iter().all(|f| f[0] == Token::TestRes.byte()));

        sim.write_all(&slip_encode(&[Token::BeepCmd.byte()])).unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(
            String::from_utf8_lossy(&frames[0][1..]),
            "Called beep\n".to_string()
        );
    }

    #[test]
    fn test_auto_read_emits_between_polls() {
        let mut sim = HardwareTestSimulator::new();
        sim.write_all(&slip_encode(&[Token::AutoReadCmd.byte()]))
            .unwrap();
        // drain the acknowledgment, then stop so tick() does not refill
        let mut buf = [0u8; 4096];
        let _ = sim.read(&mut buf).unwrap();

        // the next poll finds freshly generated sensor output
        let n = sim.read(&mut buf).unwrap();
        assert!(n > 0);
        let mut decoder = SlipDecoder::new();
        decoder.feed(&buf[..n]);
        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame[0], Token::TestRes.byte());
    }
}
