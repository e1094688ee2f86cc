//! Session control
//!
//! [`Control`] governs information flow with the controller for one knit or
//! hardware-test session: it owns the transport, the frame decoder and all
//! session state, and is driven by one [`Control::operate`] call per poll
//! iteration. No other component mutates it.

use std::collections::VecDeque;
use std::time::Instant;

use super::config::SessionConfig;
use super::fsm::{Operation, State};
use super::mode::{LineSpec, Mode, Sequencer};
use super::output::Event;
use super::status::{Carriage, Direction, FirmwareVersion, Status};
use crate::machine::Machine;
use crate::pattern::Pattern;
use crate::protocol::{
    crc8_maxim, slip_encode, Message, ProtocolError, SlipDecoder, Token, Transport,
    FIRST_SUPPORTED_API_VERSION,
};

/// The device's line counter is 8 bits; the host tracks wraparounds in
/// blocks of this many lines.
pub const BLOCK_LENGTH: usize = 256;

/// Yarn symbols by palette index.
pub const COLOR_SYMBOLS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];

/// Session driver for one knit or hardware-test operation.
pub struct Control {
    // session configuration, fixed by start()
    pub(crate) machine: Machine,
    pub(crate) mode: Mode,
    pub(crate) num_colors: usize,
    pub(crate) start_row: usize,
    pub(crate) inf_repeat: bool,
    pub(crate) continuous_reporting: bool,
    pub(crate) disable_hardware_beep: bool,
    pub(crate) portname: String,
    pub(crate) operation: Operation,

    // derived needle geometry
    pub(crate) pattern: Option<Pattern>,
    pub(crate) pat_height: usize,
    pub(crate) passes_per_row: usize,
    pub(crate) start_needle: usize,
    pub(crate) end_needle: usize,
    pub(crate) start_pixel: usize,
    pub(crate) end_pixel: usize,

    // handshake and line bookkeeping
    pub(crate) state: State,
    pub(crate) api_version: u8,
    pub(crate) former_request: u8,
    pub(crate) line_block: usize,
    pub(crate) pattern_repeats: usize,
    pub(crate) initial_carriage: Carriage,
    pub(crate) initial_position: Option<u8>,
    pub(crate) initial_direction: Direction,
    pub(crate) last_retry: Option<Instant>,

    // I/O
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) decoder: SlipDecoder,

    // observer-facing state
    pub(crate) status: Status,
    pub(crate) events: VecDeque<Event>,
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Control {
    /// Create an idle session driver. Call [`Control::start`] to begin a
    /// session, then poll [`Control::operate`].
    pub fn new() -> Self {
        Self {
            machine: Machine::default(),
            mode: Mode::default(),
            num_colors: 2,
            start_row: 0,
            inf_repeat: false,
            continuous_reporting: false,
            disable_hardware_beep: false,
            portname: String::new(),
            operation: Operation::Knit,
            pattern: None,
            pat_height: 0,
            passes_per_row: 1,
            start_needle: 0,
            end_needle: 0,
            start_pixel: 0,
            end_pixel: 0,
            state: State::Finished,
            api_version: FIRST_SUPPORTED_API_VERSION,
            former_request: 0,
            line_block: 0,
            pattern_repeats: 0,
            initial_carriage: Carriage::Unknown,
            initial_position: None,
            initial_direction: Direction::Unknown,
            last_retry: None,
            transport: None,
            decoder: SlipDecoder::new(),
            status: Status::default(),
            events: VecDeque::new(),
        }
    }

    /// Begin a session. A knit operation needs a pattern whose placement
    /// already reflects the configured knit window and alignment (see
    /// [`configure_pattern`](super::configure_pattern)); a hardware-test
    /// operation does not.
    pub fn start(
        &mut self,
        pattern: Option<Pattern>,
        config: &SessionConfig,
        operation: Operation,
    ) {
        self.operation = operation;
        self.machine = config.machine;
        self.portname = config.portname.clone();
        if operation == Operation::Knit {
            if let Some(pattern) = pattern {
                self.former_request = 0;
                self.line_block = 0;
                self.pattern_repeats = 0;
                self.pat_height = pattern.pat_height();
                self.num_colors = config.num_colors.clamp(2, 6);
                self.start_row = config.start_row;
                self.mode = config.mode;
                self.inf_repeat = config.inf_repeat;
                self.continuous_reporting = config.continuous_reporting;
                self.disable_hardware_beep = config.disable_hardware_beep;
                self.passes_per_row = self.mode.row_multiplier(self.num_colors);

                let pat_start = pattern.pat_start_needle();
                self.start_needle = pat_start.max(0) as usize;
                self.end_needle = pattern
                    .pat_end_needle()
                    .min(self.machine.width() as i32)
                    .max(0) as usize;
                self.start_pixel = (self.start_needle as i32 - pat_start) as usize;
                self.end_pixel = (self.end_needle as i32 - pat_start) as usize;

                self.initial_carriage = Carriage::Unknown;
                self.initial_position = None;
                self.initial_direction = Direction::Unknown;

                self.reset_status(&pattern);
                self.pattern = Some(pattern);
            } else {
                self.pattern = None;
            }
        }
        self.last_retry = None;
        self.api_version = FIRST_SUPPORTED_API_VERSION;
        self.state = State::Connect;
    }

    /// Close the transport. Best-effort; failure is logged, not fatal.
    pub fn stop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.close() {
                Ok(()) => tracing::info!("closed transport"),
                Err(e) => tracing::warn!("closing transport failed: {e}"),
            }
        }
    }

    /// Current state of the session.
    pub fn state(&self) -> State {
        self.state
    }

    /// Negotiated firmware API version.
    pub fn api_version(&self) -> u8 {
        self.api_version
    }

    /// Current progress/telemetry snapshot.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Drain events queued since the previous call.
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Inject an already-open transport instead of having
    /// [`Control::operate`] open one from the port identifier. Used by
    /// tests and custom backends.
    pub fn install_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
        self.decoder = SlipDecoder::new();
    }

    fn reset_status(&mut self, pattern: &Pattern) {
        self.status.reset();
        if self.mode == Mode::Singlebed {
            self.status.alt_color = pattern.palette().get(1).copied();
        } else {
            self.status.alt_color = None;
        }
        self.status.machine_width = self.machine.width();
        if self.mode != Mode::Singlebed {
            self.status.knit_start_needle = pattern.knit_start_needle();
        } else {
            // in single-bed mode, only the pattern bits are emitted, no
            // extra needles
            self.status.knit_start_needle = self.start_needle;
        }
        self.status.passes_per_row = self.passes_per_row;
        self.status.total_rows = Some(self.pat_height);
    }

    // ------------------------------------------------------------------
    // outbound messages
    // ------------------------------------------------------------------

    fn send_frame(&mut self, msg: &[u8]) -> Result<(), ProtocolError> {
        let frame = slip_encode(msg);
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or(ProtocolError::NotConnected)?;
        transport.write_all(&frame)?;
        Ok(())
    }

    fn send_checksummed(&mut self, mut msg: Vec<u8>) -> Result<(), ProtocolError> {
        let crc = crc8_maxim(&msg);
        msg.push(crc);
        self.send_frame(&msg)
    }

    pub(crate) fn req_info(&mut self) -> Result<(), ProtocolError> {
        self.send_frame(&[Token::ReqInfo.byte()])
    }

    pub(crate) fn req_test(&mut self) -> Result<(), ProtocolError> {
        self.send_frame(&[Token::ReqTest.byte()])
    }

    pub(crate) fn req_init(&mut self) -> Result<(), ProtocolError> {
        self.send_checksummed(vec![Token::ReqInit.byte(), self.machine.byte()])
    }

    pub(crate) fn req_start(&mut self, start_needle: u8, stop_needle: u8) -> Result<(), ProtocolError> {
        let flags = u8::from(self.continuous_reporting)
            + 2 * u8::from(!self.disable_hardware_beep);
        self.send_checksummed(vec![
            Token::ReqStart.byte(),
            start_needle,
            stop_needle,
            flags,
        ])
    }

    fn cnf_line(
        &mut self,
        line_number: u8,
        color: u8,
        flags: u8,
        bits: &[bool],
    ) -> Result<(), ProtocolError> {
        let mut msg = Vec::with_capacity(4 + bits.len() / 8 + 1);
        msg.push(Token::CnfLine.byte());
        msg.push(line_number);
        msg.push(color);
        msg.push(flags);
        msg.extend(pack_bits(bits));
        self.send_checksummed(msg)
    }

    /// Send a hardware-test console sub-command. Sub-commands carry no
    /// checksum. `QuitCmd` ends the session.
    pub fn send_test_command(&mut self, command: Token, args: &[u8]) -> Result<(), ProtocolError> {
        if !command.is_test_command() {
            return Err(ProtocolError::NotATestCommand(command.byte()));
        }
        let mut msg = Vec::with_capacity(1 + args.len());
        msg.push(command.byte());
        msg.extend_from_slice(args);
        self.send_frame(&msg)?;
        if command == Token::QuitCmd {
            tracing::info!("leaving hardware test mode");
            self.state = State::Finished;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // inbound messages
    // ------------------------------------------------------------------

    /// Read from the transport and return the next decoded frame, if any.
    /// Performs at most one bounded-timeout read per call.
    fn read_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.decoder.pending() == 0 {
            let transport = self
                .transport
                .as_deref_mut()
                .ok_or(ProtocolError::NotConnected)?;

            // Wait for a first byte up to the poll timeout, then grab
            // whatever arrived with it so whole frames decode in one poll.
            let mut byte = [0u8; 1];
            let n = match transport.read(&mut byte) {
                Ok(n) => n,
                Err(e) if is_poll_timeout(&e) => 0,
                Err(e) => return Err(e.into()),
            };
            if n > 0 {
                let mut data = byte.to_vec();
                let waiting = transport.bytes_to_read()? as usize;
                if waiting > 0 {
                    let mut rest = vec![0u8; waiting];
                    match transport.read(&mut rest) {
                        Ok(m) => {
                            rest.truncate(m);
                            data.extend_from_slice(&rest);
                        }
                        Err(e) if is_poll_timeout(&e) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                self.decoder.feed(&data);
            }
        }
        Ok(self.decoder.next_frame().map(Message::new))
    }

    /// Poll for one message and apply its side effects (telemetry,
    /// firmware info, console output). Returns the recognized token and
    /// parameter byte; `(None, 0)` when nothing useful arrived.
    pub(crate) fn check_serial(&mut self) -> Result<(Option<Token>, u8), ProtocolError> {
        let Some(msg) = self.read_message()? else {
            return Ok((None, 0));
        };
        let token = msg.token();
        let param = msg.param();
        match token {
            Some(Token::CnfInfo) => self.record_firmware_info(msg.raw()),
            Some(Token::IndState) => {
                self.status.parse_device_state(msg.raw());
                if self.status.active {
                    self.events.push_back(Event::Status(self.status.clone()));
                }
            }
            Some(Token::TestRes) => {
                if msg.raw().len() > 1 {
                    let text = String::from_utf8_lossy(&msg.raw()[1..]).into_owned();
                    self.events.push_back(Event::TestOutput(text));
                }
            }
            Some(Token::Debug) => {
                tracing::debug!(
                    "firmware: {}",
                    String::from_utf8_lossy(&msg.raw()[1..]).trim_end()
                );
            }
            None => {
                tracing::debug!(raw = ?msg.raw(), "unknown message");
            }
            _ => {}
        }
        Ok((token, param))
    }

    fn record_firmware_info(&mut self, msg: &[u8]) {
        if msg.len() < 2 {
            return;
        }
        let api = msg[1];
        if api >= 5 && msg.len() >= 5 {
            let suffix_bytes = &msg[5..msg.len().min(21)];
            let end = suffix_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(suffix_bytes.len());
            let version = FirmwareVersion {
                major: msg[2],
                minor: msg[3],
                patch: msg[4],
                suffix: String::from_utf8_lossy(&suffix_bytes[..end]).into_owned(),
            };
            tracing::info!("API v{api}, FW v{version}");
            self.status.firmware_version = Some(version);
        } else {
            tracing::info!("API v{api}");
        }
    }

    // ------------------------------------------------------------------
    // knitting
    // ------------------------------------------------------------------

    pub(crate) fn sequencer(&self) -> Sequencer {
        Sequencer {
            mode: self.mode,
            num_colors: self.num_colors,
            pat_height: self.pat_height,
            start_row: self.start_row,
            inf_repeat: self.inf_repeat,
        }
    }

    /// Answer one device line request. Returns `true` when the pattern is
    /// finished and the session should move on to the finalization
    /// sequence.
    pub(crate) fn handle_line_request(&mut self, requested: u8) -> Result<bool, ProtocolError> {
        if self.former_request == (BLOCK_LENGTH - 1) as u8 && requested == 0 {
            // wrap to the next block of lines
            self.line_block += 1;
        } else if requested != self.former_request
            && requested != self.former_request.wrapping_add(1)
        {
            // the requested line must repeat the previous request or
            // advance it by one; anything else means we lost sync
            return Err(ProtocolError::LineOutOfSequence {
                previous: self.former_request,
                actual: requested,
            });
        }
        self.former_request = requested;

        let line_number = requested as usize + BLOCK_LENGTH * self.line_block;
        let line_spec = self.sequencer().line(line_number);
        let bits = self.select_needles(line_spec.color, line_spec.row_index, line_spec.blank_line);

        // Never set the final-line flag here: an extra blank line follows
        // so the final pattern row can be tracked to completion.
        self.cnf_line(requested, line_spec.color as u8, 0, &bits)?;

        if line_spec.blank_line {
            tracing::debug!(
                block = self.line_block,
                line = line_number,
                requested,
                row = line_spec.pat_row,
                "blank line"
            );
        } else {
            tracing::debug!(
                block = self.line_block,
                line = line_number,
                requested,
                row = line_spec.pat_row,
                row_index = line_spec.row_index,
                color = %COLOR_SYMBOLS[line_spec.color],
                "answered line request"
            );
        }

        self.update_status(line_number, &line_spec, bits);

        if !line_spec.last_line {
            Ok(false)
        } else if self.inf_repeat {
            self.pattern_repeats += 1;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Send the all-blank, terminal-flagged line that closes the pattern.
    pub(crate) fn cnf_final_line(&mut self, requested: u8) -> Result<(), ProtocolError> {
        tracing::debug!(line = requested, "sending blank line as final line");
        let bits = vec![false; self.machine.width()];
        self.cnf_line(requested, 0, 1, &bits)
    }

    /// Build the machine-width stitch bit vector for one pass.
    ///
    /// Needles flanking the pattern knit the background color where the
    /// mode requires it; unless the pass is blank, the pattern row covers
    /// the active window. Bit 0 of byte 0 is the leftmost needle.
    pub fn select_needles(&self, color: usize, row_index: usize, blank_line: bool) -> Vec<bool> {
        let width = self.machine.width();
        let mut bits = vec![false; width];

        if self.mode.flanking_needles(color, self.num_colors) && self.mode != Mode::Singlebed {
            for bit in &mut bits[..self.start_needle] {
                *bit = true;
            }
            for bit in &mut bits[self.end_needle..] {
                *bit = true;
            }
        }

        if !blank_line {
            if let Some(row) = self
                .pattern
                .as_ref()
                .and_then(|p| p.pattern_expanded().get(row_index))
            {
                bits[self.start_needle..self.end_needle]
                    .copy_from_slice(&row[self.start_pixel..self.end_pixel]);
            } else {
                tracing::debug!(row_index, "no pattern row for this pass");
            }
        }

        bits
    }

    fn update_status(&mut self, line_number: usize, line_spec: &LineSpec, bits: Vec<bool>) {
        let (window, color_rgb) = match self.pattern.as_ref() {
            Some(pattern) => {
                let window = if self.mode != Mode::Singlebed {
                    bits[pattern.knit_start_needle()..pattern.knit_end_needle()].to_vec()
                } else {
                    bits[self.start_needle..self.end_needle].to_vec()
                };
                (window, pattern.palette().get(line_spec.color).copied())
            }
            None => (bits, None),
        };

        self.status.total_rows = Some(self.pat_height);
        self.status.current_row = Some(line_spec.pat_row + 1);
        self.status.line_number = Some(line_number);
        if self.inf_repeat {
            self.status.repeats = Some(self.pattern_repeats);
        }
        if self.mode != Mode::Singlebed {
            self.status.color_symbol = COLOR_SYMBOLS.get(line_spec.color).copied();
        }
        self.status.color = Some(line_spec.color);
        self.status.color_rgb = color_rgb;
        self.status.bits = window;
        self.status.carriage_type = self.initial_carriage;
        self.status.carriage_direction = if line_number % 2 == 0 {
            self.initial_direction
        } else {
            self.initial_direction.reverse()
        };

        self.events.push_back(Event::Status(self.status.clone()));
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pack stitch bits for transmission, least-significant bit first per byte.
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1u8 << (i % 8);
        }
    }
    bytes
}

fn is_poll_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
    )
}
