//! Session state machine tests
//!
//! Drives the session driver against the in-memory simulator and against
//! scripted transports, checking the handshake, the knit loop, the
//! finalization sequence and the failure paths.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use libreknit_core::engine::{
    self, Control, Event, Mode, Operation, Output, SessionConfig, State,
};
use libreknit_core::machine::Machine;
use libreknit_core::pattern::{Alignment, Bitmap};
use libreknit_core::protocol::{crc8_maxim, slip_encode, SlipDecoder, Token, Transport};

/// Transport that replays a fixed list of inbound frames and records
/// everything the driver writes.
struct ScriptedTransport {
    rx: VecDeque<u8>,
    tx: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedTransport {
    fn new(frames: &[&[u8]]) -> Self {
        let mut rx = VecDeque::new();
        for frame in frames {
            rx.extend(slip_encode(frame));
        }
        Self {
            rx,
            tx: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the written bytes, usable after the transport has
    /// been moved into the session driver.
    fn tx_log(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.tx)
    }
}

fn sent_frames(tx: &Arc<Mutex<Vec<u8>>>) -> Vec<Vec<u8>> {
    let mut decoder = SlipDecoder::new();
    decoder.feed(&tx.lock().unwrap());
    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame() {
        frames.push(frame);
    }
    frames
}

impl Transport for ScriptedTransport {
    fn is_open(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.rx.len() as u32)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tx.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 40x3 bitmap: row 0 in color 0, rows 1-2 in color 1.
fn test_bitmap() -> Bitmap {
    let mut pixels = vec![1u8; 40 * 3];
    for p in pixels.iter_mut().take(40) {
        *p = 0;
    }
    Bitmap::new(40, 3, pixels, vec![0xFFFFFF, 0x000000]).unwrap()
}

fn knit_config(mode: Mode, portname: &str) -> SessionConfig {
    SessionConfig {
        machine: Machine::Kh910Kh950i,
        mode,
        num_colors: 2,
        alignment: Alignment::Left,
        portname: portname.to_string(),
        ..SessionConfig::default()
    }
}

fn started_control(mode: Mode, portname: &str) -> Control {
    let config = knit_config(mode, portname);
    let pattern = engine::configure_pattern(test_bitmap(), &config);
    let mut control = Control::new();
    control.start(Some(pattern), &config, Operation::Knit);
    control
}

const CNF_INFO_V6: &[u8] = &[0xC3, 6, 1, 0, 0, 0];
const CNF_INIT_OK: &[u8] = &[0xC5, 0];
const IND_STATE_READY: &[u8] = &[0x84, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 1];
const CNF_START_OK: &[u8] = &[0xC1, 0];

fn checksummed(mut msg: Vec<u8>) -> Vec<u8> {
    let crc = crc8_maxim(&msg);
    msg.push(crc);
    msg
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------
// needle selection
// ---------------------------------------------------------------------

#[test]
fn singlebed_needle_selection_covers_pattern_only() {
    let control = started_control(Mode::Singlebed, "simulation");
    let bits = control.select_needles(0, 0, false);
    assert_eq!(bits.len(), 200);
    assert!(bits[..40].iter().all(|&b| b));
    assert!(bits[40..].iter().all(|&b| !b));
}

#[test]
fn ribber_blank_line_is_exact_complement() {
    let control = started_control(Mode::ClassicRibber, "simulation");
    let bits = control.select_needles(0, 0, true);
    assert!(bits[..40].iter().all(|&b| !b));
    assert!(bits[40..].iter().all(|&b| b));
}

#[test]
fn ribber_non_background_color_has_no_flanking_needles() {
    let control = started_control(Mode::ClassicRibber, "simulation");
    let bits = control.select_needles(1, 0, true);
    assert!(bits.iter().all(|&b| !b));
}

// ---------------------------------------------------------------------
// handshake failures
// ---------------------------------------------------------------------

#[test]
fn unreachable_port_terminates_without_version_check() {
    let mut control = started_control(Mode::Singlebed, "/dev/does-not-exist-libreknit");
    assert_eq!(control.operate(), Output::ErrorSerialPort);
    assert_eq!(control.state(), State::Finished);
    // terminal: further polls are inert
    assert_eq!(control.operate(), Output::None);
}

#[test]
fn invalid_color_count_never_opens_the_port() {
    let config = SessionConfig {
        num_colors: 3,
        mode: Mode::Singlebed,
        portname: "/dev/does-not-exist-libreknit".to_string(),
        ..SessionConfig::default()
    };
    let pattern = engine::configure_pattern(test_bitmap(), &config);
    let mut control = Control::new();
    control.start(Some(pattern), &config, Operation::Knit);
    assert_eq!(control.operate(), Output::ErrorInvalidSettings);
    assert_eq!(control.state(), State::Finished);
}

#[test]
fn low_api_version_reports_error_and_never_reaches_init() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    control.install_transport(Box::new(ScriptedTransport::new(&[&[0xC3, 4, 0, 9, 9, 0]])));

    assert_eq!(control.operate(), Output::None); // Connect
    assert_eq!(control.operate(), Output::ErrorWrongApi);
    assert_eq!(control.state(), State::VersionCheck);
}

#[test]
fn firmware_init_failure_is_reported() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    control.install_transport(Box::new(ScriptedTransport::new(&[
        CNF_INFO_V6,
        &[0xC5, 2],
    ])));

    assert_eq!(control.operate(), Output::None); // Connect
    assert_eq!(control.operate(), Output::None); // VersionCheck -> Init
    assert_eq!(control.operate(), Output::ErrorInitializingFirmware);
}

#[test]
fn device_not_ready_is_recoverable_in_place() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    control.install_transport(Box::new(ScriptedTransport::new(&[
        CNF_INFO_V6,
        CNF_INIT_OK,
        IND_STATE_READY,
        &[0xC1, 1],
    ])));

    let mut outputs = Vec::new();
    for _ in 0..6 {
        outputs.push(control.operate());
    }
    assert!(outputs.contains(&Output::DeviceNotReady));
    assert_eq!(control.state(), State::ConfirmStart);
}

#[test]
fn out_of_sequence_line_request_aborts_the_session() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    control.install_transport(Box::new(ScriptedTransport::new(&[
        CNF_INFO_V6,
        CNF_INIT_OK,
        IND_STATE_READY,
        CNF_START_OK,
        &[0x82, 0],
        &[0x82, 5],
    ])));

    let mut outputs = Vec::new();
    for _ in 0..10 {
        outputs.push(control.operate());
        if control.state() == State::Finished {
            break;
        }
    }
    assert!(outputs.contains(&Output::NextLine));
    assert_eq!(outputs.last(), Some(&Output::ErrorLineSequence));
    assert_eq!(control.state(), State::Finished);
}

#[test]
fn repeated_line_request_is_answered_again() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    control.install_transport(Box::new(ScriptedTransport::new(&[
        CNF_INFO_V6,
        CNF_INIT_OK,
        IND_STATE_READY,
        CNF_START_OK,
        &[0x82, 0],
        &[0x82, 0],
    ])));

    let mut next_lines = 0;
    for _ in 0..10 {
        if control.operate() == Output::NextLine {
            next_lines += 1;
        }
    }
    assert_eq!(next_lines, 2);
    assert_ne!(control.state(), State::Finished);
}

// ---------------------------------------------------------------------
// finishing sequence, wire-exact
// ---------------------------------------------------------------------

#[test]
fn finishing_sends_one_terminal_blank_row_then_one_flush() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    let script = ScriptedTransport::new(&[
        CNF_INFO_V6,
        CNF_INIT_OK,
        IND_STATE_READY,
        CNF_START_OK,
        &[0x82, 0],
        &[0x82, 1],
        &[0x82, 2],
        &[0x82, 3],
        CNF_INFO_V6, // flush echo
    ]);
    control.install_transport(Box::new(script));

    let mut outputs = Vec::new();
    for _ in 0..16 {
        outputs.push(control.operate());
        if control.state() == State::Finished {
            break;
        }
    }
    assert_eq!(outputs.last(), Some(&Output::KnittingFinished));
    assert_eq!(
        outputs
            .iter()
            .filter(|&&o| o == Output::DisconnectingFromMachine)
            .count(),
        1
    );
    assert_eq!(
        outputs.iter().filter(|&&o| o == Output::NextLine).count(),
        3
    );
}

#[test]
fn wire_traffic_of_a_complete_session() {
    init_tracing();
    let mut control = started_control(Mode::Singlebed, "simulation");
    let script = ScriptedTransport::new(&[
        CNF_INFO_V6,
        CNF_INIT_OK,
        IND_STATE_READY,
        CNF_START_OK,
        &[0x82, 0],
        &[0x82, 1],
        &[0x82, 2],
        &[0x82, 3],
        CNF_INFO_V6,
    ]);
    let tx = script.tx_log();
    control.install_transport(Box::new(script));

    for _ in 0..16 {
        control.operate();
        if control.state() == State::Finished {
            break;
        }
    }
    assert_eq!(control.state(), State::Finished);

    let sent = sent_frames(&tx);

    // reqStart over needles 0..=199 with the beeper enabled
    assert_eq!(sent[0], checksummed(vec![0x01, 0, 199, 2]));

    // three pattern lines, then exactly one terminal blank line
    let lines: Vec<&Vec<u8>> = sent.iter().filter(|f| f[0] == 0x42).collect();
    assert_eq!(lines.len(), 4);
    for (i, line) in lines.iter().take(3).enumerate() {
        assert_eq!(line[1] as usize, i); // echoed line number
        assert_eq!(line[3], 0); // never terminal during the run
    }
    let last = lines[3];
    assert_eq!(last[3], 1);
    assert!(last[4..29].iter().all(|&b| b == 0));
    assert_eq!(*last.last().unwrap(), crc8_maxim(&last[..last.len() - 1]));

    // first knit line: pattern row 0 in the leftmost 40 needles
    let first = lines[0];
    assert_eq!(&first[4..9], &[0xFF; 5]);
    assert!(first[9..29].iter().all(|&b| b == 0));

    // exactly one flush request, after the terminal line
    let flushes: Vec<usize> = sent
        .iter()
        .enumerate()
        .filter(|(_, f)| f[0] == 0x03)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0], sent.len() - 1);
}

// ---------------------------------------------------------------------
// simulated end-to-end sessions
// ---------------------------------------------------------------------

#[test]
fn simulated_knit_session_runs_to_completion() {
    init_tracing();
    let mut control = started_control(Mode::Singlebed, "simulation");
    let cancel = AtomicBool::new(false);

    let mut outputs = Vec::new();
    let mut status_events = 0usize;
    let last = engine::run(&mut control, &cancel, |output, events| {
        outputs.push(output);
        status_events += events
            .iter()
            .filter(|e| matches!(e, Event::Status(_)))
            .count();
    });

    assert_eq!(last, Output::KnittingFinished);
    assert_eq!(control.state(), State::Finished);
    assert!(outputs.contains(&Output::ConnectingToMachine));
    assert!(outputs.contains(&Output::PleaseKnit));
    assert_eq!(
        outputs.iter().filter(|&&o| o == Output::NextLine).count(),
        3
    );
    assert!(status_events >= 3);
    assert_eq!(control.status().line_number, Some(2));
    assert_eq!(control.status().current_row, Some(3));
}

#[test]
fn simulated_multicolor_session_counts_passes() {
    let config = SessionConfig {
        mode: Mode::ClassicRibber,
        num_colors: 3,
        alignment: Alignment::Left,
        portname: "simulation".to_string(),
        ..SessionConfig::default()
    };
    let mut pixels = vec![1u8; 40 * 3];
    for p in pixels.iter_mut().take(40) {
        *p = 0;
    }
    pixels[45] = 2;
    let bitmap = Bitmap::new(40, 3, pixels, vec![0xFFFFFF, 0x000000, 0xFF0000]).unwrap();
    let pattern = engine::configure_pattern(bitmap, &config);
    let mut control = Control::new();
    control.start(Some(pattern), &config, Operation::Knit);

    let cancel = AtomicBool::new(false);
    let mut next_lines = 0usize;
    let last = engine::run(&mut control, &cancel, |output, _| {
        if output == Output::NextLine {
            next_lines += 1;
        }
    });

    // 2 * 3 colors passes per row, 3 rows
    assert_eq!(last, Output::KnittingFinished);
    assert_eq!(next_lines, 18);
}

#[test]
fn infinite_repeat_wraps_the_line_counter_blocks() {
    let config = SessionConfig {
        mode: Mode::Singlebed,
        inf_repeat: true,
        alignment: Alignment::Left,
        portname: "simulation".to_string(),
        ..SessionConfig::default()
    };
    let pattern = engine::configure_pattern(test_bitmap(), &config);
    let mut control = Control::new();
    control.start(Some(pattern), &config, Operation::Knit);

    let mut reached = false;
    for _ in 0..5000 {
        control.operate();
        if control.status().line_number >= Some(300) {
            reached = true;
            break;
        }
    }
    assert!(reached, "line counter never crossed a block boundary");
    assert_eq!(control.state(), State::RunKnit);
    assert!(control.status().repeats >= Some(1));
    control.stop();
}

#[test]
fn cancelled_session_tears_down_promptly() {
    let mut control = started_control(Mode::Singlebed, "simulation");
    let cancel = AtomicBool::new(true);
    engine::run(&mut control, &cancel, |_, _| {});
    assert_ne!(control.state(), State::RunKnit);
}

// ---------------------------------------------------------------------
// hardware test path
// ---------------------------------------------------------------------

#[test]
fn hardware_test_session_forwards_console_output() {
    let config = SessionConfig {
        portname: "simulation".to_string(),
        ..SessionConfig::default()
    };
    let mut control = Control::new();
    control.start(None, &config, Operation::Test);

    let mut console = String::new();
    for _ in 0..40 {
        control.operate();
        for event in control.take_events() {
            if let Event::TestOutput(text) = event {
                console.push_str(&text);
            }
        }
        if control.state() == State::RunTest && console.contains("help") {
            break;
        }
    }
    assert_eq!(control.state(), State::RunTest);
    assert!(console.contains("The following commands are available"));

    control.send_test_command(Token::BeepCmd, &[]).unwrap();
    let mut saw_beep = false;
    for _ in 0..10 {
        control.operate();
        for event in control.take_events() {
            if let Event::TestOutput(text) = event {
                if text.contains("Called beep") {
                    saw_beep = true;
                }
            }
        }
        if saw_beep {
            break;
        }
    }
    assert!(saw_beep);

    control.send_test_command(Token::QuitCmd, &[]).unwrap();
    assert_eq!(control.state(), State::Finished);
}

#[test]
fn non_test_commands_are_rejected() {
    let mut control = Control::new();
    let err = control.send_test_command(Token::ReqStart, &[]).unwrap_err();
    assert!(err.to_string().contains("hardware-test"));
}
