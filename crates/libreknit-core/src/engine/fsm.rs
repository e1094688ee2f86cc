//! Session state machine
//!
//! Each method is one step of the finite state machine governing
//! communication with the controller, dispatched by [`Control::operate`].
//! Every step performs at most one bounded-timeout read and returns
//! promptly, so the driving loop stays responsive to cancellation.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::control::Control;
use super::output::Output;
use crate::protocol::transport::PortSpec;
use crate::protocol::{
    ProtocolError, SerialTransport, SlipDecoder, TcpTransport, Token, Transport,
    FIRST_SUPPORTED_API_VERSION,
};
use crate::simulator::{HardwareTestSimulator, MachineSimulator};

/// Resend window for pending handshake requests.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// What the session is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    /// Transfer a pattern to the machine
    Knit,
    /// Interactive hardware test console
    Test,
}

/// Handshake/transfer states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    /// Opening the transport
    Connect,
    /// Waiting for the firmware information reply
    VersionCheck,
    /// Waiting for the firmware initialization reply
    Init,
    /// Waiting for the machine to be armed by the operator
    RequestStart,
    /// Waiting for the start confirmation
    ConfirmStart,
    /// Answering line requests
    RunKnit,
    /// Requesting hardware-test mode
    RequestTest,
    /// Waiting for the hardware-test confirmation
    ConfirmTest,
    /// Forwarding hardware-test console traffic
    RunTest,
    /// Sending the terminal blank line and flushing
    Finishing,
    /// Waiting for the flush reply before closing
    Disconnect,
    /// Terminal
    Finished,
}

impl Control {
    /// Drive the state machine one step. Call repeatedly from a poll loop;
    /// each call returns one [`Output`] for the presentation layer.
    pub fn operate(&mut self) -> Output {
        let state_before = self.state;
        let step = match self.state {
            State::Connect => self.step_connect(),
            State::VersionCheck => self.step_version_check(),
            State::Init => self.step_init(),
            State::RequestStart => self.step_request_start(),
            State::ConfirmStart => self.step_confirm_start(),
            State::RunKnit => self.step_run_knit(),
            State::RequestTest => self.step_request_test(),
            State::ConfirmTest => self.step_confirm_test(),
            State::RunTest => self.step_run_test(),
            State::Finishing => self.step_finishing(),
            State::Disconnect => self.step_disconnect(),
            State::Finished => Ok(Output::None),
        };
        if self.state != state_before {
            // a fresh state resends its pending request immediately
            self.last_retry = None;
        }
        step.unwrap_or_else(|err| self.abort(err))
    }

    /// Terminate the session on a transport or protocol error.
    fn abort(&mut self, err: ProtocolError) -> Output {
        tracing::error!("session aborted: {err}");
        self.stop();
        self.state = State::Finished;
        match err {
            ProtocolError::LineOutOfSequence { .. } => Output::ErrorLineSequence,
            _ => Output::ErrorSerialPort,
        }
    }

    /// Throttle handshake resends to one per retry window.
    fn should_retry(&mut self) -> bool {
        let now = Instant::now();
        match self.last_retry {
            Some(last) if now.duration_since(last) < RETRY_INTERVAL => false,
            _ => {
                self.last_retry = Some(now);
                true
            }
        }
    }

    fn open_transport(&mut self) -> Result<Box<dyn Transport>, ProtocolError> {
        match PortSpec::parse(&self.portname)? {
            PortSpec::Simulation => {
                let transport: Box<dyn Transport> = match self.operation {
                    Operation::Knit => Box::new(MachineSimulator::new()),
                    Operation::Test => Box::new(HardwareTestSimulator::new()),
                };
                Ok(transport)
            }
            PortSpec::Serial(name) => Ok(Box::new(SerialTransport::open(&name)?)),
            PortSpec::Tunnel(host, port) => Ok(Box::new(TcpTransport::connect(&host, port)?)),
        }
    }

    fn step_connect(&mut self) -> Result<Output, ProtocolError> {
        tracing::debug!("state CONNECT");
        if self.operation == Operation::Knit {
            if self.pattern.is_none() {
                tracing::error!("no pattern to knit");
                self.state = State::Finished;
                return Ok(Output::ErrorInvalidSettings);
            }
            if !self.mode.good_ncolors(self.num_colors) {
                tracing::error!(
                    colors = self.num_colors,
                    mode = ?self.mode,
                    "wrong number of colors for the knitting mode"
                );
                self.state = State::Finished;
                return Ok(Output::ErrorInvalidSettings);
            }
        }

        if self.transport.is_none() {
            tracing::debug!(port = %self.portname, "opening transport");
            match self.open_transport() {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.decoder = SlipDecoder::new();
                }
                Err(e) => {
                    tracing::error!("could not open port: {e}");
                    self.state = State::Finished;
                    return Ok(Output::ErrorSerialPort);
                }
            }
        }

        self.state = State::VersionCheck;
        tracing::debug!("state VERSION_CHECK");
        Ok(Output::None)
    }

    fn step_version_check(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::CnfInfo) {
            if param >= FIRST_SUPPORTED_API_VERSION {
                self.api_version = param;
                self.status.api_version = Some(param);
                self.state = State::Init;
                tracing::debug!("state INIT");
                return Ok(Output::None);
            }
            tracing::error!(
                got = param,
                expected = FIRST_SUPPORTED_API_VERSION,
                "wrong API version"
            );
            return Ok(Output::ErrorWrongApi);
        }
        if self.should_retry() {
            self.req_info()?;
        }
        Ok(Output::ConnectingToMachine)
    }

    fn step_init(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::CnfInit) {
            if param == 0 {
                if self.operation == Operation::Test {
                    self.state = State::RequestTest;
                    tracing::debug!("state REQUEST_TEST");
                } else {
                    self.state = State::RequestStart;
                    tracing::debug!("state REQUEST_START");
                }
                return Ok(Output::None);
            }
            tracing::error!(code = param, "error initializing firmware");
            return Ok(Output::ErrorInitializingFirmware);
        }
        if self.should_retry() {
            self.req_init()?;
        }
        Ok(Output::InitializingFirmware)
    }

    fn step_request_start(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::IndState) {
            if param == 0 {
                // the carriage is armed: this position and direction become
                // the reference frame for later direction inference
                self.initial_carriage = self.status.carriage_type;
                self.initial_position = self.status.carriage_position;
                self.initial_direction = self.status.carriage_direction;
                tracing::debug!(
                    carriage = ?self.initial_carriage,
                    position = ?self.initial_position,
                    direction = ?self.initial_direction,
                    "recorded carriage reference frame"
                );
                self.status.active = self.continuous_reporting;

                let (start_needle, stop_needle) = match self.pattern.as_ref() {
                    Some(pattern) => (
                        pattern.knit_start_needle() as u8,
                        (pattern.knit_end_needle() - 1) as u8,
                    ),
                    None => (0, (self.machine.width() - 1) as u8),
                };
                self.req_start(start_needle, stop_needle)?;
                self.state = State::ConfirmStart;
                tracing::debug!("state CONFIRM_START");
            } else {
                tracing::debug!(
                    code = param,
                    firmware_state = ?self.status.firmware_state,
                    "knit init failed"
                );
            }
        }
        Ok(Output::WaitForInit)
    }

    fn step_confirm_start(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::CnfStart) {
            if param == 0 {
                self.state = State::RunKnit;
                tracing::debug!("state RUN_KNIT");
                return Ok(Output::PleaseKnit);
            }
            // recoverable: the operator can rearm the machine and the next
            // indState/cnfStart round can succeed
            tracing::error!(code = param, "device not ready");
            return Ok(Output::DeviceNotReady);
        }
        Ok(Output::None)
    }

    fn step_run_knit(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::ReqLine) {
            let pattern_finished = self.handle_line_request(param)?;
            if pattern_finished {
                self.state = State::Finishing;
                tracing::debug!("state FINISHING");
            }
            return Ok(Output::NextLine);
        }
        Ok(Output::None)
    }

    fn step_request_test(&mut self) -> Result<Output, ProtocolError> {
        self.req_test()?;
        self.state = State::ConfirmTest;
        tracing::debug!("state CONFIRM_TEST");
        Ok(Output::None)
    }

    fn step_confirm_test(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::CnfTest) {
            if param == 0 {
                self.state = State::RunTest;
                tracing::debug!("state RUN_TEST");
                return Ok(Output::None);
            }
            tracing::error!(code = param, "device not ready");
            return Ok(Output::DeviceNotReady);
        }
        Ok(Output::None)
    }

    fn step_run_test(&mut self) -> Result<Output, ProtocolError> {
        // incoming testRes messages become console events in check_serial
        self.check_serial()?;
        Ok(Output::None)
    }

    fn step_finishing(&mut self) -> Result<Output, ProtocolError> {
        let (token, param) = self.check_serial()?;
        if token == Some(Token::ReqLine) {
            self.cnf_final_line(param)?;

            // The last bytes written can be dropped by the OS if the port
            // closes right after the final cnfLine, leaving the firmware
            // stuck on the previous row. A reqInfo round-trip flushes the
            // link before the port is closed.
            self.req_info()?;
            self.state = State::Disconnect;
            tracing::debug!("state DISCONNECT");
            return Ok(Output::DisconnectingFromMachine);
        }
        Ok(Output::None)
    }

    fn step_disconnect(&mut self) -> Result<Output, ProtocolError> {
        let (token, _) = self.check_serial()?;
        if token == Some(Token::CnfInfo) {
            // the flush reply arrived; it is now safe to close the port
            self.state = State::Finished;
            tracing::debug!("state FINISHED");
            return Ok(Output::KnittingFinished);
        }
        Ok(Output::None)
    }
}
