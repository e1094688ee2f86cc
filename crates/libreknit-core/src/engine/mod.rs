//! Knit engine
//!
//! The session driver ([`Control`]), its state machine, the line sequencer
//! and the observer-facing status/output types. The engine is synchronous
//! and cooperative: an external loop calls [`Control::operate`] once per
//! poll iteration and checks for cancellation in between.

mod config;
mod control;
mod fsm;
pub mod mode;
mod output;
pub mod status;

pub use config::SessionConfig;
pub use control::{Control, BLOCK_LENGTH, COLOR_SYMBOLS};
pub use fsm::{Operation, State};
pub use mode::{LineSpec, Mode, Sequencer};
pub use output::{Event, Output};
pub use status::{Carriage, Direction, FirmwareVersion, Status};

use std::sync::atomic::{AtomicBool, Ordering};

use crate::pattern::{Bitmap, Pattern};

/// Build a pattern the way a session expects it: quantized to the
/// configured color count, clipped to the knit window, and aligned.
pub fn configure_pattern(bitmap: Bitmap, config: &SessionConfig) -> Pattern {
    let mut pattern = Pattern::new(bitmap, config.machine, config.mode, config.num_colors);
    pattern.set_knit_needles(config.start_needle, config.stop_needle);
    pattern.set_alignment(config.alignment);
    pattern
}

/// Drive a started session to completion.
///
/// Calls [`Control::operate`] in a loop, handing every output and the
/// events it produced to `notify`, until the session reaches
/// [`State::Finished`], an output the caller must abort on arrives, or
/// `cancel` is set. The transport is torn down before returning.
pub fn run(
    control: &mut Control,
    cancel: &AtomicBool,
    mut notify: impl FnMut(Output, Vec<Event>),
) -> Output {
    let mut last = Output::None;
    loop {
        let output = control.operate();
        let events = control.take_events();
        if output != Output::None || !events.is_empty() {
            notify(output, events);
        }
        if output != Output::None {
            last = output;
        }
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("session cancelled");
            break;
        }
        if control.state() == State::Finished || output.is_error() {
            break;
        }
    }
    control.stop();
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::pattern::Alignment;

    #[test]
    fn test_configure_pattern_applies_window_and_alignment() {
        let bitmap = Bitmap::filled(40, 3, 0, vec![0xFFFFFF, 0x000000]).unwrap();
        let config = SessionConfig {
            machine: Machine::Kh910Kh950i,
            alignment: Alignment::Left,
            start_needle: 20,
            stop_needle: 179,
            ..SessionConfig::default()
        };
        let pattern = configure_pattern(bitmap, &config);
        assert_eq!(pattern.knit_start_needle(), 20);
        assert_eq!(pattern.knit_end_needle(), 180);
        assert_eq!(pattern.pat_start_needle(), 20);
    }

    #[test]
    fn test_run_stops_immediately_when_cancelled() {
        let mut control = Control::new();
        let cancel = AtomicBool::new(true);
        let output = run(&mut control, &cancel, |_, _| {});
        assert_eq!(output, Output::None);
        assert_eq!(control.state(), State::Finished);
    }
}
