//! # LibreKnit Core Library
//!
//! Core functionality for the LibreKnit knitting machine control software.
//!
//! This library provides:
//! - The framed serial protocol spoken by the machine controller
//! - A poll-driven session state machine for pattern transfer and
//!   hardware testing
//! - Line sequencing for the supported knitting topologies
//! - Pattern quantization and needle placement
//! - A simulated machine for development and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use libreknit_core::engine::{self, Control, Operation, SessionConfig};
//! use libreknit_core::pattern::Bitmap;
//!
//! let config = SessionConfig {
//!     portname: "/dev/ttyACM0".to_string(),
//!     ..SessionConfig::default()
//! };
//! let bitmap = Bitmap::new(width, height, pixels, palette).unwrap();
//! let pattern = engine::configure_pattern(bitmap, &config);
//!
//! let mut control = Control::new();
//! control.start(Some(pattern), &config, Operation::Knit);
//! let cancel = std::sync::atomic::AtomicBool::new(false);
//! engine::run(&mut control, &cancel, |output, _events| {
//!     if let Some(message) = output.message() {
//!         println!("{message}");
//!     }
//! });
//! ```

#![warn(missing_docs)]

pub mod engine;
pub mod machine;
pub mod pattern;
pub mod protocol;
pub mod simulator;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::engine::{
        Control, Event, Mode, Operation, Output, SessionConfig, State, Status,
    };
    pub use crate::machine::Machine;
    pub use crate::pattern::{Alignment, Bitmap, Pattern};
    pub use crate::protocol::{PortSpec, ProtocolError, Token, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
