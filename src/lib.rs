//!
//! A platform-agnostic driver for the HLW8012 pulse-output power monitoring chip. Built using embedded-hal.
//!
//! The HLW8012 (found in the Sonoff POW and many other smart plugs) encodes active power as a
//! pulse frequency on its CF pin and, alternately, RMS current or voltage on CF1, multiplexed by
//! the SEL line. This driver captures those pulses either through platform edge interrupts (via
//! [`EdgeCapture::on_power_edge`] and [`EdgeCapture::on_shared_edge`]) or by blocking polling,
//! converts them into calibrated readings, and accumulates energy from the CF pulse total.
//!

#![cfg_attr(not(feature = "std"), no_std)]

pub mod calibration;
pub mod capture;
pub mod driver;
pub mod estimator;
pub mod platform;

pub use calibration::Multipliers;
pub use capture::{EdgeCapture, Mode};
pub use driver::*;
pub use estimator::{Adaptive, ClosedWindow, WidthEstimator};
pub use platform::{Clock, FastDigitalLine};
