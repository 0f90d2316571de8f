//! Register-level drivers and clock-tree solvers for fractional-N
//! PLL/synthesizer and fanout chips used in software-defined-radio
//! front ends, plus the RF calibration routines (LO leakage, I/Q
//! imbalance) that run once a clock tree is locked.

pub mod bus;
pub mod calibration;
pub mod chips;
pub mod error;
pub mod optimize;
pub mod regmap;

pub use error::{Error, ErrorKind, Result};
