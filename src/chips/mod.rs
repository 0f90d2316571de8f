//! Per-chip clock-tree synthesizer and fanout-buffer drivers (C4).
//!
//! Each submodule owns its chip's constraint solver and register
//! emission; all of them share the same output-request/solution shapes
//! and the [`State`] machine below.

pub mod lmk05318;
pub mod lmk1204;
pub mod lmk1214;
pub mod lmk5c33216;
pub mod lmx2820;

use crate::error::{ErrorKind, Result};

/// Output signal format. `Off` disables the port entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Lvds,
    Cml,
    LvPecl,
    Lvcmos,
    Off,
}

/// Which PLL (or either) an output port is allowed to be routed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Affinity {
    Any,
    Primary,
    Secondary,
}

/// A requested clock output.
#[derive(Clone, Copy, Debug)]
pub struct OutputRequest {
    pub port: usize,
    /// Desired frequency in Hz. Zero means the port is unused.
    pub freq_hz: u64,
    pub tolerance_minus_hz: u64,
    pub tolerance_plus_hz: u64,
    pub format: OutputFormat,
    pub invert: bool,
    pub affinity: Affinity,
}

impl OutputRequest {
    pub fn is_unused(&self) -> bool {
        self.freq_hz == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.format == OutputFormat::Lvcmos && !Self::port_supports_single_ended(self.port) {
            return Err(ErrorKind::InvalidArgument(format!(
                "port {} does not support single-ended (CMOS) drive",
                self.port
            ))
            .into());
        }
        Ok(())
    }

    fn port_supports_single_ended(_port: usize) -> bool {
        // Every port on the chips in this family supports LVCMOS; chips
        // that restrict it override this in their own prevalidation.
        true
    }
}

/// Which internal source a solved port was routed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MuxSource {
    Primary,
    PrimaryInverted,
    SecondaryPostDiv1,
    SecondaryPostDiv2,
}

/// The solved half of an output port: how it was built and the exact
/// frequency that results.
#[derive(Clone, Copy, Debug)]
pub struct OutputSolution {
    pub mux: MuxSource,
    pub output_div: u64,
    pub exact_freq_hz: u64,
}

impl OutputSolution {
    /// True when the exact frequency falls within the request's
    /// tolerance window.
    pub fn within_tolerance(&self, request: &OutputRequest) -> bool {
        let lo = request.freq_hz.saturating_sub(request.tolerance_minus_hz);
        let hi = request.freq_hz + request.tolerance_plus_hz;
        self.exact_freq_hz >= lo && self.exact_freq_hz <= hi
    }
}

/// Per-chip programming state machine. A solver failure at any step
/// returns to `Uninit` and reports which constraint failed; transitions
/// are otherwise linear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Uninit,
    XoConfigured,
    Apll1Tuned,
    Apll2Tuned,
    OutputsRouted,
    Locked,
}

/// Raw lock-status bits decoded into a readable flag list for
/// post-mortem diagnostics when a lock-wait times out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockStatus {
    pub primary_locked: bool,
    pub secondary_locked: bool,
    pub reference_valid: bool,
}

impl LockStatus {
    pub fn decode(raw: u8) -> Self {
        Self {
            primary_locked: raw & 0x01 != 0,
            secondary_locked: raw & 0x02 != 0,
            reference_valid: raw & 0x04 != 0,
        }
    }

    pub fn all_locked(&self) -> bool {
        self.primary_locked && self.secondary_locked
    }

    pub fn describe(&self) -> String {
        format!(
            "primary_locked={} secondary_locked={} reference_valid={}",
            self.primary_locked, self.secondary_locked, self.reference_valid
        )
    }
}
