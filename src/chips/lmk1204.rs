//! LMK1204/LMK1214 clock fanout buffers: a single mux picks buffer,
//! divider, or multiplier mode by comparing input to output frequency,
//! then the chosen integer ratio is prevalidated against the mode's
//! frequency window.

use log::debug;

use crate::error::{ErrorKind, Result};

const CLKIN_MIN_HZ: f64 = 1_000_000.0;
const CLKIN_MAX_HZ: f64 = 12_800_000_000.0;

const CLKOUT_MIN_DIV_HZ: f64 = 1_000_000.0;
const CLKOUT_MAX_DIV_HZ: f64 = 6_400_000_000.0;
const CLKOUT_MIN_MUL_HZ: f64 = 1_000_000.0;
const CLKOUT_MAX_MUL_HZ: f64 = 6_400_000_000.0;
const CLKOUT_MIN_BUF_HZ: f64 = 1_000_000.0;
const CLKOUT_MAX_BUF_HZ: f64 = 12_800_000_000.0;

const CLK_DIV_MIN: u32 = 1;
const CLK_DIV_MAX: u32 = 8;
const CLK_MULT_MIN: u32 = 2;
const CLK_MULT_MAX: u32 = 8;

const FREQ_EPS_HZ: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClkMux {
    Buffer,
    Divider,
    Multiplier,
}

/// Solver input: requested input/output frequencies and whether an
/// exact (non-rounded) ratio is required.
#[derive(Clone, Copy, Debug)]
pub struct FanoutRequest {
    pub clkin_hz: f64,
    pub clkout_hz: f64,
    /// When both directions are equally plausible (`clkin == clkout`),
    /// prefer multiplier mode's tighter jitter filtering over a plain
    /// buffer pass-through.
    pub prefer_filtering: bool,
    /// Reject any solution whose rounded ratio does not reproduce the
    /// input exactly (`clkin == clkout * ratio`).
    pub exact_mode: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FanoutSolution {
    pub mux: ClkMux,
    pub ratio: u32,
    pub exact_clkout_hz: f64,
}

/// Pick buffer/divider/multiplier mode and the integer ratio that best
/// matches the requested input/output pair, then validate both the
/// chosen mode's frequency window and the rounded ratio's fidelity.
pub fn solve(req: &FanoutRequest) -> Result<FanoutSolution> {
    if req.clkin_hz < CLKIN_MIN_HZ || req.clkin_hz > CLKIN_MAX_HZ {
        return Err(ErrorKind::OutOfRange(
            "LMK1204 CLKIN".into(),
            req.clkin_hz as i64,
            CLKIN_MIN_HZ as i64,
            CLKIN_MAX_HZ as i64,
        )
        .into());
    }

    let mux = if req.clkin_hz > req.clkout_hz {
        ClkMux::Divider
    } else if req.clkin_hz < req.clkout_hz {
        ClkMux::Multiplier
    } else if req.prefer_filtering {
        ClkMux::Multiplier
    } else {
        ClkMux::Buffer
    };

    let (fmin, fmax) = match mux {
        ClkMux::Divider => (CLKOUT_MIN_DIV_HZ, CLKOUT_MAX_DIV_HZ),
        ClkMux::Multiplier => (CLKOUT_MIN_MUL_HZ, CLKOUT_MAX_MUL_HZ),
        ClkMux::Buffer => (CLKOUT_MIN_BUF_HZ, CLKOUT_MAX_BUF_HZ),
    };
    if req.clkout_hz < fmin || req.clkout_hz > fmax {
        return Err(ErrorKind::OutOfRange(
            "LMK1204 CLKOUT".into(),
            req.clkout_hz as i64,
            fmin as i64,
            fmax as i64,
        )
        .into());
    }

    let (ratio, exact_clkout_hz) = match mux {
        ClkMux::Buffer => (1, req.clkin_hz),
        ClkMux::Divider => {
            let ratio = (req.clkin_hz / req.clkout_hz + 0.5) as u32;
            if ratio < CLK_DIV_MIN || ratio > CLK_DIV_MAX {
                return Err(ErrorKind::OutOfRange(
                    "LMK1204 divider ratio".into(),
                    ratio as i64,
                    CLK_DIV_MIN as i64,
                    CLK_DIV_MAX as i64,
                )
                .into());
            }
            (ratio, req.clkin_hz / ratio as f64)
        }
        ClkMux::Multiplier => {
            let ratio = (req.clkout_hz / req.clkin_hz + 0.5) as u32;
            if ratio < CLK_MULT_MIN || ratio > CLK_MULT_MAX {
                return Err(ErrorKind::OutOfRange(
                    "LMK1204 multiplier ratio".into(),
                    ratio as i64,
                    CLK_MULT_MIN as i64,
                    CLK_MULT_MAX as i64,
                )
                .into());
            }
            (ratio, req.clkin_hz * ratio as f64)
        }
    };

    if (exact_clkout_hz - req.clkout_hz).abs() > FREQ_EPS_HZ {
        return Err(ErrorKind::NoSolution(format!(
            "LMK1204: calculated CLKOUT {:.4} too far from requested {:.4}",
            exact_clkout_hz, req.clkout_hz
        ))
        .into());
    }

    if req.exact_mode {
        let reproduced = match mux {
            ClkMux::Divider => req.clkout_hz * ratio as f64 == req.clkin_hz,
            ClkMux::Multiplier => req.clkin_hz * ratio as f64 == req.clkout_hz,
            ClkMux::Buffer => true,
        };
        if !reproduced {
            return Err(ErrorKind::NoSolution(
                "LMK1204: exact mode requires clkin/clkout to divide evenly".into(),
            )
            .into());
        }
    }

    debug!(
        "LMK1204 solved: mux={:?} ratio={} clkout={:.4}",
        mux, ratio, exact_clkout_hz
    );

    Ok(FanoutSolution {
        mux,
        ratio,
        exact_clkout_hz,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn divider_mode_picked_when_clkin_exceeds_clkout() {
        let req = FanoutRequest {
            clkin_hz: 800_000_000.0,
            clkout_hz: 100_000_000.0,
            prefer_filtering: false,
            exact_mode: true,
        };
        let sol = solve(&req).unwrap();
        assert_eq!(sol.mux, ClkMux::Divider);
        assert_eq!(sol.ratio, 8);
    }

    #[test]
    fn multiplier_mode_picked_when_clkout_exceeds_clkin() {
        let req = FanoutRequest {
            clkin_hz: 100_000_000.0,
            clkout_hz: 400_000_000.0,
            prefer_filtering: false,
            exact_mode: true,
        };
        let sol = solve(&req).unwrap();
        assert_eq!(sol.mux, ClkMux::Multiplier);
        assert_eq!(sol.ratio, 4);
    }

    #[test]
    fn equal_frequencies_default_to_buffer_mode() {
        let req = FanoutRequest {
            clkin_hz: 100_000_000.0,
            clkout_hz: 100_000_000.0,
            prefer_filtering: false,
            exact_mode: true,
        };
        let sol = solve(&req).unwrap();
        assert_eq!(sol.mux, ClkMux::Buffer);
        assert_eq!(sol.ratio, 1);
    }

    #[test]
    fn divider_ratio_out_of_range_is_rejected() {
        let req = FanoutRequest {
            clkin_hz: 1_000_000_000.0,
            clkout_hz: 10_000_000.0,
            prefer_filtering: false,
            exact_mode: false,
        };
        assert!(solve(&req).is_err());
    }
}
