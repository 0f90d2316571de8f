//! LMK1214: same clk_mux solve structure as [`super::lmk1204`], fitted to
//! this package's narrower multiplier ratio ceiling.

use log::debug;

use crate::error::{ErrorKind, Result};
use crate::chips::lmk1204::{ClkMux, FanoutRequest, FanoutSolution};

const CLKIN_MIN_HZ: f64 = 1_000_000.0;
const CLKIN_MAX_HZ: f64 = 12_800_000_000.0;

const CLKOUT_MIN_DIV_HZ: f64 = 1_000_000.0;
const CLKOUT_MAX_DIV_HZ: f64 = 6_400_000_000.0;
const CLKOUT_MIN_MUL_HZ: f64 = 1_000_000.0;
const CLKOUT_MAX_MUL_HZ: f64 = 3_200_000_000.0;
const CLKOUT_MIN_BUF_HZ: f64 = 1_000_000.0;
const CLKOUT_MAX_BUF_HZ: f64 = 12_800_000_000.0;

const CLK_DIV_MIN: u32 = 1;
const CLK_DIV_MAX: u32 = 8;
const CLK_MULT_MIN: u32 = 2;
const CLK_MULT_MAX: u32 = 4;

const FREQ_EPS_HZ: f64 = 1.0;

/// Identical mode-selection logic to the LMK1204's `solve`, reproduced
/// here because the two chips use different frequency windows and
/// multiplier ceilings rather than sharing a generic parameterization.
pub fn solve(req: &FanoutRequest) -> Result<FanoutSolution> {
    if req.clkin_hz < CLKIN_MIN_HZ || req.clkin_hz > CLKIN_MAX_HZ {
        return Err(ErrorKind::OutOfRange(
            "LMK1214 CLKIN".into(),
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
            "LMK1214 CLKOUT".into(),
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
                    "LMK1214 divider ratio".into(),
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
                    "LMK1214 multiplier ratio".into(),
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
            "LMK1214: calculated CLKOUT {:.4} too far from requested {:.4}",
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
                "LMK1214: exact mode requires clkin/clkout to divide evenly".into(),
            )
            .into());
        }
    }

    debug!(
        "LMK1214 solved: mux={:?} ratio={} clkout={:.4}",
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
    fn multiplier_ratio_above_lmk1214_ceiling_is_rejected() {
        let req = FanoutRequest {
            clkin_hz: 100_000_000.0,
            clkout_hz: 800_000_000.0,
            prefer_filtering: false,
            exact_mode: true,
        };
        assert!(solve(&req).is_err());
    }

    #[test]
    fn multiplier_within_lmk1214_ceiling_succeeds() {
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
}
