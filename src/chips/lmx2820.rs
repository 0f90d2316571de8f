//! LMX2820 wideband PLL: picks an oscillator input chain (optional
//! doubler, multiplier, or R-dividers) that lands the phase-detector
//! frequency in range for a target VCO, then derives a matching pair of
//! RF output dividers for the A/B channels.

use log::{debug, warn};

use crate::error::{ErrorKind, Result};
use crate::optimize::binary_gcd;

const OSC_IN_MIN_HZ: u64 = 5_000_000;
const OSC_IN_MAX_HZ: u64 = 1_400_000_000;
const OSC_IN_MAX_DBLR_HZ: u64 = 250_000_000;

const OUT_FREQ_MIN_HZ: u64 = 45_000_000;
const OUT_FREQ_MAX_HZ: u64 = 22_600_000_000;

const VCO_MIN_HZ: u64 = 5_650_000_000;
const VCO_MAX_HZ: u64 = 11_300_000_000;

const PLL_R_PRE_DIV_MAX: u32 = 4095;
const PLL_R_DIV_MAX: u32 = 255;
const PLL_R_DIV_2_IN_FREQ_MAX_HZ: u64 = 500_000_000;
const PLL_R_DIV_GT2_IN_FREQ_MAX_HZ: u64 = 250_000_000;

const MULT_IN_FREQ_MIN_HZ: u64 = 30_000_000;
const MULT_IN_FREQ_MAX_HZ: u64 = 70_000_000;
const MULT_OUT_FREQ_MIN_HZ: u64 = 180_000_000;
const MULT_OUT_FREQ_MAX_HZ: u64 = 250_000_000;
const MULT_MIN: u32 = 3;
const MULT_MAX: u32 = 7;

const FPD_MIN_HZ: u64 = 5_000_000;

const OUT_DIV_LOG2_MIN: u8 = 1;
const OUT_DIV_LOG2_MAX: u8 = 7;
const OUT_DIV_DIAP_MAX: u8 = OUT_DIV_LOG2_MAX - OUT_DIV_LOG2_MIN + 1 + 1;

const PLL_N_MIN: u16 = 12;
const PLL_N_MAX: u16 = 32767;

const VCO_ACCURACY_HZ: f64 = 0.1;
const RF_ACCURACY_HZ: f64 = 1.0;

/// MASH order for the fractional divider. Higher orders push more of
/// the quantization noise out of band at the cost of a higher PLL_N
/// floor for a given VCO core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MashOrder {
    Integer,
    First,
    Second,
    Third,
}

impl MashOrder {
    fn index(self) -> usize {
        match self {
            MashOrder::Integer => 0,
            MashOrder::First => 1,
            MashOrder::Second => 2,
            MashOrder::Third => 3,
        }
    }
}

/// `(freq_min, freq_max)` and per-MASH-order minimum PLL_N for each of
/// the chip's seven overlapping VCO sub-bands.
const VCO_CORES: [(u64, u64, [u16; 4]); 7] = [
    (VCO_MIN_HZ, 6_350_000_000, [12, 18, 19, 24]),
    (6_350_000_000, 7_300_000_000, [14, 21, 22, 26]),
    (7_300_000_000, 8_100_000_000, [16, 23, 24, 26]),
    (8_100_000_000, 9_000_000_000, [16, 26, 27, 29]),
    (9_000_000_000, 9_800_000_000, [18, 28, 29, 31]),
    (9_800_000_000, 10_600_000_000, [18, 30, 31, 33]),
    (10_600_000_000, VCO_MAX_HZ + 1, [20, 33, 34, 36]),
];

const FPD_MAX_BY_MASH: [u64; 4] = [400_000_000, 300_000_000, 300_000_000, 250_000_000];

fn worst_vco_core(vco_hz: u64, mash_order: MashOrder) -> Result<(u32, u16)> {
    if vco_hz < VCO_MIN_HZ || vco_hz > VCO_MAX_HZ {
        return Err(ErrorKind::OutOfRange(
            "LMX2820 VCO".into(),
            vco_hz as i64,
            VCO_MIN_HZ as i64,
            VCO_MAX_HZ as i64,
        )
        .into());
    }
    for (i, (lo, hi, ndiv_min)) in VCO_CORES.iter().enumerate() {
        if vco_hz >= *lo && vco_hz < *hi {
            return Ok((i as u32 + 1, ndiv_min[mash_order.index()]));
        }
    }
    unreachable!("VCO_CORES covers [VCO_MIN_HZ, VCO_MAX_HZ] with no gaps")
}

/// Oscillator-input-chain solution: doubler/multiplier/pre-divider/R
/// settings plus the resulting phase-detector and VCO frequencies.
#[derive(Clone, Copy, Debug)]
pub struct InputChain {
    pub vco_core: u32,
    pub osc_doubled: bool,
    pub pll_r_pre: u32,
    pub mult: u32,
    pub pll_r: u32,
    pub pll_n: u16,
    pub pll_num: u32,
    pub pll_den: u32,
    pub fpd_hz: u64,
    pub fvco_hz: f64,
}

/// Solve the oscillator input chain that drives `vco_hz` from
/// `fosc_in_hz`, picking a doubler, multiplier, or pre/R-divider path
/// as needed to land the phase-detector frequency in range.
pub fn calculate_input_chain(
    fosc_in_hz: u64,
    vco_hz: u64,
    mash_order: MashOrder,
    force_mult: Option<u32>,
) -> Result<InputChain> {
    let (vco_core, min_pll_n) = worst_vco_core(vco_hz, mash_order)?;

    let min_n_total = min_pll_n as f64;
    let max_n_total = (PLL_N_MAX as f64) + 1.0;

    let mut fpd_max = FPD_MAX_BY_MASH[mash_order.index()];
    let mut fpd_min = FPD_MIN_HZ;
    fpd_max = fpd_max.min((vco_hz as f64 / min_n_total) as u64);
    fpd_min = fpd_min.max((vco_hz as f64 / max_n_total) as u64);

    let need_mult = fosc_in_hz < fpd_min || force_mult.is_some();
    let osc_doubled = fosc_in_hz <= OSC_IN_MAX_DBLR_HZ && !need_mult;
    let osc_in = fosc_in_hz * if osc_doubled { 2 } else { 1 };
    debug!(
        "LMX2820 input chain: osc_doubled={} osc_in={}",
        osc_doubled, osc_in
    );

    let mult: u32;
    let pll_r_pre: u32;
    let mut pll_r: u32;

    if osc_in < fpd_min || force_mult.is_some() {
        let mut m = force_mult.unwrap_or_else(|| {
            ((fpd_min as f64) / (osc_in as f64)).ceil() as u32
        });
        m = m.max(MULT_MIN);
        if m > MULT_MAX {
            return Err(
                ErrorKind::NoSolution(format!("LMX2820 multiplier {} out of range", m)).into(),
            );
        }

        let mut pre = 1u32;
        if osc_in < MULT_IN_FREQ_MIN_HZ {
            return Err(ErrorKind::OutOfRange(
                "LMX2820 OSC_IN for multiplier path".into(),
                osc_in as i64,
                MULT_IN_FREQ_MIN_HZ as i64,
                MULT_IN_FREQ_MAX_HZ as i64,
            )
            .into());
        }
        if osc_in > MULT_IN_FREQ_MAX_HZ {
            pre = ((osc_in as f64) / (MULT_IN_FREQ_MAX_HZ as f64)).ceil() as u32;
        }

        let freq_pre = osc_in / pre as u64;
        let mut freq_mult = freq_pre * m as u64;

        while freq_mult < MULT_OUT_FREQ_MIN_HZ {
            if m == MULT_MAX {
                return Err(ErrorKind::NoSolution(
                    "LMX2820: cannot raise multiplier output into range".into(),
                )
                .into());
            }
            m += 1;
            freq_mult = freq_pre * m as u64;
            if freq_mult > MULT_OUT_FREQ_MAX_HZ {
                return Err(ErrorKind::NoSolution(
                    "LMX2820: multiplier output overshot range".into(),
                )
                .into());
            }
        }
        while freq_mult > MULT_OUT_FREQ_MAX_HZ {
            if m == MULT_MIN {
                return Err(ErrorKind::NoSolution(
                    "LMX2820: cannot lower multiplier output into range".into(),
                )
                .into());
            }
            m -= 1;
            freq_mult = freq_pre * m as u64;
            if freq_mult < MULT_OUT_FREQ_MIN_HZ {
                return Err(ErrorKind::NoSolution(
                    "LMX2820: multiplier output undershot range".into(),
                )
                .into());
            }
        }

        let mut r = 1u32;
        if freq_mult > fpd_max {
            r = ((freq_mult as f64) / (fpd_max as f64)).ceil() as u32;
        }

        mult = m;
        pll_r_pre = pre;
        pll_r = r;
    } else if osc_in > fpd_max {
        mult = 1;
        let div = ((osc_in as f64) / (fpd_max as f64)).ceil() as u32;
        if div > PLL_R_PRE_DIV_MAX * PLL_R_DIV_MAX {
            return Err(ErrorKind::NoSolution(
                "LMX2820: required R-divider exceeds chip limits".into(),
            )
            .into());
        }
        if div <= PLL_R_PRE_DIV_MAX {
            pll_r_pre = div;
            pll_r = 1;
        } else {
            pll_r_pre = PLL_R_PRE_DIV_MAX;
            pll_r = ((div as f64) / (PLL_R_PRE_DIV_MAX as f64)).ceil() as u32;
        }
    } else {
        mult = 1;
        pll_r_pre = 1;
        pll_r = 1;
    }

    if pll_r > PLL_R_DIV_MAX {
        return Err(ErrorKind::OutOfRange(
            "LMX2820 PLL_R".into(),
            pll_r as i64,
            1,
            PLL_R_DIV_MAX as i64,
        )
        .into());
    }
    let pll_r = pll_r;

    let f_in_pll_r = osc_in * mult as u64 / pll_r_pre as u64;
    let max_f_in_pll_r = if pll_r <= 2 {
        PLL_R_DIV_2_IN_FREQ_MAX_HZ
    } else {
        PLL_R_DIV_GT2_IN_FREQ_MAX_HZ
    };
    if f_in_pll_r > max_f_in_pll_r {
        return Err(ErrorKind::OutOfRange(
            "LMX2820 PLL_R input frequency".into(),
            f_in_pll_r as i64,
            0,
            max_f_in_pll_r as i64,
        )
        .into());
    }

    let fpd = ((osc_in as f64) * mult as f64 / (pll_r_pre as f64 * pll_r as f64) + 0.5) as u64;
    if fpd < fpd_min || fpd > fpd_max {
        return Err(ErrorKind::NoSolution(format!(
            "LMX2820: FPD {} out of range [{};{}]",
            fpd, fpd_min, fpd_max
        ))
        .into());
    }

    let n_total = vco_hz as f64 / fpd as f64;
    if n_total < min_n_total || n_total > max_n_total {
        return Err(ErrorKind::NoSolution(format!(
            "LMX2820: N_total {:.6} out of range [{:.0};{:.0})",
            n_total, min_n_total, max_n_total
        ))
        .into());
    }

    let pll_n = n_total as u16;
    let pll_frac = n_total - pll_n as f64;
    let pll_den: u32 = u32::MAX;
    let pll_num = (pll_frac * pll_den as f64) as u32;
    let fvco_hz = fpd as f64 * (pll_n as f64 + pll_num as f64 / pll_den as f64);

    let delta = (fvco_hz - vco_hz as f64).abs();
    if delta > VCO_ACCURACY_HZ {
        return Err(ErrorKind::NoSolution(format!(
            "LMX2820: VCO tuning too rough, deviation {:.4}Hz",
            delta
        ))
        .into());
    }
    if pll_n < PLL_N_MIN {
        return Err(ErrorKind::OutOfRange(
            "LMX2820 PLL_N".into(),
            pll_n as i64,
            PLL_N_MIN as i64,
            PLL_N_MAX as i64,
        )
        .into());
    }

    debug!(
        "LMX2820 input chain solved: core={} mult={} pll_r_pre={} pll_r={} pll_n={} fpd={} fvco={:.2}",
        vco_core, mult, pll_r_pre, pll_r, pll_n, fpd, fvco_hz
    );

    Ok(InputChain {
        vco_core,
        osc_doubled,
        pll_r_pre,
        mult,
        pll_r,
        pll_n,
        pll_num,
        pll_den,
        fpd_hz: fpd,
        fvco_hz,
    })
}

/// How an RF output channel is muxed from the VCO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutMux {
    VcoDoubler,
    Vco,
    ChannelDivider(u8),
}

#[derive(Clone, Copy, Debug)]
pub struct OutputChain {
    pub input_chain: InputChain,
    pub channel_a: ChannelSolution,
    pub channel_b: ChannelSolution,
}

#[derive(Clone, Copy, Debug)]
pub struct ChannelSolution {
    pub mux: OutMux,
    pub exact_freq_hz: f64,
}

/// Solve a VCO and pair of channel dividers/muxes that produce
/// `rfouta_hz` and `rfoutb_hz` simultaneously; their ratio must be a
/// power of two since both channels divide down from one VCO.
pub fn solve_outputs(
    fosc_in_hz: u64,
    mash_order: MashOrder,
    force_mult: Option<u32>,
    rfouta_hz: u64,
    rfoutb_hz: u64,
) -> Result<OutputChain> {
    if fosc_in_hz < OSC_IN_MIN_HZ || fosc_in_hz > OSC_IN_MAX_HZ {
        return Err(ErrorKind::OutOfRange(
            "LMX2820 OSC_IN".into(),
            fosc_in_hz as i64,
            OSC_IN_MIN_HZ as i64,
            OSC_IN_MAX_HZ as i64,
        )
        .into());
    }
    for (name, f) in [("RFOUTA", rfouta_hz), ("RFOUTB", rfoutb_hz)] {
        if f < OUT_FREQ_MIN_HZ || f > OUT_FREQ_MAX_HZ {
            return Err(ErrorKind::OutOfRange(
                format!("LMX2820 {}", name),
                f as i64,
                OUT_FREQ_MIN_HZ as i64,
                OUT_FREQ_MAX_HZ as i64,
            )
            .into());
        }
    }

    let (rf_max, rf_min, a_is_min) = if rfouta_hz > rfoutb_hz {
        (rfouta_hz, rfoutb_hz, false)
    } else {
        (rfoutb_hz, rfouta_hz, true)
    };

    let rf_ratio = (rf_max as f64 / rf_min as f64).log2();
    let rf_ratio_n = rf_ratio.round() as u8;
    if (rf_ratio - rf_ratio_n as f64).abs() > 1e-8 {
        return Err(ErrorKind::NoSolution("RFOUT A/B ratio must be a power of two".into()).into());
    }
    if rf_ratio_n > OUT_DIV_DIAP_MAX {
        return Err(
            ErrorKind::NoSolution(format!("RFOUT ratio {} out of range", rf_ratio_n)).into(),
        );
    }

    let vco: u64;
    let mux_max: OutMux;
    let mux_min: OutMux;

    if rf_max > VCO_MAX_HZ {
        vco = ((rf_max as f64) / 2.0 + 0.5) as u64;
        mux_max = OutMux::VcoDoubler;
        mux_min = match rf_ratio_n {
            0 => OutMux::VcoDoubler,
            1 => OutMux::Vco,
            n => OutMux::ChannelDivider(n - 1),
        };
    } else if rf_max < VCO_MIN_HZ {
        if rf_ratio_n > OUT_DIV_DIAP_MAX - 2 {
            return Err(
                ErrorKind::NoSolution(format!("RFOUT ratio {} out of range", rf_ratio_n)).into(),
            );
        }
        let probe_vco = (rf_max << OUT_DIV_LOG2_MIN).max(VCO_MIN_HZ);
        let div_max = ((probe_vco as f64 / rf_max as f64).log2().ceil() as u8).max(OUT_DIV_LOG2_MIN);
        let div_min = div_max + rf_ratio_n;
        if div_max < OUT_DIV_LOG2_MIN
            || div_max > OUT_DIV_LOG2_MAX
            || div_min < OUT_DIV_LOG2_MIN
            || div_min > OUT_DIV_LOG2_MAX
        {
            return Err(ErrorKind::NoSolution(format!(
                "LMX2820: cannot derive dividers for requested RF pair (div_min={} div_max={})",
                div_min, div_max
            ))
            .into());
        }
        if (div_min == OUT_DIV_LOG2_MAX || div_max == OUT_DIV_LOG2_MAX) && div_min != div_max {
            return Err(ErrorKind::NoSolution(
                "LMX2820: invalid divider configuration at the top of the divider range".into(),
            )
            .into());
        }
        vco = rf_max << div_max;
        mux_max = OutMux::ChannelDivider(div_max);
        mux_min = OutMux::ChannelDivider(div_min);
    } else {
        if rf_ratio_n > OUT_DIV_DIAP_MAX - 1 {
            return Err(
                ErrorKind::NoSolution(format!("RFOUT ratio {} out of range", rf_ratio_n)).into(),
            );
        }
        vco = rf_max;
        mux_max = OutMux::Vco;
        mux_min = match rf_ratio_n {
            0 => OutMux::Vco,
            n => OutMux::ChannelDivider(n),
        };
    }

    debug!("LMX2820 will tune for VCO={}", vco);
    let input_chain = calculate_input_chain(fosc_in_hz, vco, mash_order, force_mult)?;
    let fvco = input_chain.fvco_hz;

    let resolve = |mux: OutMux| -> f64 {
        match mux {
            OutMux::VcoDoubler => fvco * 2.0,
            OutMux::Vco => fvco,
            OutMux::ChannelDivider(div) => fvco / (1u64 << div) as f64,
        }
    };
    let rf_min_res = resolve(mux_min);
    let rf_max_res = resolve(mux_max);

    if (rf_min as f64 - rf_min_res).abs() > RF_ACCURACY_HZ
        || (rf_max as f64 - rf_max_res).abs() > RF_ACCURACY_HZ
    {
        return Err(ErrorKind::NoSolution("LMX2820: RF tuning too rough".into()).into());
    }

    let (min_sol, max_sol) = (
        ChannelSolution {
            mux: mux_min,
            exact_freq_hz: rf_min_res,
        },
        ChannelSolution {
            mux: mux_max,
            exact_freq_hz: rf_max_res,
        },
    );
    let (channel_a, channel_b) = if a_is_min {
        (min_sol, max_sol)
    } else {
        (max_sol, min_sol)
    };

    Ok(OutputChain {
        input_chain,
        channel_a,
        channel_b,
    })
}

/// Lock-detect status, polled over SPI after calibration starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockDetect {
    Locked,
    Unlocked,
    Invalid,
}

impl LockDetect {
    pub fn decode(raw: u16) -> Self {
        match raw & 0x3 {
            0b10 => LockDetect::Locked,
            0b01 => LockDetect::Invalid,
            _ => LockDetect::Unlocked,
        }
    }
}

/// Wait for the PLL to report lock, polling every 100us as the chip's
/// own driver does; `timeout` of zero waits forever.
pub fn wait_pll_lock<F>(mut read_status: F, timeout: std::time::Duration) -> Result<()>
where
    F: FnMut() -> Result<u16>,
{
    let start = std::time::Instant::now();
    loop {
        let status = LockDetect::decode(read_status()?);
        match status {
            LockDetect::Locked => return Ok(()),
            LockDetect::Invalid => {
                return Err(ErrorKind::LockTimeout("LMX2820 lock status invalid".into(), timeout)
                    .into())
            }
            LockDetect::Unlocked => {}
        }
        if !timeout.is_zero() && start.elapsed() >= timeout {
            warn!("LMX2820 lock wait timed out after {:?}", timeout);
            return Err(ErrorKind::LockTimeout("LMX2820".into(), timeout).into());
        }
        std::thread::sleep(std::time::Duration::from_micros(100));
    }
}

/// Reduce the fractional part of an input chain's N to lowest terms;
/// useful for register dumps and tests, not required for tuning.
pub fn reduced_frac(num: u32, den: u32) -> (u32, u32) {
    if num == 0 {
        return (0, 1);
    }
    let g = binary_gcd(num as u64, den as u64).max(1);
    ((num as u64 / g) as u32, (den as u64 / g) as u32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn worst_vco_core_picks_lowest_band_for_vco_min() {
        let (core, ndiv_min) = worst_vco_core(VCO_MIN_HZ, MashOrder::Integer).unwrap();
        assert_eq!(core, 1);
        assert_eq!(ndiv_min, 12);
    }

    #[test]
    fn input_chain_direct_feed_needs_no_mult_or_div() {
        // osc_in already sits inside [fpd_min, fpd_max] for this VCO/mash combo.
        let chain = calculate_input_chain(100_000_000, 10_000_000_000, MashOrder::Integer, None)
            .unwrap();
        assert_eq!(chain.mult, 1);
        assert_eq!(chain.pll_r_pre, 1);
        assert_eq!(chain.pll_r, 1);
        assert!((chain.fvco_hz - 10_000_000_000.0).abs() < VCO_ACCURACY_HZ);
    }

    #[test]
    fn input_chain_rejects_vco_out_of_range() {
        assert!(calculate_input_chain(100_000_000, VCO_MAX_HZ + 1, MashOrder::Integer, None).is_err());
    }

    #[test]
    fn solve_outputs_rejects_non_power_of_two_ratio() {
        let res = solve_outputs(100_000_000, MashOrder::Integer, None, 10_000_000_000, 3_000_000_000);
        assert!(res.is_err());
    }

    #[test]
    fn solve_outputs_handles_equal_channels_at_vco() {
        let out = solve_outputs(100_000_000, MashOrder::Integer, None, 10_000_000_000, 10_000_000_000)
            .unwrap();
        assert_eq!(out.channel_a.mux, OutMux::Vco);
        assert_eq!(out.channel_b.mux, OutMux::Vco);
    }

    #[test]
    fn lock_detect_decodes_locked_pattern() {
        assert_eq!(LockDetect::decode(0b10), LockDetect::Locked);
        assert_eq!(LockDetect::decode(0b01), LockDetect::Invalid);
        assert_eq!(LockDetect::decode(0b00), LockDetect::Unlocked);
    }

    #[test]
    fn reduced_frac_divides_by_gcd() {
        assert_eq!(reduced_frac(500, 1000), (1, 2));
    }
}
