//! LMK05318 dual-APLL clock synthesizer: 8 outputs, a fixed-VCO primary
//! PLL (free-run or DPLL mode) feeding ports directly, and a secondary
//! PLL with two post-dividers (PD1/PD2) feeding the rest.

use log::{debug, warn};
use packed_struct::prelude::*;
use packed_struct_codegen::PackedStruct;

use crate::bus::RegisterBus;
use crate::chips::{Affinity, LockStatus, MuxSource, OutputRequest, OutputSolution, State};
use crate::error::{Error, ErrorKind, Result};
use crate::optimize::binary_gcd;
use crate::regmap::DeferredRegisterMap;

/// APLL2 post-divider select register (0x0102): PD1 and PD2, each
/// encoded as `value - 1` in a 3-bit nibble.
#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(size_bytes = "1", bit_numbering = "lsb0")]
struct Apll2PostDivReg {
    #[packed_field(bits = "0:2")]
    pd1_minus_one: Integer<u8, packed_bits::Bits3>,
    #[packed_field(bits = "3:5")]
    pd2_minus_one: Integer<u8, packed_bits::Bits3>,
}

impl Apll2PostDivReg {
    fn new(pd1: u32, pd2: u32) -> Self {
        Self {
            pd1_minus_one: ((pd1 - 1) as u8).into(),
            pd2_minus_one: ((pd2 - 1) as u8).into(),
        }
    }

    fn to_byte(self) -> u8 {
        self.pack().expect("3+3 bits always fit in one byte")[0]
    }
}

/// Per-port output-control register: mux source (2 bits) and signal
/// format (3 bits), mirroring the original's `MAKE_LMK05318_OUTCTL_n`
/// macro family.
#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(size_bytes = "1", bit_numbering = "lsb0")]
struct OutCtlReg {
    #[packed_field(bits = "0:1")]
    mux: Integer<u8, packed_bits::Bits2>,
    #[packed_field(bits = "2:4")]
    format: Integer<u8, packed_bits::Bits3>,
}

impl OutCtlReg {
    fn new(mux: MuxSource, format: crate::chips::OutputFormat) -> Self {
        let mux_bits = match mux {
            MuxSource::Primary => 0u8,
            MuxSource::PrimaryInverted => 1,
            MuxSource::SecondaryPostDiv1 => 2,
            MuxSource::SecondaryPostDiv2 => 3,
        };
        let format_bits = match format {
            crate::chips::OutputFormat::Lvds => 0u8,
            crate::chips::OutputFormat::Cml => 1,
            crate::chips::OutputFormat::LvPecl => 2,
            crate::chips::OutputFormat::Lvcmos => 3,
            crate::chips::OutputFormat::Off => 4,
        };
        Self {
            mux: mux_bits.into(),
            format: format_bits.into(),
        }
    }

    fn to_byte(self) -> u8 {
        self.pack().expect("2+3 bits always fit in one byte")[0]
    }
}

pub const MAX_OUT_PORTS: usize = 8;

/// Expected contents of registers 0x0000-0x0003, read in ascending address
/// order (register 0 first).
const DEVICE_ID: [u8; 4] = [0x42, 0x35, 0x0b, 0x10];

const VCO_APLL1_HZ: u64 = 2_500_000_000;
const VCO_APLL2_MIN_HZ: u64 = 5_500_000_000;
const VCO_APLL2_MAX_HZ: u64 = 6_250_000_000;

const APLL2_PD_MIN_HZ: u64 = 10_000_000;
const APLL2_PD_MAX_HZ: u64 = 150_000_000;
const APLL2_PDIV_MIN: u32 = 2;
const APLL2_PDIV_MAX: u32 = 7;

const XO_FREF_MIN_HZ: u64 = 10_000_000;
const XO_FREF_MAX_HZ: u64 = 100_000_000;

const APLL1_RDIV_MIN: u32 = 1;
const APLL1_RDIV_MAX: u32 = 32;

const PLL1_FREE_RUN_DEN: u32 = (1u32 << 24) - 1;
const PLL2_DEN_MAX: u64 = 0xFF_FFFF;

/// Reference-oscillator input configuration.
#[derive(Clone, Copy, Debug)]
pub struct XoConfig {
    pub fref_hz: u64,
    pub doubler_enabled: bool,
    pub pll1_fref_rdiv: u32,
}

/// External-reference DPLL configuration. When present, the primary PLL
/// is programmed in DPLL mode (40-bit fixed denominator) instead of
/// free-run (24-bit programmed denominator).
#[derive(Clone, Copy, Debug)]
pub struct DpllConfig {
    pub tdc_rate_hz: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChipConfig {
    pub bare_mode: bool,
}

/// Quarantined device-specific magic constants for DPLL bring-up. A
/// `None` slot means the requested mode cannot be safely programmed; the
/// caller gets `Unsupported` rather than a silently-wrong register value.
pub mod dpll_magic {
    /// Holdover-behavior register value, indexed by whether hitless
    /// switchover is required. Filled in empirically against real parts;
    /// slots with no verified constant stay `None`.
    pub static HOLDOVER_CTRL: [Option<u8>; 2] = [Some(0x0c), None];
}

/// One port's secondary-PLL band: legal post-divider, output divider,
/// and the VCO2 interval that combination can satisfy the port from.
#[derive(Clone, Copy, Debug)]
struct Band {
    port_index: usize,
    pd: u32,
    od: u64,
    lo: u64,
    hi: u64,
}

pub struct Lmk05318 {
    state: State,
    config: ChipConfig,
    xo: Option<XoConfig>,
    dpll: Option<DpllConfig>,
    pll2_pre_rp: u32,
    pll2_pre_rs: u32,
    vco2_freq_hz: u64,
    regs: DeferredRegisterMap,
}

impl Lmk05318 {
    /// Probe the device-ID register and, on match, return a fresh driver
    /// ready to accept `configure_xo`. `config.bare_mode` skips the probe
    /// entirely, mirroring the original's `dry_run` bring-up path.
    pub fn create(bus: &mut dyn RegisterBus, config: ChipConfig) -> Result<Self> {
        if config.bare_mode {
            return Ok(Self::new_unchecked(config));
        }
        let id = [
            bus.read_reg(0x0000)?,
            bus.read_reg(0x0001)?,
            bus.read_reg(0x0002)?,
            bus.read_reg(0x0003)?,
        ];
        debug!("LMK05318 DEVID = {:02x?}", id);
        if id != DEVICE_ID {
            return Err(ErrorKind::NotFound(format!(
                "LMK05318 device-ID mismatch: got {:02x?}, expected {:02x?}",
                id, DEVICE_ID
            ))
            .into());
        }
        Ok(Self::new_unchecked(config))
    }

    fn new_unchecked(config: ChipConfig) -> Self {
        Self {
            state: State::Uninit,
            config,
            xo: None,
            dpll: None,
            pll2_pre_rp: 3,
            pll2_pre_rs: 1,
            vco2_freq_hz: 0,
            regs: DeferredRegisterMap::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> ChipConfig {
        self.config
    }

    /// Secondary VCO frequency chosen by the last successful
    /// `solve_outputs` call, or zero if the secondary PLL has not been
    /// tuned yet.
    pub fn vco2_freq_hz(&self) -> u64 {
        self.vco2_freq_hz
    }

    /// The DPLL configuration APLL1 was last tuned with, if any.
    pub fn dpll_config(&self) -> Option<DpllConfig> {
        self.dpll
    }

    /// Configure the reference oscillator input and the APLL1 reference
    /// divider, computing the PLL2 pre-divider pair so that the secondary
    /// phase-detector frequency lands in `[APLL2_PD_MIN; APLL2_PD_MAX]`.
    pub fn configure_xo(&mut self, xo: XoConfig) -> Result<()> {
        if xo.fref_hz < XO_FREF_MIN_HZ || xo.fref_hz > XO_FREF_MAX_HZ {
            self.state = State::Uninit;
            return Err(ErrorKind::OutOfRange(
                "LMK05318 XO fref".into(),
                xo.fref_hz as i64,
                XO_FREF_MIN_HZ as i64,
                XO_FREF_MAX_HZ as i64,
            )
            .into());
        }
        if xo.pll1_fref_rdiv < APLL1_RDIV_MIN || xo.pll1_fref_rdiv > APLL1_RDIV_MAX {
            self.state = State::Uninit;
            return Err(ErrorKind::OutOfRange(
                "LMK05318 APLL1 RDIV".into(),
                xo.pll1_fref_rdiv as i64,
                APLL1_RDIV_MIN as i64,
                APLL1_RDIV_MAX as i64,
            )
            .into());
        }

        self.pll2_pre_rp = 3;
        self.pll2_pre_rs = (((VCO_APLL1_HZ + APLL2_PD_MAX_HZ - 1) / APLL2_PD_MAX_HZ
            + self.pll2_pre_rp as u64
            - 1)
            / self.pll2_pre_rp as u64)
            .max(1) as u32;

        let fpd2 = VCO_APLL1_HZ / self.pll2_pre_rp as u64 / self.pll2_pre_rs as u64;
        if fpd2 < APLL2_PD_MIN_HZ || fpd2 > APLL2_PD_MAX_HZ {
            self.state = State::Uninit;
            return Err(ErrorKind::OutOfRange(
                "LMK05318 APLL2 PFD".into(),
                fpd2 as i64,
                APLL2_PD_MIN_HZ as i64,
                APLL2_PD_MAX_HZ as i64,
            )
            .into());
        }

        self.xo = Some(xo);
        self.regs.stage(0x002A, if xo.doubler_enabled { 1 } else { 0 });
        self.regs.stage(0x002C, (xo.pll1_fref_rdiv - 1) as u8);
        self.state = State::XoConfigured;
        Ok(())
    }

    /// Tune the primary (fixed 2.5 GHz) VCO, in free-run or DPLL mode
    /// depending on whether a `DpllConfig` was supplied.
    pub fn tune_apll1(&mut self, dpll: Option<DpllConfig>) -> Result<()> {
        let xo = self
            .xo
            .ok_or_else(|| Error::from(ErrorKind::InvalidArgument("tune_apll1 called before configure_xo".into())))?;

        let fpd1 = (xo.fref_hz / xo.pll1_fref_rdiv as u64) * if xo.doubler_enabled { 2 } else { 1 };
        let n = (VCO_APLL1_HZ / fpd1) as u32;

        if let Some(d) = dpll {
            let holdover = dpll_magic::HOLDOVER_CTRL[0].ok_or_else(|| {
                Error::from(ErrorKind::Unsupported(
                    "LMK05318 DPLL holdover constant not quarantine-approved".into(),
                ))
            })?;
            let remainder = VCO_APLL1_HZ - n as u64 * fpd1;
            let num = (remainder as u128 * (1u128 << 40) / fpd1 as u128) as u64;
            debug!(
                "LMK05318 APLL1 DPLL FVCO={} N={} NUM={} holdover=0x{:02x} TDC={}",
                VCO_APLL1_HZ, n, num, holdover, d.tdc_rate_hz
            );
            self.dpll = Some(d);
            self.regs.stage(0x0116, 1); // PLL1_MODE, DPLL
        } else {
            let frac = VCO_APLL1_HZ as f64 / fpd1 as f64 - n as f64;
            let num = (frac * PLL1_FREE_RUN_DEN as f64 + 0.5) as u32;
            debug!(
                "LMK05318 APLL1 free-run FVCO={} N={} NUM={} DEN={}",
                VCO_APLL1_HZ, n, num, PLL1_FREE_RUN_DEN
            );
            self.regs.stage(0x0116, 0); // PLL1_MODE, free-run
        }
        self.regs.stage(0x0074, 0); // PLL1_CTRL0, activate APLL1

        self.state = State::Apll1Tuned;
        Ok(())
    }

    /// Solve and route the requested output ports: ports that can be hit
    /// exactly by dividing the primary VCO are assigned there first; the
    /// rest are solved against the secondary PLL by intersecting
    /// per-port VCO2 bands across at most two post-dividers.
    ///
    /// Unlike some fanout parts in this family, LMK05318 does not share
    /// an output-divider register across adjacent port pairs: each of
    /// ports 0-6 owns an independent 8-bit divider and port 7 its own
    /// two-stage divider (`lmk05318_set_out_div`/`lmk05318_max_odiv` in
    /// the original — `d->outputs[port].odiv` is per-port). The only
    /// sharing in this chip is which of the two secondary post-dividers
    /// (PD1/PD2) a port is *routed through*, which `assign_ports_to_pair`
    /// already resolves below; there is no port-index merge-and-conflict
    /// step to run before solving.
    pub fn solve_outputs(
        &mut self,
        requests: &[OutputRequest],
    ) -> Result<Vec<(OutputRequest, OutputSolution)>> {
        if self.state != State::Apll1Tuned && self.state != State::Apll2Tuned {
            return Err(
                ErrorKind::InvalidArgument("solve_outputs called before APLL1 was tuned".into()).into(),
            );
        }

        let active: Vec<OutputRequest> = requests.iter().filter(|r| !r.is_unused()).cloned().collect();
        for req in &active {
            req.validate()?;
        }

        let mut solved: Vec<(OutputRequest, OutputSolution)> = Vec::new();
        let mut remaining: Vec<OutputRequest> = Vec::new();

        for req in active {
            if req.affinity != Affinity::Secondary {
                if let Some(div) = exact_primary_divider(VCO_APLL1_HZ, req.freq_hz, req.port) {
                    let mux = if req.invert {
                        MuxSource::PrimaryInverted
                    } else {
                        MuxSource::Primary
                    };
                    solved.push((
                        req,
                        OutputSolution {
                            mux,
                            output_div: div,
                            exact_freq_hz: VCO_APLL1_HZ / div,
                        },
                    ));
                    continue;
                }
            }
            remaining.push(req);
        }

        if !remaining.is_empty() {
            self.solve_secondary(&remaining, &mut solved)?;
        }

        for (req, sol) in &solved {
            if !sol.within_tolerance(req) {
                self.state = State::Uninit;
                return Err(ErrorKind::OutOfRange(
                    format!("LMK05318 port {} solved frequency", req.port),
                    sol.exact_freq_hz as i64,
                    req.freq_hz.saturating_sub(req.tolerance_minus_hz) as i64,
                    (req.freq_hz + req.tolerance_plus_hz) as i64,
                )
                .into());
            }
            self.stage_output_registers(req.port, req.format, sol);
        }

        self.state = State::OutputsRouted;
        Ok(solved)
    }

    /// Intersect per-port VCO2 bands across legal post-dividers. Ports
    /// must partition into at most two post-divider classes (PD1, PD2);
    /// among surviving VCO2 intersections, pick the first integer
    /// candidate whose feedback divider fits the 24-bit denominator and
    /// whose derived per-port output dividers are exact.
    fn solve_secondary(
        &mut self,
        ports: &[OutputRequest],
        solved: &mut Vec<(OutputRequest, OutputSolution)>,
    ) -> Result<()> {
        let mut bands: Vec<Band> = Vec::new();
        for (index, req) in ports.iter().enumerate() {
            let lo_freq = req.freq_hz.saturating_sub(req.tolerance_minus_hz).max(1);
            let hi_freq = req.freq_hz + req.tolerance_plus_hz;
            let max_od = max_output_divider(req.port);
            for pd in APLL2_PDIV_MIN..=APLL2_PDIV_MAX {
                // Candidate output dividers are tightly bounded by the
                // ratio of the secondary VCO's legal interval (~1.14x),
                // so only a handful of od values per pd ever qualify.
                let od_min = (VCO_APLL2_MIN_HZ / (pd as u64 * hi_freq)).max(1);
                let od_max = (VCO_APLL2_MAX_HZ / (pd as u64 * lo_freq)).max(od_min).min(max_od);
                for od in od_min..=od_max {
                    let vco_lo = (pd as u64 * od).saturating_mul(lo_freq).max(VCO_APLL2_MIN_HZ);
                    let vco_hi = (pd as u64 * od).saturating_mul(hi_freq).min(VCO_APLL2_MAX_HZ);
                    if vco_lo <= vco_hi {
                        bands.push(Band {
                            port_index: index,
                            pd,
                            od,
                            lo: vco_lo,
                            hi: vco_hi,
                        });
                    }
                }
            }
        }

        if bands.is_empty() {
            return Err(ErrorKind::NoSolution(
                "LMK05318 secondary PLL: no VCO2 band for any requested port".into(),
            )
            .into());
        }

        for pd1 in APLL2_PDIV_MIN..=APLL2_PDIV_MAX {
            for pd2 in APLL2_PDIV_MIN..=APLL2_PDIV_MAX {
                if pd1 == pd2 && ports.len() > 1 {
                    continue;
                }
                if let Some(assignment) = assign_ports_to_pair(&bands, ports.len(), pd1, pd2) {
                    if let Some((vco2, n, num, den)) =
                        self.pick_vco2(&assignment, self.pll2_pre_rp, self.pll2_pre_rs)
                    {
                        debug!(
                            "LMK05318 APLL2 FVCO2={} N={} NUM={} DEN={} PD1={} PD2={}",
                            vco2, n, num, den, pd1, pd2
                        );
                        self.regs.stage(0x0100, 0);
                        self.regs
                            .stage(0x0102, Apll2PostDivReg::new(pd1, pd2).to_byte());
                        self.vco2_freq_hz = vco2;
                        self.state = State::Apll2Tuned;

                        for (port_index, band) in &assignment {
                            let req = ports[*port_index];
                            let mux = if band.pd == pd1 {
                                MuxSource::SecondaryPostDiv1
                            } else {
                                MuxSource::SecondaryPostDiv2
                            };
                            solved.push((
                                req,
                                OutputSolution {
                                    mux,
                                    output_div: band.od,
                                    exact_freq_hz: vco2 / band.pd as u64 / band.od,
                                },
                            ));
                        }
                        return Ok(());
                    }
                }
            }
        }

        Err(ErrorKind::NoSolution(
            "LMK05318 secondary PLL: ports do not partition into at most two post-dividers".into(),
        )
        .into())
    }

    /// Walk integer VCO2 candidates in the assignment's shared band,
    /// returning the first whose feedback divider fits the 24-bit
    /// denominator after GCD reduction.
    fn pick_vco2(
        &self,
        assignment: &[(usize, Band)],
        pre_rp: u32,
        pre_rs: u32,
    ) -> Option<(u64, u32, u32, u32)> {
        let lo = assignment.iter().map(|(_, b)| b.lo).max()?;
        let hi = assignment.iter().map(|(_, b)| b.hi).min()?;
        if lo > hi {
            return None;
        }
        for vco2 in lo..=hi {
            if let Some((n, num, den)) = vco2_feedback_divider(vco2, pre_rp, pre_rs) {
                return Some((vco2, n, num, den));
            }
        }
        None
    }

    fn stage_output_registers(
        &mut self,
        port: usize,
        format: crate::chips::OutputFormat,
        solution: &OutputSolution,
    ) {
        let base = 0x0200 + port as u16 * 2;
        self.regs.stage(base, solution.output_div.saturating_sub(1) as u8);
        self.regs
            .stage(base + 1, OutCtlReg::new(solution.mux, format).to_byte());
    }

    /// Flush every staged register through the bus in ascending-address
    /// order.
    pub fn commit(&mut self, bus: &mut dyn RegisterBus) -> Result<()> {
        self.regs.flush(bus)
    }

    /// Poll the lock-status register until both PLLs report locked or
    /// the timeout expires.
    pub fn wait_locked(
        &mut self,
        poll: impl Fn() -> Result<u8>,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let raw = poll()?;
            let status = LockStatus::decode(raw);
            if status.all_locked() {
                self.state = State::Locked;
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                warn!("LMK05318 lock timeout: {}", status.describe());
                return Err(ErrorKind::LockTimeout("LMK05318".into(), timeout).into());
            }
        }
    }
}

/// For a single post-divider pair `(pd1, pd2)`, try to cover every
/// requested port with exactly one band bound to `pd1` or `pd2`. Returns
/// the chosen band per port index when every port is covered.
fn assign_ports_to_pair(bands: &[Band], port_count: usize, pd1: u32, pd2: u32) -> Option<Vec<(usize, Band)>> {
    let mut assignment: Vec<Option<Band>> = vec![None; port_count];
    for band in bands {
        if band.pd != pd1 && band.pd != pd2 {
            continue;
        }
        if assignment[band.port_index].is_none() {
            assignment[band.port_index] = Some(*band);
        }
    }
    if assignment.iter().any(|b| b.is_none()) {
        return None;
    }
    Some(
        assignment
            .into_iter()
            .enumerate()
            .map(|(i, b)| (i, b.unwrap()))
            .collect(),
    )
}

fn max_output_divider(port: usize) -> u64 {
    if port == 7 {
        1 << 32
    } else {
        1 << 8
    }
}

fn exact_primary_divider(vco: u64, target: u64, port: usize) -> Option<u64> {
    if target == 0 || vco % target != 0 {
        return None;
    }
    let div = vco / target;
    if div == 0 || div > max_output_divider(port) {
        return None;
    }
    Some(div)
}

/// Solve the APLL2 fractional feedback divider for a candidate VCO2,
/// reducing the fractional part with binary GCD and checking the 24-bit
/// denominator limit.
fn vco2_feedback_divider(vco2_hz: u64, pre_rp: u32, pre_rs: u32) -> Option<(u32, u32, u32)> {
    let pll2_tot_prediv = pre_rp as u64 * pre_rs as u64;
    let den64_base = VCO_APLL1_HZ * pll2_tot_prediv;
    let r = (vco2_hz as f64 * pll2_tot_prediv as f64) / VCO_APLL1_HZ as f64;
    let n = r as u64;
    let n_frac = r - n as f64;
    let mut num64 = (n_frac * den64_base as f64 + 0.5) as u64;
    let mut den64 = den64_base;

    let nod = binary_gcd(num64, den64);
    if nod > 1 {
        num64 /= nod;
        den64 /= nod;
    }
    if den64 > PLL2_DEN_MAX {
        return None;
    }
    Some((n as u32, num64 as u32, den64 as u32))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chips::{Affinity, OutputFormat};

    #[test]
    fn apll2_post_div_reg_packs_both_nibbles() {
        assert_eq!(Apll2PostDivReg::new(2, 2).to_byte(), 0b0_001_001);
        assert_eq!(Apll2PostDivReg::new(7, 3).to_byte(), 0b0_010_110);
    }

    #[test]
    fn out_ctl_reg_packs_mux_and_format() {
        let reg = OutCtlReg::new(MuxSource::PrimaryInverted, OutputFormat::Lvcmos);
        assert_eq!(reg.to_byte(), 0b0_011_01);
    }

    #[test]
    fn exact_primary_divider_hits_integer_ratio() {
        assert_eq!(exact_primary_divider(2_500_000_000, 156_250_000, 0), Some(16));
        assert_eq!(exact_primary_divider(2_500_000_000, 7_000_000, 0), None);
    }

    #[test]
    fn vco2_feedback_divider_respects_24bit_den_limit() {
        let (n, _num, den) = vco2_feedback_divider(6_000_000_000, 3, 2).unwrap();
        assert!(n > 0);
        assert!((den as u64) <= PLL2_DEN_MAX);
    }

    struct FakeBus {
        devid: [u8; 4],
    }

    impl RegisterBus for FakeBus {
        fn write_reg(&mut self, _addr: u16, _value: u8) -> Result<()> {
            Ok(())
        }
        fn read_reg(&mut self, addr: u16) -> Result<u8> {
            Ok(self.devid[addr as usize])
        }
    }

    #[test]
    fn create_fails_on_devid_mismatch() {
        let mut bus = FakeBus { devid: [0xff; 4] };
        assert!(Lmk05318::create(&mut bus, ChipConfig::default()).is_err());
    }

    #[test]
    fn create_succeeds_on_devid_match() {
        let mut bus = FakeBus { devid: DEVICE_ID };
        assert!(Lmk05318::create(&mut bus, ChipConfig::default()).is_ok());
    }

    #[test]
    fn create_skips_probe_in_bare_mode() {
        let mut bus = FakeBus { devid: [0xff; 4] };
        let config = ChipConfig { bare_mode: true };
        assert!(Lmk05318::create(&mut bus, config).is_ok());
    }

    #[test]
    fn configure_xo_rejects_out_of_range_reference() {
        let mut chip = Lmk05318::new_unchecked(ChipConfig::default());
        let result = chip.configure_xo(XoConfig {
            fref_hz: 1_000_000,
            doubler_enabled: false,
            pll1_fref_rdiv: 1,
        });
        assert!(result.is_err());
        assert_eq!(chip.state(), State::Uninit);
    }

    #[test]
    fn solve_outputs_routes_exact_primary_divide_without_touching_secondary() {
        let mut chip = Lmk05318::new_unchecked(ChipConfig::default());
        chip.configure_xo(XoConfig {
            fref_hz: 50_000_000,
            doubler_enabled: false,
            pll1_fref_rdiv: 1,
        })
        .unwrap();
        chip.tune_apll1(None).unwrap();

        let requests = [OutputRequest {
            port: 0,
            freq_hz: 156_250_000,
            tolerance_minus_hz: 0,
            tolerance_plus_hz: 0,
            format: OutputFormat::Lvds,
            invert: false,
            affinity: Affinity::Any,
        }];
        let solved = chip.solve_outputs(&requests).unwrap();
        assert_eq!(solved.len(), 1);
        assert_eq!(solved[0].1.mux, MuxSource::Primary);
        assert_eq!(solved[0].1.exact_freq_hz, 156_250_000);
    }

    #[test]
    fn solve_outputs_routes_mixed_affinity_across_both_plls() {
        let mut chip = Lmk05318::new_unchecked(ChipConfig::default());
        chip.configure_xo(XoConfig {
            fref_hz: 50_000_000,
            doubler_enabled: false,
            pll1_fref_rdiv: 1,
        })
        .unwrap();
        chip.tune_apll1(None).unwrap();

        let requests = [
            OutputRequest {
                port: 0,
                freq_hz: 156_250_000,
                tolerance_minus_hz: 0,
                tolerance_plus_hz: 0,
                format: OutputFormat::Lvds,
                invert: false,
                affinity: Affinity::Primary,
            },
            OutputRequest {
                port: 1,
                freq_hz: 122_880_000,
                tolerance_minus_hz: 5_000,
                tolerance_plus_hz: 5_000,
                format: OutputFormat::Lvds,
                invert: false,
                affinity: Affinity::Secondary,
            },
        ];
        let solved = chip.solve_outputs(&requests).unwrap();
        assert_eq!(solved.len(), 2);
        let secondary = solved.iter().find(|(r, _)| r.port == 1).unwrap();
        assert!(matches!(
            secondary.1.mux,
            MuxSource::SecondaryPostDiv1 | MuxSource::SecondaryPostDiv2
        ));
        assert!(secondary.1.within_tolerance(&secondary.0));
    }
}
