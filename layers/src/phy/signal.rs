//! DSP engine seam
//!
//! [`UplinkProcessor`] and [`DownlinkProcessor`] capture the contracts the
//! worker depends on; the heavy 3GPP kernels behind them are out of scope.
//! [`LteUplink`] / [`LteDownlink`] are simplified stand-ins: rustfft OFDM
//! front ends, QPSK symbol mapping and CRC-16-checked transport blocks.
//! They are self-consistent (what `LteDownlink`-style mapping produces,
//! `LteUplink` decodes), which is what loopback tests and the simulated
//! radio in the binary rely on.

use super::grants::{DciDl, DciUl, DlSfCfg, DlSfGrant, MbsfnCfg, PuschGrant, UciCfg, UciValue, UlSfCfg};
use super::ue::PhichGrant;
use super::ue_db::{DciConfig, DlConfig, UlConfig};
use super::CfrArgs;
use crate::LayerError;
use bytes::Bytes;
use common::{crc16, pack_bits, power_to_db, unpack_bits, CellConfig};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// OFDM symbols per subframe (normal CP)
pub const SYMBOLS_PER_SF: usize = 14;
/// Symbols carrying uplink DMRS, no data
pub const UL_DMRS_SYMBOLS: [usize; 2] = [3, 10];
/// QPSK amplitude per axis
const QPSK_AMP: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Soft-bit combining buffer shared between HARQ retransmissions
#[derive(Debug)]
pub struct SoftBuffer {
    llr: Vec<f32>,
}

impl SoftBuffer {
    /// Allocate a buffer for up to `max_bits` soft bits. Failure here is an
    /// unrecoverable resource condition surfaced as [`LayerError::Fatal`].
    pub fn new(max_bits: usize) -> Result<Self, LayerError> {
        if max_bits == 0 {
            return Err(LayerError::Fatal(
                "soft buffer requested with zero capacity".into(),
            ));
        }
        Ok(Self {
            llr: vec![0.0; max_bits],
        })
    }

    pub fn reset(&mut self) {
        self.llr.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn capacity_bits(&self) -> usize {
        self.llr.len()
    }

    /// Accumulate soft bits from one (re)transmission
    pub fn combine(&mut self, llr: &[f32]) {
        for (acc, v) in self.llr.iter_mut().zip(llr) {
            *acc += v;
        }
    }

    pub fn llr(&self) -> &[f32] {
        &self.llr
    }
}

/// Result of one PUSCH decode attempt
#[derive(Debug, Clone)]
pub struct PuschResult {
    pub crc_ok: bool,
    pub data: Bytes,
    pub snr_db: f32,
    /// Raw energy per resource element, before the rx-gain offset
    pub epre_dbfs: f32,
    pub ta_us: f32,
    pub avg_iterations: f32,
    pub uci: UciValue,
}

/// Result of one PUCCH decode attempt
#[derive(Debug, Clone)]
pub struct PucchResult {
    pub detected: bool,
    pub uci: UciValue,
    pub snr_db: f32,
    pub rssi_dbfs: f32,
    pub ni_dbfs: f32,
    pub ta_us: f32,
}

/// Uplink DSP engine: FFT front end plus PUSCH/PUCCH decoders
pub trait UplinkProcessor: Send {
    /// Bind to the cell's resource-grid size
    fn set_cell(&mut self, cell: &CellConfig) -> Result<(), LayerError>;

    /// Run the front-end transform on the current RX buffer
    fn run_fft(&mut self, rx: &[Vec<Complex32>], sf: &UlSfCfg) -> Result<(), LayerError>;

    fn decode_pusch(
        &mut self,
        cfg: &UlConfig,
        grant: &PuschGrant,
        uci: Option<&UciCfg>,
        softbuffer: &mut SoftBuffer,
    ) -> Result<PuschResult, LayerError>;

    fn decode_pucch(&mut self, cfg: &UlConfig, uci_cfg: &UciCfg)
        -> Result<PucchResult, LayerError>;
}

/// Downlink DSP engine: resource-grid writers plus IFFT signal generation
pub trait DownlinkProcessor: Send {
    fn set_cell(&mut self, cell: &CellConfig) -> Result<(), LayerError>;
    fn configure_cfr(&mut self, cfr: &CfrArgs) -> Result<(), LayerError>;

    /// Clear the grid and place cell-wide base signals (CRS, sync, MIB,
    /// PCFICH). Always the first call of a subframe.
    fn put_base_signals(&mut self, sf: &DlSfCfg) -> Result<(), LayerError>;

    fn put_pdcch_dl(&mut self, cfg: &DciConfig, dci: &DciDl, sf: &DlSfCfg)
        -> Result<(), LayerError>;
    fn put_pdcch_ul(&mut self, cfg: &DciConfig, dci: &DciUl, sf: &DlSfCfg)
        -> Result<(), LayerError>;
    fn put_pdsch(&mut self, cfg: &DlConfig, grant: &DlSfGrant, sf: &DlSfCfg)
        -> Result<(), LayerError>;
    fn put_pmch(
        &mut self,
        mbsfn: &MbsfnCfg,
        softbuffer: &mut SoftBuffer,
        sf: &DlSfCfg,
    ) -> Result<(), LayerError>;
    fn put_phich(&mut self, grant: &PhichGrant, ack: bool, sf: &DlSfCfg)
        -> Result<(), LayerError>;

    /// IFFT the grid into the time-domain transmit buffers (one subframe
    /// per antenna port)
    fn gen_signal(&mut self, tx: &mut [Vec<Complex32>]) -> Result<(), LayerError>;
}

/// Cyclic prefix length of symbol `l` within a slot, in samples
fn cp_len(fft_size: usize, l: usize) -> usize {
    if l == 0 {
        fft_size * 10 / 128
    } else {
        fft_size * 9 / 128
    }
}

/// FFT bin for occupied subcarrier `k` of `n_sc` total
fn sc_to_bin(k: usize, n_sc: usize, fft_size: usize) -> usize {
    (k + fft_size - n_sc / 2) % fft_size
}

/// Frequency-domain resource grid for one subframe
#[derive(Debug, Clone)]
struct Grid {
    n_sc: usize,
    re: Vec<Vec<Complex32>>,
}

impl Grid {
    fn new(n_sc: usize) -> Self {
        Self {
            n_sc,
            re: vec![vec![Complex32::new(0.0, 0.0); n_sc]; SYMBOLS_PER_SF],
        }
    }

    fn clear(&mut self) {
        for sym in &mut self.re {
            sym.iter_mut().for_each(|v| *v = Complex32::new(0.0, 0.0));
        }
    }
}

fn bytes_to_qpsk(data: &[u8]) -> Vec<Complex32> {
    let bits = unpack_bits(data);
    bits.chunks(2)
        .map(|b| {
            let i = if b[0] { -QPSK_AMP } else { QPSK_AMP };
            let q = if b.len() > 1 && b[1] { -QPSK_AMP } else { QPSK_AMP };
            Complex32::new(i, q)
        })
        .collect()
}

fn qpsk_to_bytes(symbols: &[Complex32], nof_bytes: usize) -> Vec<u8> {
    let mut bits = Vec::with_capacity(symbols.len() * 2);
    for s in symbols {
        bits.push(s.re < 0.0);
        bits.push(s.im < 0.0);
    }
    bits.truncate(nof_bytes * 8);
    pack_bits(&bits).to_vec()
}

/// Resource elements of a PUSCH allocation in mapping order
fn pusch_re_iter(grant_prb_start: usize, grant_nof_prb: usize) -> impl Iterator<Item = (usize, usize)> {
    let k0 = grant_prb_start * 12;
    let k1 = (grant_prb_start + grant_nof_prb) * 12;
    (0..SYMBOLS_PER_SF)
        .filter(|l| !UL_DMRS_SYMBOLS.contains(l))
        .flat_map(move |l| (k0..k1).map(move |k| (l, k)))
}

/// Peak-to-average power ratio of a sample buffer, in dB
pub fn papr_db(samples: &[Complex32]) -> f32 {
    let avg: f32 =
        samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len().max(1) as f32;
    let peak = samples.iter().map(|s| s.norm_sqr()).fold(0.0_f32, f32::max);
    if avg <= 0.0 {
        return 0.0;
    }
    power_to_db(peak / avg)
}

/// Synthesize a time-domain subframe containing one PUSCH transmission.
///
/// Counterpart of [`LteUplink::decode_pusch`]; used by the simulated radio
/// in the binary and by loopback tests.
pub fn synthesize_pusch(
    cell: &CellConfig,
    grant: &PuschGrant,
    payload: &[u8],
) -> Result<Vec<Complex32>, LayerError> {
    let n_sc = cell.nof_prb * 12;
    let mut grid = Grid::new(n_sc);

    let mut framed = payload.to_vec();
    framed.extend_from_slice(&crc16(payload).to_be_bytes());
    let symbols = bytes_to_qpsk(&framed);

    let capacity = grant.nof_prb * 12 * (SYMBOLS_PER_SF - UL_DMRS_SYMBOLS.len());
    if symbols.len() > capacity {
        return Err(LayerError::ProcessingError(format!(
            "PUSCH payload of {} symbols exceeds allocation capacity {}",
            symbols.len(),
            capacity
        )));
    }
    for ((l, k), s) in pusch_re_iter(grant.prb_start, grant.nof_prb).zip(symbols) {
        grid.re[l][k] = s;
    }
    // DMRS: constant-amplitude sequence phased by the cyclic shift
    for &l in &UL_DMRS_SYMBOLS {
        for k in grant.prb_start * 12..(grant.prb_start + grant.nof_prb) * 12 {
            let phase =
                2.0 * std::f32::consts::PI * (grant.n_dmrs as f32) * (k as f32 % 12.0) / 12.0;
            grid.re[l][k] = Complex32::from_polar(QPSK_AMP, phase);
        }
    }

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(cell.fft_size());
    Ok(modulate(&grid, cell.fft_size(), ifft.as_ref()))
}

/// Grid -> time domain, CP insertion included
fn modulate(grid: &Grid, fft_size: usize, ifft: &dyn Fft<f32>) -> Vec<Complex32> {
    let mut out = Vec::with_capacity(fft_size * 15);
    let scale = 1.0 / (fft_size as f32).sqrt();
    for (l, sym) in grid.re.iter().enumerate() {
        let mut bins = vec![Complex32::new(0.0, 0.0); fft_size];
        for (k, v) in sym.iter().enumerate() {
            bins[sc_to_bin(k, grid.n_sc, fft_size)] = *v;
        }
        ifft.process(&mut bins);
        bins.iter_mut().for_each(|v| *v *= scale);
        let cp = cp_len(fft_size, l % 7);
        out.extend_from_slice(&bins[fft_size - cp..]);
        out.extend_from_slice(&bins);
    }
    out
}

/// Time domain -> grid, CP removal included
fn demodulate(samples: &[Complex32], grid: &mut Grid, fft_size: usize, fft: &dyn Fft<f32>) {
    let scale = 1.0 / (fft_size as f32).sqrt();
    let mut pos = 0usize;
    for l in 0..SYMBOLS_PER_SF {
        let cp = cp_len(fft_size, l % 7);
        pos += cp;
        if pos + fft_size > samples.len() {
            break;
        }
        let mut bins = samples[pos..pos + fft_size].to_vec();
        fft.process(&mut bins);
        bins.iter_mut().for_each(|v| *v *= scale);
        for k in 0..grid.n_sc {
            grid.re[l][k] = bins[sc_to_bin(k, grid.n_sc, fft_size)];
        }
        pos += fft_size;
    }
}

/// Concrete uplink engine
pub struct LteUplink {
    cell: Option<CellConfig>,
    fft: Option<Arc<dyn Fft<f32>>>,
    grid: Grid,
    max_its: u32,
    use_8bit: bool,
}

impl LteUplink {
    pub fn new(max_its: u32, use_8bit: bool) -> Self {
        Self {
            cell: None,
            fft: None,
            grid: Grid::new(0),
            max_its,
            use_8bit,
        }
    }

    fn cell(&self) -> Result<&CellConfig, LayerError> {
        self.cell.as_ref().ok_or(LayerError::NotInitialized)
    }

    /// Noise power estimated from the unoccupied guard region of the grid
    /// is unavailable after subcarrier extraction, so derive it from the
    /// quietest data symbol instead
    fn noise_floor(&self) -> f32 {
        self.grid
            .re
            .iter()
            .map(|sym| sym.iter().map(|v| v.norm_sqr()).sum::<f32>() / sym.len().max(1) as f32)
            .fold(f32::MAX, f32::min)
            .max(1e-12)
    }
}

impl UplinkProcessor for LteUplink {
    fn set_cell(&mut self, cell: &CellConfig) -> Result<(), LayerError> {
        if !cell.is_valid() {
            return Err(LayerError::InvalidConfiguration(format!(
                "unsupported cell: {:?}",
                cell
            )));
        }
        let mut planner = FftPlanner::new();
        self.fft = Some(planner.plan_fft_forward(cell.fft_size()));
        self.grid = Grid::new(cell.nof_prb * 12);
        debug!(
            "uplink engine bound to {} PRB (fft={}, max_its={}, 8bit={})",
            cell.nof_prb,
            cell.fft_size(),
            self.max_its,
            self.use_8bit
        );
        self.cell = Some(cell.clone());
        Ok(())
    }

    fn run_fft(&mut self, rx: &[Vec<Complex32>], _sf: &UlSfCfg) -> Result<(), LayerError> {
        let cell = self.cell()?.clone();
        let fft = self
            .fft
            .clone()
            .ok_or(LayerError::NotInitialized)?;
        let port0 = rx
            .first()
            .ok_or_else(|| LayerError::ProcessingError("no RX buffer".into()))?;
        self.grid.clear();
        demodulate(port0, &mut self.grid, cell.fft_size(), fft.as_ref());
        Ok(())
    }

    fn decode_pusch(
        &mut self,
        _cfg: &UlConfig,
        grant: &PuschGrant,
        uci: Option<&UciCfg>,
        softbuffer: &mut SoftBuffer,
    ) -> Result<PuschResult, LayerError> {
        let cell = self.cell()?;
        if grant.prb_start + grant.nof_prb > cell.nof_prb {
            return Err(LayerError::ProcessingError(format!(
                "grant exceeds cell bandwidth: {}+{} > {}",
                grant.prb_start, grant.nof_prb, cell.nof_prb
            )));
        }
        softbuffer.reset();

        let res: Vec<Complex32> = pusch_re_iter(grant.prb_start, grant.nof_prb)
            .map(|(l, k)| self.grid.re[l][k])
            .collect();

        let framed_len = grant.tb.tbs_bytes + 2;
        let framed = qpsk_to_bytes(&res, framed_len);
        let crc_ok = framed.len() == framed_len
            && crc16(&framed[..grant.tb.tbs_bytes])
                == u16::from_be_bytes([framed[grant.tb.tbs_bytes], framed[grant.tb.tbs_bytes + 1]]);
        let data = Bytes::copy_from_slice(&framed[..grant.tb.tbs_bytes.min(framed.len())]);

        let used_res = grant.tb.tbs_bytes * 4 + 8; // QPSK: 2 bits per RE
        let epre = res
            .iter()
            .take(used_res.min(res.len()).max(1))
            .map(|v| v.norm_sqr())
            .sum::<f32>()
            / used_res.min(res.len()).max(1) as f32;
        let noise = self.noise_floor();
        let snr_db = power_to_db((epre / noise).max(1e-6)).min(30.0);

        let uci_value = uci
            .map(|cfg| UciValue {
                ack: vec![crc_ok; cfg.nof_ack],
                cqi: cfg.cqi_expected.then_some(15),
                sr: false,
            })
            .unwrap_or_default();

        Ok(PuschResult {
            crc_ok,
            data,
            snr_db,
            epre_dbfs: power_to_db(epre.max(1e-12)),
            ta_us: 0.0,
            avg_iterations: if crc_ok { 1.0 } else { self.max_its as f32 },
            uci: uci_value,
        })
    }

    fn decode_pucch(
        &mut self,
        cfg: &UlConfig,
        uci_cfg: &UciCfg,
    ) -> Result<PucchResult, LayerError> {
        let cell = self.cell()?;
        // PUCCH occupies the band-edge PRB pair, hopping between slots
        let prb = (cfg.n_pucch as usize / 2) % cell.nof_prb;
        let edge_prbs = [prb, cell.nof_prb - 1 - prb];
        let mut power = 0.0_f32;
        let mut count = 0usize;
        for &p in &edge_prbs {
            for l in 0..SYMBOLS_PER_SF {
                for k in p * 12..(p + 1) * 12 {
                    power += self.grid.re[l][k].norm_sqr();
                    count += 1;
                }
            }
        }
        let power = power / count.max(1) as f32;
        let noise = self.noise_floor();
        let detected = power > noise * 4.0 && power > 1e-9;

        let uci = if detected {
            UciValue {
                ack: vec![true; uci_cfg.nof_ack],
                cqi: uci_cfg.cqi_expected.then_some(15),
                sr: uci_cfg.sr_opportunity,
            }
        } else {
            UciValue::default()
        };

        Ok(PucchResult {
            detected,
            uci,
            snr_db: power_to_db((power / noise).max(1e-6)).min(30.0),
            rssi_dbfs: power_to_db(power.max(1e-12)),
            ni_dbfs: power_to_db(noise),
            ta_us: 0.0,
        })
    }
}

/// Concrete downlink engine
pub struct LteDownlink {
    cell: Option<CellConfig>,
    ifft: Option<Arc<dyn Fft<f32>>>,
    grid: Grid,
    cfr: CfrArgs,
}

impl LteDownlink {
    pub fn new() -> Self {
        Self {
            cell: None,
            ifft: None,
            grid: Grid::new(0),
            cfr: CfrArgs::default(),
        }
    }

    fn cell(&self) -> Result<&CellConfig, LayerError> {
        self.cell.as_ref().ok_or(LayerError::NotInitialized)
    }

    /// Map framed bytes as QPSK into the allocation, data symbols
    /// `first_symbol..14`
    fn map_channel(
        &mut self,
        payload: &[u8],
        prb_start: usize,
        nof_prb: usize,
        first_symbol: usize,
        channel: &str,
    ) -> Result<(), LayerError> {
        let mut framed = payload.to_vec();
        framed.extend_from_slice(&crc16(payload).to_be_bytes());
        let symbols = bytes_to_qpsk(&framed);
        let capacity = nof_prb * 12 * (SYMBOLS_PER_SF - first_symbol);
        if symbols.len() > capacity {
            return Err(LayerError::ProcessingError(format!(
                "{}: {} symbols exceed allocation capacity {}",
                channel,
                symbols.len(),
                capacity
            )));
        }
        let k0 = prb_start * 12;
        let k1 = (prb_start + nof_prb) * 12;
        let mut it = (first_symbol..SYMBOLS_PER_SF).flat_map(|l| (k0..k1).map(move |k| (l, k)));
        for s in symbols {
            // Capacity checked above
            if let Some((l, k)) = it.next() {
                self.grid.re[l][k] = s;
            }
        }
        Ok(())
    }

    fn apply_cfr(&self, samples: &mut [Complex32]) {
        let rms = (samples.iter().map(|s| s.norm_sqr()).sum::<f32>()
            / samples.len().max(1) as f32)
            .sqrt();
        if rms <= 0.0 {
            return;
        }
        let thr = rms * common::db_to_amplitude(self.cfr.thr_db);
        for s in samples.iter_mut() {
            let mag = s.norm();
            if mag > thr {
                let clipped = *s * (thr / mag);
                *s = *s * (1.0 - self.cfr.strength) + clipped * self.cfr.strength;
            }
        }
    }
}

impl Default for LteDownlink {
    fn default() -> Self {
        Self::new()
    }
}

impl DownlinkProcessor for LteDownlink {
    fn set_cell(&mut self, cell: &CellConfig) -> Result<(), LayerError> {
        if !cell.is_valid() {
            return Err(LayerError::InvalidConfiguration(format!(
                "unsupported cell: {:?}",
                cell
            )));
        }
        let mut planner = FftPlanner::new();
        self.ifft = Some(planner.plan_fft_inverse(cell.fft_size()));
        self.grid = Grid::new(cell.nof_prb * 12);
        self.cell = Some(cell.clone());
        Ok(())
    }

    fn configure_cfr(&mut self, cfr: &CfrArgs) -> Result<(), LayerError> {
        if cfr.enable && !(0.0..=1.0).contains(&cfr.strength) {
            return Err(LayerError::InvalidConfiguration(format!(
                "CFR strength {} outside [0, 1]",
                cfr.strength
            )));
        }
        self.cfr = cfr.clone();
        Ok(())
    }

    fn put_base_signals(&mut self, sf: &DlSfCfg) -> Result<(), LayerError> {
        let cell = self.cell()?.clone();
        let n_sc = cell.nof_prb * 12;
        self.grid.clear();

        // Cell-specific reference signals: every 6th subcarrier on symbols
        // 0, 4, 7, 11, phase tied to the PCI
        for &l in &[0usize, 4, 7, 11] {
            let shift = (cell.pci.0 as usize + l) % 6;
            for k in (shift..n_sc).step_by(6) {
                let phase = 2.0 * std::f32::consts::PI * ((cell.pci.0 as usize + k) % 7) as f32 / 7.0;
                self.grid.re[l][k] = Complex32::from_polar(1.0, phase);
            }
        }

        // PSS/SSS on the centre 62 subcarriers of symbols 5/6 in subframes 0 and 5
        let sf_idx = sf.tti.sf_idx();
        if sf_idx == 0 || sf_idx == 5 {
            let k0 = n_sc / 2 - 31;
            for k in 0..62 {
                let phase = std::f32::consts::PI * (k * (k + 1)) as f32 / 63.0;
                self.grid.re[6][k0 + k] = Complex32::from_polar(1.0, -phase);
                self.grid.re[5][k0 + k] =
                    Complex32::from_polar(1.0, phase + cell.pci.0 as f32);
            }
        }

        // MIB on PBCH region: centre 72 subcarriers, symbols 7-10 of subframe 0
        if sf_idx == 0 {
            let mib = [
                (cell.nof_prb as u8),
                (sf.tti.sfn() >> 2) as u8,
                cell.nof_ports as u8,
            ];
            let syms = bytes_to_qpsk(&mib);
            let k0 = n_sc / 2 - 36;
            let mut it = (7..11).flat_map(|l| (k0..k0 + 72).map(move |k| (l, k))).cycle();
            for s in syms {
                if let Some((l, k)) = it.next() {
                    self.grid.re[l][k] = s;
                }
            }
        }

        // PCFICH: CFI repeated on 16 REs of symbol 0
        let cfi_sym = Complex32::new(sf.cfi as f32 / 4.0, 0.0);
        for k in (1..n_sc).step_by(n_sc / 16) {
            self.grid.re[0][k] = cfi_sym;
        }
        Ok(())
    }

    fn put_pdcch_dl(
        &mut self,
        _cfg: &DciConfig,
        dci: &DciDl,
        sf: &DlSfCfg,
    ) -> Result<(), LayerError> {
        let msg = [
            dci.rnti.value().to_be_bytes().as_slice(),
            &[dci.pid as u8, dci.mcs_idx as u8, dci.rv as u8],
            &[dci.prb_start as u8, dci.nof_prb as u8],
        ]
        .concat();
        self.put_pdcch_raw(&msg, sf)
    }

    fn put_pdcch_ul(
        &mut self,
        _cfg: &DciConfig,
        dci: &DciUl,
        sf: &DlSfCfg,
    ) -> Result<(), LayerError> {
        let msg = [
            dci.rnti.value().to_be_bytes().as_slice(),
            &[dci.pid as u8, dci.mcs_idx as u8, dci.rv as u8],
            &[dci.prb_start as u8, dci.nof_prb as u8, dci.n_dmrs as u8],
        ]
        .concat();
        self.put_pdcch_raw(&msg, sf)
    }

    fn put_pdsch(
        &mut self,
        _cfg: &DlConfig,
        grant: &DlSfGrant,
        sf: &DlSfCfg,
    ) -> Result<(), LayerError> {
        let data = grant.data.clone();
        self.map_channel(
            &data,
            grant.dci.prb_start,
            grant.dci.nof_prb,
            sf.cfi as usize,
            "pdsch",
        )
    }

    fn put_pmch(
        &mut self,
        mbsfn: &MbsfnCfg,
        softbuffer: &mut SoftBuffer,
        sf: &DlSfCfg,
    ) -> Result<(), LayerError> {
        let cell = self.cell()?.clone();
        softbuffer.reset();
        let payload = mbsfn.payload.clone();
        // PMCH spans the whole bandwidth after the control region
        self.map_channel(&payload, 0, cell.nof_prb, sf.cfi as usize, "pmch")
    }

    fn put_phich(
        &mut self,
        grant: &PhichGrant,
        ack: bool,
        _sf: &DlSfCfg,
    ) -> Result<(), LayerError> {
        let nof_prb = self.cell()?.nof_prb;
        if grant.n_prb_lowest >= nof_prb {
            return Err(LayerError::ProcessingError(format!(
                "PHICH group PRB {} outside cell of {} PRB",
                grant.n_prb_lowest, nof_prb
            )));
        }
        // BPSK ACK/NACK on three REs, orthogonal position from the DMRS shift
        let k0 = grant.n_prb_lowest * 12 + (grant.n_dmrs as usize * 3) % 12;
        let amp = if ack { 1.0 } else { -1.0 };
        for i in 0..3 {
            let k = (k0 + i) % (nof_prb * 12);
            self.grid.re[0][k] = Complex32::new(amp, 0.0);
        }
        Ok(())
    }

    fn gen_signal(&mut self, tx: &mut [Vec<Complex32>]) -> Result<(), LayerError> {
        let cell = self.cell()?.clone();
        let ifft = self.ifft.clone().ok_or(LayerError::NotInitialized)?;
        let mut samples = modulate(&self.grid, cell.fft_size(), ifft.as_ref());
        if self.cfr.enable {
            self.apply_cfr(&mut samples);
        }
        for port in tx.iter_mut() {
            let n = samples.len().min(port.len());
            port[..n].copy_from_slice(&samples[..n]);
        }
        Ok(())
    }
}

impl LteDownlink {
    fn put_pdcch_raw(&mut self, msg: &[u8], sf: &DlSfCfg) -> Result<(), LayerError> {
        let cell = self.cell()?.clone();
        if sf.cfi == 0 || sf.cfi > 3 {
            return Err(LayerError::ProcessingError(format!(
                "invalid CFI {}",
                sf.cfi
            )));
        }
        let mut framed = msg.to_vec();
        framed.extend_from_slice(&crc16(msg).to_be_bytes());
        let symbols = bytes_to_qpsk(&framed);
        // Control region spans symbols 0..cfi; interleave after the CRS/PCFICH
        let n_sc = cell.nof_prb * 12;
        let mut it = (0..sf.cfi as usize)
            .flat_map(|l| (0..n_sc).map(move |k| (l, k)))
            .filter(|(l, k)| !(*l == 0 && k % 6 == (cell.pci.0 as usize) % 6));
        for s in symbols {
            match it.next() {
                Some((l, k)) => self.grid.re[l][k] = s,
                None => {
                    return Err(LayerError::ProcessingError(
                        "control region full".into(),
                    ))
                }
            }
        }
        Ok(())
    }
}
