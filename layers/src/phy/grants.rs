//! Grant and subframe data model
//!
//! DCI messages as delivered by the MAC scheduler, their translation into
//! PHY resource-allocation grants, and the transient per-TTI subframe
//! configuration.

use crate::LayerError;
use bytes::Bytes;
use common::{CellConfig, Rnti, Tti};

/// Highest MCS index carrying explicit transport-block parameters. A
/// signalled index above this is the adaptive-retransmission sentinel:
/// reuse the previously transmitted TB parameters, keep the new RV.
pub const MAX_UL_MCS: u32 = 28;

/// Subframe type for the downlink resource grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfType {
    Normal,
    Mbsfn,
}

/// Per-TTI downlink subframe configuration
#[derive(Debug, Clone)]
pub struct DlSfCfg {
    pub tti: Tti,
    pub sf_type: SfType,
    /// Control format indicator (number of PDCCH symbols)
    pub cfi: u8,
}

/// Per-TTI uplink subframe configuration
#[derive(Debug, Clone)]
pub struct UlSfCfg {
    pub tti: Tti,
}

/// Transport-block parameters, cached per RNTI/HARQ-process for adaptive
/// retransmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbParams {
    pub tbs_bytes: usize,
    pub mcs_idx: u32,
    pub rv: u32,
}

/// Downlink control information carrying a DL-SCH grant
#[derive(Debug, Clone)]
pub struct DciDl {
    pub rnti: Rnti,
    /// HARQ process ID
    pub pid: u32,
    pub mcs_idx: u32,
    pub rv: u32,
    pub prb_start: usize,
    pub nof_prb: usize,
}

/// Downlink control information carrying an UL-SCH grant (format 0/0A)
#[derive(Debug, Clone)]
pub struct DciUl {
    pub rnti: Rnti,
    /// HARQ process ID
    pub pid: u32,
    pub mcs_idx: u32,
    pub rv: u32,
    pub prb_start: usize,
    pub nof_prb: usize,
    /// DMRS cyclic-shift field, consumed later by the PHICH response
    pub n_dmrs: u32,
    /// Aperiodic CQI request flag
    pub cqi_request: bool,
}

/// One scheduled downlink transmission: the DCI plus the MAC PDU to encode
#[derive(Debug, Clone)]
pub struct DlSfGrant {
    pub dci: DciDl,
    pub data: Bytes,
}

/// One scheduled uplink reception
#[derive(Debug, Clone)]
pub struct UlSfGrant {
    pub dci: DciUl,
    /// Whether the grant needs a PDCCH transmission this TTI (false for
    /// non-adaptive HARQ retransmissions)
    pub needs_pdcch: bool,
}

/// Pending PHICH ACK/NACK for a previously received PUSCH
#[derive(Debug, Clone, Copy)]
pub struct PhichItem {
    pub rnti: Rnti,
    pub ack: bool,
}

/// MBSFN subframe configuration and payload
#[derive(Debug, Clone)]
pub struct MbsfnCfg {
    pub enable: bool,
    pub area_id: u32,
    pub mcs: u32,
    pub payload: Bytes,
}

/// Uplink control information configuration for one RNTI/TTI
#[derive(Debug, Clone, Default)]
pub struct UciCfg {
    /// Number of HARQ-ACK bits expected
    pub nof_ack: usize,
    /// CQI report expected this TTI
    pub cqi_expected: bool,
    /// Scheduling-request opportunity this TTI
    pub sr_opportunity: bool,
}

/// Decoded uplink control information
#[derive(Debug, Clone, Default)]
pub struct UciValue {
    pub ack: Vec<bool>,
    pub cqi: Option<u8>,
    pub sr: bool,
}

/// PHY resource-allocation grant for one PUSCH reception, produced by
/// translating a [`DciUl`] against the cell configuration
#[derive(Debug, Clone)]
pub struct PuschGrant {
    pub rnti: Rnti,
    pub pid: u32,
    pub tb: TbParams,
    pub prb_start: usize,
    pub nof_prb: usize,
    pub n_dmrs: u32,
}

impl PuschGrant {
    /// Translate an uplink DCI into a PHY grant (the radio-access procedure).
    ///
    /// `tb` carries the effective transport-block parameters: either derived
    /// from the signalled MCS or, for adaptive retransmissions, the cached
    /// parameters of the previous transmission.
    pub fn from_dci(dci: &DciUl, cell: &CellConfig, tb: TbParams) -> Result<Self, LayerError> {
        if dci.nof_prb == 0 || dci.prb_start + dci.nof_prb > cell.nof_prb {
            return Err(LayerError::ProcessingError(format!(
                "UL grant out of range: prb_start={} nof_prb={} cell_nof_prb={}",
                dci.prb_start, dci.nof_prb, cell.nof_prb
            )));
        }
        if tb.tbs_bytes > max_tbs_bytes(dci.nof_prb) {
            return Err(LayerError::ProcessingError(format!(
                "TBS {} does not fit in {} PRBs",
                tb.tbs_bytes, dci.nof_prb
            )));
        }
        Ok(Self {
            rnti: dci.rnti,
            pid: dci.pid,
            tb,
            prb_start: dci.prb_start,
            nof_prb: dci.nof_prb,
            n_dmrs: dci.n_dmrs,
        })
    }
}

/// Modulation order (bits per symbol) for an MCS index
pub fn bits_per_symbol(mcs_idx: u32) -> usize {
    match mcs_idx {
        0..=10 => 2,
        11..=20 => 4,
        _ => 6,
    }
}

/// Data resource elements available to a PUSCH allocation: 12 subcarriers
/// per PRB over 12 data symbols (2 of the 14 carry DMRS)
pub fn nof_data_re(nof_prb: usize) -> usize {
    nof_prb * 12 * 12
}

/// Transport-block size in bytes for an MCS/allocation pair.
///
/// Coarse rate-1/3 derivation; stands in for the 3GPP TBS tables, which are
/// out of scope here.
pub fn tbs_bytes(mcs_idx: u32, nof_prb: usize) -> usize {
    let raw_bits = nof_data_re(nof_prb) * bits_per_symbol(mcs_idx);
    let info_bits = raw_bits * (mcs_idx as usize + 4) / (3 * 32);
    // Reserve room for the 16-bit TB CRC
    (info_bits / 8).saturating_sub(2).max(1)
}

/// Largest transport block the allocation can carry (highest modulation,
/// CRC excluded)
pub fn max_tbs_bytes(nof_prb: usize) -> usize {
    nof_data_re(nof_prb) * 6 / 8 - 2
}
