//! Cross-carrier UE directory interface
//!
//! The directory is owned by PHY-common and shared by every component
//! carrier worker of a UE. It stores per-UE configuration, the
//! last-transmitted transport-block cache driving adaptive retransmissions,
//! and ACK-pending tracking. Implementations must support concurrent
//! access from multiple worker threads.

use super::grants::{DciDl, TbParams, UciCfg, UciValue};
use crate::LayerError;
use common::{Rnti, Tti};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Dedicated uplink configuration for one UE on one carrier
#[derive(Debug, Clone, Default)]
pub struct UlConfig {
    /// PUCCH resource index
    pub n_pucch: u32,
    /// Sounding reference signals configured
    pub srs_enabled: bool,
}

/// Dedicated downlink configuration for one UE on one carrier
#[derive(Debug, Clone, Default)]
pub struct DlConfig {
    /// Transmission mode (1-4)
    pub tx_mode: u8,
}

/// DCI search-space configuration for one UE on one carrier
#[derive(Debug, Clone, Default)]
pub struct DciConfig {
    /// UE-specific search space enabled (common search space otherwise)
    pub ue_ss_enabled: bool,
    /// PDCCH aggregation level
    pub aggregation_level: u8,
}

/// External UE directory consumed by the worker, keyed by RNTI and
/// component-carrier index.
///
/// `fill_uci_cfg` is tri-state: `Ok(None)` means no UCI is expected this
/// TTI, `Ok(Some(_))` means UCI must be decoded, `Err` is a lookup failure.
pub trait UeDatabase: Send + Sync {
    fn get_ul_config(&self, rnti: Rnti, cc_idx: usize) -> Result<UlConfig, LayerError>;
    fn get_dl_config(&self, rnti: Rnti, cc_idx: usize) -> Result<DlConfig, LayerError>;
    fn get_dci_ul_config(&self, rnti: Rnti, cc_idx: usize) -> Result<DciConfig, LayerError>;
    fn get_dci_dl_config(&self, rnti: Rnti, cc_idx: usize) -> Result<DciConfig, LayerError>;

    fn fill_uci_cfg(
        &self,
        tti: Tti,
        cc_idx: usize,
        rnti: Rnti,
        cqi_requested: bool,
        is_pusch: bool,
    ) -> Result<Option<UciCfg>, LayerError>;

    fn get_last_ul_tb(&self, rnti: Rnti, cc_idx: usize, pid: u32) -> Result<TbParams, LayerError>;

    /// Best-effort cache write; callers log failures without propagating
    fn set_last_ul_tb(
        &self,
        rnti: Rnti,
        cc_idx: usize,
        pid: u32,
        tb: TbParams,
    ) -> Result<(), LayerError>;

    fn send_uci_data(
        &self,
        tti: Tti,
        rnti: Rnti,
        cc_idx: usize,
        uci_cfg: &UciCfg,
        uci_value: &UciValue,
    ) -> Result<(), LayerError>;

    /// Record that HARQ feedback for this DL grant is expected at `tti`
    fn set_ack_pending(&self, tti: Tti, cc_idx: usize, dci: &DciDl);

    /// True when `cc_idx` is this RNTI's primary cell
    fn is_pcell(&self, rnti: Rnti, cc_idx: usize) -> bool;
}

#[derive(Debug, Default)]
struct UeEntry {
    ul: UlConfig,
    dl: DlConfig,
    dci: DciConfig,
    pcell_cc: usize,
    /// Last transmitted TB per (cc_idx, HARQ pid)
    last_ul_tb: HashMap<(usize, u32), TbParams>,
    /// TTIs with outstanding HARQ feedback per carrier
    ack_pending: Vec<(Tti, usize)>,
}

/// Reference directory implementation used by the binary and tests.
/// A single mutex guards the whole map; workers only touch it from the
/// per-TTI path, well within budget.
#[derive(Default)]
pub struct InMemoryUeDb {
    ues: Mutex<HashMap<Rnti, UeEntry>>,
}

impl InMemoryUeDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Rnti, UeEntry>> {
        self.ues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a UE with default dedicated configuration on `pcell_cc`
    pub fn add_ue(&self, rnti: Rnti, pcell_cc: usize) {
        let mut ues = self.lock();
        ues.entry(rnti).or_insert_with(|| UeEntry {
            pcell_cc,
            ..Default::default()
        });
        debug!("ue_db: added UE rnti={}", rnti);
    }

    pub fn rem_ue(&self, rnti: Rnti) {
        self.lock().remove(&rnti);
        debug!("ue_db: removed UE rnti={}", rnti);
    }

    fn with_ue<T>(
        &self,
        rnti: Rnti,
        f: impl FnOnce(&mut UeEntry) -> T,
    ) -> Result<T, LayerError> {
        let mut ues = self.lock();
        match ues.get_mut(&rnti) {
            Some(entry) => Ok(f(entry)),
            None => Err(LayerError::UnknownRnti(rnti)),
        }
    }
}

impl UeDatabase for InMemoryUeDb {
    fn get_ul_config(&self, rnti: Rnti, _cc_idx: usize) -> Result<UlConfig, LayerError> {
        self.with_ue(rnti, |ue| ue.ul.clone())
    }

    fn get_dl_config(&self, rnti: Rnti, _cc_idx: usize) -> Result<DlConfig, LayerError> {
        self.with_ue(rnti, |ue| ue.dl.clone())
    }

    fn get_dci_ul_config(&self, rnti: Rnti, _cc_idx: usize) -> Result<DciConfig, LayerError> {
        self.with_ue(rnti, |ue| ue.dci.clone())
    }

    fn get_dci_dl_config(&self, rnti: Rnti, _cc_idx: usize) -> Result<DciConfig, LayerError> {
        self.with_ue(rnti, |ue| ue.dci.clone())
    }

    fn fill_uci_cfg(
        &self,
        tti: Tti,
        cc_idx: usize,
        rnti: Rnti,
        cqi_requested: bool,
        _is_pusch: bool,
    ) -> Result<Option<UciCfg>, LayerError> {
        self.with_ue(rnti, |ue| {
            let mut cfg = UciCfg::default();
            // Collect HARQ-ACK bits that fall due this TTI
            let due = ue
                .ack_pending
                .iter()
                .filter(|(t, cc)| *t == tti && *cc == cc_idx)
                .count();
            ue.ack_pending.retain(|(t, cc)| !(*t == tti && *cc == cc_idx));
            cfg.nof_ack = due;
            cfg.cqi_expected = cqi_requested;
            if due == 0 && !cqi_requested {
                None
            } else {
                Some(cfg)
            }
        })
    }

    fn get_last_ul_tb(&self, rnti: Rnti, cc_idx: usize, pid: u32) -> Result<TbParams, LayerError> {
        self.with_ue(rnti, |ue| ue.last_ul_tb.get(&(cc_idx, pid)).copied())?
            .ok_or_else(|| {
                LayerError::ConfigUnavailable(format!(
                    "no cached UL TB for rnti={} cc={} pid={}",
                    rnti, cc_idx, pid
                ))
            })
    }

    fn set_last_ul_tb(
        &self,
        rnti: Rnti,
        cc_idx: usize,
        pid: u32,
        tb: TbParams,
    ) -> Result<(), LayerError> {
        self.with_ue(rnti, |ue| {
            ue.last_ul_tb.insert((cc_idx, pid), tb);
        })
    }

    fn send_uci_data(
        &self,
        tti: Tti,
        rnti: Rnti,
        _cc_idx: usize,
        uci_cfg: &UciCfg,
        uci_value: &UciValue,
    ) -> Result<(), LayerError> {
        trace!(
            "uci tti={} rnti={} ack_bits={} cqi={:?} sr={}",
            tti,
            rnti,
            uci_cfg.nof_ack,
            uci_value.cqi,
            uci_value.sr
        );
        Ok(())
    }

    fn set_ack_pending(&self, tti: Tti, cc_idx: usize, dci: &DciDl) {
        let _ = self.with_ue(dci.rnti, |ue| {
            ue.ack_pending.push((tti, cc_idx));
        });
    }

    fn is_pcell(&self, rnti: Rnti, cc_idx: usize) -> bool {
        self.with_ue(rnti, |ue| ue.pcell_cc == cc_idx).unwrap_or(false)
    }
}
