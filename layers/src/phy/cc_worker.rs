//! Component-carrier worker
//!
//! Per-TTI real-time pipeline for one carrier: receives uplink baseband
//! samples, decodes PUSCH/PUCCH, and encodes the downlink channels
//! (PDCCH, PDSCH, PMCH, PHICH). One mutex guards the RNTI directory and
//! everything reached through it, so `work_ul`, `work_dl`, RNTI add/remove
//! and metrics polling are mutually exclusive on the same worker.
//!
//! A single erroring UE or grant never aborts the subframe: failed grants
//! are recorded in the per-TTI report and processing continues with the
//! remaining users and channels.

use super::grants::{
    tbs_bytes, DlSfCfg, DlSfGrant, MbsfnCfg, PhichItem, PuschGrant, SfType, TbParams, UlSfCfg,
    UlSfGrant, MAX_UL_MCS,
};
use super::metrics::UeMetrics;
use super::phy_common::PhyCommon;
use super::signal::{
    papr_db, DownlinkProcessor, LteDownlink, LteUplink, SoftBuffer, UplinkProcessor,
};
use super::stack::UlChannel;
use super::ue::UeContext;
use super::PUSCH_RL_SNR_DB_TH;
use crate::LayerError;
use common::{CellConfig, Rnti, FDD_HARQ_DELAY_DL_MS};
use num_complex::Complex32;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Outcome of one scheduled PUSCH grant
#[derive(Debug)]
pub enum PuschStatus {
    Decoded { crc_ok: bool },
    /// Grant skipped without decoding (invalid RNTI, handover race, ...)
    Skipped,
    Failed(LayerError),
}

/// Per-grant result entry of an uplink TTI
#[derive(Debug)]
pub struct PuschOutcome {
    pub rnti: Rnti,
    pub status: PuschStatus,
}

/// Uplink TTI report returned by [`CcWorker::work_ul`]
#[derive(Debug, Default)]
pub struct UlTtiReport {
    pub pusch: Vec<PuschOutcome>,
    pub pucch_detected: usize,
}

/// Downlink pipeline step, for per-step failure reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlStep {
    BaseSignals,
    PdcchDl,
    Pdsch,
    Pmch,
    PdcchUl,
    Phich,
    Signal,
}

/// Downlink TTI report: per-channel isolation made explicit. A failed step
/// is recorded here while the later independent steps still run.
#[derive(Debug, Default)]
pub struct DlTtiReport {
    pub errors: Vec<(DlStep, LayerError)>,
}

impl DlTtiReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Inner {
    initiated: bool,
    cell: Option<CellConfig>,
    /// RNTI directory: every per-UE context this worker owns
    ue_db: HashMap<Rnti, UeContext>,
    ul_proc: Box<dyn UplinkProcessor>,
    dl_proc: Box<dyn DownlinkProcessor>,
    signal_buffer_rx: Vec<Vec<Complex32>>,
    signal_buffer_tx: Vec<Vec<Complex32>>,
    pusch_softbuffer: Option<SoftBuffer>,
    mbsfn_softbuffer: Option<SoftBuffer>,
}

/// Per-carrier PHY worker, driven once per TTI
pub struct CcWorker {
    cc_idx: usize,
    phy: Arc<PhyCommon>,
    inner: Mutex<Inner>,
}

impl CcWorker {
    /// Create a worker with the default DSP engines
    pub fn new(phy: Arc<PhyCommon>, cc_idx: usize) -> Self {
        let args = phy.args();
        let ul = Box::new(LteUplink::new(args.pusch_max_its, args.pusch_8bit_decoder));
        let dl = Box::new(LteDownlink::new());
        Self::with_processors(phy, cc_idx, ul, dl)
    }

    /// Create a worker with injected DSP engines
    pub fn with_processors(
        phy: Arc<PhyCommon>,
        cc_idx: usize,
        ul_proc: Box<dyn UplinkProcessor>,
        dl_proc: Box<dyn DownlinkProcessor>,
    ) -> Self {
        Self {
            cc_idx,
            phy,
            inner: Mutex::new(Inner {
                initiated: false,
                cell: None,
                ue_db: HashMap::new(),
                ul_proc,
                dl_proc,
                signal_buffer_rx: Vec::new(),
                signal_buffer_tx: Vec::new(),
                pusch_softbuffer: None,
                mbsfn_softbuffer: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind the worker to its carrier: allocate per-antenna buffers, bind
    /// the DSP engines to the cell size, apply CFR, pre-register the
    /// broadcast/paging/RA RNTIs and allocate the soft buffers.
    ///
    /// On failure the worker stays un-initiated and `work_ul`/`work_dl`
    /// refuse to run. [`LayerError::Fatal`] from the soft-buffer allocation
    /// is propagated unchanged so the application layer can decide to
    /// terminate.
    pub fn init(&self) -> Result<(), LayerError> {
        let inner = &mut *self.lock();
        if let Err(e) = Self::init_inner(inner, &self.phy, self.cc_idx) {
            error!("cc_worker {}: init failed: {}", self.cc_idx, e);
            return Err(e);
        }
        info!(
            "cc_worker {}: initiated with {} PRB, {} ports",
            self.cc_idx,
            inner.cell.as_ref().map(|c| c.nof_prb).unwrap_or(0),
            inner.signal_buffer_tx.len()
        );
        Ok(())
    }

    fn init_inner(inner: &mut Inner, phy: &PhyCommon, cc_idx: usize) -> Result<(), LayerError> {
        let cell = phy
            .get_cell(cc_idx)
            .ok_or_else(|| {
                LayerError::InitializationFailed(format!(
                    "carrier index {} outside cell list of {}",
                    cc_idx,
                    phy.nof_cells()
                ))
            })?
            .clone();
        if !cell.is_valid() {
            return Err(LayerError::InvalidConfiguration(format!(
                "cell {:?} not usable",
                cell
            )));
        }

        inner.ul_proc.set_cell(&cell)?;
        inner.dl_proc.set_cell(&cell)?;
        inner.dl_proc.configure_cfr(phy.get_cfr_config())?;

        // Twice one subframe per antenna port
        let buf_len = 2 * cell.sf_len();
        inner.signal_buffer_rx =
            vec![vec![Complex32::new(0.0, 0.0); buf_len]; cell.nof_ports];
        inner.signal_buffer_tx =
            vec![vec![Complex32::new(0.0, 0.0); buf_len]; cell.nof_ports];

        // Broadcast channels are always present in the directory
        inner.ue_db.insert(Rnti::SI_RNTI, UeContext::new(Rnti::SI_RNTI));
        inner.ue_db.insert(Rnti::P_RNTI, UeContext::new(Rnti::P_RNTI));
        for r in Rnti::RA_RNTI_START..=Rnti::RA_RNTI_END {
            inner.ue_db.insert(Rnti(r), UeContext::new(Rnti(r)));
        }

        let max_soft_bits = super::grants::nof_data_re(cell.nof_prb) * 6;
        inner.pusch_softbuffer = Some(SoftBuffer::new(max_soft_bits)?);
        let mut mbsfn = SoftBuffer::new(max_soft_bits)?;
        mbsfn.reset();
        inner.mbsfn_softbuffer = Some(mbsfn);

        inner.cell = Some(cell);
        inner.initiated = true;
        Ok(())
    }

    pub fn is_initiated(&self) -> bool {
        self.lock().initiated
    }

    pub fn cc_idx(&self) -> usize {
        self.cc_idx
    }

    /// Idempotent insert: an existing entry keeps its state and metrics
    pub fn add_rnti(&self, rnti: Rnti) {
        let mut inner = self.lock();
        inner
            .ue_db
            .entry(rnti)
            .or_insert_with(|| UeContext::new(rnti));
        debug!("cc_worker {}: added rnti={}", self.cc_idx, rnti);
    }

    /// Idempotent remove
    pub fn rem_rnti(&self, rnti: Rnti) {
        let mut inner = self.lock();
        if inner.ue_db.remove(&rnti).is_some() {
            debug!("cc_worker {}: removed rnti={}", self.cc_idx, rnti);
        }
    }

    pub fn get_nof_rnti(&self) -> usize {
        self.lock().ue_db.len()
    }

    /// Copy baseband samples into the worker's RX buffer for one port
    pub fn write_rx_buffer(&self, port: usize, samples: &[Complex32]) -> Result<(), LayerError> {
        let inner = &mut *self.lock();
        if !inner.initiated {
            return Err(LayerError::NotInitialized);
        }
        let buf = inner
            .signal_buffer_rx
            .get_mut(port)
            .ok_or_else(|| LayerError::ProcessingError(format!("no RX port {}", port)))?;
        let n = samples.len().min(buf.len());
        buf[..n].copy_from_slice(&samples[..n]);
        Ok(())
    }

    /// Copy one subframe of generated transmit signal out of the worker
    pub fn read_tx_buffer(&self, port: usize) -> Result<Vec<Complex32>, LayerError> {
        let inner = &*self.lock();
        if !inner.initiated {
            return Err(LayerError::NotInitialized);
        }
        let cell = inner.cell.as_ref().ok_or(LayerError::NotInitialized)?;
        inner
            .signal_buffer_tx
            .get(port)
            .map(|b| b[..cell.sf_len()].to_vec())
            .ok_or_else(|| LayerError::ProcessingError(format!("no TX port {}", port)))
    }

    /// Uplink processing for one TTI: front-end FFT, then PUSCH decoding
    /// for every scheduled grant, then PUCCH for pcell users without a
    /// PUSCH grant. The directory lock is held for the whole call.
    pub fn work_ul(
        &self,
        ul_sf: &UlSfCfg,
        grants: &[UlSfGrant],
    ) -> Result<UlTtiReport, LayerError> {
        let inner = &mut *self.lock();
        if !inner.initiated {
            return Err(LayerError::NotInitialized);
        }
        let cell = inner.cell.clone().ok_or(LayerError::NotInitialized)?;

        inner.ul_proc.run_fft(&inner.signal_buffer_rx, ul_sf)?;

        let mut report = UlTtiReport::default();
        self.decode_pusch(inner, &cell, ul_sf, grants, &mut report);
        self.decode_pucch(inner, ul_sf, grants, &mut report);
        Ok(report)
    }

    /// Walk all scheduled PUSCH grants, collecting a per-grant outcome.
    /// A failing grant is recorded and the remaining grants are still
    /// attempted, matching the PUCCH loop's continue-on-error policy.
    fn decode_pusch(
        &self,
        inner: &mut Inner,
        cell: &CellConfig,
        ul_sf: &UlSfCfg,
        grants: &[UlSfGrant],
        report: &mut UlTtiReport,
    ) {
        for grant in grants {
            let status = self.decode_pusch_rnti(inner, cell, ul_sf, grant);
            if let PuschStatus::Failed(e) = &status {
                error!(
                    "cc_worker {}: PUSCH rnti={} tti={}: {}",
                    self.cc_idx, grant.dci.rnti, ul_sf.tti, e
                );
            }
            report.pusch.push(PuschOutcome {
                rnti: grant.dci.rnti,
                status,
            });
        }
    }

    fn decode_pusch_rnti(
        &self,
        inner: &mut Inner,
        cell: &CellConfig,
        ul_sf: &UlSfCfg,
        grant: &UlSfGrant,
    ) -> PuschStatus {
        let Inner {
            ref mut ue_db,
            ref mut ul_proc,
            ref mut pusch_softbuffer,
            ..
        } = *inner;
        let phy = self.phy.as_ref();
        let cc_idx = self.cc_idx;
        let dci = &grant.dci;
        let rnti = dci.rnti;

        if rnti == Rnti::INVALID {
            return PuschStatus::Skipped;
        }
        // Absence is expected during intra-station handover races
        let Some(ue) = ue_db.get_mut(&rnti) else {
            info!(
                "cc_worker {}: PUSCH grant for unknown rnti={}, skipping",
                cc_idx, rnti
            );
            return PuschStatus::Skipped;
        };
        let ul_cfg = match phy.ue_db().get_ul_config(rnti, cc_idx) {
            Ok(cfg) => cfg,
            Err(e) => {
                info!(
                    "cc_worker {}: no UL config for rnti={} ({}), skipping",
                    cc_idx, rnti, e
                );
                return PuschStatus::Skipped;
            }
        };
        let uci_cfg = match phy
            .ue_db()
            .fill_uci_cfg(ul_sf.tti, cc_idx, rnti, dci.cqi_request, true)
        {
            Ok(cfg) => cfg,
            Err(e) => {
                info!(
                    "cc_worker {}: UCI config for rnti={} unavailable ({}), skipping",
                    cc_idx, rnti, e
                );
                return PuschStatus::Skipped;
            }
        };

        // MCS above the valid range signals an adaptive retransmission:
        // reuse the previous TB parameters, keep the newly signalled RV
        let tb = if dci.mcs_idx > MAX_UL_MCS {
            match phy.ue_db().get_last_ul_tb(rnti, cc_idx, dci.pid) {
                Ok(mut last) => {
                    last.rv = dci.rv;
                    last
                }
                Err(e) => {
                    return PuschStatus::Failed(LayerError::ProcessingError(format!(
                        "adaptive retx without cached TB: {}",
                        e
                    )))
                }
            }
        } else {
            TbParams {
                tbs_bytes: tbs_bytes(dci.mcs_idx, dci.nof_prb),
                mcs_idx: dci.mcs_idx,
                rv: dci.rv,
            }
        };

        let phy_grant = match PuschGrant::from_dci(dci, cell, tb) {
            Ok(g) => g,
            Err(e) => return PuschStatus::Failed(e),
        };

        // Best-effort cache write for future adaptive retransmissions
        if let Err(e) = phy.ue_db().set_last_ul_tb(rnti, cc_idx, dci.pid, tb) {
            warn!(
                "cc_worker {}: failed to cache UL TB for rnti={}: {}",
                cc_idx, rnti, e
            );
        }

        let Some(softbuffer) = pusch_softbuffer.as_mut() else {
            return PuschStatus::Failed(LayerError::NotInitialized);
        };
        let res = match ul_proc.decode_pusch(&ul_cfg, &phy_grant, uci_cfg.as_ref(), softbuffer) {
            Ok(res) => res,
            Err(e) => return PuschStatus::Failed(e),
        };

        // PHICH feedback parameters for the ACK/NACK encoded later
        ue.set_last_ul_grant(phy_grant.prb_start, phy_grant.n_dmrs);

        if res.snr_db > PUSCH_RL_SNR_DB_TH {
            phy.stack()
                .snr_info(ul_sf.tti, rnti, cc_idx, res.snr_db, UlChannel::Pusch);
            if res.ta_us.is_finite() {
                phy.stack().ta_info(ul_sf.tti, rnti, res.ta_us);
            }
        }

        if let Some(uci_cfg) = &uci_cfg {
            if let Err(e) = phy
                .ue_db()
                .send_uci_data(ul_sf.tti, rnti, cc_idx, uci_cfg, &res.uci)
            {
                warn!(
                    "cc_worker {}: failed to forward UCI for rnti={}: {}",
                    cc_idx, rnti, e
                );
            }
        }

        let data_present = phy_grant.tb.tbs_bytes > 0;
        if data_present {
            let rssi = res.epre_dbfs - phy.args().rx_gain_offset;
            ue.metrics_ul(phy_grant.tb.mcs_idx, rssi, res.snr_db, res.avg_iterations);
            phy.stack()
                .crc_info(ul_sf.tti, rnti, cc_idx, phy_grant.tb.tbs_bytes, res.crc_ok);
            phy.stack().push_pdu(
                ul_sf.tti,
                rnti,
                cc_idx,
                res.data.clone(),
                res.crc_ok,
                phy_grant.nof_prb,
            );
        }

        debug!(
            "cc_worker {}: PUSCH rnti={} tti={} tbs={} rv={} snr={:.1} dB crc={}",
            cc_idx, rnti, ul_sf.tti, phy_grant.tb.tbs_bytes, phy_grant.tb.rv, res.snr_db, res.crc_ok
        );
        PuschStatus::Decoded { crc_ok: res.crc_ok }
    }

    /// Decode PUCCH for every user RNTI that is this carrier's primary
    /// cell and had no PUSCH grant this TTI. Retrieval failures skip the
    /// RNTI, never the loop.
    fn decode_pucch(
        &self,
        inner: &mut Inner,
        ul_sf: &UlSfCfg,
        grants: &[UlSfGrant],
        report: &mut UlTtiReport,
    ) {
        let Inner {
            ref mut ue_db,
            ref mut ul_proc,
            ..
        } = *inner;
        let phy = self.phy.as_ref();
        let cc_idx = self.cc_idx;
        let pusch_rntis: HashSet<Rnti> = grants.iter().map(|g| g.dci.rnti).collect();

        for (rnti, ue) in ue_db.iter_mut() {
            if !rnti.is_user() || pusch_rntis.contains(rnti) {
                continue;
            }
            if !phy.ue_db().is_pcell(*rnti, cc_idx) {
                continue;
            }
            let ul_cfg = match phy.ue_db().get_ul_config(*rnti, cc_idx) {
                Ok(cfg) => cfg,
                Err(_) => continue,
            };
            let uci_cfg = match phy.ue_db().fill_uci_cfg(ul_sf.tti, cc_idx, *rnti, false, false) {
                Ok(Some(cfg)) => cfg,
                Ok(None) => continue,
                Err(_) => continue,
            };
            let res = match ul_proc.decode_pucch(&ul_cfg, &uci_cfg) {
                Ok(res) => res,
                Err(e) => {
                    error!(
                        "cc_worker {}: PUCCH rnti={} tti={}: {}",
                        cc_idx, rnti, ul_sf.tti, e
                    );
                    continue;
                }
            };
            if !res.detected {
                continue;
            }
            if let Err(e) = phy
                .ue_db()
                .send_uci_data(ul_sf.tti, *rnti, cc_idx, &uci_cfg, &res.uci)
            {
                warn!(
                    "cc_worker {}: failed to forward PUCCH UCI for rnti={}: {}",
                    cc_idx, rnti, e
                );
            }
            if res.snr_db > PUSCH_RL_SNR_DB_TH {
                phy.stack()
                    .snr_info(ul_sf.tti, *rnti, cc_idx, res.snr_db, UlChannel::Pucch);
                if res.ta_us.is_finite() {
                    phy.stack().ta_info(ul_sf.tti, *rnti, res.ta_us);
                }
            }
            let rssi = res.rssi_dbfs - phy.args().rx_gain_offset;
            ue.metrics_ul_pucch(rssi, res.ni_dbfs, res.snr_db);
            report.pucch_detected += 1;
        }
    }

    /// Downlink processing for one TTI: base signals, data channels by
    /// subframe type, uplink-grant PDCCH, PHICH, signal generation, gain
    /// scaling and the one-shot PAPR measurement. Each encode step is
    /// isolated: a failure is recorded in the report and the later steps
    /// still run.
    pub fn work_dl(
        &self,
        dl_sf: &DlSfCfg,
        dl_grants: &[DlSfGrant],
        ul_grants: &[UlSfGrant],
        phich: &[PhichItem],
        mbsfn: Option<&MbsfnCfg>,
    ) -> Result<DlTtiReport, LayerError> {
        let inner = &mut *self.lock();
        if !inner.initiated {
            return Err(LayerError::NotInitialized);
        }
        let mut report = DlTtiReport::default();

        if let Err(e) = inner.dl_proc.put_base_signals(dl_sf) {
            error!("cc_worker {}: base signals tti={}: {}", self.cc_idx, dl_sf.tti, e);
            report.errors.push((DlStep::BaseSignals, e));
        }

        match (dl_sf.sf_type, mbsfn) {
            (SfType::Normal, _) => {
                self.encode_pdcch_dl(inner, dl_sf, dl_grants, &mut report);
                self.encode_pdsch(inner, dl_sf, dl_grants, &mut report);
            }
            (SfType::Mbsfn, Some(cfg)) if cfg.enable => {
                self.encode_pmch(inner, dl_sf, cfg, &mut report);
            }
            (SfType::Mbsfn, _) => {
                debug!(
                    "cc_worker {}: MBSFN subframe without MBSFN config, tti={}",
                    self.cc_idx, dl_sf.tti
                );
            }
        }

        self.encode_pdcch_ul(inner, dl_sf, ul_grants, &mut report);
        self.encode_phich(inner, dl_sf, phich, &mut report);

        if let Err(e) = inner.dl_proc.gen_signal(&mut inner.signal_buffer_tx) {
            error!("cc_worker {}: signal generation tti={}: {}", self.cc_idx, dl_sf.tti, e);
            report.errors.push((DlStep::Signal, e));
        }

        let gain = self.phy.get_cell_gain(self.cc_idx);
        if (gain - 1.0).abs() > f32::EPSILON {
            for port in inner.signal_buffer_tx.iter_mut() {
                for s in port.iter_mut() {
                    *s *= gain;
                }
            }
        }

        if self.phy.get_cell_measure_trigger(self.cc_idx) {
            for (port, buf) in inner.signal_buffer_tx.iter().enumerate() {
                info!(
                    "cc_worker {}: tti={} port={} PAPR={:.2} dB",
                    self.cc_idx,
                    dl_sf.tti,
                    port,
                    papr_db(buf)
                );
            }
            self.phy.clear_cell_measure_trigger(self.cc_idx);
        }

        Ok(report)
    }

    fn encode_pdcch_dl(
        &self,
        inner: &mut Inner,
        dl_sf: &DlSfCfg,
        grants: &[DlSfGrant],
        report: &mut DlTtiReport,
    ) {
        for grant in grants {
            let rnti = grant.dci.rnti;
            let dci_cfg = match self.phy.ue_db().get_dci_dl_config(rnti, self.cc_idx) {
                Ok(cfg) => cfg,
                Err(e) => {
                    info!(
                        "cc_worker {}: no DL DCI config for rnti={} ({}), skipping",
                        self.cc_idx, rnti, e
                    );
                    continue;
                }
            };
            if let Err(e) = inner.dl_proc.put_pdcch_dl(&dci_cfg, &grant.dci, dl_sf) {
                error!(
                    "cc_worker {}: PDCCH DL rnti={} tti={}: {}",
                    self.cc_idx, rnti, dl_sf.tti, e
                );
                report.errors.push((DlStep::PdcchDl, e));
                continue;
            }
            // HARQ feedback for this grant is expected after the fixed delay
            self.phy.ue_db().set_ack_pending(
                dl_sf.tti.add(FDD_HARQ_DELAY_DL_MS),
                self.cc_idx,
                &grant.dci,
            );
        }
    }

    fn encode_pdsch(
        &self,
        inner: &mut Inner,
        dl_sf: &DlSfCfg,
        grants: &[DlSfGrant],
        report: &mut DlTtiReport,
    ) {
        for grant in grants {
            let rnti = grant.dci.rnti;
            let dl_cfg = match self.phy.ue_db().get_dl_config(rnti, self.cc_idx) {
                Ok(cfg) => cfg,
                Err(e) => {
                    info!(
                        "cc_worker {}: no DL config for rnti={} ({}), skipping",
                        self.cc_idx, rnti, e
                    );
                    continue;
                }
            };
            if let Err(e) = inner.dl_proc.put_pdsch(&dl_cfg, grant, dl_sf) {
                error!(
                    "cc_worker {}: PDSCH rnti={} tti={}: {}",
                    self.cc_idx, rnti, dl_sf.tti, e
                );
                report.errors.push((DlStep::Pdsch, e));
                continue;
            }
            if let Some(ue) = inner.ue_db.get_mut(&rnti) {
                ue.metrics_dl(grant.dci.mcs_idx);
            }
        }
    }

    fn encode_pmch(
        &self,
        inner: &mut Inner,
        dl_sf: &DlSfCfg,
        mbsfn: &MbsfnCfg,
        report: &mut DlTtiReport,
    ) {
        let Inner {
            ref mut ue_db,
            ref mut dl_proc,
            ref mut mbsfn_softbuffer,
            ..
        } = *inner;
        let Some(softbuffer) = mbsfn_softbuffer.as_mut() else {
            report.errors.push((DlStep::Pmch, LayerError::NotInitialized));
            return;
        };
        if let Err(e) = dl_proc.put_pmch(mbsfn, softbuffer, dl_sf) {
            error!("cc_worker {}: PMCH tti={}: {}", self.cc_idx, dl_sf.tti, e);
            report.errors.push((DlStep::Pmch, e));
            return;
        }
        ue_db
            .entry(Rnti::M_RNTI)
            .or_insert_with(|| UeContext::new(Rnti::M_RNTI))
            .metrics_dl(mbsfn.mcs);
    }

    fn encode_pdcch_ul(
        &self,
        inner: &mut Inner,
        dl_sf: &DlSfCfg,
        grants: &[UlSfGrant],
        report: &mut DlTtiReport,
    ) {
        for grant in grants.iter().filter(|g| g.needs_pdcch) {
            let rnti = grant.dci.rnti;
            let dci_cfg = match self.phy.ue_db().get_dci_ul_config(rnti, self.cc_idx) {
                Ok(cfg) => cfg,
                Err(e) => {
                    info!(
                        "cc_worker {}: no UL DCI config for rnti={} ({}), skipping",
                        self.cc_idx, rnti, e
                    );
                    continue;
                }
            };
            if let Err(e) = inner.dl_proc.put_pdcch_ul(&dci_cfg, &grant.dci, dl_sf) {
                error!(
                    "cc_worker {}: PDCCH UL rnti={} tti={}: {}",
                    self.cc_idx, rnti, dl_sf.tti, e
                );
                report.errors.push((DlStep::PdcchUl, e));
            }
        }
    }

    /// Encode PHICH ACK/NACK using each target UE's cached grant
    /// parameters from the uplink pass
    fn encode_phich(
        &self,
        inner: &mut Inner,
        dl_sf: &DlSfCfg,
        phich: &[PhichItem],
        report: &mut DlTtiReport,
    ) {
        let Inner {
            ref ue_db,
            ref mut dl_proc,
            ..
        } = *inner;
        for item in phich {
            let Some(ue) = ue_db.get(&item.rnti) else {
                info!(
                    "cc_worker {}: PHICH for unknown rnti={}, skipping",
                    self.cc_idx, item.rnti
                );
                continue;
            };
            let grant = ue.phich_grant();
            if let Err(e) = dl_proc.put_phich(&grant, item.ack, dl_sf) {
                error!(
                    "cc_worker {}: PHICH rnti={} tti={}: {}",
                    self.cc_idx, item.rnti, dl_sf.tti, e
                );
                report.errors.push((DlStep::Phich, e));
                continue;
            }
            debug!(
                "cc_worker {}: PHICH rnti={} tti={} ack={} prb={} n_dmrs={}",
                self.cc_idx, item.rnti, dl_sf.tti, item.ack, grant.n_prb_lowest, grant.n_dmrs
            );
        }
    }

    /// Destructive metrics read for every user RNTI plus the MBSFN
    /// multicast RNTI. Broadcast/paging/RA entries are excluded.
    pub fn get_metrics(&self, out: &mut Vec<(Rnti, UeMetrics)>) {
        let mut inner = self.lock();
        for (rnti, ue) in inner.ue_db.iter_mut() {
            if rnti.is_user() || *rnti == Rnti::M_RNTI {
                out.push((*rnti, ue.metrics_read()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::grants::{DciDl, DciUl, UciCfg, UciValue};
    use crate::phy::signal::{PucchResult, PuschResult};
    use crate::phy::stack::{NullStack, StackInterface};
    use crate::phy::ue::PhichGrant;
    use crate::phy::ue_db::{DciConfig, DlConfig, InMemoryUeDb, UeDatabase, UlConfig};
    use crate::phy::{CfrArgs, PhyArgs};
    use bytes::Bytes;
    use common::{CyclicPrefix, Pci, Tti};
    use std::sync::Mutex as StdMutex;

    // Broadcast entries pre-registered at init: SI + P + 60 RA
    const NOF_BROADCAST_RNTI: usize = 62;

    #[derive(Default)]
    struct MockUlState {
        pusch_calls: Vec<PuschGrant>,
        pucch_calls: usize,
        crc_ok: bool,
    }

    struct MockUl {
        state: Arc<StdMutex<MockUlState>>,
        snr_db: f32,
    }

    impl UplinkProcessor for MockUl {
        fn set_cell(&mut self, _cell: &CellConfig) -> Result<(), LayerError> {
            Ok(())
        }

        fn run_fft(&mut self, _rx: &[Vec<Complex32>], _sf: &UlSfCfg) -> Result<(), LayerError> {
            Ok(())
        }

        fn decode_pusch(
            &mut self,
            _cfg: &UlConfig,
            grant: &PuschGrant,
            _uci: Option<&UciCfg>,
            _softbuffer: &mut SoftBuffer,
        ) -> Result<PuschResult, LayerError> {
            let mut st = self.state.lock().unwrap();
            st.pusch_calls.push(grant.clone());
            Ok(PuschResult {
                crc_ok: st.crc_ok,
                data: Bytes::from(vec![0xAB; grant.tb.tbs_bytes]),
                snr_db: self.snr_db,
                epre_dbfs: -30.0,
                ta_us: 0.5,
                avg_iterations: 1.0,
                uci: UciValue::default(),
            })
        }

        fn decode_pucch(
            &mut self,
            _cfg: &UlConfig,
            _uci_cfg: &UciCfg,
        ) -> Result<PucchResult, LayerError> {
            self.state.lock().unwrap().pucch_calls += 1;
            Ok(PucchResult {
                detected: true,
                uci: UciValue::default(),
                snr_db: self.snr_db,
                rssi_dbfs: -40.0,
                ni_dbfs: -95.0,
                ta_us: 0.1,
            })
        }
    }

    #[derive(Default)]
    struct MockDlState {
        phich: Vec<(usize, u32, bool)>,
        pdsch: usize,
        pdcch_dl: usize,
        pdcch_ul: usize,
        pmch: usize,
        fail_pdsch: bool,
    }

    struct MockDl {
        state: Arc<StdMutex<MockDlState>>,
    }

    impl DownlinkProcessor for MockDl {
        fn set_cell(&mut self, _cell: &CellConfig) -> Result<(), LayerError> {
            Ok(())
        }

        fn configure_cfr(&mut self, _cfr: &CfrArgs) -> Result<(), LayerError> {
            Ok(())
        }

        fn put_base_signals(&mut self, _sf: &DlSfCfg) -> Result<(), LayerError> {
            Ok(())
        }

        fn put_pdcch_dl(
            &mut self,
            _cfg: &DciConfig,
            _dci: &DciDl,
            _sf: &DlSfCfg,
        ) -> Result<(), LayerError> {
            self.state.lock().unwrap().pdcch_dl += 1;
            Ok(())
        }

        fn put_pdcch_ul(
            &mut self,
            _cfg: &DciConfig,
            _dci: &DciUl,
            _sf: &DlSfCfg,
        ) -> Result<(), LayerError> {
            self.state.lock().unwrap().pdcch_ul += 1;
            Ok(())
        }

        fn put_pdsch(
            &mut self,
            _cfg: &DlConfig,
            _grant: &DlSfGrant,
            _sf: &DlSfCfg,
        ) -> Result<(), LayerError> {
            let mut st = self.state.lock().unwrap();
            if st.fail_pdsch {
                return Err(LayerError::ProcessingError("pdsch full".into()));
            }
            st.pdsch += 1;
            Ok(())
        }

        fn put_pmch(
            &mut self,
            _mbsfn: &MbsfnCfg,
            _softbuffer: &mut SoftBuffer,
            _sf: &DlSfCfg,
        ) -> Result<(), LayerError> {
            self.state.lock().unwrap().pmch += 1;
            Ok(())
        }

        fn put_phich(
            &mut self,
            grant: &PhichGrant,
            ack: bool,
            _sf: &DlSfCfg,
        ) -> Result<(), LayerError> {
            self.state
                .lock()
                .unwrap()
                .phich
                .push((grant.n_prb_lowest, grant.n_dmrs, ack));
            Ok(())
        }

        fn gen_signal(&mut self, _tx: &mut [Vec<Complex32>]) -> Result<(), LayerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecStack {
        crc: StdMutex<Vec<(Rnti, usize, bool)>>,
        pdus: StdMutex<Vec<(Rnti, usize, bool)>>,
        snr: StdMutex<Vec<(Rnti, UlChannel)>>,
        ta: StdMutex<Vec<Rnti>>,
    }

    impl StackInterface for RecStack {
        fn crc_info(&self, _tti: Tti, rnti: Rnti, _cc_idx: usize, tb_bytes: usize, crc_ok: bool) {
            self.crc.lock().unwrap().push((rnti, tb_bytes, crc_ok));
        }

        fn push_pdu(
            &self,
            _tti: Tti,
            rnti: Rnti,
            _cc_idx: usize,
            pdu: Bytes,
            crc_ok: bool,
            _nof_prb: usize,
        ) {
            self.pdus.lock().unwrap().push((rnti, pdu.len(), crc_ok));
        }

        fn snr_info(&self, _tti: Tti, rnti: Rnti, _cc_idx: usize, _snr_db: f32, channel: UlChannel) {
            self.snr.lock().unwrap().push((rnti, channel));
        }

        fn ta_info(&self, _tti: Tti, rnti: Rnti, _ta_us: f32) {
            self.ta.lock().unwrap().push(rnti);
        }
    }

    fn test_cell() -> CellConfig {
        CellConfig {
            pci: Pci(1),
            nof_prb: 25,
            nof_ports: 1,
            cp: CyclicPrefix::Normal,
        }
    }

    struct Fixture {
        worker: CcWorker,
        ue_db: Arc<InMemoryUeDb>,
        stack: Arc<RecStack>,
        ul_state: Arc<StdMutex<MockUlState>>,
        dl_state: Arc<StdMutex<MockDlState>>,
    }

    fn setup(crc_ok: bool) -> Fixture {
        let ue_db = Arc::new(InMemoryUeDb::new());
        let stack = Arc::new(RecStack::default());
        let phy = Arc::new(PhyCommon::new(
            PhyArgs::default(),
            vec![test_cell()],
            ue_db.clone(),
            stack.clone(),
        ));
        let ul_state = Arc::new(StdMutex::new(MockUlState {
            crc_ok,
            ..Default::default()
        }));
        let dl_state = Arc::new(StdMutex::new(MockDlState::default()));
        let worker = CcWorker::with_processors(
            phy,
            0,
            Box::new(MockUl {
                state: ul_state.clone(),
                snr_db: 20.0,
            }),
            Box::new(MockDl {
                state: dl_state.clone(),
            }),
        );
        worker.init().unwrap();
        Fixture {
            worker,
            ue_db,
            stack,
            ul_state,
            dl_state,
        }
    }

    fn ul_grant(rnti: u16, mcs_idx: u32, rv: u32) -> UlSfGrant {
        UlSfGrant {
            dci: DciUl {
                rnti: Rnti(rnti),
                pid: 0,
                mcs_idx,
                rv,
                prb_start: 2,
                nof_prb: 4,
                n_dmrs: 3,
                cqi_request: false,
            },
            needs_pdcch: true,
        }
    }

    fn dl_grant(rnti: u16) -> DlSfGrant {
        DlSfGrant {
            dci: DciDl {
                rnti: Rnti(rnti),
                pid: 0,
                mcs_idx: 9,
                rv: 0,
                prb_start: 0,
                nof_prb: 4,
            },
            data: Bytes::from_static(&[0x11, 0x22, 0x33]),
        }
    }

    fn ul_sf(tti: u32) -> UlSfCfg {
        UlSfCfg { tti: Tti::new(tti) }
    }

    fn dl_sf(tti: u32, sf_type: SfType) -> DlSfCfg {
        DlSfCfg {
            tti: Tti::new(tti),
            sf_type,
            cfi: 2,
        }
    }

    #[test]
    fn test_work_refused_before_init() {
        let ue_db: Arc<InMemoryUeDb> = Arc::new(InMemoryUeDb::new());
        let phy = Arc::new(PhyCommon::new(
            PhyArgs::default(),
            vec![test_cell()],
            ue_db,
            Arc::new(RecStack::default()),
        ));
        let worker = CcWorker::new(phy, 0);
        assert!(matches!(
            worker.work_ul(&ul_sf(0), &[]),
            Err(LayerError::NotInitialized)
        ));
        assert!(matches!(
            worker.work_dl(&dl_sf(0, SfType::Normal), &[], &[], &[], None),
            Err(LayerError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_rejects_bad_carrier_index() {
        let phy = Arc::new(PhyCommon::new(
            PhyArgs::default(),
            vec![test_cell()],
            Arc::new(InMemoryUeDb::new()),
            Arc::new(NullStack),
        ));
        let worker = CcWorker::new(phy, 3);
        assert!(worker.init().is_err());
        assert!(!worker.is_initiated());
    }

    #[test]
    fn test_add_rnti_idempotent_keeps_metrics() {
        let f = setup(true);
        assert_eq!(f.worker.get_nof_rnti(), NOF_BROADCAST_RNTI);

        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);
        assert_eq!(f.worker.get_nof_rnti(), NOF_BROADCAST_RNTI + 1);

        f.worker
            .work_ul(&ul_sf(4), &[ul_grant(0x46, 9, 0)])
            .unwrap();

        // Re-adding must not reset the accumulated counters
        f.worker.add_rnti(Rnti(0x46));
        assert_eq!(f.worker.get_nof_rnti(), NOF_BROADCAST_RNTI + 1);

        let mut metrics = Vec::new();
        f.worker.get_metrics(&mut metrics);
        let (_, m) = metrics
            .iter()
            .find(|(r, _)| *r == Rnti(0x46))
            .expect("metrics for 0x46");
        assert_eq!(m.ul.nof_samples, 1);
    }

    #[test]
    fn test_rem_rnti_absent_is_noop() {
        let f = setup(true);
        f.worker.rem_rnti(Rnti(0x999));
        assert_eq!(f.worker.get_nof_rnti(), NOF_BROADCAST_RNTI);
    }

    #[test]
    fn test_unknown_rnti_grant_skipped() {
        let f = setup(true);
        let report = f
            .worker
            .work_ul(&ul_sf(4), &[ul_grant(0x50, 9, 0)])
            .unwrap();
        assert!(matches!(report.pusch[0].status, PuschStatus::Skipped));
        assert!(f.ul_state.lock().unwrap().pusch_calls.is_empty());
        assert!(f.stack.crc.lock().unwrap().is_empty());
    }

    #[test]
    fn test_adaptive_retx_reuses_cached_tb() {
        let f = setup(true);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);
        let cached = TbParams {
            tbs_bytes: 77,
            mcs_idx: 9,
            rv: 0,
        };
        f.ue_db.set_last_ul_tb(Rnti(0x46), 0, 0, cached).unwrap();

        // MCS above the valid range: reuse the cached TB, keep the new RV
        let report = f
            .worker
            .work_ul(&ul_sf(8), &[ul_grant(0x46, 29, 2)])
            .unwrap();
        assert!(matches!(
            report.pusch[0].status,
            PuschStatus::Decoded { crc_ok: true }
        ));
        let calls = f.ul_state.lock().unwrap();
        assert_eq!(calls.pusch_calls.len(), 1);
        let tb = calls.pusch_calls[0].tb;
        assert_eq!(tb.tbs_bytes, 77);
        assert_eq!(tb.mcs_idx, 9);
        assert_eq!(tb.rv, 2);
    }

    #[test]
    fn test_failed_grant_does_not_abort_the_rest() {
        let f = setup(true);
        for rnti in [0x46, 0x47] {
            f.worker.add_rnti(Rnti(rnti));
            f.ue_db.add_ue(Rnti(rnti), 0);
        }
        // First grant: adaptive retx with nothing cached, must fail alone
        let grants = [ul_grant(0x46, 29, 1), ul_grant(0x47, 9, 0)];
        let report = f.worker.work_ul(&ul_sf(4), &grants).unwrap();
        assert!(matches!(report.pusch[0].status, PuschStatus::Failed(_)));
        assert!(matches!(
            report.pusch[1].status,
            PuschStatus::Decoded { crc_ok: true }
        ));
        assert_eq!(f.ul_state.lock().unwrap().pusch_calls.len(), 1);
    }

    #[test]
    fn test_decoded_pdu_reaches_stack() {
        let f = setup(true);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);

        f.worker
            .work_ul(&ul_sf(4), &[ul_grant(0x46, 9, 0)])
            .unwrap();

        let expected_tbs = tbs_bytes(9, 4);
        let crc = f.stack.crc.lock().unwrap();
        assert_eq!(*crc, vec![(Rnti(0x46), expected_tbs, true)]);
        let pdus = f.stack.pdus.lock().unwrap();
        assert_eq!(*pdus, vec![(Rnti(0x46), expected_tbs, true)]);
        // SNR above threshold: quality and timing reports forwarded
        let snr = f.stack.snr.lock().unwrap();
        assert_eq!(*snr, vec![(Rnti(0x46), UlChannel::Pusch)]);
        assert_eq!(*f.stack.ta.lock().unwrap(), vec![Rnti(0x46)]);
    }

    #[test]
    fn test_crc_failure_still_delivers_pdu() {
        let f = setup(false);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);

        let report = f
            .worker
            .work_ul(&ul_sf(4), &[ul_grant(0x46, 9, 0)])
            .unwrap();
        assert!(matches!(
            report.pusch[0].status,
            PuschStatus::Decoded { crc_ok: false }
        ));
        let crc = f.stack.crc.lock().unwrap();
        assert_eq!(crc[0].2, false);
        let pdus = f.stack.pdus.lock().unwrap();
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].2, false);
    }

    #[test]
    fn test_pucch_polled_for_users_without_pusch_grant() {
        let f = setup(true);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);
        // Secondary-cell UE on this carrier: PUCCH stays on its pcell
        f.worker.add_rnti(Rnti(0x47));
        f.ue_db.add_ue(Rnti(0x47), 1);

        // Outstanding HARQ feedback makes UCI expected this TTI
        let tti = Tti::new(104);
        f.ue_db.set_ack_pending(
            tti,
            0,
            &DciDl {
                rnti: Rnti(0x46),
                pid: 0,
                mcs_idx: 5,
                rv: 0,
                prb_start: 0,
                nof_prb: 4,
            },
        );

        let report = f.worker.work_ul(&UlSfCfg { tti }, &[]).unwrap();
        assert_eq!(report.pucch_detected, 1);
        let st = f.ul_state.lock().unwrap();
        assert_eq!(st.pucch_calls, 1);
        assert!(st.pusch_calls.is_empty());

        let mut metrics = Vec::new();
        f.worker.get_metrics(&mut metrics);
        let (_, m) = metrics
            .iter()
            .find(|(r, _)| *r == Rnti(0x46))
            .expect("metrics for 0x46");
        assert_eq!(m.ul.nof_samples_pucch, 1);
        assert_eq!(m.ul.nof_samples, 0);
    }

    #[test]
    fn test_phich_uses_cached_grant_params() {
        let f = setup(true);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);

        f.worker
            .work_ul(&ul_sf(4), &[ul_grant(0x46, 9, 0)])
            .unwrap();
        let report = f
            .worker
            .work_dl(
                &dl_sf(8, SfType::Normal),
                &[],
                &[],
                &[PhichItem {
                    rnti: Rnti(0x46),
                    ack: true,
                }],
                None,
            )
            .unwrap();
        assert!(report.is_ok());
        // prb_start/n_dmrs from the UL grant that scheduled the PUSCH
        let phich = f.dl_state.lock().unwrap().phich.clone();
        assert_eq!(phich, vec![(2, 3, true)]);
    }

    #[test]
    fn test_phich_for_unknown_rnti_skipped() {
        let f = setup(true);
        let report = f
            .worker
            .work_dl(
                &dl_sf(8, SfType::Normal),
                &[],
                &[],
                &[PhichItem {
                    rnti: Rnti(0x50),
                    ack: false,
                }],
                None,
            )
            .unwrap();
        assert!(report.is_ok());
        assert!(f.dl_state.lock().unwrap().phich.is_empty());
    }

    #[test]
    fn test_dl_step_failure_is_isolated() {
        let f = setup(true);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);
        f.dl_state.lock().unwrap().fail_pdsch = true;

        let report = f
            .worker
            .work_dl(
                &dl_sf(8, SfType::Normal),
                &[dl_grant(0x46)],
                &[ul_grant(0x46, 9, 0)],
                &[],
                None,
            )
            .unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, DlStep::Pdsch);
        // Later steps still ran
        let st = f.dl_state.lock().unwrap();
        assert_eq!(st.pdcch_dl, 1);
        assert_eq!(st.pdcch_ul, 1);
    }

    #[test]
    fn test_pdsch_grant_updates_dl_metrics_and_ack_pending() {
        let f = setup(true);
        f.worker.add_rnti(Rnti(0x46));
        f.ue_db.add_ue(Rnti(0x46), 0);

        let tti = Tti::new(100);
        f.worker
            .work_dl(
                &dl_sf(100, SfType::Normal),
                &[dl_grant(0x46)],
                &[],
                &[],
                None,
            )
            .unwrap();

        let mut metrics = Vec::new();
        f.worker.get_metrics(&mut metrics);
        let (_, m) = metrics
            .iter()
            .find(|(r, _)| *r == Rnti(0x46))
            .expect("metrics for 0x46");
        assert_eq!(m.dl.nof_samples, 1);

        // HARQ feedback scheduled after the fixed FDD delay
        let due = tti.add(FDD_HARQ_DELAY_DL_MS);
        let cfg = f
            .ue_db
            .fill_uci_cfg(due, 0, Rnti(0x46), false, false)
            .unwrap();
        assert_eq!(cfg.expect("uci expected").nof_ack, 1);
    }

    #[test]
    fn test_mbsfn_subframe_encodes_pmch() {
        let f = setup(true);
        let mbsfn = MbsfnCfg {
            enable: true,
            area_id: 1,
            mcs: 5,
            payload: Bytes::from_static(&[0xAA; 32]),
        };
        let report = f
            .worker
            .work_dl(&dl_sf(10, SfType::Mbsfn), &[], &[], &[], Some(&mbsfn))
            .unwrap();
        assert!(report.is_ok());
        let st = f.dl_state.lock().unwrap();
        assert_eq!(st.pmch, 1);
        // No unicast data channels on an MBSFN subframe
        assert_eq!(st.pdsch, 0);

        let mut metrics = Vec::new();
        f.worker.get_metrics(&mut metrics);
        let (_, m) = metrics
            .iter()
            .find(|(r, _)| *r == Rnti::M_RNTI)
            .expect("multicast metrics");
        assert_eq!(m.dl.nof_samples, 1);
    }

    #[test]
    fn test_mbsfn_subframe_without_config_is_quiet() {
        let f = setup(true);
        let report = f
            .worker
            .work_dl(&dl_sf(10, SfType::Mbsfn), &[], &[], &[], None)
            .unwrap();
        assert!(report.is_ok());
        let st = f.dl_state.lock().unwrap();
        assert_eq!(st.pmch, 0);
        assert_eq!(st.pdsch, 0);
    }

    #[test]
    fn test_metrics_exclude_broadcast_rntis() {
        let f = setup(true);
        let mut metrics = Vec::new();
        f.worker.get_metrics(&mut metrics);
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_empty_dl_subframe_with_real_engines() {
        let ue_db: Arc<InMemoryUeDb> = Arc::new(InMemoryUeDb::new());
        let phy = Arc::new(PhyCommon::new(
            PhyArgs::default(),
            vec![test_cell()],
            ue_db,
            Arc::new(NullStack),
        ));
        let worker = CcWorker::new(phy, 0);
        worker.init().unwrap();

        let report = worker
            .work_dl(&dl_sf(0, SfType::Normal), &[], &[], &[], None)
            .unwrap();
        assert!(report.is_ok());
        // Base signals alone put energy on the carrier
        let tx = worker.read_tx_buffer(0).unwrap();
        let energy: f32 = tx.iter().map(|s| s.norm_sqr()).sum();
        assert!(energy > 0.0);
    }

    #[test]
    fn test_gain_scales_tx_signal() {
        let ue_db: Arc<InMemoryUeDb> = Arc::new(InMemoryUeDb::new());
        let phy = Arc::new(PhyCommon::new(
            PhyArgs::default(),
            vec![test_cell()],
            ue_db,
            Arc::new(NullStack),
        ));
        let worker = CcWorker::new(phy.clone(), 0);
        worker.init().unwrap();

        worker
            .work_dl(&dl_sf(0, SfType::Normal), &[], &[], &[], None)
            .unwrap();
        let base: f32 = worker
            .read_tx_buffer(0)
            .unwrap()
            .iter()
            .map(|s| s.norm_sqr())
            .sum();

        // Same subframe index, so the base-signal content is identical
        phy.set_cell_gain(0, 0.5);
        worker
            .work_dl(&dl_sf(10, SfType::Normal), &[], &[], &[], None)
            .unwrap();
        let scaled: f32 = worker
            .read_tx_buffer(0)
            .unwrap()
            .iter()
            .map(|s| s.norm_sqr())
            .sum();
        assert!((scaled - base * 0.25).abs() < base * 0.01);
    }

    #[test]
    fn test_concurrent_rnti_churn_and_work() {
        let f = setup(true);
        let worker = Arc::new(f.worker);

        let churn = {
            let worker = worker.clone();
            std::thread::spawn(move || {
                for i in 0..200u16 {
                    let rnti = Rnti(0x100 + (i % 16));
                    worker.add_rnti(rnti);
                    if i % 3 == 0 {
                        worker.rem_rnti(rnti);
                    }
                }
                // Leave a known set behind
                for i in 0..16u16 {
                    worker.add_rnti(Rnti(0x100 + i));
                }
            })
        };

        let mut metrics = Vec::new();
        for tti in 0..50u32 {
            worker
                .work_dl(&dl_sf(tti, SfType::Normal), &[], &[], &[], None)
                .unwrap();
            worker.get_metrics(&mut metrics);
            metrics.clear();
        }
        churn.join().unwrap();
        assert_eq!(worker.get_nof_rnti(), NOF_BROADCAST_RNTI + 16);
    }
}
