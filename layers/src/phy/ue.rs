//! Per-UE context owned by one component-carrier worker
//!
//! Holds the PHICH feedback parameters cached from the most recent uplink
//! grant and the rolling performance counters for one RNTI.

use super::metrics::{cma, UeMetrics};
use common::Rnti;

/// PHICH resource parameters, derived from the UL grant that scheduled the
/// PUSCH being acknowledged. Valid only for the most recent UL grant: a UE
/// has at most one PUSCH grant per TTI.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhichGrant {
    /// Lowest PRB index of the UL allocation
    pub n_prb_lowest: usize,
    /// DMRS cyclic-shift field from the DCI
    pub n_dmrs: u32,
}

/// Per-UE state for one component carrier
#[derive(Debug)]
pub struct UeContext {
    rnti: Rnti,
    phich_grant: PhichGrant,
    metrics: UeMetrics,
}

impl UeContext {
    pub fn new(rnti: Rnti) -> Self {
        Self {
            rnti,
            phich_grant: PhichGrant::default(),
            metrics: UeMetrics::default(),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    /// Cache PHICH feedback parameters for the ACK/NACK encoded later this
    /// TTI or a following one
    pub fn set_last_ul_grant(&mut self, n_prb_lowest: usize, n_dmrs: u32) {
        self.phich_grant = PhichGrant {
            n_prb_lowest,
            n_dmrs,
        };
    }

    pub fn phich_grant(&self) -> PhichGrant {
        self.phich_grant
    }

    /// Downlink MCS moving average
    pub fn metrics_dl(&mut self, mcs: u32) {
        let n = self.metrics.dl.nof_samples;
        self.metrics.dl.mcs = cma(self.metrics.dl.mcs, mcs as f32, n);
        self.metrics.dl.nof_samples = n.saturating_add(1);
    }

    /// Uplink PUSCH counters: one shared sample count for all four values.
    /// NaN RSSI is coerced to zero before averaging.
    pub fn metrics_ul(&mut self, mcs: u32, rssi: f32, sinr: f32, turbo_iters: f32) {
        let rssi = if rssi.is_nan() { 0.0 } else { rssi };
        let n = self.metrics.ul.nof_samples;
        let ul = &mut self.metrics.ul;
        ul.mcs = cma(ul.mcs, mcs as f32, n);
        ul.rssi = cma(ul.rssi, rssi, n);
        ul.sinr = cma(ul.sinr, sinr, n);
        ul.turbo_iters = cma(ul.turbo_iters, turbo_iters, n);
        ul.nof_samples = n.saturating_add(1);
    }

    /// PUCCH counters: independent sample count from [`Self::metrics_ul`]
    pub fn metrics_ul_pucch(&mut self, rssi: f32, ni: f32, sinr: f32) {
        let rssi = if rssi.is_nan() { 0.0 } else { rssi };
        let n = self.metrics.ul.nof_samples_pucch;
        let ul = &mut self.metrics.ul;
        ul.pucch_rssi = cma(ul.pucch_rssi, rssi, n);
        ul.pucch_ni = cma(ul.pucch_ni, ni, n);
        ul.pucch_sinr = cma(ul.pucch_sinr, sinr, n);
        ul.nof_samples_pucch = n.saturating_add(1);
    }

    /// Destructive read: returns the accumulated counters and resets the
    /// accumulator to empty
    pub fn metrics_read(&mut self) -> UeMetrics {
        std::mem::take(&mut self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_reset_on_read() {
        let mut ue = UeContext::new(Rnti(0x46));
        ue.metrics_dl(10);
        ue.metrics_ul(12, -80.0, 15.0, 2.0);

        let m = ue.metrics_read();
        assert_eq!(m.dl.nof_samples, 1);
        assert_eq!(m.ul.nof_samples, 1);
        assert!((m.ul.mcs - 12.0).abs() < 1e-6);

        // Second read without intervening updates is empty
        let m = ue.metrics_read();
        assert_eq!(m, UeMetrics::default());
    }

    #[test]
    fn test_nan_rssi_coerced() {
        let mut ue = UeContext::new(Rnti(0x46));
        ue.metrics_ul(5, f32::NAN, 10.0, 1.0);
        let m = ue.metrics_read();
        assert_eq!(m.ul.rssi, 0.0);
        assert!((m.ul.sinr - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_pucch_samples_independent() {
        let mut ue = UeContext::new(Rnti(0x46));
        ue.metrics_ul(5, -80.0, 10.0, 1.0);
        ue.metrics_ul_pucch(-90.0, -110.0, 3.0);
        ue.metrics_ul_pucch(-90.0, -110.0, 5.0);
        let m = ue.metrics_read();
        assert_eq!(m.ul.nof_samples, 1);
        assert_eq!(m.ul.nof_samples_pucch, 2);
        assert!((m.ul.pucch_sinr - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_phich_grant_tracks_latest() {
        let mut ue = UeContext::new(Rnti(0x46));
        ue.set_last_ul_grant(3, 1);
        ue.set_last_ul_grant(7, 4);
        let g = ue.phich_grant();
        assert_eq!(g.n_prb_lowest, 7);
        assert_eq!(g.n_dmrs, 4);
    }
}
