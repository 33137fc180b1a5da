//! Per-UE performance counters
//!
//! Cumulative moving averages accumulated between polls. The destructive
//! read in [`crate::phy::ue::UeContext::metrics_read`] is the windowing
//! mechanism: values always cover "since last poll".

use serde::Serialize;

/// Downlink counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DlMetrics {
    /// Average MCS of transmitted PDSCH/PMCH transport blocks
    pub mcs: f32,
    pub nof_samples: u32,
}

/// Uplink counters. PUSCH and PUCCH fields carry independent sample counts
/// since they are collected on disjoint subsets of TTIs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UlMetrics {
    pub mcs: f32,
    pub rssi: f32,
    pub sinr: f32,
    pub turbo_iters: f32,
    pub nof_samples: u32,

    pub pucch_rssi: f32,
    pub pucch_ni: f32,
    pub pucch_sinr: f32,
    pub nof_samples_pucch: u32,
}

/// Accumulated metrics for one UE on one component carrier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UeMetrics {
    pub dl: DlMetrics,
    pub ul: UlMetrics,
}

/// One cumulative-moving-average step: `avg` over `n` samples extended by
/// `value`. O(1) and numerically incremental.
pub fn cma(avg: f32, value: f32, n: u32) -> f32 {
    (avg * n as f32 + value) / (n as f32 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cma_steps() {
        let mut avg = 0.0;
        for (n, v) in [4.0_f32, 8.0, 12.0].iter().enumerate() {
            avg = cma(avg, *v, n as u32);
        }
        assert!((avg - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_cma_first_sample() {
        assert_eq!(cma(0.0, 23.5, 0), 23.5);
    }
}
