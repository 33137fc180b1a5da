//! MAC-facing stack interface
//!
//! Decoded uplink results and channel-quality measurements are pushed to
//! the stack synchronously from within `work_ul`. Implementations must not
//! block; the calls run inside the worker's TTI budget.

use bytes::Bytes;
use common::{Rnti, Tti};
use tracing::trace;

/// Uplink physical channel a measurement was taken on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlChannel {
    Pusch,
    Pucch,
}

/// Interface towards the MAC layer
pub trait StackInterface: Send + Sync {
    /// Report the CRC result of a decoded UL-SCH transport block
    fn crc_info(&self, tti: Tti, rnti: Rnti, cc_idx: usize, tb_bytes: usize, crc_ok: bool);

    /// Deliver a decoded MAC PDU
    fn push_pdu(
        &self,
        tti: Tti,
        rnti: Rnti,
        cc_idx: usize,
        pdu: Bytes,
        crc_ok: bool,
        nof_prb: usize,
    );

    /// Channel-quality report for link adaptation
    fn snr_info(&self, tti: Tti, rnti: Rnti, cc_idx: usize, snr_db: f32, channel: UlChannel);

    /// Timing-advance measurement in microseconds
    fn ta_info(&self, tti: Tti, rnti: Rnti, ta_us: f32);
}

/// Stack sink that only traces, for bring-up and benchmarks
#[derive(Debug, Default)]
pub struct NullStack;

impl StackInterface for NullStack {
    fn crc_info(&self, tti: Tti, rnti: Rnti, cc_idx: usize, tb_bytes: usize, crc_ok: bool) {
        trace!(
            "crc_info tti={} rnti={} cc={} tb_bytes={} crc_ok={}",
            tti,
            rnti,
            cc_idx,
            tb_bytes,
            crc_ok
        );
    }

    fn push_pdu(
        &self,
        tti: Tti,
        rnti: Rnti,
        cc_idx: usize,
        pdu: Bytes,
        crc_ok: bool,
        nof_prb: usize,
    ) {
        trace!(
            "push_pdu tti={} rnti={} cc={} len={} crc_ok={} nof_prb={}",
            tti,
            rnti,
            cc_idx,
            pdu.len(),
            crc_ok,
            nof_prb
        );
    }

    fn snr_info(&self, tti: Tti, rnti: Rnti, cc_idx: usize, snr_db: f32, channel: UlChannel) {
        trace!(
            "snr_info tti={} rnti={} cc={} snr={:.1} dB ch={:?}",
            tti,
            rnti,
            cc_idx,
            snr_db,
            channel
        );
    }

    fn ta_info(&self, tti: Tti, rnti: Rnti, ta_us: f32) {
        trace!("ta_info tti={} rnti={} ta={:.2} us", tti, rnti, ta_us);
    }
}
