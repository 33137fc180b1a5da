//! Physical Layer (PHY) Submodules
//!
//! Per-component-carrier downlink/uplink processing for an LTE eNodeB.
//! The core object is [`cc_worker::CcWorker`], driven once per TTI by the
//! surrounding real-time scheduler.

pub mod cc_worker;
pub mod grants;
pub mod metrics;
pub mod phy_common;
pub mod signal;
pub mod stack;
pub mod ue;
pub mod ue_db;

// Re-export commonly used types
pub use cc_worker::{CcWorker, DlStep, DlTtiReport, PuschOutcome, PuschStatus, UlTtiReport};
pub use grants::{
    DciDl, DciUl, DlSfCfg, DlSfGrant, MbsfnCfg, PhichItem, PuschGrant, SfType, TbParams, UciCfg,
    UciValue, UlSfCfg, UlSfGrant,
};
pub use metrics::{DlMetrics, UeMetrics, UlMetrics};
pub use phy_common::PhyCommon;
pub use signal::{DownlinkProcessor, LteDownlink, LteUplink, SoftBuffer, UplinkProcessor};
pub use stack::{NullStack, StackInterface, UlChannel};
pub use ue_db::{DciConfig, DlConfig, InMemoryUeDb, UeDatabase, UlConfig};

use serde::{Deserialize, Serialize};

/// PUSCH SNR threshold in dB above which channel-quality and timing-advance
/// measurements are forwarded to the stack
pub const PUSCH_RL_SNR_DB_TH: f32 = 1.0;

/// Crest-factor reduction parameters applied at downlink signal generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfrArgs {
    /// Enable CFR processing
    pub enable: bool,
    /// Clipping threshold relative to RMS, in dB
    pub thr_db: f32,
    /// Blend factor between clipped and original signal (0.0 - 1.0)
    pub strength: f32,
}

impl Default for CfrArgs {
    fn default() -> Self {
        Self {
            enable: false,
            thr_db: 6.0,
            strength: 1.0,
        }
    }
}

/// PHY expert arguments shared by all component-carrier workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyArgs {
    /// Maximum turbo-decoder iterations for PUSCH
    pub pusch_max_its: u32,
    /// Use the 8-bit LLR decoder (trades accuracy for memory bandwidth)
    pub pusch_8bit_decoder: bool,
    /// Known front-end gain subtracted from raw RSSI/EPRE measurements, in dB
    pub rx_gain_offset: f32,
    /// Worker-level parallelism: one thread pool entry per component carrier
    pub nof_phy_threads: usize,
    /// Dedicated PRACH processing threads
    pub nof_prach_threads: usize,
    /// Crest-factor reduction configuration
    pub cfr: CfrArgs,
}

impl Default for PhyArgs {
    fn default() -> Self {
        Self {
            pusch_max_its: 4,
            pusch_8bit_decoder: false,
            rx_gain_offset: 62.0,
            nof_phy_threads: 3,
            nof_prach_threads: 1,
            cfr: CfrArgs::default(),
        }
    }
}
