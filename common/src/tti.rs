//! TTI bookkeeping
//!
//! Transmission time interval arithmetic. TTIs count 1 ms subframes and wrap
//! at 10240 (1024 radio frames of 10 subframes).

use serde::{Deserialize, Serialize};

/// Number of TTIs before the counter wraps
pub const NOF_TTI: u32 = 10240;

/// Subframes between an uplink grant's PUSCH reception and the PHICH
/// carrying its ACK/NACK (FDD)
pub const FDD_HARQ_DELAY_UL_MS: u32 = 4;

/// Subframes between a downlink transmission and its uplink HARQ feedback (FDD)
pub const FDD_HARQ_DELAY_DL_MS: u32 = 4;

/// Transmission time interval counter, modulo [`NOF_TTI`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tti(u32);

impl Tti {
    /// Create a TTI, reducing modulo the wrap point
    pub fn new(tti: u32) -> Self {
        Self(tti % NOF_TTI)
    }

    /// Raw counter value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// TTI `n` subframes later, with wrap-around
    pub fn add(&self, n: u32) -> Self {
        Self((self.0 + n) % NOF_TTI)
    }

    /// TTI `n` subframes earlier, with wrap-around
    pub fn sub(&self, n: u32) -> Self {
        Self((self.0 + NOF_TTI - (n % NOF_TTI)) % NOF_TTI)
    }

    /// TTI in which HARQ feedback for an uplink transmission received in
    /// this TTI is sent on PHICH
    pub fn tx_ack(&self) -> Self {
        self.add(FDD_HARQ_DELAY_UL_MS)
    }

    /// System frame number (0-1023) this TTI falls in
    pub fn sfn(&self) -> u32 {
        self.0 / 10
    }

    /// Subframe index (0-9) within the radio frame
    pub fn sf_idx(&self) -> u32 {
        self.0 % 10
    }
}

impl std::fmt::Display for Tti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
