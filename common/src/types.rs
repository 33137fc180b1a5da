//! Common Types for the LTE eNodeB
//!
//! Defines fundamental types used throughout the protocol stack

use serde::{Deserialize, Serialize};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Reserved value meaning "no RNTI"
    pub const INVALID: Self = Self(0);
    /// System Information RNTI
    pub const SI_RNTI: Self = Self(0xFFFF);
    /// Paging RNTI
    pub const P_RNTI: Self = Self(0xFFFE);
    /// MBSFN multicast RNTI
    pub const M_RNTI: Self = Self(0xFFFD);
    /// First RA-RNTI (1 + t_id + 10 * f_id, TS 36.321 5.1.4)
    pub const RA_RNTI_START: u16 = 0x0001;
    /// Last RA-RNTI
    pub const RA_RNTI_END: u16 = 0x003C;
    /// First C-RNTI assignable to a connected UE
    pub const CRNTI_START: u16 = 0x003D;
    /// Last C-RNTI assignable to a connected UE
    pub const CRNTI_END: u16 = 0xFFF3;

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// True for RNTIs that identify a connected UE (C-RNTI range)
    pub fn is_user(&self) -> bool {
        (Self::CRNTI_START..=Self::CRNTI_END).contains(&self.0)
    }

    /// True for RNTIs in the random-access response range
    pub fn is_ra(&self) -> bool {
        (Self::RA_RNTI_START..=Self::RA_RNTI_END).contains(&self.0)
    }

    /// True for the always-present broadcast/paging identities
    pub fn is_broadcast(&self) -> bool {
        *self == Self::SI_RNTI || *self == Self::P_RNTI
    }
}

impl std::fmt::Display for Rnti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Physical Cell Identity (0-503 for LTE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value
    pub const MAX: u16 = 503;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u16);

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclicPrefix {
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// OFDM symbols per slot for this prefix length
    pub fn symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 7,
            CyclicPrefix::Extended => 6,
        }
    }
}

/// Physical cell configuration, fixed for a worker's lifetime once initialised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    /// Physical cell ID
    pub pci: Pci,
    /// Number of downlink/uplink PRBs (6, 15, 25, 50, 75, 100)
    pub nof_prb: usize,
    /// Number of antenna ports
    pub nof_ports: usize,
    /// Cyclic prefix type
    pub cp: CyclicPrefix,
}

impl CellConfig {
    /// Valid LTE channel widths in PRBs
    pub const VALID_NOF_PRB: [usize; 6] = [6, 15, 25, 50, 75, 100];

    /// Complex samples in one 1 ms subframe for this bandwidth.
    ///
    /// Derived from the standard LTE sample rates (e.g. 25 PRB -> 5 MHz ->
    /// 7.68 Msps -> 7680 samples per subframe).
    pub fn sf_len(&self) -> usize {
        let fft_size = self.fft_size();
        // 15 kHz subcarrier spacing: fft_size samples per symbol period of
        // 1/14 ms (normal CP average, CP included)
        fft_size * 15
    }

    /// FFT size matching the occupied bandwidth (12 subcarriers per PRB,
    /// rounded up to a power of two)
    pub fn fft_size(&self) -> usize {
        (self.nof_prb * 12).next_power_of_two()
    }

    /// True if this is a configuration the PHY can run with
    pub fn is_valid(&self) -> bool {
        Self::VALID_NOF_PRB.contains(&self.nof_prb)
            && self.nof_ports >= 1
            && self.nof_ports <= 4
            && self.pci.0 <= Pci::MAX
    }
}
