//! Shared PHY state for all component-carrier workers
//!
//! Passed to each worker as an `Arc` at construction. Cell configuration
//! and expert arguments are immutable after creation; gains and measurement
//! triggers are atomics so a control thread can flip them while workers run.

use super::stack::StackInterface;
use super::ue_db::UeDatabase;
use super::{CfrArgs, PhyArgs};
use common::CellConfig;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Cross-worker shared configuration and collaborator handles
pub struct PhyCommon {
    args: PhyArgs,
    cells: Vec<CellConfig>,
    // f32 stored as bits; plain atomics keep the per-TTI path lock-free
    cell_gain: Vec<AtomicU32>,
    measure_trigger: Vec<AtomicBool>,
    ue_db: Arc<dyn UeDatabase>,
    stack: Arc<dyn StackInterface>,
}

impl PhyCommon {
    pub fn new(
        args: PhyArgs,
        cells: Vec<CellConfig>,
        ue_db: Arc<dyn UeDatabase>,
        stack: Arc<dyn StackInterface>,
    ) -> Self {
        let nof_cells = cells.len();
        Self {
            args,
            cells,
            cell_gain: (0..nof_cells)
                .map(|_| AtomicU32::new(1.0_f32.to_bits()))
                .collect(),
            measure_trigger: (0..nof_cells).map(|_| AtomicBool::new(false)).collect(),
            ue_db,
            stack,
        }
    }

    pub fn args(&self) -> &PhyArgs {
        &self.args
    }

    pub fn nof_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn get_cell(&self, cc_idx: usize) -> Option<&CellConfig> {
        self.cells.get(cc_idx)
    }

    pub fn get_nof_prb(&self, cc_idx: usize) -> Option<usize> {
        self.cells.get(cc_idx).map(|c| c.nof_prb)
    }

    pub fn get_nof_ports(&self, cc_idx: usize) -> Option<usize> {
        self.cells.get(cc_idx).map(|c| c.nof_ports)
    }

    pub fn get_cfr_config(&self) -> &CfrArgs {
        &self.args.cfr
    }

    /// Linear amplitude gain applied to the transmit signal of this cell
    pub fn get_cell_gain(&self, cc_idx: usize) -> f32 {
        self.cell_gain
            .get(cc_idx)
            .map(|g| f32::from_bits(g.load(Ordering::Relaxed)))
            .unwrap_or(1.0)
    }

    pub fn set_cell_gain(&self, cc_idx: usize, gain: f32) {
        if let Some(g) = self.cell_gain.get(cc_idx) {
            g.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    /// One-shot PAPR measurement request for this cell
    pub fn get_cell_measure_trigger(&self, cc_idx: usize) -> bool {
        self.measure_trigger
            .get(cc_idx)
            .map(|t| t.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub fn set_cell_measure_trigger(&self, cc_idx: usize) {
        if let Some(t) = self.measure_trigger.get(cc_idx) {
            t.store(true, Ordering::Relaxed);
        }
    }

    pub fn clear_cell_measure_trigger(&self, cc_idx: usize) {
        if let Some(t) = self.measure_trigger.get(cc_idx) {
            t.store(false, Ordering::Relaxed);
        }
    }

    pub fn ue_db(&self) -> &dyn UeDatabase {
        self.ue_db.as_ref()
    }

    pub fn stack(&self) -> &dyn StackInterface {
        self.stack.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::stack::NullStack;
    use crate::phy::ue_db::InMemoryUeDb;
    use common::{CyclicPrefix, Pci};

    fn phy() -> PhyCommon {
        PhyCommon::new(
            PhyArgs::default(),
            vec![CellConfig {
                pci: Pci(1),
                nof_prb: 25,
                nof_ports: 2,
                cp: CyclicPrefix::Normal,
            }],
            Arc::new(InMemoryUeDb::new()),
            Arc::new(NullStack),
        )
    }

    #[test]
    fn test_cell_accessors() {
        let phy = phy();
        assert_eq!(phy.nof_cells(), 1);
        assert_eq!(phy.get_nof_prb(0), Some(25));
        assert_eq!(phy.get_nof_ports(0), Some(2));
        assert!(phy.get_cell(1).is_none());
    }

    #[test]
    fn test_gain_and_trigger() {
        let phy = phy();
        assert_eq!(phy.get_cell_gain(0), 1.0);
        phy.set_cell_gain(0, 0.5);
        assert_eq!(phy.get_cell_gain(0), 0.5);

        assert!(!phy.get_cell_measure_trigger(0));
        phy.set_cell_measure_trigger(0);
        assert!(phy.get_cell_measure_trigger(0));
        phy.clear_cell_measure_trigger(0);
        assert!(!phy.get_cell_measure_trigger(0));
    }
}
