//! YAML configuration for the eNodeB binary

use anyhow::Context;
use common::{CellConfig, CyclicPrefix, Pci};
use layers::phy::PhyArgs;
use serde::{Deserialize, Serialize};

/// Top-level eNodeB configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnbConfig {
    /// Cell configuration, one entry per component carrier
    pub cell_list: Vec<CellSection>,
    /// PHY expert arguments
    #[serde(default)]
    pub phy: PhyArgs,
    /// Logging configuration
    #[serde(default)]
    pub log: LogSection,
}

/// One carrier's cell parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellSection {
    /// Physical Cell ID (0-503)
    pub pci: u16,
    /// Channel bandwidth in PRBs (6, 15, 25, 50, 75, 100)
    #[serde(default = "default_nof_prb")]
    pub nof_prb: usize,
    /// Number of antenna ports
    #[serde(default = "default_nof_ports")]
    pub nof_ports: usize,
    /// Cyclic prefix ("normal" or "extended")
    #[serde(default = "default_cp")]
    pub cp: String,
}

fn default_nof_prb() -> usize {
    25
}

fn default_nof_ports() -> usize {
    1
}

fn default_cp() -> String {
    "normal".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSection {
    /// Log filter, overridden by RUST_LOG when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Metrics report period in TTIs (0 disables)
    #[serde(default = "default_metrics_period")]
    pub metrics_period_tti: u32,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            metrics_period_tti: default_metrics_period(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_period() -> u32 {
    1000
}

impl CellSection {
    /// Translate into the PHY cell configuration, validating ranges
    pub fn to_cell_config(&self) -> anyhow::Result<CellConfig> {
        let pci = Pci::new(self.pci)
            .ok_or_else(|| anyhow::anyhow!("invalid PCI {} (max {})", self.pci, Pci::MAX))?;
        let cp = match self.cp.as_str() {
            "normal" => CyclicPrefix::Normal,
            "extended" => CyclicPrefix::Extended,
            other => anyhow::bail!("unknown cyclic prefix {:?}", other),
        };
        let cell = CellConfig {
            pci,
            nof_prb: self.nof_prb,
            nof_ports: self.nof_ports,
            cp,
        };
        if !cell.is_valid() {
            anyhow::bail!(
                "invalid cell: nof_prb={} nof_ports={}",
                self.nof_prb,
                self.nof_ports
            );
        }
        Ok(cell)
    }
}

impl EnbConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path))?;
        let config: EnbConfig =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path))?;
        if config.cell_list.is_empty() {
            anyhow::bail!("cell_list must contain at least one carrier");
        }
        Ok(config)
    }
}
