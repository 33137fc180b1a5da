//! Ferrocell LTE eNodeB
//!
//! Binary entry point: loads the YAML configuration, wires the PHY-common
//! state to the UE directory and the stack sink, and drives one
//! component-carrier worker per configured cell. Without attached radio
//! hardware the carriers run a baseband loopback: each TTI synthesizes a
//! PUSCH transmission over the air interface, feeds it to the uplink
//! pipeline and generates the downlink subframe.

mod config;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::{CellConfig, Rnti, Tti, NOF_TTI};
use config::EnbConfig;
use layers::phy::{
    grants::tbs_bytes, signal, CcWorker, DciDl, DciUl, DlSfCfg, DlSfGrant, InMemoryUeDb,
    NullStack, PhichItem, PhyCommon, PuschGrant, SfType, TbParams, UlSfCfg, UlSfGrant,
};

/// Ferrocell LTE eNodeB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of TTIs to run before exiting
    #[arg(long, default_value = "10000")]
    nof_tti: u32,
}

fn default_config() -> EnbConfig {
    EnbConfig {
        cell_list: vec![config::CellSection {
            pci: 1,
            nof_prb: 25,
            nof_ports: 1,
            cp: "normal".to_string(),
        }],
        phy: Default::default(),
        log: Default::default(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => EnbConfig::from_yaml_file(path)?,
        None => default_config(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.log.level.clone());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    fmt().with_env_filter(env_filter).with_target(true).init();

    info!("Starting Ferrocell eNodeB");
    let cells = cfg
        .cell_list
        .iter()
        .map(|c| c.to_cell_config())
        .collect::<Result<Vec<_>>>()?;
    for (cc, cell) in cells.iter().enumerate() {
        info!(
            "  carrier {}: pci={} nof_prb={} nof_ports={}",
            cc, cell.pci.0, cell.nof_prb, cell.nof_ports
        );
    }
    if cfg.phy.nof_phy_threads < cells.len() {
        warn!(
            "nof_phy_threads={} below carrier count {}, carriers run one thread each anyway",
            cfg.phy.nof_phy_threads,
            cells.len()
        );
    }

    let ue_db = Arc::new(InMemoryUeDb::new());
    let stack = Arc::new(NullStack);
    let phy = Arc::new(PhyCommon::new(
        cfg.phy.clone(),
        cells.clone(),
        ue_db.clone(),
        stack,
    ));

    // One connected test UE, primary cell on carrier 0
    let test_rnti = Rnti(0x46);
    ue_db.add_ue(test_rnti, 0);

    let mut workers = Vec::new();
    for cc_idx in 0..cells.len() {
        let worker = Arc::new(CcWorker::new(phy.clone(), cc_idx));
        // Initialization failures are fatal for the binary, never for the
        // library: propagate up and exit through main's error path
        worker.init()?;
        worker.add_rnti(test_rnti);
        workers.push(worker);
    }
    info!("{} carrier(s) initiated", workers.len());

    let mut handles = Vec::new();
    for (cc_idx, worker) in workers.into_iter().enumerate() {
        let cell = cells[cc_idx].clone();
        let metrics_period = cfg.log.metrics_period_tti;
        let nof_tti = args.nof_tti;
        handles.push(thread::spawn(move || {
            run_carrier(worker, cell, cc_idx, test_rnti, nof_tti, metrics_period)
        }));
    }

    let mut failed = false;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("carrier thread failed: {:#}", e);
                failed = true;
            }
            Err(_) => {
                error!("carrier thread panicked");
                failed = true;
            }
        }
    }
    if failed {
        anyhow::bail!("one or more carriers terminated with errors");
    }
    info!("eNodeB run complete");
    Ok(())
}

/// Per-carrier TTI loop: loopback PUSCH in, full downlink subframe out
fn run_carrier(
    worker: Arc<CcWorker>,
    cell: CellConfig,
    cc_idx: usize,
    rnti: Rnti,
    nof_tti: u32,
    metrics_period: u32,
) -> Result<()> {
    const UL_MCS: u32 = 9;
    const UL_PRB_START: usize = 2;
    const UL_NOF_PRB: usize = 4;

    let tbs = tbs_bytes(UL_MCS, UL_NOF_PRB);
    let payload = vec![0x5A_u8; tbs];
    let mut metrics = Vec::new();
    let mut phich: Vec<PhichItem> = Vec::new();

    for i in 0..nof_tti {
        let tti = Tti::new(i % NOF_TTI);

        // Uplink: synthesize the scheduled PUSCH over the air and decode it
        let dci = DciUl {
            rnti,
            pid: i % 8,
            mcs_idx: UL_MCS,
            rv: 0,
            prb_start: UL_PRB_START,
            nof_prb: UL_NOF_PRB,
            n_dmrs: 0,
            cqi_request: false,
        };
        let tb = TbParams {
            tbs_bytes: tbs,
            mcs_idx: UL_MCS,
            rv: 0,
        };
        let grant = PuschGrant::from_dci(&dci, &cell, tb)?;
        let samples = signal::synthesize_pusch(&cell, &grant, &payload)?;
        worker.write_rx_buffer(0, &samples)?;

        let ul_grants = [UlSfGrant {
            dci,
            needs_pdcch: i % 8 == 0,
        }];
        let ul_report = worker.work_ul(&UlSfCfg { tti }, &ul_grants)?;
        let mut ack = false;
        for outcome in &ul_report.pusch {
            match &outcome.status {
                layers::phy::PuschStatus::Decoded { crc_ok } => ack = *crc_ok,
                layers::phy::PuschStatus::Skipped => {}
                layers::phy::PuschStatus::Failed(e) => {
                    warn!("carrier {}: PUSCH rnti={} failed: {}", cc_idx, outcome.rnti, e)
                }
            }
        }

        // Downlink: one PDSCH grant plus the PHICH feedback for the
        // previous uplink
        let dl_sf = DlSfCfg {
            tti,
            sf_type: SfType::Normal,
            cfi: 2,
        };
        let dl_grants = [DlSfGrant {
            dci: DciDl {
                rnti,
                pid: i % 8,
                mcs_idx: 5,
                rv: 0,
                prb_start: 0,
                nof_prb: 4,
            },
            data: Bytes::from_static(&[0x11, 0x22, 0x33, 0x44]),
        }];
        let dl_report = worker.work_dl(&dl_sf, &dl_grants, &ul_grants, &phich, None)?;
        for (step, e) in &dl_report.errors {
            warn!("carrier {}: DL step {:?} failed: {}", cc_idx, step, e);
        }

        phich.clear();
        phich.push(PhichItem { rnti, ack });

        if metrics_period > 0 && (i + 1) % metrics_period == 0 {
            metrics.clear();
            worker.get_metrics(&mut metrics);
            for (rnti, m) in &metrics {
                info!(
                    "carrier {}: rnti={} dl_mcs={:.1} ul_snr={:.1} dB ul_rssi={:.1} dBm samples={}/{}",
                    cc_idx, rnti, m.dl.mcs, m.ul.sinr, m.ul.rssi, m.dl.nof_samples, m.ul.nof_samples
                );
            }
        }
    }
    Ok(())
}
