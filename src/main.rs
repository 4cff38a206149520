// Default mesh run: 100 nodes, 4 channels, UDP echo between index neighbors.
//
// Usage:
//   cargo run --release
//   cargo run --release -- config.yaml

use std::env;
use std::process;

use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use mesh_sim::{FlowTotals, SimConfig, SimulationRunner};

fn main() {
    SimpleLogger::new().with_level(LevelFilter::Info).init().unwrap();

    let config = match env::args().nth(1) {
        Some(path) => SimConfig::from_yaml_file(&path).unwrap_or_else(|e| {
            eprintln!("Failed to load {}: {}", path, e);
            process::exit(1);
        }),
        None => SimConfig::default(),
    };

    let mut runner = SimulationRunner::with_echo(&config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    });

    let seed = runner.seed_used();
    info!("seed 0x{}", seed.iter().map(|b| format!("{:02x}", b)).collect::<String>());

    let report = runner.run_to_report().unwrap_or_else(|e| {
        eprintln!("Simulation failed: {}", e);
        process::exit(1);
    });

    for flow in report {
        println!("{}", flow);
    }

    let totals = FlowTotals::from_summaries(report);
    info!(
        "{} flows: {} tx, {} rx, {} lost ({:.1}% delivered), {:.2} Mbps aggregate",
        totals.flows,
        totals.tx_packets,
        totals.rx_packets,
        totals.lost_packets,
        totals.delivery_ratio() * 100.0,
        totals.throughput_mbps
    );
}
