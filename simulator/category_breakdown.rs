// Per access category breakdown of a mesh run
//
// Usage:
//   cargo run --release --example category_breakdown
//   cargo run --release --example category_breakdown -- 20 1

use std::collections::BTreeMap;
use std::env;

use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use mesh_sim::{AccessCategory, CrossChannelPolicy, SimConfig, SimulationRunner};

#[derive(Default)]
struct CategoryTotals {
    flows: usize,
    tx: u64,
    rx: u64,
    lost: u64,
    delay_sum_s: f64,
    delayed_flows: usize,
}

fn main() {
    SimpleLogger::new().with_level(LevelFilter::Info).init().unwrap();

    let args: Vec<String> = env::args().collect();
    let nodes: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let channels: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(4);

    let mut config = SimConfig::default();
    config.topology.num_nodes = nodes;
    config.topology.num_channels = channels;
    config.topology.cross_channel = CrossChannelPolicy::Bridged;
    config.duration_s = 2.0;
    config.traffic.packet_count = 300;

    let mut runner = SimulationRunner::with_echo(&config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });
    let report = match runner.run_to_report() {
        Ok(report) => report.to_vec(),
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };
    info!("{} flows on {} nodes / {} channels", report.len(), nodes, channels);

    let topology = runner.topology();
    let mut by_category: BTreeMap<AccessCategory, CategoryTotals> = BTreeMap::new();
    for flow in &report {
        let Some(category) = topology
            .node_by_address(flow.src_addr)
            .and_then(|node| topology.access_category_of(node))
        else {
            continue;
        };
        let totals = by_category.entry(category).or_default();
        totals.flows += 1;
        totals.tx += flow.tx_packets;
        totals.rx += flow.rx_packets;
        totals.lost += flow.lost_packets;
        if let Some(delay) = flow.avg_delay_s {
            totals.delay_sum_s += delay;
            totals.delayed_flows += 1;
        }
    }

    println!("\n{:<12} {:>6} {:>8} {:>8} {:>8} {:>10} {:>14}", "category", "flows", "tx", "rx", "lost", "delivered", "avg delay (s)");
    for (category, t) in &by_category {
        let delivered = if t.tx == 0 { 0.0 } else { t.rx as f64 / t.tx as f64 * 100.0 };
        let delay = if t.delayed_flows == 0 {
            "-".to_string()
        } else {
            format!("{:.6}", t.delay_sum_s / t.delayed_flows as f64)
        };
        println!(
            "{:<12} {:>6} {:>8} {:>8} {:>8} {:>9.1}% {:>14}",
            category.name(),
            t.flows,
            t.tx,
            t.rx,
            t.lost,
            delivered,
            delay
        );
    }
}
