// Mesh scenario runner
//
// Runs a single scenario file, or every .yaml/.yml file of a directory in
// name order. `--seed` pins the backoff RNG for every run:
//
//   cargo run --bin scenario_runner scenarios/mesh_100.yaml
//   cargo run --bin scenario_runner scenarios/
//   cargo run --bin scenario_runner scenarios/ --seed 0x00ff...

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simple_logger::SimpleLogger;

use mesh_sim::{FlowTotals, SimConfig, SimulationRunner};

/// Scenario file: optional metadata plus a full or partial `SimConfig`
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    #[serde(default)]
    meta: ScenarioMeta,

    #[serde(default)]
    config: SimConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

fn main() {
    SimpleLogger::new().with_level(LevelFilter::Warn).env().init().unwrap();

    let mut args = env::args().skip(1);
    let mut target: Option<String> = None;
    let mut seed: Option<[u8; 32]> = None;

    while let Some(arg) = args.next() {
        if arg == "--seed" {
            let Some(hex) = args.next() else {
                exit_with("--seed needs a hex value");
            };
            seed = Some(parse_seed_hex(&hex).unwrap_or_else(|e| exit_with(&e)));
        } else if target.is_none() {
            target = Some(arg);
        } else {
            exit_with(&format!("unexpected argument {}", arg));
        }
    }

    let Some(target) = target else {
        eprintln!("scenario_runner <scenario.yaml | directory> [--seed HEX]");
        eprintln!("  a directory runs all of its .yaml/.yml files in name order");
        std::process::exit(1);
    };

    let path = Path::new(&target);
    if path.is_dir() {
        run_scenario_directory(path, seed);
    } else if path.is_file() {
        run_scenario_file(path, seed);
    } else {
        exit_with(&format!("no such scenario file or directory: {}", path.display()));
    }
}

fn exit_with(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn is_scenario_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

fn run_scenario_directory(dir: &Path, seed: Option<[u8; 32]>) {
    let entries = fs::read_dir(dir).unwrap_or_else(|e| exit_with(&format!("{}: {}", dir.display(), e)));
    let mut scenarios: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_scenario_file(path))
        .collect();
    scenarios.sort();

    if scenarios.is_empty() {
        exit_with(&format!("{} holds no scenario files", dir.display()));
    }

    let total = scenarios.len();
    for (index, scenario) in scenarios.iter().enumerate() {
        println!("\n[{}/{}] {}", index + 1, total, scenario.display());
        run_scenario_file(scenario, seed);
    }
    println!("\n{} scenario(s) done.", total);
}

fn run_scenario_file(path: &Path, seed: Option<[u8; 32]>) {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path)
        .unwrap_or_else(|e| exit_with(&format!("failed to read {}: {}", path.display(), e)));

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content)
        .unwrap_or_else(|e| exit_with(&format!("failed to parse {}: {}", path.display(), e)));

    let title = scenario
        .meta
        .name
        .clone()
        .unwrap_or_else(|| path.display().to_string());
    println!("\n=== {} ===\n", title);
    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }
    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let mut config = scenario.config;
    if seed.is_some() {
        config.seed = seed;
    }

    println!("Configuration:");
    println!("  Nodes: {}", config.topology.num_nodes);
    println!("  Channels: {}", config.topology.num_channels);
    println!("  Access policy: {:?}", config.topology.access_policy);
    println!("  Cross-channel: {:?}", config.topology.cross_channel);
    println!("  Collision model: {:?}", config.phy.collision_model);
    println!(
        "  Traffic: {} x {} bytes every {} s",
        config.traffic.packet_count, config.traffic.packet_size, config.traffic.interval_s
    );
    println!("  Duration: {} s", config.duration_s);

    let mut runner = SimulationRunner::with_echo(&config)
        .unwrap_or_else(|e| exit_with(&format!("invalid scenario {}: {}", path.display(), e)));
    println!("  Seed: 0x{}", runner.seed_used().iter().map(|b| format!("{:02x}", b)).collect::<String>());
    println!("\nStarting simulation...\n");

    let report = match runner.run_to_report() {
        Ok(report) => report.to_vec(),
        Err(e) => exit_with(&format!("simulation failed: {}", e)),
    };

    for flow in &report {
        println!("{}", flow);
    }

    println!("\nChannels:");
    for (id, stats) in runner.channel_stats() {
        println!(
            "  ch{}: {} tx, {} delivered, {} collisions, {} unreachable, {:.1}% busy",
            id,
            stats.transmissions,
            stats.delivered,
            stats.collisions,
            stats.unreachable,
            stats.utilisation(runner.stop_time()) * 100.0
        );
    }

    let totals = FlowTotals::from_summaries(&report);
    println!(
        "\nTotals: {} flows, {} tx, {} rx, {} lost ({:.1}% delivered), {:.2} Mbps",
        totals.flows,
        totals.tx_packets,
        totals.rx_packets,
        totals.lost_packets,
        totals.delivery_ratio() * 100.0,
        totals.throughput_mbps
    );
    println!("\nScenario complete.\n");
}

/// Hex seed with optional `0x` prefix; shorter input is zero-padded on the right
fn parse_seed_hex(hex: &str) -> Result<[u8; 32], String> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    if digits.len() > 64 || digits.len() % 2 != 0 {
        return Err(format!("seed must be an even number of at most 64 hex digits, got {}", hex));
    }
    let mut seed = [0u8; 32];
    for (byte, pair) in seed.iter_mut().zip(digits.as_bytes().chunks(2)) {
        let pair = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
        *byte = u8::from_str_radix(pair, 16).map_err(|e| format!("invalid seed {}: {}", hex, e))?;
    }
    Ok(seed)
}
