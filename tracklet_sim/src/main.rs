//! Tracklet Simulator CLI
//!
//! Generates seeded synthetic events and reconstructs them with the
//! tracklet estimator.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracklet_core::TrackletConfig;
use tracklet_sim::scenarios::ScenarioId;
use tracklet_sim::{load_config, ScenarioResult, ScenarioRunner, SimExport};

/// Tracklet estimator simulation CLI
#[derive(Parser, Debug)]
#[command(name = "tracklet-sim")]
#[command(about = "Run seeded reconstruction scenarios for the tracklet estimator", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Scenario to run (straight, inclined, tilted, row_cross, noisy, sparse, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Tracks generated per scenario
    #[arg(short, long, default_value = "50")]
    tracks: usize,

    /// JSON estimator configuration (missing keys use defaults)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export reconstructed tracklets of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging (RUST_LOG wins over --verbose)
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Tracklet Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let config = match &args.config {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            eprintln!("Error: cannot load config {}: {}", path, e);
            std::process::exit(1);
        }),
        None => TrackletConfig::default(),
    };

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: straight, inclined, tilted, row_cross, noisy, sparse, all");
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        let runner = ScenarioRunner::new(base_seed)
            .with_tracks(args.tracks)
            .with_config(config.clone());
        let result = runner.run(scenarios[0]);
        let export = SimExport::from_result(&result, runner.config());

        match export.write_to_file(export_path) {
            Ok(()) => info!("Exported {} tracks to {}", export.tracks.len(), export_path),
            Err(e) => {
                error!("Failed to write export: {}", e);
                std::process::exit(1);
            }
        }
        report(&result);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Run scenarios
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_tracks(args.tracks)
            .with_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "tracks": r.total_tracks,
                    "efficiency": r.efficiency(),
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: cannot encode summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult) {
    let m = &result.metrics;
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | fitted {}/{} | slope residual {:.4} | pull rms {:.2} | row-cross {}",
            result.scenario.name(),
            result.seed,
            m.fitted,
            result.total_tracks,
            m.mean_slope_residual,
            m.y_pull_rms,
            m.row_cross_detected
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
