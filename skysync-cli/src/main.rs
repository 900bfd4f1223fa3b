//! SkySync soak harness.
//!
//! Runs the synchronization scheduler against a simulated transport,
//! requesting a randomized set of terrain tiles plus the shared scenery and
//! AI traffic trees, and prints periodic status lines until the work drains
//! or Ctrl+C arrives.

mod sim;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skysync::{SyncCategory, SyncConfig, SyncService};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use sim::{SimFactory, SimOptions};

#[derive(Debug, Parser)]
#[command(name = "skysync", version, about = "Scenery synchronization soak harness")]
struct Args {
    /// Local scenery root directory
    #[arg(long, default_value = "/tmp/skysync")]
    root: PathBuf,

    /// Mirror server base URL
    #[arg(long, default_value = "https://scenery.example.org")]
    server: String,

    /// Auxiliary map-layer base URL (omit to leave the sub-service unconfigured)
    #[arg(long)]
    aux_url: Option<String>,

    /// Number of random terrain tiles to request
    #[arg(long, default_value_t = 64)]
    tiles: u32,

    /// Probability that a simulated operation fails
    #[arg(long, default_value_t = 0.05)]
    fail_rate: f64,

    /// Probability that a simulated remote directory is missing
    #[arg(long, default_value_t = 0.30)]
    not_found_rate: f64,

    /// Mean simulated operation latency in milliseconds
    #[arg(long, default_value_t = 150)]
    latency_ms: u64,

    /// Exit once all requested work has completed
    #[arg(long)]
    drain: bool,

    /// RNG seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = SyncConfig::new(&args.root);
    config.fallback_server = Some(args.server.clone());
    config.aux_layer_url = args.aux_url.clone();
    config.rng_seed = args.seed;

    let factory = Arc::new(SimFactory::new(SimOptions {
        fail_rate: args.fail_rate,
        not_found_rate: args.not_found_rate,
        latency: Duration::from_millis(args.latency_ms),
        seed: args.seed,
    }));

    let mut service = SyncService::new(config, factory, None);
    if let Err(err) = service.start() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    println!("SkySync soak harness");
    println!("====================");
    println!();
    println!("Root:      {}", args.root.display());
    println!("Server:    {}", args.server);
    println!("Tiles:     {}", args.tiles);
    println!("Fail rate: {:.0}%", args.fail_rate * 100.0);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let requested = submit_workload(&service, &args);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(err) = ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        eprintln!("error: failed to set signal handler: {err}");
        std::process::exit(1);
    }

    let mut completed = 0usize;
    let mut last_status = Instant::now();
    let status_interval = Duration::from_secs(1);

    while !shutdown.load(Ordering::SeqCst) {
        completed += service.update().len();
        if args.drain && completed >= requested {
            break;
        }

        if last_status.elapsed() >= status_interval {
            let state = service.state();
            println!(
                "[{}] ok {} / failed {} | busy {} | pending {} | rate {}/s{}",
                if state.stalled { "stalled" } else { "syncing" },
                state.success_count,
                state.fail_count,
                state.busy,
                format_size(state.total_pending_bytes),
                format_size(state.transfer_rate_bytes_sec),
                if state.stalled {
                    format!(" | errors {}", state.consecutive_errors)
                } else {
                    String::new()
                },
            );
            last_status = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    let state = service.state();
    service.stop();

    println!();
    println!("Session Summary");
    println!("───────────────");
    println!("  Requests completed: {completed} of {requested}");
    println!("  Updated:            {}", state.success_count);
    println!("  Terrain tiles:      {}", state.updated_tile_count);
    println!("  Failed:             {}", state.fail_count);
    println!("  Downloaded:         {}", format_size(state.total_bytes_downloaded));
}

/// Queues the soak workload: shared trees once, then a random tile set.
/// Returns the number of requests submitted.
fn submit_workload(service: &SyncService, args: &Args) -> usize {
    service.request_sync("Airports", SyncCategory::Airports);
    service.request_sync("Models", SyncCategory::Models);
    service.request_sync("Traffic", SyncCategory::AiTraffic);
    let mut count = 3;

    if args.aux_url.is_some() {
        service.request_sync("osm2city/e000n40", SyncCategory::AuxMapLayer);
        count += 1;
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut submitted = HashSet::new();
    while submitted.len() < args.tiles as usize {
        let path = random_tile_path(&mut rng);
        if submitted.insert(path.clone()) {
            service.request_sync(path, SyncCategory::Terrain);
        }
    }
    count + submitted.len()
}

/// A random tile directory in the `e000n40/e005n47` naming scheme: a
/// 10x10 degree bucket containing a 1x1 degree tile.
fn random_tile_path(rng: &mut StdRng) -> String {
    let lon = rng.random_range(-180..180);
    let lat = rng.random_range(-90..90);
    let bucket_lon = (lon as f64 / 10.0).floor() as i32 * 10;
    let bucket_lat = (lat as f64 / 10.0).floor() as i32 * 10;
    format!(
        "{}{}/{}{}",
        format_lon(bucket_lon),
        format_lat(bucket_lat),
        format_lon(lon),
        format_lat(lat)
    )
}

fn format_lon(lon: i32) -> String {
    if lon < 0 {
        format!("w{:03}", -lon)
    } else {
        format!("e{lon:03}")
    }
}

fn format_lat(lat: i32) -> String {
    if lat < 0 {
        format!("s{:02}", -lat)
    } else {
        format!("n{lat:02}")
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
