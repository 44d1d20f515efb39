//! ttlmap soak runner
//!
//! Hammers an `ExpirableMap` from several threads with a mix of puts,
//! removes and reads, waits for every TTL to elapse, and checks that the map
//! drained completely.

use anyhow::bail;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ttlmap::{ExpirableMap, ExpirationScheduler, SchedulerConfig};

/// Extra time allowed for timers to fire after the TTL has elapsed
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Soak configuration
struct Config {
    /// Number of client threads
    threads: usize,
    /// Distinct keys shared by all threads
    keys: u64,
    /// Operations per thread
    ops: u64,
    /// TTL for every put, in milliseconds
    ttl_ms: u64,
    /// Scheduler worker threads (0 = available parallelism)
    workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 8,
            keys: 1_000,
            ops: 100_000,
            ttl_ms: 50,
            workers: 0,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--threads" | "-t" => config.threads = parse_value(&args, i) as usize,
                "--keys" | "-k" => config.keys = parse_value(&args, i).max(1),
                "--ops" | "-n" => config.ops = parse_value(&args, i),
                "--ttl-ms" => config.ttl_ms = parse_value(&args, i),
                "--workers" | "-w" => config.workers = parse_value(&args, i) as usize,
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("ttlmap version {}", ttlmap::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", flag);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 2;
        }

        config
    }
}

/// Reads the numeric value following the flag at `i`, exiting on bad input.
fn parse_value(args: &[String], i: usize) -> u64 {
    match args.get(i + 1).map(|v| v.parse::<u64>()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            eprintln!("Error: {} expects a non-negative integer", args[i]);
            std::process::exit(1);
        }
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
ttlmap - concurrent expiring map soak runner

USAGE:
    ttlmap [OPTIONS]

OPTIONS:
    -t, --threads <N>     Client threads (default: 8)
    -k, --keys <N>        Distinct keys (default: 1000)
    -n, --ops <N>         Operations per thread (default: 100000)
        --ttl-ms <MS>     TTL for every put (default: 50)
    -w, --workers <N>     Scheduler worker threads (default: available parallelism)
    -v, --version         Print version information
        --help            Print this help message

Log verbosity follows RUST_LOG (default: info).
"#
    );
}

/// Cheap deterministic mixing so threads touch keys in different orders.
fn mix(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x
}

fn run_client(map: &ExpirableMap<u64, u64>, thread_id: u64, config: &Config) -> anyhow::Result<()> {
    let ttl = Duration::from_millis(config.ttl_ms);

    for op in 0..config.ops {
        let roll = mix(thread_id << 32 | op);
        let key = roll % config.keys;

        match (roll >> 16) % 10 {
            0..=5 => {
                map.put(key, roll, ttl)?;
            }
            6 => {
                map.remove(&key);
            }
            7 => {
                if let Some(current) = map.get(&key) {
                    map.remove_if(&key, &current);
                }
            }
            _ => {
                map.get(&key);
            }
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if config.ttl_ms == 0 {
        bail!("--ttl-ms must be greater than zero");
    }

    let mut scheduler_config = SchedulerConfig::default();
    if config.workers > 0 {
        scheduler_config = scheduler_config.with_worker_threads(config.workers);
    }
    let scheduler = Arc::new(ExpirationScheduler::new(scheduler_config)?);
    let map = Arc::new(ExpirableMap::with_scheduler(Arc::clone(&scheduler)));

    info!(
        threads = config.threads,
        keys = config.keys,
        ops = config.ops,
        ttl_ms = config.ttl_ms,
        "Starting soak run"
    );

    let config = Arc::new(config);
    let started = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let map = Arc::clone(&map);
            let config = Arc::clone(&config);
            thread::spawn(move || run_client(&map, t as u64, &config))
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("client thread panicked"),
        }
    }

    let elapsed = started.elapsed();
    let total_ops = config.ops * config.threads as u64;
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (total_ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON)) as u64,
        live_keys = map.len(),
        pending = map.pending_evictions(),
        "Workload finished, waiting for entries to expire"
    );

    thread::sleep(Duration::from_millis(config.ttl_ms) + DRAIN_GRACE);

    let stats = map.stats();
    let scheduler_stats = scheduler.stats();
    info!(
        puts = stats.puts,
        removes = stats.removes,
        evictions = stats.evictions,
        stale_evictions = stats.stale_evictions,
        fired = scheduler_stats.fired,
        cancelled = scheduler_stats.cancelled,
        "Soak statistics"
    );

    let survivors = map.len();
    let pending = map.pending_evictions();

    drop(map);
    scheduler.shutdown();

    if survivors > 0 || pending > 0 {
        warn!(survivors, pending, "Entries outlived their TTL");
        bail!("{} entries and {} evictions outlived their TTL", survivors, pending);
    }

    info!("All entries expired");
    Ok(())
}
