//! vox-rt - runtime diagnostics
//!
//! Inspects the runtime a compiled program would link against: which poller
//! backend was built, whether TCP works from here, and how fast wake-ups are.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::utils::Backoff;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vox_rt::{cells, clock, config, EventLoopCore, Poller, RuntimeConfig, TcpTable};

#[derive(Parser)]
#[command(name = "vox-rt")]
#[command(version)]
#[command(about = "Vox native runtime diagnostics", long_about = None)]
struct Cli {
    /// Config file (default: search for vox-rt.toml upwards from the cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend, slot table, clock and effective configuration
    Info,

    /// Connect to a TCP endpoint and wait for it to become writable
    Probe {
        /// Host name or address
        host: String,

        /// Port
        port: u16,

        /// Writable wait timeout in milliseconds
        #[arg(long, default_value = "1000")]
        timeout_ms: i32,
    },

    /// Measure cross-thread wake -> wait round trips
    WakeLatency {
        /// Number of round trips
        #[arg(long, default_value = "1000")]
        iterations: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let runtime_config = load_config(cli.config.as_deref())?;
    if config::install(runtime_config).is_err() {
        tracing::warn!("runtime config already installed");
    }
    vox_rt::host::startup(config::current());

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Probe {
            host,
            port,
            timeout_ms,
        } => cmd_probe(&host, port, timeout_ms),
        Commands::WakeLatency { iterations } => cmd_wake_latency(iterations),
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut cfg = match path {
        Some(p) => RuntimeConfig::load(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => RuntimeConfig::load_from_cwd().context("loading vox-rt.toml")?,
    };
    cfg.apply_env();
    Ok(cfg)
}

fn cmd_info() -> Result<()> {
    let core = EventLoopCore::init().context("initialising event loop")?;

    println!("vox-rt {}", vox_rt::VERSION);
    println!("==========");
    println!("  Poller backend: {}", Poller::backend());
    println!("  Wake slots:     {}", core.n_slots());
    println!("  Clock (ns):     {}", clock::now_ns());
    println!();
    println!("Effective configuration:");
    println!("------------------------");
    print!(
        "{}",
        toml::to_string_pretty(config::current()).context("serializing config")?
    );
    Ok(())
}

fn cmd_probe(host: &str, port: u16, timeout_ms: i32) -> Result<()> {
    let table = TcpTable::new(config::current().net.clone());

    let start = Instant::now();
    let handle = table
        .connect(host, port)
        .with_context(|| format!("connecting to {}:{}", host, port))?;
    let connected = start.elapsed();

    let writable = table.wait_writable(handle, timeout_ms)?;
    let local_port = table.local_port(handle)?;
    table.close(handle);

    println!("Probe {}:{}", host, port);
    println!("  Connected in:  {:?}", connected);
    println!("  Local port:    {}", local_port);
    println!("  Writable:      {}", writable);
    Ok(())
}

fn cmd_wake_latency(iterations: usize) -> Result<()> {
    let core = EventLoopCore::init().context("initialising event loop")?;
    let cells = cells::global();
    let pending = core.pending_handle(0)?;
    cells.store(pending, 0i32)?;

    let mut samples: Vec<Duration> = Vec::with_capacity(iterations);

    crossbeam::scope(|s| -> Result<()> {
        let waiter = s.spawn(|_| -> Result<()> {
            let mut seen = 0;
            while seen < iterations {
                core.wait(100)?;
                if cells.swap(pending, 0i32)? == 1 {
                    seen += 1;
                }
            }
            Ok(())
        });

        for _ in 0..iterations {
            let start = Instant::now();
            cells.store(pending, 1i32)?;
            core.wake()?;

            let backoff = Backoff::new();
            while cells.load::<i32>(pending)? != 0 {
                backoff.snooze();
            }
            samples.push(start.elapsed());
        }

        waiter
            .join()
            .map_err(|_| anyhow::anyhow!("waiter thread panicked"))?
    })
    .map_err(|_| anyhow::anyhow!("wake-latency thread scope panicked"))??;

    print_latency(Poller::backend(), &mut samples);
    Ok(())
}

fn print_latency(backend: &str, samples: &mut [Duration]) {
    println!("Wake Latency Benchmark ({}):", backend);
    println!("------------------------------");
    if samples.is_empty() {
        println!("  No samples");
        return;
    }
    samples.sort_unstable();
    let total: Duration = samples.iter().sum();
    let avg_ns = total.as_nanos() / samples.len() as u128;
    let p99 = samples[(samples.len() * 99 / 100).min(samples.len() - 1)];

    println!("  Iterations: {}", samples.len());
    println!("  Average:    {} ns ({:.2} μs)", avg_ns, avg_ns as f64 / 1000.0);
    println!("  Median:     {:?}", samples[samples.len() / 2]);
    println!("  p99:        {:?}", p99);
    println!("  Max:        {:?}", samples[samples.len() - 1]);
}
