//! eBPF Function Latency Monitor - Userspace Program
//!
//! Loads the eBPF latency program, attaches a uprobe and a uretprobe to
//! one function, collects per-call latency events, and exports metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Watch handle_request in a binary for 60 seconds, export to JSON
//! sudo ./latency-monitor --binary ./demo-target --function handle_request \
//!     --ebpf-object target/bpfel-unknown-none/release/latency-probe
//!
//! # Only one process, print every sample
//! sudo ./latency-monitor --binary /usr/bin/server --function handle_request \
//!     --pid 4242 --verbose
//!
//! # Export to Prometheus format
//! sudo ./latency-monitor --binary ./server --function handle_request \
//!     --format prometheus --output metrics.prom
//! ```

use anyhow::Result;
use clap::Parser;
use latency_monitor::{
    collector::MetricsCollector,
    events::EventProcessor,
    exporter::ExporterType,
    loader::{AttachTarget, ProbeLoader},
    types::{LatencyMetrics, ProbeStats, TargetInfo},
};
use log::{info, warn};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    signal,
    sync::Mutex,
    time::{sleep, Instant},
};

/// Function latency tracking probe using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Binary or shared library containing the target function
    #[clap(short, long)]
    binary: PathBuf,

    /// Symbol name of the target function
    #[clap(short = 'F', long, default_value = "handle_request")]
    function: String,

    /// Only trace this process
    #[clap(short, long)]
    pid: Option<i32>,

    /// Duration to run the probe (in seconds, 0 = infinite)
    #[clap(short, long, default_value_t = 60)]
    duration: u64,

    /// Output file for metrics
    #[clap(short, long, default_value = "latency-metrics.json")]
    output: PathBuf,

    /// Output format (json, prometheus, influx)
    #[clap(short, long, default_value = "json")]
    format: String,

    /// Verbose logging, including every sample
    #[clap(short, long)]
    verbose: bool,

    /// Path to eBPF object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Starting function latency monitor...");
    info!("   Target: {} in {:?}", args.function, args.binary);
    info!(
        "   Duration: {} seconds",
        if args.duration == 0 {
            "infinite".to_string()
        } else {
            args.duration.to_string()
        }
    );
    info!("   Output: {:?}", args.output);
    info!("   Format: {}", args.format);

    if args.progress_interval == 0 {
        anyhow::bail!("Progress interval must be >= 1");
    }

    let export_format: ExporterType = args.format.parse()?;

    let target = AttachTarget {
        binary: args.binary.clone(),
        function: args.function.clone(),
        pid: args.pid,
    }
    .resolve()?;

    // Load eBPF program and attach to the target function
    let mut loader = ProbeLoader::load(args.ebpf_object.clone())?;
    loader.attach_uprobes(&target)?;

    let perf_array = loader.get_perf_array()?;

    info!("Collecting latency samples...");

    let collector = Arc::new(Mutex::new(MetricsCollector::new()));
    let processor = EventProcessor::new(Arc::clone(&collector), args.verbose);

    processor.spawn_cpu_readers(perf_array)?;
    processor.spawn_progress_reporter(args.progress_interval);

    // Run for specified duration or until interrupted
    let start_time = Instant::now();

    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                info!("Duration reached, shutting down...");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
            }
        }
    } else {
        signal::ctrl_c().await?;
        info!("Interrupted, shutting down...");
    }

    let elapsed = start_time.elapsed().as_secs();

    let probe_stats = match loader.read_probe_stats() {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Could not read probe counters: {:#}", e);
            ProbeStats::default()
        }
    };

    info!("Generating metrics report...");

    let target_info = TargetInfo {
        binary: target.binary.display().to_string(),
        function: target.function.clone(),
        pid: target.pid,
    };
    let metrics = collector
        .lock()
        .await
        .generate_metrics(elapsed, target_info, probe_stats);

    export_format
        .exporter(args.output.clone())
        .export(&metrics)?;

    info!("Metrics written to {:?}", args.output);

    print_summary(&metrics);

    Ok(())
}

fn print_summary(metrics: &LatencyMetrics) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Function:           {}", metrics.target.function);
    info!("  Total events:       {}", metrics.total_events);
    info!("  Lost events:        {}", metrics.lost_events);
    info!("  Processes:          {}", metrics.processes.len());
    info!("  Duration:           {} seconds", metrics.duration_seconds);
    info!("");
    info!("  Latency Percentiles (μs):");
    info!("    p50:  {:>10.2}", metrics.percentiles.p50);
    info!("    p75:  {:>10.2}", metrics.percentiles.p75);
    info!("    p90:  {:>10.2}", metrics.percentiles.p90);
    info!("    p95:  {:>10.2}", metrics.percentiles.p95);
    info!("    p99:  {:>10.2}", metrics.percentiles.p99);
    info!("    p999: {:>10.2}", metrics.percentiles.p999);
    info!("");
    info!("  Histogram:");
    info!("    0-1ms:       {:>8}", metrics.histogram.bucket_0_1ms);
    info!("    1-5ms:       {:>8}", metrics.histogram.bucket_1_5ms);
    info!("    5-10ms:      {:>8}", metrics.histogram.bucket_5_10ms);
    info!("    10-50ms:     {:>8}", metrics.histogram.bucket_10_50ms);
    info!("    50-100ms:    {:>8}", metrics.histogram.bucket_50_100ms);
    info!("    100ms+:      {:>8}", metrics.histogram.bucket_100ms_plus);
    info!("");
    info!("  Probe Outcomes:");
    let s = &metrics.probe_stats;
    info!("    entries recorded: {:>8}", s.entries_recorded);
    info!("    entries rejected: {:>8}", s.entries_rejected);
    info!("    exits unmatched:  {:>8}", s.exits_unmatched);
    info!("    exits clock skew: {:>8}", s.exits_clock_skew);
    info!("    events emitted:   {:>8}", s.events_emitted);
    info!("");
    info!("============================================");
}
