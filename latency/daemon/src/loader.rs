//! eBPF program loader
//!
//! Handles loading the eBPF program and attaching the entry/return uprobes
//! to the target function.

use anyhow::{Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData, PerCpuArray},
    programs::UProbe,
    Bpf,
};
use latency_common::constants::MAX_STATS;
use log::{info, warn};
use std::path::PathBuf;

use crate::types::ProbeStats;

/// Name of the entry program in the eBPF object
pub const ENTRY_PROGRAM: &str = "handle_entry";

/// Name of the return program in the eBPF object
pub const EXIT_PROGRAM: &str = "handle_exit";

/// Where to attach the probes
#[derive(Debug, Clone)]
pub struct AttachTarget {
    /// Binary or shared library containing the function
    pub binary: PathBuf,
    /// Symbol name of the function
    pub function: String,
    /// Only fire for this process
    pub pid: Option<i32>,
}

impl AttachTarget {
    /// Resolve the binary to an absolute path
    ///
    /// Anything that looks like a path must exist. A bare name such as
    /// `libc` is passed through for aya to resolve against the linker cache.
    pub fn resolve(mut self) -> Result<Self> {
        let looks_like_path =
            self.binary.components().count() > 1 || self.binary.exists();

        if looks_like_path {
            if !self.binary.exists() {
                anyhow::bail!("target binary not found at {:?}", self.binary);
            }
            self.binary = self
                .binary
                .canonicalize()
                .with_context(|| format!("Failed to resolve target path: {:?}", self.binary))?;
        } else {
            warn!(
                "{:?} is not a path, letting the loader resolve it as a library name",
                self.binary
            );
        }

        Ok(self)
    }
}

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
}

impl ProbeLoader {
    /// Load eBPF program from file or embedded bytecode
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to eBPF object file. If None, uses embedded bytecode.
    ///
    /// # Returns
    ///
    /// ProbeLoader instance with loaded eBPF program
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        info!("Loading eBPF program...");

        let ebpf = if let Some(obj_path) = path {
            info!("Loading eBPF object from: {:?}", obj_path);
            let data = std::fs::read(&obj_path)
                .with_context(|| format!("Failed to read eBPF object file: {:?}", obj_path))?;
            Bpf::load(&data).context("Failed to load eBPF program")?
        } else {
            #[cfg(feature = "embedded")]
            {
                info!("Loading embedded eBPF program...");
                let data = include_bytes!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../../target/bpfel-unknown-none/release/latency-probe"
                ));
                Bpf::load(data).context("Failed to load embedded eBPF program")?
            }
            #[cfg(not(feature = "embedded"))]
            {
                anyhow::bail!(
                    "No eBPF object file provided. Use --ebpf-object or compile with 'embedded' feature"
                );
            }
        };

        info!("eBPF program loaded successfully");

        Ok(Self { ebpf })
    }

    /// Attach the entry uprobe and the return uretprobe to the target
    ///
    /// Both programs are attached to the same symbol; whether a program
    /// fires on entry or return is fixed by its section in the object.
    pub fn attach_uprobes(&mut self, target: &AttachTarget) -> Result<()> {
        info!(
            "Attaching uprobes to {} in {:?}{}",
            target.function,
            target.binary,
            target
                .pid
                .map(|pid| format!(" (pid {})", pid))
                .unwrap_or_default()
        );

        for name in [ENTRY_PROGRAM, EXIT_PROGRAM] {
            let program: &mut UProbe = self
                .ebpf
                .program_mut(name)
                .with_context(|| format!("{} program not found in eBPF object", name))?
                .try_into()
                .with_context(|| format!("Failed to get {} as UProbe", name))?;
            program
                .load()
                .with_context(|| format!("Failed to load {}", name))?;
            program
                .attach(Some(target.function.as_str()), 0, &target.binary, target.pid)
                .with_context(|| {
                    format!(
                        "Failed to attach {} to {} in {:?}",
                        name, target.function, target.binary
                    )
                })?;
            info!("  ✓ Attached {}", name);
        }

        info!("All uprobes attached successfully");

        Ok(())
    }

    /// Get the perf event array for reading latency events
    ///
    /// # Returns
    ///
    /// AsyncPerfEventArray for reading latency events from the kernel
    pub fn get_perf_array(&mut self) -> Result<AsyncPerfEventArray<MapData>> {
        let map = self
            .ebpf
            .take_map("EVENTS")
            .context("EVENTS map not found in eBPF object")?;

        AsyncPerfEventArray::try_from(map)
            .context("Failed to create AsyncPerfEventArray from EVENTS map")
    }

    /// Read the handler outcome counters, summed across CPUs
    pub fn read_probe_stats(&self) -> Result<ProbeStats> {
        let map = self
            .ebpf
            .map("STATS")
            .context("STATS map not found in eBPF object")?;
        let stats = PerCpuArray::<_, u64>::try_from(map)
            .context("Failed to create PerCpuArray from STATS map")?;

        let counters = (0..MAX_STATS)
            .map(|idx| {
                stats
                    .get(&idx, 0)
                    .map(|per_cpu| per_cpu.iter().sum::<u64>())
                    .with_context(|| format!("Failed to read STATS[{}]", idx))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ProbeStats::from_counters(&counters))
    }
}
