//! eBPF Function Latency Probe - Kernel Space Program
//!
//! Measures the wall-clock latency of one function in a running process.
//! A uprobe on the function entry stores a start timestamp per thread; a
//! uretprobe on its return takes that timestamp back out, computes the
//! elapsed time and sends it to userspace via a perf event array.
//!
//! ## Architecture
//!
//! ```text
//! target fn entry  -> handle_entry: START_TIMES[pid_tgid] = now
//!                     |
//!                     v
//! target fn return -> handle_exit: take START_TIMES[pid_tgid],
//!                     emit {pid_tgid, now - start} to EVENTS
//!                     |
//!                     v
//! Userspace        -> Read events, aggregate statistics, export metrics
//! ```
//!
//! ## Usage
//!
//! This program must be compiled for the bpfel-unknown-none target:
//!
//! ```bash
//! cargo build --release --target=bpfel-unknown-none -p latency-probe-ebpf
//! ```
//!
//! The compiled bytecode is then loaded by the userspace program.

#![no_std]
#![no_main]

mod handlers;
mod helpers;
mod maps;

// Re-export probe functions so they're visible to the loader
pub use handlers::{handle_entry, handle_exit};

// Re-export maps for verification
pub use maps::{EVENTS, START_TIMES, STATS};

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // eBPF programs cannot panic - this should never be reached
    loop {}
}
