//! Uprobe handlers for function latency tracking
//!
//! Implements the eBPF programs that the loader attaches to the entry and
//! return of the target function.

use aya_ebpf::{
    macros::{uprobe, uretprobe},
    programs::{ProbeContext, RetProbeContext},
};
use latency_common::{EntryHandler, ExitHandler};

use crate::helpers::*;

/// Record the start of a call
///
/// Attached to: entry of the target function (uprobe)
#[uprobe]
pub fn handle_entry(ctx: ProbeContext) -> u32 {
    match try_handle_entry(&ctx) {
        Ok(ret) => ret,
        Err(_) => 1,
    }
}

fn try_handle_entry(_ctx: &ProbeContext) -> Result<u32, i64> {
    let handler = EntryHandler::new(StartTimes, KtimeClock);
    let outcome = handler.on_entry(get_context_id());
    increment_stat(outcome.stat_index());

    Ok(0)
}

/// Pair the return with its start and emit the latency
///
/// Attached to: return of the target function (uretprobe)
#[uretprobe]
pub fn handle_exit(ctx: RetProbeContext) -> u32 {
    match try_handle_exit(&ctx) {
        Ok(ret) => ret,
        Err(_) => 1,
    }
}

fn try_handle_exit(ctx: &RetProbeContext) -> Result<u32, i64> {
    let handler = ExitHandler::new(StartTimes, PerfChannel::new(ctx), KtimeClock);
    let outcome = handler.on_exit(get_context_id());
    increment_stat(outcome.stat_index());

    Ok(0)
}
