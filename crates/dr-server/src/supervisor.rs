//! The one-second supervisor tick (spec.md §4.8). Grounded on
//! `kimberlite-cluster/src/supervisor.rs`'s tick-loop/monitor shape:
//! a single task wakes on a fixed interval, walks shared state under its
//! locks, and fires time-boxed subtasks — never anything CPU-bound enough
//! to miss the next tick.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use dr_types::{
    DISK_ALMOST_FULL_CHECK_SECONDS, FINISH_ON_AVERAGE_CHECK_SECONDS, MIN_DISK_SPACE_TO_RUN_BYTES,
    MOBILITY_CHECK_SECONDS, NODE_DISPLAY_SECONDS, QUEUE_INTERVAL_SECONDS,
};

use crate::context::{ServerContext, SimulationStatus};
use crate::mobile;

/// Next-fire unix times for each of §4.8's periodic actions. Seeded from
/// the context's start time so a freshly started server doesn't fire
/// every timer on its very first tick.
pub struct SupervisorTimers {
    next_crash_check: u64,
    next_queue_conditional: u64,
    next_queue_unconditional: u64,
    next_disk_check: u64,
    next_finish_check: u64,
    next_snapshot: u64,
    next_mobility_check: u64,
    next_node_display: u64,
    save_snapshot_now: bool,
}

impl SupervisorTimers {
    pub fn new(start_time: u64) -> Self {
        SupervisorTimers {
            next_crash_check: start_time,
            next_queue_conditional: start_time,
            next_queue_unconditional: start_time + QUEUE_INTERVAL_SECONDS,
            next_disk_check: start_time,
            next_finish_check: start_time + FINISH_ON_AVERAGE_CHECK_SECONDS,
            next_snapshot: start_time,
            next_mobility_check: start_time + MOBILITY_CHECK_SECONDS,
            next_node_display: start_time + NODE_DISPLAY_SECONDS,
            save_snapshot_now: false,
        }
    }

    /// Set by the `Snapshot` command (spec.md §4.1); consumed on the next tick.
    pub fn request_snapshot_now(&mut self) {
        self.save_snapshot_now = true;
    }
}

/// Runs one second's worth of supervisor work. Intended to be called in a
/// loop with a one-second sleep between calls; every branch takes at most
/// one lock at a time and releases it before returning.
pub fn tick(ctx: &ServerContext, snapshot_dir: &Path, timers: &mut SupervisorTimers) {
    let now = ctx.now();

    if now >= timers.next_crash_check {
        timers.next_crash_check = now + (ctx.config.job_timeout / 2).max(1);
        crash_check(ctx, now);
    }

    let mut queue_due = now >= timers.next_queue_unconditional;
    if now >= timers.next_queue_conditional {
        let n_nodes = ctx.replica_state.lock().expect("replica lock poisoned").nodes.len().max(1);
        timers.next_queue_conditional = now + (ctx.config.node_time / n_nodes as u64).max(1);
        let crashed = ctx.replica_state.lock().expect("replica lock poisoned").replicas.find_timed_out(now, ctx.config.job_timeout).len();
        if crashed > 0 {
            queue_due = true;
        } else {
            let reserved = ctx.queue.lock().expect("queue lock poisoned").reserved_slots;
            if (reserved as usize) < n_nodes {
                queue_due = true;
            }
        }
    }
    if queue_due && ctx.config.submit_jobs {
        timers.next_queue_unconditional = now + QUEUE_INTERVAL_SECONDS;
        submit_queue(ctx);
    }

    if now >= timers.next_disk_check {
        timers.next_disk_check = now + DISK_ALMOST_FULL_CHECK_SECONDS;
        disk_guard(ctx, snapshot_dir);
    }

    if now >= timers.next_finish_check {
        timers.next_finish_check = now + FINISH_ON_AVERAGE_CHECK_SECONDS;
        finish_on_average_check(ctx);
    }

    if timers.save_snapshot_now || (ctx.config.snapshot_save_interval > 0 && now >= timers.next_snapshot) {
        timers.next_snapshot = now + ctx.config.snapshot_save_interval.max(1);
        timers.save_snapshot_now = false;
        save_snapshot_tick(ctx, snapshot_dir, now);
    }

    if let (Some(time_left), Some(_)) = (ctx.config.supervisor.allotted_time_for_server, ctx.config.supervisor.mobility_required_time_gain) {
        if now >= timers.next_mobility_check {
            timers.next_mobility_check = now + MOBILITY_CHECK_SECONDS;
            let remaining = time_left.saturating_sub(ctx.uptime());
            let mobility_time = ctx.config.supervisor.mobility_time_left.unwrap_or(0).max(0) as u64;
            if remaining < mobility_time && ctx.uptime() > 2 * ctx.config.job_timeout {
                mobile::attempt_handoff(ctx, snapshot_dir, now);
            }
        }
    }

    if now >= timers.next_node_display {
        timers.next_node_display = now + NODE_DISPLAY_SECONDS;
        display_nodes(ctx);
    }

    match ctx.status() {
        SimulationStatus::Finished | SimulationStatus::AllottedTimeOver => {
            final_snapshot(ctx, snapshot_dir, now);
        }
        _ => {}
    }
}

/// `job_timeout/2`: any `Running` replica idle past `job_timeout` is
/// restarted (spec.md §4.8, S3).
fn crash_check(ctx: &ServerContext, now: u64) {
    let mut state = ctx.replica_state.lock().expect("replica lock poisoned");
    let timed_out = state.replicas.find_timed_out(now, ctx.config.job_timeout);
    for replica_number in timed_out {
        if let Ok(replica) = state.replicas.get_mut(replica_number) {
            if let Ok(Some(slot)) = replica.release_node() {
                let _ = state.nodes.release(slot);
            }
            ctx.log(&format!("restarting replica {}", replica_number.0));
        }
    }
}

fn submit_queue(ctx: &ServerContext) {
    let mut queue = ctx.queue.lock().expect("queue lock poisoned");
    if let Err(err) = queue.submit(&ctx.config.title) {
        ctx.log(&format!("queue submission failed: {err}"));
    }
}

/// `statvfs` via `df`, matching the shell-out idiom already established
/// for `drsub` (spec.md §4.8 names `statvfs` but gives no portable Rust
/// equivalent without an extra syscall dependency; this keeps the same
/// external-process boundary the queue submission already crosses).
fn disk_guard(ctx: &ServerContext, dir: &Path) {
    let free_bytes = free_disk_bytes(dir);
    let status = ctx.status();
    match (free_bytes, status) {
        (Some(free), SimulationStatus::Running) if free < MIN_DISK_SPACE_TO_RUN_BYTES => {
            ctx.set_status(SimulationStatus::DiskAlmostFull);
            ctx.log("disk almost full, pausing");
        }
        (Some(free), SimulationStatus::DiskAlmostFull) if free >= MIN_DISK_SPACE_TO_RUN_BYTES => {
            ctx.set_status(SimulationStatus::Running);
            ctx.log("disk space recovered, resuming");
        }
        _ => {}
    }
}

fn free_disk_bytes(dir: &Path) -> Option<u64> {
    let output = Command::new("df").arg("-k").arg(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let available_kb: u64 = fields.get(3)?.parse().ok()?;
    Some(available_kb * 1024)
}

/// `FINISH_ON_AVERAGE_CHECK_SECONDS`: finished once every replica has
/// accumulated at least as many committed rounds as its configured
/// `sampling_runs` target.
fn finish_on_average_check(ctx: &ServerContext) {
    let state = ctx.replica_state.lock().expect("replica lock poisoned");
    let total_sequence: u64 = state.replicas.iter().map(|(_, r)| u64::from(r.sequence_number.0)).sum();
    let total_target: u64 = u64::from(state.replicas.total_sampling_runs());
    drop(state);
    if ctx.config.supervisor.stop_on_average_time_exceeded && total_sequence > total_target {
        ctx.set_status(SimulationStatus::Finished);
        ctx.log("finished: average sample count exceeded target");
    }
}

fn save_snapshot_tick(ctx: &ServerContext, dir: &Path, now: u64) {
    let state = ctx.replica_state.lock().expect("replica lock poisoned");
    let vre = ctx.vre.lock().expect("vRE lock poisoned");
    let n_atoms = state.replicas.iter().next().map(|(_, r)| (r.coordinate_sum.len() / 3) as u32).unwrap_or(0);
    match dr_storage::save_snapshot(dir, &ctx.config.title, now, n_atoms, &state.replicas, vre.as_ref()) {
        Ok(path) => ctx.log(&format!("saved snapshot {}", path.display())),
        Err(err) => ctx.log(&format!("snapshot save failed: {err}")),
    }
}

fn final_snapshot(ctx: &ServerContext, dir: &Path, now: u64) {
    save_snapshot_tick(ctx, dir, now);
}

fn display_nodes(ctx: &ServerContext) {
    let state = ctx.replica_state.lock().expect("replica lock poisoned");
    let active: Vec<String> = state
        .nodes
        .iter()
        .filter(|(_, n)| n.active)
        .map(|(slot, n)| format!("{}:{}", slot.0, n.ip))
        .collect();
    drop(state);
    ctx.log(&format!("node table: [{}]", active.join(", ")));
}

/// A tick period expressed as a `Duration`, for the loop driving `tick`.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub fn default_snapshot_dir(title: &str) -> PathBuf {
    PathBuf::from(title).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_seed_ahead_of_the_one_shot_intervals() {
        let timers = SupervisorTimers::new(1000);
        assert_eq!(timers.next_queue_unconditional, 1000 + QUEUE_INTERVAL_SECONDS);
        assert_eq!(timers.next_node_display, 1000 + NODE_DISPLAY_SECONDS);
    }

    #[test]
    fn request_snapshot_now_sets_the_flag() {
        let mut timers = SupervisorTimers::new(0);
        timers.request_snapshot_now();
        assert!(timers.save_snapshot_now);
    }
}
