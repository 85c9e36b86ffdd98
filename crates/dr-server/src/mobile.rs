//! Mobile-server handoff (spec.md §4.9): the coordinator voluntarily
//! relocates to a worker node with more remaining wall-time. Grounded on
//! `DR_server.cpp`'s handoff routine for the target-selection rule and
//! the piggybacked-message mechanism; the wait loop reuses the same
//! crash-detection primitive the supervisor's regular tick uses.

use std::path::Path;
use std::thread;
use std::time::Duration;

use dr_types::NodeSlot;

use crate::context::{ServerContext, SimulationStatus};

/// Picks the most recently started active node whose own uptime exceeds
/// the server's by at least `mobility_required_time_gain`, per spec.md
/// §4.9. Returns `None` if no node qualifies (the handoff is skipped
/// silently; the supervisor simply tries again at the next
/// `MOBILITY_CHECK_SECONDS` tick).
fn choose_successor(ctx: &ServerContext, now: u64) -> Option<NodeSlot> {
    let required_gain = ctx.config.supervisor.mobility_required_time_gain?;
    let server_uptime = ctx.uptime() as i64;
    let state = ctx.replica_state.lock().expect("replica lock poisoned");
    state
        .nodes
        .iter()
        .filter(|(_, n)| n.active && !n.awaiting_dump)
        .filter(|(_, n)| {
            let node_uptime = now.saturating_sub(n.start_time) as i64;
            node_uptime - server_uptime >= required_gain
        })
        .max_by_key(|(_, n)| n.start_time)
        .map(|(slot, _)| slot)
}

/// Saves a snapshot, closes the force database, queues `BECOME_NEW_SERVER`
/// on the chosen successor and `HOLD_AND_CONTACT` on every other active
/// node, then waits (re-running crash detection) until every message has
/// been delivered or its target node has been released by a crash. Does
/// nothing if no successor qualifies.
pub fn attempt_handoff(ctx: &ServerContext, snapshot_dir: &Path, now: u64) {
    let Some(successor) = choose_successor(ctx, now) else {
        return;
    };

    let n_atoms = {
        let state = ctx.replica_state.lock().expect("replica lock poisoned");
        state.replicas.iter().next().map(|(_, r)| (r.coordinate_sum.len() / 3) as u32).unwrap_or(0)
    };
    let snapshot_path = {
        let state = ctx.replica_state.lock().expect("replica lock poisoned");
        let vre = ctx.vre.lock().expect("vRE lock poisoned");
        match dr_storage::save_snapshot(snapshot_dir, &ctx.config.title, now, n_atoms, &state.replicas, vre.as_ref()) {
            Ok(path) => path,
            Err(err) => {
                ctx.log(&format!("mobility handoff aborted: snapshot save failed: {err}"));
                return;
            }
        }
    };
    ctx.log(&format!("mobility handoff: relocating to node {}, snapshot {}", successor.0, snapshot_path.display()));

    // The force database has no explicit close: once `simulation_status`
    // flips to `Finished` below, the session loop stops accepting new
    // rounds and the file is never appended to again.
    let pending: Vec<NodeSlot> = {
        let mut state = ctx.replica_state.lock().expect("replica lock poisoned");
        let targets: Vec<NodeSlot> = state.nodes.iter().filter(|(_, n)| n.active).map(|(slot, _)| slot).collect();
        for &slot in &targets {
            let message = if slot == successor {
                format!("BECOME_NEW_SERVER {}", snapshot_path.display())
            } else {
                format!("HOLD_AND_CONTACT {}", successor.0)
            };
            let _ = state.nodes.queue_message(slot, message);
        }
        targets
    };

    wait_for_delivery(ctx, pending);
    ctx.set_status(SimulationStatus::Finished);
    ctx.log("mobility handoff complete, exiting");
}

/// Waits until every pending node's piggybacked message has been
/// delivered (taken by a session, per `NodeTable::take_message`) or the
/// node has been released by crash detection, re-checking once a second.
fn wait_for_delivery(ctx: &ServerContext, mut pending: Vec<NodeSlot>) {
    while !pending.is_empty() {
        thread::sleep(Duration::from_secs(1));
        let mut state = ctx.replica_state.lock().expect("replica lock poisoned");
        pending.retain(|&slot| match state.nodes.get(slot) {
            Ok(node) => node.active && node.pending_message.is_some(),
            Err(_) => false,
        });
        let now = ctx.now();
        let timed_out = state.replicas.find_timed_out(now, ctx.config.job_timeout);
        for replica_number in timed_out {
            if let Ok(replica) = state.replicas.get_mut(replica_number) {
                if let Ok(Some(slot)) = replica.release_node() {
                    let _ = state.nodes.release(slot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_config::{DrpeScalars, ScriptConfig, SupervisorPolicy};
    use dr_replica::{NodeTable, ReplicaTable};
    use dr_storage::ForceDatabase;
    use dr_types::{CoordinateKind, MoveAlgorithm};
    use tempfile::tempdir;

    fn config_with_mobility(gain: i64) -> ScriptConfig {
        ScriptConfig {
            title: "mobtest".to_string(),
            coordinate: CoordinateKind::Spatial,
            move_algorithm: MoveAlgorithm::NoMoves,
            port: 7000,
            temperature: None,
            replica_step_fraction: 0.1,
            potential_scalar: DrpeScalars { alpha: 0.0, beta: 0.0 },
            cancellation: None,
            node_time: 60,
            replica_change_time: 60,
            snapshot_save_interval: 60,
            job_timeout: 120,
            running_fence: dr_config::RunningFence { min: 0, max: 2 },
            need_sample_data: false,
            need_coordinate_data: false,
            submit_jobs: false,
            circular: None,
            n_additional_data: 0,
            n_samesystem_uncoupled: 1,
            n_samples_per_run: 0,
            n_ligands: 1,
            vre: dr_config::VreConfig::default(),
            supervisor: SupervisorPolicy { mobility_required_time_gain: Some(gain), ..SupervisorPolicy::default() },
            replicas: vec![dr_config::ReplicaInit { starting_nominal: 1.0, ..dr_config::ReplicaInit::default() }],
        }
    }

    fn test_context(gain: i64) -> (ServerContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = config_with_mobility(gain);
        let replicas = ReplicaTable::from_nominals(&[1.0]);
        let nodes = NodeTable::new(2);
        let db = ForceDatabase::open(
            dir.path().join("mobtest.forcedatabase"),
            dr_storage::ForceDatabaseHeader {
                n_records: 0,
                n_ligands: 1,
                n_forces_per_record: 0,
                n_energies_per_record: 0,
                n_additional_columns_per_record: 0,
            },
        )
        .unwrap();
        let log = crate::log::LogSink::open(dir.path(), "mobtest").unwrap();
        let ctx = ServerContext::new(config, replicas, nodes, db, None, log, 0);
        (ctx, dir)
    }

    #[test]
    fn no_successor_when_no_node_clears_the_gain_threshold() {
        let (ctx, _dir) = test_context(3600);
        assert!(choose_successor(&ctx, 100).is_none());
    }

    #[test]
    fn successor_found_once_gain_threshold_is_met() {
        let (ctx, _dir) = test_context(10);
        {
            let mut state = ctx.replica_state.lock().unwrap();
            state.nodes.obtain(NodeSlot(0), "10.0.0.1", 0, 0).unwrap();
        }
        assert_eq!(choose_successor(&ctx, 100), Some(NodeSlot(0)));
    }
}
