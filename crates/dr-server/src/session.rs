//! One TCP connection's life cycle (spec.md §4.2). Every session runs on
//! its own blocking thread (spec.md §5's explicitly permitted alternative
//! to an event loop); no session ever holds the replica lock across a
//! socket read or write.

use std::io::Write;
use std::net::TcpStream;
use std::time::{SystemTime, UNIX_EPOCH};

use dr_types::{ReplicaNumber, ReplicaStatus};
use dr_wire::{
    decode_f32_blob, read_length_prefixed, read_protocol_version, write_length_prefixed, CommandTag, KeyKind,
    ParameterBlock, ReplicaId, MAX_FRAME_PAYLOAD_BYTES,
};

use crate::commit::{check_integrity, decide_move, CopyCommit};
use crate::context::{ServerContext, SimulationStatus};
use crate::error::{ServerError, ServerResult};

/// Named states of one session's progress (spec.md §4.2's FSM: `Greeting`,
/// `AwaitingReplicaID`, `CollectingRound(nni)`, `CommittingRound`,
/// `Dispatching`, `Done`). The control flow below is a straight-line
/// function rather than a dispatch table driven by this enum; the enum
/// exists for logging and the error-site report in `handle_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Greeting,
    AwaitingReplicaId,
    CollectingRound,
    CommittingRound,
    Dispatching,
    Done,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

/// Drives one connection end to end. Every protocol or integrity error is
/// session-local (spec.md §7): the caller logs it and closes the socket —
/// it never tears down the server. On a session-local error that bound a
/// node slot, the slot is released back to the pool here rather than left
/// dangling.
pub fn handle_connection(ctx: &ServerContext, mut stream: TcpStream) -> ServerResult<()> {
    let mut state = SessionState::Greeting;
    let mut bound_node = None;
    let result = run_session(ctx, &mut stream, &mut state, &mut bound_node);
    if let Err(err) = &result {
        ctx.log(&format!("session ended ({state:?}): {err}"));
        if let Some(slot) = bound_node {
            let mut guard = ctx.replica_state.lock().expect("replica lock poisoned");
            let _ = guard.nodes.release(slot);
        }
    }
    result
}

fn run_session(
    ctx: &ServerContext,
    stream: &mut TcpStream,
    state: &mut SessionState,
    bound_node: &mut Option<dr_types::NodeSlot>,
) -> ServerResult<()> {
    read_protocol_version(stream)?;
    let key = KeyKind::read(stream)?;
    let tag = CommandTag::read(stream)?;
    if tag.requires_privileged_key() && !key.is_privileged() {
        return Err(ServerError::Protocol(dr_wire::ProtocolError::KeyMismatch));
    }

    match tag {
        CommandTag::Exit => {
            ctx.set_status(SimulationStatus::Finished);
            ctx.log("Exit command received");
            *state = SessionState::Done;
            Ok(())
        }
        CommandTag::Snapshot => {
            ctx.log("Snapshot command received");
            *state = SessionState::Done;
            Ok(())
        }
        CommandTag::ReplicaId => {
            *state = SessionState::AwaitingReplicaId;
            run_round(ctx, stream, state, bound_node)
        }
        other => Err(ServerError::Protocol(dr_wire::ProtocolError::UnknownTag(other.to_byte()))),
    }
}

/// The replica (and, for a multi-copy run, the sibling replicas sharing
/// one node slot) a session is working against, resolved once at the top
/// of the round.
struct Assignment {
    target: ReplicaNumber,
    copies: Vec<ReplicaNumber>,
    slot: dr_types::NodeSlot,
    is_handshake: bool,
}

fn run_round(
    ctx: &ServerContext,
    stream: &mut TcpStream,
    state: &mut SessionState,
    bound_node: &mut Option<dr_types::NodeSlot>,
) -> ServerResult<()> {
    let id = ReplicaId::read(stream)?;
    let now = now_unix();

    let peer_ip = stream.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();
    let assignment = resolve_assignment(ctx, &id, &peer_ip, now)?;
    *bound_node = Some(assignment.slot);

    // spec.md §4.2: a new-node handshake allocates a slot and returns the
    // first job assignment; no data is committed on this round.
    if assignment.is_handshake {
        *state = SessionState::Dispatching;
        let response = handshake_response(ctx, &assignment)?;
        dispatch_response(stream, &response)?;
        *state = SessionState::Done;
        return Ok(());
    }

    *state = SessionState::CollectingRound;
    let n_copies = assignment.copies.len();
    let mut collected = Vec::with_capacity(n_copies);

    // TCS/JID are sent once per round, ahead of the per-copy frames; their
    // content is logged and not otherwise load-bearing for the commit.
    let tcs = read_f32_frame(stream, CommandTag::TakeTcs)?;
    let jid = read_f32_frame(stream, CommandTag::TakeJid)?;
    ctx.log(&format!("round start: tcs={tcs:?}, jid={jid:?}"));

    for copy_idx in 0..n_copies {
        let energy = read_f32_frame(stream, CommandTag::TakeMoveEnergyData)?;

        let samples = if ctx.config.need_sample_data {
            read_f32_frame(stream, CommandTag::TakeSampleData)?
        } else {
            Vec::new()
        };
        let mut additional = Vec::with_capacity(ctx.config.n_additional_data as usize);
        for _ in 0..ctx.config.n_additional_data {
            additional.push(read_f32_frame(stream, CommandTag::TakeSampleData)?);
        }

        let coordinates = if ctx.config.need_coordinate_data {
            Some(read_f32_frame(stream, CommandTag::TakeCoordinateData)?)
        } else {
            None
        };

        let restart_blob = if copy_idx == 0 {
            read_tagged_blob(stream, CommandTag::TakeRestartFile)?
        } else {
            expect_marker(stream, CommandTag::NextNonInteracting)?;
            Vec::new()
        };

        let target = assignment.copies[copy_idx];
        let sequence_number = {
            let state = ctx.replica_state.lock().expect("replica lock poisoned");
            state.replicas.get(target).map_err(ServerError::from)?.sequence_number.0
        };

        collected.push((
            CopyCommit { replica: target, sequence_number, energy, samples, additional, coordinates },
            restart_blob,
            copy_idx == 0,
        ));
    }

    *state = SessionState::CommittingRound;
    let response = commit_round(ctx, &assignment, collected, now)?;

    *state = SessionState::Dispatching;
    dispatch_response(stream, &response)?;

    *state = SessionState::Done;
    Ok(())
}

/// Resolves which replica (and, for `N_samesystem_uncoupled > 1`, which
/// sibling replicas sharing the same node slot) a connection is working
/// on, per the NNI-copy-as-independent-replica design recorded in
/// DESIGN.md. A `"**"` title is the new-node handshake (spec.md §4.2): an
/// idle replica group is picked and bound to a freshly obtained node
/// slot. Otherwise the wire's `replica_number` selects the group
/// directly; `ALLOW_REQUEUE` promotes a replica that has drifted out of
/// `Running` back to a fresh handshake instead of a protocol error.
fn resolve_assignment(ctx: &ServerContext, id: &ReplicaId, peer_ip: &str, now: u64) -> ServerResult<Assignment> {
    let mut state = ctx.replica_state.lock().expect("replica lock poisoned");
    let k = ctx.config.n_samesystem_uncoupled.max(1) as usize;

    let wants_handshake = id.is_new_node_handshake()
        || (ctx.config.supervisor.allow_requeue && {
            let n = ReplicaNumber(id.replica_number.max(0) as u32);
            state.replicas.get(n).map(|r| r.status != ReplicaStatus::Running).unwrap_or(true)
        });

    if wants_handshake {
        let base = state
            .replicas
            .iter()
            .step_by(k)
            .find(|(_, r)| r.status == ReplicaStatus::Idle)
            .map(|(n, _)| n)
            .ok_or(ServerError::Clock("no idle replica group available".to_string()))?;

        let slot = state
            .nodes
            .find_inactive()
            .or_else(|| state.nodes.drop_oldest(ctx.config.node_time, ctx.config.supervisor.cycle_clients, now))
            .ok_or(ServerError::Clock("no node slot available".to_string()))?;
        state.nodes.obtain(slot, peer_ip, 0, now)?;

        let copies: Vec<ReplicaNumber> =
            (0..k).map(|i| ReplicaNumber(base.0 + i as u32)).filter(|n| n.as_usize() < state.replicas.len()).collect();
        for &n in &copies {
            let replica = state.replicas.get_mut(n)?;
            replica.bind_node(slot, now)?;
        }
        Ok(Assignment { target: base, copies, slot, is_handshake: true })
    } else {
        let base = ReplicaNumber((id.replica_number.max(0) as u32 / k as u32) * k as u32);
        let copies: Vec<ReplicaNumber> =
            (0..k).map(|i| ReplicaNumber(base.0 + i as u32)).filter(|n| n.as_usize() < state.replicas.len()).collect();
        let slot = state
            .replicas
            .get(base)?
            .node_slot
            .ok_or_else(|| ServerError::Protocol(dr_wire::ProtocolError::KeyMismatch))?;
        for &n in &copies {
            let replica = state.replicas.get_mut(n)?;
            replica.last_activity_time = now;
        }
        Ok(Assignment { target: base, copies, slot, is_handshake: false })
    }
}

fn read_f32_frame(stream: &mut TcpStream, expected: CommandTag) -> ServerResult<Vec<f32>> {
    let bytes = read_tagged_blob(stream, expected)?;
    Ok(decode_f32_blob(&bytes)?)
}

/// Every message, in either direction, opens with its own key+tag pair
/// (spec.md §4.1) — the 4-byte protocol version is a once-per-connection
/// preamble, not repeated per frame.
fn read_tagged_blob(stream: &mut TcpStream, expected: CommandTag) -> ServerResult<Vec<u8>> {
    KeyKind::read(stream)?;
    let tag = CommandTag::read(stream)?;
    if tag.to_byte() != expected.to_byte() {
        return Err(ServerError::Protocol(dr_wire::ProtocolError::UnknownTag(tag.to_byte())));
    }
    Ok(read_length_prefixed(stream, MAX_FRAME_PAYLOAD_BYTES)?.to_vec())
}

fn expect_marker(stream: &mut TcpStream, expected: CommandTag) -> ServerResult<()> {
    KeyKind::read(stream)?;
    let tag = CommandTag::read(stream)?;
    if tag.to_byte() != expected.to_byte() {
        return Err(ServerError::Protocol(dr_wire::ProtocolError::UnknownTag(tag.to_byte())));
    }
    Ok(())
}

/// spec.md §4.2: "After the last copy the server transitions to
/// `CommittingRound` and replies with: ReplicaID (assignment of next
/// job), optional TakeRestartFile (compressed), TakeSimulationParameters
/// (always)."
struct RoundResponse {
    next_id: ReplicaId,
    restart_echo: Option<Vec<u8>>,
    parameters: ParameterBlock,
}

fn handshake_response(ctx: &ServerContext, assignment: &Assignment) -> ServerResult<RoundResponse> {
    let state = ctx.replica_state.lock().expect("replica lock poisoned");
    let replica = state.replicas.get(assignment.target)?;
    let next_id = ReplicaId::for_replica(assignment.target.0 as i32, replica.sequence_number.0);
    Ok(RoundResponse {
        next_id,
        restart_echo: None,
        parameters: ParameterBlock {
            force: None,
            wref: vec![replica.w],
            wref2: None,
            wrefchange: None,
            wrefchange2: None,
            samp_n_steps: ctx.config.replicas.first().map(|r| r.sampling_steps).unwrap_or(1),
            rnd_seed: rand::random(),
            message: None,
        },
    })
}

fn commit_round(
    ctx: &ServerContext,
    assignment: &Assignment,
    collected: Vec<(CopyCommit, Vec<u8>, bool)>,
    now: u64,
) -> ServerResult<RoundResponse> {
    let mut rng = rand::thread_rng();
    let mut wref = Vec::with_capacity(collected.len());
    let mut wref2 = Vec::with_capacity(collected.len());
    let mut restart_echo = None;
    let mut next_sequence = 0;

    {
        let mut state = ctx.replica_state.lock().expect("replica lock poisoned");
        let mut vre = ctx.vre.lock().expect("vRE lock poisoned");
        let mut db = ctx.database.lock().expect("database lock poisoned");

        for (copy, restart_blob, is_first_copy) in collected {
            let target = copy.replica;
            {
                let replica = state.replicas.get(target)?;
                check_integrity(&ctx.config, replica, restart_blob.len(), &copy, is_first_copy)?;
            }

            let outcome = decide_move(&ctx.config, &mut state.replicas, &mut vre, target, &copy.energy, &mut rng);

            state.replicas.apply_spatial_mc_move(target, outcome.w_new, outcome.w2_new)?;
            {
                let replica = state.replicas.get_mut(target)?;
                replica.last_activity_time = now;
                if let Some(coords) = copy.coordinates.as_deref() {
                    if !coords.is_empty() {
                        replica.accumulate_coordinates(coords);
                    }
                }
                let system_energy = copy.energy.first().copied().unwrap_or(0.0);
                crate::commit::accumulate_cancellation(
                    replica,
                    f64::from(system_energy),
                    ctx.config.cancellation.map(|c| c.threshold_samples).unwrap_or(u32::MAX),
                );
                if is_first_copy {
                    restart_echo = Some(restart_blob.clone());
                }
                replica.commit_round(copy.sequence_number, restart_blob)?;
                if is_first_copy {
                    next_sequence = replica.sequence_number.0;
                }
            }

            db.append(&dr_storage::ForceRecord {
                replica_number: target.0 as i32,
                sequence_number: copy.sequence_number,
                w: outcome.w_new as f32,
                generic_data: copy.energy.clone(),
            })?;

            let replica = state.replicas.get(target)?;
            wref.push(replica.w);
            wref2.push(replica.w2.unwrap_or(replica.w));
        }
    }

    ctx.log(&format!("committed round for replica group starting at {:?}", assignment.target));

    Ok(RoundResponse {
        next_id: ReplicaId::for_replica(assignment.target.0 as i32, next_sequence),
        restart_echo,
        parameters: ParameterBlock {
            force: None,
            wref,
            wref2: if wref2.iter().any(|&v| v != 0.0) { Some(wref2) } else { None },
            wrefchange: None,
            wrefchange2: None,
            samp_n_steps: ctx.config.replicas.first().map(|r| r.sampling_steps).unwrap_or(1),
            rnd_seed: rand::random(),
            message: None,
        },
    })
}

/// Every response frame is its own key+tag+payload message (spec.md
/// §4.1's "every message ... begins with" applies in both directions);
/// the protocol-version preamble is a once-per-connection handshake the
/// client already sent and is never echoed back here.
fn dispatch_response(stream: &mut TcpStream, response: &RoundResponse) -> ServerResult<()> {
    KeyKind::Regular.write(stream)?;
    CommandTag::ReplicaId.write(stream)?;
    response.next_id.write(stream)?;

    if let Some(blob) = &response.restart_echo {
        KeyKind::Regular.write(stream)?;
        CommandTag::TakeRestartFile.write(stream)?;
        write_length_prefixed(stream, blob)?;
    }

    KeyKind::Regular.write(stream)?;
    CommandTag::TakeSimulationParameters.write(stream)?;
    let ascii = response.parameters.to_ascii();
    write_length_prefixed(stream, ascii.as_bytes())?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_transitions_are_distinct() {
        let states = [
            SessionState::Greeting,
            SessionState::AwaitingReplicaId,
            SessionState::CollectingRound,
            SessionState::CommittingRound,
            SessionState::Dispatching,
            SessionState::Done,
        ];
        for (i, a) in states.iter().enumerate() {
            for (j, b) in states.iter().enumerate() {
                assert_eq!(a == b, i == j);
            }
        }
    }
}
