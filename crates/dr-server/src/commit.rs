//! Commit-time integrity checks and the move-decision dispatch (spec.md
//! §4.2, §4.4). Everything here runs under the replica lock; none of it
//! touches a socket.

use rand::Rng;

use dr_config::ScriptConfig;
use dr_replica::{
    accept_metropolis, bin_of, discrete_boltzmann_distribution, mc_proposal, sample_discrete_boltzmann,
    solve_position_in_segment, spatial_delta_e, subdivide_segment, temperature_delta_e, umbrella_delta_e,
    within_running_fence, Candidate, DrpeDelta, Replica, ReplicaTable, VreStore,
};
use dr_types::{expected_energy_len, CoordinateKind, MoveAlgorithm, ReplicaNumber};

use crate::error::IntegrityError;

/// Everything a single NNI copy's round commit carries off the wire,
/// already decoded by the session layer.
pub struct CopyCommit {
    pub replica: ReplicaNumber,
    pub sequence_number: u32,
    pub energy: Vec<f32>,
    pub samples: Vec<f32>,
    pub additional: Vec<Vec<f32>>,
    pub coordinates: Option<Vec<f32>>,
}

/// Checks the six conditions spec.md §4.2 lists; all must pass or the
/// whole round is rejected.
pub fn check_integrity(
    config: &ScriptConfig,
    replica: &Replica,
    restart_size: usize,
    copy: &CopyCommit,
    is_first_copy: bool,
) -> Result<(), IntegrityError> {
    if is_first_copy && restart_size == 0 {
        return Err(IntegrityError::EmptyRestartBlob);
    }
    let expected_energy = expected_energy_len(config.coordinate, config.move_algorithm, config.n_replicas());
    if copy.energy.len() as u32 != expected_energy {
        return Err(IntegrityError::EnergyLengthMismatch {
            expected: expected_energy,
            got: copy.energy.len() as u32,
        });
    }
    if config.need_sample_data {
        let expected_samples = config.n_samples_per_run * config.n_ligands;
        if copy.samples.len() as u32 != expected_samples {
            return Err(IntegrityError::SampleSizeMismatch {
                expected: expected_samples,
                got: copy.samples.len() as u32,
            });
        }
        for (i, blob) in copy.additional.iter().enumerate() {
            if blob.len() as u32 != config.n_samples_per_run {
                return Err(IntegrityError::AdditionalDataSizeMismatch {
                    index: i as u32,
                    expected: config.n_samples_per_run,
                    got: blob.len() as u32,
                });
            }
        }
    }
    if config.need_coordinate_data {
        if let Some(coords) = &copy.coordinates {
            // N_atoms is learned from the first commit; any positive
            // multiple of 3 is accepted here, the exact count is fixed by
            // `Replica::accumulate_coordinates`'s lazy sizing.
            if coords.len() % 3 != 0 {
                return Err(IntegrityError::CoordinateSizeMismatch {
                    expected: (coords.len() / 3 * 3) as u32,
                    got: coords.len() as u32,
                });
            }
        }
    }
    if replica.sequence_number.0 != copy.sequence_number {
        return Err(IntegrityError::SequenceMismatch {
            expected: replica.sequence_number.0,
            got: copy.sequence_number,
        });
    }
    Ok(())
}

/// The per-bin cancellation correction is "active" once every replica has
/// accumulated at least `threshold` committed samples into its bin
/// accumulator (spec.md §3's `CANCELLATION` option, GLOSSARY's
/// "Cancellation energy"). Before that point every bin's contribution is
/// zero and the ordinary `POTENTIALSCALAR` weights apply.
pub fn cancellation_active(replicas: &ReplicaTable, threshold: u32) -> bool {
    replicas.iter().all(|(_, r)| r.cancellation_count >= threshold)
}

fn cancellation_value(replica: &Replica, active: bool) -> f64 {
    if active && replica.cancellation_count > 0 {
        replica.cancellation_accumulator / f64::from(replica.cancellation_count)
    } else {
        0.0
    }
}

/// Folds one committed round's system-energy contribution into its
/// replica's cancellation accumulator, freezing once `threshold` is
/// reached (spec.md §3).
pub fn accumulate_cancellation(replica: &mut Replica, system_energy: f64, threshold: u32) {
    if replica.cancellation_count < threshold {
        replica.cancellation_accumulator += system_energy;
        replica.cancellation_count += 1;
    }
}

fn drpe_scalars(config: &ScriptConfig, active: bool) -> (f64, f64) {
    match (&config.cancellation, active) {
        (Some(c), true) => (c.after_threshold.alpha, c.after_threshold.beta),
        _ => (config.potential_scalar.alpha, config.potential_scalar.beta),
    }
}

/// The outcome of a move decision: the (possibly unchanged) new position,
/// whether it was accepted/productive, and the bin it landed in.
pub struct MoveOutcome {
    pub w_new: f64,
    pub w2_new: Option<f64>,
    pub accepted: bool,
    pub bin: usize,
}

/// Runs one replica's move decision in place against the current table
/// snapshot, per spec.md §4.4. `wire_w_new` carries the client-proposed
/// position for Spatial+MC; `energy` is the wire move-energy blob,
/// meaning depends on `(coordinate, move_algorithm)` per
/// `expected_energy_len`. For an Umbrella coordinate, `energy[0]` is the
/// position of what the umbrella acts on (`x`), not an energy, matching
/// the original server's move-data table for every Umbrella move kind.
pub fn decide_move(
    config: &ScriptConfig,
    replicas: &mut ReplicaTable,
    vre: &mut Option<VreStore>,
    target: ReplicaNumber,
    energy: &[f32],
    rng: &mut impl Rng,
) -> MoveOutcome {
    let nominals = replicas.nominal_positions();
    let active = cancellation_active(replicas, config.cancellation.map(|c| c.threshold_samples).unwrap_or(u32::MAX));
    let (alpha, beta) = drpe_scalars(config, active);
    let beta_kt = config.beta_or_unit();

    let idx = target.as_usize();
    let w_old = replicas.get(target).expect("target replica exists").w;

    match config.move_algorithm {
        MoveAlgorithm::NoMoves => MoveOutcome {
            w_new: w_old,
            w2_new: None,
            accepted: true,
            bin: bin_of(&nominals, w_old),
        },
        MoveAlgorithm::MonteCarlo | MoveAlgorithm::VirtualReplicaExchange => {
            decide_metropolis(config, replicas, vre, target, &nominals, energy, alpha, beta, beta_kt, rng)
        }
        MoveAlgorithm::Boltzmann => decide_discrete_boltzmann(config, replicas, &nominals, energy, beta_kt, rng, idx),
        MoveAlgorithm::Continuous => decide_continuous_boltzmann(config, replicas, &nominals, energy, beta_kt, rng, idx),
    }
}

#[allow(clippy::too_many_arguments)]
fn decide_metropolis(
    config: &ScriptConfig,
    replicas: &mut ReplicaTable,
    vre: &mut Option<VreStore>,
    target: ReplicaNumber,
    nominals: &[f64],
    energy: &[f32],
    alpha: f64,
    beta: f64,
    beta_kt: f64,
    rng: &mut impl Rng,
) -> MoveOutcome {
    let is_vre = config.move_algorithm == MoveAlgorithm::VirtualReplicaExchange;
    let w_old = replicas.get(target).unwrap().w;
    let nominal_gap = local_nominal_gap(nominals, target.as_usize());

    let (w_new, w2_new) = match config.coordinate {
        CoordinateKind::Spatial => (f64::from(energy[0]), None),
        _ => (mc_proposal(w_old, nominal_gap, config.replica_step_fraction, rng), None),
    };

    if is_vre {
        let seq = replicas.get(target).unwrap().sequence_number.0;
        if seq < config.vre.initial_no_moves {
            return MoveOutcome {
                w_new: w_old,
                w2_new: None,
                accepted: false,
                bin: bin_of(nominals, w_old),
            };
        }
    }

    if !within_running_fence(nominals, w_new, config.running_fence.min as usize, config.running_fence.max as usize) {
        return MoveOutcome {
            w_new: w_old,
            w2_new: None,
            accepted: false,
            bin: bin_of(nominals, w_old),
        };
    }

    let old_bin = bin_of(nominals, w_old);
    let new_bin = bin_of(nominals, w_new);
    let threshold = config.cancellation.map(|c| c.threshold_samples).unwrap_or(u32::MAX);
    let active = cancellation_active(replicas, threshold);
    let canc_old = cancellation_value(replicas.get(target).unwrap(), active);
    let canc_new = {
        let mut v = canc_old;
        if new_bin != old_bin {
            if let Ok(other) = replicas.get(ReplicaNumber(new_bin as u32)) {
                v = cancellation_value(other, active);
            }
        }
        v
    };

    let positions_before = replicas.current_positions();
    let mut positions_after = positions_before.clone();
    positions_after[target.as_usize()] = w_new;
    let drpe_delta = DrpeDelta::compute(alpha, beta, nominals, &positions_before, &positions_after).delta();

    let requester = i64::from(target.0);
    let mut virtual_reverse = 0.0;
    if is_vre {
        if let Some(store) = vre {
            let seq = replicas.get(target).unwrap().sequence_number.0;
            if seq >= config.vre.initial_no_save {
                let e_sample = energy.first().copied().unwrap_or(0.0);
                store.push(old_bin, requester, e_sample);
            }
            match store.pop(new_bin, requester, rng) {
                Some(popped) => virtual_reverse = f64::from(popped.value),
                None => {
                    return MoveOutcome {
                        w_new: w_old,
                        w2_new: None,
                        accepted: false,
                        bin: old_bin,
                    };
                }
            }
        }
    }

    let delta_e = match config.coordinate {
        CoordinateKind::Spatial => {
            let system_delta_e = f64::from(energy.get(1).copied().unwrap_or(0.0));
            spatial_delta_e(beta_kt, system_delta_e, canc_new - canc_old, drpe_delta)
        }
        CoordinateKind::Temperature => {
            let e_system = f64::from(energy[0]);
            temperature_delta_e(w_old, w_new, e_system, virtual_reverse, canc_old, canc_new, drpe_delta)
        }
        CoordinateKind::Umbrella => {
            let x = f64::from(energy[0]);
            let replica = replicas.get(target).unwrap();
            let k_old = replica.umbrella_k.unwrap_or(0.0);
            let k_new = k_old;
            let circular = config.circular.map(|c| c.equality_distance());
            umbrella_delta_e(beta_kt, k_old, k_new, x, w_old, w_new, canc_new - canc_old, drpe_delta, circular)
        }
    };

    let accepted = accept_metropolis(delta_e, rng);
    if accepted {
        MoveOutcome {
            w_new,
            w2_new,
            accepted: true,
            bin: new_bin,
        }
    } else {
        MoveOutcome {
            w_new: w_old,
            w2_new: None,
            accepted: false,
            bin: old_bin,
        }
    }
}

/// The dimensionless Boltzmann-weight energy a bin contributes, given the
/// scalar its last commit reported. Spatial+Boltzmann reports one true
/// energy per bin directly on the wire, already in the right units
/// (`beta_kt` is always 1.0 there, since Spatial never validates a
/// temperature). Temperature reports the bin's system energy, scaled by
/// `beta_kt`. Umbrella reports `x`, the position of what the umbrella
/// acts on, and the weight is that bin's own harmonic bias
/// `beta_kt * 1/2 k (x - w_nominal)^2`.
fn candidate_energy(config: &ScriptConfig, replica: &Replica, beta_kt: f64, raw: f64) -> f64 {
    match config.coordinate {
        CoordinateKind::Umbrella => {
            let k = replica.umbrella_k.unwrap_or(0.0);
            beta_kt * 0.5 * k * (raw - replica.w_nominal).powi(2)
        }
        _ => beta_kt * raw,
    }
}

/// Discrete Boltzmann jumping only ever reports a full per-bin energy
/// array for Spatial; Temperature/Umbrella report one scalar for the
/// committing replica's own bin (`expected_energy_len`), so this updates
/// that bin's remembered value before building the full candidate set
/// from every bin's last known scalar.
fn decide_discrete_boltzmann(
    config: &ScriptConfig,
    replicas: &mut ReplicaTable,
    nominals: &[f64],
    energy: &[f32],
    beta_kt: f64,
    rng: &mut impl Rng,
    current_idx: usize,
) -> MoveOutcome {
    let threshold = config.cancellation.map(|c| c.threshold_samples).unwrap_or(u32::MAX);
    let active = cancellation_active(replicas, threshold);

    if config.coordinate != CoordinateKind::Spatial {
        if let Some(&e) = energy.first() {
            replicas.get_mut(ReplicaNumber(current_idx as u32)).unwrap().last_energy = f64::from(e);
        }
    }

    let candidates: Vec<Candidate> = (0..replicas.len())
        .map(|bin| {
            let replica = replicas.get(ReplicaNumber(bin as u32)).unwrap();
            let raw = if config.coordinate == CoordinateKind::Spatial {
                f64::from(energy[bin])
            } else {
                replica.last_energy
            };
            Candidate {
                bin,
                energy: candidate_energy(config, replica, beta_kt, raw) + cancellation_value(replica, active),
            }
        })
        .collect();
    let distribution = discrete_boltzmann_distribution(
        &candidates,
        config.running_fence.min as usize,
        config.running_fence.max as usize,
    );
    let chosen = sample_discrete_boltzmann(&distribution, rng).unwrap_or(current_idx);
    MoveOutcome {
        w_new: nominals[chosen],
        w2_new: None,
        accepted: true,
        bin: chosen,
    }
}

/// Continuous Boltzmann jumping is Temperature/Umbrella only
/// (`CoordinateKind::accepts` rejects Spatial+Continuous), so `energy`
/// always carries the committing replica's own single scalar; every
/// other bin's contribution comes from its own last reported scalar.
fn decide_continuous_boltzmann(
    config: &ScriptConfig,
    replicas: &mut ReplicaTable,
    nominals: &[f64],
    energy: &[f32],
    beta_kt: f64,
    rng: &mut impl Rng,
    current_idx: usize,
) -> MoveOutcome {
    let threshold = config.cancellation.map(|c| c.threshold_samples).unwrap_or(u32::MAX);
    let active = cancellation_active(replicas, threshold);

    if let Some(&e) = energy.first() {
        replicas.get_mut(ReplicaNumber(current_idx as u32)).unwrap().last_energy = f64::from(e);
    }

    let bin_energy = |bin: usize| {
        let replica = replicas.get(ReplicaNumber(bin as u32)).unwrap();
        candidate_energy(config, replica, beta_kt, replica.last_energy) + cancellation_value(replica, active)
    };

    let mut all_points = Vec::new();
    for i in 0..nominals.len().saturating_sub(1) {
        let e_lo = bin_energy(i);
        let e_hi = bin_energy(i + 1);
        let mut segment = subdivide_segment(nominals[i], nominals[i + 1], e_lo, e_hi);
        if i > 0 {
            // the first point of this segment duplicates the last point of
            // the previous one (both at the shared nominal boundary).
            segment.remove(0);
        }
        all_points.extend(segment);
    }
    if all_points.len() < 2 {
        return MoveOutcome {
            w_new: nominals[current_idx],
            w2_new: None,
            accepted: true,
            bin: current_idx,
        };
    }
    let min_energy = all_points.iter().map(|p| p.energy).fold(f64::INFINITY, f64::min);
    let density: Vec<f64> = all_points.iter().map(|p| (-(p.energy - min_energy)).exp()).collect();
    let areas: Vec<f64> = (0..all_points.len() - 1)
        .map(|i| {
            let dw = all_points[i + 1].w - all_points[i].w;
            0.5 * (density[i] + density[i + 1]) * dw
        })
        .collect();
    let total: f64 = areas.iter().sum::<f64>().max(1e-300);
    let draw = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut segment_idx = areas.len() - 1;
    for (i, &area) in areas.iter().enumerate() {
        if draw <= cumulative + area {
            segment_idx = i;
            break;
        }
        cumulative += area;
    }
    let target_area = draw - cumulative;
    let p0 = all_points[segment_idx];
    let p1 = all_points[segment_idx + 1];
    let w_new = solve_position_in_segment(p0.w, p1.w, density[segment_idx], density[segment_idx + 1], target_area);
    MoveOutcome {
        w_new,
        w2_new: None,
        accepted: true,
        bin: bin_of(nominals, w_new),
    }
}

fn local_nominal_gap(nominals: &[f64], idx: usize) -> f64 {
    if idx + 1 < nominals.len() {
        nominals[idx + 1] - nominals[idx]
    } else if idx > 0 {
        nominals[idx] - nominals[idx - 1]
    } else {
        1.0
    }
}

/// Helper trait-free convenience: `β = 1/(k_B T)` for Temperature
/// coordinates, `1.0` (energies already in the right units) otherwise —
/// `ScriptConfig::beta()` panics on a missing temperature, which a
/// Spatial or Umbrella run never validates.
pub trait BetaOrUnit {
    fn beta_or_unit(&self) -> f64;
}

impl BetaOrUnit for ScriptConfig {
    fn beta_or_unit(&self) -> f64 {
        if self.temperature.is_some() {
            self.beta()
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_config::{CancellationConfig, DrpeScalars, RunningFence, ScriptConfig, SupervisorPolicy, VreConfig};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn spatial_mc_config() -> ScriptConfig {
        ScriptConfig {
            title: "t".into(),
            coordinate: CoordinateKind::Spatial,
            move_algorithm: MoveAlgorithm::MonteCarlo,
            port: 7000,
            temperature: None,
            replica_step_fraction: 0.5,
            potential_scalar: DrpeScalars { alpha: 0.0, beta: 0.0 },
            cancellation: None,
            node_time: 60,
            replica_change_time: 60,
            snapshot_save_interval: 60,
            job_timeout: 60,
            running_fence: RunningFence { min: 0, max: 2 },
            need_sample_data: false,
            need_coordinate_data: false,
            submit_jobs: false,
            circular: None,
            n_additional_data: 0,
            n_samesystem_uncoupled: 1,
            n_samples_per_run: 0,
            n_ligands: 1,
            vre: VreConfig::default(),
            supervisor: SupervisorPolicy::default(),
            replicas: Vec::new(),
        }
    }

    #[test]
    fn spatial_mc_with_zero_scalars_always_accepts() {
        let config = spatial_mc_config();
        let mut replicas = ReplicaTable::from_nominals(&[0.0, 1.0, 2.0]);
        let mut vre = None;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let outcome = decide_move(&config, &mut replicas, &mut vre, ReplicaNumber(1), &[1.4, 3.0], &mut rng);
        assert!(outcome.accepted);
        assert_eq!(outcome.w_new, 1.4);
    }

    #[test]
    fn no_moves_never_changes_position() {
        let mut config = spatial_mc_config();
        config.move_algorithm = MoveAlgorithm::NoMoves;
        let mut replicas = ReplicaTable::from_nominals(&[0.0, 1.0, 2.0]);
        let mut vre = None;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let outcome = decide_move(&config, &mut replicas, &mut vre, ReplicaNumber(0), &[], &mut rng);
        assert_eq!(outcome.w_new, 0.0);
    }

    #[test]
    fn discrete_boltzmann_on_temperature_uses_every_bins_remembered_energy() {
        let mut config = spatial_mc_config();
        config.coordinate = CoordinateKind::Temperature;
        config.move_algorithm = MoveAlgorithm::Boltzmann;
        config.temperature = Some(300.0);
        let mut replicas = ReplicaTable::from_nominals(&[0.0, 1.0, 2.0]);
        replicas.get_mut(ReplicaNumber(0)).unwrap().last_energy = 100.0;
        replicas.get_mut(ReplicaNumber(2)).unwrap().last_energy = 100.0;
        let mut vre = None;
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        // Replica 1's own commit reports the lowest energy; its bin should
        // now dominate the distribution even though the call only carries
        // one scalar, not a full per-bin array.
        let outcome = decide_move(&config, &mut replicas, &mut vre, ReplicaNumber(1), &[0.0], &mut rng);
        assert_eq!(outcome.bin, 1);
        assert_eq!(replicas.get(ReplicaNumber(1)).unwrap().last_energy, 0.0);
    }

    #[test]
    fn umbrella_metropolis_reads_x_from_energy_not_samples() {
        // A zero step fraction collapses the Monte-Carlo proposal to
        // `w_new == w_old`, so the whole move is a no-op regardless of
        // `x` — this only confirms `energy[0]` (and not an empty
        // `samples` channel) is what `decide_move` reads for the
        // Umbrella reaction-coordinate observation, without panicking on
        // a single-element energy slice the way indexing `energy[1]`
        // would have.
        let mut config = spatial_mc_config();
        config.coordinate = CoordinateKind::Umbrella;
        config.move_algorithm = MoveAlgorithm::MonteCarlo;
        config.temperature = Some(300.0);
        config.replica_step_fraction = 0.0;
        let mut replicas = ReplicaTable::from_nominals(&[0.0, 1.0, 2.0]);
        replicas.get_mut(ReplicaNumber(1)).unwrap().umbrella_k = Some(2.5);
        let mut vre = None;
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let outcome = decide_move(&config, &mut replicas, &mut vre, ReplicaNumber(1), &[5.0], &mut rng);
        assert_eq!(outcome.w_new, 1.0);
        assert!(outcome.accepted);
    }

    #[test]
    fn cancellation_is_inactive_until_every_bin_reaches_threshold() {
        let replicas = ReplicaTable::from_nominals(&[0.0, 1.0]);
        assert!(!cancellation_active(&replicas, 5));
    }

    #[test]
    fn cancellation_accumulator_freezes_at_threshold() {
        let mut replica = Replica::new(0.0);
        for _ in 0..10 {
            accumulate_cancellation(&mut replica, 1.0, 3);
        }
        assert_eq!(replica.cancellation_count, 3);
        assert_eq!(replica.cancellation_accumulator, 3.0);
    }
}
