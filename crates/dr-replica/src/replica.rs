use dr_types::{NodeSlot, ReplicaNumber, ReplicaStatus, SequenceNumber, N_PRESENCE_BITS};

use crate::error::{ReplicaError, ReplicaResult};

const PRESENCE_WORDS: usize = N_PRESENCE_BITS.div_ceil(64);

/// Bitmap of which sequence numbers have been committed for a replica.
/// Invariant 7 (spec.md §8): the population count always equals
/// `sample_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceBitmap {
    words: Box<[u64; PRESENCE_WORDS]>,
}

impl PresenceBitmap {
    pub fn empty() -> Self {
        PresenceBitmap {
            words: Box::new([0u64; PRESENCE_WORDS]),
        }
    }

    pub fn set(&mut self, sequence: u32) {
        let idx = sequence as usize % N_PRESENCE_BITS;
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    pub fn is_set(&self, sequence: u32) -> bool {
        let idx = sequence as usize % N_PRESENCE_BITS;
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    pub fn popcount(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u64; PRESENCE_WORDS];
        for (i, chunk) in bytes.chunks_exact(8).enumerate().take(PRESENCE_WORDS) {
            words[i] = u64::from_ne_bytes(chunk.try_into().expect("chunk is 8 bytes"));
        }
        PresenceBitmap { words: Box::new(words) }
    }
}

/// One discrete reaction-coordinate slot and everything attached to its
/// current round of sampling (spec.md §3's `Replica`).
#[derive(Debug, Clone)]
pub struct Replica {
    pub status: ReplicaStatus,
    pub w: f64,
    pub w_nominal: f64,
    pub w2: Option<f64>,
    pub w2_nominal: Option<f64>,
    pub umbrella_k: Option<f64>,
    /// Last scalar move-energy value this bin reported: the system energy
    /// for a Temperature coordinate, or the umbrella-acted-on position `x`
    /// for an Umbrella coordinate. Discrete/continuous Boltzmann jumping
    /// needs every bin's value at once but each commit only reports its
    /// own bin's, so this is the per-bin memory that fills in the rest.
    pub last_energy: f64,
    pub sequence_number: SequenceNumber,
    pub sample_count: u32,
    pub sampling_runs: u32,
    pub sampling_steps: u32,
    pub restart_blob: Vec<u8>,
    pub cancellation_accumulator: f64,
    pub cancellation_count: u32,
    pub cancellation_energy: f32,
    pub last_activity_time: u64,
    pub start_time_on_current_node: u64,
    pub node_slot: Option<NodeSlot>,
    pub presence: PresenceBitmap,
    pub vre_seed_file: Option<String>,
    /// Running per-atom coordinate sum (`3*N_atoms` entries), accumulated
    /// across committed rounds for post-run averaging. Empty until the
    /// first `TakeCoordinateData` commit fixes `N_atoms` for the run.
    pub coordinate_sum: Vec<f32>,
}

impl Replica {
    pub fn new(w_nominal: f64) -> Self {
        Replica {
            status: ReplicaStatus::Idle,
            w: w_nominal,
            w_nominal,
            w2: None,
            w2_nominal: None,
            umbrella_k: None,
            last_energy: 0.0,
            sequence_number: SequenceNumber(0),
            sample_count: 0,
            sampling_runs: 1,
            sampling_steps: 1,
            restart_blob: Vec::new(),
            cancellation_accumulator: 0.0,
            cancellation_count: 0,
            cancellation_energy: 0.0,
            last_activity_time: 0,
            start_time_on_current_node: 0,
            node_slot: None,
            presence: PresenceBitmap::empty(),
            vre_seed_file: None,
            coordinate_sum: Vec::new(),
        }
    }

    /// Accumulates one round's coordinate commit into the running average
    /// sum, allocating the sum vector to `coordinates.len()` on first use.
    pub fn accumulate_coordinates(&mut self, coordinates: &[f32]) {
        if self.coordinate_sum.is_empty() {
            self.coordinate_sum = vec![0.0; coordinates.len()];
        }
        for (sum, &v) in self.coordinate_sum.iter_mut().zip(coordinates) {
            *sum += v;
        }
    }

    /// Enforces the running/node_slot coupling invariant (spec.md §3).
    fn check_status_invariant(&self) -> ReplicaResult<()> {
        match (self.status, self.node_slot) {
            (ReplicaStatus::Running, None) | (ReplicaStatus::Idle | ReplicaStatus::Suspended, Some(_)) => {
                Err(ReplicaError::StatusNodeMismatch {
                    status: self.status,
                    node_slot: self.node_slot,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn bind_node(&mut self, slot: NodeSlot, now: u64) -> ReplicaResult<()> {
        self.node_slot = Some(slot);
        self.status = ReplicaStatus::Running;
        self.start_time_on_current_node = now;
        self.check_status_invariant()
    }

    pub fn release_node(&mut self) -> ReplicaResult<Option<NodeSlot>> {
        let slot = self.node_slot.take();
        if self.status == ReplicaStatus::Running {
            self.status = ReplicaStatus::Idle;
        }
        self.check_status_invariant()?;
        Ok(slot)
    }

    /// Records one committed round: replaces the restart blob, advances
    /// the sequence number by exactly one, and flips the corresponding
    /// presence bit (invariants 1 and 7).
    pub fn commit_round(&mut self, expected_sequence: u32, restart_blob: Vec<u8>) -> ReplicaResult<()> {
        if expected_sequence != self.sequence_number.0 {
            return Err(ReplicaError::SequenceOutOfOrder {
                replica: ReplicaNumber(0),
                expected: self.sequence_number.0,
                got: expected_sequence,
            });
        }
        self.restart_blob = restart_blob;
        self.presence.set(self.sequence_number.0);
        self.sequence_number = self.sequence_number.next();
        self.sample_count += 1;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.sample_count >= self.sampling_runs
    }
}

/// The full set of replicas in a run, addressed by [`ReplicaNumber`].
/// `w_nominal` is strictly monotone across the table by construction —
/// every move algorithm and the DRPE sum depend on it staying sorted.
#[derive(Debug, Clone)]
pub struct ReplicaTable {
    replicas: Vec<Replica>,
}

impl ReplicaTable {
    pub fn from_nominals(nominals: &[f64]) -> Self {
        debug_assert!(
            nominals.windows(2).all(|w| w[0] < w[1]),
            "nominal coordinates must be strictly increasing"
        );
        ReplicaTable {
            replicas: nominals.iter().map(|&w| Replica::new(w)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn get(&self, n: ReplicaNumber) -> ReplicaResult<&Replica> {
        self.replicas.get(n.as_usize()).ok_or(ReplicaError::UnknownReplica(n))
    }

    pub fn get_mut(&mut self, n: ReplicaNumber) -> ReplicaResult<&mut Replica> {
        self.replicas
            .get_mut(n.as_usize())
            .ok_or(ReplicaError::UnknownReplica(n))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReplicaNumber, &Replica)> {
        self.replicas
            .iter()
            .enumerate()
            .map(|(i, r)| (ReplicaNumber(i as u32), r))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ReplicaNumber, &mut Replica)> {
        self.replicas
            .iter_mut()
            .enumerate()
            .map(|(i, r)| (ReplicaNumber(i as u32), r))
    }

    /// Every replica's current `w`, in table order (already nominal-sorted).
    pub fn current_positions(&self) -> Vec<f64> {
        self.replicas.iter().map(|r| r.w).collect()
    }

    pub fn nominal_positions(&self) -> Vec<f64> {
        self.replicas.iter().map(|r| r.w_nominal).collect()
    }

    /// Sum over all replicas of presence-bit population, used by
    /// invariant 7's aggregate form and by the supervisor's
    /// finish-on-average check.
    pub fn total_sample_count(&self) -> u32 {
        self.replicas.iter().map(|r| r.sample_count).sum()
    }

    pub fn total_sampling_runs(&self) -> u32 {
        self.replicas.iter().map(|r| r.sampling_runs).sum()
    }

    /// Applies an accepted Spatial+MonteCarlo move's new coordinate(s) to
    /// a replica. `w2` is set once per round from whatever value the
    /// last-received NNI copy carried, not once per copy — the original
    /// server set `w2` outside its per-copy loop, which reads like an
    /// off-by-one against every other per-copy field. Per the decision
    /// recorded in DESIGN.md, that behavior is preserved here rather than
    /// silently corrected: callers only ever have one `w2` value to give
    /// this method in the first place, because the session layer collapses
    /// the NNI copies to their last-seen values before committing.
    pub fn apply_spatial_mc_move(&mut self, n: ReplicaNumber, w_new: f64, w2_new: Option<f64>) -> ReplicaResult<()> {
        let replica = self.get_mut(n)?;
        replica.w = w_new;
        if w2_new.is_some() {
            replica.w2 = w2_new;
        }
        Ok(())
    }

    /// Any replica with `status == Running` and a stale `last_activity_time`
    /// is returned for the supervisor's crash sweep (spec.md §4.8).
    pub fn find_timed_out(&self, now: u64, job_timeout: u64) -> Vec<ReplicaNumber> {
        self.replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.status == ReplicaStatus::Running && now.saturating_sub(r.last_activity_time) > job_timeout
            })
            .map(|(i, _)| ReplicaNumber(i as u32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_bitmap_popcount_matches_sample_count() {
        let mut replica = Replica::new(0.0);
        for seq in 0..5 {
            replica.commit_round(seq, vec![1]).unwrap();
        }
        assert_eq!(replica.presence.popcount(), replica.sample_count);
    }

    #[test]
    fn sequence_must_match_expected() {
        let mut replica = Replica::new(0.0);
        let err = replica.commit_round(1, vec![]).unwrap_err();
        assert!(matches!(err, ReplicaError::SequenceOutOfOrder { .. }));
    }

    #[test]
    fn bind_and_release_round_trip() {
        let mut replica = Replica::new(0.0);
        replica.bind_node(NodeSlot(3), 100).unwrap();
        assert_eq!(replica.status, ReplicaStatus::Running);
        let slot = replica.release_node().unwrap();
        assert_eq!(slot, Some(NodeSlot(3)));
        assert_eq!(replica.status, ReplicaStatus::Idle);
    }

    #[test]
    fn spatial_mc_move_updates_w_and_carries_last_w2() {
        let mut table = ReplicaTable::from_nominals(&[0.0, 1.0, 2.0]);
        table.apply_spatial_mc_move(ReplicaNumber(1), 0.6, Some(3.3)).unwrap();
        let replica = table.get(ReplicaNumber(1)).unwrap();
        assert_eq!(replica.w, 0.6);
        assert_eq!(replica.w2, Some(3.3));
    }

    #[test]
    fn accumulate_coordinates_sums_across_rounds() {
        let mut replica = Replica::new(0.0);
        replica.accumulate_coordinates(&[1.0, 2.0, 3.0]);
        replica.accumulate_coordinates(&[1.0, 1.0, 1.0]);
        assert_eq!(replica.coordinate_sum, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn presence_bitmap_round_trips_through_bytes() {
        let mut bitmap = PresenceBitmap::empty();
        bitmap.set(7);
        bitmap.set(70_000);
        let bytes = bitmap.as_bytes();
        let restored = PresenceBitmap::from_bytes(&bytes);
        assert!(restored.is_set(7));
        assert!(restored.is_set(70_000));
        assert_eq!(restored.popcount(), 2);
    }
}
