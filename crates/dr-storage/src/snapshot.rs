//! Atomic snapshot save/load (spec.md §4.6): a self-describing binary
//! checkpoint of every replica and, for vRE runs, the full vRE store.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use dr_replica::{PresenceBitmap, Replica, ReplicaTable, VreStore};
use dr_types::{NodeSlot, ReplicaStatus, SNAPSHOT_VERSION, SNAPSHOT_VERSION_LEGACY};

use crate::error::{StorageError, StorageResult};

/// `NaN` marks an absent optional scalar on disk — the same convention
/// spec.md §6 uses for the `TakeSimulationParameters` text block
/// (`wref2 ... (omit if NaN)`).
fn write_optional_f64<W: Write>(w: &mut W, value: Option<f64>) -> std::io::Result<()> {
    w.write_all(&value.unwrap_or(f64::NAN).to_ne_bytes())
}

fn read_optional_f64<R: Read>(r: &mut R) -> std::io::Result<Option<f64>> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    let v = f64::from_ne_bytes(buf);
    Ok(if v.is_nan() { None } else { Some(v) })
}

fn write_replica_image<W: Write>(w: &mut W, replica: &Replica) -> std::io::Result<()> {
    w.write_all(&[replica.status.code() as u8])?;
    w.write_all(&replica.w.to_ne_bytes())?;
    w.write_all(&replica.w_nominal.to_ne_bytes())?;
    write_optional_f64(w, replica.w2)?;
    write_optional_f64(w, replica.w2_nominal)?;
    write_optional_f64(w, replica.umbrella_k)?;
    w.write_all(&replica.sequence_number.0.to_ne_bytes())?;
    w.write_all(&replica.sample_count.to_ne_bytes())?;
    w.write_all(&replica.sampling_runs.to_ne_bytes())?;
    w.write_all(&replica.sampling_steps.to_ne_bytes())?;
    w.write_all(&replica.cancellation_accumulator.to_ne_bytes())?;
    w.write_all(&replica.cancellation_count.to_ne_bytes())?;
    w.write_all(&replica.cancellation_energy.to_ne_bytes())?;
    w.write_all(&replica.last_activity_time.to_ne_bytes())?;
    w.write_all(&replica.start_time_on_current_node.to_ne_bytes())?;
    let node_slot: i64 = replica.node_slot.map(|s| s.0 as i64).unwrap_or(-1);
    w.write_all(&node_slot.to_ne_bytes())?;
    w.write_all(&(replica.restart_blob.len() as u32).to_ne_bytes())?;
    match &replica.vre_seed_file {
        Some(path) => {
            w.write_all(&(path.len() as u32).to_ne_bytes())?;
            w.write_all(path.as_bytes())?;
        }
        None => w.write_all(&0u32.to_ne_bytes())?,
    }
    Ok(())
}

struct ReplicaImageHeader {
    status: ReplicaStatus,
    w: f64,
    w_nominal: f64,
    w2: Option<f64>,
    w2_nominal: Option<f64>,
    umbrella_k: Option<f64>,
    sequence_number: u32,
    sample_count: u32,
    sampling_runs: u32,
    sampling_steps: u32,
    cancellation_accumulator: f64,
    cancellation_count: u32,
    cancellation_energy: f32,
    last_activity_time: u64,
    start_time_on_current_node: u64,
    node_slot: Option<NodeSlot>,
    restart_size: u32,
    vre_seed_file: Option<String>,
}

fn read_replica_image<R: Read>(r: &mut R) -> std::io::Result<ReplicaImageHeader> {
    let mut status_byte = [0u8; 1];
    r.read_exact(&mut status_byte)?;
    let status = ReplicaStatus::from_code(status_byte[0] as char)
        .unwrap_or(ReplicaStatus::Idle);

    let mut f64_buf = [0u8; 8];
    r.read_exact(&mut f64_buf)?;
    let w = f64::from_ne_bytes(f64_buf);
    r.read_exact(&mut f64_buf)?;
    let w_nominal = f64::from_ne_bytes(f64_buf);

    let w2 = read_optional_f64(r)?;
    let w2_nominal = read_optional_f64(r)?;
    let umbrella_k = read_optional_f64(r)?;

    let mut u32_buf = [0u8; 4];
    r.read_exact(&mut u32_buf)?;
    let sequence_number = u32::from_ne_bytes(u32_buf);
    r.read_exact(&mut u32_buf)?;
    let sample_count = u32::from_ne_bytes(u32_buf);
    r.read_exact(&mut u32_buf)?;
    let sampling_runs = u32::from_ne_bytes(u32_buf);
    r.read_exact(&mut u32_buf)?;
    let sampling_steps = u32::from_ne_bytes(u32_buf);

    r.read_exact(&mut f64_buf)?;
    let cancellation_accumulator = f64::from_ne_bytes(f64_buf);
    r.read_exact(&mut u32_buf)?;
    let cancellation_count = u32::from_ne_bytes(u32_buf);
    let mut f32_buf = [0u8; 4];
    r.read_exact(&mut f32_buf)?;
    let cancellation_energy = f32::from_ne_bytes(f32_buf);

    let mut u64_buf = [0u8; 8];
    r.read_exact(&mut u64_buf)?;
    let last_activity_time = u64::from_ne_bytes(u64_buf);
    r.read_exact(&mut u64_buf)?;
    let start_time_on_current_node = u64::from_ne_bytes(u64_buf);

    let mut i64_buf = [0u8; 8];
    r.read_exact(&mut i64_buf)?;
    let node_slot_raw = i64::from_ne_bytes(i64_buf);
    let node_slot = if node_slot_raw >= 0 {
        Some(NodeSlot(node_slot_raw as usize))
    } else {
        None
    };

    r.read_exact(&mut u32_buf)?;
    let restart_size = u32::from_ne_bytes(u32_buf);

    r.read_exact(&mut u32_buf)?;
    let seed_len = u32::from_ne_bytes(u32_buf);
    let vre_seed_file = if seed_len > 0 {
        let mut buf = vec![0u8; seed_len as usize];
        r.read_exact(&mut buf)?;
        Some(String::from_utf8_lossy(&buf).into_owned())
    } else {
        None
    };

    Ok(ReplicaImageHeader {
        status,
        w,
        w_nominal,
        w2,
        w2_nominal,
        umbrella_k,
        sequence_number,
        sample_count,
        sampling_runs,
        sampling_steps,
        cancellation_accumulator,
        cancellation_count,
        cancellation_energy,
        last_activity_time,
        start_time_on_current_node,
        node_slot,
        restart_size,
        vre_seed_file,
    })
}

/// Overrides applied while loading a snapshot (spec.md §4.6): the
/// script's own `sampling_runs` wins over whatever the snapshot recorded,
/// every replica's status is coerced back to `Idle`, and an optional list
/// of starting-nominal indices overrides the restored `w` values.
pub struct LoadOverrides<'a> {
    pub sampling_runs: &'a [u32],
    pub starting_nominals: Option<&'a [f64]>,
}

/// Writes `{title}.{unix_time}.snapshot` atomically: the body is built in
/// a temporary file in the same directory, then renamed into place so a
/// reader never observes a partially written snapshot.
pub fn save_snapshot(
    dir: &Path,
    title: &str,
    unix_time: u64,
    n_atoms: u32,
    replicas: &ReplicaTable,
    vre: Option<&VreStore>,
) -> StorageResult<PathBuf> {
    let final_path = dir.join(format!("{title}.{unix_time}.snapshot"));
    let tmp_path = dir.join(format!("{title}.{unix_time}.snapshot.tmp"));
    {
        let file = File::create(&tmp_path)?;
        let mut w = BufWriter::new(file);

        w.write_all(&SNAPSHOT_VERSION.to_ne_bytes())?;
        w.write_all(&(replicas.len() as u32).to_ne_bytes())?;
        w.write_all(&n_atoms.to_ne_bytes())?;

        for (_, replica) in replicas.iter() {
            write_replica_image(&mut w, replica)?;
        }
        for (_, replica) in replicas.iter() {
            w.write_all(&replica.restart_blob)?;
            let mut coords = replica.coordinate_sum.clone();
            coords.resize((n_atoms as usize) * 3, 0.0);
            for v in &coords {
                w.write_all(&v.to_ne_bytes())?;
            }
            w.write_all(&replica.presence.as_bytes())?;
        }

        if let Some(vre) = vre {
            for i in 0..vre.n_positions() {
                write_primary_bag(&mut w, vre, i)?;
            }
            for i in 0..vre.n_positions() {
                write_secondary_fifo(&mut w, vre, i)?;
            }
        }
        w.flush()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    tracing::info!(path = %final_path.display(), n_replicas = replicas.len(), "snapshot written");
    Ok(final_path)
}

fn write_primary_bag<W: Write>(w: &mut W, vre: &VreStore, nominal: usize) -> std::io::Result<()> {
    let items = vre.primary_items(nominal);
    w.write_all(&(items.len() as i64).to_ne_bytes())?;
    w.write_all(&(items.len() as i64 - 1).to_ne_bytes())?;
    for (value, source) in items {
        w.write_all(&value.to_ne_bytes())?;
        w.write_all(&(source as i32).to_ne_bytes())?;
    }
    Ok(())
}

fn write_secondary_fifo<W: Write>(w: &mut W, vre: &VreStore, nominal: usize) -> std::io::Result<()> {
    let values = vre.secondary_items(nominal);
    w.write_all(&(values.len() as i64).to_ne_bytes())?;
    w.write_all(&(values.len() as i64 - 1).to_ne_bytes())?;
    w.write_all(&(-1i64).to_ne_bytes())?;
    for value in values {
        w.write_all(&value.to_ne_bytes())?;
    }
    Ok(())
}

/// The result of loading a snapshot: the restored replicas and, if the
/// file carried one, the vRE store.
pub struct LoadedSnapshot {
    pub replicas: ReplicaTable,
    pub vre: Option<VreStore>,
    pub n_atoms: u32,
}

pub fn load_snapshot(path: &Path, nominals: &[f64], has_vre: bool, overrides: LoadOverrides) -> StorageResult<LoadedSnapshot> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut f32_buf = [0u8; 4];
    r.read_exact(&mut f32_buf)?;
    let version = f32::from_ne_bytes(f32_buf);
    if version != SNAPSHOT_VERSION && version != SNAPSHOT_VERSION_LEGACY {
        return Err(StorageError::UnsupportedSnapshotVersion {
            got: version,
            current: SNAPSHOT_VERSION,
            legacy: SNAPSHOT_VERSION_LEGACY,
        });
    }
    if version == SNAPSHOT_VERSION_LEGACY && has_vre {
        return Err(StorageError::LegacySnapshotRequiresNonVre);
    }

    let mut u32_buf = [0u8; 4];
    r.read_exact(&mut u32_buf)?;
    let n_replicas = u32::from_ne_bytes(u32_buf);
    if n_replicas as usize != nominals.len() {
        return Err(StorageError::ReplicaCountMismatch {
            expected: nominals.len() as u32,
            got: n_replicas,
        });
    }
    r.read_exact(&mut u32_buf)?;
    let n_atoms = u32::from_ne_bytes(u32_buf);

    let headers: Vec<ReplicaImageHeader> = (0..n_replicas)
        .map(|_| read_replica_image(&mut r))
        .collect::<std::io::Result<_>>()?;

    let mut replicas = ReplicaTable::from_nominals(nominals);
    for (i, (_, replica)) in replicas.iter_mut().enumerate() {
        let h = &headers[i];
        let mut restart_blob = vec![0u8; h.restart_size as usize];
        r.read_exact(&mut restart_blob)?;
        let mut coordinate_sum = vec![0.0f32; (n_atoms as usize) * 3];
        for v in &mut coordinate_sum {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf)?;
            *v = f32::from_ne_bytes(buf);
        }
        let mut presence_bytes = vec![0u8; PresenceBitmap::empty().as_bytes().len()];
        r.read_exact(&mut presence_bytes)?;

        replica.status = ReplicaStatus::Idle;
        replica.w = h.w;
        replica.w2 = h.w2;
        replica.w2_nominal = h.w2_nominal;
        replica.umbrella_k = h.umbrella_k;
        replica.sequence_number = dr_types::SequenceNumber(h.sequence_number);
        replica.sample_count = h.sample_count;
        replica.sampling_runs = overrides.sampling_runs.get(i).copied().unwrap_or(h.sampling_runs);
        replica.sampling_steps = h.sampling_steps;
        replica.cancellation_accumulator = h.cancellation_accumulator;
        replica.cancellation_count = h.cancellation_count;
        replica.cancellation_energy = h.cancellation_energy;
        replica.last_activity_time = h.last_activity_time;
        replica.start_time_on_current_node = h.start_time_on_current_node;
        replica.node_slot = None;
        replica.restart_blob = restart_blob;
        replica.coordinate_sum = coordinate_sum;
        replica.presence = PresenceBitmap::from_bytes(&presence_bytes);
        replica.vre_seed_file = h.vre_seed_file.clone();
        let _ = h.status;
    }

    if let Some(starting) = overrides.starting_nominals {
        for (i, (_, replica)) in replicas.iter_mut().enumerate() {
            if let Some(&w) = starting.get(i) {
                replica.w = w;
            }
        }
    }

    let vre = if version == SNAPSHOT_VERSION && has_vre {
        Some(read_vre_store(&mut r, n_replicas as usize)?)
    } else {
        None
    };

    Ok(LoadedSnapshot {
        replicas,
        vre,
        n_atoms,
    })
}

fn read_vre_store(r: &mut impl Read, n_positions: usize) -> std::io::Result<VreStore> {
    let mut primary: Vec<Vec<(f32, i64)>> = Vec::with_capacity(n_positions);
    for _ in 0..n_positions {
        let mut i64_buf = [0u8; 8];
        r.read_exact(&mut i64_buf)?;
        let _nallocated = i64::from_ne_bytes(i64_buf);
        r.read_exact(&mut i64_buf)?;
        let nlastused = i64::from_ne_bytes(i64_buf);
        let count = (nlastused + 1).max(0) as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let mut f32_buf = [0u8; 4];
            r.read_exact(&mut f32_buf)?;
            let value = f32::from_ne_bytes(f32_buf);
            let mut i32_buf = [0u8; 4];
            r.read_exact(&mut i32_buf)?;
            let source = i32::from_ne_bytes(i32_buf) as i64;
            items.push((value, source));
        }
        primary.push(items);
    }

    let mut secondary: Vec<Vec<f32>> = Vec::with_capacity(n_positions);
    for _ in 0..n_positions {
        let mut i64_buf = [0u8; 8];
        r.read_exact(&mut i64_buf)?;
        let _nallocated = i64::from_ne_bytes(i64_buf);
        r.read_exact(&mut i64_buf)?;
        let nlastused = i64::from_ne_bytes(i64_buf);
        r.read_exact(&mut i64_buf)?;
        let _nrecyclepush = i64::from_ne_bytes(i64_buf);
        let count = (nlastused + 1).max(0) as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let mut f32_buf = [0u8; 4];
            r.read_exact(&mut f32_buf)?;
            values.push(f32::from_ne_bytes(f32_buf));
        }
        secondary.push(values);
    }

    Ok(VreStore::from_raw_parts(primary, secondary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips_replica_state() {
        let dir = tempdir().unwrap();
        let nominals = vec![0.0, 1.0, 2.0];
        let mut replicas = ReplicaTable::from_nominals(&nominals);
        replicas.get_mut(dr_types::ReplicaNumber(1)).unwrap().w = 1.25;
        replicas
            .get_mut(dr_types::ReplicaNumber(1))
            .unwrap()
            .commit_round(0, vec![1, 2, 3])
            .unwrap();

        let path = save_snapshot(dir.path(), "run", 1_700_000_000, 0, &replicas, None).unwrap();
        assert!(path.exists());

        let loaded = load_snapshot(
            &path,
            &nominals,
            false,
            LoadOverrides {
                sampling_runs: &[5, 5, 5],
                starting_nominals: None,
            },
        )
        .unwrap();
        let restored = loaded.replicas.get(dr_types::ReplicaNumber(1)).unwrap();
        assert_eq!(restored.w, 1.25);
        assert_eq!(restored.sample_count, 1);
        assert_eq!(restored.sampling_runs, 5);
        assert_eq!(restored.restart_blob, vec![1, 2, 3]);
        assert_eq!(restored.status, ReplicaStatus::Idle);
    }

    #[test]
    fn load_rejects_a_replica_count_mismatch() {
        let dir = tempdir().unwrap();
        let nominals = vec![0.0, 1.0];
        let replicas = ReplicaTable::from_nominals(&nominals);
        let path = save_snapshot(dir.path(), "run", 1, 0, &replicas, None).unwrap();

        let err = load_snapshot(
            &path,
            &[0.0, 1.0, 2.0],
            false,
            LoadOverrides {
                sampling_runs: &[],
                starting_nominals: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::ReplicaCountMismatch { .. }));
    }

    #[test]
    fn starting_nominals_override_restored_w() {
        let dir = tempdir().unwrap();
        let nominals = vec![0.0, 1.0];
        let replicas = ReplicaTable::from_nominals(&nominals);
        let path = save_snapshot(dir.path(), "run", 1, 0, &replicas, None).unwrap();

        let loaded = load_snapshot(
            &path,
            &nominals,
            false,
            LoadOverrides {
                sampling_runs: &[],
                starting_nominals: Some(&[9.0, 8.0]),
            },
        )
        .unwrap();
        assert_eq!(loaded.replicas.get(dr_types::ReplicaNumber(0)).unwrap().w, 9.0);
    }
}
