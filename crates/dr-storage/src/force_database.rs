//! The append-only binary force database (spec.md §4.7), grounded on
//! `force_database_class.h`'s header/record layout and its
//! reserve-the-count-then-write-the-payload append discipline.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// On-disk header, written host-endian, fixed at the start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub n_records: u32,
    pub n_ligands: u32,
    pub n_forces_per_record: u32,
    pub n_energies_per_record: u32,
    pub n_additional_columns_per_record: u32,
}

impl Header {
    pub const WIRE_SIZE: usize = 4 * 5;

    fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut buf = [0u8; Self::WIRE_SIZE];
        r.read_exact(&mut buf)?;
        Ok(Header {
            n_records: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            n_ligands: u32::from_ne_bytes(buf[4..8].try_into().unwrap()),
            n_forces_per_record: u32::from_ne_bytes(buf[8..12].try_into().unwrap()),
            n_energies_per_record: u32::from_ne_bytes(buf[12..16].try_into().unwrap()),
            n_additional_columns_per_record: u32::from_ne_bytes(buf[16..20].try_into().unwrap()),
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.n_records.to_ne_bytes())?;
        w.write_all(&self.n_ligands.to_ne_bytes())?;
        w.write_all(&self.n_forces_per_record.to_ne_bytes())?;
        w.write_all(&self.n_energies_per_record.to_ne_bytes())?;
        w.write_all(&self.n_additional_columns_per_record.to_ne_bytes())
    }

    /// Size, in floats, of one record's `generic_data` tail:
    /// `Nforces*Nligands + Nenergies + Nforces*Nadditional`.
    pub fn generic_data_len(&self) -> u32 {
        self.n_forces_per_record * self.n_ligands
            + self.n_energies_per_record
            + self.n_forces_per_record * self.n_additional_columns_per_record
    }

    pub fn record_size(&self) -> u32 {
        Record::FIXED_WIRE_SIZE as u32 + self.generic_data_len() * 4
    }
}

/// One force-database row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub replica_number: i32,
    pub sequence_number: u32,
    pub w: f32,
    pub generic_data: Vec<f32>,
}

impl Record {
    const FIXED_WIRE_SIZE: usize = 4 + 4 + 4;

    fn read<R: Read>(r: &mut R, generic_len: u32) -> std::io::Result<Self> {
        let mut fixed = [0u8; Self::FIXED_WIRE_SIZE];
        r.read_exact(&mut fixed)?;
        let replica_number = i32::from_ne_bytes(fixed[0..4].try_into().unwrap());
        let sequence_number = u32::from_ne_bytes(fixed[4..8].try_into().unwrap());
        let w = f32::from_ne_bytes(fixed[8..12].try_into().unwrap());

        let mut generic_data = Vec::with_capacity(generic_len as usize);
        let mut buf4 = [0u8; 4];
        for _ in 0..generic_len {
            r.read_exact(&mut buf4)?;
            generic_data.push(f32::from_ne_bytes(buf4));
        }
        Ok(Record {
            replica_number,
            sequence_number,
            w,
            generic_data,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.replica_number.to_ne_bytes())?;
        w.write_all(&self.sequence_number.to_ne_bytes())?;
        w.write_all(&self.w.to_ne_bytes())?;
        for v in &self.generic_data {
            w.write_all(&v.to_ne_bytes())?;
        }
        Ok(())
    }
}

/// Handle to a `{title}.forcedatabase` file. Records are appended, never
/// rewritten or deduplicated on the write path — deduplication of
/// `(replica, sequence)` collisions is left to the offline analysis tool,
/// out of scope here (spec.md §4.7, §1).
pub struct ForceDatabase {
    file: File,
    header: Header,
}

impl ForceDatabase {
    /// Opens an existing database, or creates one with the given shape if
    /// the file is empty / doesn't exist yet.
    pub fn open(path: impl AsRef<Path>, shape: Header) -> StorageResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.seek(SeekFrom::End(0))?;
        if len >= Header::WIRE_SIZE as u64 {
            file.seek(SeekFrom::Start(0))?;
            let existing = Header::read(&mut file)?;
            if existing.n_ligands != shape.n_ligands
                || existing.n_forces_per_record != shape.n_forces_per_record
                || existing.n_energies_per_record != shape.n_energies_per_record
                || existing.n_additional_columns_per_record != shape.n_additional_columns_per_record
            {
                return Err(StorageError::HeaderMismatch {
                    expected: Box::new(shape),
                    got: Box::new(existing),
                });
            }
            Ok(ForceDatabase { file, header: existing })
        } else {
            let header = Header { n_records: 0, ..shape };
            file.seek(SeekFrom::Start(0))?;
            header.write(&mut file)?;
            tracing::debug!(?header, "created new force database");
            Ok(ForceDatabase { file, header })
        }
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn n_records(&self) -> u32 {
        self.header.n_records
    }

    /// Appends one record: bumps `N_records` (reserving the slot) first,
    /// then writes the payload at `header_size + (N_records-1)*record_size`
    /// — the same order as the original's `write_record`, so a crash
    /// between the two steps leaves a reserved-but-unwritten tail record
    /// rather than a miscounted header.
    pub fn append(&mut self, record: &Record) -> StorageResult<u32> {
        let index = self.header.n_records;
        self.header.n_records += 1;
        self.file.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.file)?;

        let position = Header::WIRE_SIZE as u64 + index as u64 * self.header.record_size() as u64;
        self.file.seek(SeekFrom::Start(position))?;
        record.write(&mut self.file)?;
        self.file.flush()?;
        Ok(index)
    }

    pub fn read_record(&mut self, index: u32) -> StorageResult<Record> {
        if index >= self.header.n_records {
            return Err(StorageError::RecordOutOfRange {
                index,
                n_records: self.header.n_records,
            });
        }
        let position = Header::WIRE_SIZE as u64 + index as u64 * self.header.record_size() as u64;
        self.file.seek(SeekFrom::Start(position))?;
        let record = Record::read(&mut self.file, self.header.generic_data_len())?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn shape() -> Header {
        Header {
            n_records: 0,
            n_ligands: 1,
            n_forces_per_record: 2,
            n_energies_per_record: 1,
            n_additional_columns_per_record: 0,
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let mut db = ForceDatabase::open(tmp.path(), shape()).unwrap();
        let record = Record {
            replica_number: 3,
            sequence_number: 7,
            w: 1.25,
            generic_data: vec![0.1, 0.2, 9.9],
        };
        let idx = db.append(&record).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(db.n_records(), 1);
        let read_back = db.read_record(0).unwrap();
        assert_eq!(read_back, record);
    }

    #[test]
    fn reopening_preserves_existing_records() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut db = ForceDatabase::open(tmp.path(), shape()).unwrap();
            db.append(&Record {
                replica_number: 0,
                sequence_number: 0,
                w: 0.0,
                generic_data: vec![1.0, 2.0, 3.0],
            })
            .unwrap();
        }
        let mut db = ForceDatabase::open(tmp.path(), shape()).unwrap();
        assert_eq!(db.n_records(), 1);
        assert_eq!(db.read_record(0).unwrap().w, 0.0);
    }

    #[test]
    fn reading_past_the_end_errors() {
        let tmp = NamedTempFile::new().unwrap();
        let mut db = ForceDatabase::open(tmp.path(), shape()).unwrap();
        let err = db.read_record(0).unwrap_err();
        assert!(matches!(err, StorageError::RecordOutOfRange { .. }));
    }

    #[test]
    fn mismatched_shape_on_reopen_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        ForceDatabase::open(tmp.path(), shape()).unwrap();
        let mut different = shape();
        different.n_ligands = 2;
        let err = ForceDatabase::open(tmp.path(), different).unwrap_err();
        assert!(matches!(err, StorageError::HeaderMismatch { .. }));
    }
}
