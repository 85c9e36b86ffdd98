//! On-disk persistence for Distributed Replica: the append-only force
//! database and the replica/vRE snapshot format.

mod error;
mod force_database;
mod snapshot;

pub use error::{StorageError, StorageResult};
pub use force_database::{ForceDatabase, Header as ForceDatabaseHeader, Record as ForceRecord};
pub use snapshot::{load_snapshot, save_snapshot, LoadOverrides, LoadedSnapshot};
