use std::io::{Read, Write};

use crate::error::WireResult;

/// The `ID_struct` payload carried by the `ReplicaId` command in both
/// directions. `title` is a fixed 4-byte field; a client opens a
/// connection by sending `title == "**\0\0"` (spec.md §4.2's "new-node
/// handshake" — a two-byte `"**"` opening, zero-padded to 4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaId {
    pub title: [u8; 4],
    pub replica_number: i32,
    pub sequence_number: u32,
}

const NEW_NODE_HANDSHAKE_PREFIX: [u8; 2] = *b"**";

impl ReplicaId {
    pub const WIRE_SIZE: usize = 4 + 4 + 4;

    pub fn new_node_handshake() -> Self {
        let mut title = [0u8; 4];
        title[..2].copy_from_slice(&NEW_NODE_HANDSHAKE_PREFIX);
        ReplicaId {
            title,
            replica_number: -1,
            sequence_number: 0,
        }
    }

    pub fn is_new_node_handshake(&self) -> bool {
        self.title[..2] == NEW_NODE_HANDSHAKE_PREFIX
    }

    pub fn for_replica(replica_number: i32, sequence_number: u32) -> Self {
        ReplicaId {
            title: [0u8; 4],
            replica_number,
            sequence_number,
        }
    }

    pub fn read<R: Read>(r: &mut R) -> WireResult<Self> {
        let mut title = [0u8; 4];
        r.read_exact(&mut title)?;
        let mut num_buf = [0u8; 4];
        r.read_exact(&mut num_buf)?;
        let replica_number = i32::from_ne_bytes(num_buf);
        let mut seq_buf = [0u8; 4];
        r.read_exact(&mut seq_buf)?;
        let sequence_number = u32::from_ne_bytes(seq_buf);
        Ok(ReplicaId {
            title,
            replica_number,
            sequence_number,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.title)?;
        w.write_all(&self.replica_number.to_ne_bytes())?;
        w.write_all(&self.sequence_number.to_ne_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips_and_is_detected() {
        let id = ReplicaId::new_node_handshake();
        let mut buf = Vec::new();
        id.write(&mut buf).unwrap();
        let parsed = ReplicaId::read(&mut &buf[..]).unwrap();
        assert!(parsed.is_new_node_handshake());
        assert_eq!(parsed, id);
    }

    #[test]
    fn ordinary_replica_id_is_not_a_handshake() {
        let id = ReplicaId::for_replica(3, 12);
        assert!(!id.is_new_node_handshake());
    }
}
