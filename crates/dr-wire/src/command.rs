use std::io::{Read, Write};

use crate::error::{ProtocolError, WireResult};

/// Protocol version sent as the first 4 bytes of every new connection
/// (spec.md §4.1). A mismatch drops the connection.
pub const PROTOCOL_VERSION: u32 = 5;

/// Regular command key: 11 ASCII bytes, required for all non-privileged
/// commands.
pub const REGULAR_KEY: [u8; 11] = *b"REG COMMAND";

/// Privileged command key: required for `Exit` and `Snapshot`.
pub const PRIVILEGED_KEY: [u8; 11] = *b"SECRET CMDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Regular,
    Privileged,
}

impl KeyKind {
    pub fn bytes(self) -> [u8; 11] {
        match self {
            KeyKind::Regular => REGULAR_KEY,
            KeyKind::Privileged => PRIVILEGED_KEY,
        }
    }

    pub fn read<R: Read>(r: &mut R) -> WireResult<Self> {
        let mut buf = [0u8; 11];
        r.read_exact(&mut buf)?;
        if buf == REGULAR_KEY {
            Ok(KeyKind::Regular)
        } else if buf == PRIVILEGED_KEY {
            Ok(KeyKind::Privileged)
        } else {
            Err(ProtocolError::KeyMismatch)
        }
    }

    pub fn write<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.bytes())
    }

    pub fn is_privileged(self) -> bool {
        matches!(self, KeyKind::Privileged)
    }
}

/// One wire command tag, in the order spec.md §4.1 enumerates them. The
/// discriminants match `original_source/source/DR_protocol.h`'s
/// `command_enum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandTag {
    ReplicaId = 0,
    TakeThisFile = 1,
    TakeRestartFile = 2,
    TakeSampleData = 3,
    TakeMoveEnergyData = 4,
    TakeSimulationParameters = 5,
    TakeCoordinateData = 6,
    TakeTcs = 7,
    TakeJid = 8,
    NextNonInteracting = 9,
    Exit = 10,
    Snapshot = 11,
}

impl CommandTag {
    pub fn from_byte(b: u8) -> WireResult<Self> {
        Ok(match b {
            0 => CommandTag::ReplicaId,
            1 => CommandTag::TakeThisFile,
            2 => CommandTag::TakeRestartFile,
            3 => CommandTag::TakeSampleData,
            4 => CommandTag::TakeMoveEnergyData,
            5 => CommandTag::TakeSimulationParameters,
            6 => CommandTag::TakeCoordinateData,
            7 => CommandTag::TakeTcs,
            8 => CommandTag::TakeJid,
            9 => CommandTag::NextNonInteracting,
            10 => CommandTag::Exit,
            11 => CommandTag::Snapshot,
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn read<R: Read>(r: &mut R) -> WireResult<Self> {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        Self::from_byte(b[0])
    }

    pub fn write<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&[self.to_byte()])
    }

    /// `Exit` and `Snapshot` require the privileged key (spec.md §4.2).
    pub fn requires_privileged_key(self) -> bool {
        matches!(self, CommandTag::Exit | CommandTag::Snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trip() {
        for key in [KeyKind::Regular, KeyKind::Privileged] {
            let mut buf = Vec::new();
            key.write(&mut buf).unwrap();
            let parsed = KeyKind::read(&mut &buf[..]).unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn wrong_key_is_mismatch() {
        let bad = [0u8; 11];
        let err = KeyKind::read(&mut &bad[..]).unwrap_err();
        assert!(matches!(err, ProtocolError::KeyMismatch));
    }

    #[test]
    fn every_tag_round_trips() {
        for b in 0u8..=11 {
            let tag = CommandTag::from_byte(b).unwrap();
            assert_eq!(tag.to_byte(), b);
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(CommandTag::from_byte(12).is_err());
    }

    #[test]
    fn only_exit_and_snapshot_are_privileged() {
        for tag @ _ in [
            CommandTag::ReplicaId,
            CommandTag::TakeThisFile,
            CommandTag::TakeRestartFile,
            CommandTag::TakeSampleData,
            CommandTag::TakeMoveEnergyData,
            CommandTag::TakeSimulationParameters,
            CommandTag::TakeCoordinateData,
            CommandTag::TakeTcs,
            CommandTag::TakeJid,
            CommandTag::NextNonInteracting,
        ] {
            assert!(!tag.requires_privileged_key());
        }
        assert!(CommandTag::Exit.requires_privileged_key());
        assert!(CommandTag::Snapshot.requires_privileged_key());
    }
}
