//! Binary wire protocol for Distributed Replica (spec.md §4.1, §6).
//!
//! Every multi-byte integer on the wire is **host-endian**, not
//! network-endian — an explicit, historical departure from usual TCP
//! protocol practice that both peers must agree on (spec.md §6). This
//! crate is the one place that decision is made; every other crate talks
//! to the wire only through the types here.

mod command;
mod error;
mod frame;
mod param_block;
mod replica_id;

pub use command::{CommandTag, KeyKind, PRIVILEGED_KEY, PROTOCOL_VERSION, REGULAR_KEY};
pub use error::{ProtocolError, WireResult};
pub use frame::{
    decode_f32_blob, encode_f32_blob, read_length_prefixed, read_protocol_version,
    read_take_this_file, write_length_prefixed, write_protocol_version, write_take_this_file,
};
pub use param_block::ParameterBlock;
pub use replica_id::ReplicaId;

/// Hard ceiling on any length-prefixed blob, checked before allocation
/// (spec.md §4.1: "any length prefix is checked against a hard ceiling
/// before allocation"). Large enough for a multi-million-atom coordinate
/// frame, small enough that a corrupted or hostile size prefix cannot
/// force an unbounded allocation.
pub const MAX_FRAME_PAYLOAD_BYTES: u32 = 256 * 1024 * 1024;
