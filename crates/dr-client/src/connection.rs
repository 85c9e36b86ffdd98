//! One outgoing connection to a `dr_server`, from the client's side of
//! the wire (spec.md §4.1, §4.2). Grounded on `DR_client_comm.cpp`'s
//! `sendReplicaID`/`receiveReplicaID`/`sendTCS`/`sendJID`/`sendBinFile`
//! sequence, generalized into one small struct instead of a dozen free
//! functions taking a raw socket descriptor.

use std::net::TcpStream;

use dr_wire::{
    decode_f32_blob, encode_f32_blob, read_length_prefixed, write_length_prefixed, write_protocol_version,
    CommandTag, KeyKind, ParameterBlock, ReplicaId, MAX_FRAME_PAYLOAD_BYTES,
};

use crate::error::{ClientError, ClientResult};

/// A connected, greeted session. `connect` sends the once-per-connection
/// protocol-version preamble; every `send_*` method after that writes one
/// key+tag+payload frame and every `recv_*` reads one (spec.md §4.1: the
/// version is a connection preamble, but every message in either
/// direction carries its own key+tag). Callers sequence these per
/// spec.md §4.2's fixed round ordering — this type does not enforce that
/// ordering itself, matching the original client's flat call sequence.
pub struct ClientSession {
    stream: TcpStream,
    peer: String,
}

impl ClientSession {
    pub fn connect(addr: &str) -> ClientResult<Self> {
        let mut stream = TcpStream::connect(addr).map_err(|e| ClientError::Io(addr.to_string(), e))?;
        write_protocol_version(&mut stream).map_err(|e| ClientError::Io(addr.to_string(), e))?;
        Ok(ClientSession { peer: addr.to_string(), stream })
    }

    fn io_err(&self, err: std::io::Error) -> ClientError {
        ClientError::Io(self.peer.clone(), err)
    }

    /// Writes a frame's key and tag; the payload follows separately.
    fn send_header(&mut self, key: KeyKind, tag: CommandTag) -> ClientResult<()> {
        key.write(&mut self.stream).map_err(|e| self.io_err(e))?;
        tag.write(&mut self.stream).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    /// Sends a `ReplicaID` command: `"**"` for a new-node handshake, or
    /// an existing assignment to resume a round.
    pub fn send_replica_id(&mut self, id: ReplicaId) -> ClientResult<()> {
        self.send_header(KeyKind::Regular, CommandTag::ReplicaId)?;
        id.write(&mut self.stream).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    /// Reads a reply's key+tag, checking the tag matches. The server
    /// always replies with the regular key, even to a privileged
    /// command's response.
    fn expect_tag(&mut self, expected: CommandTag) -> ClientResult<()> {
        KeyKind::read(&mut self.stream)?;
        let tag = CommandTag::read(&mut self.stream)?;
        if tag.to_byte() != expected.to_byte() {
            return Err(ClientError::Rejected(format!("expected tag {:?}, got {:?}", expected, tag)));
        }
        Ok(())
    }

    pub fn recv_replica_id(&mut self) -> ClientResult<ReplicaId> {
        self.expect_tag(CommandTag::ReplicaId)?;
        Ok(ReplicaId::read(&mut self.stream)?)
    }

    pub fn send_f32_frame(&mut self, tag: CommandTag, values: &[f32]) -> ClientResult<()> {
        self.send_header(KeyKind::Regular, tag)?;
        write_length_prefixed(&mut self.stream, &encode_f32_blob(values)).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    pub fn recv_f32_frame(&mut self, expected: CommandTag) -> ClientResult<Vec<f32>> {
        self.expect_tag(expected)?;
        let bytes = read_length_prefixed(&mut self.stream, MAX_FRAME_PAYLOAD_BYTES)?;
        Ok(decode_f32_blob(&bytes)?)
    }

    pub fn send_blob(&mut self, tag: CommandTag, payload: &[u8]) -> ClientResult<()> {
        self.send_header(KeyKind::Regular, tag)?;
        write_length_prefixed(&mut self.stream, payload).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    pub fn recv_blob(&mut self, expected: CommandTag) -> ClientResult<Vec<u8>> {
        self.expect_tag(expected)?;
        Ok(read_length_prefixed(&mut self.stream, MAX_FRAME_PAYLOAD_BYTES)?.to_vec())
    }

    pub fn send_next_non_interacting(&mut self) -> ClientResult<()> {
        self.send_header(KeyKind::Regular, CommandTag::NextNonInteracting)
    }

    /// Sends a bare `Exit` or `Snapshot` command; both require the
    /// privileged key (spec.md §4.2).
    pub fn send_privileged(&mut self, tag: CommandTag) -> ClientResult<()> {
        self.send_header(KeyKind::Privileged, tag)
    }

    /// Reads the `TakeSimulationParameters` reply and parses it.
    pub fn recv_parameters(&mut self) -> ClientResult<ParameterBlock> {
        self.expect_tag(CommandTag::TakeSimulationParameters)?;
        self.read_parameters_payload()
    }

    /// Reads one reply frame's key+tag without assuming which tag comes
    /// next — the dispatch response carries an *optional* `TakeRestartFile`
    /// frame (spec.md §4.2) ahead of the always-present
    /// `TakeSimulationParameters`, so the caller must branch on the tag
    /// it actually gets.
    pub fn read_reply_tag(&mut self) -> ClientResult<CommandTag> {
        KeyKind::read(&mut self.stream)?;
        Ok(CommandTag::read(&mut self.stream)?)
    }

    pub fn read_replica_id_payload(&mut self) -> ClientResult<ReplicaId> {
        Ok(ReplicaId::read(&mut self.stream)?)
    }

    pub fn read_blob_payload(&mut self) -> ClientResult<Vec<u8>> {
        Ok(read_length_prefixed(&mut self.stream, MAX_FRAME_PAYLOAD_BYTES)?.to_vec())
    }

    pub fn read_parameters_payload(&mut self) -> ClientResult<ParameterBlock> {
        let bytes = read_length_prefixed(&mut self.stream, MAX_FRAME_PAYLOAD_BYTES)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(ParameterBlock::from_ascii(&text)?)
    }

    /// Reads the full dispatch reply (spec.md §4.2): `ReplicaID`, then an
    /// optional `TakeRestartFile`, then always `TakeSimulationParameters`.
    pub fn recv_dispatch(&mut self) -> ClientResult<DispatchReply> {
        self.expect_tag(CommandTag::ReplicaId)?;
        let next_id = self.read_replica_id_payload()?;

        let mut restart = None;
        let mut tag = self.read_reply_tag()?;
        if tag.to_byte() == CommandTag::TakeRestartFile.to_byte() {
            restart = Some(self.read_blob_payload()?);
            tag = self.read_reply_tag()?;
        }
        if tag.to_byte() != CommandTag::TakeSimulationParameters.to_byte() {
            return Err(ClientError::Rejected(format!("expected TakeSimulationParameters, got {tag:?}")));
        }
        let parameters = self.read_parameters_payload()?;
        Ok(DispatchReply { next_id, restart, parameters })
    }
}

/// The server's end-of-round reply, fully parsed.
pub struct DispatchReply {
    pub next_id: ReplicaId,
    pub restart: Option<Vec<u8>>,
    pub parameters: ParameterBlock,
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use dr_wire::read_protocol_version;

    use super::*;

    /// A handshake round-trip against a hand-rolled fake server: the
    /// fake server only exercises the reply side of the wire so this
    /// test stays independent of `dr-server` (no dev-dependency cycle).
    #[test]
    fn handshake_round_trip_against_a_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_protocol_version(&mut stream).unwrap();
            KeyKind::read(&mut stream).unwrap();
            let tag = CommandTag::read(&mut stream).unwrap();
            assert_eq!(tag.to_byte(), CommandTag::ReplicaId.to_byte());
            let id = ReplicaId::read(&mut stream).unwrap();
            assert!(id.is_new_node_handshake());

            KeyKind::Regular.write(&mut stream).unwrap();
            CommandTag::ReplicaId.write(&mut stream).unwrap();
            ReplicaId::for_replica(0, 0).write(&mut stream).unwrap();

            KeyKind::Regular.write(&mut stream).unwrap();
            CommandTag::TakeSimulationParameters.write(&mut stream).unwrap();
            let block = ParameterBlock { wref: vec![0.0], samp_n_steps: 1, rnd_seed: 7, ..Default::default() };
            write_length_prefixed(&mut stream, block.to_ascii().as_bytes()).unwrap();
        });

        let mut session = ClientSession::connect(&addr.to_string()).unwrap();
        session.send_replica_id(ReplicaId::new_node_handshake()).unwrap();
        let reply = session.recv_dispatch().unwrap();

        assert_eq!(reply.next_id.replica_number, 0);
        assert_eq!(reply.next_id.sequence_number, 0);
        assert!(reply.restart.is_none());
        assert_eq!(reply.parameters.wref, vec![0.0]);

        server.join().unwrap();
    }
}
