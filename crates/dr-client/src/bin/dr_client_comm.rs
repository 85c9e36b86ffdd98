//! `dr_client_comm` — drives one round of the wire conversation a real
//! simulation worker has with a `dr_server` (spec.md §4.2, §6).
//! Grounded on `original_source/source/DR_client_comm.cpp`'s
//! connect → sendReplicaID → sendTCS/sendJID → sendBinFile →
//! receiveReplicaID/receiveParCHARMM sequence; generalized to the
//! `ClientSession` frame API instead of raw socket calls.
//!
//! ```text
//! dr_client_comm <ip> <port> <replica-id|**> <client_start_time> <job_id>
//! ```

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use dr_client::restart::compress_sync_flush;
use dr_client::ClientSession;
use dr_wire::{CommandTag, ReplicaId};

/// One round of a Distributed Replica worker's conversation with the
/// coordination server.
#[derive(Parser)]
#[command(name = "dr_client_comm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server IP address.
    ip: String,

    /// Server port.
    port: u16,

    /// Replica ID to resume, or `**` for a new-node handshake.
    replica_id: String,

    /// Unix time this client started (0 lets the server track it).
    client_start_time: i64,

    /// Job ID, for tracking only.
    job_id: i64,

    /// Restart-file payload to upload (first NNI copy only). A
    /// handshake round never uploads data, so this is ignored then.
    #[arg(short, long)]
    restart_file: Option<PathBuf>,

    /// Compress the restart-file payload with zlib sync flush before
    /// sending (spec.md §6 allows this; the server treats it as opaque).
    #[arg(short, long)]
    compress: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("dr_client_comm: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cli.ip, cli.port);
    let mut session = ClientSession::connect(&addr)?;

    let is_handshake = cli.replica_id == "**";
    let id = if is_handshake {
        ReplicaId::new_node_handshake()
    } else {
        let replica_number: i32 = cli.replica_id.parse()?;
        ReplicaId::for_replica(replica_number, 0)
    };
    session.send_replica_id(id)?;

    if !is_handshake {
        session.send_f32_frame(CommandTag::TakeTcs, &[cli.client_start_time as f32])?;
        session.send_f32_frame(CommandTag::TakeJid, &[cli.job_id as f32])?;

        // A single-copy (N_samesystem_uncoupled == 1) round with no
        // sample/coordinate data: the minimal legal round shape.
        session.send_f32_frame(CommandTag::TakeMoveEnergyData, &[])?;

        let restart_payload = match &cli.restart_file {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        let restart_payload = if cli.compress { compress_sync_flush(&restart_payload)? } else { restart_payload };
        session.send_blob(CommandTag::TakeRestartFile, &restart_payload)?;
    }

    let reply = session.recv_dispatch()?;
    tracing::info!(
        next_replica = reply.next_id.replica_number,
        next_sequence = reply.next_id.sequence_number,
        restart_bytes = reply.restart.as_ref().map(Vec::len).unwrap_or(0),
        "round complete"
    );
    print!("{}", reply.parameters.to_ascii());
    Ok(())
}
