//! `dr_tester` — a script-driven fake worker that repeatedly plays a
//! replica's round of the wire protocol against a live `dr_server`,
//! without a real physics engine behind it (spec.md §6). Grounded on
//! `original_source/source/DR_tester.cpp`'s handshake-then-loop shape
//! and its `-n`/`-s`/`-v`/`-r`/`-e` flag set.
//!
//! ```text
//! dr_tester <ip|localhost> <script> [-n noise] [-s sleep_us] [-v] [-r Nreplicas] [-e exactInputFile]
//! ```

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rand::Rng;

use dr_client::ClientSession;
use dr_config::ScriptConfigLoader;
use dr_wire::{CommandTag, ReplicaId};

/// Fake simulation worker exercising a Distributed Replica server.
#[derive(Parser)]
#[command(name = "dr_tester")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server IP address, or `localhost`.
    ip: String,

    /// Path to the simulation script driving this run.
    script: PathBuf,

    /// Include synthetic noise in the generated sample data (0 = none).
    #[arg(short = 'n', long, default_value_t = 0)]
    noise: i32,

    /// Microseconds to sleep between rounds.
    #[arg(short = 's', long, default_value_t = 0)]
    sleep_us: u64,

    /// Verbose per-frame logging.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,

    /// Override the number of replicas to drive (negative: treat as
    /// N_replicas / N_samesystem_uncoupled, matching the original's
    /// sign convention).
    #[arg(short = 'r', long)]
    n_replicas: Option<i64>,

    /// Read exact move-energy/sample values from this file instead of
    /// generating them, for reproducible regression runs.
    #[arg(short = 'e', long)]
    exact_input_file: Option<PathBuf>,

    /// Server port (the original combines this into the script; kept as
    /// an explicit flag here since `ScriptConfig` already owns a port
    /// for the server's own bind address, which may differ from the
    /// address this tester dials).
    #[arg(short = 'p', long, default_value_t = 0)]
    port_override: u16,

    /// Number of rounds to play before exiting.
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// Atom count for synthetic coordinate frames (the script format
    /// does not carry this; the real tester took it from the input
    /// structure file, which is out of this workspace's scope).
    #[arg(long, default_value_t = 0)]
    n_atoms: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("dr_tester: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ScriptConfigLoader::load_path(&cli.script)?;
    let port = if cli.port_override != 0 { cli.port_override } else { config.port };
    let addr = format!("{}:{}", cli.ip, port);

    let requested = cli.n_replicas.unwrap_or(config.n_replicas() as i64);
    let n_replicas = if requested < 0 { config.n_replicas() as i64 / config.n_samesystem_uncoupled.max(1) as i64 } else { requested };
    tracing::info!(%addr, n_replicas, rounds = cli.rounds, "starting tester run");

    let exact_values: Option<Vec<f32>> = match &cli.exact_input_file {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            Some(text.split_whitespace().filter_map(|t| t.parse::<f32>().ok()).collect())
        }
        None => None,
    };

    let mut rng = rand::thread_rng();
    let mut session = ClientSession::connect(&addr)?;
    session.send_replica_id(ReplicaId::new_node_handshake())?;
    let mut reply = session.recv_dispatch()?;
    if cli.verbose {
        tracing::info!(replica = reply.next_id.replica_number, sequence = reply.next_id.sequence_number, "handshake complete");
    }

    for round in 0..cli.rounds {
        if cli.sleep_us > 0 {
            thread::sleep(Duration::from_micros(cli.sleep_us));
        }

        session.send_replica_id(reply.next_id)?;
        session.send_f32_frame(CommandTag::TakeTcs, &[0.0])?;
        session.send_f32_frame(CommandTag::TakeJid, &[round as f32])?;

        for copy in 0..config.n_samesystem_uncoupled.max(1) {
            let energy_len = dr_types::expected_energy_len(config.coordinate, config.move_algorithm, config.n_replicas());
            let energy = synthetic_values(&exact_values, energy_len as usize, &mut rng, cli.noise);
            session.send_f32_frame(CommandTag::TakeMoveEnergyData, &energy)?;

            if config.need_sample_data {
                let samples = synthetic_values(&exact_values, config.n_samples_per_run as usize, &mut rng, cli.noise);
                session.send_f32_frame(CommandTag::TakeSampleData, &samples)?;
            }
            for _ in 0..config.n_additional_data {
                let extra = synthetic_values(&exact_values, config.n_samples_per_run as usize, &mut rng, cli.noise);
                session.send_f32_frame(CommandTag::TakeSampleData, &extra)?;
            }
            if config.need_coordinate_data {
                let coords = synthetic_values(&exact_values, (cli.n_atoms * 3) as usize, &mut rng, 0);
                session.send_f32_frame(CommandTag::TakeCoordinateData, &coords)?;
            }

            if copy == 0 {
                session.send_blob(CommandTag::TakeRestartFile, b"tester-restart")?;
            } else {
                session.send_next_non_interacting()?;
            }
        }

        reply = session.recv_dispatch()?;
        if cli.verbose {
            tracing::info!(round, replica = reply.next_id.replica_number, sequence = reply.next_id.sequence_number, "round complete");
        }
    }

    Ok(())
}

fn synthetic_values(exact: &Option<Vec<f32>>, len: usize, rng: &mut impl Rng, noise: i32) -> Vec<f32> {
    if let Some(values) = exact {
        return values.iter().copied().take(len).collect();
    }
    if noise == 0 {
        vec![0.0; len]
    } else {
        (0..len).map(|_| rng.gen_range(-1.0f32..1.0f32)).collect()
    }
}
