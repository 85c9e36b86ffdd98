//! `dr_server` — starts a coordination server from a simulation script.
//!
//! ```bash
//! dr_server run.script --log-dir ./logs
//! dr_server run.script --snapshot run.1700000000.snapshot
//! ```

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;

use dr_config::ScriptConfigLoader;
use dr_replica::{NodeTable, ReplicaTable, VreStore};
use dr_server::context::ServerContext;
use dr_server::{session, supervisor};
use dr_storage::{ForceDatabase, ForceDatabaseHeader, LoadOverrides};

/// Coordination server for a Distributed Replica run.
#[derive(Parser)]
#[command(name = "dr_server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the simulation script (the `SIMULATION`/`TITLE`/... DSL).
    script: PathBuf,

    /// Resume from a previously saved snapshot instead of starting fresh.
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Directory for the `{title}.log` text log and snapshot files.
    #[arg(short = 'd', long, default_value = ".")]
    log_dir: PathBuf,

    /// Unix time to record as the process start time (defaults to now;
    /// overridable for reproducible mobility-handoff tests).
    #[arg(short = 't', long)]
    start_time: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(err) = run(Cli::parse()) {
        tracing::error!(%err, "dr_server exiting with an error");
        eprintln!("dr_server: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ScriptConfigLoader::load_path(&cli.script)?;
    let start_time = cli.start_time.unwrap_or_else(|| SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs());

    let nominals: Vec<f64> = config.replicas.iter().map(|r| r.starting_nominal).collect();
    let has_vre = config.move_algorithm == dr_types::MoveAlgorithm::VirtualReplicaExchange;

    let (replicas, vre) = match &cli.snapshot {
        Some(path) => {
            let sampling_runs: Vec<u32> = config.replicas.iter().map(|r| r.sampling_runs).collect();
            let loaded = dr_storage::load_snapshot(path, &nominals, has_vre, LoadOverrides { sampling_runs: &sampling_runs, starting_nominals: None })?;
            (loaded.replicas, loaded.vre)
        }
        None => {
            let replicas = ReplicaTable::from_nominals(&nominals);
            let vre = has_vre.then(|| VreStore::new(nominals.len(), None, config.vre.secondary_list_length));
            (replicas, vre)
        }
    };

    let nodes = NodeTable::new(config.node_table_size() as usize);
    let db_path = cli.log_dir.join(format!("{}.forcedatabase", config.title));
    let header = ForceDatabaseHeader {
        n_records: 0,
        n_ligands: config.n_ligands,
        n_forces_per_record: 2,
        n_energies_per_record: dr_types::expected_energy_len(config.coordinate, config.move_algorithm, config.n_replicas()),
        n_additional_columns_per_record: config.n_additional_data,
    };
    let database = ForceDatabase::open(&db_path, header)?;
    let log = dr_server::log::LogSink::open(&cli.log_dir, &config.title)?;

    let port = config.port;
    let title = config.title.clone();
    let ctx = Arc::new(ServerContext::new(config, replicas, nodes, database, vre, log, start_time));
    ctx.log(&format!("starting {title} on port {port}"));

    let listener = TcpListener::bind(("0.0.0.0", port))?;

    let supervisor_ctx = Arc::clone(&ctx);
    let snapshot_dir = cli.log_dir.clone();
    thread::spawn(move || {
        let mut timers = supervisor::SupervisorTimers::new(supervisor_ctx.start_time);
        loop {
            supervisor::tick(&supervisor_ctx, &snapshot_dir, &mut timers);
            if supervisor_ctx.should_stop.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(supervisor::TICK_INTERVAL);
        }
    });

    listener.set_nonblocking(true)?;
    loop {
        if ctx.should_stop.load(Ordering::SeqCst) {
            ctx.log("listener observed stop flag, shutting down");
            break;
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                let session_ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    if let Err(err) = session::handle_connection(&session_ctx, stream) {
                        if !err.is_session_local() {
                            session_ctx.log(&format!("session-fatal error: {err}"));
                        }
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(200));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}
