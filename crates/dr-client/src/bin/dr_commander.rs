//! `dr_commander` — sends a one-shot privileged command to a running
//! `dr_server` (spec.md §6): `EXIT` for a graceful shutdown, `SNAPSHOT`
//! to request an out-of-cycle snapshot. Grounded on
//! `original_source/source/DR_commander.cpp`'s connect-then-write-then-
//! exit shape.

use clap::{Parser, ValueEnum};

use dr_client::ClientSession;
use dr_wire::CommandTag;

#[derive(Clone, Copy, ValueEnum)]
enum CommanderAction {
    Exit,
    Snapshot,
}

/// One-shot privileged command for a Distributed Replica server.
#[derive(Parser)]
#[command(name = "dr_commander")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server IP address.
    ip: String,

    /// Server port.
    port: u16,

    /// Action to send; both require the privileged key.
    #[arg(value_enum)]
    action: CommanderAction,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("dr_commander: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cli.ip, cli.port);
    let mut session = ClientSession::connect(&addr)?;
    let tag = match cli.action {
        CommanderAction::Exit => CommandTag::Exit,
        CommanderAction::Snapshot => CommandTag::Snapshot,
    };
    session.send_privileged(tag)?;
    tracing::info!(%addr, ?tag, "command sent");
    Ok(())
}
