//! `convergent`: a thin command-line surface over `convergent-core`,
//! exercising the same flow façade an FFI caller would (init/open/write/
//! get-operations/apply-remote/read-drip/doctor), for local inspection and
//! scripting rather than as part of the core engine.

use clap::{Parser, Subcommand};
use convergent_core::flow::DripSchema;
use convergent_core::{FlowRegistry, Operation};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "convergent", about = "Inspect and drive convergent-document flows")]
struct Cli {
    /// Device identity this process authors operations as.
    #[arg(long, default_value = "local-device")]
    device_id: String,

    /// Directory holding persistent flow logs. Omit for an in-memory flow.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append a single JSON-encoded operation to a flow.
    Write {
        uuid: String,
        /// JSON operation, e.g. '{"AddItem":{"item_id":"x","item_type":"GianttItem"}}'
        op_json: String,
    },
    /// Print every envelope in a flow's log as a JSON array.
    Operations { uuid: String },
    /// Print the Giantt text rendering of a flow's materialized state.
    GianttDrip { uuid: String },
    /// Print the Inventory JSON rendering of a flow's materialized state.
    InventoryDrip { uuid: String },
    /// Run the Doctor and print its issues as JSON.
    Doctor { uuid: String },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let registry = match &cli.data_dir {
        Some(dir) => FlowRegistry::init_with_data_dir(cli.device_id, dir.clone()),
        None => FlowRegistry::init(cli.device_id),
    };

    if let Err(e) = run(&registry, cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(registry: &FlowRegistry, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Write { uuid, op_json } => {
            registry.open(&uuid)?;
            let op: Operation = serde_json::from_str(&op_json)?;
            let timestamp = current_timestamp();
            let envelope = registry.write_local(&uuid, op, timestamp)?;
            println!("{}", serde_json::to_string(&envelope)?);
        }
        Command::Operations { uuid } => {
            registry.open(&uuid)?;
            let envelopes = registry.get_operations(&uuid)?;
            println!("{}", serde_json::to_string_pretty(&envelopes)?);
        }
        Command::GianttDrip { uuid } => {
            registry.open(&uuid)?;
            println!("{}", registry.read_drip(&uuid, DripSchema::Giantt)?);
        }
        Command::InventoryDrip { uuid } => {
            registry.open(&uuid)?;
            println!("{}", registry.read_drip(&uuid, DripSchema::Inventory)?);
        }
        Command::Doctor { uuid } => {
            registry.open(&uuid)?;
            let issues = registry.run_doctor(&uuid)?;
            for issue in issues {
                println!("{:?}: {}", issue.kind, issue.message);
            }
        }
    }
    Ok(())
}

fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
