//! asv: command-line front-end for int-array system variables.
//!
//! ```text
//! asv add -v 9809 [123]/SYS/TEST/INT_ARRAY
//! asv set -i 3 -v 9900 [123]/SYS/TEST/INT_ARRAY
//! asv get -i 3 [123]/SYS/TEST/INT_ARRAY
//! asv del -i 3 [123]/SYS/TEST/INT_ARRAY
//! asv ins -i 3 -v 9900 [123]/SYS/TEST/INT_ARRAY
//! ```

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsv::config::LOG_ENV_VAR;
use dsv::{DsvClient, DsvConfig, Result};

#[derive(Parser)]
#[command(name = "asv", about = "mutate and read elements of array system variables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append an item to an array dsv.
    Add {
        #[arg(short, long)]
        value: i32,
        name: String,
    },

    /// Overwrite the item at an index.
    Set {
        #[arg(short, long)]
        index: i32,
        #[arg(short, long)]
        value: i32,
        name: String,
    },

    /// Print the item at an index.
    Get {
        #[arg(short, long)]
        index: i32,
        name: String,
    },

    /// Delete the item at an index.
    Del {
        #[arg(short, long)]
        index: i32,
        name: String,
    },

    /// Insert an item before an index.
    Ins {
        #[arg(short, long)]
        index: i32,
        #[arg(short, long)]
        value: i32,
        name: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let client = match DsvClient::open(DsvConfig::from_env()) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "unable to reach a dsv server");
            return ExitCode::FAILURE;
        }
    };

    match run(&client, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(client: &DsvClient, command: Command) -> Result<()> {
    match command {
        Command::Add { value, name } => {
            let handle = client.handle(&name)?;
            client.add_item(handle, value)
        }
        Command::Set { index, value, name } => {
            let handle = client.handle(&name)?;
            client.set_item(handle, index, value)
        }
        Command::Get { index, name } => {
            let handle = client.handle(&name)?;
            let value = client.get_item(handle, index)?;
            println!("{value}");
            Ok(())
        }
        Command::Del { index, name } => {
            let handle = client.handle(&name)?;
            client.del_item(handle, index)
        }
        Command::Ins { index, value, name } => {
            let handle = client.handle(&name)?;
            client.ins_item(handle, index, value)
        }
    }
}
