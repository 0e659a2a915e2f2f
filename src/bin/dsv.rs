//! dsv: command-line front-end for scalar and string system variables.
//!
//! ```text
//! dsv create /SYS/STS/DEVICE_NAME -i 1235 -v "wifi router" -y string -d "device name" -t "sys.sts"
//! dsv create -i 1235 -f dsvs.json
//! dsv set [0]/SYS/STS/DATE 2023-12-25
//! dsv get [123]/SYS/STS
//! dsv sub [123]/SYS/STS/DEVICE_NAME
//! ```
//!
//! `get` runs a fuzzy iteration, printing every variable whose full name
//! contains the argument; `sub` blocks and prints notifications as they
//! arrive.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsv::config::LOG_ENV_VAR;
use dsv::{batch, DsvClient, DsvConfig, DsvError, DsvType, Flags, NewDsv, Result, Value};

#[derive(Parser)]
#[command(name = "dsv", about = "create, read, write, and subscribe to system variables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new dsv, or a batch of them from a JSON file.
    Create {
        /// Variable path, e.g. /SYS/STS/DEVICE_NAME.
        name: Option<String>,

        /// Create a batch of dsvs from a JSON file.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Instance id to create under.
        #[arg(short, long, default_value_t = 0)]
        instance: u32,

        /// Variable type: string, int_array, u8..u64, s8..s64, f32, f64.
        #[arg(short = 'y', long = "type", default_value = "string")]
        ty: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Comma-separated tags.
        #[arg(short, long, default_value = "")]
        tags: String,

        /// Default value in string form.
        #[arg(short, long, default_value = "")]
        value: String,

        /// Comma-separated flags: save, track.
        #[arg(long, default_value = "")]
        flags: String,
    },

    /// Set a dsv value (string form, converted by the entry's type).
    #[command(alias = "write")]
    Set { name: String, value: String },

    /// Print every dsv whose full name contains the argument.
    #[command(alias = "read")]
    Get { name: String },

    /// Subscribe to one or more dsvs and print notifications.
    #[command(alias = "subscribe")]
    Sub {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Persist dirty save-flagged entries on the broker.
    Save,

    /// Re-apply the save file to existing entries on the broker.
    Restore,

    /// Toggle change tracking on a dsv.
    Track {
        name: String,

        /// Clear the flag instead of setting it.
        #[arg(long)]
        disable: bool,
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
        Command::Create {
            file: Some(file),
            instance,
            ..
        } => {
            let created = batch::create_from_file(client, instance, &file)?;
            println!("created {created} dsvs");
            Ok(())
        }
        Command::Create {
            name: Some(name),
            instance,
            ty,
            description,
            tags,
            value,
            flags,
            ..
        } => {
            let ty = DsvType::from_name(&ty)?;
            let value = if value.is_empty() {
                Value::default_for(ty)?
            } else {
                Value::parse(ty, &value)?
            };
            let dsv = NewDsv::new(&name, value)
                .with_description(&description)
                .with_tags(&tags)
                .with_flags(Flags::parse(&flags));
            let full_name = client.create(instance, &dsv)?;
            println!("created {full_name}");
            Ok(())
        }
        Command::Create { .. } => Err(DsvError::Invalid(
            "create needs a variable name or -f <json-file>".into(),
        )),
        Command::Set { name, value } => client.set_by_name(&name, &value),
        Command::Get { name } => {
            let mut index = -1;
            while let Some(found) = client.get_by_name_fuzzy(&name, index)? {
                println!("{}={}", found.name, found.value);
                index = found.index;
            }
            Ok(())
        }
        Command::Sub { names } => {
            for name in &names {
                client.subscribe(name)?;
            }
            loop {
                let notification = client.notification()?;
                let handle = client.handle(&notification.name)?;
                let ty = client.type_of(handle)?;
                println!("{}={}", notification.name, notification.decode(ty)?);
            }
        }
        Command::Save => client.save(),
        Command::Restore => client.restore(),
        Command::Track { name, disable } => {
            let handle = client.handle(&name)?;
            client.track(handle, !disable)
        }
    }
}
