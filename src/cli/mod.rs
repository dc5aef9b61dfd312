use clap::{Parser, Subcommand};
use eyre::Result;

use crate::defs::{Circuit, Field};

mod config;
mod oneshot;
mod run;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Config {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    Get {
        circuit: Circuit,
        field: Field,

        #[arg(long)]
        cached: bool,

        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    Run {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    Set {
        circuit: Circuit,
        field: Field,
        value: String,

        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

pub async fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Config { config } => self::config::read_and_print(&config).await,

        Command::Get {
            circuit,
            field,
            cached,
            config,
        } => self::oneshot::get(&config, circuit, field, cached).await,

        Command::Run { config } => self::run::launch(&config).await,

        Command::Set {
            circuit,
            field,
            value,
            config,
        } => self::oneshot::set(&config, circuit, field, &value).await,
    }
}
