//! `rkvx-tool`: a small inspection/maintenance CLI over an environment
//! (spec §1 "peripheral tooling is out of scope for the core engine",
//! grounded on the `clap`-derive style of the pack's InnoDB-redo-log
//! inspector for command shape, with the engine itself supplying the
//! actual logic).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rkvx::{EnvOptions, Env};

#[derive(Parser)]
#[command(name = "rkvx-tool", about = "Inspect and poke at an rkvx environment")]
struct Cli {
    /// Path to the environment's data file.
    #[arg(long)]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current troika/meta summary.
    Stat,
    /// Look up a single key in the main table.
    Get { key: String },
    /// Insert or overwrite a single key in the main table.
    Put { key: String, value: String },
    /// Remove a single key from the main table.
    Del { key: String },
}

fn main() -> anyhow::Result<()> {
    rkvx::logging::init();
    let cli = Cli::parse();
    let env = Env::open(&cli.path, EnvOptions::default()).with_context(|| format!("opening {}", cli.path.display()))?;

    match cli.command {
        Command::Stat => {
            println!("environment: {}", env.path().display());
        }
        Command::Get { key } => {
            let mut txn = env.begin_write()?;
            match txn.get(key.as_bytes())? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(not found)"),
            }
            txn.abort();
        }
        Command::Put { key, value } => {
            let mut txn = env.begin_write()?;
            txn.put(key.as_bytes(), value.as_bytes(), true)?;
            txn.commit()?;
        }
        Command::Del { key } => {
            let mut txn = env.begin_write()?;
            txn.delete(key.as_bytes())?;
            txn.commit()?;
        }
    }

    Ok(())
}
