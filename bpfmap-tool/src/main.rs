use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde_json::Value;

mod inspect;
mod watch;

use inspect::{CreateOptions, MapTarget};

#[derive(Parser)]
#[command(name = "bpfmap")]
#[command(about = "Inspect and manage eBPF maps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a map's metadata as JSON
    Info(TargetArgs),
    /// List every map visible to this process
    List,
    /// Print all entries, walking keys one by one
    Dump(TargetArgs),
    /// Print all entries using batch lookups
    BatchDump(BatchDumpCommand),
    /// Delete one entry
    Delete(DeleteCommand),
    /// Make a map read-only for userspace
    Freeze(TargetArgs),
    /// Create a map and pin it to bpffs
    Create(CreateCommand),
    /// Print the entry count periodically until ctrl-c
    Watch(WatchCommand),
    /// Print library and kernel versions
    Version,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Path of a pinned map
    #[arg(long, value_name = "PATH")]
    pin: Option<PathBuf>,
    /// Kernel map id
    #[arg(long, value_name = "ID")]
    id: Option<u32>,
}

impl TargetArgs {
    fn target(self) -> Result<MapTarget> {
        match (self.pin, self.id) {
            (Some(path), None) => Ok(MapTarget::Pin(path)),
            (None, Some(id)) => Ok(MapTarget::Id(id)),
            _ => bail!("exactly one of --pin or --id is required"),
        }
    }
}

#[derive(Args)]
struct BatchDumpCommand {
    #[command(flatten)]
    target: TargetArgs,
    /// Entries requested per kernel call. Doubled on the fly when a hash
    /// bucket holds more entries than this
    #[arg(long, default_value_t = 64)]
    chunk: u32,
}

#[derive(Args)]
struct DeleteCommand {
    #[command(flatten)]
    target: TargetArgs,
    /// Key bytes in hex, e.g. 0x01000000
    #[arg(long, value_name = "HEX")]
    key: String,
}

#[derive(Args)]
struct CreateCommand {
    /// bpffs path to pin the new map at
    #[arg(long, value_name = "PATH")]
    pin: PathBuf,
    /// Numeric map type (1 = hash, 2 = array, ...)
    #[arg(long = "type", value_name = "TYPE")]
    map_type: u32,
    #[arg(long, value_name = "BYTES")]
    key_size: u32,
    #[arg(long, value_name = "BYTES")]
    value_size: u32,
    #[arg(long, value_name = "COUNT")]
    max_entries: u32,
    /// Object name, truncated to 15 bytes
    #[arg(long)]
    name: Option<String>,
    /// Raw map_flags value
    #[arg(long, default_value_t = 0)]
    flags: u32,
}

#[derive(Args)]
struct WatchCommand {
    #[command(flatten)]
    target: TargetArgs,
    /// Seconds between entry counts
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("bpfmap error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Info(args)) => print_json(&inspect::show_info(&args.target()?)?)?,
        Some(Commands::List) => print_json(&inspect::list_maps()?)?,
        Some(Commands::Dump(args)) => print_json(&inspect::dump_map(&args.target()?)?)?,
        Some(Commands::BatchDump(cmd)) => {
            print_json(&inspect::batch_dump(&cmd.target.target()?, cmd.chunk)?)?
        }
        Some(Commands::Delete(cmd)) => inspect::delete_key(&cmd.target.target()?, &cmd.key)?,
        Some(Commands::Freeze(args)) => inspect::freeze_map(&args.target()?)?,
        Some(Commands::Create(cmd)) => {
            let opts = CreateOptions {
                pin_path: cmd.pin,
                map_type: cmd.map_type,
                key_size: cmd.key_size,
                value_size: cmd.value_size,
                max_entries: cmd.max_entries,
                name: cmd.name,
                map_flags: cmd.flags,
            };
            print_json(&inspect::create_map(&opts)?)?;
        }
        Some(Commands::Watch(cmd)) => {
            let interval = Duration::from_secs(cmd.interval_secs.max(1));
            watch::watch_map(&cmd.target.target()?, interval).await?;
        }
        Some(Commands::Version) => println!("{}", bpfmap::version()),
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
