use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::generate;
use colored::*;
use std::io;
use std::path::PathBuf;
use xcoder_core::{DeviceType, Registry};

use xcoder_manager::{cli_output, commands};

#[derive(Parser)]
#[command(name = "xcoder-rsrc")]
#[command(about = "Inspect and tear down the shared transcoder device registry")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase output verbosity (show debug messages)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Suppress informational output
    #[arg(short = 'Q', long = "quiet-all", global = true)]
    quiet_all: bool,

    /// YAML config file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Registry directory (overrides the config file)
    #[arg(short = 'd', long = "rsrc-dir", global = true)]
    rsrc_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered modules
    List {
        /// Only this type (decoder, encoder, scaler, ai)
        #[arg(short = 't', long = "type")]
        device_type: Option<DeviceType>,
    },

    /// Print the full record of every module
    ListAll,

    /// Print the full record of one module
    Info {
        /// Module type
        device_type: DeviceType,
        /// Module GUID
        guid: i32,
    },

    /// Find the module of a type on a device path
    Lookup {
        /// Device path, e.g. /dev/nvme0n1
        name: String,
        /// Module type
        #[arg(short = 't', long = "type", default_value = "decoder")]
        device_type: DeviceType,
    },

    /// Unregister every module of a device
    Remove {
        /// Device path, e.g. /dev/nvme0n1
        path: String,
    },

    /// Unregister all devices and delete the registry
    RemoveAll {
        /// Show what would be removed without removing it
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
    },

    /// Generate shell completion scripts
    #[command(hide = true)]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet_all {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("xcoder-rsrc v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run_command(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completion { shell } = cli.command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        generate(shell, &mut cmd, bin_name, &mut io::stdout());
        return Ok(());
    }

    let config = commands::load_config(cli.config.as_deref(), cli.rsrc_dir.as_deref())
        .context("loading configuration")?;
    let registry = Registry::new(config);
    log::debug!("registry at {}", registry.paths().root().display());

    let mut stdout = io::stdout().lock();
    match cli.command {
        Commands::List { device_type } => {
            let listed = commands::list::run_list(&registry, device_type, &mut stdout)?;
            if listed == 0 {
                cli_output::empty("No modules registered", None);
            }
        }
        Commands::ListAll => commands::list::run_list_all(&registry, &mut stdout)?,
        Commands::Info { device_type, guid } => {
            commands::list::run_info(&registry, device_type, guid, &mut stdout)
                .with_context(|| format!("reading {} {}", device_type, guid))?
        }
        Commands::Lookup { name, device_type } => {
            if commands::list::run_lookup(&registry, &name, device_type, &mut stdout)?.is_none() {
                std::process::exit(2);
            }
        }
        Commands::Remove { path } => {
            drop(stdout);
            commands::remove::run_remove(&registry, &path)?;
        }
        Commands::RemoveAll { dry_run } => {
            drop(stdout);
            commands::remove::run_remove_all(&registry, dry_run)?;
        }
        Commands::Completion { .. } => {}
    }
    Ok(())
}
