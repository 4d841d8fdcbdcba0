mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use keybank::KeybankConfig;
use nix::sys::stat::{umask, Mode};
use tracing_subscriber::EnvFilter;

use commands::{Target, Transfer};

#[derive(Parser)]
#[command(name = "keybank")]
#[command(version = "0.1.0")]
#[command(about = "Encrypted offline backups of keys and other secrets", long_about = None)]
struct Cli {
    /// Configuration file (default: /etc/keybank.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Name of an attached keybank
    name: Option<String>,

    /// Use an already mounted keybank directory instead of a name
    #[arg(long, conflicts_with = "name")]
    root: Option<PathBuf>,
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        Target {
            name: args.name,
            root: args.root,
        }
    }
}

#[derive(Args)]
struct TransferArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Source (backup) or target (restore) directory
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Machine scope to include besides _common
    #[arg(short, long)]
    machine: Option<String>,

    /// Include the GPG keyring store
    #[arg(long)]
    include_gpg: bool,

    /// Log what would be done without changing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an encrypted volume and lay out the stores in it
    Create {
        /// Path of the new image file; its file name names the keybank
        path: PathBuf,

        /// Image size in MiB
        #[arg(short, long, default_value_t = 128)]
        size: u64,
    },

    /// Lay out the stores in an existing, mounted directory
    Init {
        /// Directory to initialize
        directory: PathBuf,
    },

    /// Open and mount an encrypted volume
    Attach {
        /// Path of the image file
        path: PathBuf,
    },

    /// Unmount and close an attached keybank
    Detach {
        /// Name of the keybank
        name: String,
    },

    /// Record the current state of every store
    Commit {
        #[command(flatten)]
        target: TargetArgs,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        /// Show what would be recorded without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show changes not yet committed
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Copy manifest-selected files into the keybank
    Backup {
        #[command(flatten)]
        args: TransferArgs,
    },

    /// Copy backed-up files out of the keybank
    Restore {
        #[command(flatten)]
        args: TransferArgs,
    },

    /// Check repositories, files and keyrings
    Verify {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Derive a subkey-only keyring from a keyring in the gpg store
    GpgExport {
        #[command(flatten)]
        target: TargetArgs,

        /// Keyring directory name inside gpg/
        #[arg(short, long)]
        keyring: String,
    },
}

impl TransferArgs {
    fn into_transfer(self, config: &KeybankConfig) -> (Target, Transfer) {
        let transfer = Transfer {
            directory: self
                .directory
                .unwrap_or_else(|| config.default_directory.clone()),
            machine: self.machine.or_else(|| config.machine.clone()),
            include_gpg: self.include_gpg || config.include_gpg,
            dry_run: self.dry_run,
        };
        (self.target.into(), transfer)
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    umask(Mode::from_bits_truncate(0o077));

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = KeybankConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Create { path, size } => commands::create(&path, size, &config)?,
        Commands::Init { directory } => commands::init(&directory)?,
        Commands::Attach { path } => commands::attach(&path, &config)?,
        Commands::Detach { name } => commands::detach(&name, &config)?,
        Commands::Commit {
            target,
            message,
            dry_run,
        } => commands::commit(&target.into(), message.as_deref(), dry_run, &config)?,
        Commands::Status { target } => commands::status(&target.into(), &config)?,
        Commands::Backup { args } => {
            let (target, transfer) = args.into_transfer(&config);
            commands::backup(&target, &transfer, &config)?
        }
        Commands::Restore { args } => {
            let (target, transfer) = args.into_transfer(&config);
            commands::restore(&target, &transfer, &config)?
        }
        Commands::Verify { target } => commands::verify(&target.into(), &config)?,
        Commands::GpgExport { target, keyring } => {
            commands::gpg_export(&target.into(), &keyring, &config)?
        }
    }
    Ok(())
}
