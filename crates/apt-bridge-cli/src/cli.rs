use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// apt-bridge: run apt-get and stream its progress as JSON lines
///
/// Progress and the final result go to stdout, one JSON object per line.
/// Failures are reported on stderr as a JSON object with a stable error code.
#[derive(Parser, Debug)]
#[command(name = "apt-bridge", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (overrides APT_BRIDGE_CONFIG and /etc/apt-bridge/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// apt-get program to run (overrides APT_BRIDGE_APT_GET and the apt_get config key)
    #[arg(long, global = true)]
    pub apt_get: Option<PathBuf>,

    /// Deadline for `update`, in seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub update_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a package
    Install(PackageArgs),

    /// Remove a package (essential packages are refused)
    Remove(PackageArgs),

    /// Upgrade all upgradable packages
    Upgrade(UpgradeArgs),

    /// Refresh the package lists
    Update,

    /// Generate shell completions
    Completion(CompletionArgs),
}

#[derive(Args, Debug)]
pub struct PackageArgs {
    /// Package name
    pub package: String,
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Only report increasing percentages (default follows upgrade_progress config)
    #[arg(long)]
    pub monotonic: bool,
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
