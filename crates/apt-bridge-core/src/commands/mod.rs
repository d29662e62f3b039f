pub mod install;
pub mod remove;
pub mod update;
pub mod upgrade;

use crate::config::BridgeConfig;
use crate::launcher::Invocation;
use crate::status::STATUS_FD;

/// Keep existing configuration files and take the maintainer's default for
/// new ones, so dpkg never prompts.
pub const CONFFILE_OPTIONS: &[&str] = &[
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

/// `apt-get <subcommand>` with the non-interactive environment every
/// operation runs under.
pub fn apt_get(config: &BridgeConfig, subcommand: &str) -> Invocation {
    Invocation::new(&config.apt_get)
        .arg(subcommand)
        .env("DEBIAN_FRONTEND", "noninteractive")
}

/// `-y -o APT::Status-Fd=3`, for operations reporting on the status channel.
pub fn status_channel_args() -> [String; 3] {
    [
        "-y".to_string(),
        "-o".to_string(),
        format!("APT::Status-Fd={STATUS_FD}"),
    ]
}
