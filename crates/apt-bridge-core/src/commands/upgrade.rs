use tokio::sync::mpsc::UnboundedSender;

use crate::classify::FailureDefaults;
use crate::config::BridgeConfig;
use crate::controller::{CommandSpec, run_with_status_channel};
use crate::error::{ErrorCode, Result};
use crate::events::{Event, Outcome};
use crate::launcher::Launcher;
use crate::progress::ProgressPolicy;

use super::{CONFFILE_OPTIONS, apt_get, status_channel_args};

/// Options for the upgrade command (clap-free).
#[derive(Debug, Clone, Default)]
pub struct UpgradeOpts {
    /// Overrides the configured progress policy when set.
    pub policy: Option<ProgressPolicy>,
}

pub fn build_upgrade_spec(config: &BridgeConfig, opts: &UpgradeOpts) -> CommandSpec {
    let invocation = apt_get(config, "upgrade")
        .args(status_channel_args())
        .args(CONFFILE_OPTIONS.iter().copied());

    CommandSpec::new(
        invocation,
        "Upgrade complete",
        Outcome::success("Upgrade complete"),
        FailureDefaults::new(ErrorCode::UpgradeFailed, "Failed to upgrade packages"),
        "Error upgrading packages",
    )
    .policy(opts.policy.unwrap_or(config.upgrade_progress))
}

/// Upgrade every upgradable package.
pub async fn run<L: Launcher>(
    launcher: &L,
    config: &BridgeConfig,
    opts: &UpgradeOpts,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    let spec = build_upgrade_spec(config, opts);
    run_with_status_channel(launcher, &spec, events).await
}
