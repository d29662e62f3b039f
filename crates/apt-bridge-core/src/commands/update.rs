use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::classify::FailureDefaults;
use crate::config::BridgeConfig;
use crate::controller::CommandSpec;
use crate::error::{BridgeError, ErrorCode, Result};
use crate::events::{Event, Outcome};
use crate::launcher::Launcher;
use crate::refresh::run_refresh;

use super::apt_get;

/// Signature of a source host that could not be resolved.
const NETWORK_SIGNATURE: &str = "Could not resolve";

pub fn build_update_spec(config: &BridgeConfig) -> CommandSpec {
    CommandSpec::new(
        apt_get(config, "update"),
        "Package lists updated",
        Outcome::success("Successfully updated package lists"),
        FailureDefaults::new(ErrorCode::UpdateFailed, "Failed to update package lists"),
        "Error updating package lists",
    )
    .classifier(Arc::new(|text: &str| {
        text.contains(NETWORK_SIGNATURE)
            .then(|| BridgeError::network(text))
    }))
    .timeout(config.update_timeout())
}

/// Refresh the package lists.
pub async fn run<L: Launcher>(
    launcher: &L,
    config: &BridgeConfig,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    let spec = build_update_spec(config);
    run_refresh(launcher, &spec, events).await
}
