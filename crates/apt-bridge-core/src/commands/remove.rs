use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::classify::FailureDefaults;
use crate::config::BridgeConfig;
use crate::controller::{CommandSpec, run_with_status_channel};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::events::{Event, Outcome};
use crate::launcher::Launcher;
use crate::package::validate_package_name;

use super::{apt_get, status_channel_args};

/// Signatures of apt-get refusing to remove something it does not know.
const NOT_FOUND_SIGNATURES: &[&str] = &["Unable to locate package", "is not installed"];

/// Options for the remove command (clap-free).
#[derive(Debug, Clone)]
pub struct RemoveOpts {
    pub package: String,
}

pub fn build_remove_spec(config: &BridgeConfig, package: &str) -> CommandSpec {
    let invocation = apt_get(config, "remove")
        .args(status_channel_args())
        .arg(package);

    let name = package.to_string();
    CommandSpec::new(
        invocation,
        "Removal complete",
        Outcome::success(format!("Successfully removed {package}")).with_package(package),
        FailureDefaults::new(
            ErrorCode::RemoveFailed,
            format!("Failed to remove package '{package}'"),
        ),
        format!("Error removing '{package}'"),
    )
    .classifier(Arc::new(move |text: &str| {
        NOT_FOUND_SIGNATURES
            .iter()
            .any(|signature| text.contains(signature))
            .then(|| BridgeError::package_not_found(&name))
    }))
}

/// Remove one package. Protected packages are refused before anything is
/// spawned.
pub async fn run<L: Launcher>(
    launcher: &L,
    config: &BridgeConfig,
    opts: &RemoveOpts,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    validate_package_name(&opts.package)?;
    if let Err(err) = config.protected().check_removable(&opts.package) {
        warn!(package = %opts.package, "refusing to remove protected package");
        return Err(err);
    }
    let spec = build_remove_spec(config, &opts.package);
    run_with_status_channel(launcher, &spec, events).await
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::testing::{FakeLauncher, collect, outcomes, percentages};

    fn opts(package: &str) -> RemoveOpts {
        RemoveOpts {
            package: package.to_string(),
        }
    }

    #[test]
    fn test_remove_argv() {
        let spec = build_remove_spec(&BridgeConfig::default(), "vim");
        assert_eq!(
            spec.invocation.command_line(),
            "apt-get remove -y -o APT::Status-Fd=3 vim"
        );
        assert_eq!(spec.completion_message, "Removal complete");
    }

    #[tokio::test]
    async fn test_remove_success() {
        let launcher = FakeLauncher::exiting(0).with_status("pmstatus:vim:50:Removing vim\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(&launcher, &BridgeConfig::default(), &opts("vim"), &tx)
            .await
            .unwrap();

        let events = collect(&mut rx);
        assert_eq!(percentages(&events), vec![50, 100]);
        assert_eq!(
            serde_json::to_string(events.last().unwrap()).unwrap(),
            r#"{"success":true,"message":"Successfully removed vim","package_name":"vim"}"#
        );
    }

    #[tokio::test]
    async fn test_remove_essential_package_spawns_nothing() {
        let launcher = FakeLauncher::exiting(0);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = run(&launcher, &BridgeConfig::default(), &opts("dpkg"), &tx)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::EssentialPackage);
        assert_eq!(err.message, "Cannot remove essential package 'dpkg'");
        assert_eq!(launcher.spawn_count(), 0);
        assert!(launcher.closes.entries().is_empty());
        assert!(collect(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_remove_configured_protected_package() {
        let config = BridgeConfig {
            protected_packages: vec!["openssh-server".to_string()],
            ..BridgeConfig::default()
        };
        let launcher = FakeLauncher::exiting(0);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&launcher, &config, &opts("openssh-server"), &tx)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::EssentialPackage);
        assert_eq!(launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_not_installed() {
        let launcher = FakeLauncher::exiting(100)
            .with_stderr("Package 'cowsay' is not installed, so not removed\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = run(&launcher, &BridgeConfig::default(), &opts("cowsay"), &tx)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::PackageNotFound);
        assert_eq!(outcomes(&collect(&mut rx)), 0);
    }

    #[tokio::test]
    async fn test_remove_generic_failure() {
        let launcher = FakeLauncher::exiting(100).with_stderr("E: Sub-process returned an error\n");
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&launcher, &BridgeConfig::default(), &opts("vim"), &tx)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::RemoveFailed);
        assert_eq!(err.message, "Failed to remove package 'vim'");
    }
}
