use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::classify::FailureDefaults;
use crate::config::BridgeConfig;
use crate::controller::{CommandSpec, run_with_status_channel};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::events::{Event, Outcome};
use crate::launcher::Launcher;
use crate::package::validate_package_name;
use crate::progress::ProgressPolicy;

use super::{CONFFILE_OPTIONS, apt_get, status_channel_args};

/// Options for the install command (clap-free).
#[derive(Debug, Clone)]
pub struct InstallOpts {
    pub package: String,
}

pub fn build_install_spec(config: &BridgeConfig, package: &str) -> CommandSpec {
    let invocation = apt_get(config, "install")
        .args(status_channel_args())
        .args(CONFFILE_OPTIONS.iter().copied())
        .arg(package);

    let name = package.to_string();
    CommandSpec::new(
        invocation,
        "Installation complete",
        Outcome::success(format!("Successfully installed {package}")).with_package(package),
        FailureDefaults::new(
            ErrorCode::InstallFailed,
            format!("Failed to install package '{package}'"),
        ),
        format!("Error installing '{package}'"),
    )
    .policy(ProgressPolicy::Monotonic)
    .classifier(Arc::new(move |text: &str| {
        text.contains("Unable to locate package")
            .then(|| BridgeError::package_not_found(&name))
    }))
}

/// Install one package, streaming progress to `events`.
pub async fn run<L: Launcher>(
    launcher: &L,
    config: &BridgeConfig,
    opts: &InstallOpts,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    validate_package_name(&opts.package)?;
    let spec = build_install_spec(config, &opts.package);
    run_with_status_channel(launcher, &spec, events).await
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::testing::{FakeLauncher, collect, outcomes, percentages};

    fn opts(package: &str) -> InstallOpts {
        InstallOpts {
            package: package.to_string(),
        }
    }

    #[test]
    fn test_install_argv() {
        let spec = build_install_spec(&BridgeConfig::default(), "nginx");
        assert_eq!(
            spec.invocation.command_line(),
            "apt-get install -y -o APT::Status-Fd=3 \
             -o Dpkg::Options::=--force-confdef -o Dpkg::Options::=--force-confold nginx"
        );
        assert_eq!(spec.policy, ProgressPolicy::Monotonic);
        assert!(spec.timeout.is_none());
    }

    #[tokio::test]
    async fn test_install_success() {
        let launcher = FakeLauncher::exiting(0)
            .with_status("pmstatus:nginx:20:Preparing nginx\npmstatus:nginx:80:Configuring nginx\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(&launcher, &BridgeConfig::default(), &opts("nginx"), &tx)
            .await
            .unwrap();

        let events = collect(&mut rx);
        assert_eq!(percentages(&events), vec![20, 80, 100]);
        assert_eq!(
            serde_json::to_string(events.last().unwrap()).unwrap(),
            r#"{"success":true,"message":"Successfully installed nginx","package_name":"nginx"}"#
        );
    }

    #[tokio::test]
    async fn test_install_package_not_found() {
        let launcher =
            FakeLauncher::exiting(100).with_stderr("E: Unable to locate package nosuchpkg\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = run(&launcher, &BridgeConfig::default(), &opts("nosuchpkg"), &tx)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::PackageNotFound);
        assert_eq!(err.message, "Package not found: nosuchpkg");
        assert_eq!(err.details.as_deref(), Some("nosuchpkg"));
        assert_eq!(outcomes(&collect(&mut rx)), 0);
    }

    #[tokio::test]
    async fn test_install_disk_full() {
        let launcher = FakeLauncher::exiting(100)
            .with_stderr("E: You don't have enough free space in /var/cache/apt/archives/.\n");
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&launcher, &BridgeConfig::default(), &opts("texlive-full"), &tx)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::DiskFull);
    }

    #[tokio::test]
    async fn test_install_invalid_name_spawns_nothing() {
        let launcher = FakeLauncher::exiting(0);
        let (tx, _rx) = mpsc::unbounded_channel();

        for name in ["../etc/passwd", "pkg;rm -rf /", "-o"] {
            let err = run(&launcher, &BridgeConfig::default(), &opts(name), &tx)
                .await
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidPackageName);
        }
        assert_eq!(launcher.spawn_count(), 0);
    }
}
