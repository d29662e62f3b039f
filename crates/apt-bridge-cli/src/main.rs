mod cli;
mod logging;
mod render;

use anyhow::{Context, Result};
use apt_bridge_core::commands::{install, remove, update, upgrade};
use apt_bridge_core::config::BridgeConfig;
use apt_bridge_core::events::Event;
use apt_bridge_core::launcher::{Launcher, SystemLauncher};
use apt_bridge_core::progress::ProgressPolicy;
use apt_bridge_core::{BridgeError, ErrorCode};
use clap::Parser;
use cli::{Cli, Commands};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Exit code for a classified failure reported on stderr.
const EXIT_FAILURE: i32 = 1;
/// Exit code for anything the bridge could not classify.
const EXIT_INTERNAL: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `completion` needs no configuration; handle it early
    if let Commands::Completion(args) = &cli.command {
        clap_complete::generate(
            args.shell,
            &mut <Cli as clap::CommandFactory>::command(),
            "apt-bridge",
            &mut std::io::stdout(),
        );
        return;
    }

    if let Err(err) = run(cli).await {
        let (report, code) = match err.downcast::<BridgeError>() {
            Ok(typed) => (typed, EXIT_FAILURE),
            Err(other) => (
                BridgeError::new(ErrorCode::InternalError, "Unexpected error")
                    .with_details(format!("{other:#}")),
                EXIT_INTERNAL,
            ),
        };
        render::print_error(&report);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BridgeConfig::discover(cli.config.as_deref(), |key| std::env::var(key).ok())?;
    if let Some(program) = cli.apt_get {
        config.apt_get = program;
    }
    if let Some(secs) = cli.update_timeout {
        config.update_timeout_secs = secs;
    }

    let _guard = logging::init(config.log_file.as_deref())?;
    debug!(?config, "configuration resolved");

    let (tx, writer) = render::spawn_json_writer();
    let result = dispatch(&SystemLauncher, &config, cli.command, &tx).await;
    drop(tx);
    let written = writer.await.context("Event writer task failed")?;

    result?;
    written
}

async fn dispatch<L: Launcher>(
    launcher: &L,
    config: &BridgeConfig,
    command: Commands,
    events: &UnboundedSender<Event>,
) -> apt_bridge_core::Result<()> {
    match command {
        Commands::Install(args) => {
            let opts = install::InstallOpts {
                package: args.package,
            };
            install::run(launcher, config, &opts, events).await
        }
        Commands::Remove(args) => {
            let opts = remove::RemoveOpts {
                package: args.package,
            };
            remove::run(launcher, config, &opts, events).await
        }
        Commands::Upgrade(args) => {
            let opts = upgrade::UpgradeOpts {
                policy: args.monotonic.then_some(ProgressPolicy::Monotonic),
            };
            upgrade::run(launcher, config, &opts, events).await
        }
        Commands::Update => update::run(launcher, config, events).await,
        Commands::Completion(_) => unreachable!("completion handled above"),
    }
}
