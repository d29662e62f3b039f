//! Package-list refresh (`apt-get update`).
//!
//! `update` has no status channel. Progress is inferred from the numbered
//! source lines apt-get prints to stdout, and the whole run is bounded by a
//! deadline because a dead mirror can stall it indefinitely.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::classify::classify_failure;
use crate::controller::{CommandSpec, describe_duration, into_bridge_error};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::events::{Event, ProgressRecord, emit};
use crate::launcher::{Launcher, SupervisedChild};

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(300);

/// Characters of the source description kept in progress messages.
const SOURCE_PREVIEW: usize = 60;

// safety: this regex is valid and tested
static SOURCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Get|Hit|Ign):(\d+)\s+(.+)").expect("valid regex"));

/// Running estimate of how many sources have been fetched.
///
/// The highest source number seen so far is taken as the total, so early
/// percentages overshoot until the last source has been announced.
#[derive(Debug, Default)]
pub struct SourceProgress {
    total: u64,
    completed: u64,
}

impl SourceProgress {
    pub fn observe(&mut self, line: &str) -> Option<ProgressRecord> {
        let caps = SOURCE_LINE.captures(line)?;
        let number: u64 = caps[2].parse().ok()?;

        self.total = self.total.max(number);
        if &caps[1] != "Ign" {
            self.completed = number;
        }
        if self.total == 0 {
            return None;
        }

        // Source numbers come from the child's output and may be arbitrarily large.
        let percentage = (u128::from(self.completed) * 100 / u128::from(self.total)).min(100) as u8;
        let source: String = caps[3].chars().take(SOURCE_PREVIEW).collect();
        Some(ProgressRecord::new(percentage, format!("Updating: {source}...")))
    }
}

/// Run `spec` with stdout and stderr merged, inferring progress from the
/// output. `spec.timeout` defaults to [`DEFAULT_REFRESH_TIMEOUT`]; the
/// status-channel policy is not used.
pub async fn run_refresh<L: Launcher>(
    launcher: &L,
    spec: &CommandSpec,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    refresh(launcher, spec, events)
        .await
        .map_err(|err| into_bridge_error(err, &spec.internal_message))
}

async fn refresh<L: Launcher>(
    launcher: &L,
    spec: &CommandSpec,
    events: &UnboundedSender<Event>,
) -> anyhow::Result<()> {
    let command = spec.invocation.command_line();
    let limit = spec.timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT);

    let (mut child, output) = launcher
        .spawn_merged(&spec.invocation)
        .with_context(|| format!("failed to spawn `{command}`"))?;

    let mut lines = Vec::new();
    let mut progress = SourceProgress::default();

    // The deadline covers reading as well as waiting: a stalled fetch never
    // closes the output pipe.
    let finished = tokio::time::timeout(limit, async {
        let mut reader = BufReader::new(output);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .context("failed reading apt-get output")?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf).trim().to_string();
            if let Some(record) = progress.observe(&line) {
                emit(events, Event::Progress(record));
            }
            lines.push(line);
        }
        let status = child.wait().await.context("failed waiting for apt-get")?;
        anyhow::Ok(status)
    })
    .await;

    let status = match finished {
        Ok(status) => status?,
        Err(_) => {
            warn!(%command, ?limit, "refresh deadline exceeded; killing apt-get");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill apt-get");
            }
            return Err(BridgeError::new(
                ErrorCode::Timeout,
                format!("Package list update timed out after {}", describe_duration(limit)),
            )
            .into());
        }
    };

    if status.success() {
        info!(%command, sources = progress.total, "package lists refreshed");
        emit(
            events,
            Event::Progress(ProgressRecord::new(100, spec.completion_message.clone())),
        );
        emit(events, Event::Outcome(spec.outcome.clone()));
        return Ok(());
    }

    info!(%command, code = ?status.code(), "refresh failed");
    let output = lines.join("\n");
    Err(classify_failure(&output, spec.classifier.as_ref(), &spec.failure).into())
}
