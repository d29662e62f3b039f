use std::fmt;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::classify::{Classifier, FailureDefaults, classify_failure};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::events::{Event, Outcome, ProgressRecord, emit};
use crate::launcher::{Invocation, Launcher, SupervisedChild};
use crate::progress::{MultiplexEnd, ProgressPolicy, StatusMultiplexer};

/// Everything a controller needs to run one apt-get operation.
#[derive(Clone)]
pub struct CommandSpec {
    pub invocation: Invocation,
    pub policy: ProgressPolicy,
    /// Message of the final 100% progress event.
    pub completion_message: String,
    /// Reported once, after the final progress event, on exit code 0.
    pub outcome: Outcome,
    pub failure: FailureDefaults,
    /// Message for failures that are not the command's own (I/O, spawn).
    pub internal_message: String,
    pub classifier: Option<Classifier>,
    /// Wall-clock limit; the child is killed once it passes.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(
        invocation: Invocation,
        completion_message: impl Into<String>,
        outcome: Outcome,
        failure: FailureDefaults,
        internal_message: impl Into<String>,
    ) -> Self {
        Self {
            invocation,
            policy: ProgressPolicy::Monotonic,
            completion_message: completion_message.into(),
            outcome,
            failure,
            internal_message: internal_message.into(),
            classifier: None,
            timeout: None,
        }
    }

    pub fn policy(mut self, policy: ProgressPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("invocation", &self.invocation)
            .field("policy", &self.policy)
            .field("completion_message", &self.completion_message)
            .field("outcome", &self.outcome)
            .field("failure", &self.failure)
            .field("internal_message", &self.internal_message)
            .field("classifier", &self.classifier.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Run `spec` with the status channel attached as fd 3, streaming progress.
///
/// On exit code 0 the final progress record and the outcome are emitted and
/// `Ok` is returned. Every other path returns exactly one [`BridgeError`] and
/// emits no outcome. The status pipe, the child and its output collectors are
/// released before this returns.
pub async fn run_with_status_channel<L: Launcher>(
    launcher: &L,
    spec: &CommandSpec,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    drive(launcher, spec, events)
        .await
        .map_err(|err| into_bridge_error(err, &spec.internal_message))
}

async fn drive<L: Launcher>(
    launcher: &L,
    spec: &CommandSpec,
    events: &UnboundedSender<Event>,
) -> anyhow::Result<()> {
    let command = spec.invocation.command_line();

    let (mut reader, writer) = launcher
        .open_status_pipe()
        .context("failed to create status pipe")?;
    let spawned = launcher.spawn_with_status(&spec.invocation, &writer);
    // The child holds its own copy; ours must go so EOF is observable.
    drop(writer);
    let mut child = spawned.with_context(|| format!("failed to spawn `{command}`"))?;

    let deadline = spec.timeout.map(|limit| Instant::now() + limit);
    let end = StatusMultiplexer::new(spec.policy)
        .run(&mut reader, &mut child, deadline, events)
        .await?;
    drop(reader);

    let status = match end {
        MultiplexEnd::Exited(status) => status,
        MultiplexEnd::DeadlineExceeded => {
            let limit = spec.timeout.unwrap_or_default();
            warn!(%command, ?limit, "deadline exceeded; killing apt-get");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill apt-get");
            }
            return Err(BridgeError::new(
                ErrorCode::Timeout,
                format!("Operation timed out after {}", describe_duration(limit)),
            )
            .into());
        }
    };

    if status.success() {
        info!(%command, "apt-get finished");
        emit(
            events,
            Event::Progress(ProgressRecord::new(100, spec.completion_message.clone())),
        );
        emit(events, Event::Outcome(spec.outcome.clone()));
        return Ok(());
    }

    info!(%command, code = ?status.code(), "apt-get failed");
    let diagnostics = child.diagnostics().await;
    Err(classify_failure(&diagnostics, spec.classifier.as_ref(), &spec.failure).into())
}

/// Pass typed errors through; wrap anything else once as an internal error.
pub(crate) fn into_bridge_error(err: anyhow::Error, internal_message: &str) -> BridgeError {
    match err.downcast::<BridgeError>() {
        Ok(typed) => typed,
        Err(other) => {
            let cause = format!("{other:#}");
            warn!(error = %cause, "unexpected failure");
            BridgeError::internal(internal_message, cause)
        }
    }
}

/// Human-readable duration for timeout messages: whole minutes when exact.
pub(crate) fn describe_duration(limit: Duration) -> String {
    match limit.as_secs() {
        0 => format!("{} ms", limit.as_millis()),
        1 => "1 second".to_string(),
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}
