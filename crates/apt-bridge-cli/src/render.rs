use std::io::Write;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use apt_bridge_core::BridgeError;
use apt_bridge_core::events::Event;

/// Spawn the task that writes every event to stdout as one JSON line.
///
/// Drop the sender when done to let the loop finish, then await the handle.
pub fn spawn_json_writer() -> (mpsc::UnboundedSender<Event>, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move { write_loop(rx, std::io::stdout()).await });
    (tx, handle)
}

/// Write events as they arrive, flushing after each line so the caller sees
/// progress immediately.
pub async fn write_loop<W: Write>(mut rx: mpsc::UnboundedReceiver<Event>, mut out: W) -> Result<()> {
    while let Some(event) = rx.recv().await {
        serde_json::to_writer(&mut out, &event).context("Failed to encode event")?;
        out.write_all(b"\n").context("Failed to write event")?;
        out.flush().context("Failed to flush stdout")?;
    }
    Ok(())
}

/// Pretty-printed JSON error report.
pub fn format_error(err: &BridgeError) -> String {
    serde_json::to_string_pretty(&err.report()).unwrap_or_else(|_| {
        format!(r#"{{"error": "{}", "code": "{}"}}"#, err.message.escape_default(), err.code)
    })
}

pub fn print_error(err: &BridgeError) {
    eprintln!("{}", format_error(err));
}
