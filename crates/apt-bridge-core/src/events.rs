use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// One normalized progress update.
///
/// Serializes as the wire-level progress event:
/// `{"type":"progress","percentage":N,"message":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "progress")]
pub struct ProgressRecord {
    /// Always within `0..=100`.
    pub percentage: u8,
    pub message: String,
}

impl ProgressRecord {
    pub fn new(percentage: u8, message: impl Into<String>) -> Self {
        Self {
            percentage: percentage.min(100),
            message: message.into(),
        }
    }
}

/// Terminal success payload of an operation.
///
/// Always carries `success` and `message`; `package_name` only for
/// single-package operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            package_name: None,
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package_name = Some(package.into());
        self
    }
}

/// Events emitted by the bridge while an operation runs.
///
/// These decouple the process controllers from the output stream: the CLI
/// writes each event as one JSON line, tests collect them from the channel.
/// For one invocation, zero or more `Progress` events are followed by at most
/// one `Outcome`, and only when the operation succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Progress(ProgressRecord),
    Outcome(Outcome),
}

/// Send an event, ignoring send errors (the receiver may have been dropped).
pub fn emit(tx: &UnboundedSender<Event>, event: Event) {
    let _ = tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_wire_shape() {
        let event = Event::Progress(ProgressRecord::new(50, "Unpacking curl"));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"progress","percentage":50,"message":"Unpacking curl"}"#
        );
    }

    #[test]
    fn test_outcome_with_package_wire_shape() {
        let event = Event::Outcome(
            Outcome::success("Successfully installed curl").with_package("curl"),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"success":true,"message":"Successfully installed curl","package_name":"curl"}"#
        );
    }

    #[test]
    fn test_outcome_without_package_omits_field() {
        let json = serde_json::to_string(&Outcome::success("Upgrade complete")).unwrap();
        assert_eq!(json, r#"{"success":true,"message":"Upgrade complete"}"#);
    }

    #[test]
    fn test_progress_record_clamps_percentage() {
        assert_eq!(ProgressRecord::new(250, "x").percentage, 100);
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        emit(&tx, Event::Outcome(Outcome::success("done")));
    }
}
