use std::sync::Arc;

use tracing::debug;

use crate::error::{BridgeError, ErrorCode};

/// Operation-specific failure classifier.
///
/// Receives the captured diagnostic text of a failed run and returns a typed
/// error, or `None` to fall through to the shared rules.
pub type Classifier = Arc<dyn Fn(&str) -> Option<BridgeError> + Send + Sync>;

/// Signatures of another process holding the dpkg/apt locks.
pub const LOCK_SIGNATURES: &[&str] = &[
    "dpkg was interrupted",
    "Could not get lock",
    "Unable to acquire the dpkg frontend lock",
];

/// Signatures of apt refusing to proceed for lack of disk space.
pub const DISK_FULL_SIGNATURES: &[&str] = &["You don't have enough free space"];

/// Generic error a command reports when nothing more specific matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDefaults {
    pub code: ErrorCode,
    pub message: String,
}

impl FailureDefaults {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Rules shared by every operation, checked in priority order.
pub fn shared_rules(text: &str) -> Option<BridgeError> {
    if contains_any(text, LOCK_SIGNATURES) {
        return Some(BridgeError::locked(text));
    }
    if contains_any(text, DISK_FULL_SIGNATURES) {
        return Some(BridgeError::disk_full(text));
    }
    None
}

/// Classify the diagnostic text of a failed run.
///
/// The command's own classifier goes first: its signatures (e.g. "Unable to
/// locate package") are more specific than the shared lock/disk-space
/// substrings, which may appear coincidentally in unrelated output.
pub fn classify_failure(
    text: &str,
    custom: Option<&Classifier>,
    fallback: &FailureDefaults,
) -> BridgeError {
    if let Some(err) = custom.and_then(|classify| classify(text)) {
        debug!(code = %err.code, "failure matched command classifier");
        return err;
    }
    if let Some(err) = shared_rules(text) {
        debug!(code = %err.code, "failure matched shared rule");
        return err;
    }
    debug!(code = %fallback.code, "failure unclassified; using command default");
    BridgeError::new(fallback.code, fallback.message.clone()).with_details(text)
}

fn contains_any(text: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|signature| text.contains(signature))
}
