//! Decoder for APT's `Status-Fd` side-channel protocol.
//!
//! With `-o APT::Status-Fd=N`, apt-get writes machine-readable lines to
//! descriptor `N` while it downloads and unpacks:
//!
//! ```text
//! dlstatus:1:20.5:Retrieving file 1 of 3
//! pmstatus:curl:50.0:Unpacking curl (7.88.1-10)
//! ```
//!
//! Each line is `kind:subject:percentage:message`, where the message may itself
//! contain colons.

use crate::events::ProgressRecord;

/// Descriptor number the status channel is installed as in the child.
pub const STATUS_FD: i32 = 3;

/// Line kinds that carry progress: package manager and download status.
const STATUS_KINDS: &[&str] = &["pmstatus", "dlstatus"];

/// Decode one status line into a progress record.
///
/// Returns `None` for anything that is not a progress line: empty input,
/// fewer than four fields, an unknown kind (e.g. `pmerror`, `pmconffile`), or
/// a percentage that is not a finite decimal number. The percentage is
/// truncated, not rounded, and clamped into `0..=100`.
pub fn parse_status_line(line: &str) -> Option<ProgressRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut fields = line.splitn(4, ':');
    let kind = fields.next()?;
    let subject = fields.next()?;
    let percent = fields.next()?;
    let message = fields.next()?;

    if !STATUS_KINDS.contains(&kind) {
        return None;
    }

    let value: f64 = percent.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let percentage = value.trunc().clamp(0.0, 100.0) as u8;

    let message = match message.trim() {
        "" => format!("Processing {subject}..."),
        text => text.to_string(),
    };

    Some(ProgressRecord::new(percentage, message))
}
