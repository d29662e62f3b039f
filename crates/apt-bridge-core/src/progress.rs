//! Progress multiplexer: turns bytes arriving on the status channel into a
//! policy-filtered sequence of progress events while the child runs.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::events::{Event, ProgressRecord, emit};
use crate::launcher::SupervisedChild;
use crate::status::parse_status_line;

/// Upper bound on a single wait for the status channel to become readable.
///
/// The child's exit must be noticed even when it never writes a status line,
/// so every iteration of the loop returns to the exit check within this time.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of bytes taken from the channel per read.
const READ_CHUNK: usize = 1024;

/// Longest unterminated line kept while waiting for its `\n`.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Rule deciding which decoded records are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPolicy {
    /// Report only percentages strictly greater than the last reported one.
    #[default]
    Monotonic,
    /// Report every record. For operations whose percentage restarts per
    /// package, like a multi-package upgrade.
    Raw,
}

/// Applies a [`ProgressPolicy`] to a stream of records.
#[derive(Debug, Clone)]
pub struct ProgressFilter {
    policy: ProgressPolicy,
    last: u8,
}

impl ProgressFilter {
    pub fn new(policy: ProgressPolicy) -> Self {
        Self { policy, last: 0 }
    }

    /// Whether `record` should be reported. Updates the last reported value.
    pub fn accept(&mut self, record: &ProgressRecord) -> bool {
        let report = match self.policy {
            ProgressPolicy::Monotonic => record.percentage > self.last,
            ProgressPolicy::Raw => true,
        };
        if report {
            self.last = record.percentage;
        }
        report
    }
}

/// Carry-over buffer that yields complete `\n`-terminated lines.
///
/// Works on bytes so a multi-byte character split across two reads is decoded
/// once both halves have arrived. A partial line longer than [`MAX_LINE_LEN`]
/// is dropped along with the rest of it up to the next terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no terminator.
    scanned: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                lines.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_LEN {
            debug!(bytes = self.buffer.len(), "dropping oversized status line");
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// Bytes received after the last line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// How the multiplexer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexEnd {
    Exited(ExitStatus),
    /// The deadline passed while the child was still running.
    DeadlineExceeded,
}

/// Status-channel reader state for one invocation.
#[derive(Debug)]
pub struct StatusMultiplexer {
    lines: LineBuffer,
    filter: ProgressFilter,
}

impl StatusMultiplexer {
    pub fn new(policy: ProgressPolicy) -> Self {
        Self {
            lines: LineBuffer::default(),
            filter: ProgressFilter::new(policy),
        }
    }

    /// Feed raw channel bytes; returns the records to report, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressRecord> {
        let mut accepted = Vec::new();
        for line in self.lines.push(chunk) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(record) = parse_status_line(line) else {
                trace!(line, "ignoring non-progress status line");
                continue;
            };
            if self.filter.accept(&record) {
                accepted.push(record);
            }
        }
        accepted
    }

    /// Read the channel until the child exits or `deadline` passes.
    ///
    /// Each iteration checks for exit, then waits at most [`POLL_INTERVAL`]
    /// for the channel. Once the channel reports EOF only the exit check and
    /// the deadline remain. After exit, whatever is already buffered in the
    /// channel is read for at most one more interval; later lines are lost.
    pub async fn run<R, C>(
        &mut self,
        reader: &mut R,
        child: &mut C,
        deadline: Option<Instant>,
        events: &UnboundedSender<Event>,
    ) -> anyhow::Result<MultiplexEnd>
    where
        R: AsyncRead + Unpin,
        C: SupervisedChild,
    {
        let mut chunk = [0u8; READ_CHUNK];
        let mut channel_open = true;

        loop {
            if let Some(status) = child.try_wait().context("failed polling apt-get for exit")? {
                if channel_open {
                    self.drain(reader, &mut chunk, events).await;
                }
                return Ok(MultiplexEnd::Exited(status));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(MultiplexEnd::DeadlineExceeded);
            }
            if !channel_open {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            match tokio::time::timeout(POLL_INTERVAL, reader.read(&mut chunk)).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    debug!(pending = self.lines.pending(), "status channel closed");
                    channel_open = false;
                }
                Ok(Ok(n)) => self.report(&chunk[..n], events),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e).context("failed reading status channel"),
            }
        }
    }

    async fn drain<R>(&mut self, reader: &mut R, chunk: &mut [u8], events: &UnboundedSender<Event>)
    where
        R: AsyncRead + Unpin,
    {
        let until = Instant::now() + POLL_INTERVAL;
        loop {
            match tokio::time::timeout_at(until, reader.read(chunk)).await {
                Ok(Ok(n)) if n > 0 => self.report(&chunk[..n], events),
                _ => break,
            }
        }
    }

    fn report(&mut self, chunk: &[u8], events: &UnboundedSender<Event>) {
        for record in self.feed(chunk) {
            emit(events, Event::Progress(record));
        }
    }
}
