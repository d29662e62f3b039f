//! Scripted [`Launcher`] for controller tests.
//!
//! Every handle it hands out records its release into a shared [`CloseLog`],
//! so tests can check that descriptors and children are released on each
//! exit path.

use std::io::{self, Cursor};
use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::events::Event;
use crate::launcher::{Invocation, Launcher, SupervisedChild};

#[derive(Debug, Clone, Default)]
pub struct CloseLog(Arc<Mutex<Vec<&'static str>>>);

impl CloseLog {
    fn record(&self, what: &'static str) {
        self.0.lock().unwrap().push(what);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, what: &str) -> bool {
        self.entries().contains(&what)
    }
}

#[derive(Debug, Default)]
pub struct FakeLauncher {
    /// Bytes the child "writes" to the status channel.
    pub status: Vec<u8>,
    /// Bytes the child "writes" to merged stdout/stderr.
    pub merged: Vec<u8>,
    /// Exit code; `None` means the child never exits on its own.
    pub exit: Option<i32>,
    /// Number of `try_wait` calls that report the child as still running.
    pub polls_before_exit: usize,
    /// Text returned by [`SupervisedChild::diagnostics`].
    pub stderr: String,
    pub fail_pipe: bool,
    pub fail_spawn: bool,
    /// Status-channel reads fail with EIO.
    pub fail_read: bool,
    /// `try_wait` fails once the scripted polls are used up.
    pub fail_wait: bool,
    pub closes: CloseLog,
    pub spawned: Arc<Mutex<Vec<Invocation>>>,
    pub killed: Arc<AtomicBool>,
}

impl FakeLauncher {
    pub fn exiting(code: i32) -> Self {
        Self {
            exit: Some(code),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.as_bytes().to_vec();
        self
    }

    pub fn with_merged(mut self, output: &str) -> Self {
        self.merged = output.as_bytes().to_vec();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    fn reader(&self, bytes: &[u8]) -> FakeReader {
        FakeReader {
            data: Cursor::new(bytes.to_vec()),
            fail: self.fail_read,
            closes: self.closes.clone(),
        }
    }

    fn child(&self, invocation: &Invocation) -> io::Result<FakeChild> {
        if self.fail_spawn {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory (os error 2)",
            ));
        }
        self.spawned.lock().unwrap().push(invocation.clone());
        Ok(FakeChild {
            exit: self.exit,
            polls_left: self.polls_before_exit,
            fail_wait: self.fail_wait,
            stderr: self.stderr.clone(),
            killed: self.killed.clone(),
            closes: self.closes.clone(),
        })
    }
}

impl Launcher for FakeLauncher {
    type Reader = FakeReader;
    type Writer = FakeWriter;
    type Child = FakeChild;

    fn open_status_pipe(&self) -> io::Result<(FakeReader, FakeWriter)> {
        if self.fail_pipe {
            return Err(io::Error::other("Too many open files (os error 24)"));
        }
        let writer = FakeWriter {
            closes: self.closes.clone(),
        };
        Ok((self.reader(&self.status), writer))
    }

    fn spawn_with_status(&self, invocation: &Invocation, _status: &FakeWriter) -> io::Result<FakeChild> {
        self.child(invocation)
    }

    fn spawn_merged(&self, invocation: &Invocation) -> io::Result<(FakeChild, FakeReader)> {
        let child = self.child(invocation)?;
        Ok((child, self.reader(&self.merged)))
    }
}

pub struct FakeReader {
    data: Cursor<Vec<u8>>,
    fail: bool,
    closes: CloseLog,
}

impl AsyncRead for FakeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.fail {
            return Poll::Ready(Err(io::Error::other("Input/output error (os error 5)")));
        }
        Pin::new(&mut this.data).poll_read(cx, buf)
    }
}

impl Drop for FakeReader {
    fn drop(&mut self) {
        self.closes.record("read");
    }
}

pub struct FakeWriter {
    closes: CloseLog,
}

impl Drop for FakeWriter {
    fn drop(&mut self) {
        self.closes.record("write");
    }
}

pub struct FakeChild {
    exit: Option<i32>,
    polls_left: usize,
    fail_wait: bool,
    stderr: String,
    killed: Arc<AtomicBool>,
    closes: CloseLog,
}

fn exit_code(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

impl SupervisedChild for FakeChild {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(Some(ExitStatus::from_raw(libc::SIGKILL)));
        }
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(None);
        }
        if self.fail_wait {
            return Err(io::Error::other("No child processes (os error 10)"));
        }
        Ok(self.exit.map(exit_code))
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        match self.exit {
            Some(code) => Ok(exit_code(code)),
            None => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn diagnostics(&mut self) -> String {
        self.stderr.clone()
    }
}

impl Drop for FakeChild {
    fn drop(&mut self) {
        self.closes.record("child");
    }
}

/// Everything sent on the channel so far.
pub fn collect(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Percentages of the progress events, in order.
pub fn percentages(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Progress(record) => Some(record.percentage),
            Event::Outcome(_) => None,
        })
        .collect()
}

pub fn outcomes(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::Outcome(_)))
        .count()
}
