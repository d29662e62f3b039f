//! Process spawning for the controllers.
//!
//! The controllers talk to a [`Launcher`] instead of `tokio::process` directly.
//! Production code uses [`SystemLauncher`]; tests provide a launcher that
//! scripts the status channel and records when descriptors are released.

use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::status::STATUS_FD;

/// How long to wait for stderr to reach EOF once the child has exited.
///
/// Maintainer scripts may start daemons that inherit the child's stderr and
/// keep it open indefinitely.
const DIAGNOSTICS_GRACE: Duration = Duration::from_secs(2);

/// Program, arguments and extra environment for one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Command line as a single string, for logs.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Trait abstracting how subprocesses and their pipes are created.
pub trait Launcher {
    /// Parent's end of a pipe. Dropping it closes the descriptor.
    type Reader: AsyncRead + Unpin + Send;
    /// Write end of the status pipe. Dropping it closes the descriptor.
    type Writer;
    type Child: SupervisedChild;

    /// Allocate the status channel.
    fn open_status_pipe(&self) -> io::Result<(Self::Reader, Self::Writer)>;

    /// Spawn with `status` installed as [`STATUS_FD`] in the child.
    ///
    /// Stdout and stderr are captured separately; stderr becomes the
    /// diagnostic text returned by [`SupervisedChild::diagnostics`].
    fn spawn_with_status(
        &self,
        invocation: &Invocation,
        status: &Self::Writer,
    ) -> io::Result<Self::Child>;

    /// Spawn with stdout and stderr merged into one pipe, returned as a reader.
    fn spawn_merged(&self, invocation: &Invocation) -> io::Result<(Self::Child, Self::Reader)>;
}

/// A spawned subprocess owned by exactly one controller invocation.
pub trait SupervisedChild: Send {
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    fn wait(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send;

    /// Forcefully terminate and reap the process.
    fn kill(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Diagnostic output captured while the process ran. Called after exit.
    fn diagnostics(&mut self) -> impl Future<Output = String> + Send;
}

/// Launcher backed by real pipes and `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    type Reader = pipe::Receiver;
    type Writer = io::PipeWriter;
    type Child = SystemChild;

    fn open_status_pipe(&self) -> io::Result<(pipe::Receiver, io::PipeWriter)> {
        let (reader, writer) = io::pipe()?;
        let reader = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        Ok((reader, writer))
    }

    fn spawn_with_status(
        &self,
        invocation: &Invocation,
        status: &io::PipeWriter,
    ) -> io::Result<SystemChild> {
        let mut cmd = base_command(invocation);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        install_status_fd(&mut cmd, status.as_raw_fd());

        let mut child = cmd.spawn()?;
        debug!(pid = child.id(), command = %invocation.command_line(), "spawned with status fd");

        let stdout = child.stdout.take().map(|out| tokio::spawn(log_stdout(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(collect_stderr(err)));
        Ok(SystemChild {
            child,
            stdout,
            stderr,
        })
    }

    fn spawn_merged(&self, invocation: &Invocation) -> io::Result<(SystemChild, pipe::Receiver)> {
        let (reader, writer) = io::pipe()?;
        let stderr_writer = writer.try_clone()?;

        // The command keeps its copies of the write end until it is dropped;
        // the reader only sees EOF once they are gone.
        let child = {
            let mut cmd = base_command(invocation);
            cmd.stdout(writer).stderr(stderr_writer);
            cmd.spawn()?
        };
        debug!(pid = child.id(), command = %invocation.command_line(), "spawned with merged output");

        let reader = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        Ok((
            SystemChild {
                child,
                stdout: None,
                stderr: None,
            },
            reader,
        ))
    }
}

fn base_command(invocation: &Invocation) -> Command {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(invocation.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Make `fd` available as [`STATUS_FD`] in the child, without close-on-exec.
fn install_status_fd(cmd: &mut Command, fd: RawFd) {
    // SAFETY: the closure runs between fork and exec and only makes
    // async-signal-safe calls (fcntl, dup2) on descriptors it does not own.
    unsafe {
        cmd.pre_exec(move || {
            if fd == STATUS_FD {
                // dup2 onto itself is a no-op and would leave FD_CLOEXEC set.
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags == -1 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(fd, STATUS_FD) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Child spawned by [`SystemLauncher`], with its output collectors.
pub struct SystemChild {
    child: Child,
    stdout: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl SupervisedChild for SystemChild {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    async fn diagnostics(&mut self) -> String {
        if let Some(mut handle) = self.stdout.take()
            && tokio::time::timeout(DIAGNOSTICS_GRACE, &mut handle).await.is_err()
        {
            debug!("stdout still open after exit; detaching");
            handle.abort();
        }

        let Some(mut handle) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(DIAGNOSTICS_GRACE, &mut handle).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "stderr collector failed");
                String::new()
            }
            Err(_) => {
                warn!("stderr still open after exit; classifying without it");
                handle.abort();
                String::new()
            }
        }
    }
}

impl Drop for SystemChild {
    fn drop(&mut self) {
        if let Some(handle) = &self.stdout {
            handle.abort();
        }
        if let Some(handle) = &self.stderr {
            handle.abort();
        }
    }
}

/// Drain stdout so the child never blocks on a full pipe; log each line.
async fn log_stdout(stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => debug!("apt-get: {}", String::from_utf8_lossy(&line).trim_end()),
            Err(e) => {
                warn!(error = %e, "failed reading subprocess stdout");
                break;
            }
        }
    }
}

async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = BufReader::new(stderr).read_to_end(&mut bytes).await {
        warn!(error = %e, "failed reading subprocess stderr");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
