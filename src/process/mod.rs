//! Interpreter process management: spawning, pipe I/O, signals, liveness.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::error::{KernelError, Result};

pub mod scilab;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Ctrl-C: cancel the running statement, keep the session.
    Interrupt,
    /// Ask the process to exit.
    Terminate,
    /// Exit now.
    Kill,
}

/// Byte-level connection to one running interpreter.
#[async_trait]
pub trait Transport: Send {
    /// Send `text` followed by the session's line terminator.
    async fn write_line(&mut self, text: &str) -> io::Result<()>;

    /// Wait for the next chunk of output. `Ok(None)` means the output streams
    /// closed, i.e. the process is gone. Must be cancel safe.
    async fn read_available(&mut self) -> io::Result<Option<Vec<u8>>>;

    fn send_signal(&mut self, kind: SignalKind) -> io::Result<()>;

    fn is_alive(&mut self) -> bool;

    /// Wait up to `grace` for the process to exit on its own.
    async fn wait_for_exit(&mut self, grace: Duration) -> bool;
}

/// Creates transports; one call per session (re)start.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Transport>>;

    /// Human readable command line for logs and diagnostics.
    fn describe(&self) -> String;
}

/// Child process with piped stdio. stdout and stderr are pumped by two
/// background tasks into one channel, in arrival order.
pub struct ProcessHandle {
    pub child: Child,
    stdin: ChildStdin,
    output: mpsc::Receiver<Vec<u8>>,
    line_ending: LineEnding,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.child.id())
            .field("line_ending", &self.line_ending)
            .finish()
    }
}

impl ProcessHandle {
    pub fn spawn(executable: &Path, args: &[OsString], line_ending: LineEnding) -> Result<Self> {
        let spawn_error = |reason: String| KernelError::Spawn {
            executable: executable.display().to_string(),
            reason,
        };

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, with the child as its leader: a terminal Ctrl-C
        // reaches it only through `send_signal`, and the group id is its pid.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child: Child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| spawn_error("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_error("no stdout".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| spawn_error("no stderr".into()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(stdout, tx.clone()));
        tokio::spawn(pump(stderr, tx));

        debug!(pid = ?child.id(), executable = %executable.display(), "interpreter spawned");
        Ok(Self { child, stdin, output: rx, line_ending })
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(normalize_line_endings(&buf[..n])).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "interpreter output stream closed");
                break;
            }
        }
    }
}

/// `\r\n` to `\n`. A lone `\r` is kept; the sanitizer drops it later.
pub fn normalize_line_endings(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    let mut bytes = chunk.iter().peekable();
    while let Some(&b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

#[async_trait]
impl Transport for ProcessHandle {
    async fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.write_all(self.line_ending.as_str().as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn read_available(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.output.recv().await)
    }

    /// Signals go to the whole process group, so an interpreter started
    /// through a wrapper script is reached too.
    fn send_signal(&mut self, kind: SignalKind) -> io::Result<()> {
        let pid = self
            .child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already exited"))?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let signal = match kind {
                SignalKind::Interrupt => Signal::SIGINT,
                SignalKind::Terminate => Signal::SIGTERM,
                SignalKind::Kill => Signal::SIGKILL,
            };
            killpg(Pid::from_raw(pid as i32), signal).map_err(io::Error::from)
        }

        #[cfg(not(unix))]
        {
            match kind {
                SignalKind::Terminate | SignalKind::Kill => self.child.start_kill(),
                SignalKind::Interrupt => {
                    warn!(pid, "interrupt is not supported on this platform");
                    Err(io::Error::new(io::ErrorKind::Unsupported, "interrupt not supported"))
                }
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "interpreter exited");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait for interpreter");
                false
            }
            Err(_) => false,
        }
    }
}

impl Drop for ProcessHandle {
    /// Kills the whole group; `kill_on_drop` alone reaches only the leader.
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.send_signal(SignalKind::Kill);
        }
    }
}

/// Launches `executable args...` with piped stdio.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub line_ending: LineEnding,
}

impl CommandLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into(), args: Vec::new(), line_ending: LineEnding::Lf }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(ProcessHandle::spawn(&self.executable, &self.args, self.line_ending)?))
    }

    fn describe(&self) -> String {
        let mut s = self.executable.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(&a.to_string_lossy());
        }
        s
    }
}
