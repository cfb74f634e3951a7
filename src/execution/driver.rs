//! Prompt-synchronised REPL driver.
//!
//! One fragment is in flight at a time. Each line is written to the child and
//! the driver then reads until the prompt reappears on the last line of
//! output. Interrupts arrive on a separate watch channel and race the read in
//! a `select!`, so cancellation never goes through the child's stdin.

use std::{
    sync::Arc,
    time::Duration,
};

use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, trace, warn};

use super::RawOutput;
use crate::error::{KernelError, Result};
use crate::process::{Launcher, SignalKind, Transport};
use crate::prompt::{PromptKind, PromptPattern};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Sending,
    AwaitingPrompt,
    Draining,
    Restarting,
    Terminated,
}

/// Cancels the fragment currently in flight. Interrupts issued while the
/// driver is idle are ignored.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }
}

struct Session {
    transport: Box<dyn Transport>,
    epoch: u64,
}

enum Wait {
    Prompt { text: String, kind: PromptKind },
    Closed,
    TimedOut { text: String },
}

enum Failure {
    Crashed(String),
    Incomplete,
    Unresponsive { partial: String },
}

pub struct ReplDriver {
    launcher: Box<dyn Launcher>,
    prompt: PromptPattern,
    session: Option<Session>,
    epoch: u64,
    state: DriverState,
    interrupt_tx: Arc<watch::Sender<u64>>,
    interrupts: watch::Receiver<u64>,
    execution_timeout: Option<Duration>,
    interrupt_grace: Duration,
    startup_timeout: Duration,
}

impl std::fmt::Debug for ReplDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplDriver")
            .field("launcher", &self.launcher.describe())
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .finish()
    }
}

impl ReplDriver {
    pub fn new(launcher: Box<dyn Launcher>, prompt: PromptPattern) -> Self {
        let (tx, rx) = watch::channel(0u64);
        Self {
            launcher,
            prompt,
            session: None,
            epoch: 0,
            state: DriverState::Idle,
            interrupt_tx: Arc::new(tx),
            interrupts: rx,
            execution_timeout: None,
            interrupt_grace: Duration::from_secs(5),
            startup_timeout: STARTUP_TIMEOUT,
        }
    }

    /// `None` waits for the prompt forever.
    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Incremented on every spawn; 0 before the first one.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn prompt(&self) -> &PromptPattern {
        &self.prompt
    }

    pub fn launcher(&self) -> &dyn Launcher {
        self.launcher.as_ref()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { tx: Arc::clone(&self.interrupt_tx) }
    }

    pub fn is_alive(&mut self) -> bool {
        self.session.as_mut().is_some_and(|s| s.transport.is_alive())
    }

    fn transition(&mut self, next: DriverState) {
        transition(&mut self.state, next);
    }

    /// Spawn the interpreter unless a live one exists. Returns `true` when a
    /// new process was started.
    pub async fn ensure_started(&mut self) -> Result<bool> {
        if self.state == DriverState::Terminated {
            return Err(KernelError::Terminated);
        }
        if let Some(session) = self.session.as_mut() {
            if session.transport.is_alive() {
                return Ok(false);
            }
            warn!(epoch = session.epoch, "interpreter is no longer running, respawning");
            self.discard();
        }

        let mut transport = self.launcher.launch().await?;
        let startup_error = |reason: &str| KernelError::Spawn {
            executable: self.launcher.describe(),
            reason: reason.to_string(),
        };
        if let Some(emit) = self.prompt.emit_command() {
            transport
                .write_line(emit)
                .await
                .map_err(|e| startup_error(&e.to_string()))?;
        }

        // Nothing is in flight during startup, so pending interrupts are
        // dropped and the banner is read without listening for new ones.
        self.interrupts.borrow_and_update();
        let deadline = Some(Instant::now() + self.startup_timeout);
        let mut interrupted = false;
        let wait = await_prompt(
            transport.as_mut(),
            &self.prompt,
            None,
            deadline,
            self.interrupt_grace,
            &mut interrupted,
        )
        .await
        .map_err(|e| startup_error(&e.to_string()))?;
        match wait {
            Wait::Prompt { .. } => {}
            Wait::Closed => return Err(startup_error("exited before printing its first prompt")),
            Wait::TimedOut { .. } => return Err(startup_error("no prompt after startup")),
        }

        self.epoch += 1;
        info!(
            epoch = self.epoch,
            command = %self.launcher.describe(),
            "interpreter session started"
        );
        self.session = Some(Session { transport, epoch: self.epoch });
        self.transition(DriverState::Idle);
        Ok(true)
    }

    /// Submit `code` and collect everything printed before the final prompt.
    pub async fn run_fragment(&mut self, code: &str) -> Result<RawOutput> {
        self.ensure_started().await?;
        let lines = fragment_lines(code);
        if lines.is_empty() {
            return Ok(RawOutput::default());
        }

        // Interrupts that arrived while idle do not apply to this fragment.
        self.interrupts.borrow_and_update();
        let deadline = self.execution_timeout.map(|t| Instant::now() + t);

        match self.exchange(&lines, deadline).await {
            Ok(out) => {
                self.transition(DriverState::Idle);
                Ok(out)
            }
            Err(Failure::Crashed(reason)) => {
                warn!(%reason, "interpreter session crashed");
                self.recover().await;
                Err(KernelError::SessionCrashed(reason))
            }
            Err(Failure::Incomplete) => {
                debug!("fragment ended at a continuation prompt, interrupting");
                self.reset_after_incomplete().await;
                Err(KernelError::IncompleteInput(code.to_string()))
            }
            Err(Failure::Unresponsive { partial }) => {
                warn!(
                    grace = ?self.interrupt_grace,
                    "no prompt after interrupt, restarting interpreter"
                );
                self.recover().await;
                Ok(RawOutput { text: partial, interrupted: true })
            }
        }
    }

    async fn exchange(
        &mut self,
        lines: &[&str],
        deadline: Option<Instant>,
    ) -> std::result::Result<RawOutput, Failure> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Failure::Crashed("no interpreter session".into()))?;
        let transport = session.transport.as_mut();
        let crashed = |e: std::io::Error| Failure::Crashed(e.to_string());

        let mut output = String::new();
        let mut interrupted = false;

        let batches: Vec<Vec<&str>> = match self.prompt.emit_command() {
            Some(emit) => {
                let mut all = lines.to_vec();
                all.push(emit);
                vec![all]
            }
            None => lines.iter().map(|l| vec![*l]).collect(),
        };
        let last = batches.len() - 1;

        for (i, batch) in batches.iter().enumerate() {
            transition(&mut self.state, DriverState::Sending);
            for line in batch {
                transport.write_line(line).await.map_err(crashed)?;
            }
            transition(&mut self.state, DriverState::AwaitingPrompt);

            let wait = await_prompt(
                transport,
                &self.prompt,
                Some(&mut self.interrupts),
                deadline,
                self.interrupt_grace,
                &mut interrupted,
            )
            .await
            .map_err(crashed)?;

            match wait {
                Wait::Prompt { text, kind } => {
                    output.push_str(&text);
                    if interrupted {
                        break;
                    }
                    if i == last && kind == PromptKind::Continuation {
                        return Err(Failure::Incomplete);
                    }
                }
                Wait::Closed => {
                    return Err(Failure::Crashed("interpreter exited during execution".into()));
                }
                Wait::TimedOut { text } => {
                    output.push_str(&text);
                    if interrupted {
                        return Err(Failure::Unresponsive { partial: output });
                    }
                    return Err(Failure::Crashed(format!(
                        "no prompt within {:?}",
                        self.execution_timeout.unwrap_or_default()
                    )));
                }
            }
        }

        transition(&mut self.state, DriverState::Draining);
        Ok(RawOutput { text: output, interrupted })
    }

    /// Send an interrupt and wait for the primary prompt so the next fragment
    /// starts from a clean statement.
    async fn reset_after_incomplete(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let transport = session.transport.as_mut();
        let recovered = match transport.send_signal(SignalKind::Interrupt) {
            Ok(()) => {
                let mut interrupted = true;
                let deadline = Some(Instant::now() + self.interrupt_grace);
                let wait = await_prompt(
                    transport,
                    &self.prompt,
                    None,
                    deadline,
                    self.interrupt_grace,
                    &mut interrupted,
                )
                .await;
                matches!(wait, Ok(Wait::Prompt { kind: PromptKind::Primary, .. }))
            }
            Err(e) => {
                warn!(error = %e, "could not interrupt interpreter");
                false
            }
        };
        if recovered {
            self.transition(DriverState::Idle);
        } else {
            self.recover().await;
        }
    }

    /// Discard the session and try to start a fresh one. A failed respawn is
    /// logged; the next `ensure_started` tries again.
    async fn recover(&mut self) {
        self.transition(DriverState::Restarting);
        self.discard();
        if let Err(e) = self.ensure_started().await {
            warn!(error = %e, "respawn after crash failed");
        }
        self.transition(DriverState::Idle);
    }

    /// Kill the current process (if any) and spawn a new one.
    pub async fn restart(&mut self) -> Result<()> {
        info!(epoch = self.epoch, "restarting interpreter");
        self.transition(DriverState::Restarting);
        self.discard();
        self.ensure_started().await?;
        Ok(())
    }

    /// Send `quit_command`, give the child `grace` to exit, then kill it.
    pub async fn terminate(&mut self, quit_command: &str, grace: Duration) {
        if let Some(mut session) = self.session.take() {
            let transport = session.transport.as_mut();
            let exited = match transport.write_line(quit_command).await {
                Ok(()) => transport.wait_for_exit(grace).await,
                Err(e) => {
                    debug!(error = %e, "could not send quit command");
                    false
                }
            };
            if !exited {
                debug!(epoch = session.epoch, "interpreter did not exit in time, killing");
                let _ = transport.send_signal(SignalKind::Kill);
            }
            info!(epoch = session.epoch, "interpreter session closed");
        }
        self.transition(DriverState::Terminated);
    }

    fn discard(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.transport.is_alive() {
                let _ = session.transport.send_signal(SignalKind::Kill);
            }
            debug!(epoch = session.epoch, "interpreter session discarded");
        }
    }
}

fn transition(state: &mut DriverState, next: DriverState) {
    if *state != next {
        trace!(from = ?*state, to = ?next, "driver state");
        *state = next;
    }
}

/// Lines to submit, without trailing blank lines.
pub fn fragment_lines(code: &str) -> Vec<&str> {
    if code.trim().is_empty() {
        return Vec::new();
    }
    code.trim_end().lines().map(|l| l.trim_end_matches('\r')).collect()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Read until `prompt` appears at the end of the accumulated output.
///
/// With `interrupts`, an interrupt delivers SIGINT out of band, marks the
/// result interrupted and shortens the deadline to `grace`. Only the bytes
/// after the last newline are decoded per chunk; the whole buffer is decoded
/// once, when the wait ends.
async fn await_prompt(
    transport: &mut dyn Transport,
    prompt: &PromptPattern,
    mut interrupts: Option<&mut watch::Receiver<u64>>,
    mut deadline: Option<Instant>,
    grace: Duration,
    interrupted: &mut bool,
) -> std::io::Result<Wait> {
    let mut buf: Vec<u8> = Vec::new();
    let mut line_start = 0;
    let mut listening = interrupts.is_some();

    loop {
        tokio::select! {
            chunk = transport.read_available() => {
                let Some(bytes) = chunk? else {
                    return Ok(Wait::Closed);
                };
                if let Some(i) = bytes.iter().rposition(|&b| b == b'\n') {
                    line_start = buf.len() + i + 1;
                }
                buf.extend_from_slice(&bytes);
                let tail = String::from_utf8_lossy(&buf[line_start..]);
                if let Some(m) = prompt.find_prompt_end(&tail) {
                    let end = line_start + m.offset;
                    let text = String::from_utf8_lossy(&buf[..end]).into_owned();
                    return Ok(Wait::Prompt { text, kind: m.kind });
                }
            }
            changed = next_interrupt(&mut interrupts), if listening => {
                if !changed {
                    listening = false;
                    continue;
                }
                info!("interrupting interpreter");
                if let Err(e) = transport.send_signal(SignalKind::Interrupt) {
                    warn!(error = %e, "failed to deliver interrupt");
                }
                *interrupted = true;
                let grace_deadline = Instant::now() + grace;
                deadline = Some(deadline.map_or(grace_deadline, |d| d.min(grace_deadline)));
            }
            _ = sleep_until(deadline) => {
                let text = String::from_utf8_lossy(&buf).into_owned();
                return Ok(Wait::TimedOut { text });
            }
        }
    }
}

/// `false` once the sender is gone or there is nothing to listen to.
async fn next_interrupt(interrupts: &mut Option<&mut watch::Receiver<u64>>) -> bool {
    let Some(rx) = interrupts.as_mut() else {
        return false;
    };
    if rx.changed().await.is_err() {
        return false;
    }
    rx.borrow_and_update();
    true
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays fixed chunks, then reports the streams closed.
    struct Chunks(VecDeque<Vec<u8>>);

    #[async_trait::async_trait]
    impl Transport for Chunks {
        async fn write_line(&mut self, _text: &str) -> std::io::Result<()> {
            Ok(())
        }

        async fn read_available(&mut self) -> std::io::Result<Option<Vec<u8>>> {
            Ok(self.0.pop_front())
        }

        fn send_signal(&mut self, _kind: SignalKind) -> std::io::Result<()> {
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            !self.0.is_empty()
        }

        async fn wait_for_exit(&mut self, _grace: Duration) -> bool {
            true
        }
    }

    async fn read_chunks(chunks: Vec<Vec<u8>>) -> Wait {
        let mut transport = Chunks(chunks.into());
        let mut interrupted = false;
        let primary = regex::Regex::new(r"^\s*-(?:\d+)?->\s*$").unwrap();
        let prompt = PromptPattern::new(primary, None);
        await_prompt(&mut transport, &prompt, None, None, Duration::ZERO, &mut interrupted)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn prompt_split_across_chunks() {
        let chunks = vec![b" caf\xc3".to_vec(), b"\xa9\n\n-".to_vec(), b"->".to_vec()];
        let wait = read_chunks(chunks).await;
        match wait {
            Wait::Prompt { text, kind } => {
                assert_eq!(text, " caf\u{e9}\n\n");
                assert_eq!(kind, PromptKind::Primary);
            }
            _ => panic!("expected a prompt"),
        }
    }

    #[tokio::test]
    async fn long_output_keeps_every_byte() {
        let mut chunks: Vec<Vec<u8>> = (0..512)
            .map(|i| format!("line {i}\n").repeat(200).into_bytes())
            .collect();
        let expected: usize = chunks.iter().map(Vec::len).sum();
        chunks.push(b"-->".to_vec());

        let Wait::Prompt { text, .. } = read_chunks(chunks).await else {
            panic!("expected a prompt");
        };
        assert_eq!(text.len(), expected);
        assert!(text.ends_with("line 511\n"));
    }

    #[tokio::test]
    async fn prompt_in_the_middle_is_not_the_end() {
        let wait = read_chunks(vec![b"-->\n 1.\n".to_vec()]).await;
        assert!(matches!(wait, Wait::Closed));
    }

    #[test]
    fn fragment_lines_drop_trailing_blanks() {
        assert_eq!(fragment_lines("a = 1\r\nb = 2\n\n\n"), vec!["a = 1", "b = 2"]);
        assert_eq!(fragment_lines("\nx\n"), vec!["", "x"]);
        assert!(fragment_lines("  \n\t\n").is_empty());
    }

    #[test]
    fn interrupt_handle_bumps_generation() {
        let (tx, mut rx) = watch::channel(0u64);
        let handle = InterruptHandle { tx: Arc::new(tx) };
        rx.borrow_and_update();
        handle.interrupt();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
