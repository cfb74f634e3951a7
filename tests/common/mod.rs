//! Scripted in-memory interpreter used by the integration tests.
#![allow(dead_code)]

use std::{
    fs, io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

use scilab_kernel::{
    config::SessionOptions,
    process::{Launcher, SignalKind, Transport},
    prompt::PromptPattern,
    Result, ScilabSession,
};

static DISP: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^disp\(['"](.*)['"]\);?$"#).unwrap());
static EXPORT_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([^']+)/figure_%03d\.(\w+)'").unwrap());
static COMPLETION: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^completion\("(\w+)"\)$"#).unwrap());

pub const BANNER: &str =
    "Scilab 6.1.1 (fake)\nStartup execution:\n  loading initial environment\n\n";

/// Everything the fake interpreters saw, shared across respawns.
#[derive(Debug, Default)]
pub struct FakeLog {
    pub spawns: usize,
    pub lines: Vec<String>,
    pub signals: Vec<SignalKind>,
}

impl FakeLog {
    pub fn count(&self, needle: &str) -> usize {
        self.lines.iter().filter(|l| l.contains(needle)).count()
    }
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub log: Arc<Mutex<FakeLog>>,
    /// Use `..>` as a continuation prompt inside `if` blocks.
    pub continuation: bool,
    /// Die while exporting figures.
    pub crash_on_export: bool,
    /// Delay before the banner and first prompt appear.
    pub startup_delay: Option<Duration>,
    /// Answer the version query without a version number.
    pub versionless: bool,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawns(&self) -> usize {
        self.log.lock().unwrap().spawns
    }

    pub fn count(&self, needle: &str) -> usize {
        self.log.lock().unwrap().count(needle)
    }

    pub fn signals(&self) -> Vec<SignalKind> {
        self.log.lock().unwrap().signals.clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Transport>> {
        self.log.lock().unwrap().spawns += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let fake = FakeScilab {
            log: Arc::clone(&self.log),
            tx,
            rx,
            alive: true,
            figures: 0,
            busy: Busy::No,
            block_depth: 0,
            continuation: self.continuation,
            crash_on_export: self.crash_on_export,
            versionless: self.versionless,
        };
        let banner = format!("{BANNER}-->").into_bytes();
        match self.startup_delay {
            Some(delay) => {
                let tx = fake.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Some(banner));
                });
            }
            None => {
                let _ = fake.tx.send(Some(banner));
            }
        }
        Ok(Box::new(fake))
    }

    fn describe(&self) -> String {
        "fake-scilab -nw".into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Busy {
    No,
    /// `sleep(...)`: returns to the prompt on SIGINT.
    Sleeping,
    /// `hang()`: ignores SIGINT.
    Hung,
}

pub struct FakeScilab {
    log: Arc<Mutex<FakeLog>>,
    tx: mpsc::UnboundedSender<Option<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Option<Vec<u8>>>,
    alive: bool,
    figures: usize,
    busy: Busy,
    block_depth: usize,
    continuation: bool,
    crash_on_export: bool,
    versionless: bool,
}

impl FakeScilab {
    fn emit(&self, text: &str) {
        let _ = self.tx.send(Some(text.as_bytes().to_vec()));
    }

    fn die(&mut self) {
        self.alive = false;
        let _ = self.tx.send(None);
    }

    fn prompt(&self) {
        self.emit("\n-->");
    }

    fn export(&mut self, line: &str) {
        let Some(caps) = EXPORT_TARGET.captures(line) else {
            self.emit("error: bad export\n\n-->");
            return;
        };
        let dir = PathBuf::from(&caps[1]);
        let ext = caps[2].to_string();
        if self.crash_on_export {
            let _ = fs::write(dir.join(format!("figure_001.{ext}")), b"partial");
            self.die();
            return;
        }
        // Newest first, so the reader has to sort.
        for i in (1..=self.figures).rev() {
            let path = dir.join(format!("figure_{i:03}.{ext}"));
            let data = match ext.as_str() {
                "svg" => svg_figure(i).into_bytes(),
                "png" => png_figure(640, 480),
                _ => b"\xff\xd8\xff\xe0fake-jpeg".to_vec(),
            };
            if fs::write(&path, data).is_err() {
                self.emit("error: cannot write figure\n");
            }
        }
        self.figures = 0;
        self.prompt();
    }

    fn handle(&mut self, line: &str) {
        let cmd = line.trim();

        if self.block_depth > 0 {
            if cmd == "end" {
                self.block_depth -= 1;
            }
            if self.block_depth > 0 {
                self.emit("..>");
            } else {
                self.prompt();
            }
            return;
        }

        if self.continuation && cmd.starts_with("if ") {
            self.block_depth = 1;
            self.emit("..>");
            return;
        }

        if cmd == "crash" {
            self.emit(" fatal error, exiting\n");
            self.die();
            return;
        }
        if cmd == "quit" {
            self.die();
            return;
        }
        if cmd.starts_with("sleep(") {
            self.emit(" working\n");
            self.busy = Busy::Sleeping;
            return;
        }
        if cmd == "hang()" {
            self.busy = Busy::Hung;
            return;
        }
        if cmd.contains("winsid()") {
            self.export(cmd);
            return;
        }
        if cmd.starts_with("plot(") || cmd.starts_with("scf(") {
            self.figures += 1;
            self.prompt();
            return;
        }
        if cmd == "disp(getversion())" {
            if self.versionless {
                self.emit(" scilab-branch-master\n\n-->");
            } else {
                self.emit(" scilab-6.1.1\n\n-->");
            }
            return;
        }
        if let Some(caps) = COMPLETION.captures(cmd) {
            let token = caps[1].to_string();
            let listing = format!(
                "\n!{token}        !\n!{token}lay     !\n!mtlb_{token} !\n!\n\n-->"
            );
            self.emit(&listing);
            return;
        }
        if let Some(topic) = cmd.strip_prefix("help ") {
            self.emit(&format!(" {topic}: help page\n\n-->"));
            return;
        }
        if let Some(caps) = DISP.captures(cmd) {
            self.emit(&format!(" {}\n\n-->", &caps[1]));
            return;
        }
        if cmd == "colors" {
            self.emit("\x1b[1;31m red\x1b[0m\n\x1b[32m green\x1b[0m\n\n-->");
            return;
        }
        self.prompt();
    }
}

#[async_trait]
impl Transport for FakeScilab {
    async fn write_line(&mut self, text: &str) -> io::Result<()> {
        if !self.alive {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "interpreter exited"));
        }
        self.log.lock().unwrap().lines.push(text.to_string());
        if self.busy == Busy::No {
            self.handle(text);
        }
        Ok(())
    }

    async fn read_available(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await.flatten())
    }

    fn send_signal(&mut self, kind: SignalKind) -> io::Result<()> {
        self.log.lock().unwrap().signals.push(kind);
        match kind {
            SignalKind::Interrupt => {
                if self.block_depth > 0 {
                    self.block_depth = 0;
                    self.prompt();
                } else if self.busy == Busy::Sleeping {
                    self.busy = Busy::No;
                    self.emit(" interrupted\n\n-->");
                }
            }
            SignalKind::Terminate | SignalKind::Kill => self.die(),
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn wait_for_exit(&mut self, _grace: Duration) -> bool {
        !self.alive
    }
}

pub fn svg_figure(index: usize) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 400 300"><desc>figure {index}</desc><g style="clip-path:url(#c0)"><path d="M0 0L10 10"/></g></svg>"#
    )
}

pub fn png_figure(width: u32, height: u32) -> Vec<u8> {
    let mut v = b"\x89PNG\r\n\x1a\n\0\0\0\x0dIHDR".to_vec();
    v.extend_from_slice(&width.to_be_bytes());
    v.extend_from_slice(&height.to_be_bytes());
    v.extend_from_slice(&[8, 6, 0, 0, 0]);
    v
}

pub fn session(launcher: &FakeLauncher, options: SessionOptions) -> ScilabSession {
    ScilabSession::with_prompt(Box::new(launcher.clone()), unix_prompt(), options)
}

/// The `-->` prompt regardless of the host platform.
pub fn unix_prompt() -> PromptPattern {
    PromptPattern::new(Regex::new(r"^\s*-(?:\d+)?->\s*$").unwrap(), None)
}

pub fn block_prompt() -> PromptPattern {
    PromptPattern::new(
        Regex::new(r"^\s*-(?:\d+)?->\s*$").unwrap(),
        Some(Regex::new(r"^\s*\.\.>\s*$").unwrap()),
    )
}

pub fn options_without_plots() -> SessionOptions {
    let mut options = SessionOptions::default();
    options.plot.backend = scilab_kernel::plot::Backend::Other("none".into());
    options
}
