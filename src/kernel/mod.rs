//! Notebook-facing glue over a [`ScilabSession`]: `%plot` magics, control
//! keywords, help and completion requests.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{KernelError, Result};
use crate::execution::{driver::InterruptHandle, ExecutionResult};
use crate::plot::{Backend, PlotSettings};
use crate::session::ScilabSession;

static HELP_REQUEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\?(\S+)|([^\s?]+)\?)\s*$").unwrap());

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok(ExecutionResult),
    /// The session was shut down by `exit`/`quit`.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageInfo {
    pub name: &'static str,
    pub version: String,
    pub mimetype: &'static str,
    pub file_extension: &'static str,
}

pub struct Kernel {
    session: ScilabSession,
}

impl Kernel {
    pub fn new(session: ScilabSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ScilabSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ScilabSession {
        &mut self.session
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.session.interrupt_handle()
    }

    /// Handle one notebook cell.
    pub async fn execute(&mut self, cell: &str, silent: bool) -> Result<Reply> {
        let (magics, code) = split_magics(cell);
        if !magics.is_empty() {
            let mut settings = self.session.plot_settings().clone();
            for line in magics {
                apply_plot_magic(line, &mut settings)?;
            }
            self.session.set_plot_settings(settings);
        }

        let code = code.trim_end();
        match code.trim() {
            "" => return Ok(Reply::Ok(ExecutionResult::default())),
            "exit" | "quit" => {
                self.session.shutdown(false).await?;
                return Ok(Reply::Aborted);
            }
            "restart" => {
                self.session.shutdown(true).await?;
                return Ok(Reply::Ok(ExecutionResult::default()));
            }
            _ => {}
        }

        if let Some(name) = help_target(code) {
            let text = self.help(name).await?;
            return Ok(Reply::Ok(ExecutionResult { text, ..Default::default() }));
        }

        self.session.execute(code, silent).await.map(Reply::Ok)
    }

    /// Output of `help <name>`. Anything but a single token yields nothing.
    pub async fn help(&mut self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() || name.split_whitespace().count() > 1 {
            return Ok(String::new());
        }
        self.session.query(&format!("help {name}")).await
    }

    /// Completions for the identifier ending at `cursor_pos` (a byte offset).
    pub async fn complete(&mut self, code: &str, cursor_pos: usize) -> Result<Completion> {
        let cursor_end = clamp_to_boundary(code, cursor_pos);
        let cursor_start = token_start(code, cursor_end);
        let token = &code[cursor_start..cursor_end];
        if token.is_empty() {
            return Ok(Completion { matches: Vec::new(), cursor_start, cursor_end });
        }

        let output = self.session.query(&format!("completion(\"{token}\")")).await?;
        let matches = completion_matches(&output, token);
        debug!(token, count = matches.len(), "completions");
        Ok(Completion { matches, cursor_start, cursor_end })
    }

    pub async fn language_info(&mut self) -> Result<LanguageInfo> {
        Ok(LanguageInfo {
            name: "scilab",
            version: self.session.banner().await?,
            mimetype: "text/x-octave",
            file_extension: ".sci",
        })
    }
}

/// Leading `%plot` lines, and the rest of the cell.
fn split_magics(cell: &str) -> (Vec<&str>, &str) {
    let mut magics = Vec::new();
    let mut rest = cell;
    loop {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        let trimmed = line.trim();
        if trimmed == "%plot" || trimmed.starts_with("%plot ") {
            magics.push(trimmed);
            rest = tail;
        } else {
            break;
        }
    }
    (magics, rest)
}

/// `%plot [-f FORMAT] [-s W,H] [-b BACKEND] [-a]`; long forms and
/// `--opt=value` are accepted too.
pub fn apply_plot_magic(line: &str, settings: &mut PlotSettings) -> Result<()> {
    let mut args = line.trim().strip_prefix("%plot").unwrap_or(line).split_whitespace();
    while let Some(arg) = args.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f, Some(v)),
            _ => (arg, None),
        };
        let mut value = || {
            inline_value
                .or_else(|| args.next())
                .ok_or_else(|| KernelError::Config(format!("%plot {flag} needs a value")))
        };
        match flag {
            "-f" | "--format" => settings.format = value()?.parse()?,
            "-s" | "--size" => settings.size = value()?.parse()?,
            "-b" | "--backend" => settings.backend = Backend::from(value()?),
            "-a" | "--antialiasing" => settings.antialiasing = true,
            other => return Err(KernelError::Config(format!("unknown %plot option `{other}`"))),
        }
    }
    Ok(())
}

fn help_target(code: &str) -> Option<&str> {
    if code.contains('\n') {
        return None;
    }
    let caps = HELP_REQUEST.captures(code)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

fn clamp_to_boundary(code: &str, pos: usize) -> usize {
    let mut pos = pos.min(code.len());
    while !code.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn token_start(code: &str, end: usize) -> usize {
    code[..end]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '%')
        .last()
        .map_or(end, |(i, _)| i)
}

/// `completion()` prints a string matrix framed with `!`; keep the entries
/// mentioning `token`.
fn completion_matches(output: &str, token: &str) -> Vec<String> {
    output
        .replace('!', "")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.contains(token))
        .map(str::to_string)
        .collect()
}
