//! Turn detection: recognising the interpreter's prompt at the end of the
//! output accumulated so far.
//!
//! The interpreter offers no structured channel, so a prompt appearing on the
//! last line of output is the only signal that a fragment has finished.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// `-->` at the top level, `-1->`, `-2->`, ... inside `pause` levels.
static SCILAB_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*-(?:\d+)?->\s*$").unwrap());

/// `char(3)` printed by `disp(char(3))` on Windows, where the real prompt does
/// not reach a pipe.
static SCILAB_EMITTED_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\x03\s*$").unwrap());

/// CSI, OSC and two-byte escape sequences. Other control bytes are kept so an
/// emitted `char(3)` prompt survives.
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Ready for a new statement: the fragment is done.
    Primary,
    /// Inside an open block: more input is expected.
    Continuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptMatch {
    pub kind: PromptKind,
    /// Byte offset where the prompt line starts; everything before it is output.
    pub offset: usize,
}

/// Prompt strategy for one interpreter. Never mutated once a session exists.
#[derive(Debug, Clone)]
pub struct PromptPattern {
    primary: Regex,
    continuation: Option<Regex>,
    emit_command: Option<String>,
}

impl PromptPattern {
    /// `primary` and `continuation` are matched against the last line of
    /// output with terminal escapes removed, so they should be anchored.
    pub fn new(primary: Regex, continuation: Option<Regex>) -> Self {
        Self { primary, continuation, emit_command: None }
    }

    /// Command the driver sends after a fragment to make the interpreter print
    /// a prompt it would not print by itself.
    pub fn with_emit_command(mut self, command: impl Into<String>) -> Self {
        self.emit_command = Some(command.into());
        self
    }

    pub fn scilab() -> Self {
        if cfg!(windows) {
            Self::new(SCILAB_EMITTED_PROMPT.clone(), None).with_emit_command("disp(char(3))")
        } else {
            Self::new(SCILAB_PROMPT.clone(), None)
        }
    }

    pub fn emit_command(&self) -> Option<&str> {
        self.emit_command.as_deref()
    }

    /// Look for a prompt on the last line of `buffer`.
    ///
    /// Only the final line is considered: a prompt followed by more output is
    /// an intermediate prompt, not the end of the fragment.
    pub fn find_prompt_end(&self, buffer: &str) -> Option<PromptMatch> {
        let offset = buffer.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let tail = strip_escapes(&buffer[offset..]);
        if tail.trim().is_empty() {
            return None;
        }
        if self.primary.is_match(&tail) {
            return Some(PromptMatch { kind: PromptKind::Primary, offset });
        }
        match &self.continuation {
            Some(re) if re.is_match(&tail) => {
                Some(PromptMatch { kind: PromptKind::Continuation, offset })
            }
            _ => None,
        }
    }

    /// Whether a whole line is nothing but a prompt token.
    pub fn is_prompt_line(&self, line: &str) -> bool {
        let line = strip_escapes(line);
        if line.trim().is_empty() {
            return false;
        }
        self.primary.is_match(&line)
            || self.continuation.as_ref().is_some_and(|re| re.is_match(&line))
    }

    /// `line` with a leading prompt token removed, if it starts with one.
    ///
    /// Used to recognise echoed input of the form `-->disp(1)`.
    pub fn strip_prompt_prefix<'a>(&self, line: &'a str) -> Option<&'a str> {
        let trimmed = line.trim_start();
        (1..=trimmed.len().min(12))
            .rev()
            .filter(|&i| trimmed.is_char_boundary(i))
            .find(|&i| self.is_prompt_line(&trimmed[..i]))
            .map(|i| &trimmed[i..])
    }
}

impl Default for PromptPattern {
    fn default() -> Self {
        Self::scilab()
    }
}

fn strip_escapes(text: &str) -> Cow<'_, str> {
    ESCAPE_SEQUENCE.replace_all(text, "")
}
