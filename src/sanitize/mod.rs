//! Cleaning captured interpreter output before it is surfaced.

use crate::prompt::PromptPattern;

/// Pure text cleaner bound to one submission.
///
/// Removes terminal escapes and control bytes, drops prompt-only lines and
/// prompt-prefixed echoes of the submitted input (`-->disp(x)`), trims every
/// line and collapses blank runs. A line without a prompt prefix is output,
/// even when it repeats an input line. `clean` is idempotent.
#[derive(Debug, Clone)]
pub struct OutputSanitizer<'a> {
    prompt: &'a PromptPattern,
    echoes: Vec<String>,
}

impl<'a> OutputSanitizer<'a> {
    pub fn new(prompt: &'a PromptPattern) -> Self {
        Self { prompt, echoes: Vec::new() }
    }

    /// Lines of `source` that the interpreter may echo back.
    pub fn with_echoes(mut self, source: &str) -> Self {
        self.echoes.extend(
            source
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn clean(&self, raw: &str) -> String {
        let stripped = strip_ansi_escapes::strip(raw.as_bytes());
        let text = String::from_utf8_lossy(&stripped);

        let mut lines: Vec<String> = Vec::new();
        for line in text.split('\n') {
            let line: String = line.chars().filter(|c| !c.is_control() || *c == '\t').collect();
            let line = line.trim();
            if self.prompt.is_prompt_line(line) || self.is_echo(line) {
                continue;
            }
            if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
                continue;
            }
            lines.push(line.to_string());
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    fn is_echo(&self, line: &str) -> bool {
        if self.echoes.is_empty() {
            return false;
        }
        match self.prompt.strip_prompt_prefix(line).map(str::trim) {
            Some(input) if !input.is_empty() => self.echoes.iter().any(|e| e == input),
            _ => false,
        }
    }
}

/// Clean `raw` with the default prompt and no echo suppression.
pub fn clean(raw: &str) -> String {
    OutputSanitizer::new(&PromptPattern::default()).clean(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_escapes_and_trims() {
        let raw = "\x1b[1;32m hello, world\x1b[0m \r\n\r\n";
        assert_eq!(clean(raw), "hello, world");
    }

    #[test]
    fn drops_prompt_lines_and_collapses_blanks() {
        let raw = "\n\n a  =\n\n\n\n   1.\n-->\n\n";
        assert_eq!(clean(raw), "a  =\n\n1.");
    }

    #[test]
    fn drops_echoed_input() {
        let prompt = PromptPattern::default();
        let s = OutputSanitizer::new(&prompt).with_echoes("x = 1;\ndisp(x)\n");
        let raw = "-->disp(x)\n   1.\n";
        assert_eq!(s.clean(raw), "1.");
    }

    #[test]
    fn echo_suppression_keeps_genuine_output() {
        let prompt = PromptPattern::default();
        let s = OutputSanitizer::new(&prompt).with_echoes("disp('a')");
        assert_eq!(s.clean(" a\n"), "a");

        // Output that happens to equal an input line is not an echo.
        let s = OutputSanitizer::new(&prompt).with_echoes("x = 1;");
        assert_eq!(s.clean("x = 1;\n"), "x = 1;");
        assert_eq!(s.clean("-->x = 1;\n x = 1;\n"), "x = 1;");
    }

    #[test]
    fn prompt_prefixed_text_that_is_not_input_is_kept() {
        let prompt = PromptPattern::default();
        let s = OutputSanitizer::new(&prompt).with_echoes("disp(1)");
        assert_eq!(s.clean("-->result\n"), "-->result");
    }

    #[test]
    fn removes_trailing_control_bytes() {
        assert_eq!(clean("done\x07\x08\x00"), "done");
    }

    #[test]
    fn idempotent() {
        let prompt = PromptPattern::default();
        let s = OutputSanitizer::new(&prompt).with_echoes("plot(1:3)");
        for raw in [
            "",
            "\x1b[31m-->plot(1:3)\x1b[0m\n\n  ans  =\n\n\n  3.  \r\n-->",
            "\t indented\t\n\n\nnext\x1b[K",
            "-->\n-1->\n",
        ] {
            let once = s.clean(raw);
            assert_eq!(s.clean(&once), once, "raw: {raw:?}");
        }
    }
}
