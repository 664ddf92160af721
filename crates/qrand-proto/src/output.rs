use serde::{Deserialize, Serialize};

/// Ordered text lines produced by one read or one-shot invocation.
///
/// Immutable once built. Lines carry no trailing `\r` or `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    lines: Vec<String>,
}

impl CapturedOutput {
    /// Splits raw text into lines, dropping carriage returns left by terminals.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(|line| line.trim_end_matches('\r').to_string())
                .collect(),
        }
    }

    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }

    /// Joins the lines back into text.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}
