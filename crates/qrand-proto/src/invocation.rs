//! External process invocations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A program plus its argument vector.
///
/// Arguments are passed to the OS as-is (no shell), so JSON payloads need no
/// extra quoting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Creates an invocation with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Extended regex matching this invocation in a process listing
    /// (`pgrep -f`).
    ///
    /// Each word is escaped, and the last one must be followed by a space or
    /// the end of the command line, so `node1` does not match `node10`.
    pub fn match_pattern(&self) -> String {
        let mut pattern = escape_ere(&self.program);
        for arg in &self.args {
            pattern.push(' ');
            pattern.push_str(&escape_ere(arg));
        }
        pattern.push_str("( |$)");
        pattern
    }
}

fn escape_ere(word: &str) -> String {
    let mut escaped = String::with_capacity(word.len());
    for c in word.chars() {
        if r"\.[]()*+?{}|^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for Invocation {
    /// Renders the invocation the way a shell user would type it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
