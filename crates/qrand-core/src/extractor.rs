//! Identifier extraction from control-client listings.
//!
//! `context ls` and `identity ls` print tables whose rows start with a long
//! alphanumeric identifier followed by a column separator:
//!
//! ```text
//! Context ID                                   | Application ID | Root Hash
//! 7kNd3Qw1sYbX2vLm9PzR4tHc8JfG5aE6uV0oWqT1yZr  | 3vLm9Pz...     | ...
//! ```
//!
//! Rules match against every line of the captured output, top to bottom, and
//! return the first row that qualifies. Headers, banners, and blank lines never
//! qualify because their first column is not a long enough alphanumeric run.

use qrand_proto::{CapturedOutput, ExtractedToken, TokenKind};
use regex::Regex;

/// A named rule for pulling one identifier out of captured output.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    kind: TokenKind,
    row: Regex,
    marker: Option<Regex>,
}

impl ExtractionRule {
    /// Rows starting with an identifier of at least `min_len` alphanumerics
    /// followed by `separator`.
    pub fn context(min_len: usize, separator: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            kind: TokenKind::Context,
            row: row_regex(min_len, separator)?,
            marker: None,
        })
    }

    /// Like [`ExtractionRule::context`], and the rest of the row must contain
    /// `marker` as a standalone word.
    pub fn identity(min_len: usize, separator: &str, marker: &str) -> Result<Self, regex::Error> {
        let marker = Regex::new(&format!(
            r"(?:^|[^A-Za-z0-9]){}(?:[^A-Za-z0-9]|$)",
            regex::escape(marker)
        ))?;
        Ok(Self {
            kind: TokenKind::Identity,
            row: row_regex(min_len, separator)?,
            marker: Some(marker),
        })
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Applies the rule to a single line.
    pub fn match_line(&self, line: &str) -> Option<ExtractedToken> {
        let caps = self.row.captures(line)?;
        let rest = caps.get(2).map_or("", |m| m.as_str());
        if let Some(marker) = &self.marker
            && !marker.is_match(rest)
        {
            return None;
        }
        caps.get(1).map(|m| ExtractedToken::new(m.as_str()))
    }
}

/// Fails only when the repetition count makes the compiled regex too big.
fn row_regex(min_len: usize, separator: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"^\s*([A-Za-z0-9]{{{},}})\s*{}(.*)$",
        min_len.max(1),
        regex::escape(separator)
    ))
}

/// The pair of rules a session needs.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    pub context: ExtractionRule,
    pub identity: ExtractionRule,
}

impl ExtractionRules {
    pub fn new(
        min_len: usize,
        separator: &str,
        own_identity_marker: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            context: ExtractionRule::context(min_len, separator)?,
            identity: ExtractionRule::identity(min_len, separator, own_identity_marker)?,
        })
    }

    pub fn for_kind(&self, kind: TokenKind) -> &ExtractionRule {
        match kind {
            TokenKind::Context => &self.context,
            TokenKind::Identity => &self.identity,
        }
    }
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self::new(43, "|", "Yes").expect("default extraction patterns compile")
    }
}

/// Returns the first line of `output` matching `rule`.
///
/// No match is a normal outcome (the node may not have the context yet) and
/// yields `None`.
pub fn extract_token(output: &CapturedOutput, rule: &ExtractionRule) -> Option<ExtractedToken> {
    output.lines().iter().find_map(|line| rule.match_line(line))
}
