//! Identifiers pulled out of control-client output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which identifier an extraction is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Context,
    Identity,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Context => write!(f, "context ID"),
            TokenKind::Identity => write!(f, "identity ID"),
        }
    }
}

/// A raw identifier as matched by an extraction rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractedToken(String);

impl ExtractedToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtractedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle for a unit of application state on the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<ExtractedToken> for ContextId {
    fn from(token: ExtractedToken) -> Self {
        Self(token.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The node's own identity within a context.
///
/// Always looked up within a [`ContextId`]; the pairing is kept so callers
/// cannot mix an identity with the wrong context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityId {
    id: String,
    context: ContextId,
}

impl IdentityId {
    pub fn new(token: ExtractedToken, context: ContextId) -> Self {
        Self {
            id: token.0,
            context,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
