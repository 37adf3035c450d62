//! Observation kinds and replicated function names.

use std::fmt;

/// Kind of observation recorded against a key.
///
/// The string forms are part of the replication wire format and are
/// matched case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Near-duplicate fingerprint, answered by the key's oracle.
    Oracle,
    /// Exact 64-bit hash, answered by set membership.
    Hash,
}

impl Kind {
    /// Returns the wire form of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Hash => "hash",
        }
    }

    /// Parses a kind from its wire form.
    ///
    /// Returns `None` for anything other than `"oracle"` or `"hash"`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oracle" => Some(Self::Oracle),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Function carried by a replication message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Record an observation.
    See,
}

impl Function {
    /// Returns the wire form of this function.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::See => "See",
        }
    }

    /// Parses a function name. Only `"See"` is recognized.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "See" => Some(Self::See),
            _ => None,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
