//! Store scripts.
//!
//! A script is a sequence of lines, one operation each:
//!
//! ```text
//! # comment (whole line only)
//! see   <key> <kind> <fingerprint>
//! seen  <key> <kind> <fingerprint> [tolerance]
//! hit   <key>
//! stats
//! settle
//! ```
//!
//! Fingerprints are decimal or `0x`-prefixed hex. Kinds are passed through
//! by name, so an unknown kind is accepted and behaves as the store
//! defines. In a mesh, a line may start with `@<peer>` to pick the store it
//! runs against (peer 0 otherwise).

use crate::store::DuplicateStore;
use crate::{Error, Result};

/// One operation in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Record an observation.
    See {
        /// Key.
        key: String,
        /// Kind name.
        kind: String,
        /// Fingerprint or hash.
        fingerprint: u64,
    },
    /// Query an observation.
    Seen {
        /// Key.
        key: String,
        /// Kind name.
        kind: String,
        /// Fingerprint or hash.
        fingerprint: u64,
        /// Maximum Hamming distance for oracle kinds.
        tolerance: u8,
    },
    /// Ask the rate limiter for a permit.
    Hit {
        /// Key.
        key: String,
    },
    /// Print store statistics.
    Stats,
    /// Wait for replication to go quiet. No-op on a standalone store.
    Settle,
}

/// A parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// 1-based source line number.
    pub line: usize,
    /// Target peer index.
    pub peer: usize,
    /// Operation.
    pub op: Op,
}

/// Parses a whole script.
///
/// Blank lines and `#` comments are skipped.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] naming the first line that fails to
/// parse.
pub fn parse_script(source: &str) -> Result<Vec<ScriptLine>> {
    source
        .lines()
        .enumerate()
        .filter_map(|(index, text)| {
            let text = text.trim();
            (!text.is_empty() && !text.starts_with('#')).then_some((index + 1, text))
        })
        .map(|(line, text)| {
            parse_line(text)
                .map(|(peer, op)| ScriptLine { line, peer, op })
                .map_err(|e| Error::InvalidInput(format!("line {line}: {e}")))
        })
        .collect()
}

fn parse_line(text: &str) -> std::result::Result<(usize, Op), String> {
    let mut words = text.split_whitespace().peekable();

    let mut peer = 0;
    if let Some(target) = words.peek().and_then(|word| word.strip_prefix('@')) {
        peer = target
            .parse()
            .map_err(|_| format!("invalid peer '{target}'"))?;
        words.next();
    }

    let args: Vec<&str> = words.collect();
    let Some((&command, args)) = args.split_first() else {
        return Err("missing command".to_string());
    };

    let op = match (command, args) {
        ("see", [key, kind, fingerprint]) => Op::See {
            key: (*key).to_string(),
            kind: (*kind).to_string(),
            fingerprint: parse_fingerprint(fingerprint)?,
        },
        ("seen", [key, kind, fingerprint, rest @ ..]) if rest.len() <= 1 => Op::Seen {
            key: (*key).to_string(),
            kind: (*kind).to_string(),
            fingerprint: parse_fingerprint(fingerprint)?,
            tolerance: match rest.first() {
                Some(tolerance) => tolerance
                    .parse()
                    .map_err(|_| format!("invalid tolerance '{tolerance}'"))?,
                None => 0,
            },
        },
        ("hit", [key]) => Op::Hit {
            key: (*key).to_string(),
        },
        ("stats", []) => Op::Stats,
        ("settle", []) => Op::Settle,
        ("see" | "seen" | "hit" | "stats" | "settle", _) => {
            return Err(format!("wrong number of arguments for '{command}'"));
        },
        _ => return Err(format!("unknown command '{command}'")),
    };

    Ok((peer, op))
}

/// Parses a decimal or `0x`-prefixed hex `u64`.
fn parse_fingerprint(text: &str) -> std::result::Result<u64, String> {
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid fingerprint '{text}'"))
}

impl Op {
    /// Runs the operation against a store and returns its output line, if
    /// any.
    #[must_use]
    pub fn apply(&self, store: &DuplicateStore) -> Option<String> {
        match self {
            Self::See {
                key,
                kind,
                fingerprint,
            } => {
                store.see_named(key, kind, *fingerprint);
                None
            },
            Self::Seen {
                key,
                kind,
                fingerprint,
                tolerance,
            } => Some(
                store
                    .seen_named(key, kind, *fingerprint, *tolerance)
                    .to_string(),
            ),
            Self::Hit { key } => Some(if store.hit(key) { "admitted" } else { "denied" }.to_string()),
            Self::Stats => Some(format_stats(store)),
            Self::Settle => None,
        }
    }
}

/// Formats store statistics on one line.
#[must_use]
pub fn format_stats(store: &DuplicateStore) -> String {
    let stats = store.stats();
    format!(
        "oracles={} hashes={} hit_buckets={}",
        stats.oracles, stats.hashes, stats.hit_buckets
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_script() {
        let script = "\
# warm up
see example.com hash 42

  # indented comment
seen example.com hash 0x2a
seen example.com oracle 7 3
@2 hit example.com
stats
settle
";
        let lines = parse_script(script).unwrap();
        assert_eq!(lines.len(), 6);

        assert_eq!(lines[0].line, 2);
        assert_eq!(
            lines[0].op,
            Op::See {
                key: "example.com".to_string(),
                kind: "hash".to_string(),
                fingerprint: 42,
            }
        );
        assert_eq!(
            lines[1].op,
            Op::Seen {
                key: "example.com".to_string(),
                kind: "hash".to_string(),
                fingerprint: 42,
                tolerance: 0,
            }
        );
        assert!(matches!(lines[2].op, Op::Seen { tolerance: 3, .. }));
        assert_eq!(lines[3].peer, 2);
        assert_eq!(lines[4].op, Op::Stats);
        assert_eq!(lines[5].op, Op::Settle);
    }

    #[test_case("jump k", "unknown command 'jump'" ; "unknown command")]
    #[test_case("see k hash", "wrong number of arguments for 'see'" ; "missing fingerprint")]
    #[test_case("seen k hash 1 2 3", "wrong number of arguments for 'seen'" ; "extra args")]
    #[test_case("see k hash nope", "invalid fingerprint 'nope'" ; "bad fingerprint")]
    #[test_case("seen k oracle 1 300", "invalid tolerance '300'" ; "tolerance overflow")]
    #[test_case("@x stats", "invalid peer 'x'" ; "bad peer")]
    #[test_case("@1", "missing command" ; "peer only")]
    fn test_parse_errors(line: &str, message: &str) {
        let source = format!("stats\n\n{line}\n");
        let err = parse_script(&source).unwrap_err();
        assert_eq!(err.to_string(), format!("invalid input: line 3: {message}"));
    }

    #[test]
    fn test_apply() {
        let store = DuplicateStore::default();
        let script = parse_script(
            "see k hash 1\nseen k hash 1\nseen k hash 2\nsee k bogus 1\nseen k bogus 1\nhit k\nstats",
        )
        .unwrap();

        let output: Vec<String> = script
            .iter()
            .filter_map(|line| line.op.apply(&store))
            .collect();

        assert_eq!(
            output,
            vec![
                "true",
                "false",
                "false",
                "admitted",
                "oracles=0 hashes=1 hit_buckets=1"
            ]
        );
    }
}
