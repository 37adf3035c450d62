//! CLI command implementations.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Execute a store script against one standalone store |
//! | `mesh` | Execute a script across replicated in-process peers |
//! | `config` | Print the effective configuration |
//!
//! # Example Usage
//!
//! ```bash
//! printf 'see example.com hash 42\nseen example.com hash 42\n' | seenstore run
//!
//! printf '@0 see a hash 1\nsettle\n@1 seen a hash 1\n' | seenstore mesh --peers 2
//! ```

mod script;

pub use script::{Op, ScriptLine, format_stats, parse_script};

use crate::config::StoreConfig;
use crate::replication::LocalBus;
use crate::store::DuplicateStore;
use crate::{Error, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Longest time `settle` waits for replication to go quiet.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_POLL: Duration = Duration::from_millis(5);

/// Runs a script against one standalone store.
pub struct RunCommand;

impl RunCommand {
    /// Creates a new run command.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Executes `source`, writing one output line per query.
    ///
    /// # Errors
    ///
    /// Returns an error if the script does not parse, addresses a peer
    /// other than 0, or output cannot be written.
    pub fn execute<W: Write>(&self, config: &StoreConfig, source: &str, out: &mut W) -> Result<()> {
        let script = parse_script(source)?;
        check_peers(&script, 1)?;

        if config.replication.enabled {
            tracing::warn!("Replication is enabled but `run` has no transport, running standalone");
        }

        let store = DuplicateStore::new(config);
        for line in &script {
            if let Some(output) = line.op.apply(&store) {
                write_line(out, &output)?;
            }
        }

        tracing::info!(operations = script.len(), "Script complete");
        Ok(())
    }
}

impl Default for RunCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a script across replicated peers joined by a [`LocalBus`].
pub struct MeshCommand {
    peers: usize,
}

impl MeshCommand {
    /// Creates a mesh command with `peers` stores (minimum 1).
    #[must_use]
    pub fn new(peers: usize) -> Self {
        Self {
            peers: peers.max(1),
        }
    }

    /// Executes `source`, then waits for replication to settle and prints
    /// each peer's statistics.
    ///
    /// Query output lines are prefixed with `[peer]`. Must run inside a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the script does not parse, addresses a missing
    /// peer, replication cannot start, or output cannot be written.
    pub async fn execute<W: Write>(
        &self,
        config: &StoreConfig,
        source: &str,
        out: &mut W,
    ) -> Result<()> {
        let script = parse_script(source)?;
        check_peers(&script, self.peers)?;

        let bus = LocalBus::new();
        let mut stores = Vec::with_capacity(self.peers);
        let mut handles = Vec::with_capacity(self.peers);
        for _ in 0..self.peers {
            let shared = DuplicateStore::new(config).into_shared()?;
            bus.join(shared.channels);
            stores.push(shared.store);
            handles.push(shared.handle);
        }
        tracing::info!(peers = self.peers, "Mesh started");

        let result = run_mesh_script(&script, &stores, out).await;

        for handle in handles {
            handle.shutdown().await;
        }
        result
    }
}

async fn run_mesh_script<W: Write>(
    script: &[ScriptLine],
    stores: &[Arc<DuplicateStore>],
    out: &mut W,
) -> Result<()> {
    for line in script {
        if line.op == Op::Settle {
            settle(stores).await;
            continue;
        }
        let Some(store) = stores.get(line.peer) else {
            continue;
        };
        if let Some(output) = line.op.apply(store) {
            write_line(out, &format!("[{}] {output}", line.peer))?;
        }
    }

    settle(stores).await;
    for (peer, store) in stores.iter().enumerate() {
        write_line(out, &format!("peer {peer}: {}", format_stats(store)))?;
    }
    Ok(())
}

/// Waits until every published update has been applied by every other
/// peer, or [`SETTLE_TIMEOUT`] passes.
async fn settle(stores: &[Arc<DuplicateStore>]) {
    let fanout = stores.len().saturating_sub(1) as u64;
    let settled = || {
        let (published, applied) = stores.iter().fold((0, 0), |(p, a), store| {
            let stats = store.replication_stats();
            (p + stats.published, a + stats.applied)
        });
        applied >= published * fanout
    };

    let wait = async {
        while !settled() {
            tokio::time::sleep(SETTLE_POLL).await;
        }
    };
    if tokio::time::timeout(SETTLE_TIMEOUT, wait).await.is_err() {
        tracing::warn!(timeout = ?SETTLE_TIMEOUT, "Replication did not settle");
    }
}

fn check_peers(script: &[ScriptLine], peers: usize) -> Result<()> {
    match script.iter().find(|line| line.peer >= peers) {
        Some(line) => Err(Error::InvalidInput(format!(
            "line {}: peer {} out of range ({peers} configured)",
            line.line, line.peer
        ))),
        None => Ok(()),
    }
}

/// Prints the effective configuration.
pub struct ConfigCommand;

impl ConfigCommand {
    /// Creates a new config command.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Writes the configuration as `key = value` lines.
    ///
    /// # Errors
    ///
    /// Returns an error if output cannot be written.
    pub fn execute<W: Write>(&self, config: &StoreConfig, out: &mut W) -> Result<()> {
        let logging = config.observability.logging.clone().unwrap_or_default();
        let metrics = config.observability.metrics.clone().unwrap_or_default();

        let lines = [
            format!("hash_capacity = {}", config.hash_capacity),
            format!("replication.enabled = {}", config.replication.enabled),
            format!(
                "replication.channel_capacity = {}",
                config.replication.channel_capacity
            ),
            format!("rate_limit.permits = {}", config.rate_limit.permits),
            format!("rate_limit.window_secs = {}", config.rate_limit.window_secs()),
            format!(
                "observability.logging.format = {}",
                logging.format.as_deref().unwrap_or("pretty")
            ),
            format!(
                "observability.logging.file = {}",
                logging.file.as_deref().unwrap_or("-")
            ),
            format!(
                "observability.metrics.enabled = {}",
                metrics.enabled.unwrap_or(false)
            ),
            format!(
                "observability.metrics.port = {}",
                metrics
                    .port
                    .unwrap_or(crate::observability::DEFAULT_METRICS_PORT)
            ),
        ];
        for line in &lines {
            write_line(out, line)?;
        }
        Ok(())
    }
}

impl Default for ConfigCommand {
    fn default() -> Self {
        Self::new()
    }
}

fn write_line<W: Write>(out: &mut W, line: &str) -> Result<()> {
    writeln!(out, "{line}").map_err(|e| Error::OperationFailed {
        operation: "write_output".to_string(),
        cause: e.to_string(),
    })
}
