//! In-process message bus.
//!
//! Forwards every payload a peer publishes to every other peer. Used by the
//! `mesh` command and by tests; production deployments plug the channels
//! into their own transport.

use super::ReplicationChannels;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Peer {
    id: usize,
    inbound: mpsc::Sender<Vec<u8>>,
}

/// Fan-out bus connecting shared stores in one process.
///
/// Clones share the same peer set.
#[derive(Clone, Default)]
pub struct LocalBus {
    peers: Arc<RwLock<Vec<Peer>>>,
    next_id: Arc<AtomicUsize>,
}

impl LocalBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a store's channels to the bus.
    ///
    /// Spawns a forwarder that copies each outbound payload to every other
    /// peer's inbound channel. The forwarder exits when the store's
    /// publisher closes its outbound channel. Must be called inside a tokio
    /// runtime.
    pub fn join(&self, channels: ReplicationChannels) -> JoinHandle<()> {
        let ReplicationChannels {
            mut outbound,
            inbound,
        } = channels;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        match self.peers.write() {
            Ok(mut peers) => peers.push(Peer { id, inbound }),
            Err(poisoned) => poisoned.into_inner().push(Peer { id, inbound }),
        }
        tracing::debug!(peer = id, "Peer joined local bus");

        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = outbound.recv().await {
                for target in bus.targets(id) {
                    if target.send(payload.clone()).await.is_err() {
                        tracing::debug!(peer = id, "Peer inbound closed, skipping");
                    }
                }
            }
            bus.leave(id);
        })
    }

    /// Returns the number of attached peers.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.peers.read() {
            Ok(peers) => peers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Returns true if no peers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn targets(&self, source: usize) -> Vec<mpsc::Sender<Vec<u8>>> {
        let collect = |peers: &[Peer]| {
            peers
                .iter()
                .filter(|peer| peer.id != source)
                .map(|peer| peer.inbound.clone())
                .collect()
        };
        match self.peers.read() {
            Ok(peers) => collect(peers.as_slice()),
            Err(poisoned) => collect(poisoned.into_inner().as_slice()),
        }
    }

    fn leave(&self, id: usize) {
        match self.peers.write() {
            Ok(mut peers) => peers.retain(|peer| peer.id != id),
            Err(poisoned) => poisoned.into_inner().retain(|peer| peer.id != id),
        }
        tracing::debug!(peer = id, "Peer left local bus");
    }
}
