//! Best-effort replication between stores.
//!
//! A shared store exchanges [`PublishMessage`]s with peers over two bounded
//! byte channels. What moves the bytes between processes is up to the
//! caller; [`LocalBus`] connects stores inside one process.
//!
//! # Architecture
//!
//! ```text
//!   see() ──► application queue ──► publisher task ──► outbound (bounded)
//!   (never blocks)   (unbounded)      JSON encode          │
//!                                                          ▼
//!                                                      transport
//!                                                          │
//!   local maps ◄── apply (local only) ◄── consumer task ◄── inbound (bounded)
//! ```
//!
//! Updates applied by the consumer are never published again, so two peers
//! cannot echo each other.
//!
//! # Delivery
//!
//! No acknowledgement, retry or ordering is provided. When the outbound
//! channel is full the publisher task waits; callers of `see` never do.
//! Updates keep queuing in memory behind a stalled transport, so memory
//! grows until the transport drains the outbound channel.

mod bus;

pub use bus::LocalBus;

use crate::models::PublishMessage;
use crate::store::DuplicateStore;
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

/// Transport-facing ends of a shared store's channels.
pub struct ReplicationChannels {
    /// Encoded messages to deliver to peers.
    pub outbound: mpsc::Receiver<Vec<u8>>,
    /// Encoded messages received from peers.
    pub inbound: mpsc::Sender<Vec<u8>>,
}

/// Background tasks of a shared store.
///
/// Dropping the handle does not stop the tasks; they also end on their
/// own when their channels close.
pub struct ReplicationHandle {
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

/// A shared store together with its channels and tasks.
pub struct SharedStore {
    /// The store, for crawl workers.
    pub store: Arc<DuplicateStore>,
    /// Channel ends for the transport.
    pub channels: ReplicationChannels,
    /// Task handle for shutdown.
    pub handle: ReplicationHandle,
}

impl DuplicateStore {
    /// Enables replication and starts the publisher and consumer tasks.
    ///
    /// Both channels are bounded to the configured
    /// [`channel_capacity`](crate::ReplicationConfig::channel_capacity).
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime.
    ///
    /// # Example
    ///
    /// ```rust
    /// use seenstore::{DuplicateStore, Kind, PublishMessage, StoreConfig};
    ///
    /// # tokio_test::block_on(async {
    /// let mut shared = DuplicateStore::new(&StoreConfig::default()).into_shared()?;
    /// shared.store.see("example.com", Kind::Hash, 42);
    ///
    /// let payload = shared.channels.outbound.recv().await.unwrap();
    /// let message = PublishMessage::from_bytes(&payload)?;
    /// assert_eq!(message.value, "2a");
    ///
    /// shared.handle.shutdown().await;
    /// # Ok::<(), seenstore::Error>(())
    /// # }).unwrap();
    /// ```
    pub fn into_shared(mut self) -> Result<SharedStore> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| Error::OperationFailed {
                operation: "start_replication".to_string(),
                cause: e.to_string(),
            })?;

        let capacity = self.channel_capacity;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.publisher = Some(queue_tx);
        let store = Arc::new(self);

        let publisher = runtime.spawn(run_publisher(queue_rx, outbound_tx, shutdown_rx.clone()));
        let consumer = runtime.spawn(run_consumer(
            Arc::downgrade(&store),
            inbound_rx,
            shutdown_rx,
        ));

        tracing::info!(channel_capacity = capacity, "Replication started");

        Ok(SharedStore {
            store,
            channels: ReplicationChannels {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
            handle: ReplicationHandle {
                shutdown: shutdown_tx,
                consumer,
                publisher,
            },
        })
    }
}

impl ReplicationHandle {
    /// Signals both tasks to stop and waits for them.
    ///
    /// Updates still queued for publishing are discarded.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.consumer.await {
            tracing::warn!(error = %e, "Replication consumer task failed");
        }
        if let Err(e) = self.publisher.await {
            tracing::warn!(error = %e, "Replication publisher task failed");
        }
        tracing::info!("Replication stopped");
    }

    /// Returns true once both tasks have exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.consumer.is_finished() && self.publisher.is_finished()
    }
}

/// Resolves when shutdown is signalled. Never resolves if the sender is
/// dropped without signalling.
async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drains the application queue onto the bounded outbound channel.
async fn run_publisher(
    mut queue: mpsc::UnboundedReceiver<PublishMessage>,
    outbound: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) {
    let signal = shutdown_signalled(shutdown);
    tokio::pin!(signal);

    loop {
        let message = tokio::select! {
            biased;
            () = &mut signal => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode replicated update");
                continue;
            },
        };

        tokio::select! {
            biased;
            () = &mut signal => break,
            sent = outbound.send(payload) => {
                if sent.is_ok() {
                    metrics::counter!("seenstore_replication_published_total").increment(1);
                } else {
                    metrics::counter!("seenstore_replication_discarded_total").increment(1);
                    tracing::debug!("Outbound channel closed, discarding update");
                }
            },
        }
    }

    tracing::debug!("Replication publisher exited");
}

/// Applies inbound payloads until the channel closes or shutdown.
async fn run_consumer(
    store: Weak<DuplicateStore>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) {
    let signal = shutdown_signalled(shutdown);
    tokio::pin!(signal);

    loop {
        let payload = tokio::select! {
            biased;
            () = &mut signal => break,
            payload = inbound.recv() => match payload {
                Some(payload) => payload,
                None => {
                    tracing::info!("Inbound channel closed");
                    break;
                },
            },
        };

        let Some(store) = store.upgrade() else {
            break;
        };
        apply_payload(&store, &payload);
    }

    tracing::debug!("Replication consumer exited");
}

/// Decodes one inbound payload and applies it locally.
///
/// Returns true if the payload changed local state. Malformed payloads
/// are logged and dropped; unrecognized messages are dropped silently.
#[instrument(level = "debug", skip_all, fields(payload_len = payload.len()))]
pub(crate) fn apply_payload(store: &DuplicateStore, payload: &[u8]) -> bool {
    let message = match PublishMessage::from_bytes(payload) {
        Ok(message) => message,
        Err(e) => {
            metrics::counter!("seenstore_replication_decode_failed_total").increment(1);
            tracing::warn!(error = %e, "Dropping undecodable replication message");
            return false;
        },
    };

    let Some(update) = message.decode() else {
        metrics::counter!("seenstore_replication_ignored_total").increment(1);
        tracing::debug!(
            function = %message.function,
            kind = %message.kind,
            "Ignoring unrecognized replication message"
        );
        return false;
    };

    store.apply_replicated(&update);
    metrics::counter!("seenstore_replication_applied_total").increment(1);
    true
}
