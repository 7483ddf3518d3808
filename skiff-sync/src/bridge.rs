//! In-process bridge adapter.
//!
//! Two endpoints joined by byte queues — the reference transport for
//! tests and for replicating between two repos in one process. Each
//! endpoint carries exactly one channel. Delivery crosses the work
//! queue like any other transport, so two in-process peers cannot
//! recurse into each other.

use crate::adapter::{ChannelActions, ChannelAdapter, ChannelContext};
use crate::error::SyncError;
use skiff_types::{AdapterId, AdapterType, ChannelKind};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One endpoint of an in-process byte pipe.
pub struct BridgeAdapter {
    kind: ChannelKind,
    payload_limit: Option<usize>,
    adapter_id: AdapterId,
    to_peer: mpsc::UnboundedSender<Vec<u8>>,
    from_peer: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl BridgeAdapter {
    /// Creates two joined network-kind endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with(ChannelKind::Network, None)
    }

    /// Creates two joined endpoints with a kind and payload limit.
    #[must_use]
    pub fn pair_with(kind: ChannelKind, payload_limit: Option<usize>) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            kind,
            payload_limit,
            adapter_id: AdapterId::random(),
            to_peer: b_tx,
            from_peer: Mutex::new(Some(a_rx)),
        };
        let b = Self {
            kind,
            payload_limit,
            adapter_id: AdapterId::random(),
            to_peer: a_tx,
            from_peer: Mutex::new(Some(b_rx)),
        };
        (a, b)
    }
}

impl ChannelAdapter for BridgeAdapter {
    fn adapter_type(&self) -> AdapterType {
        AdapterType::new("bridge")
    }

    fn adapter_id(&self) -> AdapterId {
        self.adapter_id.clone()
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn payload_limit(&self) -> Option<usize> {
        self.payload_limit
    }

    fn generate(&self, ctx: ChannelContext) -> ChannelActions {
        let receiver = self
            .from_peer
            .lock()
            .expect("bridge endpoint poisoned")
            .take();

        let forwarder = tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                return;
            };
            while let Some(bytes) = receiver.recv().await {
                ctx.inbound.push_payload(&bytes);
            }
            ctx.inbound.dispose();
        });

        let to_peer = self.to_peer.clone();
        ChannelActions {
            send: Box::new(move |bytes| {
                to_peer
                    .send(bytes)
                    .map_err(|_| SyncError::Shutdown)
            }),
            stop: Box::new(move || {
                forwarder.abort();
            }),
        }
    }
}
