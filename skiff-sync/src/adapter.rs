//! Adapter base: uniform channel lifecycle across transports.
//!
//! A transport implements [`ChannelAdapter`] — a factory for one
//! channel's raw send/stop functions — and the [`AdapterHost`] wraps it
//! with everything transports should never reimplement: channel id
//! allocation, the outbound pump (interceptors → framing → batching →
//! fragmentation), and the inbound path (reassembly → decode → work
//! queue).

use crate::error::SyncError;
use crate::event::SyncEvent;
use crate::synchronizer::SynchronizerHandle;
use async_trait::async_trait;
use skiff_types::{AdapterId, AdapterType, ChannelId, ChannelKind};
use skiff_wire::{
    decode_frame, encode_batch_frame, encode_frame, fragment_payload, FragmentPayload, Message,
    Reassembler, ReassemblyConfig, ReassemblyOutcome,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Raw per-channel functions produced by a transport.
pub struct ChannelActions {
    /// Pushes one transport payload (fragment-prefixed bytes) to the
    /// remote side.
    pub send: Box<dyn FnMut(Vec<u8>) -> Result<(), SyncError> + Send>,
    /// Tears the underlying connection down.
    pub stop: Box<dyn FnOnce() + Send>,
}

/// What the base gives a transport when generating a channel.
pub struct ChannelContext {
    /// The allocated channel id.
    pub channel_id: ChannelId,
    /// Where the transport pushes inbound payloads.
    pub inbound: InboundSink,
}

/// A transport class pluggable into the synchronizer.
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Class tag shared by all instances of this transport.
    fn adapter_type(&self) -> AdapterType;

    /// This instance's id.
    fn adapter_id(&self) -> AdapterId;

    /// Trust classification of channels from this adapter.
    fn kind(&self) -> ChannelKind;

    /// Payload size limit; payloads above it are fragmented.
    fn payload_limit(&self) -> Option<usize> {
        None
    }

    /// Produces the raw send/stop functions for one channel.
    fn generate(&self, ctx: ChannelContext) -> ChannelActions;
}

/// Inbound half of a channel: reassembles, decodes, and enqueues.
///
/// Reassembly and decode failures are logged and dropped; the channel
/// survives them.
pub struct InboundSink {
    channel_id: ChannelId,
    queue: mpsc::UnboundedSender<SyncEvent>,
    reassembler: Mutex<Reassembler>,
}

impl InboundSink {
    fn new(channel_id: ChannelId, queue: mpsc::UnboundedSender<SyncEvent>) -> Self {
        let mut reassembler = Reassembler::new(ReassemblyConfig::default());
        reassembler.set_evict_callback(move |batch, reason| {
            warn!(%channel_id, ?batch, ?reason, "reassembly batch evicted");
        });
        Self {
            channel_id,
            queue,
            reassembler: Mutex::new(reassembler),
        }
    }

    /// Feeds one raw transport payload (with fragment prefix).
    pub fn push_payload(&self, bytes: &[u8]) {
        let outcome = {
            let mut reassembler = self.reassembler.lock().expect("reassembler poisoned");
            reassembler.accept(bytes)
        };
        match outcome {
            Ok(ReassemblyOutcome::Complete(frame)) => self.push_frame(&frame),
            Ok(ReassemblyOutcome::Pending) => {}
            Err(e) => warn!(channel_id = %self.channel_id, error = %e, "dropping fragment"),
        }
    }

    /// Feeds one complete frame.
    pub fn push_frame(&self, frame: &[u8]) {
        match decode_frame(frame) {
            Ok(messages) => {
                for message in messages {
                    self.push_message(message);
                }
            }
            Err(e) => warn!(channel_id = %self.channel_id, error = %e, "dropping undecodable frame"),
        }
    }

    /// Feeds one already-decoded message.
    pub fn push_message(&self, message: Message) {
        let _ = self.queue.send(SyncEvent::Inbound {
            channel_id: self.channel_id,
            message,
        });
    }

    /// Releases reassembly buffers (channel teardown).
    pub fn dispose(&self) {
        self.reassembler
            .lock()
            .expect("reassembler poisoned")
            .dispose();
    }
}

/// An outgoing flush as seen by interceptors.
pub struct SendEnvelope {
    /// Destination channel.
    pub channel_id: ChannelId,
    /// Transport class of the destination.
    pub adapter_type: AdapterType,
    /// Adapter instance of the destination.
    pub adapter_id: AdapterId,
    /// The messages about to be framed.
    pub messages: Vec<Message>,
}

/// What an interceptor decides about an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Hand the envelope to the next interceptor (or the wire).
    Forward,
    /// Swallow it — indistinguishable from packet loss.
    Drop,
    /// Sleep before continuing the chain. Subsequent envelopes on the
    /// same channel queue behind the delay, preserving order.
    Delay(Duration),
}

/// Send-side middleware: loss and latency simulation in tests, rate
/// limiting in production.
#[async_trait]
pub trait SendInterceptor: Send + Sync {
    /// Inspects one envelope before it reaches the transport.
    async fn intercept(&self, envelope: &SendEnvelope) -> SendDecision;
}

struct ChannelRuntime {
    stop: Option<Box<dyn FnOnce() + Send>>,
    pump: tokio::task::JoinHandle<()>,
}

/// Binds one adapter instance to a synchronizer.
pub struct AdapterHost {
    adapter: Arc<dyn ChannelAdapter>,
    handle: SynchronizerHandle,
    interceptors: Arc<Vec<Arc<dyn SendInterceptor>>>,
    channels: Mutex<HashMap<ChannelId, ChannelRuntime>>,
}

impl AdapterHost {
    /// Wraps an adapter, registering its kind with the synchronizer.
    pub fn new(
        adapter: Arc<dyn ChannelAdapter>,
        handle: SynchronizerHandle,
        interceptors: Vec<Arc<dyn SendInterceptor>>,
    ) -> Arc<Self> {
        handle.ready.note_adapter_kind(adapter.kind());
        Arc::new(Self {
            adapter,
            handle,
            interceptors: Arc::new(interceptors),
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Creates and registers a Connected channel; returns its id.
    pub fn add_channel(&self) -> ChannelId {
        let channel_id = self.handle.allocate_channel_id();
        let inbound = InboundSink::new(channel_id, self.handle.sender());
        let actions = self.adapter.generate(ChannelContext {
            channel_id,
            inbound,
        });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<Message>>();
        let pump = tokio::spawn(run_pump(
            channel_id,
            self.adapter.adapter_type(),
            self.adapter.adapter_id(),
            self.adapter.payload_limit(),
            self.interceptors.clone(),
            outbound_rx,
            actions.send,
            self.handle.sender(),
        ));

        self.channels.lock().expect("adapter host poisoned").insert(
            channel_id,
            ChannelRuntime {
                stop: Some(actions.stop),
                pump,
            },
        );

        info!(%channel_id, adapter = %self.adapter.adapter_type(), "channel added");
        self.handle.enqueue(SyncEvent::ChannelAdded {
            channel_id,
            adapter_type: self.adapter.adapter_type(),
            adapter_id: self.adapter.adapter_id(),
            kind: self.adapter.kind(),
            outbound: outbound_tx,
        });
        channel_id
    }

    /// Tears a channel down and tells the synchronizer.
    pub fn remove_channel(&self, channel_id: ChannelId) {
        let runtime = self
            .channels
            .lock()
            .expect("adapter host poisoned")
            .remove(&channel_id);
        if let Some(mut runtime) = runtime {
            if let Some(stop) = runtime.stop.take() {
                stop();
            }
            runtime.pump.abort();
            info!(%channel_id, "channel removed");
        }
        self.handle.enqueue(SyncEvent::ChannelRemoved { channel_id });
    }

    /// Starts the establishment handshake (initiator side).
    pub fn establish_channel(&self, channel_id: ChannelId) {
        self.handle
            .enqueue(SyncEvent::EstablishChannel { channel_id });
    }

    /// The wrapped adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ChannelAdapter> {
        &self.adapter
    }
}

/// Per-channel outbound pump: envelope → interceptors → frame →
/// fragments → transport. One task per channel keeps per-channel order.
#[allow(clippy::too_many_arguments)]
async fn run_pump(
    channel_id: ChannelId,
    adapter_type: AdapterType,
    adapter_id: AdapterId,
    payload_limit: Option<usize>,
    interceptors: Arc<Vec<Arc<dyn SendInterceptor>>>,
    mut outbound: mpsc::UnboundedReceiver<Vec<Message>>,
    mut send: Box<dyn FnMut(Vec<u8>) -> Result<(), SyncError> + Send>,
    queue: mpsc::UnboundedSender<SyncEvent>,
) {
    'envelopes: while let Some(messages) = outbound.recv().await {
        let envelope = SendEnvelope {
            channel_id,
            adapter_type: adapter_type.clone(),
            adapter_id: adapter_id.clone(),
            messages,
        };
        for interceptor in interceptors.iter() {
            match interceptor.intercept(&envelope).await {
                SendDecision::Forward => {}
                SendDecision::Drop => {
                    debug!(%channel_id, "interceptor dropped envelope");
                    continue 'envelopes;
                }
                SendDecision::Delay(delay) => tokio::time::sleep(delay).await,
            }
        }

        let frame = match envelope.messages.len() {
            1 => encode_frame(&envelope.messages[0]),
            _ => encode_batch_frame(&envelope.messages),
        };
        let payloads = match payload_limit {
            Some(limit) => fragment_payload(&frame, limit),
            None => vec![FragmentPayload::Complete(frame).encode()],
        };
        for payload in payloads {
            if let Err(e) = send(payload) {
                warn!(%channel_id, error = %e, "transport send failed; removing channel");
                let _ = queue.send(SyncEvent::ChannelRemoved { channel_id });
                break 'envelopes;
            }
        }
    }
}
