//! The synchronizer task and its handle.
//!
//! A single dedicated task owns the model and drains the work queue:
//! one event at a time, handler → commands → executor, then any events
//! enqueued by command execution are drained in the same batch before
//! the quiescence hook fires. Adapters and the facade talk to the task
//! exclusively through [`SynchronizerHandle`], which is what makes
//! dispatch non-reentrant: an in-process peer delivering a message
//! synchronously merely enqueues it.

use crate::config::SyncConfig;
use crate::event::SyncEvent;
use crate::executor::Executor;
use crate::handlers::{handle_event, HandlerContext};
use crate::ready::ReadyTracker;
use crate::registry::DocRegistry;
use crate::rules::SharePolicy;
use skiff_types::{ChannelId, PeerInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

type QuiescentHook = Arc<Mutex<Option<Box<dyn Fn() + Send>>>>;

/// Spawns and owns the synchronizer task.
pub struct Synchronizer;

impl Synchronizer {
    /// Spawns the synchronizer task and its heartbeat timer, returning
    /// the handle everything else uses to reach it.
    ///
    /// The task ends when the last handle is dropped.
    pub fn spawn(
        identity: PeerInfo,
        config: SyncConfig,
        policy: Arc<dyn SharePolicy>,
        registry: DocRegistry,
    ) -> SynchronizerHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();
        let ready = ReadyTracker::new();
        let quiescent: QuiescentHook = Arc::new(Mutex::new(None));

        let handle = SynchronizerHandle {
            tx: tx.clone(),
            ready: ready.clone(),
            registry: registry.clone(),
            identity: identity.clone(),
            config: config.clone(),
            quiescent: quiescent.clone(),
            next_channel_id: Arc::new(AtomicU64::new(1)),
        };

        let mut executor = Executor::new(
            identity.clone(),
            config.clone(),
            policy,
            registry,
            ready,
            tx.clone(),
        );

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                process_event(&mut executor, event);
                // Drain everything already enqueued — including events
                // produced by the commands just executed — before
                // declaring quiescence.
                while let Ok(event) = rx.try_recv() {
                    process_event(&mut executor, event);
                }
                if let Some(hook) = quiescent.lock().expect("quiescent hook poisoned").as_ref() {
                    hook();
                }
            }
            debug!("synchronizer task stopped");
        });

        let heartbeat_tx = tx;
        let interval = config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(SyncEvent::HeartbeatTick).is_err() {
                    break;
                }
            }
        });

        handle
    }
}

fn process_event(executor: &mut Executor, event: SyncEvent) {
    if matches!(event, SyncEvent::HeartbeatTick) {
        executor.sweep_ephemeral();
    }
    let commands = {
        let ctx = HandlerContext {
            model: &executor.model,
            identity: executor.identity(),
            policy: executor.policy(),
            config: executor.config(),
        };
        handle_event(&event, &ctx)
    };
    executor.run(commands);
}

/// Shared handle to a running synchronizer.
#[derive(Clone)]
pub struct SynchronizerHandle {
    tx: mpsc::UnboundedSender<SyncEvent>,
    /// Ready-state hub, shared with the facade.
    pub ready: ReadyTracker,
    /// The document registry, shared with the facade.
    pub registry: DocRegistry,
    identity: PeerInfo,
    config: SyncConfig,
    quiescent: QuiescentHook,
    next_channel_id: Arc<AtomicU64>,
}

impl SynchronizerHandle {
    /// Enqueues an event; silently dropped after shutdown.
    pub fn enqueue(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// A clone of the raw event sender, for adapter plumbing.
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<SyncEvent> {
        self.tx.clone()
    }

    /// Our identity.
    #[must_use]
    pub fn identity(&self) -> &PeerInfo {
        &self.identity
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Allocates a process-unique channel id.
    #[must_use]
    pub fn allocate_channel_id(&self) -> ChannelId {
        ChannelId::new(self.next_channel_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Installs (or replaces) the quiescence hook, called after each
    /// fully drained batch.
    pub fn on_quiescent(&self, hook: impl Fn() + Send + 'static) {
        *self.quiescent.lock().expect("quiescent hook poisoned") = Some(Box::new(hook));
    }
}
