//! The skiff synchronizer.
//!
//! Drives dozens of concurrent channels through the connect → establish
//! → discover → sync → relay lifecycle against a shared document
//! registry. The architecture is a strict read/decide/apply split:
//!
//! - **Model** ([`SyncModel`]) — documents, channels, peers, and the
//!   per-peer awareness cache.
//! - **Handlers** ([`handlers`]) — pure functions from an event and the
//!   model to a command list.
//! - **Executor** — the only mutator: applies commands, imports into
//!   engines, flushes batched sends per channel.
//! - **Work queue** — one dedicated task drains every source of change
//!   in order; dispatch is non-reentrant by construction.
//!
//! Adapters plug in through [`AdapterHost`]; the in-process
//! [`BridgeAdapter`] is the reference transport.

mod adapter;
mod bridge;
mod command;
mod config;
mod ephemeral;
mod error;
mod event;
mod executor;
pub mod handlers;
mod model;
mod ready;
mod registry;
mod rules;
mod synchronizer;

pub use adapter::{
    AdapterHost, ChannelActions, ChannelAdapter, ChannelContext, InboundSink, SendDecision,
    SendEnvelope, SendInterceptor,
};
pub use bridge::BridgeAdapter;
pub use command::Command;
pub use config::SyncConfig;
pub use ephemeral::{EphemeralDocStore, PresenceSubscription};
pub use error::{SyncError, SyncResult};
pub use event::SyncEvent;
pub use executor::Executor;
pub use model::{
    Channel, ChannelState, DocAwareness, DocState, PeerState, SharedDoc, SyncModel,
};
pub use ready::{ReadyState, ReadySubscription, ReadyTracker, WaiterGuard};
pub use registry::{DocRegistry, DocShared, EngineFactory};
pub use rules::{AllowAll, RuleContext, SharePolicy};
pub use synchronizer::{Synchronizer, SynchronizerHandle};
