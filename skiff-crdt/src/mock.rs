//! In-memory op-set engine used by tests across the workspace.
//!
//! `MockDoc` is a grow-only set of `(writer, seq, payload)` operations
//! merged by union, with a per-writer counter clock. Union merge is
//! commutative, associative, and idempotent, so two replicas exchanging
//! exports always converge — exactly the property the synchronizer's
//! tests need to observe.

use crate::engine::{ChangeOrigin, CrdtDoc, DocChange, EngineError, ExportMode, SubscriptionId};
use crate::version::{CausalOrder, VersionVector};
use ciborium::value::Value;
use std::collections::{BTreeMap, HashMap};

type ChangeFn = Box<dyn FnMut(&DocChange) + Send>;

/// Test engine: a union-merged operation set with a per-writer clock.
pub struct MockDoc {
    writer: String,
    ops: BTreeMap<(String, u64), Vec<u8>>,
    clock: BTreeMap<String, u64>,
    subscribers: HashMap<u64, ChangeFn>,
    next_subscription: u64,
}

impl MockDoc {
    /// Creates an empty document writing as `writer`.
    #[must_use]
    pub fn new(writer: impl Into<String>) -> Self {
        Self {
            writer: writer.into(),
            ops: BTreeMap::new(),
            clock: BTreeMap::new(),
            subscribers: HashMap::new(),
            next_subscription: 0,
        }
    }

    /// Appends a local operation carrying `payload`.
    pub fn apply(&mut self, payload: impl Into<Vec<u8>>) {
        let seq = self.clock.get(&self.writer).copied().unwrap_or(0) + 1;
        self.ops.insert((self.writer.clone(), seq), payload.into());
        self.clock.insert(self.writer.clone(), seq);
        self.notify(ChangeOrigin::Local);
    }

    /// Appends a local text insertion.
    pub fn insert_text(&mut self, text: &str) {
        self.apply(text.as_bytes().to_vec());
    }

    /// Concatenation of all payloads in `(seq, writer)` order, lossily
    /// decoded as UTF-8. Deterministic across converged replicas.
    #[must_use]
    pub fn text(&self) -> String {
        let mut entries: Vec<(&(String, u64), &Vec<u8>)> = self.ops.iter().collect();
        entries.sort_by(|a, b| (a.0 .1, &a.0 .0).cmp(&(b.0 .1, &b.0 .0)));
        entries
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload))
            .collect()
    }

    fn notify(&mut self, origin: ChangeOrigin) {
        let change = DocChange {
            version: self.version(),
            origin,
        };
        for cb in self.subscribers.values_mut() {
            cb(&change);
        }
    }

    fn encode_clock(clock: &BTreeMap<String, u64>) -> Vec<u8> {
        let entries: Vec<(Value, Value)> = clock
            .iter()
            .map(|(peer, seq)| (Value::Text(peer.clone()), Value::Integer((*seq).into())))
            .collect();
        let mut buf = Vec::new();
        // Writing a Value into a Vec cannot fail.
        let _ = ciborium::into_writer(&Value::Map(entries), &mut buf);
        buf
    }

    fn decode_clock(vv: &VersionVector) -> Result<BTreeMap<String, u64>, EngineError> {
        if vv.is_empty() {
            return Ok(BTreeMap::new());
        }
        let value: Value = ciborium::from_reader(vv.as_bytes())
            .map_err(|e| EngineError::InvalidVersion(e.to_string()))?;
        let Value::Map(entries) = value else {
            return Err(EngineError::InvalidVersion("not a map".into()));
        };
        let mut clock = BTreeMap::new();
        for (k, v) in entries {
            let (Value::Text(peer), Value::Integer(seq)) = (k, v) else {
                return Err(EngineError::InvalidVersion("bad clock entry".into()));
            };
            let seq: u64 = u64::try_from(i128::from(seq))
                .map_err(|_| EngineError::InvalidVersion("negative counter".into()))?;
            clock.insert(peer, seq);
        }
        Ok(clock)
    }

    fn encode_ops<'a>(ops: impl Iterator<Item = (&'a (String, u64), &'a Vec<u8>)>) -> Vec<u8> {
        let entries: Vec<Value> = ops
            .map(|((peer, seq), payload)| {
                Value::Array(vec![
                    Value::Text(peer.clone()),
                    Value::Integer((*seq).into()),
                    Value::Bytes(payload.clone()),
                ])
            })
            .collect();
        let mut buf = Vec::new();
        let _ = ciborium::into_writer(&Value::Array(entries), &mut buf);
        buf
    }
}

impl CrdtDoc for MockDoc {
    fn version(&self) -> VersionVector {
        if self.clock.is_empty() {
            return VersionVector::default();
        }
        VersionVector::from_bytes(Self::encode_clock(&self.clock))
    }

    fn import(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|e| EngineError::ImportFailed(e.to_string()))?;
        let Value::Array(entries) = value else {
            return Err(EngineError::ImportFailed("payload is not an op list".into()));
        };

        let mut changed = false;
        for entry in entries {
            let Value::Array(parts) = entry else {
                return Err(EngineError::ImportFailed("malformed op".into()));
            };
            let [Value::Text(peer), Value::Integer(seq), Value::Bytes(payload)] = parts.as_slice()
            else {
                return Err(EngineError::ImportFailed("malformed op".into()));
            };
            let seq: u64 = u64::try_from(i128::from(*seq))
                .map_err(|_| EngineError::ImportFailed("negative seq".into()))?;

            if self.ops.insert((peer.clone(), seq), payload.clone()).is_none() {
                changed = true;
                let counter = self.clock.entry(peer.clone()).or_insert(0);
                if seq > *counter {
                    *counter = seq;
                }
            }
        }

        if changed {
            self.notify(ChangeOrigin::Import);
        }
        Ok(())
    }

    fn export(&self, mode: ExportMode) -> Result<Vec<u8>, EngineError> {
        match mode {
            ExportMode::Snapshot => Ok(Self::encode_ops(self.ops.iter())),
            ExportMode::UpdatesSince(since) => {
                let their_clock = Self::decode_clock(&since)
                    .map_err(|e| EngineError::ExportFailed(e.to_string()))?;
                let newer = self.ops.iter().filter(|((peer, seq), _)| {
                    *seq > their_clock.get(peer).copied().unwrap_or(0)
                });
                Ok(Self::encode_ops(newer))
            }
        }
    }

    fn subscribe(&mut self, cb: Box<dyn FnMut(&DocChange) + Send>) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.insert(id, cb);
        SubscriptionId(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.remove(&id.0);
    }

    fn op_count(&self) -> u64 {
        self.ops.len() as u64
    }

    fn is_detached(&self) -> bool {
        false
    }

    fn checkout_to_latest(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn compare(&self, a: &VersionVector, b: &VersionVector) -> Result<CausalOrder, EngineError> {
        let clock_a = Self::decode_clock(a)?;
        let clock_b = Self::decode_clock(b)?;

        let mut a_dominates = true;
        let mut b_dominates = true;
        for peer in clock_a.keys().chain(clock_b.keys()) {
            let ta = clock_a.get(peer).copied().unwrap_or(0);
            let tb = clock_b.get(peer).copied().unwrap_or(0);
            if ta < tb {
                a_dominates = false;
            }
            if tb < ta {
                b_dominates = false;
            }
        }

        Ok(match (a_dominates, b_dominates) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (false, false) => CausalOrder::Concurrent,
        })
    }
}
