//! User-transform surface for Operator tasks (spec.md §3/§4.5). User-defined
//! transforms are themselves out of scope (spec.md §1); this module is the
//! narrow trait boundary C5 dispatches through, plus a `VecSource` used by
//! tests and the demo binary in place of a real external source connector.

use crate::error::WorkerError;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use vortex_core::TaskId;

/// A bounded-source task's external input: a finite, already-materialized
/// iterable (spec.md §3's "reads from an external source and emits a finite
/// iterable").
pub trait BoundedSource: Send + Sync {
    fn read_all(&self) -> Result<Vec<Bytes>, WorkerError>;
}

/// An in-memory `BoundedSource`, standing in for a real connector.
pub struct VecSource {
    elements: Vec<Bytes>,
}

impl VecSource {
    pub fn new(elements: Vec<Bytes>) -> Self {
        Self { elements }
    }
}

impl BoundedSource for VecSource {
    fn read_all(&self) -> Result<Vec<Bytes>, WorkerError> {
        Ok(self.elements.clone())
    }
}

/// Side-input values, materialized once before any call to `on_data`
/// (spec.md §4.5), keyed by the upstream source-vertex id they were read
/// from.
#[derive(Debug, Default, Clone)]
pub struct OperatorContext {
    pub side_inputs: HashMap<String, Vec<Bytes>>,
}

impl OperatorContext {
    pub fn side_input(&self, src_vertex_id: &str) -> Option<&[Bytes]> {
        self.side_inputs.get(src_vertex_id).map(|v| v.as_slice())
    }
}

/// The user transform wrapped by an Operator task (spec.md §3/§4.5).
/// `on_data` is called once per `(iterable, srcVertexId)` pair consumed from
/// the operator's read queue; `close` is called once after the read loop
/// ends, to flush any buffered output.
pub trait Transform: Send {
    fn on_data(
        &mut self,
        ctx: &OperatorContext,
        elements: Vec<Bytes>,
        src_vertex_id: &str,
    ) -> Result<Vec<Bytes>, WorkerError>;

    fn close(&mut self, ctx: &OperatorContext) -> Result<Vec<Bytes>, WorkerError>;
}

/// A transform that emits every element it receives unchanged; used by the
/// metric-collection-barrier task variant (spec.md §4.5: "passes data
/// through unchanged") and by tests that only need pass-through wiring.
pub struct Identity;

impl Transform for Identity {
    fn on_data(
        &mut self,
        _ctx: &OperatorContext,
        elements: Vec<Bytes>,
        _src_vertex_id: &str,
    ) -> Result<Vec<Bytes>, WorkerError> {
        Ok(elements)
    }

    fn close(&mut self, _ctx: &OperatorContext) -> Result<Vec<Bytes>, WorkerError> {
        Ok(Vec::new())
    }
}

/// Resolves a `ScheduleTaskGroup`'s bounded sources and operator transforms
/// by task id. User transforms are out of scope of the wire protocol
/// (spec.md §1: "the internal data-processing semantics... are out of
/// scope"), so the executor looks them up here instead of deserializing
/// them from the control message — a binary wires one of these up front,
/// the same way a real cluster would ship user code to a worker ahead of
/// scheduling rather than over the control channel.
pub trait TransformRegistry: Send + Sync {
    fn source_for(&self, task_id: &TaskId) -> Option<Arc<dyn BoundedSource>>;
    fn transform_for(&self, task_id: &TaskId) -> Option<Box<dyn Transform>>;
}

/// A `TransformRegistry` that always hands out `Identity` transforms and
/// empty sources — useful for metric-barrier-only task groups and tests
/// that don't exercise user code.
#[derive(Debug, Default)]
pub struct NullTransformRegistry;

impl TransformRegistry for NullTransformRegistry {
    fn source_for(&self, _task_id: &TaskId) -> Option<Arc<dyn BoundedSource>> {
        None
    }

    fn transform_for(&self, _task_id: &TaskId) -> Option<Box<dyn Transform>> {
        Some(Box::new(Identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_returns_a_clone_of_its_elements_each_call() {
        let source = VecSource::new(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(source.read_all().unwrap().len(), 2);
        assert_eq!(source.read_all().unwrap().len(), 2);
    }

    #[test]
    fn identity_forwards_elements_and_flushes_nothing_on_close() {
        let mut identity = Identity;
        let ctx = OperatorContext::default();
        let out = identity
            .on_data(&ctx, vec![Bytes::from_static(b"x")], "src")
            .unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"x")]);
        assert!(identity.close(&ctx).unwrap().is_empty());
    }

    #[test]
    fn null_registry_always_hands_out_identity_and_no_source() {
        let registry = NullTransformRegistry;
        let task_id = TaskId::new("t0");
        assert!(registry.source_for(&task_id).is_none());
        assert!(registry.transform_for(&task_id).is_some());
    }
}
