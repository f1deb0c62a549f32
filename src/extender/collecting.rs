//! Accumulation buffers for collecting port groups.
//!
//! A collecting group's outputs carry the history of a loop: each
//! `collect` call appends the payload at every connected managed input to
//! that input's buffer and delivers the collection so far to the paired
//! output. The buffers live behind a shared handle so hosts can inspect
//! them while the graph is elsewhere; a `collect` step runs under a
//! single lock on them, so a reader on another thread sees whole steps
//! only. Buffers survive the growth updates that renumber the managed
//! pairs, but a pair retired by growth takes its bucket with it.

use crate::error::{PortError, PortResult};
use crate::extender::ExtenderKind;
use crate::graph::{ClearFlags, ExtenderId, FlowGraph, PortId};
use crate::payload::{Payload, PayloadCollection};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a collecting group's outputs carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Outputs deliver the accumulated collection after each `collect`.
    #[default]
    Collecting,

    /// The host drives outputs per iteration itself; `collect` does
    /// nothing.
    Iterating,
}

/// Shared handle on a collecting group's buffers. Clones see the same
/// buffers.
#[derive(Clone, Default)]
pub struct CollectorHandle {
    buffers: Arc<Mutex<HashMap<PortId, Vec<Arc<dyn Payload>>>>>,
}

impl CollectorHandle {
    fn lock(&self) -> MutexGuard<'_, HashMap<PortId, Vec<Arc<dyn Payload>>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of what has accumulated for one managed input.
    pub fn collected(&self, input: PortId) -> Vec<Arc<dyn Payload>> {
        self.lock().get(&input).cloned().unwrap_or_default()
    }

    /// Payloads buffered across all inputs.
    pub fn total(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Drop the buckets of inputs that are no longer managed.
    pub(crate) fn retain_inputs(&self, live: &[PortId]) {
        self.lock().retain(|input, _| live.contains(input));
    }
}

impl fmt::Debug for CollectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorHandle")
            .field("total", &self.total())
            .finish()
    }
}

impl FlowGraph {
    fn collector_parts(
        &self,
        id: ExtenderId,
    ) -> PortResult<(Vec<(PortId, PortId)>, OutputMode, bool, CollectorHandle)> {
        let Some(slot) = self.extenders.get(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        match &slot.kind {
            ExtenderKind::Collecting {
                mode,
                clear_inputs,
                entries,
                buffers,
                ..
            } => Ok((
                entries.iter().map(|p| (p.input, p.output)).collect(),
                *mode,
                *clear_inputs,
                buffers.clone(),
            )),
            _ => Err(PortError::NotCollecting {
                name: slot.name.clone(),
            }),
        }
    }

    /// Drop everything accumulated so far. In collecting mode every
    /// connected output restarts from an empty collection; otherwise
    /// output data is cleared.
    pub fn reset_collector(&mut self, id: ExtenderId) -> PortResult<()> {
        let (pairs, mode, _, buffers) = self.collector_parts(id)?;
        buffers.clear();
        for (_, output) in pairs {
            if mode == OutputMode::Collecting && self.is_connected(output) {
                self.deliver(output, Arc::new(PayloadCollection::new()))?;
            } else {
                self.clear_port(output, ClearFlags::DATA)?;
            }
        }
        Ok(())
    }

    /// One accumulation step: append the payload at every connected
    /// managed input to its buffer and deliver the collection so far to
    /// the paired output. The buffers stay locked across the whole step,
    /// so a handle polling from another thread sees either the previous
    /// step or this one, never part of it. Disconnected inputs never
    /// contribute, even when stale data sits on them; inputs without a
    /// packet are skipped. In iterating mode this is a no-op.
    pub fn collect(&mut self, id: ExtenderId) -> PortResult<()> {
        let (pairs, mode, clear_inputs, buffers) = self.collector_parts(id)?;
        if mode == OutputMode::Iterating {
            return Ok(());
        }
        let mut step = buffers.lock();
        for (input, output) in pairs {
            if !self.is_connected(input) {
                continue;
            }
            let Some(payload) = self.data(input).cloned() else {
                continue;
            };
            let bucket = step.entry(input).or_default();
            bucket.push(payload);
            let items = bucket.clone();
            self.deliver(output, Arc::new(PayloadCollection::from_items(items)))?;
            if clear_inputs {
                self.clear_port(input, ClearFlags::DATA)?;
            }
        }
        Ok(())
    }

    /// Switch what the outputs carry. Takes effect at the next
    /// `reset_collector` or `collect`; already-delivered data stays put.
    pub fn set_output_mode(&mut self, id: ExtenderId, mode: OutputMode) -> PortResult<()> {
        let Some(slot) = self.extenders.get_mut(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        match &mut slot.kind {
            ExtenderKind::Collecting { mode: current, .. } => {
                *current = mode;
                Ok(())
            }
            _ => Err(PortError::NotCollecting {
                name: slot.name.clone(),
            }),
        }
    }

    pub fn output_mode(&self, id: ExtenderId) -> Option<OutputMode> {
        self.extenders.get(id).and_then(|slot| slot.output_mode())
    }

    /// Clear each input's data once it has been appended during `collect`.
    pub fn set_clear_inputs(&mut self, id: ExtenderId, clear: bool) -> PortResult<()> {
        let Some(slot) = self.extenders.get_mut(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        match &mut slot.kind {
            ExtenderKind::Collecting { clear_inputs, .. } => {
                *clear_inputs = clear;
                Ok(())
            }
            _ => Err(PortError::NotCollecting {
                name: slot.name.clone(),
            }),
        }
    }

    /// Shared handle on a collecting group's buffers.
    pub fn collector(&self, id: ExtenderId) -> PortResult<CollectorHandle> {
        self.collector_parts(id).map(|(_, _, _, buffers)| buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BankRef;
    use std::any::Any;
    use std::thread;

    #[derive(Debug)]
    struct Step(u32);

    impl Payload for Step {
        fn kind(&self) -> &'static str {
            "step"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn step_value(payload: &Arc<dyn Payload>) -> u32 {
        payload.as_any().downcast_ref::<Step>().map(|s| s.0).unwrap()
    }

    #[test]
    fn test_handle_buffers_in_order() {
        let handle = CollectorHandle::default();
        let key = PortId::INVALID;

        {
            let mut buffers = handle.lock();
            let bucket = buffers.entry(key).or_default();
            bucket.push(Arc::new(Step(1)));
            bucket.push(Arc::new(Step(2)));
        }
        let items = handle.collected(key);
        assert_eq!(items.len(), 2);
        assert_eq!(step_value(&items[0]), 1);
        assert_eq!(step_value(&items[1]), 2);
        assert_eq!(handle.total(), 2);

        handle.clear();
        assert_eq!(handle.total(), 0);
        assert!(handle.collected(key).is_empty());
    }

    /// Producer wired to the first managed input of a collecting group.
    fn rig() -> (FlowGraph, ExtenderId, PortId, PortId, PortId) {
        let mut graph = FlowGraph::new();
        let root = graph.root();
        let producer = graph.add_operator(root, "Producer").unwrap();
        let looper = graph.add_operator(root, "Looper").unwrap();
        let source = graph
            .create_port(BankRef::OpOutputs(producer), "result")
            .unwrap();
        let ext = graph
            .add_collecting_extender(
                "output",
                BankRef::OpInputs(looper),
                BankRef::OpOutputs(looper),
            )
            .unwrap();
        graph.start_extender(ext).unwrap();

        let (input, output) = graph.extender(ext).unwrap().managed_pairs()[0];
        graph.connect(source, input).unwrap();
        (graph, ext, source, input, output)
    }

    fn collection_at(graph: &FlowGraph, port: PortId) -> Vec<u32> {
        let payload = graph.data(port).unwrap();
        let collection = payload
            .as_any()
            .downcast_ref::<PayloadCollection>()
            .unwrap();
        collection.iter().map(step_value).collect()
    }

    #[test]
    fn test_collect_accumulates_across_iterations() {
        let (mut graph, ext, source, _, output) = rig();
        graph.reset_collector(ext).unwrap();

        for round in 1..=3 {
            graph.deliver(source, Arc::new(Step(round))).unwrap();
            graph.collect(ext).unwrap();
        }

        assert_eq!(collection_at(&graph, output), vec![1, 2, 3]);
        assert_eq!(graph.collector(ext).unwrap().total(), 3);
    }

    #[test]
    fn test_reset_starts_over() {
        let (mut graph, ext, source, _, output) = rig();
        graph.reset_collector(ext).unwrap();
        graph.deliver(source, Arc::new(Step(7))).unwrap();
        graph.collect(ext).unwrap();

        graph.reset_collector(ext).unwrap();
        assert_eq!(graph.collector(ext).unwrap().total(), 0);

        graph.deliver(source, Arc::new(Step(9))).unwrap();
        graph.collect(ext).unwrap();
        assert_eq!(collection_at(&graph, output), vec![9]);
    }

    #[test]
    fn test_disconnected_input_never_contributes() {
        let (mut graph, ext, source, input, output) = rig();
        graph.reset_collector(ext).unwrap();
        graph.deliver(source, Arc::new(Step(4))).unwrap();
        graph.disconnect(input).unwrap();

        // Stale data still sits at the input, but it is unwired.
        graph.collect(ext).unwrap();
        assert_eq!(graph.collector(ext).unwrap().total(), 0);
        assert!(graph.data(output).is_none());
    }

    /// Producer wired to the first `n` managed inputs of a collecting
    /// group.
    fn wide_rig(n: usize) -> (FlowGraph, ExtenderId, Vec<PortId>) {
        let mut graph = FlowGraph::new();
        let root = graph.root();
        let producer = graph.add_operator(root, "Producer").unwrap();
        let looper = graph.add_operator(root, "Looper").unwrap();
        let ext = graph
            .add_collecting_extender(
                "output",
                BankRef::OpInputs(looper),
                BankRef::OpOutputs(looper),
            )
            .unwrap();
        graph.start_extender(ext).unwrap();

        let mut sources = Vec::with_capacity(n);
        for i in 0..n {
            let source = graph
                .create_port(BankRef::OpOutputs(producer), &format!("feed {}", i + 1))
                .unwrap();
            let (input, _) = graph.extender(ext).unwrap().managed_pairs()[i];
            graph.connect(source, input).unwrap();
            sources.push(source);
        }
        (graph, ext, sources)
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_step() {
        const PAIRS: usize = 8;
        const ROUNDS: usize = 50;

        let (mut graph, ext, sources) = wide_rig(PAIRS);
        let handle = graph.collector(ext).unwrap();
        let reader = thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < 100_000 {
                let total = handle.total();
                seen.push(total);
                if total == PAIRS * ROUNDS {
                    break;
                }
            }
            seen
        });

        for round in 0..ROUNDS {
            for (i, &source) in sources.iter().enumerate() {
                let value = (round * PAIRS + i) as u32;
                graph.deliver(source, Arc::new(Step(value))).unwrap();
            }
            graph.collect(ext).unwrap();
        }

        // Every observed total is a whole number of steps.
        for total in reader.join().unwrap() {
            assert_eq!(total % PAIRS, 0, "half-appended step visible: {total}");
        }
    }

    #[test]
    fn test_retired_pair_takes_its_bucket_along() {
        let (mut graph, ext, sources) = wide_rig(2);
        graph.deliver(sources[0], Arc::new(Step(1))).unwrap();
        graph.deliver(sources[1], Arc::new(Step(2))).unwrap();
        graph.collect(ext).unwrap();
        assert_eq!(graph.collector(ext).unwrap().total(), 2);

        let pairs = graph.extender(ext).unwrap().managed_pairs();
        let (kept, _) = pairs[0];
        let (retired, _) = pairs[1];
        graph.disconnect(kept).unwrap();
        graph.disconnect(retired).unwrap();

        // The first pair stays on as the spare and keeps its history; the
        // second is retired by the growth update, bucket and all.
        assert_eq!(graph.extender(ext).unwrap().entry_count(), 1);
        let handle = graph.collector(ext).unwrap();
        assert_eq!(handle.total(), 1);
        assert_eq!(handle.collected(kept).len(), 1);
        assert!(handle.collected(retired).is_empty());
    }

    #[test]
    fn test_iterating_mode_skips_collection() {
        let (mut graph, ext, source, _, output) = rig();
        graph.set_output_mode(ext, OutputMode::Iterating).unwrap();
        graph.reset_collector(ext).unwrap();

        graph.deliver(source, Arc::new(Step(5))).unwrap();
        graph.collect(ext).unwrap();

        assert!(graph.data(output).is_none());
        assert_eq!(graph.collector(ext).unwrap().total(), 0);
    }

    #[test]
    fn test_clear_inputs_drops_consumed_packets() {
        let (mut graph, ext, source, input, _) = rig();
        graph.set_clear_inputs(ext, true).unwrap();
        graph.reset_collector(ext).unwrap();

        graph.deliver(source, Arc::new(Step(6))).unwrap();
        assert!(graph.data(input).is_some());
        graph.collect(ext).unwrap();
        assert!(graph.data(input).is_none());
    }

    #[test]
    fn test_collect_rejects_plain_groups() {
        let mut graph = FlowGraph::new();
        let root = graph.root();
        let op = graph.add_operator(root, "Plain").unwrap();
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(op))
            .unwrap();
        assert!(matches!(
            graph.collect(ext),
            Err(PortError::NotCollecting { .. })
        ));
    }
}
