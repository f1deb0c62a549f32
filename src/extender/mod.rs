//! Self-managing port groups.
//!
//! An extender watches one or more banks and keeps its managed entries in
//! the "exactly one free slot" shape: connect the spare and a new spare
//! appears, disconnect a managed entry and the surplus is retired. Four
//! kinds share one growth algorithm: single ports, input/output pairs,
//! lock-step multi groups, and collecting pairs whose outputs accumulate
//! payloads across loop iterations.
//!
//! Groups are inert until [`FlowGraph::start_extender`] brings them live;
//! from then on every bank mutation triggers one growth update. A group's
//! own growth runs are re-entrancy guarded through [`ExtenderPhase`].

mod collecting;
mod growth;

pub use collecting::{CollectorHandle, OutputMode};

use crate::config::ReclaimPolicy;
use crate::error::{PortError, PortResult};
use crate::graph::{BankRef, ExtenderId, FlowGraph, OperatorId, PortDirection, PortId, UnitId};
use growth::{GrowthOp, GrowthPlan, ManagedEntry};
use std::mem;
use tracing::{debug, warn};

/// Lifecycle of a port group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtenderPhase {
    /// Created but not started; bank changes are ignored.
    Initial,
    /// Live: bank changes trigger growth updates.
    Steady,
    /// One of this group's own growth runs is mutating the banks.
    Changing,
}

/// Behavior flavor of a pair group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairRole {
    #[default]
    Standard,

    /// Keep container order fixed: the spare stays in place instead of
    /// moving to the end of its banks.
    OrderPreserving,

    /// Pairs exist to pin execution order, not to carry data. The metadata
    /// pass warns on the first managed input when no pair is connected.
    Dummy,
}

/// One managed input/output pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PortPair {
    pub input: PortId,
    pub output: PortId,
}

/// One primary port plus its lock-step companions, one per fanout bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MultiGroup {
    pub primary: PortId,
    pub fanout: Vec<PortId>,
}

impl ManagedEntry for PortId {
    fn ports(&self) -> Vec<PortId> {
        vec![*self]
    }
}

impl ManagedEntry for PortPair {
    fn ports(&self) -> Vec<PortId> {
        vec![self.input, self.output]
    }
}

impl ManagedEntry for MultiGroup {
    fn ports(&self) -> Vec<PortId> {
        let mut ports = Vec::with_capacity(1 + self.fanout.len());
        ports.push(self.primary);
        ports.extend_from_slice(&self.fanout);
        ports
    }
}

#[derive(Debug)]
pub(crate) enum ExtenderKind {
    Single {
        bank: BankRef,
        entries: Vec<PortId>,
    },
    Pair {
        in_bank: BankRef,
        out_bank: BankRef,
        role: PairRole,
        entries: Vec<PortPair>,
    },
    Multi {
        primary: BankRef,
        fanout: Vec<BankRef>,
        entries: Vec<MultiGroup>,
    },
    Collecting {
        in_bank: BankRef,
        out_bank: BankRef,
        mode: OutputMode,
        clear_inputs: bool,
        entries: Vec<PortPair>,
        buffers: CollectorHandle,
    },
}

/// A port group's bookkeeping record.
#[derive(Debug)]
pub struct ExtenderSlot {
    pub(crate) name: String,
    pub(crate) kind: ExtenderKind,
    pub(crate) min_number: usize,
    pub(crate) phase: ExtenderPhase,
    pub(crate) running_id: u32,
    pub(crate) updates_run: u64,
    pub(crate) reclaim: ReclaimPolicy,
}

impl ExtenderSlot {
    fn new(name: String, kind: ExtenderKind, reclaim: ReclaimPolicy) -> Self {
        Self {
            name,
            kind,
            min_number: 0,
            phase: ExtenderPhase::Initial,
            running_id: 0,
            updates_run: 0,
            reclaim,
        }
    }

    /// Base name entries are numbered from (`"{base} {n}"`).
    pub fn base_name(&self) -> &str {
        &self.name
    }

    pub fn min_number(&self) -> usize {
        self.min_number
    }

    pub fn phase(&self) -> ExtenderPhase {
        self.phase
    }

    /// Full growth updates this group has run since it was started.
    pub fn updates_run(&self) -> u64 {
        self.updates_run
    }

    pub fn entry_count(&self) -> usize {
        match &self.kind {
            ExtenderKind::Single { entries, .. } => entries.len(),
            ExtenderKind::Pair { entries, .. } | ExtenderKind::Collecting { entries, .. } => {
                entries.len()
            }
            ExtenderKind::Multi { entries, .. } => entries.len(),
        }
    }

    /// Every managed port in managed (creation) order, inputs before
    /// outputs within an entry.
    pub fn managed_ports(&self) -> Vec<PortId> {
        match &self.kind {
            ExtenderKind::Single { entries, .. } => entries.clone(),
            ExtenderKind::Pair { entries, .. } | ExtenderKind::Collecting { entries, .. } => {
                entries.iter().flat_map(|p| [p.input, p.output]).collect()
            }
            ExtenderKind::Multi { entries, .. } => {
                entries.iter().flat_map(ManagedEntry::ports).collect()
            }
        }
    }

    /// Managed (input, output) pairs in managed order; empty for kinds that
    /// do not pair ports.
    pub fn managed_pairs(&self) -> Vec<(PortId, PortId)> {
        match &self.kind {
            ExtenderKind::Pair { entries, .. } | ExtenderKind::Collecting { entries, .. } => {
                entries.iter().map(|p| (p.input, p.output)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Managed (primary, fanout) groups in managed order; empty for kinds
    /// other than multi.
    pub fn managed_groups(&self) -> Vec<(PortId, Vec<PortId>)> {
        match &self.kind {
            ExtenderKind::Multi { entries, .. } => entries
                .iter()
                .map(|g| (g.primary, g.fanout.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The collection mode of a collecting group, `None` for other kinds.
    pub fn output_mode(&self) -> Option<OutputMode> {
        match &self.kind {
            ExtenderKind::Collecting { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    pub(crate) fn observed_banks(&self) -> Vec<BankRef> {
        match &self.kind {
            ExtenderKind::Single { bank, .. } => vec![*bank],
            ExtenderKind::Pair {
                in_bank, out_bank, ..
            }
            | ExtenderKind::Collecting {
                in_bank, out_bank, ..
            } => vec![*in_bank, *out_bank],
            ExtenderKind::Multi {
                primary, fanout, ..
            } => {
                let mut banks = vec![*primary];
                banks.extend_from_slice(fanout);
                banks
            }
        }
    }

    pub(crate) fn observes_any(&self, ops: &[OperatorId], units: &[UnitId]) -> bool {
        self.observed_banks().iter().any(|bank| match bank {
            BankRef::OpInputs(op) | BankRef::OpOutputs(op) => ops.contains(op),
            BankRef::UnitSources(u) | BankRef::UnitSinks(u) => units.contains(u),
        })
    }
}

impl FlowGraph {
    fn add_extender(&mut self, base: &str, kind: ExtenderKind) -> PortResult<ExtenderId> {
        let slot = ExtenderSlot::new(base.to_string(), kind, self.config().reclaim);
        let banks = slot.observed_banks();
        for &bank in &banks {
            if self.bank(bank).is_none() {
                return Err(PortError::Stale { kind: "bank" });
            }
        }
        let id = self.extenders.insert(slot);
        for bank in banks {
            if let Some(b) = self.bank_mut(bank) {
                b.attach_extender(id);
            }
        }
        debug!(group = base, "Attached port group");
        Ok(id)
    }

    /// Attach a growing group of single ports to one bank.
    pub fn add_single_extender(&mut self, base: &str, bank: BankRef) -> PortResult<ExtenderId> {
        self.add_extender(
            base,
            ExtenderKind::Single {
                bank,
                entries: Vec::new(),
            },
        )
    }

    /// Attach a growing group of same-named input/output pairs.
    pub fn add_pair_extender(
        &mut self,
        base: &str,
        in_bank: BankRef,
        out_bank: BankRef,
    ) -> PortResult<ExtenderId> {
        self.add_pair_extender_with_role(base, in_bank, out_bank, PairRole::Standard)
    }

    pub fn add_pair_extender_with_role(
        &mut self,
        base: &str,
        in_bank: BankRef,
        out_bank: BankRef,
        role: PairRole,
    ) -> PortResult<ExtenderId> {
        check_pair_banks(in_bank, out_bank, base)?;
        self.add_extender(
            base,
            ExtenderKind::Pair {
                in_bank,
                out_bank,
                role,
                entries: Vec::new(),
            },
        )
    }

    /// Attach a group that grows one primary port plus one companion per
    /// fanout bank in lock-step. An entry is free only when every member
    /// port is.
    pub fn add_multi_extender(
        &mut self,
        base: &str,
        primary: BankRef,
        fanout: &[BankRef],
    ) -> PortResult<ExtenderId> {
        self.add_extender(
            base,
            ExtenderKind::Multi {
                primary,
                fanout: fanout.to_vec(),
                entries: Vec::new(),
            },
        )
    }

    /// Attach a pair group whose outputs deliver collections accumulated
    /// across loop iterations. See [`FlowGraph::collect`].
    pub fn add_collecting_extender(
        &mut self,
        base: &str,
        in_bank: BankRef,
        out_bank: BankRef,
    ) -> PortResult<ExtenderId> {
        check_pair_banks(in_bank, out_bank, base)?;
        self.add_extender(
            base,
            ExtenderKind::Collecting {
                in_bank,
                out_bank,
                mode: OutputMode::default(),
                clear_inputs: false,
                entries: Vec::new(),
                buffers: CollectorHandle::default(),
            },
        )
    }

    /// Bring a group live: seed one fresh entry and switch to steady
    /// operation, where bank changes trigger growth updates. Idempotent.
    ///
    /// Calling `ensure_minimum_number_of_ports` before this leaves the
    /// group one entry above the minimum; calling it after does not.
    pub fn start_extender(&mut self, id: ExtenderId) -> PortResult<()> {
        let Some(slot) = self.extenders.get(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        if slot.phase != ExtenderPhase::Initial {
            debug!(group = %slot.name, "Port group already started");
            return Ok(());
        }
        mutate(self, id, GrowthOp::Seed)
    }

    /// Raise the minimum entry count. Before start this fills the group up
    /// to the minimum without seeding a spare; on a started group it runs a
    /// full growth update.
    pub fn ensure_minimum_number_of_ports(
        &mut self,
        id: ExtenderId,
        min: usize,
    ) -> PortResult<()> {
        let Some(slot) = self.extenders.get_mut(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        slot.min_number = min;
        match slot.phase {
            ExtenderPhase::Initial => mutate(self, id, GrowthOp::FillToMin),
            ExtenderPhase::Steady => mutate(self, id, GrowthOp::Update),
            ExtenderPhase::Changing => Ok(()),
        }
    }

    #[inline]
    pub fn extender(&self, id: ExtenderId) -> Option<&ExtenderSlot> {
        self.extenders.get(id)
    }

    /// Managed entries with no connection or lock on any member port.
    pub fn free_entry_count(&self, id: ExtenderId) -> usize {
        let Some(slot) = self.extenders.get(id) else {
            return 0;
        };
        match &slot.kind {
            ExtenderKind::Single { entries, .. } => entries
                .iter()
                .filter(|e| growth::entry_is_free(self, *e))
                .count(),
            ExtenderKind::Pair { entries, .. } | ExtenderKind::Collecting { entries, .. } => {
                entries
                    .iter()
                    .filter(|e| growth::entry_is_free(self, *e))
                    .count()
            }
            ExtenderKind::Multi { entries, .. } => entries
                .iter()
                .filter(|e| growth::entry_is_free(self, *e))
                .count(),
        }
    }

    /// Override the surplus reclaim policy for one group.
    pub fn set_reclaim(&mut self, id: ExtenderId, policy: ReclaimPolicy) -> PortResult<()> {
        let Some(slot) = self.extenders.get_mut(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        slot.reclaim = policy;
        Ok(())
    }

    /// Copy the payload at every filled managed input to its paired output.
    /// Inputs without a packet are skipped.
    pub fn pass_pair_data(&mut self, id: ExtenderId) -> PortResult<()> {
        let Some(slot) = self.extenders.get(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        let pairs: Vec<PortPair> = match &slot.kind {
            ExtenderKind::Pair { entries, .. } | ExtenderKind::Collecting { entries, .. } => {
                entries.clone()
            }
            _ => {
                return Err(PortError::NotPaired {
                    name: slot.name.clone(),
                })
            }
        };
        for pair in pairs {
            let Some(payload) = self.data(pair.input).cloned() else {
                continue;
            };
            self.deliver(pair.output, payload)?;
        }
        Ok(())
    }

    /// Detach a group. Its managed ports stay where they are.
    pub fn remove_extender(&mut self, id: ExtenderId) -> PortResult<()> {
        let Some(slot) = self.extenders.remove(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        for bank in slot.observed_banks() {
            if let Some(b) = self.bank_mut(bank) {
                b.detach_extender(id);
            }
        }
        debug!(group = %slot.name, "Detached port group; managed ports remain");
        Ok(())
    }
}

/// Bank-notification entry point. Ignored until the group is started and
/// while one of its own growth runs is mutating the banks.
pub(crate) fn run_update(graph: &mut FlowGraph, id: ExtenderId) {
    let Some(slot) = graph.extenders.get(id) else {
        return;
    };
    if slot.phase != ExtenderPhase::Steady {
        return;
    }
    if let Err(err) = mutate(graph, id, GrowthOp::Update) {
        warn!(%err, "Port group update failed");
    }
}

fn mutate(graph: &mut FlowGraph, id: ExtenderId, op: GrowthOp) -> PortResult<()> {
    let prior = {
        let Some(slot) = graph.extenders.get_mut(id) else {
            return Err(PortError::Stale { kind: "extender" });
        };
        let prior = slot.phase;
        slot.phase = ExtenderPhase::Changing;
        prior
    };
    let result = perform(graph, id, op);
    if let Some(slot) = graph.extenders.get_mut(id) {
        slot.phase = match op {
            GrowthOp::Update => {
                slot.updates_run += 1;
                ExtenderPhase::Steady
            }
            GrowthOp::Seed => ExtenderPhase::Steady,
            GrowthOp::FillToMin => prior,
        };
    }
    result
}

/// Run one growth operation. The entry list is taken out of the slot for
/// the duration so the drive can mutate the graph freely, then written
/// back along with the advanced running number.
fn perform(graph: &mut FlowGraph, id: ExtenderId, op: GrowthOp) -> PortResult<()> {
    enum Taken {
        Single {
            bank: BankRef,
            entries: Vec<PortId>,
        },
        Pair {
            in_bank: BankRef,
            out_bank: BankRef,
            push_spare: bool,
            entries: Vec<PortPair>,
        },
        Multi {
            primary: BankRef,
            fanout: Vec<BankRef>,
            entries: Vec<MultiGroup>,
        },
    }

    let cap = graph.config().max_managed_ports;
    let Some(slot) = graph.extenders.get_mut(id) else {
        return Err(PortError::Stale { kind: "extender" });
    };
    let base = slot.name.clone();
    let min = slot.min_number;
    let reclaim = slot.reclaim;
    let mut running_id = slot.running_id;
    let mut taken = match &mut slot.kind {
        ExtenderKind::Single { bank, entries } => Taken::Single {
            bank: *bank,
            entries: mem::take(entries),
        },
        ExtenderKind::Pair {
            in_bank,
            out_bank,
            role,
            entries,
        } => Taken::Pair {
            in_bank: *in_bank,
            out_bank: *out_bank,
            push_spare: *role != PairRole::OrderPreserving,
            entries: mem::take(entries),
        },
        ExtenderKind::Multi {
            primary,
            fanout,
            entries,
        } => Taken::Multi {
            primary: *primary,
            fanout: fanout.clone(),
            entries: mem::take(entries),
        },
        ExtenderKind::Collecting {
            in_bank,
            out_bank,
            entries,
            ..
        } => Taken::Pair {
            in_bank: *in_bank,
            out_bank: *out_bank,
            push_spare: true,
            entries: mem::take(entries),
        },
    };

    let result = match &mut taken {
        Taken::Single { bank, entries } => {
            let bank = *bank;
            let plan = GrowthPlan {
                base: base.clone(),
                min,
                width: 1,
                push_spare: true,
                skip_deletion: false,
                cap,
            };
            let mut create = |g: &mut FlowGraph, name: &str| g.create_port(bank, name);
            growth::drive(graph, entries, &mut running_id, &plan, op, &mut create)
        }
        Taken::Pair {
            in_bank,
            out_bank,
            push_spare,
            entries,
        } => {
            let (in_bank, out_bank) = (*in_bank, *out_bank);
            let plan = GrowthPlan {
                base: base.clone(),
                min,
                width: 2,
                push_spare: *push_spare,
                skip_deletion: false,
                cap,
            };
            let mut create = |g: &mut FlowGraph, name: &str| -> PortResult<PortPair> {
                let input = g.create_port(in_bank, name)?;
                match g.create_port(out_bank, name) {
                    Ok(output) => Ok(PortPair { input, output }),
                    Err(err) => {
                        g.remove_port(in_bank, input)?;
                        Err(err)
                    }
                }
            };
            growth::drive(graph, entries, &mut running_id, &plan, op, &mut create)
        }
        Taken::Multi {
            primary,
            fanout,
            entries,
        } => {
            let primary_bank = *primary;
            let fanout_banks = fanout.clone();
            let plan = GrowthPlan {
                base: base.clone(),
                min,
                width: 1 + fanout_banks.len(),
                push_spare: true,
                // Started groups with a minimum keep their stale surplus
                // unless the policy says to reclaim it.
                skip_deletion: reclaim == ReclaimPolicy::KeepStale && min > 0,
                cap,
            };
            let mut create = |g: &mut FlowGraph, name: &str| -> PortResult<MultiGroup> {
                let head = g.create_port(primary_bank, name)?;
                let mut made: Vec<(BankRef, PortId)> = Vec::with_capacity(fanout_banks.len());
                for &bank in &fanout_banks {
                    match g.create_port(bank, name) {
                        Ok(port) => made.push((bank, port)),
                        Err(err) => {
                            for (b, p) in made.drain(..) {
                                g.remove_port(b, p)?;
                            }
                            g.remove_port(primary_bank, head)?;
                            return Err(err);
                        }
                    }
                }
                Ok(MultiGroup {
                    primary: head,
                    fanout: made.into_iter().map(|(_, port)| port).collect(),
                })
            };
            growth::drive(graph, entries, &mut running_id, &plan, op, &mut create)
        }
    };

    if let Some(slot) = graph.extenders.get_mut(id) {
        slot.running_id = running_id;
        match (&mut slot.kind, taken) {
            (ExtenderKind::Single { entries, .. }, Taken::Single { entries: done, .. }) => {
                *entries = done;
            }
            (ExtenderKind::Pair { entries, .. }, Taken::Pair { entries: done, .. }) => {
                *entries = done;
            }
            (
                ExtenderKind::Collecting {
                    entries, buffers, ..
                },
                Taken::Pair { entries: done, .. },
            ) => {
                *entries = done;
                let live: Vec<PortId> = entries.iter().map(|p| p.input).collect();
                buffers.retain_inputs(&live);
            }
            (ExtenderKind::Multi { entries, .. }, Taken::Multi { entries: done, .. }) => {
                *entries = done;
            }
            _ => {}
        }
    }
    result
}

fn check_pair_banks(in_bank: BankRef, out_bank: BankRef, base: &str) -> PortResult<()> {
    if in_bank.direction() != PortDirection::Input
        || out_bank.direction() != PortDirection::Output
    {
        return Err(PortError::BankDirection {
            group: base.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BankRef;

    fn two_ops(graph: &mut FlowGraph) -> (OperatorId, OperatorId) {
        let root = graph.root();
        let a = graph.add_operator(root, "Source").unwrap();
        let b = graph.add_operator(root, "Sink").unwrap();
        (a, b)
    }

    #[test]
    fn test_start_seeds_one_numbered_entry() {
        let mut graph = FlowGraph::new();
        let (_, b) = two_ops(&mut graph);
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(b))
            .unwrap();

        assert_eq!(graph.extender(ext).unwrap().entry_count(), 0);
        graph.start_extender(ext).unwrap();

        let slot = graph.extender(ext).unwrap();
        assert_eq!(slot.phase(), ExtenderPhase::Steady);
        assert_eq!(slot.entry_count(), 1);
        let port = slot.managed_ports()[0];
        assert_eq!(graph.port_name(port), Some("input 1"));
    }

    #[test]
    fn test_minimum_before_start_leaves_extra_spare() {
        let mut graph = FlowGraph::new();
        let (_, b) = two_ops(&mut graph);
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(b))
            .unwrap();

        graph.ensure_minimum_number_of_ports(ext, 2).unwrap();
        assert_eq!(graph.extender(ext).unwrap().entry_count(), 2);
        graph.start_extender(ext).unwrap();
        assert_eq!(graph.extender(ext).unwrap().entry_count(), 3);
    }

    #[test]
    fn test_minimum_after_start_settles_at_min() {
        let mut graph = FlowGraph::new();
        let (_, b) = two_ops(&mut graph);
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(b))
            .unwrap();

        graph.start_extender(ext).unwrap();
        graph.ensure_minimum_number_of_ports(ext, 2).unwrap();
        assert_eq!(graph.extender(ext).unwrap().entry_count(), 2);
        assert_eq!(graph.free_entry_count(ext), 2);
    }

    #[test]
    fn test_connect_grows_exactly_one_spare() {
        let mut graph = FlowGraph::new();
        let (a, b) = two_ops(&mut graph);
        let out = graph.create_port(BankRef::OpOutputs(a), "out").unwrap();
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(b))
            .unwrap();
        graph.start_extender(ext).unwrap();

        let spare = graph.extender(ext).unwrap().managed_ports()[0];
        let before = graph.extender(ext).unwrap().updates_run();
        graph.connect(out, spare).unwrap();

        let slot = graph.extender(ext).unwrap();
        assert_eq!(slot.entry_count(), 2);
        assert_eq!(slot.updates_run(), before + 1);
        assert_eq!(graph.free_entry_count(ext), 1);
    }

    #[test]
    fn test_pair_extender_rejects_misdirected_banks() {
        let mut graph = FlowGraph::new();
        let (a, b) = two_ops(&mut graph);
        let err = graph
            .add_pair_extender("through", BankRef::OpOutputs(a), BankRef::OpInputs(b))
            .unwrap_err();
        assert!(matches!(err, PortError::BankDirection { .. }));
    }

    #[test]
    fn test_pair_entries_share_a_name_across_banks() {
        let mut graph = FlowGraph::new();
        let root = graph.root();
        let op = graph.add_operator(root, "Passer").unwrap();
        let ext = graph
            .add_pair_extender("through", BankRef::OpInputs(op), BankRef::OpOutputs(op))
            .unwrap();
        graph.start_extender(ext).unwrap();

        let pairs = graph.extender(ext).unwrap().managed_pairs();
        assert_eq!(pairs.len(), 1);
        let (input, output) = pairs[0];
        assert_eq!(graph.port_name(input), Some("through 1"));
        assert_eq!(graph.port_name(output), Some("through 1"));
        assert_ne!(input, output);
    }

    #[test]
    fn test_remove_extender_stops_growth_keeps_ports() {
        let mut graph = FlowGraph::new();
        let (a, b) = two_ops(&mut graph);
        let out = graph.create_port(BankRef::OpOutputs(a), "out").unwrap();
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(b))
            .unwrap();
        graph.start_extender(ext).unwrap();
        let spare = graph.extender(ext).unwrap().managed_ports()[0];

        graph.remove_extender(ext).unwrap();
        assert!(graph.extender(ext).is_none());

        graph.connect(out, spare).unwrap();
        // No group left to grow a fresh spare.
        assert_eq!(graph.ports_of(BankRef::OpInputs(b)).len(), 1);
        assert_eq!(graph.port_name(spare), Some("input 1"));
    }

    #[test]
    fn test_growth_stops_at_managed_port_cap() {
        let config = crate::config::GraphConfig {
            max_managed_ports: 2,
            ..Default::default()
        };
        let mut graph = FlowGraph::with_config(config);
        let (a, b) = two_ops(&mut graph);
        let ext = graph
            .add_single_extender("input", BankRef::OpInputs(b))
            .unwrap();
        graph.start_extender(ext).unwrap();

        let first = graph.extender(ext).unwrap().managed_ports()[0];
        let out1 = graph.create_port(BankRef::OpOutputs(a), "out1").unwrap();
        let out2 = graph.create_port(BankRef::OpOutputs(a), "out2").unwrap();
        graph.connect(out1, first).unwrap();
        assert_eq!(graph.extender(ext).unwrap().entry_count(), 2);

        let second = graph.extender(ext).unwrap().managed_ports()[1];
        graph.connect(out2, second).unwrap();
        // Cap reached: both entries bound, no third spare.
        assert_eq!(graph.extender(ext).unwrap().entry_count(), 2);
        assert_eq!(graph.free_entry_count(ext), 0);
    }

    #[test]
    fn test_pass_pair_data_copies_filled_inputs() {
        use crate::payload::{Packet, Payload};
        use std::any::Any;
        use std::sync::Arc;

        #[derive(Debug)]
        struct Table(u32);

        impl Payload for Table {
            fn kind(&self) -> &'static str {
                "table"
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let mut graph = FlowGraph::new();
        let root = graph.root();
        let op = graph.add_operator(root, "Passer").unwrap();
        let ext = graph
            .add_pair_extender("through", BankRef::OpInputs(op), BankRef::OpOutputs(op))
            .unwrap();
        graph.start_extender(ext).unwrap();
        let (input, output) = graph.extender(ext).unwrap().managed_pairs()[0];

        graph.receive(input, Packet::new(Arc::new(Table(3)))).unwrap();
        graph.pass_pair_data(ext).unwrap();
        assert!(graph.data(output).is_some());
    }
}
