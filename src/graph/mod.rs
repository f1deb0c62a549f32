//! The flow graph: operators, subprocess units, ports and wiring.
//!
//! Everything lives in generational arenas and is addressed by id; cross
//! references (a port's container, its connected counterpart, a unit's
//! owner) are ids too, so there is no shared ownership to keep consistent.
//! All mutation goes through [`FlowGraph`], which keeps the name indexes,
//! the attached extenders and the event hub in lock-step.
//!
//! ## Structure
//!
//! - Every graph owns a root operator (named `"Process"`) whose single
//!   subprocess is the root unit.
//! - Operators live inside units; an operator may own further subprocess
//!   units, nesting arbitrarily.
//! - Connections always run from an output-direction port to an
//!   input-direction port within one unit: an operator's outputs connect to
//!   sibling inputs, a unit's inner sources feed member inputs, member
//!   outputs feed the unit's inner sinks.

mod arena;
mod bank;
mod id;
mod port;

pub use bank::{BankRef, PortBank};
pub use id::{ExtenderId, OperatorId, PortId, UnitId};
pub use port::{ClearFlags, MetaSlot, PortDirection, PortSlot};

use crate::bridge::{EventHub, GraphEvent};
use crate::config::GraphConfig;
use crate::error::{PortError, PortResult};
use crate::extender::ExtenderSlot;
use crate::metadata::{Metadata, MetadataError, Precondition, QuickFix};
use crate::payload::{fetch_typed, Packet, Payload, TypedData};
use crate::process::OperatorLogic;
use crate::provenance::{PortRef, OUTER_PORT};
use crate::rules::MetadataRule;
use arena::Arena;
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// State of one operator.
pub struct OperatorSlot {
    pub name: String,
    /// The unit this operator is a member of (`UnitId::INVALID` for the
    /// root operator).
    pub parent: UnitId,
    pub(crate) inputs: PortBank,
    pub(crate) outputs: PortBank,
    /// Owned subprocess units, in index order.
    pub subprocesses: Vec<UnitId>,
    pub(crate) rules: Vec<MetadataRule>,
    pub(crate) logic: Option<Box<dyn OperatorLogic>>,
}

impl OperatorSlot {
    fn new(name: String, parent: UnitId) -> Self {
        Self {
            name,
            parent,
            inputs: PortBank::new(),
            outputs: PortBank::new(),
            subprocesses: Vec::new(),
            rules: Vec::new(),
            logic: None,
        }
    }

    /// Input ports in container order.
    pub fn input_ports(&self) -> &[PortId] {
        self.inputs.members()
    }

    /// Output ports in container order.
    pub fn output_ports(&self) -> &[PortId] {
        self.outputs.members()
    }
}

/// State of one subprocess unit: the connection context its member
/// operators are wired in.
pub struct UnitSlot {
    /// The owning operator.
    pub owner: OperatorId,
    /// Position among the owner's subprocesses.
    pub index_in_owner: usize,
    /// Member operators in insertion order.
    pub operators: Vec<OperatorId>,
    /// Inner sources: output-direction ports feeding member inputs.
    pub(crate) sources: PortBank,
    /// Inner sinks: input-direction ports fed by member outputs.
    pub(crate) sinks: PortBank,
    pub(crate) order: Vec<OperatorId>,
    pub(crate) order_dirty: bool,
}

impl UnitSlot {
    fn new(owner: OperatorId, index_in_owner: usize) -> Self {
        Self {
            owner,
            index_in_owner,
            operators: Vec::new(),
            sources: PortBank::new(),
            sinks: PortBank::new(),
            order: Vec::new(),
            order_dirty: true,
        }
    }

    /// Inner source ports in container order.
    pub fn source_ports(&self) -> &[PortId] {
        self.sources.members()
    }

    /// Inner sink ports in container order.
    pub fn sink_ports(&self) -> &[PortId] {
        self.sinks.members()
    }
}

/// The port-and-metadata-propagation graph.
pub struct FlowGraph {
    config: GraphConfig,
    pub(crate) ports: Arena<PortId, PortSlot>,
    pub(crate) operators: Arena<OperatorId, OperatorSlot>,
    pub(crate) units: Arena<UnitId, UnitSlot>,
    pub(crate) extenders: Arena<ExtenderId, ExtenderSlot>,
    operator_names: HashMap<String, OperatorId>,
    root_operator: OperatorId,
    root_unit: UnitId,
    pub(crate) hub: EventHub,
}

impl FlowGraph {
    /// Name of the implicit root operator every graph owns.
    pub const ROOT_NAME: &'static str = "Process";

    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        let hub = EventHub::new(config.event_capacity);
        let mut operators = Arena::new();
        let mut units = Arena::new();

        let root_operator = operators.insert(OperatorSlot::new(
            Self::ROOT_NAME.to_string(),
            UnitId::INVALID,
        ));
        let root_unit = units.insert(UnitSlot::new(root_operator, 0));
        if let Some(root) = operators.get_mut(root_operator) {
            root.subprocesses.push(root_unit);
        }

        let mut operator_names = HashMap::new();
        operator_names.insert(Self::ROOT_NAME.to_string(), root_operator);

        Self {
            config,
            ports: Arena::new(),
            operators,
            units,
            extenders: Arena::new(),
            operator_names,
            root_operator,
            root_unit,
            hub,
        }
    }

    #[inline]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The root unit, context for top-level operators.
    #[inline]
    pub fn root(&self) -> UnitId {
        self.root_unit
    }

    #[inline]
    pub fn root_operator(&self) -> OperatorId {
        self.root_operator
    }

    // ==================== Events ====================

    /// Subscribe to every graph event.
    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        self.hub.subscribe()
    }

    /// Subscribe to events involving one port.
    pub fn watch_port(&mut self, port: PortId) -> Receiver<GraphEvent> {
        self.hub.watch_port(port)
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        self.hub.emit(event);
    }

    // ==================== Operators and units ====================

    /// Add an operator to a unit. Operator names are unique per graph so
    /// provenance can resolve them later.
    pub fn add_operator(&mut self, unit: UnitId, name: &str) -> PortResult<OperatorId> {
        if !self.units.contains(unit) {
            return Err(PortError::Stale { kind: "unit" });
        }
        if self.operator_names.contains_key(name) {
            return Err(PortError::DuplicateOperator {
                name: name.to_string(),
            });
        }
        let id = self.operators.insert(OperatorSlot::new(name.to_string(), unit));
        self.operator_names.insert(name.to_string(), id);
        if let Some(slot) = self.units.get_mut(unit) {
            slot.operators.push(id);
            slot.order_dirty = true;
        }
        self.emit(GraphEvent::OperatorAdded {
            operator: id,
            name: name.to_string(),
        });
        Ok(id)
    }

    pub fn rename_operator(&mut self, op: OperatorId, name: &str) -> PortResult<()> {
        if !self.operators.contains(op) {
            return Err(PortError::Stale { kind: "operator" });
        }
        if let Some(&holder) = self.operator_names.get(name) {
            if holder == op {
                return Ok(());
            }
            return Err(PortError::DuplicateOperator {
                name: name.to_string(),
            });
        }
        let Some(slot) = self.operators.get_mut(op) else {
            return Err(PortError::Stale { kind: "operator" });
        };
        let old = std::mem::replace(&mut slot.name, name.to_string());
        self.operator_names.remove(&old);
        self.operator_names.insert(name.to_string(), op);
        Ok(())
    }

    /// Remove an operator, its subprocesses, their members and all attached
    /// ports. Connections into the removed ports are dropped; the surviving
    /// side is notified.
    pub fn remove_operator(&mut self, op: OperatorId) -> PortResult<()> {
        if op == self.root_operator {
            return Err(PortError::RootOperator);
        }
        let Some(slot) = self.operators.get(op) else {
            return Err(PortError::Stale { kind: "operator" });
        };
        let name = slot.name.clone();
        let parent = slot.parent;

        // Gather the whole subtree first; removal invalidates handles.
        let mut doomed_ops = Vec::new();
        let mut doomed_units = Vec::new();
        self.collect_subtree(op, &mut doomed_ops, &mut doomed_units);

        let mut doomed_ports = Vec::new();
        for &o in &doomed_ops {
            if let Some(s) = self.operators.get(o) {
                doomed_ports.extend_from_slice(s.inputs.members());
                doomed_ports.extend_from_slice(s.outputs.members());
            }
        }
        for &u in &doomed_units {
            if let Some(s) = self.units.get(u) {
                doomed_ports.extend_from_slice(s.sources.members());
                doomed_ports.extend_from_slice(s.sinks.members());
            }
        }

        // Unlink connections that leave the subtree, remembering who to
        // notify once the dust settles.
        let mut survivor_banks: Vec<BankRef> = Vec::new();
        for &p in &doomed_ports {
            if let Some(opposite) = self.unlink(p) {
                if !doomed_ports.contains(&opposite) {
                    if let Some(other) = self.ports.get(opposite) {
                        if !survivor_banks.contains(&other.bank) {
                            survivor_banks.push(other.bank);
                        }
                    }
                }
            }
        }

        for &p in &doomed_ports {
            self.ports.remove(p);
        }
        let doomed_extenders: Vec<ExtenderId> = self
            .extenders
            .iter()
            .filter(|(_, e)| e.observes_any(&doomed_ops, &doomed_units))
            .map(|(id, _)| id)
            .collect();
        for e in doomed_extenders {
            self.extenders.remove(e);
        }
        for &u in &doomed_units {
            self.units.remove(u);
        }
        for &o in &doomed_ops {
            if let Some(s) = self.operators.remove(o) {
                self.operator_names.remove(&s.name);
            }
        }

        if let Some(unit) = self.units.get_mut(parent) {
            unit.operators.retain(|o| *o != op);
            unit.order_dirty = true;
        }
        self.emit(GraphEvent::OperatorRemoved { operator: op, name });

        for bank in survivor_banks {
            self.notify_bank_extenders(bank);
        }
        Ok(())
    }

    fn collect_subtree(
        &self,
        op: OperatorId,
        ops: &mut Vec<OperatorId>,
        units: &mut Vec<UnitId>,
    ) {
        ops.push(op);
        let Some(slot) = self.operators.get(op) else {
            return;
        };
        for &unit in &slot.subprocesses {
            units.push(unit);
            if let Some(u) = self.units.get(unit) {
                for &member in &u.operators {
                    self.collect_subtree(member, ops, units);
                }
            }
        }
    }

    /// Append a subprocess unit to an operator.
    pub fn add_subprocess(&mut self, op: OperatorId) -> PortResult<UnitId> {
        let Some(slot) = self.operators.get(op) else {
            return Err(PortError::Stale { kind: "operator" });
        };
        let index = slot.subprocesses.len();
        let unit = self.units.insert(UnitSlot::new(op, index));
        if let Some(slot) = self.operators.get_mut(op) {
            slot.subprocesses.push(unit);
        }
        Ok(unit)
    }

    #[inline]
    pub fn operator(&self, op: OperatorId) -> Option<&OperatorSlot> {
        self.operators.get(op)
    }

    #[inline]
    pub(crate) fn operator_mut(&mut self, op: OperatorId) -> Option<&mut OperatorSlot> {
        self.operators.get_mut(op)
    }

    pub fn find_operator(&self, name: &str) -> Option<OperatorId> {
        self.operator_names.get(name).copied()
    }

    #[inline]
    pub fn unit(&self, unit: UnitId) -> Option<&UnitSlot> {
        self.units.get(unit)
    }

    pub fn set_logic(&mut self, op: OperatorId, logic: Box<dyn OperatorLogic>) -> PortResult<()> {
        let Some(slot) = self.operators.get_mut(op) else {
            return Err(PortError::Stale { kind: "operator" });
        };
        slot.logic = Some(logic);
        Ok(())
    }

    pub fn add_rule(&mut self, op: OperatorId, rule: MetadataRule) -> PortResult<()> {
        let Some(slot) = self.operators.get_mut(op) else {
            return Err(PortError::Stale { kind: "operator" });
        };
        slot.rules.push(rule);
        Ok(())
    }

    // ==================== Ports ====================

    pub(crate) fn bank(&self, bank: BankRef) -> Option<&PortBank> {
        match bank {
            BankRef::OpInputs(op) => self.operators.get(op).map(|s| &s.inputs),
            BankRef::OpOutputs(op) => self.operators.get(op).map(|s| &s.outputs),
            BankRef::UnitSources(u) => self.units.get(u).map(|s| &s.sources),
            BankRef::UnitSinks(u) => self.units.get(u).map(|s| &s.sinks),
        }
    }

    pub(crate) fn bank_mut(&mut self, bank: BankRef) -> Option<&mut PortBank> {
        match bank {
            BankRef::OpInputs(op) => self.operators.get_mut(op).map(|s| &mut s.inputs),
            BankRef::OpOutputs(op) => self.operators.get_mut(op).map(|s| &mut s.outputs),
            BankRef::UnitSources(u) => self.units.get_mut(u).map(|s| &mut s.sources),
            BankRef::UnitSinks(u) => self.units.get_mut(u).map(|s| &mut s.sinks),
        }
    }

    /// Ports of a bank in container order.
    pub fn ports_of(&self, bank: BankRef) -> &[PortId] {
        self.bank(bank).map(|b| b.members()).unwrap_or(&[])
    }

    pub fn find_port(&self, bank: BankRef, name: &str) -> Option<PortId> {
        self.bank(bank)?.find(name)
    }

    #[inline]
    pub fn port(&self, port: PortId) -> Option<&PortSlot> {
        self.ports.get(port)
    }

    #[inline]
    pub(crate) fn port_mut(&mut self, port: PortId) -> Option<&mut PortSlot> {
        self.ports.get_mut(port)
    }

    pub fn port_name(&self, port: PortId) -> Option<&str> {
        self.ports.get(port).map(|s| s.name.as_str())
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Create a port in a bank. Fails on a duplicate name; notifies the
    /// bank's extenders.
    pub fn create_port(&mut self, bank: BankRef, name: &str) -> PortResult<PortId> {
        if self.bank(bank).is_none() {
            return Err(PortError::Stale { kind: "bank" });
        }
        let id = self
            .ports
            .insert(PortSlot::new(name.to_string(), bank.direction(), bank));
        let result = self
            .bank_mut(bank)
            .ok_or(PortError::Stale { kind: "bank" })
            .and_then(|b| b.insert(name, id));
        if let Err(err) = result {
            self.ports.remove(id);
            return Err(err);
        }
        self.emit(GraphEvent::PortAdded {
            bank,
            port: id,
            name: name.to_string(),
        });
        self.notify_bank_extenders(bank);
        Ok(id)
    }

    /// Remove a port from its bank. Fails if the port does not belong to
    /// `bank`. A live connection is dropped first.
    pub fn remove_port(&mut self, bank: BankRef, port: PortId) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if slot.bank != bank {
            return Err(PortError::ForeignPort {
                port: slot.name.clone(),
            });
        }
        let name = slot.name.clone();

        let opposite_bank = self
            .unlink(port)
            .and_then(|opp| self.ports.get(opp))
            .map(|s| s.bank);

        if let Some(b) = self.bank_mut(bank) {
            b.remove_entry(port, &name)?;
        }
        self.ports.remove(port);
        self.emit(GraphEvent::PortRemoved { bank, port, name });
        match opposite_bank {
            Some(other) if other != bank => self.notify_banks(&[bank, other]),
            _ => self.notify_banks(&[bank]),
        }
        Ok(())
    }

    /// Rename a port, keeping its container's name index consistent.
    pub fn rename_port(&mut self, port: PortId, name: &str) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        let bank = slot.bank;
        let old = slot.name.clone();
        if old == name {
            return Ok(());
        }
        self.bank_mut(bank)
            .ok_or(PortError::Stale { kind: "bank" })?
            .rename(port, &old, name)?;
        if let Some(slot) = self.ports.get_mut(port) {
            slot.name = name.to_string();
        }
        self.emit(GraphEvent::PortRenamed {
            port,
            from: old,
            to: name.to_string(),
        });
        self.notify_bank_extenders(bank);
        Ok(())
    }

    /// Move a port to the end of its container's order.
    pub fn push_down(&mut self, port: PortId) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        let bank = slot.bank;
        self.bank_mut(bank)
            .ok_or(PortError::Stale { kind: "bank" })?
            .push_down(port)
    }

    /// Create a same-named input/output pair on an operator wired by a
    /// pass-through rule, for values that tunnel through unchanged.
    pub fn create_pass_through_port(
        &mut self,
        op: OperatorId,
        name: &str,
    ) -> PortResult<(PortId, PortId)> {
        let input = self.create_port(BankRef::OpInputs(op), name)?;
        let output = match self.create_port(BankRef::OpOutputs(op), name) {
            Ok(output) => output,
            Err(err) => {
                self.remove_port(BankRef::OpInputs(op), input)?;
                return Err(err);
            }
        };
        self.add_rule(op, MetadataRule::pass_through(input, output))?;
        Ok((input, output))
    }

    pub(crate) fn notify_bank_extenders(&mut self, bank: BankRef) {
        self.notify_banks(&[bank]);
    }

    /// Run the growth update of every extender attached to any of `banks`,
    /// once per extender even when it observes several of them.
    pub(crate) fn notify_banks(&mut self, banks: &[BankRef]) {
        let mut ids: Vec<ExtenderId> = Vec::new();
        for &bank in banks {
            if let Some(b) = self.bank(bank) {
                for &id in b.extenders() {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        for id in ids {
            crate::extender::run_update(self, id);
        }
    }

    // ==================== Wiring ====================

    /// The unit a port's connections live in: the parent unit for operator
    /// ports, the unit itself for its inner sources/sinks.
    pub fn connection_context(&self, port: PortId) -> Option<UnitId> {
        let slot = self.ports.get(port)?;
        match slot.bank {
            BankRef::OpInputs(op) | BankRef::OpOutputs(op) => {
                let parent = self.operators.get(op)?.parent;
                parent.is_valid().then_some(parent)
            }
            BankRef::UnitSources(u) | BankRef::UnitSinks(u) => Some(u),
        }
    }

    /// Check whether `from` may be wired to `to`, without mutating
    /// anything. [`FlowGraph::connect`] runs exactly this check first.
    pub fn can_connect(&self, from: PortId, to: PortId) -> PortResult<()> {
        let Some(from_slot) = self.ports.get(from) else {
            return Err(PortError::Stale { kind: "port" });
        };
        let Some(to_slot) = self.ports.get(to) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if from_slot.direction != PortDirection::Output
            || to_slot.direction != PortDirection::Input
        {
            return Err(PortError::Direction {
                from: from_slot.name.clone(),
                to: to_slot.name.clone(),
            });
        }
        if from_slot.is_connected() {
            return Err(PortError::AlreadyConnected {
                port: from_slot.name.clone(),
            });
        }
        if to_slot.is_connected() {
            return Err(PortError::AlreadyConnected {
                port: to_slot.name.clone(),
            });
        }
        match (self.connection_context(from), self.connection_context(to)) {
            (Some(a), Some(b)) if a == b => {}
            _ => {
                return Err(PortError::CrossContext {
                    from: from_slot.name.clone(),
                    to: to_slot.name.clone(),
                })
            }
        }
        if self.would_create_cycle(from, to) {
            return Err(PortError::CycleDetected {
                from: from_slot.name.clone(),
                to: to_slot.name.clone(),
            });
        }
        Ok(())
    }

    /// Wire an output to an input. The connection is symmetric: both sides
    /// see it immediately.
    pub fn connect(&mut self, from: PortId, to: PortId) -> PortResult<()> {
        if let Err(err) = self.can_connect(from, to) {
            warn!(%err, "Rejected connection");
            return Err(err);
        }
        if let Some(slot) = self.ports.get_mut(from) {
            slot.opposite = to;
        }
        if let Some(slot) = self.ports.get_mut(to) {
            slot.opposite = from;
        }
        if let Some(unit) = self.connection_context(from) {
            self.invalidate_order(unit);
        }
        self.emit(GraphEvent::Connected { from, to });
        let banks = self.banks_of(from, to);
        self.notify_banks(&banks);
        Ok(())
    }

    /// Drop the connection at `port` (either side). Delivered data and
    /// metadata stay where they are until cleared.
    pub fn disconnect(&mut self, port: PortId) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if !slot.is_connected() {
            return Err(PortError::NotConnected {
                port: slot.name.clone(),
            });
        }
        let opposite = slot.opposite;
        self.unlink(port);
        let banks = self.banks_of(port, opposite);
        self.notify_banks(&banks);
        Ok(())
    }

    /// Clear both sides of a connection without notifying extenders.
    /// Returns the old counterpart. Emits the disconnect event.
    fn unlink(&mut self, port: PortId) -> Option<PortId> {
        let slot = self.ports.get(port)?;
        if !slot.is_connected() {
            return None;
        }
        let opposite = slot.opposite;
        let (from, to) = if slot.direction == PortDirection::Output {
            (port, opposite)
        } else {
            (opposite, port)
        };
        if let Some(s) = self.ports.get_mut(port) {
            s.opposite = PortId::INVALID;
        }
        if let Some(s) = self.ports.get_mut(opposite) {
            s.opposite = PortId::INVALID;
        }
        if let Some(unit) = self.connection_context(port) {
            self.invalidate_order(unit);
        }
        self.emit(GraphEvent::Disconnected { from, to });
        Some(opposite)
    }

    fn banks_of(&self, a: PortId, b: PortId) -> Vec<BankRef> {
        let mut banks = Vec::with_capacity(2);
        for p in [a, b] {
            if let Some(slot) = self.ports.get(p) {
                if !banks.contains(&slot.bank) {
                    banks.push(slot.bank);
                }
            }
        }
        banks
    }

    #[inline]
    pub fn is_connected(&self, port: PortId) -> bool {
        self.ports.get(port).is_some_and(|s| s.is_connected())
    }

    pub fn opposite(&self, port: PortId) -> Option<PortId> {
        let slot = self.ports.get(port)?;
        slot.is_connected().then_some(slot.opposite)
    }

    /// Pin a port so extender growth never retires it, connected or not.
    pub fn lock(&mut self, port: PortId) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        slot.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self, port: PortId) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        slot.locked = false;
        Ok(())
    }

    /// The operator producing into `to_port` must never be reachable from
    /// the consumer, or the unit's execution order stops existing.
    fn would_create_cycle(&self, from: PortId, to: PortId) -> bool {
        let Some(from_op) = self.member_operator_of(from) else {
            return false;
        };
        let Some(to_op) = self.member_operator_of(to) else {
            return false;
        };
        if from_op == to_op {
            return true;
        }
        // DFS along existing connections, consumer-ward from `to_op`.
        let mut stack = vec![to_op];
        let mut visited = Vec::new();
        while let Some(op) = stack.pop() {
            if op == from_op {
                return true;
            }
            if visited.contains(&op) {
                continue;
            }
            visited.push(op);
            let Some(slot) = self.operators.get(op) else {
                continue;
            };
            for &out in slot.outputs.members() {
                if let Some(next) = self
                    .ports
                    .get(out)
                    .filter(|s| s.is_connected())
                    .and_then(|s| self.member_operator_of(s.opposite))
                {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// The member operator owning a port, `None` for unit source/sink
    /// ports (the unit boundary cannot take part in a cycle).
    pub(crate) fn member_operator_of(&self, port: PortId) -> Option<OperatorId> {
        match self.ports.get(port)?.bank {
            BankRef::OpInputs(op) | BankRef::OpOutputs(op) => Some(op),
            BankRef::UnitSources(_) | BankRef::UnitSinks(_) => None,
        }
    }

    pub(crate) fn invalidate_order(&mut self, unit: UnitId) {
        if let Some(slot) = self.units.get_mut(unit) {
            slot.order_dirty = true;
        }
    }

    // ==================== Delivery ====================

    /// Deliver a payload at an output port. The packet is stamped with the
    /// port's identity and forwarded to the connected input; an unconnected
    /// output keeps the payload but it flows nowhere, which is not an
    /// error.
    pub fn deliver(&mut self, port: PortId, payload: Arc<dyn Payload>) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if slot.direction == PortDirection::Input {
            return Err(PortError::DeliverOnInput {
                port: slot.name.clone(),
            });
        }
        let opposite = slot.is_connected().then_some(slot.opposite);
        trace!(port = %slot.name, forwarded = opposite.is_some(), "Delivering payload");
        let packet = match self.port_address(port) {
            Some(source) => Packet::with_source(payload, source),
            None => Packet::new(payload),
        };
        if let Some(slot) = self.ports.get_mut(port) {
            slot.packet = Some(packet.clone());
        }
        if let Some(to) = opposite {
            if let Some(slot) = self.ports.get_mut(to) {
                slot.packet = Some(packet);
            }
        }
        Ok(())
    }

    /// Store a packet directly at an input port, as a connected output's
    /// delivery would. Hosts use this to feed the boundary of a run.
    pub fn receive(&mut self, port: PortId, packet: Packet) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if slot.direction != PortDirection::Input {
            return Err(PortError::ReceiveOnOutput {
                port: slot.name.clone(),
            });
        }
        slot.packet = Some(packet);
        Ok(())
    }

    pub fn packet(&self, port: PortId) -> Option<&Packet> {
        self.ports.get(port)?.packet.as_ref()
    }

    pub fn data(&self, port: PortId) -> Option<&Arc<dyn Payload>> {
        self.packet(port).map(|p| &p.payload)
    }

    /// Typed fetch of the payload at a port: the one place runtime type
    /// checks happen.
    pub fn data_as<T: Payload>(&self, port: PortId) -> TypedData<'_, T> {
        fetch_typed(self.data(port))
    }

    /// Where the payload at this port was delivered from.
    pub fn data_source(&self, port: PortId) -> Option<&PortRef> {
        self.packet(port)?.source.as_ref()
    }

    // ==================== Metadata ====================

    /// Deliver inferred metadata at an output port, forwarding to the
    /// connected input. `None` clears both sides, so stale descriptions do
    /// not survive an upstream clear.
    pub fn deliver_metadata(
        &mut self,
        port: PortId,
        metadata: Option<Box<dyn Metadata>>,
    ) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if slot.direction == PortDirection::Input {
            return Err(PortError::DeliverOnInput {
                port: slot.name.clone(),
            });
        }
        let opposite = slot.is_connected().then_some(slot.opposite);
        let origin = self.port_address(port);
        let value: Option<Arc<dyn Metadata>> = metadata.map(Arc::from);

        if let Some(slot) = self.ports.get_mut(port) {
            slot.meta = value.as_ref().map(|v| MetaSlot {
                value: Arc::clone(v),
                origin: origin.clone(),
            });
        }
        self.emit(GraphEvent::MetadataChanged { port });
        if let Some(to) = opposite {
            if let Some(slot) = self.ports.get_mut(to) {
                slot.meta = value.map(|v| MetaSlot {
                    value: v,
                    origin: origin.clone(),
                });
            }
            self.emit(GraphEvent::MetadataChanged { port: to });
        }
        Ok(())
    }

    /// Store inferred metadata directly at an input port, as a connected
    /// output's delivery would. `None` clears the slot. A full metadata
    /// pass starts by clearing every inferred slot, so seeds placed this
    /// way feed manual rule application, not [`FlowGraph::infer_metadata`].
    pub fn receive_metadata(
        &mut self,
        port: PortId,
        metadata: Option<Box<dyn Metadata>>,
    ) -> PortResult<()> {
        let Some(slot) = self.ports.get(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if slot.direction != PortDirection::Input {
            return Err(PortError::ReceiveOnOutput {
                port: slot.name.clone(),
            });
        }
        if let Some(slot) = self.ports.get_mut(port) {
            slot.meta = metadata.map(|m| MetaSlot {
                value: Arc::from(m),
                origin: None,
            });
        }
        self.emit(GraphEvent::MetadataChanged { port });
        Ok(())
    }

    /// Record metadata derived from real data. Port-local; it wins over the
    /// inferred slot while present.
    pub fn set_real_metadata(
        &mut self,
        port: PortId,
        metadata: Option<Box<dyn Metadata>>,
    ) -> PortResult<()> {
        let origin = self.port_address(port);
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        slot.real_meta = metadata.map(|m| MetaSlot {
            value: Arc::from(m),
            origin,
        });
        self.emit(GraphEvent::MetadataChanged { port });
        Ok(())
    }

    /// The metadata visible at a port: data-derived if present, else
    /// inferred.
    pub fn metadata(&self, port: PortId) -> Option<&dyn Metadata> {
        self.ports.get(port)?.metadata()
    }

    pub fn inferred_metadata(&self, port: PortId) -> Option<&dyn Metadata> {
        self.ports
            .get(port)?
            .meta
            .as_ref()
            .map(|slot| slot.value.as_ref())
    }

    /// Where the metadata visible at this port was delivered from.
    pub fn metadata_origin(&self, port: PortId) -> Option<&PortRef> {
        let slot = self.ports.get(port)?;
        slot.real_meta
            .as_ref()
            .or(slot.meta.as_ref())?
            .origin
            .as_ref()
    }

    pub fn add_precondition(
        &mut self,
        port: PortId,
        precondition: Box<dyn Precondition>,
    ) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        if slot.direction != PortDirection::Input {
            return Err(PortError::ReceiveOnOutput {
                port: slot.name.clone(),
            });
        }
        slot.preconditions.push(precondition);
        Ok(())
    }

    // ==================== Diagnostics ====================

    pub fn add_error(&mut self, port: PortId, error: MetadataError) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        slot.errors.push(error);
        Ok(())
    }

    pub fn errors(&self, port: PortId) -> &[MetadataError] {
        self.ports.get(port).map(|s| s.errors.as_slice()).unwrap_or(&[])
    }

    pub fn add_simple_error(&mut self, port: PortId, message: impl Into<String>) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        slot.simple_errors.push(message.into());
        Ok(())
    }

    pub fn simple_errors(&self, port: PortId) -> &[String] {
        self.ports
            .get(port)
            .map(|s| s.simple_errors.as_slice())
            .unwrap_or(&[])
    }

    /// All quick fixes suggested at a port, best rating first.
    pub fn collect_quick_fixes(&self, port: PortId) -> Vec<QuickFix> {
        let mut fixes: Vec<QuickFix> = self
            .errors(port)
            .iter()
            .flat_map(|e| e.fixes.iter().cloned())
            .collect();
        fixes.sort_by(|a, b| b.rating.cmp(&a.rating));
        fixes
    }

    // ==================== Clearing ====================

    pub fn clear_port(&mut self, port: PortId, flags: ClearFlags) -> PortResult<()> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(PortError::Stale { kind: "port" });
        };
        let had_meta = slot.metadata().is_some();
        slot.clear(flags);
        let lost_meta = had_meta && slot.metadata().is_none();
        if lost_meta {
            self.emit(GraphEvent::MetadataChanged { port });
        }
        Ok(())
    }

    pub fn clear_bank(&mut self, bank: BankRef, flags: ClearFlags) -> PortResult<()> {
        let members = self
            .bank(bank)
            .ok_or(PortError::Stale { kind: "bank" })?
            .members()
            .to_vec();
        for port in members {
            self.clear_port(port, flags)?;
        }
        Ok(())
    }

    /// Clear the selected state on every port in the graph.
    pub fn clear_all(&mut self, flags: ClearFlags) {
        let ids: Vec<PortId> = self.ports.ids().collect();
        for port in ids {
            let _ = self.clear_port(port, flags);
        }
    }

    // ==================== Provenance ====================

    /// The serializable address of a port.
    pub fn port_address(&self, port: PortId) -> Option<PortRef> {
        let slot = self.ports.get(port)?;
        let (op, subprocess) = match slot.bank {
            BankRef::OpInputs(op) | BankRef::OpOutputs(op) => (op, OUTER_PORT),
            BankRef::UnitSources(u) | BankRef::UnitSinks(u) => {
                let unit = self.units.get(u)?;
                (unit.owner, unit.index_in_owner as i32)
            }
        };
        let operator = self.operators.get(op)?.name.clone();
        Some(PortRef {
            operator,
            port: slot.name.clone(),
            subprocess,
        })
    }

    /// The address of the output port that delivers to this port: an input
    /// resolves through its connection, an output answers for itself.
    /// `None` for an unconnected input.
    pub fn delivering_ref(&self, port: PortId) -> Option<PortRef> {
        let slot = self.ports.get(port)?;
        match slot.direction {
            PortDirection::Output => self.port_address(port),
            PortDirection::Input => {
                slot.is_connected()
                    .then(|| self.port_address(slot.opposite))
                    .flatten()
            }
        }
    }

    /// Resolve a [`PortRef`] against the live graph, searching the
    /// delivering (output-direction) banks. Misses are `None`, never an
    /// error: renames and removals invalidate old references by design of
    /// the name-based addressing.
    pub fn resolve(&self, reference: &PortRef) -> Option<PortId> {
        let op = self.find_operator(&reference.operator)?;
        if reference.is_outer() {
            self.operators.get(op)?.outputs.find(&reference.port)
        } else {
            let unit = *self
                .operators
                .get(op)?
                .subprocesses
                .get(reference.subprocess as usize)?;
            self.units.get(unit)?.sources.find(&reference.port)
        }
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
