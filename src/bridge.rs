//! Change notifications and UI-facing snapshots.
//!
//! The graph publishes a [`GraphEvent`] for every structural or metadata
//! change. Subscribers receive them over bounded crossbeam channels, so a
//! UI thread can mirror the wiring without sharing the graph itself.
//! Snapshots give the same picture as a one-shot value.

use crate::graph::{BankRef, FlowGraph, OperatorId, PortId, UnitId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::debug;

/// Events published on structural and metadata changes.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A port was created in a bank.
    PortAdded {
        bank: BankRef,
        port: PortId,
        name: String,
    },
    /// A port was removed from a bank.
    PortRemoved {
        bank: BankRef,
        port: PortId,
        name: String,
    },
    /// A port changed its name.
    PortRenamed {
        port: PortId,
        from: String,
        to: String,
    },
    /// Two ports were wired together.
    Connected { from: PortId, to: PortId },
    /// A connection was removed.
    Disconnected { from: PortId, to: PortId },
    /// The metadata visible at a port changed.
    MetadataChanged { port: PortId },
    /// An operator joined the graph.
    OperatorAdded { operator: OperatorId, name: String },
    /// An operator left the graph.
    OperatorRemoved { operator: OperatorId, name: String },
}

impl GraphEvent {
    /// Whether the event mentions `port`.
    pub fn involves(&self, port: PortId) -> bool {
        match self {
            GraphEvent::PortAdded { port: p, .. }
            | GraphEvent::PortRemoved { port: p, .. }
            | GraphEvent::PortRenamed { port: p, .. }
            | GraphEvent::MetadataChanged { port: p } => *p == port,
            GraphEvent::Connected { from, to } | GraphEvent::Disconnected { from, to } => {
                *from == port || *to == port
            }
            GraphEvent::OperatorAdded { .. } | GraphEvent::OperatorRemoved { .. } => false,
        }
    }
}

struct Subscription {
    tx: Sender<GraphEvent>,
    /// When set, only events involving this port are forwarded.
    filter: Option<PortId>,
}

/// Fan-out hub for [`GraphEvent`]s.
///
/// Emission never blocks: a full subscriber channel drops the event for that
/// subscriber and counts it, a disconnected receiver retires its
/// subscription.
pub struct EventHub {
    capacity: usize,
    subscriptions: Vec<Subscription>,
    dropped: u64,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscriptions: Vec::new(),
            dropped: 0,
        }
    }

    /// Subscribe to every event.
    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscriptions.push(Subscription { tx, filter: None });
        rx
    }

    /// Subscribe to events involving one port. This is the per-port
    /// metadata-change listener surface.
    pub fn watch_port(&mut self, port: PortId) -> Receiver<GraphEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscriptions.push(Subscription {
            tx,
            filter: Some(port),
        });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Events dropped because a subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        if self.subscriptions.is_empty() {
            return;
        }
        let mut dropped = self.dropped;
        self.subscriptions.retain(|sub| {
            if let Some(port) = sub.filter {
                if !event.involves(port) {
                    return true;
                }
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        if dropped != self.dropped {
            debug!(total = dropped, "Event subscriber fell behind; dropping");
            self.dropped = dropped;
        }
    }
}

/// Snapshot of one port.
#[derive(Debug, Clone, Serialize)]
pub struct PortSnapshot {
    pub id: PortId,
    pub name: String,
    pub connected_to: Option<PortId>,
    pub locked: bool,
    pub has_data: bool,
    pub has_metadata: bool,
    pub error_count: usize,
}

/// Snapshot of one operator with its port banks.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorSnapshot {
    pub id: OperatorId,
    pub name: String,
    pub inputs: Vec<PortSnapshot>,
    pub outputs: Vec<PortSnapshot>,
    pub subprocesses: usize,
}

/// Snapshot of one connection, output side first.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub from: PortId,
    pub to: PortId,
}

/// Complete wiring snapshot of one subprocess unit.
#[derive(Debug, Clone, Serialize)]
pub struct WiringSnapshot {
    pub operators: Vec<OperatorSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
}

impl WiringSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl FlowGraph {
    fn port_snapshot(&self, id: PortId) -> Option<PortSnapshot> {
        let port = self.port(id)?;
        Some(PortSnapshot {
            id,
            name: port.name.clone(),
            connected_to: port.is_connected().then_some(port.opposite),
            locked: port.locked,
            has_data: port.packet.is_some(),
            has_metadata: port.metadata().is_some(),
            error_count: port.errors.len(),
        })
    }

    /// Capture the wiring of one unit: its member operators and every
    /// connection, listed from the output side.
    pub fn snapshot(&self, unit: UnitId) -> Option<WiringSnapshot> {
        let unit_slot = self.unit(unit)?;
        let mut operators = Vec::new();
        let mut connections = Vec::new();

        let mut record_connections = |ports: &[PortId], graph: &FlowGraph| {
            for &from in ports {
                if let Some(slot) = graph.port(from) {
                    if slot.is_connected() {
                        connections.push(ConnectionSnapshot {
                            from,
                            to: slot.opposite,
                        });
                    }
                }
            }
        };

        record_connections(self.bank(BankRef::UnitSources(unit))?.members(), self);
        for &op_id in unit_slot.operators.as_slice() {
            let Some(op) = self.operator(op_id) else {
                continue;
            };
            let inputs = op
                .inputs
                .members()
                .iter()
                .filter_map(|&p| self.port_snapshot(p))
                .collect();
            let outputs = op
                .outputs
                .members()
                .iter()
                .filter_map(|&p| self.port_snapshot(p))
                .collect();
            operators.push(OperatorSnapshot {
                id: op_id,
                name: op.name.clone(),
                inputs,
                outputs,
                subprocesses: op.subprocesses.len(),
            });
            record_connections(op.outputs.members(), self);
        }

        Some(WiringSnapshot {
            operators,
            connections,
        })
    }
}
