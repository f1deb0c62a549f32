//! Test data builders and payload fixtures for graph tests

use portflow::{
    BankRef, FlowGraph, Metadata, MetadataRule, OperatorId, Payload, PortId,
};
use std::any::Any;
use std::sync::Arc;

/// Minimal tabular payload used across the integration tests.
#[derive(Debug)]
pub struct Table {
    pub rows: u32,
}

impl Payload for Table {
    fn kind(&self) -> &'static str {
        "table"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Metadata describing a [`Table`], with an optional row count.
#[derive(Debug, Clone, Default)]
pub struct TableMeta {
    pub rows: Option<u32>,
}

impl Metadata for TableMeta {
    fn kind(&self) -> &'static str {
        "table"
    }

    fn clone_md(&self) -> Box<dyn Metadata> {
        Box::new(self.clone())
    }

    fn description(&self) -> String {
        match self.rows {
            Some(rows) => format!("table ({rows} rows)"),
            None => "table".to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Read the row count of a [`Table`] payload sitting at `port`, if any.
pub fn rows_at(graph: &FlowGraph, port: PortId) -> Option<u32> {
    graph
        .data(port)
        .and_then(|payload| payload.as_any().downcast_ref::<Table>())
        .map(|table| table.rows)
}

/// Deliver a [`Table`] payload to an output port.
pub fn deliver_table(graph: &mut FlowGraph, port: PortId, rows: u32) {
    graph
        .deliver(port, Arc::new(Table { rows }))
        .unwrap_or_else(|err| panic!("table delivery failed: {err}"));
}

/// Builder for a root-level operator chain.
///
/// The first operator gets a single output named `out`; every later
/// operator gets a pass-through pair named `data`, wired to its
/// predecessor. With [`ChainBuilder::seeded`] the head also carries a
/// rule generating [`TableMeta`], so a metadata pass flows end to end.
pub struct ChainBuilder {
    names: Vec<String>,
    seeded: bool,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            seeded: false,
        }
    }

    pub fn operator(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }

    pub fn seeded(mut self) -> Self {
        self.seeded = true;
        self
    }

    pub fn build(self) -> (FlowGraph, Vec<OperatorId>) {
        let mut graph = FlowGraph::new();
        let root = graph.root();
        let mut ops = Vec::new();
        let mut upstream: Option<PortId> = None;

        for name in &self.names {
            let op = graph
                .add_operator(root, name)
                .unwrap_or_else(|err| panic!("adding operator '{name}' failed: {err}"));
            if let Some(from) = upstream {
                let (input, _) = graph
                    .create_pass_through_port(op, "data")
                    .unwrap_or_else(|err| panic!("pass-through on '{name}' failed: {err}"));
                graph
                    .connect(from, input)
                    .unwrap_or_else(|err| panic!("wiring into '{name}' failed: {err}"));
                upstream = graph.find_port(BankRef::OpOutputs(op), "data");
            } else {
                let out = graph
                    .create_port(BankRef::OpOutputs(op), "out")
                    .unwrap_or_else(|err| panic!("output on '{name}' failed: {err}"));
                if self.seeded {
                    graph
                        .add_rule(op, MetadataRule::generate_new(out, Box::new(TableMeta::default())))
                        .unwrap_or_else(|err| panic!("seeding '{name}' failed: {err}"));
                }
                upstream = Some(out);
            }
            ops.push(op);
        }

        (graph, ops)
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder_wires_in_order() {
        let (graph, ops) = ChainBuilder::new()
            .operator("Source")
            .operator("Relay")
            .operator("Sink")
            .build();

        assert_eq!(ops.len(), 3);
        let head_out = graph.find_port(BankRef::OpOutputs(ops[0]), "out").unwrap();
        let relay_in = graph.find_port(BankRef::OpInputs(ops[1]), "data").unwrap();
        assert!(graph.is_connected(head_out));
        assert_eq!(graph.opposite(head_out), Some(relay_in));
    }
}
