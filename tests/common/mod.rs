//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use portflow::{BankRef, FlowGraph, OperatorId, PortId};
use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING: Once = Once::new();

/// Install a tracing subscriber once per test binary so `RUST_LOG` controls
/// test output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Look up an input port by name, panicking with context on a miss.
pub fn input_of(graph: &FlowGraph, op: OperatorId, name: &str) -> PortId {
    graph
        .find_port(BankRef::OpInputs(op), name)
        .unwrap_or_else(|| panic!("operator has no input port named '{name}'"))
}

/// Look up an output port by name, panicking with context on a miss.
pub fn output_of(graph: &FlowGraph, op: OperatorId, name: &str) -> PortId {
    graph
        .find_port(BankRef::OpOutputs(op), name)
        .unwrap_or_else(|| panic!("operator has no output port named '{name}'"))
}
