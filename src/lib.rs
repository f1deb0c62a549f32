//! # PortFlow: Typed Dataflow Port Graphs
//!
//! A port-and-connection layer for operator graphs: operators expose named,
//! directed ports grouped in banks, connections are validated before they
//! exist, and evaluation happens in two phases. The design follows the
//! "infer-then-execute" discipline: a metadata dry-run propagates
//! descriptions of would-be data through the wiring and collects
//! diagnostics before any operator logic runs.
//!
//! ## Architecture
//!
//! - **Graph**: Arena-backed operators, subprocess units, ports and banks
//! - **Extenders**: Self-managing port groups that keep exactly one free slot
//! - **Rules**: Declarative metadata propagation run by the dry-run pass
//! - **Process**: Two-phase evaluation over cached topological orders
//! - **Bridge**: Crossbeam channels fanning graph events out to observers
//!
//! ## Example
//!
//! ```ignore
//! use portflow::{BankRef, FlowGraph, ProcessError};
//!
//! fn main() -> Result<(), ProcessError> {
//!     let mut graph = FlowGraph::new();
//!     let root = graph.root();
//!
//!     let reader = graph.add_operator(root, "Read Table")?;
//!     let cleaner = graph.add_operator(root, "Drop Missing")?;
//!     let out = graph.create_port(BankRef::OpOutputs(reader), "output")?;
//!
//!     // A growing input group: connecting the spare creates the next one.
//!     let ext = graph.add_single_extender("input", BankRef::OpInputs(cleaner))?;
//!     graph.start_extender(ext)?;
//!     let spare = graph.ports_of(BankRef::OpInputs(cleaner))[0];
//!     graph.connect(out, spare)?;
//!
//!     // Phase 1: dry-run the wiring without data.
//!     let report = graph.infer_metadata();
//!     assert!(!report.has_blockers());
//!
//!     // Phase 2: run each operator's logic in execution order.
//!     graph.execute()?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod extender;
pub mod graph;
pub mod metadata;
pub mod payload;
pub mod process;
pub mod provenance;
pub mod rules;

// Re-export commonly used types
pub use bridge::{ConnectionSnapshot, GraphEvent, OperatorSnapshot, PortSnapshot, WiringSnapshot};
pub use config::{GraphConfig, ReclaimPolicy};
pub use error::{ConfigError, DataError, PortError, PortResult, ProcessError};
pub use extender::{CollectorHandle, ExtenderPhase, ExtenderSlot, OutputMode, PairRole};
pub use graph::{
    BankRef, ClearFlags, ExtenderId, FlowGraph, OperatorId, OperatorSlot, PortBank,
    PortDirection, PortId, PortSlot, UnitId, UnitSlot,
};
pub use metadata::{
    CollectionMeta, CompatLevel, Metadata, MetadataError, Precondition, QuickFix, Severity,
    SimplePrecondition,
};
pub use payload::{Fetched, Packet, Payload, PayloadCollection, TypedData};
pub use process::{Diagnostic, ExecContext, MetadataReport, OperatorLogic, PassStats};
pub use provenance::{PortRef, OUTER_PORT};
pub use rules::{MetaMerge, MetaTransform, MetadataRule};
