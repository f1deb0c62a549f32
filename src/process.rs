//! Two-phase evaluation of the graph.
//!
//! Phase one, [`FlowGraph::infer_metadata`], walks every unit in execution
//! order without touching data: preconditions check what their ports would
//! receive, rules propagate metadata clones downstream, and everything
//! found wrong lands in a [`MetadataReport`]. Phase two,
//! [`FlowGraph::execute`], runs only when the report carries no blocking
//! error and drives each operator's [`OperatorLogic`] in the same order.
//!
//! Both phases derive their order per unit with Kahn's algorithm over the
//! member wiring, cached until a connection changes.

use crate::error::{DataError, PortError, PortResult, ProcessError};
use crate::graph::{BankRef, ClearFlags, FlowGraph, OperatorId, PortId, UnitId};
use crate::metadata::MetadataError;
use crate::payload::{Fetched, Payload};
use crate::rules;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runtime behavior of an operator during the data pass.
pub trait OperatorLogic: Send {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), ProcessError>;
}

/// The view an operator gets of the graph while it runs: its own ports by
/// name, typed input fetches, and descent into its subprocesses.
pub struct ExecContext<'a> {
    graph: &'a mut FlowGraph,
    operator: OperatorId,
}

impl ExecContext<'_> {
    pub fn graph(&mut self) -> &mut FlowGraph {
        self.graph
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn input(&self, name: &str) -> Option<PortId> {
        self.graph.find_port(BankRef::OpInputs(self.operator), name)
    }

    pub fn output(&self, name: &str) -> Option<PortId> {
        self.graph.find_port(BankRef::OpOutputs(self.operator), name)
    }

    /// Typed fetch of a named input's payload. A missing port, missing
    /// packet, or wrong kind is an error naming the port.
    pub fn require_input_as<T: Payload>(&self, name: &str) -> Result<Fetched<'_, T>, DataError> {
        let Some(port) = self.input(name) else {
            return Err(DataError::Missing {
                port: name.to_string(),
            });
        };
        self.graph.data_as::<T>(port).required(name)
    }

    /// Deliver a payload through a named output.
    pub fn deliver(&mut self, name: &str, payload: Arc<dyn Payload>) -> Result<(), ProcessError> {
        let Some(port) = self.output(name) else {
            return Err(ProcessError::Port(PortError::UnknownPort {
                name: name.to_string(),
            }));
        };
        self.graph.deliver(port, payload)?;
        Ok(())
    }

    /// Run one owned subprocess to completion, in its execution order.
    pub fn execute_subprocess(&mut self, index: usize) -> Result<(), ProcessError> {
        let unit = self
            .graph
            .operator(self.operator)
            .and_then(|slot| slot.subprocesses.get(index).copied());
        let Some(unit) = unit else {
            return Err(ProcessError::Port(PortError::Stale {
                kind: "subprocess",
            }));
        };
        execute_unit(self.graph, unit)
    }
}

/// One port's diagnostic from the latest metadata pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub port: PortId,
    pub port_name: String,
    /// Name of the operator owning the port, boundary ports resolving to
    /// the unit's owner. `None` only for stale lookups.
    pub operator: Option<String>,
    pub error: MetadataError,
}

/// Counters from one metadata pass.
#[derive(Debug, Clone)]
pub struct PassStats {
    /// Operators visited, nested subprocesses included.
    pub operators_visited: usize,
    pub warnings: usize,
    pub errors: usize,
    pub elapsed_us: u64,
}

/// Outcome of a metadata pass.
#[derive(Debug, Clone)]
pub struct MetadataReport {
    diagnostics: Vec<Diagnostic>,
    stats: PassStats,
}

impl MetadataReport {
    /// Whether any diagnostic is severe enough to block execution.
    pub fn has_blockers(&self) -> bool {
        self.stats.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.stats.errors
    }

    pub fn warning_count(&self) -> usize {
        self.stats.warnings
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn stats(&self) -> &PassStats {
        &self.stats
    }
}

impl FlowGraph {
    /// Topological order of a unit's member operators, cached until the
    /// unit's wiring changes.
    pub fn execution_order(&mut self, unit: UnitId) -> PortResult<Vec<OperatorId>> {
        {
            let Some(slot) = self.unit(unit) else {
                return Err(PortError::Stale { kind: "unit" });
            };
            if !slot.order_dirty {
                return Ok(slot.order.clone());
            }
        }
        let order = self.topo_order(unit)?;
        if let Some(slot) = self.units.get_mut(unit) {
            slot.order = order.clone();
            slot.order_dirty = false;
        }
        Ok(order)
    }

    fn topo_order(&self, unit: UnitId) -> PortResult<Vec<OperatorId>> {
        let Some(slot) = self.unit(unit) else {
            return Err(PortError::Stale { kind: "unit" });
        };
        let members = slot.operators.clone();
        let mut indegree: HashMap<OperatorId, usize> =
            members.iter().map(|&m| (m, 0)).collect();
        let mut downstream: HashMap<OperatorId, Vec<OperatorId>> = HashMap::new();
        for &member in &members {
            let Some(op) = self.operator(member) else {
                continue;
            };
            for &out in op.output_ports() {
                let Some(next) = self
                    .opposite(out)
                    .and_then(|opp| self.member_operator_of(opp))
                else {
                    continue;
                };
                if next == member || !indegree.contains_key(&next) {
                    continue;
                }
                downstream.entry(member).or_default().push(next);
                if let Some(d) = indegree.get_mut(&next) {
                    *d += 1;
                }
            }
        }

        let mut queue: VecDeque<OperatorId> = members
            .iter()
            .copied()
            .filter(|m| indegree.get(m) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(members.len());
        while let Some(member) = queue.pop_front() {
            order.push(member);
            for next in downstream.remove(&member).unwrap_or_default() {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
        // Connect rejects cycles, so every member should have sorted.
        if order.len() < members.len() {
            warn!(
                unit = ?unit,
                "Wiring no longer sorts; appending leftover operators in insertion order"
            );
            for &member in &members {
                if !order.contains(&member) {
                    order.push(member);
                }
            }
        }
        Ok(order)
    }

    /// Run the metadata pass over the whole graph.
    ///
    /// Stale inferred metadata and pass diagnostics are cleared first, then
    /// every unit is walked from the root: preconditions check each input
    /// against what the wiring would deliver, rules propagate metadata
    /// downstream, subprocess rules descend mid-operator. The pass never
    /// fails; everything it finds lands in the report.
    pub fn infer_metadata(&mut self) -> MetadataReport {
        let started = Instant::now();
        self.clear_all(ClearFlags::META_ERRORS | ClearFlags::METADATA);
        let visited = infer_unit(self, self.root());

        let mut diagnostics = Vec::new();
        let mut warnings = 0;
        let mut errors = 0;
        for (port, slot) in self.ports.iter() {
            for error in &slot.errors {
                if error.is_blocking() {
                    errors += 1;
                } else {
                    warnings += 1;
                }
                diagnostics.push(Diagnostic {
                    port,
                    port_name: slot.name.clone(),
                    operator: self.port_owner_name(slot.bank),
                    error: error.clone(),
                });
            }
        }

        let stats = PassStats {
            operators_visited: visited,
            warnings,
            errors,
            elapsed_us: started.elapsed().as_micros() as u64,
        };
        info!(
            operators = stats.operators_visited,
            warnings = stats.warnings,
            errors = stats.errors,
            elapsed_us = stats.elapsed_us,
            "Metadata pass complete"
        );
        MetadataReport { diagnostics, stats }
    }

    /// Run both phases: metadata first, data second. A blocking metadata
    /// error stops before any operator logic runs.
    pub fn execute(&mut self) -> Result<MetadataReport, ProcessError> {
        let report = self.infer_metadata();
        if report.has_blockers() {
            return Err(ProcessError::Blocked {
                errors: report.error_count(),
            });
        }
        self.clear_all(ClearFlags::DATA);
        execute_unit(self, self.root())?;
        Ok(report)
    }

    fn port_owner_name(&self, bank: BankRef) -> Option<String> {
        let op = match bank {
            BankRef::OpInputs(op) | BankRef::OpOutputs(op) => op,
            BankRef::UnitSources(u) | BankRef::UnitSinks(u) => self.unit(u)?.owner,
        };
        Some(self.operator(op)?.name.clone())
    }
}

/// Walk one unit in execution order, applying preconditions and rules.
/// Infallible: a stale unit contributes nothing, so one broken corner
/// still leaves diagnostics everywhere else. Returns operators visited,
/// nested units included.
pub(crate) fn infer_unit(graph: &mut FlowGraph, unit: UnitId) -> usize {
    let order = match graph.execution_order(unit) {
        Ok(order) => order,
        Err(_) => return 0,
    };
    let mut visited = 0;
    for op in order {
        let inputs: Vec<PortId> = graph
            .operator(op)
            .map(|slot| slot.input_ports().to_vec())
            .unwrap_or_default();
        for port in inputs {
            check_port_preconditions(graph, port);
        }
        visited += 1;
        visited += rules::apply_operator_rules(graph, op);
    }
    // Inner sinks receive from members, so they check last.
    let sinks: Vec<PortId> = graph
        .unit(unit)
        .map(|slot| slot.sink_ports().to_vec())
        .unwrap_or_default();
    for port in sinks {
        check_port_preconditions(graph, port);
    }
    visited
}

fn check_port_preconditions(graph: &mut FlowGraph, port: PortId) {
    let Some(slot) = graph.port_mut(port) else {
        return;
    };
    if slot.preconditions.is_empty() {
        return;
    }
    let preconditions = mem::take(&mut slot.preconditions);
    let mut found: Vec<MetadataError> = Vec::new();
    for precondition in &preconditions {
        found.extend(precondition.check(graph.metadata(port)));
    }
    if let Some(slot) = graph.port_mut(port) {
        slot.preconditions = preconditions;
        slot.errors.extend(found);
    }
}

/// Run one unit's operators in execution order. Operators without logic
/// are skipped. The first failure stops the unit, rewrapped to name the
/// operator when it was a data problem.
pub(crate) fn execute_unit(graph: &mut FlowGraph, unit: UnitId) -> Result<(), ProcessError> {
    let order = graph.execution_order(unit)?;
    for op in order {
        let Some(slot) = graph.operator_mut(op) else {
            continue;
        };
        let Some(mut logic) = slot.logic.take() else {
            continue;
        };
        let name = slot.name.clone();
        let result = logic.execute(&mut ExecContext {
            graph,
            operator: op,
        });
        if let Some(slot) = graph.operator_mut(op) {
            slot.logic = Some(logic);
        }
        match result {
            Ok(()) => {}
            Err(ProcessError::Data(source)) => {
                return Err(ProcessError::OperatorFailed {
                    operator: name,
                    source,
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
