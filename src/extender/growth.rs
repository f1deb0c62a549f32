//! The one-spare growth algorithm shared by every port group kind.
//!
//! A growth run works on the managed entry list in creation order. The
//! first free entry is kept as the spare; every later free entry is retired
//! while the count stays at or above the minimum; creation tops the list up
//! until the minimum is met and a spare exists. The spare moves to the end
//! of its containers so bound entries keep their positions, and all entries
//! are renumbered afterwards.
//!
//! The algorithm is generic over what one entry is. Kinds supply a factory
//! closure that creates one entry (all of its member ports) under a given
//! name, rolling back partial creation on failure.

use crate::error::{PortError, PortResult};
use crate::graph::{FlowGraph, PortId};
use tracing::{debug, warn};

/// One managed unit of a port group: a port, a pair, or a lock-step group.
pub(crate) trait ManagedEntry {
    /// Every member port of this entry.
    fn ports(&self) -> Vec<PortId>;
}

/// Parameters of one growth run, fixed per group kind.
pub(crate) struct GrowthPlan {
    pub base: String,
    pub min: usize,
    /// Ports one entry occupies; creation is budgeted in units of this.
    pub width: usize,
    /// Move a retained spare to the end of its containers.
    pub push_spare: bool,
    /// Leave surplus free entries alone instead of retiring them.
    pub skip_deletion: bool,
    /// Managed-port budget of this group; creation stops at the bound.
    pub cap: usize,
}

/// What one growth invocation should do.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum GrowthOp {
    /// Full transition: retire surplus, grow to the minimum, keep a spare.
    Update,
    /// Create exactly one entry.
    Seed,
    /// Create entries up to the minimum and nothing else.
    FillToMin,
}

pub(crate) type EntryFactory<'a, E> = &'a mut dyn FnMut(&mut FlowGraph, &str) -> PortResult<E>;

pub(crate) fn drive<E: ManagedEntry>(
    graph: &mut FlowGraph,
    entries: &mut Vec<E>,
    running_id: &mut u32,
    plan: &GrowthPlan,
    op: GrowthOp,
    create: EntryFactory<'_, E>,
) -> PortResult<()> {
    match op {
        GrowthOp::Update => update(graph, entries, running_id, plan, create),
        GrowthOp::Seed => {
            create_entry(graph, entries, running_id, plan, create)?;
            fix_names(graph, entries, &plan.base)
        }
        GrowthOp::FillToMin => {
            while entries.len() < plan.min {
                if !create_entry(graph, entries, running_id, plan, create)? {
                    break;
                }
            }
            fix_names(graph, entries, &plan.base)
        }
    }
}

fn update<E: ManagedEntry>(
    graph: &mut FlowGraph,
    entries: &mut Vec<E>,
    running_id: &mut u32,
    plan: &GrowthPlan,
    create: EntryFactory<'_, E>,
) -> PortResult<()> {
    // Scan in managed order: the first free entry is the spare, later free
    // entries are retired while the count stays above the minimum. Removals
    // only ever happen past the spare, so its index stays valid.
    let mut spare: Option<usize> = None;
    let mut index = 0;
    while index < entries.len() {
        let free = entry_is_free(graph, &entries[index]);
        if free && spare.is_none() {
            spare = Some(index);
        } else if free && !plan.skip_deletion && entries.len() > plan.min {
            let entry = entries.remove(index);
            debug!(group = %plan.base, "Retiring surplus free entry");
            delete_entry(graph, entry)?;
            continue;
        }
        index += 1;
    }

    // Grow to the minimum, then make sure a spare exists.
    while entries.len() < plan.min {
        if !create_entry(graph, entries, running_id, plan, create)? {
            break;
        }
    }
    if !entries.iter().any(|e| entry_is_free(graph, e)) {
        create_entry(graph, entries, running_id, plan, create)?;
    }

    // A retained spare goes last in container order so bound entries keep
    // their positions. The managed order is untouched.
    if plan.push_spare {
        if let Some(index) = spare {
            if let Some(entry) = entries.get(index) {
                push_entry_down(graph, entry)?;
            }
        }
    }

    fix_names(graph, entries, &plan.base)
}

/// Create one entry under the next running number. Returns `false` when the
/// port budget is exhausted.
fn create_entry<E: ManagedEntry>(
    graph: &mut FlowGraph,
    entries: &mut Vec<E>,
    running_id: &mut u32,
    plan: &GrowthPlan,
    create: EntryFactory<'_, E>,
) -> PortResult<bool> {
    if (entries.len() + 1) * plan.width > plan.cap {
        warn!(
            group = %plan.base,
            cap = plan.cap,
            "Managed-port budget exhausted; group stops growing"
        );
        return Ok(false);
    }
    loop {
        *running_id += 1;
        let name = format!("{} {}", plan.base, *running_id);
        match create(graph, &name) {
            Ok(entry) => {
                entries.push(entry);
                return Ok(true);
            }
            // A foreign port already holds the name; take the next number.
            Err(PortError::DuplicateName { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// An entry is free when every member port is unconnected and unlocked.
pub(crate) fn entry_is_free<E: ManagedEntry>(graph: &FlowGraph, entry: &E) -> bool {
    entry
        .ports()
        .iter()
        .all(|&port| graph.port(port).is_some_and(|slot| slot.is_free()))
}

fn delete_entry<E: ManagedEntry>(graph: &mut FlowGraph, entry: E) -> PortResult<()> {
    for port in entry.ports() {
        let Some(bank) = graph.port(port).map(|slot| slot.bank) else {
            continue;
        };
        graph.remove_port(bank, port)?;
    }
    Ok(())
}

fn rename_entry<E: ManagedEntry>(graph: &mut FlowGraph, entry: &E, name: &str) -> PortResult<()> {
    for port in entry.ports() {
        graph.rename_port(port, name)?;
    }
    Ok(())
}

fn push_entry_down<E: ManagedEntry>(graph: &mut FlowGraph, entry: &E) -> PortResult<()> {
    for port in entry.ports() {
        graph.push_down(port)?;
    }
    Ok(())
}

/// Renumber entries to `"{base} {n}"` over the managed order, n starting at
/// 1. Two passes through temporary names, so reordered entries never
/// collide mid-rename.
pub(crate) fn fix_names<E: ManagedEntry>(
    graph: &mut FlowGraph,
    entries: &[E],
    base: &str,
) -> PortResult<()> {
    let settled = entries.iter().enumerate().all(|(i, entry)| {
        let want = final_name(base, i);
        entry
            .ports()
            .iter()
            .all(|&port| graph.port_name(port) == Some(want.as_str()))
    });
    if settled {
        return Ok(());
    }
    for (i, entry) in entries.iter().enumerate() {
        rename_entry(graph, entry, &format!("{}_tmp_{}", base, i))?;
    }
    for (i, entry) in entries.iter().enumerate() {
        rename_entry(graph, entry, &final_name(base, i))?;
    }
    Ok(())
}

fn final_name(base: &str, index: usize) -> String {
    format!("{} {}", base, index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BankRef;

    fn rig() -> (FlowGraph, BankRef) {
        let mut graph = FlowGraph::new();
        let root = graph.root();
        let op = graph.add_operator(root, "Sink").unwrap();
        (graph, BankRef::OpInputs(op))
    }

    fn plan(min: usize) -> GrowthPlan {
        GrowthPlan {
            base: "in".to_string(),
            min,
            width: 1,
            push_spare: true,
            skip_deletion: false,
            cap: 4096,
        }
    }

    #[test]
    fn test_update_keeps_first_free_and_retires_rest() {
        let (mut graph, bank) = rig();
        let mut entries = Vec::new();
        let mut running_id = 0;
        let mut create = |g: &mut FlowGraph, name: &str| g.create_port(bank, name);

        for _ in 0..3 {
            create_entry(&mut graph, &mut entries, &mut running_id, &plan(0), &mut create)
                .unwrap();
        }
        update(&mut graph, &mut entries, &mut running_id, &plan(0), &mut create).unwrap();

        // All three were free: one spare survives.
        assert_eq!(entries.len(), 1);
        assert_eq!(graph.port_name(entries[0]), Some("in 1"));
    }

    #[test]
    fn test_update_respects_minimum_floor() {
        let (mut graph, bank) = rig();
        let mut entries = Vec::new();
        let mut running_id = 0;
        let mut create = |g: &mut FlowGraph, name: &str| g.create_port(bank, name);

        update(&mut graph, &mut entries, &mut running_id, &plan(3), &mut create).unwrap();
        assert_eq!(entries.len(), 3);

        // All free, but the minimum keeps them alive.
        update(&mut graph, &mut entries, &mut running_id, &plan(3), &mut create).unwrap();
        assert_eq!(entries.len(), 3);
        let names: Vec<_> = entries
            .iter()
            .map(|&p| graph.port_name(p).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["in 1", "in 2", "in 3"]);
    }

    #[test]
    fn test_create_stops_at_port_budget() {
        let (mut graph, bank) = rig();
        let mut entries = Vec::new();
        let mut running_id = 0;
        let mut create = |g: &mut FlowGraph, name: &str| g.create_port(bank, name);
        let tight = GrowthPlan { cap: 2, ..plan(0) };

        assert!(create_entry(&mut graph, &mut entries, &mut running_id, &tight, &mut create).unwrap());
        assert!(create_entry(&mut graph, &mut entries, &mut running_id, &tight, &mut create).unwrap());
        assert!(!create_entry(&mut graph, &mut entries, &mut running_id, &tight, &mut create).unwrap());
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_create_skips_over_taken_names() {
        let (mut graph, bank) = rig();
        graph.create_port(bank, "in 1").unwrap();

        let mut entries = Vec::new();
        let mut running_id = 0;
        let mut create = |g: &mut FlowGraph, name: &str| g.create_port(bank, name);
        create_entry(&mut graph, &mut entries, &mut running_id, &plan(0), &mut create).unwrap();

        assert_eq!(graph.port_name(entries[0]), Some("in 2"));
        assert_eq!(running_id, 2);
    }

    #[test]
    fn test_fix_names_is_stable_when_settled() {
        let (mut graph, bank) = rig();
        let mut entries = Vec::new();
        let mut running_id = 0;
        let mut create = |g: &mut FlowGraph, name: &str| g.create_port(bank, name);
        for _ in 0..2 {
            create_entry(&mut graph, &mut entries, &mut running_id, &plan(0), &mut create)
                .unwrap();
        }

        fix_names(&mut graph, &entries, "in").unwrap();
        let rx = graph.subscribe();
        fix_names(&mut graph, &entries, "in").unwrap();
        // Nothing to rename the second time, so no rename events either.
        assert!(rx.try_recv().is_err());
    }
}
