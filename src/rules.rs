//! Declarative metadata propagation.
//!
//! Operators register rules instead of writing the metadata pass by hand;
//! [`crate::process`] runs them in registration order each time the pass
//! reaches the operator. Rules read the inferred metadata at their source
//! ports and deliver clones to their targets, so a later re-run always
//! reflects the current wiring. An absent source clears the targets.

use crate::extender::{ExtenderKind, OutputMode, PairRole};
use crate::graph::{ExtenderId, FlowGraph, OperatorId, PortId, UnitId};
use crate::metadata::{CollectionMeta, Metadata, MetadataError};
use crate::process;
use std::mem;
use tracing::warn;

/// Rewrites a clone of the source metadata before delivery.
pub type MetaTransform = Box<dyn Fn(Box<dyn Metadata>) -> Box<dyn Metadata> + Send + Sync>;

/// Combines the metadata of several source ports into one.
pub type MetaMerge = Box<dyn Fn(&[Option<&dyn Metadata>]) -> Option<Box<dyn Metadata>> + Send + Sync>;

/// One metadata propagation step owned by an operator.
pub enum MetadataRule {
    /// Copy one port's metadata to another, optionally rewritten.
    PassThrough {
        from: PortId,
        to: PortId,
        transform: Option<MetaTransform>,
    },

    /// Merge several ports' metadata into one target.
    ManyToOne {
        from: Vec<PortId>,
        to: PortId,
        merge: MetaMerge,
    },

    /// Copy one port's metadata to several targets.
    OneToMany { from: PortId, to: Vec<PortId> },

    /// Deliver a fixed template, independent of any input.
    GenerateNew {
        to: PortId,
        template: Box<dyn Metadata>,
    },

    /// Propagate across every managed pair of a port group, following the
    /// group's kind: plain pairs copy, collecting pairs wrap the element
    /// in a collection, multi groups copy the primary to every companion.
    ExtenderPassThrough { extender: ExtenderId },

    /// Descend into a subprocess unit mid-pass, after the rules before
    /// this one have seeded its inner sources.
    Subprocess { unit: UnitId },

    /// Escape hatch for propagation the builtin shapes cannot express.
    Custom(Box<dyn Fn(&mut FlowGraph, OperatorId) + Send + Sync>),
}

impl MetadataRule {
    pub fn pass_through(from: PortId, to: PortId) -> Self {
        MetadataRule::PassThrough {
            from,
            to,
            transform: None,
        }
    }

    pub fn pass_through_with(
        from: PortId,
        to: PortId,
        transform: impl Fn(Box<dyn Metadata>) -> Box<dyn Metadata> + Send + Sync + 'static,
    ) -> Self {
        MetadataRule::PassThrough {
            from,
            to,
            transform: Some(Box::new(transform)),
        }
    }

    pub fn many_to_one(
        from: Vec<PortId>,
        to: PortId,
        merge: impl Fn(&[Option<&dyn Metadata>]) -> Option<Box<dyn Metadata>> + Send + Sync + 'static,
    ) -> Self {
        MetadataRule::ManyToOne {
            from,
            to,
            merge: Box::new(merge),
        }
    }

    /// Merge that picks the first source with metadata.
    pub fn many_to_one_first_available(from: Vec<PortId>, to: PortId) -> Self {
        Self::many_to_one(from, to, |inputs| {
            inputs.iter().copied().flatten().next().map(Metadata::clone_md)
        })
    }

    pub fn one_to_many(from: PortId, to: Vec<PortId>) -> Self {
        MetadataRule::OneToMany { from, to }
    }

    pub fn generate_new(to: PortId, template: Box<dyn Metadata>) -> Self {
        MetadataRule::GenerateNew { to, template }
    }

    pub fn extender_pass_through(extender: ExtenderId) -> Self {
        MetadataRule::ExtenderPassThrough { extender }
    }

    pub fn subprocess(unit: UnitId) -> Self {
        MetadataRule::Subprocess { unit }
    }

    pub fn custom(f: impl Fn(&mut FlowGraph, OperatorId) + Send + Sync + 'static) -> Self {
        MetadataRule::Custom(Box::new(f))
    }

    /// Run this rule. Returns how many nested operators were visited for
    /// subprocess descents, zero otherwise.
    pub(crate) fn apply(&self, graph: &mut FlowGraph, op: OperatorId) -> usize {
        match self {
            MetadataRule::PassThrough {
                from,
                to,
                transform,
            } => {
                let md = graph.inferred_metadata(*from).map(Metadata::clone_md);
                let md = match (md, transform) {
                    (Some(md), Some(rewrite)) => Some(rewrite(md)),
                    (md, _) => md,
                };
                deliver_or_warn(graph, *to, md);
                0
            }
            MetadataRule::ManyToOne { from, to, merge } => {
                let owned: Vec<Option<Box<dyn Metadata>>> = from
                    .iter()
                    .map(|&p| graph.inferred_metadata(p).map(Metadata::clone_md))
                    .collect();
                let views: Vec<Option<&dyn Metadata>> =
                    owned.iter().map(|m| m.as_deref()).collect();
                let merged = merge(&views);
                deliver_or_warn(graph, *to, merged);
                0
            }
            MetadataRule::OneToMany { from, to } => {
                for &target in to {
                    let md = graph.inferred_metadata(*from).map(Metadata::clone_md);
                    deliver_or_warn(graph, target, md);
                }
                0
            }
            MetadataRule::GenerateNew { to, template } => {
                deliver_or_warn(graph, *to, Some(template.clone_md()));
                0
            }
            MetadataRule::ExtenderPassThrough { extender } => {
                apply_extender_rule(graph, *extender);
                0
            }
            MetadataRule::Subprocess { unit } => process::infer_unit(graph, *unit),
            MetadataRule::Custom(f) => {
                f(graph, op);
                0
            }
        }
    }
}

/// Run every rule of an operator in registration order.
///
/// Rules are taken out of the slot while they run, so a rule is free to
/// mutate the graph; rules another party registers mid-pass land after the
/// existing ones.
pub(crate) fn apply_operator_rules(graph: &mut FlowGraph, op: OperatorId) -> usize {
    let Some(slot) = graph.operator_mut(op) else {
        return 0;
    };
    let rules = mem::take(&mut slot.rules);
    let mut visited = 0;
    for rule in &rules {
        visited += rule.apply(graph, op);
    }
    if let Some(slot) = graph.operator_mut(op) {
        let added = mem::replace(&mut slot.rules, rules);
        slot.rules.extend(added);
    }
    visited
}

fn deliver_or_warn(graph: &mut FlowGraph, port: PortId, md: Option<Box<dyn Metadata>>) {
    if let Err(err) = graph.deliver_metadata(port, md) {
        warn!(%err, "Metadata rule delivery failed");
    }
}

fn apply_extender_rule(graph: &mut FlowGraph, id: ExtenderId) {
    let Some(slot) = graph.extender(id) else {
        return;
    };
    enum Plan {
        Pairs {
            pairs: Vec<(PortId, PortId)>,
            dummy: bool,
            base: String,
        },
        Collect {
            pairs: Vec<(PortId, PortId)>,
            mode: OutputMode,
        },
        Groups(Vec<(PortId, Vec<PortId>)>),
        Nothing,
    }
    let plan = match &slot.kind {
        ExtenderKind::Pair { role, .. } => Plan::Pairs {
            pairs: slot.managed_pairs(),
            dummy: *role == PairRole::Dummy,
            base: slot.base_name().to_string(),
        },
        ExtenderKind::Collecting { mode, .. } => Plan::Collect {
            pairs: slot.managed_pairs(),
            mode: *mode,
        },
        ExtenderKind::Multi { .. } => Plan::Groups(slot.managed_groups()),
        ExtenderKind::Single { .. } => Plan::Nothing,
    };

    match plan {
        Plan::Pairs { pairs, dummy, base } => {
            for &(input, output) in &pairs {
                let md = graph.inferred_metadata(input).map(Metadata::clone_md);
                deliver_or_warn(graph, output, md);
            }
            let any_wired = pairs
                .iter()
                .any(|&(i, o)| graph.is_connected(i) || graph.is_connected(o));
            if dummy && !any_wired {
                if let Some(&(first, _)) = pairs.first() {
                    let _ = graph.add_error(
                        first,
                        MetadataError::warning(format!(
                            "Port group '{}' has no connected pair; execution \
                             order is undefined without one",
                            base
                        )),
                    );
                }
            }
        }
        Plan::Collect { pairs, mode } => {
            for (input, output) in pairs {
                let md = graph.inferred_metadata(input).map(Metadata::clone_md);
                let md = match (mode, md) {
                    (OutputMode::Collecting, Some(element)) => {
                        Some(Box::new(CollectionMeta::new(Some(element))) as Box<dyn Metadata>)
                    }
                    (OutputMode::Collecting, None) => None,
                    (OutputMode::Iterating, md) => md,
                };
                deliver_or_warn(graph, output, md);
            }
        }
        Plan::Groups(groups) => {
            for (primary, fanout) in groups {
                for target in fanout {
                    let md = graph.inferred_metadata(primary).map(Metadata::clone_md);
                    deliver_or_warn(graph, target, md);
                }
            }
        }
        Plan::Nothing => {}
    }
}
