//! Per-port state for the flow graph.
//!
//! A port is a slot in the port arena; wiring, delivery and clearing all go
//! through [`crate::graph::FlowGraph`] so containers and extenders stay
//! consistent. The slot itself is dumb state plus a few queries.

use crate::graph::bank::BankRef;
use crate::graph::id::PortId;
use crate::metadata::{Metadata, MetadataError, Precondition};
use crate::payload::Packet;
use crate::provenance::PortRef;
use serde::Serialize;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Whether a port consumes or produces.
///
/// A subprocess unit's inner sources count as outputs (they feed member
/// inputs) and its inner sinks as inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// Bitmask selecting which port state a clear pass resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFlags(pub u8);

impl ClearFlags {
    /// Accumulated metadata diagnostics.
    pub const META_ERRORS: ClearFlags = ClearFlags(1);
    /// The inferred (dry-run) metadata slot.
    pub const METADATA: ClearFlags = ClearFlags(1 << 1);
    /// The delivered payload.
    pub const DATA: ClearFlags = ClearFlags(1 << 2);
    /// Freeform setup notes.
    pub const SIMPLE_ERRORS: ClearFlags = ClearFlags(1 << 3);
    /// The data-derived metadata slot.
    pub const REAL_METADATA: ClearFlags = ClearFlags(1 << 4);
    pub const ALL: ClearFlags = ClearFlags(0b1_1111);

    #[inline]
    pub fn contains(self, other: ClearFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClearFlags {
    type Output = ClearFlags;

    fn bitor(self, rhs: ClearFlags) -> ClearFlags {
        ClearFlags(self.0 | rhs.0)
    }
}

/// A delivered metadata value plus where it came from.
#[derive(Debug)]
pub struct MetaSlot {
    pub value: Arc<dyn Metadata>,
    pub origin: Option<PortRef>,
}

/// State of one port.
pub struct PortSlot {
    pub name: String,
    pub direction: PortDirection,
    /// The container this port lives in, as a value (never a pointer).
    pub bank: BankRef,
    /// The connected counterpart, `PortId::INVALID` when unconnected.
    pub opposite: PortId,
    /// Locked ports are never auto-retired by extender growth.
    pub locked: bool,
    pub packet: Option<Packet>,
    /// Metadata inferred by the dry-run pass.
    pub meta: Option<MetaSlot>,
    /// Metadata derived from real data during execution. Wins over `meta`
    /// while present.
    pub real_meta: Option<MetaSlot>,
    pub errors: Vec<MetadataError>,
    pub simple_errors: Vec<String>,
    /// Requirements checked during the metadata pass (input side).
    pub preconditions: Vec<Box<dyn Precondition>>,
}

impl PortSlot {
    pub(crate) fn new(name: String, direction: PortDirection, bank: BankRef) -> Self {
        Self {
            name,
            direction,
            bank,
            opposite: PortId::INVALID,
            locked: false,
            packet: None,
            meta: None,
            real_meta: None,
            errors: Vec::new(),
            simple_errors: Vec::new(),
            preconditions: Vec::new(),
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.opposite.is_valid()
    }

    /// Free for the purposes of extender growth: neither connected nor
    /// locked.
    #[inline]
    pub fn is_free(&self) -> bool {
        !self.is_connected() && !self.locked
    }

    /// The metadata visible to consumers: data-derived if present, else the
    /// inferred description.
    pub fn metadata(&self) -> Option<&dyn Metadata> {
        self.real_meta
            .as_ref()
            .or(self.meta.as_ref())
            .map(|slot| slot.value.as_ref())
    }

    /// Reset the state selected by `flags`. Idempotent; unrelated state is
    /// untouched.
    pub(crate) fn clear(&mut self, flags: ClearFlags) {
        if flags.contains(ClearFlags::META_ERRORS) {
            self.errors.clear();
        }
        if flags.contains(ClearFlags::METADATA) {
            self.meta = None;
        }
        if flags.contains(ClearFlags::DATA) {
            self.packet = None;
        }
        if flags.contains(ClearFlags::SIMPLE_ERRORS) {
            self.simple_errors.clear();
        }
        if flags.contains(ClearFlags::REAL_METADATA) {
            self.real_meta = None;
        }
    }
}

impl fmt::Debug for PortSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortSlot")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("opposite", &self.opposite)
            .field("locked", &self.locked)
            .field("has_data", &self.packet.is_some())
            .field("errors", &self.errors.len())
            .finish()
    }
}
