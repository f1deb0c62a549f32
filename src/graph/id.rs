//! Identity types for the flow graph.
//!
//! All IDs are newtypes over `u64` packing a slot index (low 32 bits) and a
//! generation counter (high 32 bits). The index gives O(1) lookup into the
//! owning arena; the generation detects handles that outlived their slot.
//! Ports in particular are retired and recreated constantly by extender
//! growth, so a stale handle must miss instead of aliasing a reused slot.

use serde::Serialize;
use std::fmt;

const INDEX_BITS: u64 = 32;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Handle to a port slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortId(pub u64);

impl PortId {
    pub const INVALID: PortId = PortId(u64::MAX);

    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << INDEX_BITS) | index as u64)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PortId(INVALID)")
        } else {
            write!(f, "PortId(idx={}, gen={})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle to an operator slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OperatorId(pub u64);

impl OperatorId {
    pub const INVALID: OperatorId = OperatorId(u64::MAX);

    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << INDEX_BITS) | index as u64)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }
}

impl Default for OperatorId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "OperatorId(INVALID)")
        } else {
            write!(
                f,
                "OperatorId(idx={}, gen={})",
                self.index(),
                self.generation()
            )
        }
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle to a subprocess unit slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UnitId(pub u64);

impl UnitId {
    pub const INVALID: UnitId = UnitId(u64::MAX);

    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << INDEX_BITS) | index as u64)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "UnitId(INVALID)")
        } else {
            write!(f, "UnitId(idx={}, gen={})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle to an extender slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExtenderId(pub u64);

impl ExtenderId {
    pub const INVALID: ExtenderId = ExtenderId(u64::MAX);

    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << INDEX_BITS) | index as u64)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }
}

impl Default for ExtenderId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ExtenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ExtenderId(INVALID)")
        } else {
            write!(
                f,
                "ExtenderId(idx={}, gen={})",
                self.index(),
                self.generation()
            )
        }
    }
}

/// Common surface of the generational handles, used by [`super::arena::Arena`]
/// to mint and check ids without knowing the concrete newtype.
pub(crate) trait ArenaKey: Copy + fmt::Debug {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn is_valid(self) -> bool;
    fn index(self) -> usize;
    fn generation(self) -> u32;
}

macro_rules! impl_arena_key {
    ($($ty:ty),*) => {
        $(impl ArenaKey for $ty {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                Self::new(index, generation)
            }
            #[inline]
            fn is_valid(self) -> bool {
                <$ty>::is_valid(self)
            }
            #[inline]
            fn index(self) -> usize {
                <$ty>::index(self)
            }
            #[inline]
            fn generation(self) -> u32 {
                <$ty>::generation(self)
            }
        })*
    };
}

impl_arena_key!(PortId, OperatorId, UnitId, ExtenderId);
