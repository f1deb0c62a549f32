//! Runtime payload contracts for the data pass.
//!
//! The graph never looks inside a payload; it stores [`Packet`]s (payload
//! plus provenance stamp) and hands typed views out through one tagged
//! fetch at the operator boundary, [`TypedData`], instead of scattering
//! downcasts through operator code.

use crate::error::DataError;
use crate::provenance::PortRef;
use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

/// A value flowing through the graph at execution time.
///
/// Implementations live with the host. `convert_to` is an optional
/// self-conversion hook consulted by the typed fetch when the stored kind
/// differs from the requested one.
pub trait Payload: fmt::Debug + Send + Sync + 'static {
    /// Short kind label, e.g. `"table"`.
    fn kind(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Produce an equivalent value of the `target` type, if this payload
    /// knows how. The returned box must downcast to the target.
    fn convert_to(&self, target: TypeId) -> Option<Box<dyn Any>> {
        let _ = target;
        None
    }
}

/// Delivery carrier: the payload plus the identity of the output port that
/// delivered it. The stamp survives serialization boundaries because it is
/// names, not object references.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Arc<dyn Payload>,
    pub source: Option<PortRef>,
}

impl Packet {
    pub fn new(payload: Arc<dyn Payload>) -> Self {
        Self {
            payload,
            source: None,
        }
    }

    pub fn with_source(payload: Arc<dyn Payload>, source: PortRef) -> Self {
        Self {
            payload,
            source: Some(source),
        }
    }
}

/// Ordered group of payloads, typically accumulated from loop iterations.
#[derive(Debug, Default)]
pub struct PayloadCollection {
    items: Vec<Arc<dyn Payload>>,
}

impl PayloadCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<Arc<dyn Payload>>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, item: Arc<dyn Payload>) {
        self.items.push(item);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Payload>> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Payload>> {
        self.items.iter()
    }
}

impl Payload for PayloadCollection {
    fn kind(&self) -> &'static str {
        "collection"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Outcome of a typed data fetch at the operator boundary.
///
/// The check runs once per fetch; operator code matches on the tag instead
/// of performing its own runtime casts.
#[derive(Debug)]
pub enum TypedData<'a, T> {
    /// Stored payload already has the requested type.
    Ok(&'a T),
    /// Stored payload converted itself to the requested type.
    Converted(Box<T>),
    /// Stored payload has an unrelated kind and offers no conversion.
    Incompatible {
        requested: &'static str,
        found: &'static str,
    },
    /// The payload advertised a conversion but produced the wrong type.
    NotConvertible { requested: &'static str },
    /// Nothing has been delivered to the port.
    Missing,
}

impl<'a, T> TypedData<'a, T> {
    /// The typed value, if the fetch succeeded either way.
    pub fn get(&self) -> Option<&T> {
        match self {
            TypedData::Ok(value) => Some(value),
            TypedData::Converted(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, TypedData::Ok(_) | TypedData::Converted(_))
    }

    /// Map the failure tags onto [`DataError`] for phase-2 operator code.
    pub fn required(self, port: &str) -> Result<Fetched<'a, T>, DataError> {
        match self {
            TypedData::Ok(value) => Ok(Fetched::Borrowed(value)),
            TypedData::Converted(value) => Ok(Fetched::Owned(value)),
            TypedData::Incompatible { requested, found } => Err(DataError::WrongKind {
                port: port.to_string(),
                requested,
                found,
            }),
            TypedData::NotConvertible { requested } => Err(DataError::NotConvertible {
                port: port.to_string(),
                requested,
            }),
            TypedData::Missing => Err(DataError::Missing {
                port: port.to_string(),
            }),
        }
    }
}

/// A successfully fetched payload, borrowed from the port or owned by a
/// conversion. Derefs to the target type either way.
#[derive(Debug)]
pub enum Fetched<'a, T> {
    Borrowed(&'a T),
    Owned(Box<T>),
}

impl<T> Deref for Fetched<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Fetched::Borrowed(value) => value,
            Fetched::Owned(value) => value,
        }
    }
}

/// Run the tagged fetch against a stored payload.
pub(crate) fn fetch_typed<T: Payload>(payload: Option<&Arc<dyn Payload>>) -> TypedData<'_, T> {
    let requested = std::any::type_name::<T>();
    let Some(payload) = payload else {
        return TypedData::Missing;
    };
    if let Some(typed) = payload.as_any().downcast_ref::<T>() {
        return TypedData::Ok(typed);
    }
    match payload.convert_to(TypeId::of::<T>()) {
        None => TypedData::Incompatible {
            requested,
            found: payload.kind(),
        },
        Some(converted) => match converted.downcast::<T>() {
            Ok(value) => TypedData::Converted(value),
            Err(_) => {
                warn!(
                    kind = payload.kind(),
                    requested, "Payload conversion hook produced the wrong type"
                );
                TypedData::NotConvertible { requested }
            }
        },
    }
}
