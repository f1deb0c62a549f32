//! Structural metadata contracts for the dry-run pass.
//!
//! Before any data flows, producers describe what they *will* deliver as a
//! [`Metadata`] value and the graph propagates those descriptions consumer-
//! ward. Consumers state their requirements as [`Precondition`]s; mismatches
//! become accumulated [`MetadataError`]s instead of runtime failures.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// How strictly [`Metadata::is_compatible`] treats missing detail.
///
/// `Strict` demands the description prove it satisfies the requirement;
/// `Relaxed` gives unknown or underspecified descriptions the benefit of
/// the doubt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatLevel {
    #[default]
    Strict,
    Relaxed,
}

/// Description of the value a port will carry at execution time.
///
/// Implementations live with the host; the graph only clones, compares and
/// forwards them. Cloning happens before every transformation so a
/// producer's own state is never aliased into a consumer's port.
pub trait Metadata: fmt::Debug + Send + Sync {
    /// Short kind label, e.g. `"table"` or `"model"`.
    fn kind(&self) -> &'static str;

    /// Deep copy.
    fn clone_md(&self) -> Box<dyn Metadata>;

    /// Whether a value described by `self` would satisfy `requirement`.
    ///
    /// The default compares kind labels and ignores the level; hosts with
    /// richer descriptions override this.
    fn is_compatible(&self, requirement: &dyn Metadata, level: CompatLevel) -> bool {
        let _ = level;
        self.kind() == requirement.kind()
    }

    /// One-line description used in diagnostics.
    fn description(&self) -> String {
        self.kind().to_string()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Metadata for "a collection of X", produced by collecting extenders.
///
/// Wraps the element description; `element` is `None` when the elements are
/// unknown (e.g. an empty loop).
#[derive(Debug, Default)]
pub struct CollectionMeta {
    element: Option<Box<dyn Metadata>>,
}

impl CollectionMeta {
    pub fn new(element: Option<Box<dyn Metadata>>) -> Self {
        Self { element }
    }

    pub fn element(&self) -> Option<&dyn Metadata> {
        self.element.as_deref()
    }
}

impl Metadata for CollectionMeta {
    fn kind(&self) -> &'static str {
        "collection"
    }

    fn clone_md(&self) -> Box<dyn Metadata> {
        Box::new(Self {
            element: self.element.as_ref().map(|e| e.clone_md()),
        })
    }

    fn is_compatible(&self, requirement: &dyn Metadata, level: CompatLevel) -> bool {
        let Some(req) = requirement.as_any().downcast_ref::<CollectionMeta>() else {
            return false;
        };
        match (self.element.as_deref(), req.element.as_deref()) {
            (_, None) => true,
            (Some(mine), Some(theirs)) => mine.is_compatible(theirs, level),
            (None, Some(_)) => level == CompatLevel::Relaxed,
        }
    }

    fn description(&self) -> String {
        match &self.element {
            Some(e) => format!("collection of {}", e.description()),
            None => "collection".to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Diagnostic severity. `Error` blocks the data pass graph-wide, `Warning`
/// is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A suggested remedy attached to a diagnostic. Higher rating sorts first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFix {
    pub label: String,
    pub rating: i32,
}

impl QuickFix {
    pub fn new(label: impl Into<String>, rating: i32) -> Self {
        Self {
            label: label.into(),
            rating,
        }
    }
}

/// A per-port diagnostic accumulated during the metadata pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataError {
    pub severity: Severity,
    pub message: String,
    pub fixes: Vec<QuickFix>,
}

impl MetadataError {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            fixes: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            fixes: Vec::new(),
        }
    }

    pub fn with_fix(mut self, fix: QuickFix) -> Self {
        self.fixes.push(fix);
        self
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: {}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// An input port's requirement, checked against the propagated metadata
/// during the dry-run pass.
pub trait Precondition: Send + Sync {
    /// Check the metadata present at the port (`None` if nothing arrived)
    /// and return any diagnostics.
    fn check(&self, metadata: Option<&dyn Metadata>) -> Vec<MetadataError>;

    /// What the consumer expects, for messages.
    fn description(&self) -> String;
}

/// The stock precondition: expects metadata compatible with a template.
///
/// A mandatory precondition reports an Error when nothing is connected or
/// the description is incompatible; an optional one stays quiet on absence.
pub struct SimplePrecondition {
    expected: Box<dyn Metadata>,
    optional: bool,
    level: CompatLevel,
}

impl SimplePrecondition {
    pub fn mandatory(expected: Box<dyn Metadata>) -> Self {
        Self {
            expected,
            optional: false,
            level: CompatLevel::default(),
        }
    }

    pub fn optional(expected: Box<dyn Metadata>) -> Self {
        Self {
            expected,
            optional: true,
            level: CompatLevel::default(),
        }
    }

    pub fn with_level(mut self, level: CompatLevel) -> Self {
        self.level = level;
        self
    }
}

impl Precondition for SimplePrecondition {
    fn check(&self, metadata: Option<&dyn Metadata>) -> Vec<MetadataError> {
        match metadata {
            None => {
                if self.optional {
                    Vec::new()
                } else {
                    vec![MetadataError::error(format!(
                        "expects {} but nothing is connected",
                        self.expected.description()
                    ))
                    .with_fix(QuickFix::new(
                        format!("Connect a {} producer", self.expected.kind()),
                        5,
                    ))]
                }
            }
            Some(md) => {
                if md.is_compatible(self.expected.as_ref(), self.level) {
                    Vec::new()
                } else {
                    vec![MetadataError::error(format!(
                        "expects {} but would receive {}",
                        self.expected.description(),
                        md.description()
                    ))]
                }
            }
        }
    }

    fn description(&self) -> String {
        self.expected.description()
    }
}
