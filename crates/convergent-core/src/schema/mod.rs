//! Schema bindings: the task-graph and inventory instantiations of the
//! engine, plus the traits a schema implements to plug into the Doctor.

pub mod giantt;
pub mod inventory;

use crate::materialize::DocumentState;

/// Specification of a scalar field an item type carries.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: true }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: false }
    }
}

/// Specification of a set-valued property an item type carries.
#[derive(Clone, Debug)]
pub struct SetSpec {
    pub name: String,
}

impl SetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub trait ItemTypeSpec: Send + Sync {
    fn type_name(&self) -> &str;
    fn fields(&self) -> Vec<FieldSpec>;
    fn sets(&self) -> Vec<SetSpec>;

    fn has_field(&self, name: &str) -> bool {
        self.fields().iter().any(|f| f.name == name)
    }

    fn has_set(&self, name: &str) -> bool {
        self.sets().iter().any(|s| s.name == name)
    }
}

/// What kind of problem a `ValidationIssue` actually reports, not how
/// urgent it is. The Doctor maps each variant onto its own `IssueKind`
/// one-to-one instead of guessing from a severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationKind {
    /// A set element or relation target names an item id that either never
    /// existed or is no longer live.
    DanglingReference,
    /// The data is internally consistent but forms a cycle a schema's
    /// semantics don't expect (e.g. a `REQUIRES` chain that loops back).
    DependencyCycle,
}

/// A schema-level validation finding, surfaced by the Doctor.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub item_id: Option<String>,
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn dangling_reference(message: impl Into<String>) -> Self {
        Self { item_id: None, kind: ValidationKind::DanglingReference, message: message.into() }
    }

    pub fn dependency_cycle(message: impl Into<String>) -> Self {
        Self { item_id: None, kind: ValidationKind::DependencyCycle, message: message.into() }
    }

    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}

/// A document schema: the recognized item types plus schema-specific
/// validation of a materialized `DocumentState`.
pub trait DocumentSchema {
    fn item_type_spec(&self, type_name: &str) -> Option<Box<dyn ItemTypeSpec>>;
    fn item_types(&self) -> Vec<String>;
    fn validate(&self, state: &DocumentState) -> Vec<ValidationIssue>;
}
