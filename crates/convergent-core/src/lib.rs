//! Convergent document engine: a leaderless, operation-based CRDT with
//! causal-horizon informed removal, deterministic materialization, and two
//! schema instantiations (task-graph and inventory).

pub mod doctor;
pub mod ffi;
pub mod flow;
pub mod horizon;
pub mod log_store;
pub mod materialize;
pub mod operation;
pub mod schema;
pub mod value;

pub use doctor::{diagnose, Issue, IssueKind};
pub use flow::{DripSchema, FlowError, FlowHandle, FlowRegistry};
pub use horizon::{DeviceId, Horizon, LogicalClock};
pub use log_store::{AppendOutcome, LogStore, LogStoreError};
pub use materialize::{materialize, DocumentState, Existence, Item};
pub use operation::{Envelope, ItemId, OpId, Operation, UnknownOpKind};
pub use schema::{DocumentSchema, FieldSpec, ItemTypeSpec, SetSpec, ValidationIssue, ValidationKind};
pub use value::{MalformedValue, Value};
