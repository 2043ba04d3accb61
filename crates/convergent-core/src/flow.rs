//! The flow registry: per-document lifecycle, local authorship, sync, and
//! cached materialization, shared across both schemas and backed by the
//! true append-only `LogStore`.

use crate::doctor::{self, Issue};
use crate::horizon::{DeviceId, Horizon, LogicalClock};
use crate::log_store::{AppendOutcome, LogStore, LogStoreError};
use crate::materialize::{materialize, DocumentState};
use crate::operation::{Envelope, Operation, OpId};
use crate::schema::{giantt, inventory};
use crate::value::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Which schema's text/JSON projection `FlowRegistry::read_drip` should
/// render. Giantt renders to `.giantt` text, Inventory to a JSON object —
/// the two shapes don't share a representation, so the caller picks one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DripSchema {
    Giantt,
    Inventory,
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("flow {0} is closed")]
    FlowClosed(String),
    #[error("I/O failure: {0}")]
    IoFailure(#[from] LogStoreError),
    #[error("malformed envelope batch: {0}")]
    SchemaViolation(String),
}

struct Flow {
    store: LogStore,
    device_id: DeviceId,
    clock: Mutex<LogicalClock>,
    horizon: Mutex<Horizon>,
    cache: Mutex<Option<(usize, DocumentState)>>,
}

impl Flow {
    fn new(store: LogStore, device_id: DeviceId) -> Self {
        let mut horizon = Horizon::new();
        horizon.observe_all(store.envelopes().iter().map(|e| (e.author.as_str(), e.clock)));
        let clock = horizon.get(&device_id);
        Self {
            store,
            device_id,
            clock: Mutex::new(clock),
            horizon: Mutex::new(horizon),
            cache: Mutex::new(None),
        }
    }

    fn next_clock(&self) -> LogicalClock {
        let mut c = self.clock.lock().unwrap();
        *c += 1;
        *c
    }

    fn author(&self, op: Operation, timestamp: u64) -> Envelope {
        let clock = self.next_clock();
        let horizon = self.horizon.lock().unwrap().clone();
        let env = Envelope::author_local(op, self.device_id.clone(), clock, timestamp, horizon);
        self.horizon.lock().unwrap().observe(&env.author, env.clock);
        env
    }

    fn state(&self) -> DocumentState {
        let mut cache = self.cache.lock().unwrap();
        let len = self.store.len();
        if let Some((cached_len, state)) = cache.as_ref() {
            if *cached_len == len {
                return state.clone();
            }
        }
        let envs = self.store.envelopes();
        let state = materialize(envs.iter());
        *cache = Some((len, state.clone()));
        state
    }

    /// For a `RemoveFromSet` whose `observed_add_ids` is empty, fill it in
    /// with every currently-live `AddToSet` op id for that element, so
    /// callers need not track add ids themselves.
    fn autofill_remove_from_set(&self, op: Operation) -> Operation {
        match op {
            Operation::RemoveFromSet {
                item_id,
                set_name,
                element,
                observed_add_ids,
            } if observed_add_ids.is_empty() => {
                let add_ids = self.add_ids_for_element(&item_id, &set_name, &element);
                Operation::remove_from_set(item_id, set_name, element, add_ids)
            }
            other => other,
        }
    }

    fn add_ids_for_element(&self, item_id: &str, set_name: &str, element: &Value) -> Vec<OpId> {
        let envs = self.store.envelopes();
        envs.iter()
            .filter_map(|e| match &e.op {
                Operation::AddToSet {
                    item_id: id,
                    set_name: name,
                    element: el,
                } if id == item_id && name == set_name && el == element => Some(e.op_id),
                _ => None,
            })
            .collect()
    }
}

/// Opaque handle to an open flow. Stable for the life of the registry's
/// `open` call; becomes invalid after `close`.
pub type FlowHandle = String;

/// The flow registry: owns every open flow for one device identity, not
/// tied to either schema (schemas interpret the `DocumentState` the
/// registry hands back, they don't own storage).
pub struct FlowRegistry {
    device_id: DeviceId,
    data_dir: Option<PathBuf>,
    flows: RwLock<HashMap<FlowHandle, Flow>>,
}

impl FlowRegistry {
    pub fn init(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            data_dir: None,
            flows: RwLock::new(HashMap::new()),
        }
    }

    pub fn init_with_data_dir(device_id: impl Into<DeviceId>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            data_dir: Some(data_dir.into()),
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Open (creating if absent) the flow identified by `uuid`. A `uuid`
    /// starting with `test-` is always in-memory, for cheap, disposable
    /// test flows.
    pub fn open(&self, uuid: &str) -> Result<FlowHandle, FlowError> {
        let mut flows = self.flows.write().unwrap();
        if flows.contains_key(uuid) {
            return Ok(uuid.to_string());
        }
        let store = match &self.data_dir {
            Some(dir) if !uuid.starts_with("test-") => {
                std::fs::create_dir_all(dir).map_err(LogStoreError::from)?;
                LogStore::open(dir.join(format!("{}.ndjson", uuid)))?
            }
            _ => LogStore::in_memory(),
        };
        flows.insert(uuid.to_string(), Flow::new(store, self.device_id.clone()));
        Ok(uuid.to_string())
    }

    fn with_flow<T>(&self, handle: &str, f: impl FnOnce(&Flow) -> T) -> Result<T, FlowError> {
        let flows = self.flows.read().unwrap();
        let flow = flows
            .get(handle)
            .ok_or_else(|| FlowError::FlowClosed(handle.to_string()))?;
        Ok(f(flow))
    }

    /// Author and append a local operation, stamping clock/horizon/timestamp.
    pub fn write_local(&self, handle: &str, op: Operation, timestamp: u64) -> Result<Envelope, FlowError> {
        self.with_flow(handle, |flow| {
            let op = flow.autofill_remove_from_set(op);
            let env = flow.author(op, timestamp);
            flow.store.append(env.clone())?;
            Ok(env)
        })?
    }

    /// Author and append several local operations as one causal step (the
    /// bidirectional relation builders in `schema::giantt` return more than
    /// one `Operation` per call).
    pub fn write_local_batch(
        &self,
        handle: &str,
        ops: Vec<Operation>,
        timestamp: u64,
    ) -> Result<Vec<Envelope>, FlowError> {
        ops.into_iter()
            .map(|op| self.write_local(handle, op, timestamp))
            .collect()
    }

    pub fn get_operations(&self, handle: &str) -> Result<Vec<Envelope>, FlowError> {
        self.with_flow(handle, |flow| flow.store.envelopes())
    }

    /// Ingest a batch of remote envelopes, returning how many were new.
    pub fn apply_remote(&self, handle: &str, envelopes: Vec<Envelope>) -> Result<usize, FlowError> {
        self.with_flow(handle, |flow| -> Result<usize, FlowError> {
            let mut horizon = flow.horizon.lock().unwrap();
            let mut applied = 0;
            for env in envelopes {
                horizon.observe(&env.author, env.clock);
                if flow.store.append(env)? == AppendOutcome::Appended {
                    applied += 1;
                }
            }
            Ok(applied)
        })?
    }

    pub fn read_materialized(&self, handle: &str) -> Result<DocumentState, FlowError> {
        self.with_flow(handle, |flow| flow.state())
    }

    pub fn run_doctor(&self, handle: &str) -> Result<Vec<Issue>, FlowError> {
        Ok(doctor::diagnose(&self.read_materialized(handle)?))
    }

    /// Materialize the flow and render it through `schema`'s projection —
    /// the `.giantt` text grammar or the inventory JSON object. The FFI
    /// boundary and the CLI both call through this rather than each
    /// reimplementing the projection.
    pub fn read_drip(&self, handle: &str, schema: DripSchema) -> Result<String, FlowError> {
        let state = self.read_materialized(handle)?;
        Ok(match schema {
            DripSchema::Giantt => giantt::render_drip(&state),
            DripSchema::Inventory => inventory::render_drip(&state),
        })
    }

    pub fn close(&self, handle: &str) -> bool {
        self.flows.write().unwrap().remove(handle).is_some()
    }

    pub fn cleanup(&self) {
        self.flows.write().unwrap().clear();
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }
}
