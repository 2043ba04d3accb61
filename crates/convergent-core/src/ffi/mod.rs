//! C FFI surface: the lifecycle and sync functions shared by both
//! schema instantiations. Follows the null/error-code conventions used
//! throughout this module (`ffi/inventory_flow.rs`, `ffi/giantt_flow.rs`),
//! unified over one schema-neutral `FlowRegistry` instead of one registry
//! per schema.

pub mod giantt_flow;
pub mod inventory_flow;

use crate::flow::FlowRegistry;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::RwLock;

static REGISTRY: RwLock<Option<FlowRegistry>> = RwLock::new(None);

fn with_registry<T>(f: impl FnOnce(&FlowRegistry) -> Option<T>) -> Option<T> {
    let guard = REGISTRY.read().ok()?;
    let registry = guard.as_ref()?;
    f(registry)
}

fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(str::to_string) }
}

fn string_to_cstring(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Initialize the flow system with a device identity. Must precede any
/// other `convergent_*` call. Returns 0 on success, -1 on error.
#[no_mangle]
pub extern "C" fn convergent_init(device_id_ptr: *const c_char) -> i32 {
    let Some(device_id) = cstr_to_string(device_id_ptr) else {
        return -1;
    };
    let Ok(mut guard) = REGISTRY.write() else {
        return -1;
    };
    *guard = Some(FlowRegistry::init(device_id));
    0
}

/// Initialize the flow system with a device identity and an on-disk
/// directory for persistent (non-`test-`-prefixed) flows.
#[no_mangle]
pub extern "C" fn convergent_init_with_data_dir(
    device_id_ptr: *const c_char,
    data_dir_ptr: *const c_char,
) -> i32 {
    let (Some(device_id), Some(data_dir)) =
        (cstr_to_string(device_id_ptr), cstr_to_string(data_dir_ptr))
    else {
        return -1;
    };
    let Ok(mut guard) = REGISTRY.write() else {
        return -1;
    };
    *guard = Some(FlowRegistry::init_with_data_dir(device_id, data_dir));
    0
}

/// Open (or re-open) a flow by UUID. Returns 0 on success, -1 on error.
#[no_mangle]
pub extern "C" fn convergent_open(uuid_ptr: *const c_char) -> i32 {
    let Some(uuid) = cstr_to_string(uuid_ptr) else {
        return -1;
    };
    with_registry(|r| r.open(&uuid).ok()).map(|_| 0).unwrap_or(-1)
}

/// Write a single JSON-encoded `Operation` as a local op. Returns 0 on
/// success, -1 on error (unknown handle, malformed JSON).
#[no_mangle]
pub extern "C" fn convergent_write_op(uuid_ptr: *const c_char, op_json_ptr: *const c_char) -> i32 {
    let (Some(uuid), Some(op_json)) = (cstr_to_string(uuid_ptr), cstr_to_string(op_json_ptr)) else {
        return -1;
    };
    let op = match serde_json::from_str(&op_json) {
        Ok(op) => op,
        Err(e) => {
            log::warn!("convergent_write_op: malformed operation JSON: {}", e);
            return -1;
        }
    };
    let timestamp = current_timestamp();
    with_registry(|r| r.write_local(&uuid, op, timestamp).ok())
        .map(|_| 0)
        .unwrap_or(-1)
}

/// Return every envelope in the flow's log as a JSON array. Caller must
/// free with `convergent_free_string`. Null on error.
#[no_mangle]
pub extern "C" fn convergent_get_operations(uuid_ptr: *const c_char) -> *mut c_char {
    let Some(uuid) = cstr_to_string(uuid_ptr) else {
        return std::ptr::null_mut();
    };
    let envs = with_registry(|r| r.get_operations(&uuid).ok());
    match envs.and_then(|e| serde_json::to_string(&e).ok()) {
        Some(json) => string_to_cstring(json),
        None => std::ptr::null_mut(),
    }
}

/// Apply a JSON array of remote envelopes. Returns the number newly
/// appended, or -1 on error.
#[no_mangle]
pub extern "C" fn convergent_apply_remote(uuid_ptr: *const c_char, envelopes_json_ptr: *const c_char) -> i32 {
    let (Some(uuid), Some(json)) = (cstr_to_string(uuid_ptr), cstr_to_string(envelopes_json_ptr)) else {
        return -1;
    };
    let envelopes = match serde_json::from_str(&json) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("convergent_apply_remote: malformed envelope batch: {}", e);
            return -1;
        }
    };
    with_registry(|r| r.apply_remote(&uuid, envelopes).ok())
        .map(|n| n as i32)
        .unwrap_or(-1)
}

/// Run the Doctor over the flow's materialized state, returning a JSON
/// array of issues. Null on error.
#[no_mangle]
pub extern "C" fn convergent_doctor(uuid_ptr: *const c_char) -> *mut c_char {
    let Some(uuid) = cstr_to_string(uuid_ptr) else {
        return std::ptr::null_mut();
    };
    let issues = with_registry(|r| r.run_doctor(&uuid).ok());
    let Some(issues) = issues else {
        return std::ptr::null_mut();
    };
    let json: Vec<serde_json::Value> = issues
        .iter()
        .map(|i| {
            serde_json::json!({
                "kind": format!("{:?}", i.kind),
                "item_id": i.item_id,
                "related_ids": i.related_ids,
                "message": i.message,
                "suggested_fix": i.suggested_fix,
            })
        })
        .collect();
    string_to_cstring(serde_json::to_string(&json).unwrap_or_default())
}

#[no_mangle]
pub extern "C" fn convergent_close(uuid_ptr: *const c_char) {
    if let Some(uuid) = cstr_to_string(uuid_ptr) {
        with_registry(|r| Some(r.close(&uuid)));
    }
}

#[no_mangle]
pub extern "C" fn convergent_cleanup() {
    if let Ok(guard) = REGISTRY.read() {
        if let Some(registry) = guard.as_ref() {
            registry.cleanup();
        }
    }
}

/// Free a string returned by any `convergent_*` function.
#[no_mangle]
pub extern "C" fn convergent_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
