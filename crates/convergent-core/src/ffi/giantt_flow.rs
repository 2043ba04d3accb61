//! Giantt-specific FFI: the task-graph text dump. Lifecycle, write and
//! sync calls are schema-neutral and live in `ffi::mod`; this module only
//! adds the one operation whose output format genuinely differs per
//! schema.

use super::{cstr_to_string, string_to_cstring, with_registry};
use crate::flow::DripSchema;
use std::os::raw::c_char;

/// Materialize the flow and render every live `GianttItem` as a sorted
/// `.giantt`-format text block, one line per item. Caller must free with
/// `convergent_free_string`. Null on error. A thin wrapper over
/// `FlowRegistry::read_drip` — the projection logic itself lives there.
#[no_mangle]
pub extern "C" fn convergent_giantt_read_drip(uuid_ptr: *const c_char) -> *mut c_char {
    let Some(uuid) = cstr_to_string(uuid_ptr) else {
        return std::ptr::null_mut();
    };
    match with_registry(|r| r.read_drip(&uuid, DripSchema::Giantt).ok()) {
        Some(text) => string_to_cstring(text),
        None => std::ptr::null_mut(),
    }
}
