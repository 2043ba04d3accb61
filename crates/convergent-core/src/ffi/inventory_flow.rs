//! Inventory-specific FFI: the JSON state dump. Lifecycle, write and sync
//! calls are schema-neutral and live in `ffi::mod`.

use super::{cstr_to_string, string_to_cstring, with_registry};
use crate::flow::DripSchema;
use std::os::raw::c_char;

/// Materialize the flow and render every live `InventoryItem` as a JSON
/// object keyed by item id. Caller must free with `convergent_free_string`.
/// Null on error. A thin wrapper over `FlowRegistry::read_drip` — the
/// projection logic itself lives there.
#[no_mangle]
pub extern "C" fn convergent_inventory_read_drip(uuid_ptr: *const c_char) -> *mut c_char {
    let Some(uuid) = cstr_to_string(uuid_ptr) else {
        return std::ptr::null_mut();
    };
    match with_registry(|r| r.read_drip(&uuid, DripSchema::Inventory).ok()) {
        Some(text) => string_to_cstring(text),
        None => std::ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{convergent_close, convergent_init, convergent_open, convergent_write_op};
    use super::*;
    use std::ffi::{CStr, CString};

    fn as_ptr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn read_drip_renders_inventory_items_as_json() {
        let device = as_ptr("device-a");
        let uuid = as_ptr("test-inventory-flow");
        unsafe {
            assert_eq!(convergent_init(device.as_ptr()), 0);
            assert_eq!(convergent_open(uuid.as_ptr()), 0);
        }

        let ops = [
            r#"{"AddItem":{"item_id":"widget_1","item_type":"InventoryItem"}}"#,
            r#"{"SetField":{"item_id":"widget_1","field":"category","value":{"String":"Parts"}}}"#,
            r#"{"SetField":{"item_id":"widget_1","field":"description","value":{"String":"A widget"}}}"#,
            r#"{"SetField":{"item_id":"widget_1","field":"location","value":{"String":"shelf"}}}"#,
            r#"{"AddToSet":{"item_id":"widget_1","set_name":"tags","element":{"String":"urgent"}}}"#,
        ];
        for op in ops {
            let op_c = as_ptr(op);
            unsafe {
                assert_eq!(convergent_write_op(uuid.as_ptr(), op_c.as_ptr()), 0);
            }
        }

        let drip_ptr = unsafe { convergent_inventory_read_drip(uuid.as_ptr()) };
        assert!(!drip_ptr.is_null());
        let drip = unsafe { CStr::from_ptr(drip_ptr).to_str().unwrap().to_string() };
        assert!(drip.contains("\"widget_1\""));
        assert!(drip.contains("\"urgent\""));

        unsafe {
            super::super::convergent_free_string(drip_ptr);
            convergent_close(uuid.as_ptr());
        }
    }
}
