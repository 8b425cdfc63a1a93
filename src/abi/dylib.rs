//! `libloading`-backed implementation of [`EngineApi`].
//!
//! The shared library is dlopen'ed once and kept alive for the lifetime of
//! the [`DylibEngine`]; the `mr_*` symbols are resolved eagerly at load
//! time so a missing symbol fails fast instead of at first use.

use std::ffi::{CString, c_char};
use std::path::Path;

use libloading::Library;

use super::{EngineApi, RawCallback, RawKind, RawValueHandle};

macro_rules! resolve {
    ($lib:expr, $name:literal) => {
        // Copy the bare fn pointer out of the Symbol; the Library is kept
        // alive alongside it in the same struct.
        *unsafe { $lib.get(concat!($name, "\0").as_bytes())? }
    };
}

/// Platform-specific filename of the engine library, used when no explicit
/// path is configured.
pub fn default_library_filename() -> &'static str {
    if cfg!(target_os = "windows") {
        "mini_racer.dll"
    } else if cfg!(target_os = "macos") {
        "libmini_racer.dylib"
    } else {
        "libmini_racer.so"
    }
}

struct Symbols {
    init_v8: unsafe extern "C" fn(*const c_char, *const c_char),
    init_context: unsafe extern "C" fn(RawCallback) -> u64,
    free_context: unsafe extern "C" fn(u64),
    context_count: unsafe extern "C" fn() -> usize,
    alloc_int_val: unsafe extern "C" fn(u64, i64, u8) -> *mut RawValueHandle,
    alloc_double_val: unsafe extern "C" fn(u64, f64, u8) -> *mut RawValueHandle,
    alloc_string_val: unsafe extern "C" fn(u64, *const c_char, u64, u8) -> *mut RawValueHandle,
    free_value: unsafe extern "C" fn(u64, *mut RawValueHandle),
    value_count: unsafe extern "C" fn(u64) -> usize,
    get_object_item:
        unsafe extern "C" fn(u64, *mut RawValueHandle, *mut RawValueHandle) -> *mut RawValueHandle,
    set_object_item: unsafe extern "C" fn(
        u64,
        *mut RawValueHandle,
        *mut RawValueHandle,
        *mut RawValueHandle,
    ) -> *mut RawValueHandle,
    del_object_item:
        unsafe extern "C" fn(u64, *mut RawValueHandle, *mut RawValueHandle) -> *mut RawValueHandle,
    get_own_property_names:
        unsafe extern "C" fn(u64, *mut RawValueHandle) -> *mut RawValueHandle,
    get_identity_hash: unsafe extern "C" fn(u64, *mut RawValueHandle) -> *mut RawValueHandle,
    splice_array: unsafe extern "C" fn(
        u64,
        *mut RawValueHandle,
        i32,
        i32,
        *mut RawValueHandle,
    ) -> *mut RawValueHandle,
    eval: unsafe extern "C" fn(u64, *mut RawValueHandle, u64) -> u64,
    call_function: unsafe extern "C" fn(
        u64,
        *mut RawValueHandle,
        *mut RawValueHandle,
        *mut RawValueHandle,
        u64,
    ) -> u64,
    heap_stats: unsafe extern "C" fn(u64, u64) -> u64,
    heap_snapshot: unsafe extern "C" fn(u64, u64) -> u64,
    cancel_task: unsafe extern "C" fn(u64, u64),
    make_js_callback: unsafe extern "C" fn(u64, u64) -> *mut RawValueHandle,
    v8_version: unsafe extern "C" fn() -> *const c_char,
    v8_is_using_sandbox: unsafe extern "C" fn() -> bool,
    set_hard_memory_limit: unsafe extern "C" fn(u64, usize),
    set_soft_memory_limit: unsafe extern "C" fn(u64, usize),
    hard_memory_limit_reached: unsafe extern "C" fn(u64) -> bool,
    soft_memory_limit_reached: unsafe extern "C" fn(u64) -> bool,
    low_memory_notification: unsafe extern "C" fn(u64),
}

/// The production [`EngineApi`]: a dlopen'ed V8 frontend library.
pub struct DylibEngine {
    sym: Symbols,
    _lib: Library,
}

impl DylibEngine {
    /// Load the shared library and resolve every `mr_*` symbol.
    pub fn load(path: &Path) -> Result<Self, libloading::Error> {
        let lib = unsafe { Library::new(path)? };
        let sym = Symbols {
            init_v8: resolve!(lib, "mr_init_v8"),
            init_context: resolve!(lib, "mr_init_context"),
            free_context: resolve!(lib, "mr_free_context"),
            context_count: resolve!(lib, "mr_context_count"),
            alloc_int_val: resolve!(lib, "mr_alloc_int_val"),
            alloc_double_val: resolve!(lib, "mr_alloc_double_val"),
            alloc_string_val: resolve!(lib, "mr_alloc_string_val"),
            free_value: resolve!(lib, "mr_free_value"),
            value_count: resolve!(lib, "mr_value_count"),
            get_object_item: resolve!(lib, "mr_get_object_item"),
            set_object_item: resolve!(lib, "mr_set_object_item"),
            del_object_item: resolve!(lib, "mr_del_object_item"),
            get_own_property_names: resolve!(lib, "mr_get_own_property_names"),
            get_identity_hash: resolve!(lib, "mr_get_identity_hash"),
            splice_array: resolve!(lib, "mr_splice_array"),
            eval: resolve!(lib, "mr_eval"),
            call_function: resolve!(lib, "mr_call_function"),
            heap_stats: resolve!(lib, "mr_heap_stats"),
            heap_snapshot: resolve!(lib, "mr_heap_snapshot"),
            cancel_task: resolve!(lib, "mr_cancel_task"),
            make_js_callback: resolve!(lib, "mr_make_js_callback"),
            v8_version: resolve!(lib, "mr_v8_version"),
            v8_is_using_sandbox: resolve!(lib, "mr_v8_is_using_sandbox"),
            set_hard_memory_limit: resolve!(lib, "mr_set_hard_memory_limit"),
            set_soft_memory_limit: resolve!(lib, "mr_set_soft_memory_limit"),
            hard_memory_limit_reached: resolve!(lib, "mr_hard_memory_limit_reached"),
            soft_memory_limit_reached: resolve!(lib, "mr_soft_memory_limit_reached"),
            low_memory_notification: resolve!(lib, "mr_low_memory_notification"),
        };
        Ok(DylibEngine { sym, _lib: lib })
    }

    /// `mr_init_v8`: process-global engine initialization (V8 flags and the
    /// ICU data file). Must be called once before any context is created;
    /// [`crate::Engine`] guards this with a `Once`.
    pub fn init_v8(&self, v8_flags: &str, icu_path: &str) {
        // Interior NULs would truncate the flag string; strip them rather
        // than fail engine bring-up.
        let flags = CString::new(v8_flags.replace('\0', ""))
            .unwrap_or_default();
        let icu = CString::new(icu_path.replace('\0', "")).unwrap_or_default();
        unsafe { (self.sym.init_v8)(flags.as_ptr(), icu.as_ptr()) }
    }
}

impl EngineApi for DylibEngine {
    fn init_context(&self, callback: RawCallback) -> u64 {
        unsafe { (self.sym.init_context)(callback) }
    }

    fn free_context(&self, ctx: u64) {
        unsafe { (self.sym.free_context)(ctx) }
    }

    fn context_count(&self) -> usize {
        unsafe { (self.sym.context_count)() }
    }

    fn alloc_int_value(&self, ctx: u64, val: i64, kind: RawKind) -> *mut RawValueHandle {
        unsafe { (self.sym.alloc_int_val)(ctx, val, kind as u8) }
    }

    fn alloc_double_value(&self, ctx: u64, val: f64, kind: RawKind) -> *mut RawValueHandle {
        unsafe { (self.sym.alloc_double_val)(ctx, val, kind as u8) }
    }

    fn alloc_string_value(&self, ctx: u64, bytes: &[u8], kind: RawKind) -> *mut RawValueHandle {
        unsafe {
            (self.sym.alloc_string_val)(
                ctx,
                bytes.as_ptr() as *const c_char,
                bytes.len() as u64,
                kind as u8,
            )
        }
    }

    fn free_value(&self, ctx: u64, raw: *mut RawValueHandle) {
        unsafe { (self.sym.free_value)(ctx, raw) }
    }

    fn value_count(&self, ctx: u64) -> usize {
        unsafe { (self.sym.value_count)(ctx) }
    }

    fn get_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        unsafe { (self.sym.get_object_item)(ctx, obj, key) }
    }

    fn set_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
        val: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        unsafe { (self.sym.set_object_item)(ctx, obj, key, val) }
    }

    fn del_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        unsafe { (self.sym.del_object_item)(ctx, obj, key) }
    }

    fn get_own_property_names(&self, ctx: u64, obj: *mut RawValueHandle) -> *mut RawValueHandle {
        unsafe { (self.sym.get_own_property_names)(ctx, obj) }
    }

    fn get_identity_hash(&self, ctx: u64, obj: *mut RawValueHandle) -> *mut RawValueHandle {
        unsafe { (self.sym.get_identity_hash)(ctx, obj) }
    }

    fn splice_array(
        &self,
        ctx: u64,
        array: *mut RawValueHandle,
        index: i32,
        delete_count: i32,
        insert: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        unsafe { (self.sym.splice_array)(ctx, array, index, delete_count, insert) }
    }

    fn eval(&self, ctx: u64, code: *mut RawValueHandle, callback_id: u64) -> u64 {
        unsafe { (self.sym.eval)(ctx, code, callback_id) }
    }

    fn call_function(
        &self,
        ctx: u64,
        func: *mut RawValueHandle,
        this: *mut RawValueHandle,
        argv: *mut RawValueHandle,
        callback_id: u64,
    ) -> u64 {
        unsafe { (self.sym.call_function)(ctx, func, this, argv, callback_id) }
    }

    fn heap_stats(&self, ctx: u64, callback_id: u64) -> u64 {
        unsafe { (self.sym.heap_stats)(ctx, callback_id) }
    }

    fn heap_snapshot(&self, ctx: u64, callback_id: u64) -> u64 {
        unsafe { (self.sym.heap_snapshot)(ctx, callback_id) }
    }

    fn cancel_task(&self, ctx: u64, task_id: u64) {
        unsafe { (self.sym.cancel_task)(ctx, task_id) }
    }

    fn make_js_callback(&self, ctx: u64, callback_id: u64) -> *mut RawValueHandle {
        unsafe { (self.sym.make_js_callback)(ctx, callback_id) }
    }

    fn version(&self) -> String {
        let ptr = unsafe { (self.sym.v8_version)() };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { std::ffi::CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }

    fn is_using_sandbox(&self) -> bool {
        unsafe { (self.sym.v8_is_using_sandbox)() }
    }

    fn set_hard_memory_limit(&self, ctx: u64, limit: usize) {
        unsafe { (self.sym.set_hard_memory_limit)(ctx, limit) }
    }

    fn set_soft_memory_limit(&self, ctx: u64, limit: usize) {
        unsafe { (self.sym.set_soft_memory_limit)(ctx, limit) }
    }

    fn hard_memory_limit_reached(&self, ctx: u64) -> bool {
        unsafe { (self.sym.hard_memory_limit_reached)(ctx) }
    }

    fn soft_memory_limit_reached(&self, ctx: u64) -> bool {
        unsafe { (self.sym.soft_memory_limit_reached)(ctx) }
    }

    fn low_memory_notification(&self, ctx: u64) {
        unsafe { (self.sym.low_memory_notification)(ctx) }
    }
}
