//! Raw C ABI surface of the prebuilt V8 frontend library.
//!
//! The native library hands values across the boundary as pointers to a
//! packed struct ([`RawValueHandle`]). The binding layer treats those
//! pointers as opaque keys into a native-owned registry: it reads the
//! inline payload (numbers, string bytes, exception text) but never frees
//! the payload itself: every handle goes back through `mr_free_value`
//! exactly once.
//!
//! [`EngineApi`] is the seam between the binding logic and the actual
//! shared library. Production code uses the [`dylib`] implementation;
//! tests drive the same binding logic through an in-process double.

mod dylib;

pub use dylib::{DylibEngine, default_library_filename};

use std::ffi::c_char;

/// The one callback shape the native ABI supports: a bare function pointer
/// receiving a callback id and a value handle, invoked on an engine-owned
/// thread. No userdata parameter, hence the dispatch-by-id design in
/// [`crate::callback`].
pub type RawCallback = extern "C" fn(callback_id: u64, value: *mut RawValueHandle);

/// Inline payload of a value handle. Which arm is meaningful depends on
/// the kind tag: `bytes` for strings and exception text, `int_val` for
/// integers and booleans, `double_val` for doubles and dates.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawValuePayload {
    pub bytes: *mut c_char,
    pub int_val: i64,
    pub double_val: f64,
}

/// Mirror of the native `ValueHandle` struct. The C declaration is
/// `__attribute__((packed))`, so this must stay `repr(C, packed)` and must
/// only ever be read via an unaligned copy.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct RawValueHandle {
    pub payload: RawValuePayload,
    pub len: usize,
    pub kind: u8,
}

impl RawValueHandle {
    /// Copy the struct out of a (possibly unaligned) native pointer.
    ///
    /// # Safety
    /// `raw` must point to a live value handle owned by the native
    /// registry of the context it came from.
    pub unsafe fn read(raw: *mut RawValueHandle) -> RawValueHandle {
        unsafe { raw.read_unaligned() }
    }
}

/// Kind tags used by the native library. The numeric values are part of
/// the fixed ABI and match the `ValueTypes` enum of the V8 frontend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Invalid = 0,
    Null = 1,
    Bool = 2,
    Integer = 3,
    Double = 4,
    StrUtf8 = 5,
    Array = 6,
    // 7 was a hash type, long gone from the ABI.
    Date = 8,
    Symbol = 9,
    Object = 10,
    Undefined = 11,

    Function = 100,
    SharedArrayBuffer = 101,
    ArrayBuffer = 102,
    Promise = 103,

    ExecuteException = 200,
    ParseException = 201,
    OomException = 202,
    TimeoutException = 203,
    TerminatedException = 204,
    ValueException = 205,
    KeyException = 206,
}

impl RawKind {
    /// Decode a tag byte. The enumeration is fixed and exhaustive; callers
    /// treat `None` as a binding-layer bug.
    pub fn from_tag(tag: u8) -> Option<RawKind> {
        Some(match tag {
            0 => RawKind::Invalid,
            1 => RawKind::Null,
            2 => RawKind::Bool,
            3 => RawKind::Integer,
            4 => RawKind::Double,
            5 => RawKind::StrUtf8,
            6 => RawKind::Array,
            8 => RawKind::Date,
            9 => RawKind::Symbol,
            10 => RawKind::Object,
            11 => RawKind::Undefined,
            100 => RawKind::Function,
            101 => RawKind::SharedArrayBuffer,
            102 => RawKind::ArrayBuffer,
            103 => RawKind::Promise,
            200 => RawKind::ExecuteException,
            201 => RawKind::ParseException,
            202 => RawKind::OomException,
            203 => RawKind::TimeoutException,
            204 => RawKind::TerminatedException,
            205 => RawKind::ValueException,
            206 => RawKind::KeyException,
            _ => return None,
        })
    }

    /// True for the exception tags (200..=206).
    pub fn is_exception(self) -> bool {
        self as u8 >= RawKind::ExecuteException as u8
    }
}

/// The full `mr_*` function surface consumed by the binding layer.
///
/// One implementor wraps the shared library ([`DylibEngine`]); tests
/// substitute an in-process engine. All methods are safe to call from any
/// thread: the native side serializes work per context and guards its
/// handle registries with mutexes.
///
/// Raw pointers passed in are borrowed for the duration of the call only,
/// except for the asynchronous operations (`eval`, `call_function`), whose
/// argument handles must stay alive until the task delivers its callback.
pub trait EngineApi: Send + Sync + 'static {
    // -- context lifecycle ---------------------------------------------------

    /// `mr_init_context`: create a native context wired to `callback` and
    /// return its id, or 0 if the engine was never initialized.
    fn init_context(&self, callback: RawCallback) -> u64;

    /// `mr_free_context`: destroy a context. Values and tasks belonging to
    /// it must already be settled.
    fn free_context(&self, ctx: u64);

    /// `mr_context_count`: number of live contexts in the process
    /// (diagnostic, for tests).
    fn context_count(&self) -> usize;

    // -- value lifecycle -----------------------------------------------------

    fn alloc_int_value(&self, ctx: u64, val: i64, kind: RawKind) -> *mut RawValueHandle;
    fn alloc_double_value(&self, ctx: u64, val: f64, kind: RawKind) -> *mut RawValueHandle;
    fn alloc_string_value(&self, ctx: u64, bytes: &[u8], kind: RawKind) -> *mut RawValueHandle;

    /// `mr_free_value`: release one handle. Must be called exactly once
    /// per handle returned by any other method.
    fn free_value(&self, ctx: u64, raw: *mut RawValueHandle);

    /// `mr_value_count`: live handle count for a context (diagnostic).
    fn value_count(&self, ctx: u64) -> usize;

    // -- synchronous object operations --------------------------------------

    fn get_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
    ) -> *mut RawValueHandle;

    fn set_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
        val: *mut RawValueHandle,
    ) -> *mut RawValueHandle;

    fn del_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
    ) -> *mut RawValueHandle;

    fn get_own_property_names(&self, ctx: u64, obj: *mut RawValueHandle) -> *mut RawValueHandle;

    fn get_identity_hash(&self, ctx: u64, obj: *mut RawValueHandle) -> *mut RawValueHandle;

    /// `mr_splice_array`: the one generic array mutator. Deletes
    /// `delete_count` elements at `index` and, when `insert` is non-null,
    /// inserts that value at `index`. Append is a splice at `length`.
    fn splice_array(
        &self,
        ctx: u64,
        array: *mut RawValueHandle,
        index: i32,
        delete_count: i32,
        insert: *mut RawValueHandle,
    ) -> *mut RawValueHandle;

    // -- asynchronous operations (task id returned, result via callback) -----

    fn eval(&self, ctx: u64, code: *mut RawValueHandle, callback_id: u64) -> u64;

    fn call_function(
        &self,
        ctx: u64,
        func: *mut RawValueHandle,
        this: *mut RawValueHandle,
        argv: *mut RawValueHandle,
        callback_id: u64,
    ) -> u64;

    fn heap_stats(&self, ctx: u64, callback_id: u64) -> u64;

    fn heap_snapshot(&self, ctx: u64, callback_id: u64) -> u64;

    /// `mr_cancel_task`: ask the engine to abandon a task. Idempotent; a
    /// no-op if the task already completed.
    fn cancel_task(&self, ctx: u64, task_id: u64);

    // -- JS-visible callbacks ------------------------------------------------

    /// `mr_make_js_callback`: build a JS function value which, when called
    /// from script, forwards its argument array to the context trampoline
    /// under `callback_id`.
    fn make_js_callback(&self, ctx: u64, callback_id: u64) -> *mut RawValueHandle;

    // -- diagnostics and limits ----------------------------------------------

    fn version(&self) -> String;
    fn is_using_sandbox(&self) -> bool;
    fn set_hard_memory_limit(&self, ctx: u64, limit: usize);
    fn set_soft_memory_limit(&self, ctx: u64, limit: usize);
    fn hard_memory_limit_reached(&self, ctx: u64) -> bool;
    fn soft_memory_limit_reached(&self, ctx: u64) -> bool;
    fn low_memory_notification(&self, ctx: u64);
}
