//! Ownership and conversion of native value handles.
//!
//! [`ValueHandle`] is the single owner of one native-heap value: it cannot
//! be cloned, and its drop issues exactly one `mr_free_value` call (a no-op
//! once the owning context is closed). Object-valued [`JsValue`]s share the
//! one wrapper through an `Arc`, so the free still happens exactly once.
//!
//! Decoding ([`ValueHandle::decode`]) and encoding ([`encode`]) together
//! form the type marshaller between host values and engine handles.

use std::sync::Arc;

use crate::abi::{RawKind, RawValueHandle};
use crate::context::ContextState;
use crate::error::{Error, EvalError, EvalErrorKind};
use crate::value::{JsObject, JsValue};

/// Owned reference to one value on the engine heap.
pub struct ValueHandle {
    ctx: Arc<ContextState>,
    raw: *mut RawValueHandle,
}

// The raw pointer is an opaque key into the native registry, which is
// mutex-guarded on the engine side; the binding never dereferences it
// beyond an unaligned copy of the POD struct.
unsafe impl Send for ValueHandle {}
unsafe impl Sync for ValueHandle {}

impl ValueHandle {
    pub(crate) fn new(ctx: Arc<ContextState>, raw: *mut RawValueHandle) -> Self {
        ValueHandle { ctx, raw }
    }

    pub(crate) fn raw(&self) -> *mut RawValueHandle {
        self.raw
    }

    /// Convert the native value into a host value, consuming the handle.
    ///
    /// Primitive and exception kinds copy their payload out; the handle is
    /// dropped (and the native value freed) on return. Object-like kinds
    /// keep the handle alive inside the returned [`JsObject`].
    ///
    /// An exception-carrying value decodes to `Err`; callers that want to
    /// propagate it use `?`, callers that want to hand it to a callback
    /// pass the `Result` through as-is.
    ///
    /// # Panics
    /// On a kind tag outside the fixed ABI enumeration; that is a
    /// binding-layer bug, not a recoverable condition.
    pub(crate) fn decode(self) -> Result<JsValue, EvalError> {
        let data = unsafe { RawValueHandle::read(self.raw) };
        let Some(kind) = RawKind::from_tag(data.kind) else {
            panic!("unrecognized engine value kind tag {}", data.kind);
        };

        if kind.is_exception() {
            return Err(decode_exception(kind, &data));
        }

        Ok(match kind {
            RawKind::Null => JsValue::Null,
            RawKind::Undefined => JsValue::Undefined,
            RawKind::Bool => JsValue::Bool(unsafe { data.payload.int_val } != 0),
            RawKind::Integer => JsValue::Int(unsafe { data.payload.int_val }),
            RawKind::Double => JsValue::Double(unsafe { data.payload.double_val }),
            RawKind::Date => JsValue::Date(unsafe { data.payload.double_val }),
            RawKind::StrUtf8 => JsValue::String(read_utf8(&data)),
            RawKind::Array => JsValue::Array(self.into_object(kind)),
            RawKind::Function => JsValue::Function(self.into_object(kind)),
            RawKind::Promise => JsValue::Promise(self.into_object(kind)),
            RawKind::Symbol => JsValue::Symbol(self.into_object(kind)),
            // Array buffers stay opaque: byte-level access is part of the
            // excluded convenience layer, but the handle can still be
            // passed back into the engine.
            RawKind::Object | RawKind::SharedArrayBuffer | RawKind::ArrayBuffer => {
                JsValue::Object(self.into_object(kind))
            }
            RawKind::Invalid => {
                return Err(EvalError::new(
                    EvalErrorKind::Value,
                    "engine produced no value",
                ));
            }
            _ => unreachable!("exception kinds handled above"),
        })
    }

    fn into_object(self, kind: RawKind) -> JsObject {
        JsObject::new(Arc::new(self), kind)
    }
}

impl Drop for ValueHandle {
    fn drop(&mut self) {
        // Exactly one free per handle; silently skipped if the context was
        // closed first (the native side reclaims everything on close).
        self.ctx.free_value(self.raw);
    }
}

fn read_utf8(data: &RawValueHandle) -> String {
    let bytes = unsafe { data.payload.bytes };
    if bytes.is_null() || data.len == 0 {
        return String::new();
    }
    let slice = unsafe { std::slice::from_raw_parts(bytes as *const u8, data.len) };
    String::from_utf8_lossy(slice).into_owned()
}

fn decode_exception(kind: RawKind, data: &RawValueHandle) -> EvalError {
    let kind = match kind {
        RawKind::ParseException => EvalErrorKind::Parse,
        RawKind::ExecuteException => EvalErrorKind::Execute,
        RawKind::OomException => EvalErrorKind::OutOfMemory,
        RawKind::TimeoutException => EvalErrorKind::Timeout,
        RawKind::TerminatedException => EvalErrorKind::Terminated,
        RawKind::ValueException => EvalErrorKind::Value,
        RawKind::KeyException => EvalErrorKind::Key,
        _ => unreachable!("caller checked is_exception"),
    };
    let mut message = read_utf8(data);
    if message.is_empty() {
        // The engine sends no text for some aborts; fill in a generic one.
        message = match kind {
            EvalErrorKind::Parse => "could not parse script".into(),
            EvalErrorKind::Execute => "script threw an exception".into(),
            EvalErrorKind::OutOfMemory => "memory limit reached".into(),
            EvalErrorKind::Timeout => "execution timed out".into(),
            EvalErrorKind::Terminated => "execution terminated".into(),
            EvalErrorKind::Value => "bad value".into(),
            EvalErrorKind::Key => "no such key".into(),
        };
    }
    EvalError::new(kind, message)
}

/// A handle to pass *into* the engine: either freshly allocated for this
/// call, or borrowed from an existing object reference. Both keep the
/// native value alive for the duration of the call that uses them.
pub(crate) enum InputHandle {
    Owned(ValueHandle),
    Shared(Arc<ValueHandle>),
}

impl InputHandle {
    pub(crate) fn raw(&self) -> *mut RawValueHandle {
        match self {
            InputHandle::Owned(h) => h.raw(),
            InputHandle::Shared(h) => h.raw(),
        }
    }
}

/// Allocate an engine handle for a host value.
///
/// Object-like values reuse their existing engine-side handle; everything
/// else allocates a fresh one, owned by the returned [`InputHandle`].
pub(crate) fn encode(ctx: &Arc<ContextState>, value: &JsValue) -> Result<InputHandle, Error> {
    let id = ctx.id()?;
    let raw = match value {
        JsValue::Undefined => ctx.api().alloc_int_value(id, 0, RawKind::Undefined),
        JsValue::Null => ctx.api().alloc_int_value(id, 0, RawKind::Null),
        JsValue::Bool(b) => ctx.api().alloc_int_value(id, i64::from(*b), RawKind::Bool),
        JsValue::Int(i) => ctx.api().alloc_int_value(id, *i, RawKind::Integer),
        JsValue::Double(d) => ctx.api().alloc_double_value(id, *d, RawKind::Double),
        JsValue::Date(ms) => ctx.api().alloc_double_value(id, *ms, RawKind::Date),
        JsValue::String(s) => ctx
            .api()
            .alloc_string_value(id, s.as_bytes(), RawKind::StrUtf8),
        JsValue::Array(o)
        | JsValue::Object(o)
        | JsValue::Function(o)
        | JsValue::Promise(o)
        | JsValue::Symbol(o) => return Ok(o.input()),
    };
    if raw.is_null() {
        return Err(Error::Setup("value allocation failed".into()));
    }
    Ok(InputHandle::Owned(ValueHandle::new(ctx.clone(), raw)))
}

/// Allocate a string handle (used for source code and property keys).
pub(crate) fn encode_str(ctx: &Arc<ContextState>, s: &str) -> Result<ValueHandle, Error> {
    let id = ctx.id()?;
    let raw = ctx
        .api()
        .alloc_string_value(id, s.as_bytes(), RawKind::StrUtf8);
    if raw.is_null() {
        return Err(Error::Setup("string allocation failed".into()));
    }
    Ok(ValueHandle::new(ctx.clone(), raw))
}
