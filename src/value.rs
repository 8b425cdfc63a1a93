//! Host-side representation of JavaScript values.
//!
//! Primitives are copied out of the engine; object-like values stay on the
//! engine heap and are represented by a [`JsObject`], a shared reference to
//! the one owning [`ValueHandle`](crate::handle::ValueHandle) wrapper.

use std::sync::Arc;

use crate::abi::RawKind;
use crate::handle::{InputHandle, ValueHandle};

/// A JavaScript value converted for the host.
///
/// `Int` and `Double` are kept separate because the engine reports them
/// separately; `as_number` bridges the two. `Date` is milliseconds since
/// the Unix epoch, as JavaScript counts time.
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    Array(JsObject),
    Object(JsObject),
    Function(JsObject),
    Promise(JsObject),
    Symbol(JsObject),
}

impl JsValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsValue::Null)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            JsValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view over both integer and double values.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Int(i) => Some(*i as f64),
            JsValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The engine-side object reference, for any object-like variant.
    pub fn as_object(&self) -> Option<&JsObject> {
        match self {
            JsValue::Array(o)
            | JsValue::Object(o)
            | JsValue::Function(o)
            | JsValue::Promise(o)
            | JsValue::Symbol(o) => Some(o),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "null",
            JsValue::Bool(_) => "boolean",
            JsValue::Int(_) | JsValue::Double(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Date(_) => "date",
            JsValue::Array(_) => "array",
            JsValue::Object(_) => "object",
            JsValue::Function(_) => "function",
            JsValue::Promise(_) => "promise",
            JsValue::Symbol(_) => "symbol",
        }
    }
}

impl From<()> for JsValue {
    fn from((): ()) -> Self {
        JsValue::Undefined
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Bool(b)
    }
}

impl From<i32> for JsValue {
    fn from(i: i32) -> Self {
        JsValue::Int(i64::from(i))
    }
}

impl From<i64> for JsValue {
    fn from(i: i64) -> Self {
        JsValue::Int(i)
    }
}

impl From<f64> for JsValue {
    fn from(d: f64) -> Self {
        JsValue::Double(d)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(s.to_owned())
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(s)
    }
}

/// Shared reference to a value living on the engine heap.
///
/// Cloning shares the underlying handle; the native value is released when
/// the last clone is dropped. Equality is identity (same engine-side
/// handle), matching JavaScript reference semantics; use
/// [`Context::get_identity_hash`](crate::Context::get_identity_hash) for a
/// hashable identity.
#[derive(Clone)]
pub struct JsObject {
    pub(crate) handle: Arc<ValueHandle>,
    pub(crate) kind: RawKind,
}

impl JsObject {
    pub(crate) fn new(handle: Arc<ValueHandle>, kind: RawKind) -> Self {
        JsObject { handle, kind }
    }

    pub(crate) fn input(&self) -> InputHandle {
        InputHandle::Shared(self.handle.clone())
    }
}

impl PartialEq for JsObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsObject({:?}, {:p})", self.kind, self.handle.raw())
    }
}
