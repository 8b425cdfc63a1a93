//! Host bindings for a prebuilt V8 frontend library.
//!
//! The engine ships as a shared library exposing a small C ABI. This
//! crate loads it, owns the value-handle and callback lifecycles, and
//! presents a safe host API: evaluate source, call functions, read and
//! mutate objects, wire JS-visible callbacks and promise handlers, and
//! query heap state.
//!
//! # Example
//!
//! ```no_run
//! use mini_racer::{Context, Engine, JsValue};
//!
//! # fn main() -> Result<(), mini_racer::Error> {
//! let engine = Engine::load()?;
//! let ctx = Context::new(&engine)?;
//! let result = ctx.evaluate("6 * 7", None)?;
//! assert_eq!(result, JsValue::Int(42));
//! # Ok(())
//! # }
//! ```
//!
//! Long-running scripts take a timeout; expiry cancels the engine-side
//! task before returning:
//!
//! ```no_run
//! # use mini_racer::{Context, Engine, Error};
//! # use std::time::Duration;
//! # fn main() -> Result<(), Error> {
//! # let engine = Engine::load()?;
//! let ctx = Context::new(&engine)?;
//! let err = ctx
//!     .evaluate("for(;;){}", Some(Duration::from_millis(100)))
//!     .unwrap_err();
//! assert!(matches!(err, Error::Timeout));
//! # Ok(())
//! # }
//! ```

pub mod abi;
mod callback;
mod context;
mod error;
mod handle;
mod task;
mod value;

pub use context::{Context, Engine, EngineConfig, HeapStats, JsCallback};
pub use error::{Error, EvalError, EvalErrorKind};
pub use value::{JsObject, JsValue};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, continuing through poisoning. The guarded state in this
/// crate stays consistent under panic (single assignments, id maps), so a
/// poisoned lock carries no torn data.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
