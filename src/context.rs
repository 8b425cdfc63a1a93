//! The engine façade: library loading ([`Engine`]) and per-context
//! operations ([`Context`]).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abi::{DylibEngine, EngineApi, RawValueHandle, default_library_filename};
use crate::callback::{CallbackRegistration, CallbackRegistry, registry_trampoline};
use crate::error::{Error, EvalError};
use crate::handle::{ValueHandle, encode, encode_str};
use crate::lock;
use crate::task::{ResultCell, TaskHandle};
use crate::value::{JsObject, JsValue};

/// Where to find the prebuilt engine library and its ICU data file, plus
/// any V8 command-line flags to apply at process-global initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the shared library. Defaults to `MINI_RACER_LIB` or the
    /// platform filename in the current directory.
    pub library_path: PathBuf,
    /// Path to `icudtl.dat`. Defaults to `MINI_RACER_ICU` or
    /// `icudtl.dat` next to the library.
    pub icu_data_path: PathBuf,
    /// V8 flags, e.g. `--max-old-space-size=128`.
    pub v8_flags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let library_path = std::env::var_os("MINI_RACER_LIB")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(default_library_filename()));
        let icu_data_path = std::env::var_os("MINI_RACER_ICU")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let mut p = library_path.clone();
                p.set_file_name("icudtl.dat");
                p
            });
        EngineConfig {
            library_path,
            icu_data_path,
            v8_flags: Vec::new(),
        }
    }
}

static ENGINE_INIT: Once = Once::new();

/// A loaded engine library. Cheap to share; create one per process and
/// hand it to as many [`Context`]s as needed.
///
/// V8 initialization (`mr_init_v8`) is process-global: the first `Engine`
/// loaded applies its flags and ICU data, later loads reuse that state.
#[derive(Clone)]
pub struct Engine {
    api: Arc<dyn EngineApi>,
}

impl Engine {
    /// Load the engine from the default configuration.
    pub fn load() -> Result<Engine, Error> {
        Self::with_config(&EngineConfig::default())
    }

    /// Load the engine library and perform one-time V8 initialization.
    pub fn with_config(config: &EngineConfig) -> Result<Engine, Error> {
        let dylib = DylibEngine::load(&config.library_path)?;
        let mut initialized_here = false;
        ENGINE_INIT.call_once(|| {
            dylib.init_v8(
                &config.v8_flags.join(" "),
                &config.icu_data_path.to_string_lossy(),
            );
            initialized_here = true;
        });
        if !initialized_here && !config.v8_flags.is_empty() {
            log::debug!("engine already initialized; flags {:?} ignored", config.v8_flags);
        }
        Ok(Engine {
            api: Arc::new(dylib),
        })
    }

    /// Build an engine from any [`EngineApi`] implementation. This is the
    /// seam used by the test suite; embedders with their own linkage can
    /// use it too.
    pub fn from_api(api: Arc<dyn EngineApi>) -> Engine {
        Engine { api }
    }

    /// The V8 version string baked into the library.
    pub fn v8_version(&self) -> String {
        self.api.version()
    }

    /// Whether the library was built with the V8 sandbox enabled. This is
    /// process-global state, queryable but not controllable here.
    pub fn is_using_sandbox(&self) -> bool {
        self.api.is_using_sandbox()
    }

    /// Number of live contexts in the process. Diagnostic, for tests.
    pub fn context_count(&self) -> usize {
        self.api.context_count()
    }
}

/// Shared context state: the API handle plus the native context id, which
/// is taken exactly once on close. Value handles hold an `Arc` of this so
/// a drop after close degrades to a no-op instead of a stale free.
pub(crate) struct ContextState {
    api: Arc<dyn EngineApi>,
    id: Mutex<Option<u64>>,
}

impl ContextState {
    pub(crate) fn api(&self) -> &dyn EngineApi {
        &*self.api
    }

    /// The native context id, or [`Error::ContextClosed`].
    pub(crate) fn id(&self) -> Result<u64, Error> {
        (*lock(&self.id)).ok_or(Error::ContextClosed)
    }

    /// Release one value handle; no-op once the context is closed (the
    /// engine reclaims all values with the context).
    pub(crate) fn free_value(&self, raw: *mut RawValueHandle) {
        if let Some(id) = *lock(&self.id) {
            self.api.free_value(id, raw);
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(api: Arc<dyn EngineApi>) -> Arc<ContextState> {
        Arc::new(ContextState {
            api,
            id: Mutex::new(Some(1)),
        })
    }

    #[cfg(test)]
    pub(crate) fn close_for_tests(&self) {
        lock(&self.id).take();
    }
}

/// One JavaScript execution environment.
///
/// All operations are `&self` and may be called from any thread; the
/// engine serializes work per context internally. `close` (or drop)
/// releases the native context exactly once; operations afterwards fail
/// with [`Error::ContextClosed`].
pub struct Context {
    state: Arc<ContextState>,
    registry: CallbackRegistry,
}

impl Context {
    /// Create a context on the given engine, wiring the callback
    /// trampoline into the native side.
    pub fn new(engine: &Engine) -> Result<Context, Error> {
        let state = Arc::new(ContextState {
            api: engine.api.clone(),
            id: Mutex::new(None),
        });
        let registry = CallbackRegistry::new(state.clone());
        let id = engine.api.init_context(registry_trampoline);
        if id == 0 {
            return Err(Error::Setup("engine refused to create a context".into()));
        }
        *lock(&state.id) = Some(id);
        log::debug!("created context {id}");
        Ok(Context { state, registry })
    }

    // -- evaluation ----------------------------------------------------------

    /// Evaluate JavaScript source and return the result.
    ///
    /// A `timeout` bounds only the host-side wait: on expiry the native
    /// task is cancelled and its eventual result drained, so no task or
    /// callback entry leaks, and the call returns [`Error::Timeout`].
    pub fn evaluate(&self, code: &str, timeout: Option<Duration>) -> Result<JsValue, Error> {
        let code_handle = encode_str(&self.state, code)?;
        let mut task =
            self.run_task(|ctx, cb| self.state.api().eval(ctx, code_handle.raw(), cb))?;
        task.wait(timeout)
    }

    /// Evaluate an expression and return its JSON-serialized result,
    /// parsed host-side. Values `JSON.stringify` cannot represent
    /// (undefined, functions) come back as `null`.
    pub fn evaluate_json(
        &self,
        expr: &str,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, Error> {
        let wrapped = format!("JSON.stringify((function(){{return ({expr})}})())");
        match self.evaluate(&wrapped, timeout)? {
            JsValue::String(s) => Ok(serde_json::from_str(&s)?),
            // JSON.stringify(undefined) evaluates to undefined.
            JsValue::Undefined => Ok(serde_json::Value::Null),
            other => Err(Error::Setup(format!(
                "JSON round-trip produced a {}",
                other.type_name()
            ))),
        }
    }

    /// Call a JavaScript function value.
    ///
    /// Arguments are marshalled into a fresh engine-side array; `this`
    /// defaults to `undefined`.
    pub fn call_function(
        &self,
        func: &JsValue,
        args: &[JsValue],
        this: Option<&JsValue>,
        timeout: Option<Duration>,
    ) -> Result<JsValue, Error> {
        let argv = self.new_array()?;
        for (index, arg) in args.iter().enumerate() {
            self.array_insert(&argv, index as i32, arg)?;
        }

        let func_handle = encode(&self.state, func)?;
        let this_handle = encode(&self.state, this.unwrap_or(&JsValue::Undefined))?;
        let argv_handle = argv.input();

        let mut task = self.run_task(|ctx, cb| {
            self.state.api().call_function(
                ctx,
                func_handle.raw(),
                this_handle.raw(),
                argv_handle.raw(),
                cb,
            )
        })?;
        task.wait(timeout)
    }

    // -- synchronous object operations ---------------------------------------

    /// Read a property. Missing keys surface as a
    /// [`Key`](crate::EvalErrorKind::Key) evaluation error.
    pub fn get_object_item(&self, obj: &JsValue, key: &JsValue) -> Result<JsValue, Error> {
        let ctx = self.state.id()?;
        let obj_h = encode(&self.state, obj)?;
        let key_h = encode(&self.state, key)?;
        self.check(self.state.api().get_object_item(ctx, obj_h.raw(), key_h.raw()))
    }

    /// Write a property. The discarded engine result is still decoded:
    /// writes can throw, e.g. on frozen objects.
    pub fn set_object_item(
        &self,
        obj: &JsValue,
        key: &JsValue,
        value: &JsValue,
    ) -> Result<(), Error> {
        let ctx = self.state.id()?;
        let obj_h = encode(&self.state, obj)?;
        let key_h = encode(&self.state, key)?;
        let val_h = encode(&self.state, value)?;
        self.check(
            self.state
                .api()
                .set_object_item(ctx, obj_h.raw(), key_h.raw(), val_h.raw()),
        )
        .map(|_| ())
    }

    /// Delete a property. Like [`set_object_item`](Self::set_object_item),
    /// the result is decoded for embedded exceptions even though its value
    /// is discarded.
    pub fn del_object_item(&self, obj: &JsValue, key: &JsValue) -> Result<(), Error> {
        let ctx = self.state.id()?;
        let obj_h = encode(&self.state, obj)?;
        let key_h = encode(&self.state, key)?;
        self.check(self.state.api().del_object_item(ctx, obj_h.raw(), key_h.raw()))
            .map(|_| ())
    }

    /// Own enumerable property names, as an engine-side array value.
    pub fn get_own_property_names(&self, obj: &JsValue) -> Result<JsValue, Error> {
        let ctx = self.state.id()?;
        let obj_h = encode(&self.state, obj)?;
        self.check(self.state.api().get_own_property_names(ctx, obj_h.raw()))
    }

    /// V8 identity hash of an object, stable for the object's lifetime.
    pub fn get_identity_hash(&self, obj: &JsValue) -> Result<i64, Error> {
        let ctx = self.state.id()?;
        let obj_h = encode(&self.state, obj)?;
        match self.check(self.state.api().get_identity_hash(ctx, obj_h.raw()))? {
            JsValue::Int(hash) => Ok(hash),
            other => Err(Error::Setup(format!(
                "identity hash came back as a {}",
                other.type_name()
            ))),
        }
    }

    // -- array operations (one generic splice primitive) ---------------------

    /// Remove one element at `index`.
    pub fn del_from_array(&self, array: &JsObject, index: i32) -> Result<(), Error> {
        self.splice(array, index, 1, None).map(|_| ())
    }

    /// Insert `value` at `index`, shifting later elements right.
    pub fn array_insert(&self, array: &JsObject, index: i32, value: &JsValue) -> Result<(), Error> {
        self.splice(array, index, 0, Some(value)).map(|_| ())
    }

    /// Append `value`: a splice at the array's current length.
    pub fn array_push(&self, array: &JsObject, value: &JsValue) -> Result<(), Error> {
        let length = self.array_length(array)?;
        self.splice(array, length, 0, Some(value)).map(|_| ())
    }

    fn splice(
        &self,
        array: &JsObject,
        index: i32,
        delete_count: i32,
        insert: Option<&JsValue>,
    ) -> Result<JsValue, Error> {
        let ctx = self.state.id()?;
        let arr_h = array.input();
        let insert_h = insert.map(|v| encode(&self.state, v)).transpose()?;
        let insert_raw = insert_h
            .as_ref()
            .map_or(std::ptr::null_mut(), |h| h.raw());
        self.check(
            self.state
                .api()
                .splice_array(ctx, arr_h.raw(), index, delete_count, insert_raw),
        )
    }

    fn array_length(&self, array: &JsObject) -> Result<i32, Error> {
        let length = self.get_object_item(
            &JsValue::Array(array.clone()),
            &JsValue::from("length"),
        )?;
        let n = length.as_number().ok_or_else(|| {
            Error::Setup(format!("array length came back as a {}", length.type_name()))
        })?;
        i32::try_from(n as i64)
            .map_err(|_| Error::Setup(format!("array length {n} exceeds splice range")))
    }

    fn new_array(&self) -> Result<JsObject, Error> {
        match self.evaluate("[]", None)? {
            JsValue::Array(a) => Ok(a),
            other => Err(Error::Setup(format!(
                "array literal evaluated to a {}",
                other.type_name()
            ))),
        }
    }

    // -- promises and JS-visible callbacks -----------------------------------

    /// Wire resolution handlers onto a promise by invoking its `then`
    /// method with `promise` as the receiver. The handlers fire later,
    /// through whatever callbacks back the two function values; this call
    /// itself only installs them.
    pub fn promise_then(
        &self,
        promise: &JsValue,
        on_resolved: &JsValue,
        on_rejected: &JsValue,
    ) -> Result<(), Error> {
        let then = self.get_object_item(promise, &JsValue::from("then"))?;
        match then {
            JsValue::Function(_) => {}
            other => {
                return Err(Error::Setup(format!(
                    "promise .then is a {}, not a function",
                    other.type_name()
                )));
            }
        }
        self.call_function(
            &then,
            &[on_resolved.clone(), on_rejected.clone()],
            Some(promise),
            None,
        )?;
        Ok(())
    }

    /// Create a JavaScript function that forwards its argument array to
    /// `callback`. The returned [`JsCallback`] keeps the registration
    /// alive; dropping it tears the callback down.
    ///
    /// `callback` runs on an engine-owned thread and **must not** call
    /// back into this context (evaluate, property access, …): the engine
    /// is not reentrant from its own callback delivery and doing so
    /// deadlocks. Hand the value to another thread (a channel works)
    /// when engine access is needed.
    pub fn js_callback<F>(&self, callback: F) -> Result<JsCallback, Error>
    where
        F: FnMut(Result<JsValue, EvalError>) + Send + 'static,
    {
        let ctx = self.state.id()?;
        let registration = self.registry.register(Box::new(callback));
        let raw = self.state.api().make_js_callback(ctx, registration.id());
        let function = self.check(raw)?;
        Ok(JsCallback {
            function,
            _registration: registration,
        })
    }

    // -- memory limits and heap diagnostics ----------------------------------

    /// Set the hard allocation limit in bytes; execution terminates when
    /// the heap passes it. Zero disables the limit.
    pub fn set_hard_memory_limit(&self, limit: usize) -> Result<(), Error> {
        Ok(self.state.api().set_hard_memory_limit(self.state.id()?, limit))
    }

    /// Set the soft limit in bytes; crossing it only flags
    /// [`soft_memory_limit_reached`](Self::soft_memory_limit_reached) and
    /// nudges the engine toward GC.
    pub fn set_soft_memory_limit(&self, limit: usize) -> Result<(), Error> {
        Ok(self.state.api().set_soft_memory_limit(self.state.id()?, limit))
    }

    pub fn hard_memory_limit_reached(&self) -> Result<bool, Error> {
        Ok(self.state.api().hard_memory_limit_reached(self.state.id()?))
    }

    pub fn soft_memory_limit_reached(&self) -> Result<bool, Error> {
        Ok(self.state.api().soft_memory_limit_reached(self.state.id()?))
    }

    /// Ask the engine for a best-effort garbage collection pass.
    pub fn low_memory_notification(&self) -> Result<(), Error> {
        Ok(self.state.api().low_memory_notification(self.state.id()?))
    }

    /// Heap statistics, parsed from the engine's JSON report.
    pub fn heap_stats(&self) -> Result<HeapStats, Error> {
        Ok(serde_json::from_str(&self.heap_stats_raw()?)?)
    }

    /// The raw JSON heap-statistics string. Runs as a bridged task; heap
    /// reporting can take a while on large heaps.
    pub fn heap_stats_raw(&self) -> Result<String, Error> {
        let mut task = self.run_task(|ctx, cb| self.state.api().heap_stats(ctx, cb))?;
        expect_string(task.wait(None)?)
    }

    /// A full heap-graph dump in the V8 snapshot format. Long-running,
    /// hence bridged like evaluation.
    pub fn heap_snapshot(&self) -> Result<String, Error> {
        let mut task = self.run_task(|ctx, cb| self.state.api().heap_snapshot(ctx, cb))?;
        expect_string(task.wait(None)?)
    }

    /// Live value-handle count for this context. Diagnostic, for tests.
    pub fn value_count(&self) -> Result<usize, Error> {
        Ok(self.state.api().value_count(self.state.id()?))
    }

    // -- lifecycle -----------------------------------------------------------

    /// Release the native context. Idempotent; also run on drop. Must not
    /// race an in-flight `evaluate`/`call_function` on another thread;
    /// finish or time out awaits before closing.
    pub fn close(&self) {
        let taken = lock(&self.state.id).take();
        if let Some(id) = taken {
            self.state.api.free_context(id);
            log::debug!("closed context {id}");
        }
    }

    // -- internals -----------------------------------------------------------

    /// Start a bridged task: register a completion callback resolving a
    /// fresh cell, invoke the native op with the callback id, and wrap the
    /// returned task id in the scoped guard.
    fn run_task(&self, start: impl FnOnce(u64, u64) -> u64) -> Result<TaskHandle, Error> {
        let ctx_id = self.state.id()?;
        let cell = Arc::new(ResultCell::new());
        let resolver = cell.clone();
        let registration: CallbackRegistration = self
            .registry
            .register(Box::new(move |outcome| resolver.resolve(outcome)));
        let task_id = start(ctx_id, registration.id());
        log::trace!("started task {task_id} (callback {})", registration.id());
        Ok(TaskHandle::new(self.state.clone(), cell, registration, task_id))
    }

    /// Wrap a synchronous native result and decode it, surfacing embedded
    /// exceptions as errors.
    fn check(&self, raw: *mut RawValueHandle) -> Result<JsValue, Error> {
        if raw.is_null() {
            return Err(Error::Setup("engine returned no value".into()));
        }
        Ok(ValueHandle::new(self.state.clone(), raw).decode()?)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}

fn expect_string(value: JsValue) -> Result<String, Error> {
    match value {
        JsValue::String(s) => Ok(s),
        other => Err(Error::Setup(format!(
            "heap report came back as a {}",
            other.type_name()
        ))),
    }
}

/// A JS-visible host callback: the engine-side function value plus the
/// registration guard that keeps it dispatchable. Dropping this tears the
/// callback down; later invocations from JavaScript are dropped with a
/// warning instead of reaching the host.
pub struct JsCallback {
    function: JsValue,
    _registration: CallbackRegistration,
}

impl JsCallback {
    /// The function value to hand into the engine (as an argument, a
    /// property, a promise handler, …).
    pub fn function(&self) -> &JsValue {
        &self.function
    }
}

/// V8 heap statistics, as reported by the engine's heap reporter.
#[derive(Debug, Clone, Deserialize)]
pub struct HeapStats {
    pub total_physical_size: f64,
    pub total_heap_size_executable: f64,
    pub total_heap_size: f64,
    pub used_heap_size: f64,
    pub heap_size_limit: f64,
}
