//! An in-process [`EngineApi`] double.
//!
//! Scripts are "programmed": each source string maps to an outcome spec,
//! and evaluation delivers that outcome through the real callback
//! trampoline on a worker thread, the way the native engine does. Object
//! values live in a real store so property access, splicing, and identity
//! behave observably.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use mini_racer::abi::{EngineApi, RawCallback, RawKind, RawValueHandle, RawValuePayload};

/// Declarative outcome for a programmed script or function body.
#[derive(Clone)]
pub enum Spec {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Date(f64),
    Object {
        props: Vec<(String, Spec)>,
        frozen: bool,
    },
    Array(Vec<Spec>),
    /// A promise-like value: carries the promise kind tag and whatever
    /// properties the scenario needs (usually a `then` function).
    Promise {
        props: Vec<(String, Spec)>,
    },
    Function(FnSpec),
    Throw { kind: RawKind, message: String },
    /// Never completes until `cancel_task`, which delivers termination.
    Hang,
    Delay(u64, Box<Spec>),
}

/// What a programmed function value does when called.
#[derive(Clone)]
pub enum FnSpec {
    Return(Box<Spec>),
    /// Return the arguments array itself.
    EchoArgs,
    /// Call the first argument (a host callback function) with a
    /// one-element arguments array holding the spec value, then return
    /// undefined. A `Spec::Throw` payload forwards an exception handle
    /// instead of an arguments array.
    CallFirstArg(Box<Spec>),
    Throw { kind: RawKind, message: String },
}

/// One call observed by the store, for assertions.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
    pub func: u64,
    pub this_is_func_owner: bool,
    pub argc: usize,
}

#[derive(Clone)]
enum FakeVal {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Date(f64),
    Obj(u64),
}

enum FnKind {
    Spec(FnSpec),
    /// Built by `make_js_callback`: forwards the arguments array to the
    /// registered trampoline under this callback id.
    Forward(u64),
}

enum ObjKind {
    Object,
    Array,
    Function(FnKind),
    Promise,
}

struct ObjectData {
    kind: ObjKind,
    props: BTreeMap<String, FakeVal>,
    elements: Vec<FakeVal>,
    frozen: bool,
}

struct HandleRecord {
    ctx: u64,
    val: FakeVal,
    // Backing buffer for string payloads; the handle's bytes pointer
    // aims into this Vec.
    bytes: Option<Vec<u8>>,
}

struct HangGate {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

struct Inner {
    callback: Option<RawCallback>,
    contexts: Vec<u64>,
    programs: HashMap<String, Spec>,
    objects: HashMap<u64, ObjectData>,
    handles: HashMap<usize, HandleRecord>,
    tasks: HashMap<u64, Arc<HangGate>>,
    calls: Vec<CallRecord>,
    hard_limit: usize,
    soft_limit: usize,
    low_memory_notifications: usize,
}

pub struct FakeEngine {
    me: Weak<FakeEngine>,
    inner: Mutex<Inner>,
    next_ctx: AtomicU64,
    next_object: AtomicU64,
    next_task: AtomicU64,
}

impl FakeEngine {
    pub fn new() -> Arc<FakeEngine> {
        Arc::new_cyclic(|me| FakeEngine {
            me: me.clone(),
            inner: Mutex::new(Inner {
                callback: None,
                contexts: Vec::new(),
                programs: HashMap::new(),
                objects: HashMap::new(),
                handles: HashMap::new(),
                tasks: HashMap::new(),
                calls: Vec::new(),
                hard_limit: 0,
                soft_limit: 0,
                low_memory_notifications: 0,
            }),
            next_ctx: AtomicU64::new(1),
            next_object: AtomicU64::new(1),
            next_task: AtomicU64::new(1),
        })
    }

    /// Map a source string to an outcome.
    pub fn program(&self, code: &str, outcome: Spec) {
        let mut inner = self.inner.lock().unwrap();
        inner.programs.insert(code.to_owned(), outcome);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn low_memory_notifications(&self) -> usize {
        self.inner.lock().unwrap().low_memory_notifications
    }

    // -- internals -----------------------------------------------------------

    fn arc(&self) -> Arc<FakeEngine> {
        self.me.upgrade().unwrap()
    }

    fn new_object(&self, data: ObjectData) -> u64 {
        let id = self.next_object.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().unwrap().objects.insert(id, data);
        id
    }

    fn materialize(&self, spec: &Spec) -> FakeVal {
        match spec {
            Spec::Undefined => FakeVal::Undefined,
            Spec::Null => FakeVal::Null,
            Spec::Bool(b) => FakeVal::Bool(*b),
            Spec::Int(i) => FakeVal::Int(*i),
            Spec::Double(d) => FakeVal::Double(*d),
            Spec::Str(s) => FakeVal::Str(s.clone()),
            Spec::Date(ms) => FakeVal::Date(*ms),
            Spec::Object { props, frozen } => {
                let props = props
                    .iter()
                    .map(|(k, v)| (k.clone(), self.materialize(v)))
                    .collect();
                FakeVal::Obj(self.new_object(ObjectData {
                    kind: ObjKind::Object,
                    props,
                    elements: Vec::new(),
                    frozen: *frozen,
                }))
            }
            Spec::Promise { props } => {
                let props = props
                    .iter()
                    .map(|(k, v)| (k.clone(), self.materialize(v)))
                    .collect();
                FakeVal::Obj(self.new_object(ObjectData {
                    kind: ObjKind::Promise,
                    props,
                    elements: Vec::new(),
                    frozen: false,
                }))
            }
            Spec::Array(items) => {
                let elements = items.iter().map(|v| self.materialize(v)).collect();
                FakeVal::Obj(self.new_object(ObjectData {
                    kind: ObjKind::Array,
                    props: BTreeMap::new(),
                    elements,
                    frozen: false,
                }))
            }
            Spec::Function(f) => FakeVal::Obj(self.new_object(ObjectData {
                kind: ObjKind::Function(FnKind::Spec(f.clone())),
                props: BTreeMap::new(),
                elements: Vec::new(),
                frozen: false,
            })),
            // Task-level outcomes have no value form; callers handle them
            // before materializing.
            Spec::Throw { .. } | Spec::Hang | Spec::Delay(..) => FakeVal::Undefined,
        }
    }

    /// Allocate a raw handle for a value, registering it in the live set.
    fn emit(&self, ctx: u64, val: FakeVal) -> *mut RawValueHandle {
        let (payload, len, kind, bytes) = match &val {
            FakeVal::Undefined => (
                RawValuePayload { int_val: 0 },
                0,
                RawKind::Undefined,
                None,
            ),
            FakeVal::Null => (RawValuePayload { int_val: 0 }, 0, RawKind::Null, None),
            FakeVal::Bool(b) => (
                RawValuePayload {
                    int_val: i64::from(*b),
                },
                0,
                RawKind::Bool,
                None,
            ),
            FakeVal::Int(i) => (RawValuePayload { int_val: *i }, 0, RawKind::Integer, None),
            FakeVal::Double(d) => (
                RawValuePayload { double_val: *d },
                0,
                RawKind::Double,
                None,
            ),
            FakeVal::Date(ms) => (RawValuePayload { double_val: *ms }, 0, RawKind::Date, None),
            FakeVal::Str(s) => {
                let buf = s.clone().into_bytes();
                (
                    RawValuePayload {
                        bytes: buf.as_ptr() as *mut _,
                    },
                    buf.len(),
                    RawKind::StrUtf8,
                    Some(buf),
                )
            }
            FakeVal::Obj(id) => {
                let inner = self.inner.lock().unwrap();
                let kind = match inner.objects.get(id).map(|o| &o.kind) {
                    Some(ObjKind::Array) => RawKind::Array,
                    Some(ObjKind::Function(_)) => RawKind::Function,
                    Some(ObjKind::Promise) => RawKind::Promise,
                    _ => RawKind::Object,
                };
                (RawValuePayload { int_val: 0 }, 0, kind, None)
            }
        };
        let raw = Box::into_raw(Box::new(RawValueHandle {
            payload,
            len,
            kind: kind as u8,
        }));
        let mut inner = self.inner.lock().unwrap();
        inner
            .handles
            .insert(raw as usize, HandleRecord { ctx, val, bytes });
        raw
    }

    fn emit_error(&self, ctx: u64, kind: RawKind, message: &str) -> *mut RawValueHandle {
        let buf = message.as_bytes().to_vec();
        let raw = Box::into_raw(Box::new(RawValueHandle {
            payload: RawValuePayload {
                bytes: buf.as_ptr() as *mut _,
            },
            len: buf.len(),
            kind: kind as u8,
        }));
        let mut inner = self.inner.lock().unwrap();
        inner.handles.insert(
            raw as usize,
            HandleRecord {
                ctx,
                val: FakeVal::Undefined,
                bytes: Some(buf),
            },
        );
        raw
    }

    fn resolve(&self, raw: *mut RawValueHandle) -> FakeVal {
        self.inner
            .lock()
            .unwrap()
            .handles
            .get(&(raw as usize))
            .map(|r| r.val.clone())
            .unwrap_or(FakeVal::Undefined)
    }

    fn stored_callback(&self) -> RawCallback {
        self.inner.lock().unwrap().callback.unwrap()
    }

    /// Deliver an outcome to a callback id on a worker thread, like the
    /// engine's task runner.
    fn deliver_later(&self, ctx: u64, callback_id: u64, outcome: DeliverOutcome) {
        let engine = self.arc();
        thread::spawn(move || {
            let raw = match outcome {
                DeliverOutcome::Value(val) => engine.emit(ctx, val),
                DeliverOutcome::Error { kind, message } => {
                    engine.emit_error(ctx, kind, &message)
                }
            };
            (engine.stored_callback())(callback_id, raw);
        });
    }

    fn run_task(&self, ctx: u64, callback_id: u64, spec: Spec) -> u64 {
        let task_id = self.next_task.fetch_add(1, Ordering::Relaxed);
        match spec {
            Spec::Hang => {
                let gate = Arc::new(HangGate {
                    cancelled: Mutex::new(false),
                    cv: Condvar::new(),
                });
                self.inner
                    .lock()
                    .unwrap()
                    .tasks
                    .insert(task_id, gate.clone());
                let engine = self.arc();
                thread::spawn(move || {
                    let mut cancelled = gate.cancelled.lock().unwrap();
                    while !*cancelled {
                        cancelled = gate.cv.wait(cancelled).unwrap();
                    }
                    drop(cancelled);
                    let raw = engine.emit_error(
                        ctx,
                        RawKind::TerminatedException,
                        "JavaScript was terminated",
                    );
                    (engine.stored_callback())(callback_id, raw);
                });
            }
            Spec::Delay(ms, inner_spec) => {
                let engine = self.arc();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(ms));
                    let val = engine.materialize(&inner_spec);
                    let raw = engine.emit(ctx, val);
                    (engine.stored_callback())(callback_id, raw);
                });
            }
            Spec::Throw { kind, message } => {
                self.deliver_later(ctx, callback_id, DeliverOutcome::Error { kind, message });
            }
            other => {
                let val = self.materialize(&other);
                self.deliver_later(ctx, callback_id, DeliverOutcome::Value(val));
            }
        }
        task_id
    }
}

enum DeliverOutcome {
    Value(FakeVal),
    Error { kind: RawKind, message: String },
}

fn read_key(key: FakeVal) -> Key {
    match key {
        FakeVal::Str(s) => Key::Name(s),
        FakeVal::Int(i) => Key::Index(i),
        _ => Key::Name(String::new()),
    }
}

enum Key {
    Name(String),
    Index(i64),
}

impl EngineApi for FakeEngine {
    fn init_context(&self, callback: RawCallback) -> u64 {
        let id = self.next_ctx.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        inner.callback = Some(callback);
        inner.contexts.push(id);
        id
    }

    fn free_context(&self, ctx: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.contexts.retain(|c| *c != ctx);
        let stale: Vec<usize> = inner
            .handles
            .iter()
            .filter(|(_, r)| r.ctx == ctx)
            .map(|(ptr, _)| *ptr)
            .collect();
        for ptr in stale {
            inner.handles.remove(&ptr);
            // The host no longer frees handles of a closed context.
            drop(unsafe { Box::from_raw(ptr as *mut RawValueHandle) });
        }
    }

    fn context_count(&self) -> usize {
        self.inner.lock().unwrap().contexts.len()
    }

    fn alloc_int_value(&self, ctx: u64, val: i64, kind: RawKind) -> *mut RawValueHandle {
        let fv = match kind {
            RawKind::Bool => FakeVal::Bool(val != 0),
            RawKind::Null => FakeVal::Null,
            RawKind::Undefined => FakeVal::Undefined,
            _ => FakeVal::Int(val),
        };
        self.emit(ctx, fv)
    }

    fn alloc_double_value(&self, ctx: u64, val: f64, kind: RawKind) -> *mut RawValueHandle {
        let fv = match kind {
            RawKind::Date => FakeVal::Date(val),
            _ => FakeVal::Double(val),
        };
        self.emit(ctx, fv)
    }

    fn alloc_string_value(&self, ctx: u64, bytes: &[u8], _kind: RawKind) -> *mut RawValueHandle {
        self.emit(ctx, FakeVal::Str(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn free_value(&self, _ctx: u64, raw: *mut RawValueHandle) {
        let removed = self.inner.lock().unwrap().handles.remove(&(raw as usize));
        if removed.is_some() {
            drop(unsafe { Box::from_raw(raw) });
        }
    }

    fn value_count(&self, ctx: u64) -> usize {
        self.inner
            .lock()
            .unwrap()
            .handles
            .values()
            .filter(|r| r.ctx == ctx)
            .count()
    }

    fn get_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        let FakeVal::Obj(id) = self.resolve(obj) else {
            return self.emit_error(ctx, RawKind::ValueException, "not an object");
        };
        let key = read_key(self.resolve(key));
        let found = {
            let inner = self.inner.lock().unwrap();
            match (inner.objects.get(&id), &key) {
                (None, _) => None,
                (Some(data), Key::Name(name))
                    if name == "length" && matches!(data.kind, ObjKind::Array) =>
                {
                    Some(FakeVal::Int(data.elements.len() as i64))
                }
                (Some(data), Key::Name(name)) => data.props.get(name).cloned(),
                (Some(data), Key::Index(i)) => data.elements.get(*i as usize).cloned(),
            }
        };
        match found {
            Some(val) => self.emit(ctx, val),
            None => {
                let text = match key {
                    Key::Name(name) => name,
                    Key::Index(i) => i.to_string(),
                };
                self.emit_error(ctx, RawKind::KeyException, &format!("KeyError: {text}"))
            }
        }
    }

    fn set_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
        val: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        let FakeVal::Obj(id) = self.resolve(obj) else {
            return self.emit_error(ctx, RawKind::ValueException, "not an object");
        };
        let key = read_key(self.resolve(key));
        let val = self.resolve(val);
        let mut inner = self.inner.lock().unwrap();
        let Some(data) = inner.objects.get_mut(&id) else {
            drop(inner);
            return self.emit_error(ctx, RawKind::ValueException, "stale object");
        };
        if data.frozen {
            drop(inner);
            return self.emit_error(
                ctx,
                RawKind::ExecuteException,
                "TypeError: Cannot add property, object is not extensible",
            );
        }
        match key {
            Key::Name(name) => {
                data.props.insert(name, val);
            }
            Key::Index(i) => {
                let i = i as usize;
                if i >= data.elements.len() {
                    data.elements.resize(i + 1, FakeVal::Undefined);
                }
                data.elements[i] = val;
            }
        }
        drop(inner);
        self.emit(ctx, FakeVal::Undefined)
    }

    fn del_object_item(
        &self,
        ctx: u64,
        obj: *mut RawValueHandle,
        key: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        let FakeVal::Obj(id) = self.resolve(obj) else {
            return self.emit_error(ctx, RawKind::ValueException, "not an object");
        };
        let key = read_key(self.resolve(key));
        let mut inner = self.inner.lock().unwrap();
        let Some(data) = inner.objects.get_mut(&id) else {
            drop(inner);
            return self.emit_error(ctx, RawKind::ValueException, "stale object");
        };
        let removed = match &key {
            Key::Name(name) => data.props.remove(name).is_some(),
            Key::Index(i) => {
                let i = *i as usize;
                if i < data.elements.len() {
                    data.elements[i] = FakeVal::Undefined;
                    true
                } else {
                    false
                }
            }
        };
        drop(inner);
        if removed {
            self.emit(ctx, FakeVal::Undefined)
        } else {
            let text = match key {
                Key::Name(name) => name,
                Key::Index(i) => i.to_string(),
            };
            self.emit_error(ctx, RawKind::KeyException, &format!("KeyError: {text}"))
        }
    }

    fn get_own_property_names(&self, ctx: u64, obj: *mut RawValueHandle) -> *mut RawValueHandle {
        let FakeVal::Obj(id) = self.resolve(obj) else {
            return self.emit_error(ctx, RawKind::ValueException, "not an object");
        };
        let names: Vec<FakeVal> = {
            let inner = self.inner.lock().unwrap();
            let Some(data) = inner.objects.get(&id) else {
                drop(inner);
                return self.emit_error(ctx, RawKind::ValueException, "stale object");
            };
            data.props.keys().map(|k| FakeVal::Str(k.clone())).collect()
        };
        let arr = self.new_object(ObjectData {
            kind: ObjKind::Array,
            props: BTreeMap::new(),
            elements: names,
            frozen: false,
        });
        self.emit(ctx, FakeVal::Obj(arr))
    }

    fn get_identity_hash(&self, ctx: u64, obj: *mut RawValueHandle) -> *mut RawValueHandle {
        match self.resolve(obj) {
            FakeVal::Obj(id) => self.emit(ctx, FakeVal::Int(id as i64)),
            _ => self.emit_error(ctx, RawKind::ValueException, "not an object"),
        }
    }

    fn splice_array(
        &self,
        ctx: u64,
        array: *mut RawValueHandle,
        index: i32,
        delete_count: i32,
        insert: *mut RawValueHandle,
    ) -> *mut RawValueHandle {
        let FakeVal::Obj(id) = self.resolve(array) else {
            return self.emit_error(ctx, RawKind::ValueException, "not an array");
        };
        let insert_val = if insert.is_null() {
            None
        } else {
            Some(self.resolve(insert))
        };
        let mut inner = self.inner.lock().unwrap();
        let Some(data) = inner.objects.get_mut(&id) else {
            drop(inner);
            return self.emit_error(ctx, RawKind::ValueException, "stale object");
        };
        if !matches!(data.kind, ObjKind::Array) {
            drop(inner);
            return self.emit_error(ctx, RawKind::ValueException, "not an array");
        }
        let index = index as usize;
        if index > data.elements.len() {
            drop(inner);
            return self.emit_error(ctx, RawKind::ExecuteException, "RangeError: bad splice index");
        }
        let end = (index + delete_count as usize).min(data.elements.len());
        data.elements.drain(index..end);
        if let Some(val) = insert_val {
            data.elements.insert(index, val);
        }
        drop(inner);
        self.emit(ctx, FakeVal::Undefined)
    }

    fn eval(&self, ctx: u64, code: *mut RawValueHandle, callback_id: u64) -> u64 {
        let FakeVal::Str(source) = self.resolve(code) else {
            return self.run_task(
                ctx,
                callback_id,
                Spec::Throw {
                    kind: RawKind::ParseException,
                    message: "SyntaxError: source is not a string".into(),
                },
            );
        };
        let spec = {
            let inner = self.inner.lock().unwrap();
            inner.programs.get(&source).cloned()
        };
        let spec = match spec {
            Some(s) => s,
            None if source == "[]" => Spec::Array(Vec::new()),
            None => Spec::Throw {
                kind: RawKind::ExecuteException,
                message: format!("ReferenceError: not programmed: {source}"),
            },
        };
        self.run_task(ctx, callback_id, spec)
    }

    fn call_function(
        &self,
        ctx: u64,
        func: *mut RawValueHandle,
        this: *mut RawValueHandle,
        argv: *mut RawValueHandle,
        callback_id: u64,
    ) -> u64 {
        let task_id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let func_val = self.resolve(func);
        let this_val = self.resolve(this);
        let argv_val = self.resolve(argv);

        let (func_id, behavior) = match &func_val {
            FakeVal::Obj(id) => {
                let inner = self.inner.lock().unwrap();
                match inner.objects.get(id).map(|o| &o.kind) {
                    Some(ObjKind::Function(FnKind::Spec(s))) => (*id, Behavior::Spec(s.clone())),
                    Some(ObjKind::Function(FnKind::Forward(cb))) => (*id, Behavior::Forward(*cb)),
                    _ => (*id, Behavior::NotCallable),
                }
            }
            _ => (0, Behavior::NotCallable),
        };

        let args: Vec<FakeVal> = match &argv_val {
            FakeVal::Obj(id) => self
                .inner
                .lock()
                .unwrap()
                .objects
                .get(id)
                .map(|o| o.elements.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        {
            let this_is_func_owner = match (&this_val, &func_val) {
                (FakeVal::Obj(a), FakeVal::Obj(b)) => a == b,
                _ => false,
            };
            // Receiver identity is recorded loosely; tests that care pass
            // the owner object as `this`.
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(CallRecord {
                func: func_id,
                this_is_func_owner,
                argc: args.len(),
            });
        }

        let argv_obj = argv_val.clone();
        let engine = self.arc();
        thread::spawn(move || {
            let outcome = match behavior {
                Behavior::NotCallable => DeliverOutcome::Error {
                    kind: RawKind::ExecuteException,
                    message: "TypeError: value is not a function".into(),
                },
                Behavior::Forward(cb) => {
                    let raw = engine.emit(ctx, argv_obj);
                    (engine.stored_callback())(cb, raw);
                    DeliverOutcome::Value(FakeVal::Undefined)
                }
                Behavior::Spec(FnSpec::Return(spec)) => {
                    DeliverOutcome::Value(engine.materialize(&spec))
                }
                Behavior::Spec(FnSpec::EchoArgs) => DeliverOutcome::Value(argv_obj),
                Behavior::Spec(FnSpec::CallFirstArg(spec)) => {
                    let target = args.first().cloned().unwrap_or(FakeVal::Undefined);
                    let forwarded_to = match &target {
                        FakeVal::Obj(id) => {
                            let inner = engine.inner.lock().unwrap();
                            match inner.objects.get(id).map(|o| &o.kind) {
                                Some(ObjKind::Function(FnKind::Forward(cb))) => Some(*cb),
                                _ => None,
                            }
                        }
                        _ => None,
                    };
                    if let Some(cb) = forwarded_to {
                        let raw = match spec.as_ref() {
                            Spec::Throw { kind, message } => {
                                engine.emit_error(ctx, *kind, message)
                            }
                            other => {
                                let payload = engine.materialize(other);
                                let arr = engine.new_object(ObjectData {
                                    kind: ObjKind::Array,
                                    props: BTreeMap::new(),
                                    elements: vec![payload],
                                    frozen: false,
                                });
                                engine.emit(ctx, FakeVal::Obj(arr))
                            }
                        };
                        (engine.stored_callback())(cb, raw);
                    }
                    DeliverOutcome::Value(FakeVal::Undefined)
                }
                Behavior::Spec(FnSpec::Throw { kind, message }) => {
                    DeliverOutcome::Error { kind, message }
                }
            };
            let raw = match outcome {
                DeliverOutcome::Value(val) => engine.emit(ctx, val),
                DeliverOutcome::Error { kind, message } => {
                    engine.emit_error(ctx, kind, &message)
                }
            };
            (engine.stored_callback())(callback_id, raw);
        });
        task_id
    }

    fn heap_stats(&self, ctx: u64, callback_id: u64) -> u64 {
        self.run_task(
            ctx,
            callback_id,
            Spec::Str(
                r#"{"total_physical_size":1048576.0,"total_heap_size_executable":262144.0,"total_heap_size":2097152.0,"used_heap_size":524288.0,"heap_size_limit":268435456.0}"#
                    .into(),
            ),
        )
    }

    fn heap_snapshot(&self, ctx: u64, callback_id: u64) -> u64 {
        self.run_task(ctx, callback_id, Spec::Str(r#"{"snapshot":{}}"#.into()))
    }

    fn cancel_task(&self, _ctx: u64, task_id: u64) {
        let gate = self.inner.lock().unwrap().tasks.remove(&task_id);
        if let Some(gate) = gate {
            *gate.cancelled.lock().unwrap() = true;
            gate.cv.notify_all();
        }
    }

    fn make_js_callback(&self, ctx: u64, callback_id: u64) -> *mut RawValueHandle {
        let id = self.new_object(ObjectData {
            kind: ObjKind::Function(FnKind::Forward(callback_id)),
            props: BTreeMap::new(),
            elements: Vec::new(),
            frozen: false,
        });
        self.emit(ctx, FakeVal::Obj(id))
    }

    fn version(&self) -> String {
        "13.0.0-fake".into()
    }

    fn is_using_sandbox(&self) -> bool {
        false
    }

    fn set_hard_memory_limit(&self, _ctx: u64, limit: usize) {
        self.inner.lock().unwrap().hard_limit = limit;
    }

    fn set_soft_memory_limit(&self, _ctx: u64, limit: usize) {
        self.inner.lock().unwrap().soft_limit = limit;
    }

    fn hard_memory_limit_reached(&self, _ctx: u64) -> bool {
        false
    }

    fn soft_memory_limit_reached(&self, _ctx: u64) -> bool {
        false
    }

    fn low_memory_notification(&self, _ctx: u64) {
        self.inner.lock().unwrap().low_memory_notifications += 1;
    }
}

enum Behavior {
    Spec(FnSpec),
    Forward(u64),
    NotCallable,
}
