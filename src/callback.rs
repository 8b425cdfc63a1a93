//! Callback multiplexing for the one-trampoline-per-context ABI.
//!
//! The native library accepts a single bare callback function per context
//! with no userdata pointer, so every asynchronous completion and every
//! JS-visible host callback is dispatched by an integer id. Ids come from
//! one process-wide monotonic counter and are never reused, which keeps
//! contexts independent even though [`registry_trampoline`] is shared.
//!
//! The closures themselves live in a context-scoped table. A small global
//! router maps each live id to a weak reference of its table; after a
//! context is torn down the weak refs die and late deliveries are dropped
//! instead of dereferencing freed state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};

use rustc_hash::FxHashMap;

use crate::abi::RawValueHandle;
use crate::context::ContextState;
use crate::error::EvalError;
use crate::handle::ValueHandle;
use crate::lock;
use crate::value::JsValue;

/// A registered host callback: receives the decoded value, or the decoded
/// engine exception.
pub(crate) type CallbackFn = Box<dyn FnMut(Result<JsValue, EvalError>) + Send>;

// Callbacks are dispatched outside the table lock (entries are
// Arc<Mutex<..>>) so a callback may register new callbacks without
// deadlocking.
type Table = Mutex<FxHashMap<u64, Arc<Mutex<CallbackFn>>>>;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(0);

struct Route {
    table: Weak<Table>,
    ctx: Weak<ContextState>,
}

static ROUTER: LazyLock<Mutex<FxHashMap<u64, Route>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

/// Per-context callback table.
pub(crate) struct CallbackRegistry {
    ctx: Arc<ContextState>,
    table: Arc<Table>,
}

impl CallbackRegistry {
    pub(crate) fn new(ctx: Arc<ContextState>) -> Self {
        CallbackRegistry {
            ctx,
            table: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Store `callback` under a fresh id and return the removal guard.
    /// The entry stays live until the guard is dropped.
    pub(crate) fn register(&self, callback: CallbackFn) -> CallbackRegistration {
        let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
        lock(&self.table).insert(id, Arc::new(Mutex::new(callback)));
        lock(&ROUTER).insert(
            id,
            Route {
                table: Arc::downgrade(&self.table),
                ctx: Arc::downgrade(&self.ctx),
            },
        );
        log::trace!("registered callback {id}");
        CallbackRegistration {
            id,
            table: Arc::downgrade(&self.table),
        }
    }
}

/// Removal guard for one callback entry. Dropping it retires the id; the
/// id is never handed out again.
pub(crate) struct CallbackRegistration {
    id: u64,
    table: Weak<Table>,
}

impl CallbackRegistration {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        lock(&ROUTER).remove(&self.id);
        if let Some(table) = self.table.upgrade() {
            lock(&table).remove(&self.id);
        }
        log::trace!("retired callback {}", self.id);
    }
}

/// The one callback function handed to `mr_init_context`.
///
/// Invoked by the engine (usually on an engine-owned thread) with a
/// callback id and an owned value handle. An id that was never allocated
/// means the native side and this registry disagree, which is a fatal
/// binding bug; an id that was allocated but already retired means a late
/// delivery raced a teardown, which is dropped with a warning (the native
/// value is reclaimed when its context closes).
pub(crate) extern "C" fn registry_trampoline(callback_id: u64, raw: *mut RawValueHandle) {
    let route = {
        let router = lock(&ROUTER);
        router
            .get(&callback_id)
            .map(|r| (r.table.clone(), r.ctx.clone()))
    };

    let Some((table, ctx)) = route else {
        assert!(
            callback_id < NEXT_CALLBACK_ID.load(Ordering::Relaxed),
            "engine delivered callback id {callback_id}, which was never registered"
        );
        log::warn!("dropping late delivery for retired callback {callback_id}");
        return;
    };

    let (Some(table), Some(ctx)) = (table.upgrade(), ctx.upgrade()) else {
        log::warn!("dropping callback {callback_id} delivered after context teardown");
        return;
    };

    let Some(entry) = lock(&table).get(&callback_id).cloned() else {
        log::warn!("dropping late delivery for retired callback {callback_id}");
        return;
    };

    let outcome = ValueHandle::new(ctx, raw).decode();
    let mut cb = lock(&entry);
    (*cb)(outcome);
}
