//! Engines and stores
//!
//! An [`Engine`] is configuration plus a way to build a backend; it is cheap
//! to clone and may be shared between threads. A [`Store`] owns one backend
//! and everything created in it: the handle pool, the host-info table and
//! the registered host callbacks. Stores are single-threaded.
//!
//! # Call flow
//!
//! ```text
//! Func::call ──► Store::call_raw ──► Backend::invoke
//!                     ▲                   │
//!                     │            Step::HostCall
//!                     │                   ▼
//!              Backend::resume ◄── host callback (no backend borrow held)
//! ```
//!
//! A host callback may call back into the store; the backend keeps the
//! suspended calls on a stack, so nested calls unwind innermost first.

use std::any::Any;
use std::cell::{Cell, Ref as CellRef, RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace};

use super::handle::Object;
use super::trap::Trap;
use super::value::Val;
use crate::config::Config;
use crate::engine::interp::Interpreter;
use crate::engine::{Backend, FuncAddr, HostFuncId, HostRef, RawVal, Step};
use crate::types::ValueKind;

/// Builds a fresh backend for each store
pub type BackendFactory = fn(&Config) -> Box<dyn Backend>;

fn interpreter(config: &Config) -> Box<dyn Backend> {
    Box::new(Interpreter::new(config.clone()))
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Config,
    factory: BackendFactory,
}

impl Engine {
    /// An engine with the default configuration and the bundled interpreter
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// The bundled interpreter with `config`
    pub fn with_config(config: Config) -> Self {
        Self::with_backend(config, interpreter)
    }

    /// An engine whose stores get their backend from `factory`
    pub fn with_backend(config: Config, factory: BackendFactory) -> Self {
        Engine {
            inner: Arc::new(EngineInner { config, factory }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("config", &self.inner.config).finish()
    }
}

/// A host callback as the store keeps it
pub(crate) type Callback = Rc<dyn Fn(&Store, &[Val]) -> Result<Vec<Val>, Trap>>;

struct HostFunc {
    callback: Callback,
    /// Set once the function is reachable from guest code; the callback then
    /// lives as long as the store
    pinned: bool,
}

/// One host-info record. Records attached to the same object form a chain
/// through `prev`, newest first.
struct HostInfo {
    data: Rc<dyn Any>,
    finalizer: Option<Box<dyn FnOnce(Rc<dyn Any>)>>,
    prev: Option<usize>,
}

struct Slot {
    object: Object,
    refs: usize,
    /// Newest host-info record
    info: Option<usize>,
}

/// Reference counts for every object a handle points at, keyed by object
/// identity. Freed slots and info records are reused.
///
/// Objects the engine can hand back to the host (anything that escaped into
/// guest-visible state, and instance exports) are `kept`: when their last
/// handle goes, a slot carrying host info stays behind with no references,
/// so a handle fetched later sees the same info. Kept chains are finalized
/// when the store drops.
#[derive(Default)]
struct HandlePool {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    by_object: HashMap<Object, usize>,
    infos: Vec<Option<HostInfo>>,
    free_infos: Vec<usize>,
    kept: HashSet<Object>,
}

impl HandlePool {
    fn retain_object(&mut self, object: Object) -> usize {
        if let Some(&slot) = self.by_object.get(&object) {
            self.retain(slot);
            return slot;
        }
        let entry = Slot {
            object,
            refs: 1,
            info: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.by_object.insert(object, slot);
        slot
    }

    fn slot_mut(&mut self, slot: usize) -> &mut Slot {
        match self.slots.get_mut(slot).and_then(Option::as_mut) {
            Some(entry) => entry,
            None => panic!("handle slot {} is not live", slot),
        }
    }

    fn retain(&mut self, slot: usize) {
        self.slot_mut(slot).refs += 1;
    }

    /// Drop one reference. When it was the last, the slot is freed and its
    /// host-info chain handed back, newest first. A kept object's slot stays
    /// while it has host info, and nothing is handed back.
    fn release(&mut self, slot: usize) -> Option<(Object, Vec<HostInfo>)> {
        let entry = self.slot_mut(slot);
        entry.refs -= 1;
        if entry.refs > 0 {
            return None;
        }
        let (has_info, object) = (entry.info.is_some(), entry.object);
        if has_info && self.kept.contains(&object) {
            return None;
        }
        let entry = self.slots[slot].take()?;
        self.free.push(slot);
        self.by_object.remove(&entry.object);
        Some((entry.object, self.take_chain(entry.info)))
    }

    fn take_chain(&mut self, mut next: Option<usize>) -> Vec<HostInfo> {
        let mut chain = vec![];
        while let Some(index) = next {
            let Some(info) = self.infos[index].take() else {
                break;
            };
            self.free_infos.push(index);
            next = info.prev;
            chain.push(info);
        }
        chain
    }

    fn keep(&mut self, object: Object) {
        self.kept.insert(object);
    }

    /// Every remaining host-info chain, each newest first
    fn drain(&mut self) -> Vec<Vec<HostInfo>> {
        let heads = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.take().and_then(|entry| entry.info))
            .collect::<Vec<_>>();
        self.free.clear();
        self.by_object.clear();
        heads.into_iter().map(|head| self.take_chain(Some(head))).collect()
    }

    fn attach(&mut self, slot: usize, data: Rc<dyn Any>, finalizer: Option<Box<dyn FnOnce(Rc<dyn Any>)>>) {
        let prev = self.slot_mut(slot).info;
        let info = HostInfo { data, finalizer, prev };
        let index = match self.free_infos.pop() {
            Some(index) => {
                self.infos[index] = Some(info);
                index
            }
            None => {
                self.infos.push(Some(info));
                self.infos.len() - 1
            }
        };
        self.slot_mut(slot).info = Some(index);
    }

    fn newest_info(&self, slot: usize) -> Option<Rc<dyn Any>> {
        let index = self.slots.get(slot)?.as_ref()?.info?;
        self.infos.get(index)?.as_ref().map(|info| Rc::clone(&info.data))
    }

    fn live(&self) -> usize {
        self.slots.iter().flatten().filter(|entry| entry.refs > 0).count()
    }
}

pub(crate) struct StoreInner {
    engine: Engine,
    backend: RefCell<Box<dyn Backend>>,
    pool: RefCell<HandlePool>,
    host_funcs: RefCell<Vec<Option<HostFunc>>>,
    next_id: Cell<u32>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let chains = self.pool.get_mut().drain();
        if !chains.is_empty() {
            trace!("finalizing host info of {} kept objects", chains.len());
        }
        for info in chains.into_iter().flatten() {
            if let Some(finalizer) = info.finalizer {
                finalizer(info.data);
            }
        }
    }
}

/// A single-threaded collection of engine objects
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    /// A store with a fresh backend from `engine`
    pub fn new(engine: &Engine) -> Self {
        let backend = (engine.inner.factory)(engine.config());
        debug!("created store with the {} backend", backend.name());
        Store {
            inner: Rc::new(StoreInner {
                engine: engine.clone(),
                backend: RefCell::new(backend),
                pool: RefCell::new(HandlePool::default()),
                host_funcs: RefCell::new(vec![]),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Whether `self` and `other` are the same store
    pub fn same(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Objects that currently have at least one live handle
    pub fn live_handles(&self) -> usize {
        self.inner.pool.borrow().live()
    }

    pub(crate) fn backend(&self) -> CellRef<'_, Box<dyn Backend>> {
        self.inner.backend.borrow()
    }

    pub(crate) fn backend_mut(&self) -> RefMut<'_, Box<dyn Backend>> {
        self.inner.backend.borrow_mut()
    }

    /// A fresh identity for objects the backend does not know about
    pub(crate) fn next_id(&self) -> u32 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    pub(crate) fn next_host_ref(&self) -> HostRef {
        HostRef(self.next_id())
    }

    pub(crate) fn retain_object(&self, object: Object) -> usize {
        self.inner.pool.borrow_mut().retain_object(object)
    }

    pub(crate) fn retain(&self, slot: usize) {
        self.inner.pool.borrow_mut().retain(slot);
    }

    /// Release one handle. Finalizers and callback destructors run after
    /// every store borrow is given up, so they may use the store.
    pub(crate) fn release(&self, slot: usize) {
        let released = self.inner.pool.borrow_mut().release(slot);
        let Some((object, chain)) = released else {
            return;
        };
        trace!("last handle to {object:?} released");
        for info in chain {
            if let Some(finalizer) = info.finalizer {
                finalizer(info.data);
            }
        }
        if let Object::Func(func) = object {
            let host = self.backend().func_host(func);
            if let Some(host) = host {
                let callback = self.drop_callback(host);
                drop(callback);
            }
        }
    }

    pub(crate) fn attach_host_info(
        &self,
        slot: usize,
        data: Rc<dyn Any>,
        finalizer: Option<Box<dyn FnOnce(Rc<dyn Any>)>>,
    ) {
        self.inner.pool.borrow_mut().attach(slot, data, finalizer);
    }

    pub(crate) fn host_info(&self, slot: usize) -> Option<Rc<dyn Any>> {
        self.inner.pool.borrow().newest_info(slot)
    }

    pub(crate) fn register_callback(&self, callback: Callback) -> HostFuncId {
        let mut host_funcs = self.inner.host_funcs.borrow_mut();
        host_funcs.push(Some(HostFunc {
            callback,
            pinned: false,
        }));
        HostFuncId(host_funcs.len() as u32 - 1)
    }

    /// Record that the engine holds `object` where the host can fetch it
    /// again: its host info outlives its handles, and a function's callback
    /// is pinned.
    pub(crate) fn escape(&self, object: Object) {
        if let Object::Func(func) = object {
            self.pin(func);
        }
        self.inner.pool.borrow_mut().keep(object);
    }

    /// Keep the callback behind `func` alive for the rest of the store's life
    fn pin(&self, func: FuncAddr) {
        let host = self.backend().func_host(func);
        if let Some(host) = host {
            if let Some(Some(entry)) = self.inner.host_funcs.borrow_mut().get_mut(host.index()) {
                if !entry.pinned {
                    trace!("pinning host function {}", host.0);
                    entry.pinned = true;
                }
            }
        }
    }

    /// Take an unpinned callback out of the registry, for the caller to drop
    fn drop_callback(&self, host: HostFuncId) -> Option<Callback> {
        let mut host_funcs = self.inner.host_funcs.borrow_mut();
        let entry = host_funcs.get_mut(host.index())?;
        if entry.as_ref()?.pinned {
            return None;
        }
        entry.take().map(|entry| entry.callback)
    }

    /// Run `func` to completion, answering every host call it makes
    pub(crate) fn call_raw(&self, func: FuncAddr, args: &[RawVal]) -> Result<Vec<RawVal>, Trap> {
        let mut step = self.backend_mut().invoke(func, args);
        loop {
            match step {
                Step::Done(results) => return Ok(results),
                Step::Trap(message) => {
                    debug!("call trapped: {message}");
                    return Err(Trap::new(self, message));
                }
                Step::HostCall { func, host, args } => {
                    let reply = self.call_host(func, host, args);
                    step = self.backend_mut().resume(reply);
                }
            }
        }
    }

    fn call_host(&self, func: FuncAddr, host: HostFuncId, args: Vec<RawVal>) -> Result<Vec<RawVal>, String> {
        let callback = self
            .inner
            .host_funcs
            .borrow()
            .get(host.index())
            .and_then(|entry| entry.as_ref().map(|entry| Rc::clone(&entry.callback)));
        let Some(callback) = callback else {
            return Err("host function has been released".into());
        };
        let ty = self.backend().func_type(func);
        trace!("calling host function {} with {} arguments", host.0, args.len());

        let args = args.into_iter().map(|raw| Val::from_raw(self, raw)).collect::<Vec<_>>();
        let results = callback(self, &args).map_err(|trap| trap.message().to_string())?;

        let kinds = results.iter().map(Val::kind).collect::<Vec<ValueKind>>();
        if kinds != ty.results() {
            return Err(format!(
                "host function returned {} results of the wrong type, expected {}",
                results.len(),
                ty
            ));
        }
        let raw = results.iter().map(|val| val.to_raw(self)).collect();
        results.iter().for_each(Val::escape);
        Ok(raw)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend().name())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_object(n: u32) -> Object {
        Object::Foreign(HostRef(n))
    }

    #[test]
    fn test_pool_shares_slots_by_identity() {
        let mut pool = HandlePool::default();
        let a = pool.retain_object(slot_object(1));
        let b = pool.retain_object(slot_object(1));
        let c = pool.retain_object(slot_object(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.live(), 2);

        assert!(pool.release(a).is_none());
        assert!(pool.release(b).is_some());
        assert_eq!(pool.live(), 1);

        // freed slots are reused
        let d = pool.retain_object(slot_object(3));
        assert_eq!(d, a);
    }

    #[test]
    fn test_host_info_chain_is_newest_first() {
        let mut pool = HandlePool::default();
        let slot = pool.retain_object(slot_object(1));
        pool.attach(slot, Rc::new("first"), None);
        pool.attach(slot, Rc::new("second"), None);

        let newest = pool.newest_info(slot).unwrap();
        assert_eq!(newest.downcast_ref::<&str>(), Some(&"second"));

        let (_, chain) = pool.release(slot).unwrap();
        let order = chain
            .iter()
            .map(|info| *info.data.downcast_ref::<&str>().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(order, ["second", "first"]);
        assert_eq!(pool.free_infos.len(), 2);
    }

    #[test]
    fn test_kept_slot_outlives_its_handles() {
        let mut pool = HandlePool::default();
        let object = slot_object(1);
        pool.keep(object);
        let slot = pool.retain_object(object);
        pool.attach(slot, Rc::new("info"), None);

        assert!(pool.release(slot).is_none());
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.retain_object(object), slot);
        assert_eq!(pool.newest_info(slot).unwrap().downcast_ref::<&str>(), Some(&"info"));
        assert!(pool.release(slot).is_none());

        let chains = pool.drain();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].len(), 1);
        assert_eq!(pool.free_infos.len(), 1);
    }

    #[test]
    fn test_kept_slot_without_info_is_freed() {
        let mut pool = HandlePool::default();
        pool.keep(slot_object(1));
        let slot = pool.retain_object(slot_object(1));
        assert!(pool.release(slot).is_some());
        assert!(pool.drain().is_empty());
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();

        let engine = Engine::with_config(Config::default().with_max_call_depth(10));
        let store = Store::new(&engine);
        assert_eq!(store.engine().config().max_call_depth, 10);
        assert!(store.same(&store.clone()));
        assert!(!store.same(&Store::new(&engine)));
    }
}
