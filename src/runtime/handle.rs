//! Shared handles
//!
//! Every public handle type wraps a [`Handle`]: the store it belongs to plus
//! a slot in the store's handle pool. Cloning a handle bumps the slot's
//! reference count; dropping the last one runs the object's finalizers.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use super::store::Store;
use crate::engine::{ExternAddr, FuncAddr, GlobalAddr, HostRef, InstanceAddr, MemoryAddr, ModuleAddr, TableAddr};

/// Identity of anything a handle can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Object {
    Module(ModuleAddr),
    Instance(InstanceAddr),
    Func(FuncAddr),
    Global(GlobalAddr),
    Table(TableAddr),
    Memory(MemoryAddr),
    Trap(u32),
    Foreign(HostRef),
}

impl From<ExternAddr> for Object {
    fn from(addr: ExternAddr) -> Object {
        match addr {
            ExternAddr::Func(addr) => Object::Func(addr),
            ExternAddr::Global(addr) => Object::Global(addr),
            ExternAddr::Table(addr) => Object::Table(addr),
            ExternAddr::Memory(addr) => Object::Memory(addr),
        }
    }
}

pub(crate) struct Handle {
    store: Store,
    slot: usize,
    object: Object,
}

impl Handle {
    pub(crate) fn new(store: &Store, object: Object) -> Handle {
        let slot = store.retain_object(object);
        Handle {
            store: store.clone(),
            slot,
            object,
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn object(&self) -> Object {
        self.object
    }

    /// # Panics
    ///
    /// If the two handles live in different stores.
    pub(crate) fn assert_store(&self, store: &Store) {
        assert!(self.store.same(store), "handle belongs to a different store");
    }

    pub(crate) fn same(&self, other: &Handle) -> bool {
        self.store.same(&other.store) && self.object == other.object
    }

    pub(crate) fn set_host_info<T: Any>(&self, info: T) {
        self.store.attach_host_info(self.slot, Rc::new(info), None);
    }

    pub(crate) fn set_host_info_with_finalizer<T: Any>(&self, info: T, finalizer: impl FnOnce(T) + 'static) {
        let finalize = move |data: Rc<dyn Any>| {
            if let Ok(data) = data.downcast::<T>() {
                if let Ok(info) = Rc::try_unwrap(data) {
                    finalizer(info);
                }
            }
        };
        self.store.attach_host_info(self.slot, Rc::new(info), Some(Box::new(finalize)));
    }

    /// `f` sees the newest record, or `None` when there is none or it is not
    /// a `T`
    pub(crate) fn with_host_info<T: Any, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let data = self.store.host_info(self.slot);
        f(data.as_deref().and_then(|data| data.downcast_ref::<T>()))
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        self.store.retain(self.slot);
        Handle {
            store: self.store.clone(),
            slot: self.slot,
            object: self.object,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.store.release(self.slot);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.object)
    }
}

/// The operations every handle type shares
macro_rules! impl_handle {
    ($name:ident) => {
        impl $name {
            /// Another handle to the same object
            pub fn copy(&self) -> Self {
                self.clone()
            }

            /// Whether both handles refer to the same object
            pub fn same(&self, other: &Self) -> bool {
                self.handle.same(&other.handle)
            }

            pub fn store(&self) -> &crate::runtime::Store {
                self.handle.store()
            }

            /// Attach host data. Earlier records stay attached until the
            /// object dies.
            pub fn set_host_info<T: std::any::Any>(&self, info: T) {
                self.handle.set_host_info(info);
            }

            /// Attach host data that is passed to `finalizer` when the object
            /// dies: when its last handle is released, or, for an object the
            /// engine can still hand back, when the store is dropped
            pub fn set_host_info_with_finalizer<T: std::any::Any>(&self, info: T, finalizer: impl FnOnce(T) + 'static) {
                self.handle.set_host_info_with_finalizer(info, finalizer);
            }

            pub fn with_host_info<T: std::any::Any, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
                self.handle.with_host_info(f)
            }
        }
    };
}

pub(crate) use impl_handle;
