//! Globals

use std::fmt;

use log::debug;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use super::value::Val;
use crate::engine::GlobalAddr;
use crate::types::GlobalType;

#[derive(Clone)]
pub struct Global {
    handle: Handle,
}

impl_handle!(Global);

impl Global {
    /// A new global holding `value`; `None` if `value` does not fit the
    /// content type
    pub fn new(store: &Store, ty: GlobalType, value: Val) -> Option<Global> {
        if !value.fits(ty.content()) {
            debug!("global of type {ty} cannot hold {value}");
            return None;
        }
        let raw = value.to_raw(store);
        let addr = store.backend_mut().new_global(ty, raw);
        value.escape();
        Some(Self::from_addr(store, addr))
    }

    pub(crate) fn from_addr(store: &Store, addr: GlobalAddr) -> Global {
        Global {
            handle: Handle::new(store, Object::Global(addr)),
        }
    }

    pub(crate) fn addr(&self) -> GlobalAddr {
        match self.handle.object() {
            Object::Global(addr) => addr,
            other => unreachable!("global handle points at {:?}", other),
        }
    }

    /// Content type and mutability
    pub fn ty(&self) -> GlobalType {
        self.store().backend().global_type(self.addr())
    }

    /// The current value
    pub fn get(&self) -> Val {
        let raw = self.store().backend().global_get(self.addr());
        Val::from_raw(self.store(), raw)
    }

    /// # Panics
    ///
    /// If the global is immutable or `value` does not fit its content type.
    pub fn set(&self, value: Val) {
        let ty = self.ty();
        assert!(ty.is_mutable(), "cannot set immutable global of type {}", ty);
        assert!(value.fits(ty.content()), "global of type {} cannot hold {}", ty, value);
        let raw = value.to_raw(self.store());
        self.store().backend_mut().global_set(self.addr(), raw);
        value.escape();
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Global({:?})", self.handle)
    }
}
