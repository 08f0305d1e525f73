//! Tables

use std::fmt;

use log::debug;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use super::value::{Ref, Val};
use crate::engine::{RawVal, TableAddr};
use crate::types::{TableType, ValueKind};

#[derive(Clone)]
pub struct Table {
    handle: Handle,
}

impl_handle!(Table);

impl Table {
    /// A table of `ty.limits().min` elements, each set to `init` (null when
    /// `None`). `None` if `init` cannot be stored in the table or the table
    /// is too large.
    pub fn new(store: &Store, ty: TableType, init: Option<&Ref>) -> Option<Table> {
        let raw = Self::element(store, ty.element(), init)?;
        let created = store.backend_mut().new_table(ty, raw);
        match created {
            Ok(addr) => {
                Self::escape(init);
                Some(Self::from_addr(store, addr))
            }
            Err(e) => {
                debug!("failed to create table: {e}");
                None
            }
        }
    }

    pub(crate) fn from_addr(store: &Store, addr: TableAddr) -> Table {
        Table {
            handle: Handle::new(store, Object::Table(addr)),
        }
    }

    pub(crate) fn addr(&self) -> TableAddr {
        match self.handle.object() {
            Object::Table(addr) => addr,
            other => unreachable!("table handle points at {:?}", other),
        }
    }

    /// The engine value for `value` in a table of `kind`, if it fits
    fn element(store: &Store, kind: ValueKind, value: Option<&Ref>) -> Option<RawVal> {
        let value = match kind {
            ValueKind::FuncRef => Val::FuncRef(value.cloned()),
            _ => Val::AnyRef(value.cloned()),
        };
        if !value.fits(kind) {
            debug!("a {kind} table cannot hold {value}");
            return None;
        }
        Some(value.to_raw(store))
    }

    fn escape(value: Option<&Ref>) {
        if let Some(r) = value {
            r.escape();
        }
    }

    /// The declared type. The minimum is the declared one, not the current
    /// size.
    pub fn ty(&self) -> TableType {
        self.store().backend().table_type(self.addr())
    }

    /// The element at `index`; `None` if it is null or out of bounds
    pub fn get(&self, index: u32) -> Option<Ref> {
        let raw = self.store().backend().table_get(self.addr(), index)?;
        Val::from_raw(self.store(), raw).as_ref().cloned()
    }

    /// Store `value` at `index`. False if `index` is out of bounds or the
    /// value cannot be stored in this table.
    pub fn set(&self, index: u32, value: Option<&Ref>) -> bool {
        let Some(raw) = Self::element(self.store(), self.ty().element(), value) else {
            return false;
        };
        let stored = self.store().backend_mut().table_set(self.addr(), index, raw);
        if stored {
            Self::escape(value);
        }
        stored
    }

    /// The current number of elements
    pub fn size(&self) -> u32 {
        self.store().backend().table_size(self.addr())
    }

    /// Grow by `delta` elements set to `init`. Either the whole growth
    /// happens or, past the maximum, nothing changes and this returns false.
    pub fn grow(&self, delta: u32, init: Option<&Ref>) -> bool {
        let Some(raw) = Self::element(self.store(), self.ty().element(), init) else {
            return false;
        };
        let grown = self.store().backend_mut().table_grow(self.addr(), delta, raw).is_some();
        if grown {
            Self::escape(init);
        }
        grown
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table({:?})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Engine, Foreign, Func};
    use crate::types::{FuncType, Limits};

    fn nop(store: &Store) -> Func {
        Func::new(store, FuncType::default(), |_, _| Ok(vec![]))
    }

    #[test]
    fn test_growth_is_atomic() {
        let store = Store::new(&Engine::new());
        let func = nop(&store);
        let table = Table::new(
            &store,
            TableType::new(ValueKind::FuncRef, Limits::new(1, 2)),
            Some(&func.as_ref()),
        )
        .unwrap();
        assert_eq!(table.size(), 1);

        assert!(!table.grow(3, None));
        assert_eq!(table.size(), 1);
        assert!(table.get(0).unwrap().as_func().unwrap().same(&func));

        assert!(table.grow(1, None));
        assert_eq!(table.size(), 2);
        assert!(table.get(1).is_none());
        assert_eq!(table.ty().limits().min, 1);
    }

    #[test]
    fn test_set_and_get() {
        let store = Store::new(&Engine::new());
        let func = nop(&store);
        let foreign = Foreign::new(&store);
        let table = Table::new(&store, TableType::new(ValueKind::FuncRef, Limits::at_least(2)), None).unwrap();

        assert!(table.set(1, Some(&func.as_ref())));
        assert!(table.get(1).unwrap().as_func().is_some());
        assert!(!table.set(2, Some(&func.as_ref())));
        assert!(!table.set(0, Some(&foreign.as_ref())));
        assert!(table.set(1, None));
        assert!(table.get(1).is_none());
        assert!(table.get(5).is_none());
    }

    #[test]
    fn test_anyref_table_holds_anything() {
        let store = Store::new(&Engine::new());
        let func = nop(&store);
        let foreign = Foreign::new(&store);
        let table = Table::new(&store, TableType::new(ValueKind::AnyRef, Limits::at_least(2)), None).unwrap();
        assert!(table.set(0, Some(&func.as_ref())));
        assert!(table.set(1, Some(&foreign.as_ref())));
        assert!(table.get(0).unwrap().as_func().unwrap().same(&func));
        assert!(table.get(1).unwrap().as_foreign().unwrap().same(&foreign));
    }

    #[test]
    fn test_failed_writes_do_not_keep_callbacks() {
        thread_local! {
            static RELEASED: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
        }
        fn call(_: &(), _: &Store, _: &[Val]) -> Result<Vec<Val>, crate::runtime::Trap> {
            Ok(vec![])
        }
        fn release(_: ()) {
            RELEASED.with(|n| n.set(n.get() + 1));
        }

        let store = Store::new(&Engine::new());
        let table = Table::new(&store, TableType::new(ValueKind::FuncRef, Limits::new(1, 1)), None).unwrap();
        let func = Func::new_with_env(&store, FuncType::default(), (), call, Some(release));
        assert!(!table.set(1, Some(&func.as_ref())));
        assert!(!table.grow(1, Some(&func.as_ref())));
        drop(func);
        assert_eq!(RELEASED.with(|n| n.get()), 1);
    }

    #[test]
    fn test_oversized_table() {
        let store = Store::new(&Engine::new());
        let ty = TableType::new(ValueKind::FuncRef, Limits::at_least(u32::MAX - 1));
        assert!(Table::new(&store, ty, None).is_none());
    }
}
