//! Externs: anything that can be imported or exported

use super::func::Func;
use super::global::Global;
use super::memory::Memory;
use super::store::Store;
use super::table::Table;
use crate::engine::ExternAddr;
use crate::types::{ExternKind, ExternType, Limits, MemoryType, TableType};

#[derive(Debug, Clone)]
pub enum Extern {
    Func(Func),
    Global(Global),
    Table(Table),
    Memory(Memory),
}

impl Extern {
    /// The kind of object this extern wraps
    pub fn kind(&self) -> ExternKind {
        match self {
            Extern::Func(_) => ExternKind::Func,
            Extern::Global(_) => ExternKind::Global,
            Extern::Table(_) => ExternKind::Table,
            Extern::Memory(_) => ExternKind::Memory,
        }
    }

    /// The declared type
    pub fn ty(&self) -> ExternType {
        match self {
            Extern::Func(func) => func.ty().into(),
            Extern::Global(global) => global.ty().into(),
            Extern::Table(table) => table.ty().into(),
            Extern::Memory(memory) => memory.ty().into(),
        }
    }

    /// The type to match against an import: tables and memories report
    /// their current size as the minimum
    pub(crate) fn live_type(&self) -> ExternType {
        match self {
            Extern::Table(table) => {
                let ty = table.ty();
                let limits = Limits {
                    min: table.size(),
                    max: ty.limits().max,
                };
                TableType::new(ty.element(), limits).into()
            }
            Extern::Memory(memory) => MemoryType::new(Limits {
                min: memory.size(),
                max: memory.ty().limits().max,
            })
            .into(),
            _ => self.ty(),
        }
    }

    /// The function, if this is one
    pub fn as_func(&self) -> Option<&Func> {
        match self {
            Extern::Func(func) => Some(func),
            _ => None,
        }
    }

    /// The global, if this is one
    pub fn as_global(&self) -> Option<&Global> {
        match self {
            Extern::Global(global) => Some(global),
            _ => None,
        }
    }

    /// The table, if this is one
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Extern::Table(table) => Some(table),
            _ => None,
        }
    }

    /// The memory, if this is one
    pub fn as_memory(&self) -> Option<&Memory> {
        match self {
            Extern::Memory(memory) => Some(memory),
            _ => None,
        }
    }

    /// The store the wrapped object lives in
    pub fn store(&self) -> &Store {
        match self {
            Extern::Func(func) => func.store(),
            Extern::Global(global) => global.store(),
            Extern::Table(table) => table.store(),
            Extern::Memory(memory) => memory.store(),
        }
    }

    pub(crate) fn addr(&self) -> ExternAddr {
        match self {
            Extern::Func(func) => ExternAddr::Func(func.addr()),
            Extern::Global(global) => ExternAddr::Global(global.addr()),
            Extern::Table(table) => ExternAddr::Table(table.addr()),
            Extern::Memory(memory) => ExternAddr::Memory(memory.addr()),
        }
    }

    pub(crate) fn from_addr(store: &Store, addr: ExternAddr) -> Extern {
        match addr {
            ExternAddr::Func(addr) => Extern::Func(Func::from_addr(store, addr)),
            ExternAddr::Global(addr) => Extern::Global(Global::from_addr(store, addr)),
            ExternAddr::Table(addr) => Extern::Table(Table::from_addr(store, addr)),
            ExternAddr::Memory(addr) => Extern::Memory(Memory::from_addr(store, addr)),
        }
    }

    /// Whether both refer to the same object
    pub fn same(&self, other: &Extern) -> bool {
        match (self, other) {
            (Extern::Func(a), Extern::Func(b)) => a.same(b),
            (Extern::Global(a), Extern::Global(b)) => a.same(b),
            (Extern::Table(a), Extern::Table(b)) => a.same(b),
            (Extern::Memory(a), Extern::Memory(b)) => a.same(b),
            _ => false,
        }
    }
}

impl From<Func> for Extern {
    fn from(func: Func) -> Self {
        Extern::Func(func)
    }
}

impl From<Global> for Extern {
    fn from(global: Global) -> Self {
        Extern::Global(global)
    }
}

impl From<Table> for Extern {
    fn from(table: Table) -> Self {
        Extern::Table(table)
    }
}

impl From<Memory> for Extern {
    fn from(memory: Memory) -> Self {
        Extern::Memory(memory)
    }
}
