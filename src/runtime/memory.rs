//! Linear memories

use std::fmt;

use log::debug;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use crate::engine::MemoryAddr;
use crate::types::MemoryType;

pub use crate::engine::interp::memory::PAGE_SIZE;

#[derive(Clone)]
pub struct Memory {
    handle: Handle,
}

impl_handle!(Memory);

impl Memory {
    /// A zeroed memory of `ty.limits().min` pages; `None` if that is more
    /// than the engine allows
    pub fn new(store: &Store, ty: MemoryType) -> Option<Memory> {
        let created = store.backend_mut().new_memory(ty);
        match created {
            Ok(addr) => Some(Self::from_addr(store, addr)),
            Err(e) => {
                debug!("failed to create memory: {e}");
                None
            }
        }
    }

    pub(crate) fn from_addr(store: &Store, addr: MemoryAddr) -> Memory {
        Memory {
            handle: Handle::new(store, Object::Memory(addr)),
        }
    }

    pub(crate) fn addr(&self) -> MemoryAddr {
        match self.handle.object() {
            Object::Memory(addr) => addr,
            other => unreachable!("memory handle points at {:?}", other),
        }
    }

    /// The declared type
    pub fn ty(&self) -> MemoryType {
        self.store().backend().memory_type(self.addr())
    }

    /// Start of the memory's bytes. Nothing is checked through this pointer,
    /// and `grow` invalidates it.
    pub fn data_ptr(&self) -> *mut u8 {
        self.store().backend_mut().memory_data(self.addr()).as_mut_ptr()
    }

    /// Size in bytes
    pub fn data_size(&self) -> usize {
        self.size() as usize * PAGE_SIZE
    }

    /// Size in pages
    pub fn size(&self) -> u32 {
        self.store().backend().memory_pages(self.addr())
    }

    /// Grow by `delta` pages; false, with nothing changed, past the maximum
    pub fn grow(&self, delta: u32) -> bool {
        self.store().backend_mut().memory_grow(self.addr(), delta).is_some()
    }

    /// Copy of `len` bytes at `offset`; `None` if the range is out of bounds
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        let mut backend = self.store().backend_mut();
        backend.memory_data(self.addr()).get(offset..end).map(<[u8]>::to_vec)
    }

    /// Write `bytes` at `offset`; false, with nothing written, if the range is
    /// out of bounds
    pub fn write(&self, offset: usize, bytes: &[u8]) -> bool {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        let mut backend = self.store().backend_mut();
        match backend.memory_data(self.addr()).get_mut(offset..end) {
            Some(target) => {
                target.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Memory({:?})", self.handle)
    }
}
