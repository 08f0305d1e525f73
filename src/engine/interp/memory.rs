//! Linear memory
//!
//! Every access is bounds-checked before the underlying bytes are touched;
//! an access that does not fit is an "out of bounds memory access" trap.
//! Effective addresses are computed in 64 bits so `base + offset` can never
//! wrap.

use std::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};

use super::RuntimeError;
use crate::types::MemoryType;

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: usize = 65536;

#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    /// As declared; reported back by `ty`
    ty: MemoryType,
    /// Effective maximum: the declared max capped by the engine config
    max_pages: u32,
}

impl Memory {
    /// Create a zeroed memory of `ty.limits().min` pages.
    ///
    /// # Errors
    ///
    /// If the initial size is beyond `cap_pages`.
    pub fn new(ty: MemoryType, cap_pages: u32) -> Result<Self, RuntimeError> {
        let limits = *ty.limits();
        if limits.min > cap_pages {
            return Err(RuntimeError::MemoryError(format!(
                "initial memory size {} pages exceeds the limit of {cap_pages} pages",
                limits.min
            )));
        }
        let max_pages = limits.maximum().map_or(cap_pages, |max| max.min(cap_pages));

        Ok(Memory {
            data: vec![0u8; limits.min as usize * PAGE_SIZE],
            ty,
            max_pages,
        })
    }

    pub fn ty(&self) -> MemoryType {
        self.ty
    }

    /// Current size in pages
    pub fn size(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow by `delta` pages, zero-filling the new space.
    ///
    /// Returns the previous size in pages, or `None` with the memory
    /// untouched if the result would exceed the maximum or cannot be
    /// allocated.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let current = self.size();
        let new_pages = current.checked_add(delta)?;
        if new_pages > self.max_pages {
            return None;
        }
        let new_len = new_pages as usize * PAGE_SIZE;
        self.data.try_reserve_exact(new_len - self.data.len()).ok()?;
        self.data.resize(new_len, 0);
        Some(current)
    }

    #[inline]
    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, RuntimeError> {
        let end = addr.checked_add(len as u64).ok_or(RuntimeError::OutOfBoundsMemory)?;
        if end > self.data.len() as u64 {
            return Err(RuntimeError::OutOfBoundsMemory);
        }
        Ok(addr as usize..end as usize)
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8], RuntimeError> {
        let range = self.range(addr, len)?;
        Ok(&self.data[range])
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), RuntimeError> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, RuntimeError> {
        Ok(self.read_bytes(addr, 1)?[0])
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, RuntimeError> {
        Ok(LittleEndian::read_u16(self.read_bytes(addr, 2)?))
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, RuntimeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(addr, 4)?))
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, RuntimeError> {
        Ok(LittleEndian::read_u64(self.read_bytes(addr, 8)?))
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), RuntimeError> {
        self.write_bytes(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), RuntimeError> {
        let range = self.range(addr, 2)?;
        LittleEndian::write_u16(&mut self.data[range], value);
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), RuntimeError> {
        let range = self.range(addr, 4)?;
        LittleEndian::write_u32(&mut self.data[range], value);
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), RuntimeError> {
        let range = self.range(addr, 8)?;
        LittleEndian::write_u64(&mut self.data[range], value);
        Ok(())
    }

    /// memory.fill
    pub fn fill(&mut self, addr: u64, value: u8, len: u64) -> Result<(), RuntimeError> {
        let range = self.range(addr, usize::try_from(len).map_err(|_| RuntimeError::OutOfBoundsMemory)?)?;
        self.data[range].fill(value);
        Ok(())
    }

    /// memory.copy, with overlapping ranges allowed
    pub fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<(), RuntimeError> {
        let len = usize::try_from(len).map_err(|_| RuntimeError::OutOfBoundsMemory)?;
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?;
        self.data.copy_within(src, dst.start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    const CAP: u32 = 65536;

    fn pages(min: u32) -> MemoryType {
        MemoryType::new(Limits::at_least(min))
    }

    #[test]
    fn test_memory_creation() {
        let mem = Memory::new(pages(1), CAP).unwrap();
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.data().len(), PAGE_SIZE);

        let mem = Memory::new(MemoryType::new(Limits::new(1, 10)), CAP).unwrap();
        assert_eq!(mem.max_pages, 10);
        assert_eq!(mem.ty().limits().maximum(), Some(10));
    }

    #[test]
    fn test_memory_creation_beyond_cap() {
        assert!(Memory::new(pages(3), 2).is_err());
        let mem = Memory::new(MemoryType::new(Limits::new(1, 100)), 4).unwrap();
        // declared max is reported, the cap is enforced
        assert_eq!(mem.ty().limits().max, 100);
        assert_eq!(mem.max_pages, 4);
    }

    #[test]
    fn test_memory_grow() {
        let mut mem = Memory::new(MemoryType::new(Limits::new(1, 10)), CAP).unwrap();

        assert_eq!(mem.grow(2), Some(1));
        assert_eq!(mem.size(), 3);
        assert_eq!(mem.data().len(), 3 * PAGE_SIZE);

        assert_eq!(mem.grow(7), Some(3));
        assert_eq!(mem.size(), 10);

        assert_eq!(mem.grow(1), None);
        assert_eq!(mem.size(), 10);
        assert_eq!(mem.grow(0), Some(10));
    }

    #[test]
    fn test_memory_grow_overflow() {
        let mut mem = Memory::new(pages(1), CAP).unwrap();
        assert_eq!(mem.grow(u32::MAX), None);
        assert_eq!(mem.size(), 1);
    }

    #[test]
    fn test_bounds_checking() {
        let mem = Memory::new(pages(2), CAP).unwrap();

        assert!(mem.read_u8(0x1ffff).is_ok());
        assert!(mem.read_bytes(0, 2 * PAGE_SIZE).is_ok());
        assert!(matches!(mem.read_u8(0x20000), Err(RuntimeError::OutOfBoundsMemory)));
        assert!(mem.read_u32(0x1fffd).is_err());
        assert!(mem.read_u8(u64::MAX).is_err());
        assert!(mem.read_bytes(u64::MAX - 1, 4).is_err());
    }

    #[test]
    fn test_little_endian_storage() {
        let mut mem = Memory::new(pages(1), CAP).unwrap();
        mem.write_u32(100, 0x12345678).unwrap();
        assert_eq!(mem.read_bytes(100, 4).unwrap(), &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.read_u16(102).unwrap(), 0x1234);

        mem.write_u64(3, 0x123456789ABCDEF0).unwrap();
        assert_eq!(mem.read_u64(3).unwrap(), 0x123456789ABCDEF0);
    }

    #[test]
    fn test_grow_preserves_and_zeroes() {
        let mut mem = Memory::new(pages(1), CAP).unwrap();
        mem.write_u32(0, 0xDEADBEEF).unwrap();
        assert_eq!(mem.grow(1), Some(1));
        assert_eq!(mem.read_u32(0).unwrap(), 0xDEADBEEF);
        assert_eq!(mem.read_u32(PAGE_SIZE as u64).unwrap(), 0);
    }

    #[test]
    fn test_fill_and_copy() {
        let mut mem = Memory::new(pages(1), CAP).unwrap();
        mem.write_bytes(0, &[1, 2, 3, 4]).unwrap();
        mem.copy_within(2, 0, 4).unwrap();
        assert_eq!(mem.read_bytes(0, 6).unwrap(), &[1, 2, 1, 2, 3, 4]);
        mem.fill(1, 9, 2).unwrap();
        assert_eq!(mem.read_bytes(0, 4).unwrap(), &[1, 9, 9, 2]);
        assert!(mem.fill(PAGE_SIZE as u64 - 1, 0, 2).is_err());
        assert!(mem.copy_within(0, PAGE_SIZE as u64, 1).is_err());
        // zero-length accesses at the end are in bounds
        assert!(mem.fill(PAGE_SIZE as u64, 0, 0).is_ok());
    }
}
