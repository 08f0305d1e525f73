//! Tables: typed, growable vectors of references
//!
//! A table only ever holds values of its element kind. Slots start out null;
//! growth is all-or-nothing.

use super::RuntimeError;
use crate::engine::RawVal;
use crate::types::TableType;

pub struct Table {
    ty: TableType,
    elements: Vec<RawVal>,
    /// Effective maximum: the declared max capped by the engine config
    max_elements: u32,
}

impl Table {
    /// Create a table of `ty.limits().min` slots, each holding `init`.
    ///
    /// # Errors
    ///
    /// - `TypeMismatch` if `init` is not of the element kind.
    /// - `TableSizeExceeded` if the initial size is beyond `cap`.
    pub fn new(ty: TableType, init: RawVal, cap: u32) -> Result<Self, RuntimeError> {
        let limits = *ty.limits();
        if limits.min > cap {
            return Err(RuntimeError::TableSizeExceeded);
        }
        let table = Table {
            ty,
            elements: Vec::new(),
            max_elements: limits.maximum().map_or(cap, |max| max.min(cap)),
        };
        table.validate_element(&init)?;
        Ok(Table {
            elements: vec![init; limits.min as usize],
            ..table
        })
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn get(&self, index: u32) -> Result<RawVal, RuntimeError> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::TableIndexOutOfBounds(index))
    }

    pub fn set(&mut self, index: u32, value: RawVal) -> Result<(), RuntimeError> {
        self.validate_element(&value)?;
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(RuntimeError::TableIndexOutOfBounds(index))?;
        *slot = value;
        Ok(())
    }

    /// Grow by `delta` slots holding `init`.
    ///
    /// Returns the previous size, or `None` with the table untouched if the
    /// result would exceed the maximum, overflow, or `init` has the wrong
    /// kind.
    pub fn grow(&mut self, delta: u32, init: RawVal) -> Option<u32> {
        let old_size = self.size();
        let new_size = old_size.checked_add(delta)?;
        if new_size > self.max_elements || self.validate_element(&init).is_err() {
            return None;
        }
        self.elements.try_reserve_exact(delta as usize).ok()?;
        self.elements.resize(new_size as usize, init);
        Some(old_size)
    }

    /// table.fill
    pub fn fill(&mut self, index: u32, value: RawVal, len: u32) -> Result<(), RuntimeError> {
        self.validate_element(&value)?;
        let end = index.checked_add(len).filter(|&end| end <= self.size());
        let Some(end) = end else {
            return Err(RuntimeError::TableIndexOutOfBounds(index));
        };
        self.elements[index as usize..end as usize].fill(value);
        Ok(())
    }

    /// Write `values` starting at `offset`, all or nothing
    pub fn init(&mut self, offset: u32, values: &[RawVal]) -> Result<(), RuntimeError> {
        let end = (offset as usize).checked_add(values.len());
        let Some(end) = end.filter(|&end| end <= self.elements.len()) else {
            return Err(RuntimeError::TableIndexOutOfBounds(offset));
        };
        for value in values {
            self.validate_element(value)?;
        }
        self.elements[offset as usize..end].copy_from_slice(values);
        Ok(())
    }

    fn validate_element(&self, value: &RawVal) -> Result<(), RuntimeError> {
        if value.kind() != self.ty.element() {
            return Err(RuntimeError::TypeMismatch {
                expected: self.ty.element().to_string(),
                actual: value.kind().to_string(),
            });
        }
        Ok(())
    }
}
