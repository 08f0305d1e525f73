//! Array-owning vectors
//!
//! An [`OwnedVec`] is a fixed-length sequence that owns every element it
//! holds and drops all of them when it is dropped. Slots start out empty when
//! the vector is made with [`OwnedVec::uninitialized`]; an empty slot is a
//! known sentinel, never garbage: `get` reports it as `None` and indexing it
//! panics with the slot number.

use std::fmt;
use std::iter::FromIterator;
use std::ops::Index;

pub struct OwnedVec<T> {
    slots: Box<[Option<T>]>,
}

impl<T> OwnedVec<T> {
    /// A vector of `len` empty slots, to be filled with [`OwnedVec::set`]
    pub fn uninitialized(len: usize) -> Self {
        OwnedVec {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::uninitialized(0)
    }

    /// Deep copy of `source`, cloning each element
    pub fn copy_from(source: &[T]) -> Self
    where
        T: Clone,
    {
        source.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fill slot `index`, returning whatever it held before.
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: T) -> Option<T> {
        self.slots[index].replace(value)
    }

    /// Empty slot `index`, handing back its element
    pub fn take(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// The element in slot `index`; `None` if the slot is empty or out of
    /// bounds
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Whether every slot holds an element
    pub fn is_populated(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Populated elements in slot order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    /// The elements as a plain `Vec`, or `None` if any slot is empty (the
    /// vector and its elements are dropped in that case)
    pub fn into_vec(self) -> Option<Vec<T>> {
        Vec::from(self.slots).into_iter().collect()
    }

    /// Give up ownership of the slots without dropping any element.
    ///
    /// The caller becomes responsible for the returned allocation; hand it
    /// back with [`OwnedVec::from_raw_parts`] to release it.
    pub fn release(self) -> (usize, *mut Option<T>) {
        let len = self.slots.len();
        let ptr = Box::into_raw(self.slots) as *mut Option<T>;
        (len, ptr)
    }

    /// Take back ownership of slots given up by [`OwnedVec::release`].
    ///
    /// # Safety
    ///
    /// `len` and `ptr` must come from a single call to `release` on an
    /// `OwnedVec<T>`, and must not have been passed here before.
    pub unsafe fn from_raw_parts(len: usize, ptr: *mut Option<T>) -> Self {
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, len);
        OwnedVec {
            slots: Box::from_raw(slice),
        }
    }
}

impl<T> Default for OwnedVec<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Clone> Clone for OwnedVec<T> {
    fn clone(&self) -> Self {
        OwnedVec {
            slots: self.slots.clone(),
        }
    }
}

impl<T> Index<usize> for OwnedVec<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.slots.get(index) {
            Some(Some(value)) => value,
            Some(None) => panic!("read of empty slot {} in OwnedVec", index),
            None => panic!("index {index} out of bounds for OwnedVec of length {}", self.slots.len()),
        }
    }
}

impl<T> From<Vec<T>> for OwnedVec<T> {
    fn from(values: Vec<T>) -> Self {
        values.into_iter().collect()
    }
}

impl<T> FromIterator<T> for OwnedVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        OwnedVec {
            slots: iter.into_iter().map(Some).collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a OwnedVec<T> {
    type Item = &'a T;
    type IntoIter = std::iter::Flatten<std::slice::Iter<'a, Option<T>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.iter().flatten()
    }
}

impl<T: PartialEq> PartialEq for OwnedVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots
    }
}

impl<T: fmt::Debug> fmt::Debug for OwnedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}
