//! WebAssembly values as the host sees them

use fhex::ToHex;
use std::fmt;

use super::foreign::Foreign;
use super::func::Func;
use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use crate::engine::{RawRef, RawVal};
use crate::types::ValueKind;

/// A reference to a function or a foreign object
#[derive(Clone)]
pub struct Ref {
    pub(crate) handle: Handle,
}

impl_handle!(Ref);

impl Ref {
    pub(crate) fn from_object(store: &Store, object: Object) -> Ref {
        Ref {
            handle: Handle::new(store, object),
        }
    }

    /// The referenced function, if this refers to one
    pub fn as_func(&self) -> Option<Func> {
        match self.handle.object() {
            Object::Func(addr) => Some(Func::from_addr(self.store(), addr)),
            _ => None,
        }
    }

    /// The referenced host object, if this refers to one
    pub fn as_foreign(&self) -> Option<Foreign> {
        match self.handle.object() {
            Object::Foreign(host) => Some(Foreign::from_host_ref(self.store(), host)),
            _ => None,
        }
    }

    /// The engine's view of this reference
    pub(crate) fn to_raw(&self, store: &Store) -> RawRef {
        self.handle.assert_store(store);
        match self.handle.object() {
            Object::Func(addr) => RawRef::Func(addr),
            Object::Foreign(host) => RawRef::Host(host),
            other => panic!("{:?} cannot be used as a reference", other),
        }
    }

    /// Call once the engine has accepted this reference
    pub(crate) fn escape(&self) {
        self.store().escape(self.handle.object());
    }

    pub(crate) fn from_raw(store: &Store, raw: RawRef) -> Ref {
        match raw {
            RawRef::Func(addr) => Ref::from_object(store, Object::Func(addr)),
            RawRef::Host(host) => Ref::from_object(store, Object::Foreign(host)),
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:?})", self.handle)
    }
}

/// A value passed to or returned from guest code.
///
/// Reference values own a handle, so `Val` is `Clone` but not `Copy`.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    AnyRef(Option<Ref>),
    FuncRef(Option<Ref>),
}

impl Val {
    pub fn kind(&self) -> ValueKind {
        match self {
            Val::I32(_) => ValueKind::I32,
            Val::I64(_) => ValueKind::I64,
            Val::F32(_) => ValueKind::F32,
            Val::F64(_) => ValueKind::F64,
            Val::AnyRef(_) => ValueKind::AnyRef,
            Val::FuncRef(_) => ValueKind::FuncRef,
        }
    }

    /// Zero for numbers, null for references
    pub fn default_for(kind: ValueKind) -> Val {
        match kind {
            ValueKind::I32 => Val::I32(0),
            ValueKind::I64 => Val::I64(0),
            ValueKind::F32 => Val::F32(0.0),
            ValueKind::F64 => Val::F64(0.0),
            ValueKind::AnyRef => Val::AnyRef(None),
            ValueKind::FuncRef => Val::FuncRef(None),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Val::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Val::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// The reference held by a reference value; `None` for null and for
    /// numbers
    pub fn as_ref(&self) -> Option<&Ref> {
        match self {
            Val::AnyRef(r) | Val::FuncRef(r) => r.as_ref(),
            _ => None,
        }
    }

    /// Whether this value may live in a slot of `kind`: matching kinds, and a
    /// funcref may only hold a function
    pub(crate) fn fits(&self, kind: ValueKind) -> bool {
        match self {
            Val::FuncRef(Some(r)) => kind == ValueKind::FuncRef && r.as_func().is_some(),
            _ => self.kind() == kind,
        }
    }

    /// # Panics
    ///
    /// If a reference belongs to another store, or a funcref holds something
    /// other than a function.
    pub(crate) fn to_raw(&self, store: &Store) -> RawVal {
        match self {
            Val::I32(v) => RawVal::I32(*v),
            Val::I64(v) => RawVal::I64(*v),
            Val::F32(v) => RawVal::F32(*v),
            Val::F64(v) => RawVal::F64(*v),
            Val::AnyRef(r) => RawVal::AnyRef(r.as_ref().map(|r| r.to_raw(store))),
            Val::FuncRef(r) => RawVal::FuncRef(r.as_ref().map(|r| match r.to_raw(store) {
                RawRef::Func(addr) => addr,
                RawRef::Host(_) => panic!("funcref holds a foreign object"),
            })),
        }
    }

    /// Call once the engine has accepted this value
    pub(crate) fn escape(&self) {
        if let Some(r) = self.as_ref() {
            r.escape();
        }
    }

    pub(crate) fn from_raw(store: &Store, raw: RawVal) -> Val {
        match raw {
            RawVal::I32(v) => Val::I32(v),
            RawVal::I64(v) => Val::I64(v),
            RawVal::F32(v) => Val::F32(v),
            RawVal::F64(v) => Val::F64(v),
            RawVal::AnyRef(r) => Val::AnyRef(r.map(|r| Ref::from_raw(store, r))),
            RawVal::FuncRef(addr) => Val::FuncRef(addr.map(|addr| Ref::from_object(store, Object::Func(addr)))),
        }
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::I32(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::I64(v)
    }
}

impl From<f32> for Val {
    fn from(v: f32) -> Self {
        Val::F32(v)
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::F64(v)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "i32:{v}"),
            Val::I64(v) => write!(f, "i64:{v}"),
            Val::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Val::F64(v) => write!(f, "f64:{}", v.to_hex()),
            Val::AnyRef(None) => write!(f, "anyref:null"),
            Val::FuncRef(None) => write!(f, "funcref:null"),
            Val::AnyRef(Some(r)) => write!(f, "anyref:{:?}", r.handle),
            Val::FuncRef(Some(r)) => write!(f, "funcref:{:?}", r.handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Engine;

    #[test]
    fn test_kinds_and_conversions() {
        assert_eq!(Val::from(42i32).kind(), ValueKind::I32);
        assert_eq!(Val::from(42i64).as_i64(), Some(42));
        assert_eq!(Val::from(1.5f32).as_f32(), Some(1.5));
        assert_eq!(Val::from(2.5f64).as_i32(), None);
        for kind in [ValueKind::I32, ValueKind::F64, ValueKind::AnyRef, ValueKind::FuncRef] {
            assert_eq!(Val::default_for(kind).kind(), kind);
        }
        assert_eq!(Val::FuncRef(None).as_ref(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Val::I32(42).to_string(), "i32:42");
        assert_eq!(Val::I64(-1).to_string(), "i64:-1");
        assert_eq!(Val::AnyRef(None).to_string(), "anyref:null");
        // fhex renders the exact bits; just check the prefix
        assert!(Val::F32(42.0).to_string().starts_with("f32:"));
        assert!(Val::F64(42.0).to_string().starts_with("f64:"));
    }

    #[test]
    fn test_raw_round_trip_keeps_identity() {
        let store = Store::new(&Engine::new());
        let foreign = Foreign::new(&store);
        let val = Val::AnyRef(Some(foreign.as_ref()));
        let raw = val.to_raw(&store);
        let back = Val::from_raw(&store, raw);
        assert_eq!(back, val);
        assert!(back.as_ref().unwrap().as_foreign().unwrap().same(&foreign));
        assert!(back.as_ref().unwrap().as_func().is_none());
    }

    #[test]
    fn test_funcref_must_hold_a_function() {
        let store = Store::new(&Engine::new());
        let foreign = Foreign::new(&store);
        assert!(Val::AnyRef(Some(foreign.as_ref())).fits(ValueKind::AnyRef));
        assert!(!Val::FuncRef(Some(foreign.as_ref())).fits(ValueKind::FuncRef));
        assert!(Val::FuncRef(None).fits(ValueKind::FuncRef));
        assert!(!Val::I32(0).fits(ValueKind::I64));
    }
}
