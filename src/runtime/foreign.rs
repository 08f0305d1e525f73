//! Foreign objects
//!
//! A [`Foreign`] is an opaque host object. It carries nothing but its
//! identity and host info, and can be passed to guest code as an `anyref`.

use std::fmt;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use super::value::Ref;
use crate::engine::HostRef;

#[derive(Clone)]
pub struct Foreign {
    handle: Handle,
}

impl_handle!(Foreign);

impl Foreign {
    /// A fresh host object with no host info attached
    pub fn new(store: &Store) -> Foreign {
        Self::from_host_ref(store, store.next_host_ref())
    }

    pub(crate) fn from_host_ref(store: &Store, host: HostRef) -> Foreign {
        Foreign {
            handle: Handle::new(store, Object::Foreign(host)),
        }
    }

    /// A reference to this object, for passing as an `anyref`
    pub fn as_ref(&self) -> Ref {
        Ref::from_object(self.store(), self.handle.object())
    }
}

impl fmt::Debug for Foreign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Foreign({:?})", self.handle)
    }
}
