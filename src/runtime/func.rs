//! Functions
//!
//! A [`Func`] is either exported by an instance or created by the host
//! around a callback. Host callbacks are released with the last handle to
//! their function, unless the function has become reachable from guest code
//! (bound as an import, stored in a table or global, or passed as a
//! reference), in which case they live as long as the store.

use std::fmt;
use std::rc::Rc;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use super::trap::Trap;
use super::value::{Ref, Val};
use crate::engine::FuncAddr;
use crate::types::FuncType;

#[derive(Clone)]
pub struct Func {
    handle: Handle,
}

impl_handle!(Func);

/// Owns a callback's environment and hands it to the finalizer on drop
struct Env<E> {
    env: Option<E>,
    finalizer: Option<fn(E)>,
}

impl<E> Drop for Env<E> {
    fn drop(&mut self) {
        if let (Some(env), Some(finalizer)) = (self.env.take(), self.finalizer) {
            finalizer(env);
        }
    }
}

impl Func {
    /// A host function of type `ty`. The callback is released, with its
    /// captures, when the last handle goes, unless guest code can still reach
    /// the function.
    pub fn new(
        store: &Store,
        ty: FuncType,
        callback: impl Fn(&Store, &[Val]) -> Result<Vec<Val>, Trap> + 'static,
    ) -> Func {
        let host = store.register_callback(Rc::new(callback));
        let addr = store.backend_mut().new_host_func(ty, host);
        Self::from_addr(store, addr)
    }

    /// A host function whose callback receives `env`. `finalizer`, if given,
    /// gets the environment back when the callback is released.
    pub fn new_with_env<E: 'static>(
        store: &Store,
        ty: FuncType,
        env: E,
        callback: fn(&E, &Store, &[Val]) -> Result<Vec<Val>, Trap>,
        finalizer: Option<fn(E)>,
    ) -> Func {
        let env = Env {
            env: Some(env),
            finalizer,
        };
        Self::new(store, ty, move |store, args| match &env.env {
            Some(env) => callback(env, store, args),
            None => Err(Trap::new(store, "host environment released")),
        })
    }

    pub(crate) fn from_addr(store: &Store, addr: FuncAddr) -> Func {
        Func {
            handle: Handle::new(store, Object::Func(addr)),
        }
    }

    pub(crate) fn addr(&self) -> FuncAddr {
        match self.handle.object() {
            Object::Func(addr) => addr,
            other => unreachable!("function handle points at {:?}", other),
        }
    }

    /// The function's signature
    pub fn ty(&self) -> FuncType {
        self.store().backend().func_type(self.addr())
    }

    /// Number of parameters
    pub fn param_arity(&self) -> usize {
        self.ty().params().len()
    }

    /// Number of results
    pub fn result_arity(&self) -> usize {
        self.ty().results().len()
    }

    /// A reference to this function, for tables, globals and `funcref`
    /// arguments
    pub fn as_ref(&self) -> Ref {
        Ref::from_object(self.store(), self.handle.object())
    }

    /// Call the function. A trap, in guest code or raised by a host
    /// callback, comes back as `Err`.
    ///
    /// # Panics
    ///
    /// If `args` does not match the parameter types, or holds references
    /// from another store.
    pub fn call(&self, args: &[Val]) -> Result<Vec<Val>, Trap> {
        let ty = self.ty();
        assert_eq!(
            args.len(),
            ty.params().len(),
            "expected {} arguments, got {}",
            ty.params().len(),
            args.len()
        );
        for (index, (arg, kind)) in args.iter().zip(ty.params()).enumerate() {
            assert!(arg.fits(*kind), "argument {index} must be {kind}, got {}", arg.kind());
        }
        self.call_unchecked(args)
    }

    /// Call without checking `args` against the signature. A mismatch gives
    /// an unspecified result or a trap, never undefined behavior.
    pub fn call_unchecked(&self, args: &[Val]) -> Result<Vec<Val>, Trap> {
        let store = self.store();
        let raw = args.iter().map(|arg| arg.to_raw(store)).collect::<Vec<_>>();
        args.iter().for_each(Val::escape);
        let results = store.call_raw(self.addr(), &raw)?;
        Ok(results.into_iter().map(|raw| Val::from_raw(store, raw)).collect())
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func({:?})", self.handle)
    }
}
