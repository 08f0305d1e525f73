//! Instantiation
//!
//! The module's import list is authoritative: the host passes exactly one
//! extern per declared import, in declaration order. Every extern is checked
//! against its declaration before the backend sees any of them, so a failed
//! instantiation leaves nothing behind that the host can observe.

use std::fmt;

use log::debug;

use super::external::Extern;
use super::handle::{impl_handle, Handle, Object};
use super::imports::Imports;
use super::module::Module;
use super::store::Store;
use crate::engine::{EngineError, InstanceAddr};
use crate::types::{ExternKind, ExternType};
use crate::vec::OwnedVec;

#[derive(Debug, thiserror::Error)]
pub enum InstantiationError {
    #[error("Expected {expected} imports, got {actual}")]
    ImportCount { expected: usize, actual: usize },
    #[error("Missing import {module}.{name}")]
    MissingImport { module: String, name: String },
    #[error("Import {module}.{name} must be a {expected}, got a {actual}")]
    ImportKind {
        module: String,
        name: String,
        expected: ExternKind,
        actual: ExternKind,
    },
    #[error("Incompatible import type for {module}.{name}: expected {expected}, got {actual}")]
    ImportType {
        module: String,
        name: String,
        expected: ExternType,
        actual: ExternType,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Start function trapped: {0}")]
    Start(String),
}

#[derive(Clone)]
pub struct Instance {
    handle: Handle,
    module: Module,
}

impl_handle!(Instance);

impl Instance {
    /// Instantiate `module`; `None`, with the reason logged, if the imports
    /// do not match or instantiation traps
    pub fn new(store: &Store, module: &Module, imports: &[Extern]) -> Option<Instance> {
        match Self::try_new(store, module, imports) {
            Ok(instance) => Some(instance),
            Err(e) => {
                debug!("instantiation failed: {e}");
                None
            }
        }
    }

    /// Instantiate `module` with imports looked up by name
    pub fn with_imports(store: &Store, module: &Module, imports: &Imports) -> Option<Instance> {
        let resolved = imports.resolve(module).and_then(|externs| Self::try_new(store, module, &externs));
        match resolved {
            Ok(instance) => Some(instance),
            Err(e) => {
                debug!("instantiation failed: {e}");
                None
            }
        }
    }

    /// # Panics
    ///
    /// If `module` or any import belongs to a different store.
    pub fn try_new(store: &Store, module: &Module, imports: &[Extern]) -> Result<Instance, InstantiationError> {
        assert!(module.store().same(store), "module belongs to a different store");
        let declared = &module.interface().imports;
        if imports.len() != declared.len() {
            return Err(InstantiationError::ImportCount {
                expected: declared.len(),
                actual: imports.len(),
            });
        }

        for (import, supplied) in declared.iter().zip(imports) {
            assert!(
                supplied.store().same(store),
                "import {}.{} belongs to a different store",
                import.module(),
                import.name()
            );
            let expected = import.ty();
            if supplied.kind() != expected.kind() {
                return Err(InstantiationError::ImportKind {
                    module: import.module().to_string(),
                    name: import.name().to_string(),
                    expected: expected.kind(),
                    actual: supplied.kind(),
                });
            }
            let actual = supplied.live_type();
            if !actual.matches(expected) {
                return Err(InstantiationError::ImportType {
                    module: import.module().to_string(),
                    name: import.name().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let addrs = imports.iter().map(Extern::addr).collect::<Vec<_>>();
        let instantiated = store.backend_mut().instantiate(module.addr(), &addrs)?;
        if let Some(start) = instantiated.start {
            store
                .call_raw(start, &[])
                .map_err(|trap| InstantiationError::Start(trap.message().to_string()))?;
        }
        // the instance now holds every import
        for addr in addrs {
            store.escape(Object::from(addr));
        }

        debug!("instantiated module {} as instance {}", module.addr().0, instantiated.instance.0);
        Ok(Instance {
            handle: Handle::new(store, Object::Instance(instantiated.instance)),
            module: module.clone(),
        })
    }

    fn addr(&self) -> InstanceAddr {
        match self.handle.object() {
            Object::Instance(addr) => addr,
            other => unreachable!("instance handle points at {:?}", other),
        }
    }

    /// Exports in the order the module declares them
    pub fn exports(&self) -> OwnedVec<Extern> {
        let names = &self.module.interface().exports;
        let mut exports = OwnedVec::uninitialized(names.len());
        for (index, export) in names.iter().enumerate() {
            if let Some(export) = self.export(export.name()) {
                exports.set(index, export);
            }
        }
        exports
    }

    /// The export called `name`
    pub fn export(&self, name: &str) -> Option<Extern> {
        let addr = self.store().backend().instance_export(self.addr(), name)?;
        self.store().escape(Object::from(addr));
        Some(Extern::from_addr(self.store(), addr))
    }

    /// The module this instance was created from
    pub fn module(&self) -> &Module {
        &self.module
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({:?})", self.handle)
    }
}
