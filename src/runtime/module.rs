//! Compiled modules
//!
//! A [`Module`] pairs the backend's compiled form with the interface the
//! decoder extracted from the same bytes. Modules can leave their store in
//! two ways: [`Module::share`] for another store in the same process, and
//! [`Module::serialize`] for anywhere. Both carry the module bytes and the
//! backend's compiled code:
//!
//! ```text
//! [LEB128 u64: binary size][binary size bytes: module][rest: compiled code]
//! ```

use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

use log::debug;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;
use crate::engine::ModuleAddr;
use crate::parser::encoding::write_u64_leb;
use crate::parser::{decode_module, DecodeError, ModuleInterface, Reader};
use crate::types::{ExportType, ImportType};
use crate::vec::OwnedVec;

#[derive(Clone)]
pub struct Module {
    handle: Handle,
    binary: Arc<[u8]>,
    interface: Arc<ModuleInterface>,
}

impl_handle!(Module);

impl Module {
    /// Whether `binary` is a module this store's engine accepts
    pub fn validate(store: &Store, binary: &[u8]) -> bool {
        if let Err(e) = decode_module(binary) {
            debug!("module does not validate: {e}");
            return false;
        }
        store.backend().validate(binary)
    }

    /// Decode and compile `binary`; `None`, with the reason logged, if it is
    /// not a valid module
    pub fn new(store: &Store, binary: &[u8]) -> Option<Module> {
        let interface = match decode_module(binary) {
            Ok(interface) => interface,
            Err(e) => {
                debug!("failed to decode module: {e}");
                return None;
            }
        };
        let compiled = store.backend_mut().compile(binary);
        match compiled {
            Ok(addr) => Some(Self::from_parts(store, addr, binary.into(), interface)),
            Err(e) => {
                debug!("failed to compile module: {e}");
                None
            }
        }
    }

    fn from_parts(store: &Store, addr: ModuleAddr, binary: Arc<[u8]>, interface: ModuleInterface) -> Module {
        debug!(
            "module {}: {} imports, {} exports",
            addr.0,
            interface.imports.len(),
            interface.exports.len()
        );
        Module {
            handle: Handle::new(store, Object::Module(addr)),
            binary,
            interface: Arc::new(interface),
        }
    }

    pub(crate) fn addr(&self) -> ModuleAddr {
        match self.handle.object() {
            Object::Module(addr) => addr,
            other => unreachable!("module handle points at {:?}", other),
        }
    }

    pub(crate) fn interface(&self) -> &ModuleInterface {
        &self.interface
    }

    /// Imports in declaration order
    pub fn imports(&self) -> OwnedVec<ImportType> {
        OwnedVec::copy_from(&self.interface.imports)
    }

    /// Exports in declaration order
    pub fn exports(&self) -> OwnedVec<ExportType> {
        OwnedVec::copy_from(&self.interface.exports)
    }

    /// The module in its portable form
    pub fn serialize(&self) -> Option<Vec<u8>> {
        let blob = match self.store().backend().module_blob(self.addr()) {
            Ok(blob) => blob,
            Err(e) => {
                debug!("failed to serialize module: {e}");
                return None;
            }
        };
        let mut bytes = Vec::with_capacity(self.binary.len() + blob.len() + 10);
        write_u64_leb(&mut bytes, self.binary.len() as u64);
        bytes.extend_from_slice(&self.binary);
        bytes.extend_from_slice(&blob);
        Some(bytes)
    }

    /// Rebuild a module from [`Module::serialize`] output. `None` if the
    /// bytes are malformed or the compiled code came from a different engine.
    pub fn deserialize(store: &Store, bytes: &[u8]) -> Option<Module> {
        let (binary, blob) = match split_serialized(bytes) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("malformed serialized module: {e}");
                return None;
            }
        };
        let interface = match decode_module(binary) {
            Ok(interface) => interface,
            Err(e) => {
                debug!("serialized module does not decode: {e}");
                return None;
            }
        };
        let loaded = store.backend_mut().load_module(binary, blob);
        match loaded {
            Ok(addr) => Some(Self::from_parts(store, addr, binary.into(), interface)),
            Err(e) => {
                debug!("failed to load serialized module: {e}");
                None
            }
        }
    }

    /// A thread-safe snapshot that [`Module::obtain`] turns back into a
    /// module, in any store
    pub fn share(&self) -> Option<SharedModule> {
        let bytes = self.serialize()?;
        Some(SharedModule { bytes: bytes.into() })
    }

    /// Rebuild a shared module in `store`; `None` if its compiled code
    /// cannot be loaded by this store's backend
    pub fn obtain(store: &Store, shared: &SharedModule) -> Option<Module> {
        Self::deserialize(store, &shared.bytes)
    }
}

fn split_serialized(bytes: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    let mut reader = Reader::new(bytes);
    let len = reader.read_u64_leb()?;
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    let binary = reader.read_bytes(len)?;
    let blob = reader.read_bytes(reader.remaining())?;
    Ok((binary, blob))
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("handle", &self.handle)
            .field("imports", &self.interface.imports.len())
            .field("exports", &self.interface.exports.len())
            .finish()
    }
}

/// A module detached from its store
#[derive(Clone)]
pub struct SharedModule {
    bytes: Arc<[u8]>,
}

impl fmt::Debug for SharedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.bytes[..self.bytes.len().min(16)];
        write!(f, "SharedModule({} bytes: {}..)", self.bytes.len(), hex::encode(head))
    }
}
