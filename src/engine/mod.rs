//! Execution engine interface
//!
//! The handle layer never touches engine objects directly. Everything it
//! needs goes through [`Backend`], addressed by plain `Copy` indices, with
//! values crossing as [`RawVal`]. Execution is resumable: when guest code
//! calls a host function the backend suspends and hands the call back as a
//! [`Step::HostCall`], so the host callback runs with no engine borrow held
//! and may itself call back into the engine.

pub mod interp;

use serde::{Deserialize, Serialize};

use crate::parser::DecodeError;
use crate::types::{FuncType, GlobalType, MemoryType, TableType, ValueKind};

macro_rules! address {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

address!(FuncAddr);
address!(GlobalAddr);
address!(TableAddr);
address!(MemoryAddr);
address!(ModuleAddr);
address!(InstanceAddr);
address!(
    /// An opaque host object, as carried by an `anyref`
    HostRef
);
address!(
    /// A host callback, as registered with the store
    HostFuncId
);

/// A non-null reference as the engine sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawRef {
    Func(FuncAddr),
    Host(HostRef),
}

/// A value crossing the backend interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawVal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    FuncRef(Option<FuncAddr>),
    AnyRef(Option<RawRef>),
}

impl RawVal {
    pub fn kind(&self) -> ValueKind {
        match self {
            RawVal::I32(_) => ValueKind::I32,
            RawVal::I64(_) => ValueKind::I64,
            RawVal::F32(_) => ValueKind::F32,
            RawVal::F64(_) => ValueKind::F64,
            RawVal::FuncRef(_) => ValueKind::FuncRef,
            RawVal::AnyRef(_) => ValueKind::AnyRef,
        }
    }

    /// Zero for numbers, null for references
    pub fn default_for(kind: ValueKind) -> RawVal {
        match kind {
            ValueKind::I32 => RawVal::I32(0),
            ValueKind::I64 => RawVal::I64(0),
            ValueKind::F32 => RawVal::F32(0.0),
            ValueKind::F64 => RawVal::F64(0.0),
            ValueKind::FuncRef => RawVal::FuncRef(None),
            ValueKind::AnyRef => RawVal::AnyRef(None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawVal::FuncRef(None) | RawVal::AnyRef(None))
    }
}

/// Address of any importable or exportable engine object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternAddr {
    Func(FuncAddr),
    Global(GlobalAddr),
    Table(TableAddr),
    Memory(MemoryAddr),
}

/// Where a call stands after `invoke` or `resume`
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Done(Vec<RawVal>),
    /// Guest code called a host function. Reply with `resume`.
    HostCall {
        func: FuncAddr,
        host: HostFuncId,
        args: Vec<RawVal>,
    },
    Trap(String),
}

/// Result of a successful instantiation. The start function, if any, has not
/// run yet; the caller drives it like any other call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instantiated {
    pub instance: InstanceAddr,
    pub start: Option<FuncAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid module: {0}")]
    Invalid(#[from] DecodeError),
    #[error("Incompatible compiled code: {0}")]
    IncompatibleBlob(String),
    #[error("Link error: {0}")]
    Link(String),
    #[error("Resource limit: {0}")]
    Resource(String),
    #[error("Trap during instantiation: {0}")]
    Trap(String),
}

/// Everything the handle layer needs from an execution engine.
///
/// Addresses handed out by a backend stay valid for the backend's lifetime.
/// Passing an address the backend did not hand out is a contract violation
/// and may panic.
pub trait Backend {
    /// Identifies the producer of compiled-code blobs
    fn name(&self) -> &'static str;

    fn validate(&self, binary: &[u8]) -> bool;

    fn compile(&mut self, binary: &[u8]) -> Result<ModuleAddr, EngineError>;

    /// The engine-specific compiled form of `module`
    fn module_blob(&self, module: ModuleAddr) -> Result<Vec<u8>, EngineError>;

    /// Rebuild a module from its bytes and a blob from `module_blob`. Fails
    /// if the blob came from another engine or does not match `binary`.
    fn load_module(&mut self, binary: &[u8], blob: &[u8]) -> Result<ModuleAddr, EngineError>;

    /// Instantiate `module` with imports in declaration order
    fn instantiate(&mut self, module: ModuleAddr, imports: &[ExternAddr]) -> Result<Instantiated, EngineError>;

    fn instance_export(&self, instance: InstanceAddr, name: &str) -> Option<ExternAddr>;

    fn new_host_func(&mut self, ty: FuncType, host: HostFuncId) -> FuncAddr;

    fn func_type(&self, func: FuncAddr) -> FuncType;

    /// The host callback behind `func`, if it is a host function
    fn func_host(&self, func: FuncAddr) -> Option<HostFuncId>;

    fn invoke(&mut self, func: FuncAddr, args: &[RawVal]) -> Step;

    /// Continue the most recently suspended call with the host's reply
    fn resume(&mut self, reply: Result<Vec<RawVal>, String>) -> Step;

    fn new_global(&mut self, ty: GlobalType, init: RawVal) -> GlobalAddr;
    fn global_type(&self, global: GlobalAddr) -> GlobalType;
    fn global_get(&self, global: GlobalAddr) -> RawVal;
    fn global_set(&mut self, global: GlobalAddr, value: RawVal);

    fn new_table(&mut self, ty: TableType, init: RawVal) -> Result<TableAddr, EngineError>;
    fn table_type(&self, table: TableAddr) -> TableType;
    fn table_size(&self, table: TableAddr) -> u32;
    /// `None` if `index` is out of bounds
    fn table_get(&self, table: TableAddr, index: u32) -> Option<RawVal>;
    fn table_set(&mut self, table: TableAddr, index: u32, value: RawVal) -> bool;
    /// Returns the previous size, or `None` with the table unchanged
    fn table_grow(&mut self, table: TableAddr, delta: u32, init: RawVal) -> Option<u32>;

    fn new_memory(&mut self, ty: MemoryType) -> Result<MemoryAddr, EngineError>;
    fn memory_type(&self, memory: MemoryAddr) -> MemoryType;
    fn memory_pages(&self, memory: MemoryAddr) -> u32;
    fn memory_data(&mut self, memory: MemoryAddr) -> &mut [u8];
    /// Returns the previous size in pages, or `None` with the memory
    /// unchanged
    fn memory_grow(&mut self, memory: MemoryAddr, delta: u32) -> Option<u32>;
}
