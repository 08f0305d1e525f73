//! Interpreter backend
//!
//! A compact stack-machine interpreter behind the [`Backend`] interface.
//! Modules are decoded and compiled once into [`CompiledModule`]s; every
//! engine object lives in the [`ObjectStore`] and is addressed by index.

pub mod executor;
pub mod instruction;
pub mod memory;
pub mod module;
pub mod ops;
pub mod stack;
pub mod table;

use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use self::executor::{Machine, Outcome};
use self::instruction::FuncBody;
use self::memory::Memory;
use self::module::{CompiledModule, DataMode, ElementMode};
use self::table::Table;
use super::{
    Backend, EngineError, ExternAddr, FuncAddr, GlobalAddr, HostFuncId, InstanceAddr, Instantiated, MemoryAddr,
    ModuleAddr, RawVal, Step, TableAddr,
};
use crate::config::Config;
use crate::parser::ConstExpr;
use crate::types::{ExternKind, ExternType, FuncType, GlobalType, Limits, MemoryType, TableType};

/// Identifies this backend in compiled-code blobs
pub const ENGINE_NAME: &str = "wasm-embed-interp";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversion,
    #[error("out of bounds memory access")]
    OutOfBoundsMemory,
    #[error("out of bounds table access")]
    TableIndexOutOfBounds(u32),
    #[error("table size exceeds the limit")]
    TableSizeExceeded,
    #[error("undefined element")]
    UndefinedElement,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackOverflow,
    #[error("value stack exhausted")]
    ValueStackExhausted,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("local index out of bounds: {0}")]
    LocalIndexOutOfBounds(u32),
    #[error("unknown {space} {index}")]
    UnknownIndex { space: &'static str, index: u32 },
    #[error("branch target {0} out of range")]
    BadJump(usize),
    #[error("memory error: {0}")]
    MemoryError(String),
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

pub enum FuncInst {
    Wasm {
        ty: FuncType,
        instance: InstanceAddr,
        body: Rc<FuncBody>,
    },
    Host {
        ty: FuncType,
        host: HostFuncId,
    },
}

impl FuncInst {
    pub fn ty(&self) -> &FuncType {
        match self {
            FuncInst::Wasm { ty, .. } | FuncInst::Host { ty, .. } => ty,
        }
    }
}

pub struct GlobalInst {
    pub ty: GlobalType,
    pub value: RawVal,
}

struct InstanceInst {
    module: Rc<CompiledModule>,
    funcs: Vec<FuncAddr>,
    tables: Vec<TableAddr>,
    memories: Vec<MemoryAddr>,
    globals: Vec<GlobalAddr>,
    exports: Vec<(String, ExternAddr)>,
}

fn unknown(space: &'static str, index: u32) -> RuntimeError {
    RuntimeError::UnknownIndex { space, index }
}

/// Every engine object the interpreter has created. Objects are never freed
/// before the interpreter itself.
#[derive(Default)]
pub struct ObjectStore {
    modules: Vec<Rc<CompiledModule>>,
    instances: Vec<InstanceInst>,
    funcs: Vec<FuncInst>,
    globals: Vec<GlobalInst>,
    tables: Vec<Table>,
    memories: Vec<Memory>,
}

impl ObjectStore {
    pub fn func(&self, func: FuncAddr) -> Result<&FuncInst, RuntimeError> {
        self.funcs.get(func.index()).ok_or(unknown("function address", func.0))
    }

    pub fn global(&self, global: GlobalAddr) -> Result<&GlobalInst, RuntimeError> {
        self.globals.get(global.index()).ok_or(unknown("global address", global.0))
    }

    pub fn global_mut(&mut self, global: GlobalAddr) -> Result<&mut GlobalInst, RuntimeError> {
        self.globals.get_mut(global.index()).ok_or(unknown("global address", global.0))
    }

    pub fn table(&self, table: TableAddr) -> Result<&Table, RuntimeError> {
        self.tables.get(table.index()).ok_or(unknown("table address", table.0))
    }

    pub fn table_mut(&mut self, table: TableAddr) -> Result<&mut Table, RuntimeError> {
        self.tables.get_mut(table.index()).ok_or(unknown("table address", table.0))
    }

    pub fn memory(&self, memory: MemoryAddr) -> Result<&Memory, RuntimeError> {
        self.memories.get(memory.index()).ok_or(unknown("memory address", memory.0))
    }

    pub fn memory_mut(&mut self, memory: MemoryAddr) -> Result<&mut Memory, RuntimeError> {
        self.memories.get_mut(memory.index()).ok_or(unknown("memory address", memory.0))
    }

    fn instance(&self, instance: InstanceAddr) -> Result<&InstanceInst, RuntimeError> {
        self.instances.get(instance.index()).ok_or(unknown("instance", instance.0))
    }

    pub fn instance_func(&self, instance: InstanceAddr, index: u32) -> Result<FuncAddr, RuntimeError> {
        self.instance(instance)?.funcs.get(index as usize).copied().ok_or(unknown("function", index))
    }

    pub fn instance_table(&self, instance: InstanceAddr, index: u32) -> Result<TableAddr, RuntimeError> {
        self.instance(instance)?.tables.get(index as usize).copied().ok_or(unknown("table", index))
    }

    pub fn instance_global(&self, instance: InstanceAddr, index: u32) -> Result<GlobalAddr, RuntimeError> {
        self.instance(instance)?.globals.get(index as usize).copied().ok_or(unknown("global", index))
    }

    pub fn instance_memory(&self, instance: InstanceAddr) -> Result<MemoryAddr, RuntimeError> {
        self.instance(instance)?.memories.first().copied().ok_or(unknown("memory", 0))
    }

    pub fn instance_type(&self, instance: InstanceAddr, index: u32) -> Result<&FuncType, RuntimeError> {
        self.instance(instance)?
            .module
            .interface
            .types
            .get(index as usize)
            .ok_or(unknown("type", index))
    }

    /// The type an extern has right now: tables and memories report their
    /// current size as the minimum
    fn live_type(&self, addr: ExternAddr) -> Result<ExternType, RuntimeError> {
        Ok(match addr {
            ExternAddr::Func(func) => ExternType::Func(self.func(func)?.ty().clone()),
            ExternAddr::Global(global) => ExternType::Global(self.global(global)?.ty),
            ExternAddr::Table(table) => {
                let table = self.table(table)?;
                let limits = Limits {
                    min: table.size(),
                    max: table.ty().limits().max,
                };
                ExternType::Table(TableType::new(table.ty().element(), limits))
            }
            ExternAddr::Memory(memory) => {
                let memory = self.memory(memory)?;
                ExternType::Memory(MemoryType::new(Limits {
                    min: memory.size(),
                    max: memory.ty().limits().max,
                }))
            }
        })
    }

    fn eval_const(&self, expr: &ConstExpr, globals: &[GlobalAddr], funcs: &[FuncAddr]) -> Result<RawVal, RuntimeError> {
        Ok(match *expr {
            ConstExpr::I32(value) => RawVal::I32(value),
            ConstExpr::I64(value) => RawVal::I64(value),
            ConstExpr::F32(bits) => RawVal::F32(f32::from_bits(bits)),
            ConstExpr::F64(bits) => RawVal::F64(f64::from_bits(bits)),
            ConstExpr::GlobalGet(index) => {
                let global = globals.get(index as usize).copied().ok_or(unknown("global", index))?;
                self.global(global)?.value
            }
            ConstExpr::RefNull(kind) => RawVal::default_for(kind),
            ConstExpr::RefFunc(index) => RawVal::FuncRef(Some(
                funcs.get(index as usize).copied().ok_or(unknown("function", index))?,
            )),
        })
    }
}

/// The compiled-code blob: pre-decoded function bodies, tagged with the
/// producing engine and the module they belong to
#[derive(Serialize, Deserialize)]
struct Blob {
    engine: String,
    version: String,
    binary_len: usize,
    functions: Vec<FuncBody>,
}

pub struct Interpreter {
    config: Config,
    objects: ObjectStore,
    /// Calls waiting on a host function, innermost last
    suspended: Vec<Machine>,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        Interpreter {
            config,
            objects: ObjectStore::default(),
            suspended: vec![],
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn settle(&mut self, machine: Machine, outcome: Result<Outcome, RuntimeError>) -> Step {
        match outcome {
            Ok(Outcome::Done(results)) => Step::Done(results),
            Ok(Outcome::HostCall { func, host, args }) => {
                self.suspended.push(machine);
                Step::HostCall { func, host, args }
            }
            Err(e) => {
                debug!("trap: {e}");
                Step::Trap(e.to_string())
            }
        }
    }

    fn add_module(&mut self, module: CompiledModule) -> ModuleAddr {
        self.objects.modules.push(Rc::new(module));
        ModuleAddr(self.objects.modules.len() as u32 - 1)
    }

    fn alloc_func(&mut self, func: FuncInst) -> FuncAddr {
        self.objects.funcs.push(func);
        FuncAddr(self.objects.funcs.len() as u32 - 1)
    }

    fn alloc_global(&mut self, ty: GlobalType, value: RawVal) -> GlobalAddr {
        self.objects.globals.push(GlobalInst { ty, value });
        GlobalAddr(self.objects.globals.len() as u32 - 1)
    }

    fn alloc_table(&mut self, ty: TableType, init: RawVal) -> Result<TableAddr, EngineError> {
        let table =
            Table::new(ty, init, self.config.max_table_elements).map_err(|e| EngineError::Resource(e.to_string()))?;
        self.objects.tables.push(table);
        Ok(TableAddr(self.objects.tables.len() as u32 - 1))
    }

    fn alloc_memory(&mut self, ty: MemoryType) -> Result<MemoryAddr, EngineError> {
        let memory = Memory::new(ty, self.config.max_memory_pages).map_err(|e| EngineError::Resource(e.to_string()))?;
        self.objects.memories.push(memory);
        Ok(MemoryAddr(self.objects.memories.len() as u32 - 1))
    }

    /// Apply active element and data segments, in that order. A segment
    /// that does not fit traps; segments applied before it stay applied.
    fn initialize(&mut self, instance: InstanceAddr) -> Result<(), RuntimeError> {
        let inst = self.objects.instance(instance)?;
        let module = Rc::clone(&inst.module);
        let globals = inst.globals.clone();
        let funcs = inst.funcs.clone();
        let tables = inst.tables.clone();
        let memories = inst.memories.clone();

        for segment in &module.elements {
            let ElementMode::Active { table, offset } = &segment.mode else {
                continue;
            };
            let offset = match self.objects.eval_const(offset, &globals, &funcs)? {
                RawVal::I32(offset) => offset as u32,
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "i32".into(),
                        actual: other.kind().to_string(),
                    })
                }
            };
            let values = segment
                .items
                .iter()
                .map(|item| self.objects.eval_const(item, &globals, &funcs))
                .collect::<Result<Vec<_>, _>>()?;
            let table = tables.get(*table as usize).copied().ok_or(unknown("table", *table))?;
            self.objects.table_mut(table)?.init(offset, &values)?;
        }

        for segment in &module.data {
            let DataMode::Active { memory, offset } = &segment.mode else {
                continue;
            };
            let offset = match self.objects.eval_const(offset, &globals, &funcs)? {
                RawVal::I32(offset) => offset as u32,
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        expected: "i32".into(),
                        actual: other.kind().to_string(),
                    })
                }
            };
            let memory = memories.get(*memory as usize).copied().ok_or(unknown("memory", *memory))?;
            self.objects.memory_mut(memory)?.write_bytes(offset as u64, &segment.bytes)?;
        }

        Ok(())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new(Config::default())
    }
}

impl Backend for Interpreter {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn validate(&self, binary: &[u8]) -> bool {
        match CompiledModule::compile(binary) {
            Ok(_) => true,
            Err(e) => {
                debug!("validation failed: {e}");
                false
            }
        }
    }

    fn compile(&mut self, binary: &[u8]) -> Result<ModuleAddr, EngineError> {
        let module = CompiledModule::compile(binary)?;
        Ok(self.add_module(module))
    }

    fn module_blob(&self, module: ModuleAddr) -> Result<Vec<u8>, EngineError> {
        let compiled = &self.objects.modules[module.index()];
        let blob = Blob {
            engine: ENGINE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            binary_len: compiled.binary_len,
            functions: compiled.bodies.iter().map(|body| FuncBody::clone(body)).collect(),
        };
        serde_json::to_vec(&blob).map_err(|e| EngineError::IncompatibleBlob(e.to_string()))
    }

    fn load_module(&mut self, binary: &[u8], blob: &[u8]) -> Result<ModuleAddr, EngineError> {
        let blob: Blob = serde_json::from_slice(blob).map_err(|e| EngineError::IncompatibleBlob(e.to_string()))?;
        if blob.engine != ENGINE_NAME {
            return Err(EngineError::IncompatibleBlob(format!("produced by {}", blob.engine)));
        }
        if blob.version != env!("CARGO_PKG_VERSION") {
            return Err(EngineError::IncompatibleBlob(format!("produced by version {}", blob.version)));
        }
        if blob.binary_len != binary.len() {
            return Err(EngineError::IncompatibleBlob(format!(
                "compiled for a {} byte module, got {} bytes",
                blob.binary_len,
                binary.len()
            )));
        }
        let module = CompiledModule::with_bodies(binary, blob.functions)?;
        Ok(self.add_module(module))
    }

    fn instantiate(&mut self, module: ModuleAddr, imports: &[ExternAddr]) -> Result<Instantiated, EngineError> {
        let module = self
            .objects
            .modules
            .get(module.index())
            .cloned()
            .ok_or_else(|| EngineError::Link(format!("unknown module {}", module.0)))?;
        let declared = &module.interface.imports;
        if imports.len() != declared.len() {
            return Err(EngineError::Link(format!(
                "expected {} imports, got {}",
                declared.len(),
                imports.len()
            )));
        }

        let instance = InstanceAddr(self.objects.instances.len() as u32);
        let mut funcs = vec![];
        let mut tables = vec![];
        let mut memories = vec![];
        let mut globals = vec![];

        for (import, addr) in declared.iter().zip(imports) {
            let actual = self.objects.live_type(*addr).map_err(|e| EngineError::Link(e.to_string()))?;
            if !actual.matches(import.ty()) {
                return Err(EngineError::Link(format!(
                    "incompatible import type for {}.{}: expected {}, got {}",
                    import.module(),
                    import.name(),
                    import.ty(),
                    actual
                )));
            }
            match *addr {
                ExternAddr::Func(func) => funcs.push(func),
                ExternAddr::Table(table) => tables.push(table),
                ExternAddr::Memory(memory) => memories.push(memory),
                ExternAddr::Global(global) => globals.push(global),
            }
        }

        let (imported_funcs, imported_tables, imported_memories, imported_globals) = module.interface.import_counts();
        for (ty, body) in module.interface.funcs[imported_funcs..].iter().zip(&module.bodies) {
            funcs.push(self.alloc_func(FuncInst::Wasm {
                ty: ty.clone(),
                instance,
                body: Rc::clone(body),
            }));
        }
        for ty in &module.interface.tables[imported_tables..] {
            tables.push(self.alloc_table(*ty, RawVal::default_for(ty.element()))?);
        }
        for ty in &module.interface.memories[imported_memories..] {
            memories.push(self.alloc_memory(*ty)?);
        }
        for (ty, init) in module.interface.globals[imported_globals..].iter().zip(&module.global_inits) {
            let value = self
                .objects
                .eval_const(init, &globals, &funcs)
                .map_err(|e| EngineError::Link(e.to_string()))?;
            globals.push(self.alloc_global(*ty, value));
        }

        let exports = module
            .exports
            .iter()
            .map(|export| {
                let index = export.index as usize;
                let addr = match export.kind {
                    ExternKind::Func => funcs.get(index).copied().map(ExternAddr::Func),
                    ExternKind::Table => tables.get(index).copied().map(ExternAddr::Table),
                    ExternKind::Memory => memories.get(index).copied().map(ExternAddr::Memory),
                    ExternKind::Global => globals.get(index).copied().map(ExternAddr::Global),
                };
                addr.map(|addr| (export.name.clone(), addr))
                    .ok_or_else(|| EngineError::Link(format!("unresolved export {:?}", export.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let start = match module.start {
            Some(index) => Some(
                funcs
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| EngineError::Link(format!("unknown start function {index}")))?,
            ),
            None => None,
        };

        self.objects.instances.push(InstanceInst {
            module: Rc::clone(&module),
            funcs,
            tables,
            memories,
            globals,
            exports,
        });
        self.initialize(instance).map_err(|e| EngineError::Trap(e.to_string()))?;

        debug!("instantiated module as instance {}", instance.0);
        Ok(Instantiated { instance, start })
    }

    fn instance_export(&self, instance: InstanceAddr, name: &str) -> Option<ExternAddr> {
        let inst = self.objects.instances.get(instance.index())?;
        inst.exports
            .iter()
            .find(|(export, _)| export == name)
            .map(|(_, addr)| *addr)
    }

    fn new_host_func(&mut self, ty: FuncType, host: HostFuncId) -> FuncAddr {
        self.alloc_func(FuncInst::Host { ty, host })
    }

    fn func_type(&self, func: FuncAddr) -> FuncType {
        self.objects.funcs[func.index()].ty().clone()
    }

    fn func_host(&self, func: FuncAddr) -> Option<HostFuncId> {
        match self.objects.funcs.get(func.index())? {
            FuncInst::Host { host, .. } => Some(*host),
            FuncInst::Wasm { .. } => None,
        }
    }

    fn invoke(&mut self, func: FuncAddr, args: &[RawVal]) -> Step {
        let outer_depth = self.suspended.iter().map(Machine::depth).sum();
        let mut machine = Machine::new(&self.config, outer_depth);
        let outcome = machine.start(&mut self.objects, func, args);
        self.settle(machine, outcome)
    }

    fn resume(&mut self, reply: Result<Vec<RawVal>, String>) -> Step {
        let Some(mut machine) = self.suspended.pop() else {
            return Step::Trap("no suspended call to resume".into());
        };
        match reply {
            Ok(results) => {
                let outcome = machine.resume(&mut self.objects, results);
                self.settle(machine, outcome)
            }
            Err(message) => Step::Trap(message),
        }
    }

    fn new_global(&mut self, ty: GlobalType, init: RawVal) -> GlobalAddr {
        self.alloc_global(ty, init)
    }

    fn global_type(&self, global: GlobalAddr) -> GlobalType {
        self.objects.globals[global.index()].ty
    }

    fn global_get(&self, global: GlobalAddr) -> RawVal {
        self.objects.globals[global.index()].value
    }

    fn global_set(&mut self, global: GlobalAddr, value: RawVal) {
        self.objects.globals[global.index()].value = value;
    }

    fn new_table(&mut self, ty: TableType, init: RawVal) -> Result<TableAddr, EngineError> {
        self.alloc_table(ty, init)
    }

    fn table_type(&self, table: TableAddr) -> TableType {
        self.objects.tables[table.index()].ty()
    }

    fn table_size(&self, table: TableAddr) -> u32 {
        self.objects.tables[table.index()].size()
    }

    fn table_get(&self, table: TableAddr, index: u32) -> Option<RawVal> {
        self.objects.tables[table.index()].get(index).ok()
    }

    fn table_set(&mut self, table: TableAddr, index: u32, value: RawVal) -> bool {
        self.objects.tables[table.index()].set(index, value).is_ok()
    }

    fn table_grow(&mut self, table: TableAddr, delta: u32, init: RawVal) -> Option<u32> {
        self.objects.tables[table.index()].grow(delta, init)
    }

    fn new_memory(&mut self, ty: MemoryType) -> Result<MemoryAddr, EngineError> {
        self.alloc_memory(ty)
    }

    fn memory_type(&self, memory: MemoryAddr) -> MemoryType {
        self.objects.memories[memory.index()].ty()
    }

    fn memory_pages(&self, memory: MemoryAddr) -> u32 {
        self.objects.memories[memory.index()].size()
    }

    fn memory_data(&mut self, memory: MemoryAddr) -> &mut [u8] {
        self.objects.memories[memory.index()].data_mut()
    }

    fn memory_grow(&mut self, memory: MemoryAddr, delta: u32) -> Option<u32> {
        self.objects.memories[memory.index()].grow(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mutability, ValueKind};

    fn compile(interp: &mut Interpreter, wat: &str) -> ModuleAddr {
        let binary = wat::parse_str(wat).unwrap();
        interp.compile(&binary).unwrap()
    }

    fn instantiate(interp: &mut Interpreter, wat: &str) -> InstanceAddr {
        let module = compile(interp, wat);
        let instantiated = interp.instantiate(module, &[]).unwrap();
        assert_eq!(instantiated.start, None);
        instantiated.instance
    }

    fn export_func(interp: &Interpreter, instance: InstanceAddr, name: &str) -> FuncAddr {
        match interp.instance_export(instance, name) {
            Some(ExternAddr::Func(func)) => func,
            other => panic!("no function export {}: {:?}", name, other),
        }
    }

    fn call(interp: &mut Interpreter, instance: InstanceAddr, name: &str, args: &[RawVal]) -> Step {
        let func = export_func(interp, instance, name);
        interp.invoke(func, args)
    }

    #[test]
    fn test_recursive_factorial() {
        let mut interp = Interpreter::default();
        let instance = instantiate(
            &mut interp,
            r#"(module
                (func $fac (export "fac") (param i64) (result i64)
                    local.get 0
                    i64.eqz
                    if (result i64)
                        i64.const 1
                    else
                        local.get 0
                        local.get 0
                        i64.const 1
                        i64.sub
                        call $fac
                        i64.mul
                    end))"#,
        );
        assert_eq!(
            call(&mut interp, instance, "fac", &[RawVal::I64(20)]),
            Step::Done(vec![RawVal::I64(2432902008176640000)])
        );
    }

    #[test]
    fn test_loops_and_branch_tables() {
        let mut interp = Interpreter::default();
        let instance = instantiate(
            &mut interp,
            r#"(module
                (func (export "sum") (param $n i32) (result i32) (local $acc i32)
                    block $done
                        loop $next
                            local.get $n
                            i32.eqz
                            br_if $done
                            local.get $acc
                            local.get $n
                            i32.add
                            local.set $acc
                            local.get $n
                            i32.const 1
                            i32.sub
                            local.set $n
                            br $next
                        end
                    end
                    local.get $acc)
                (func (export "classify") (param i32) (result i32)
                    block $two
                        block $one
                            block $zero
                                local.get 0
                                br_table $zero $one $two
                            end
                            i32.const 100
                            return
                        end
                        i32.const 101
                        return
                    end
                    i32.const 102))"#,
        );
        assert_eq!(
            call(&mut interp, instance, "sum", &[RawVal::I32(100)]),
            Step::Done(vec![RawVal::I32(5050)])
        );
        for (arg, expected) in [(0, 100), (1, 101), (2, 102), (7, 102)] {
            assert_eq!(
                call(&mut interp, instance, "classify", &[RawVal::I32(arg)]),
                Step::Done(vec![RawVal::I32(expected)])
            );
        }
    }

    #[test]
    fn test_host_call_suspends_and_resumes() {
        let mut interp = Interpreter::default();
        let module = compile(
            &mut interp,
            r#"(module
                (import "env" "double" (func $double (param i32) (result i32)))
                (func (export "run") (param i32) (result i32)
                    local.get 0
                    call $double
                    i32.const 1
                    i32.add))"#,
        );
        let ty = FuncType::new([ValueKind::I32], [ValueKind::I32]);
        let host = interp.new_host_func(ty, HostFuncId(7));
        let instance = interp.instantiate(module, &[ExternAddr::Func(host)]).unwrap().instance;

        let step = call(&mut interp, instance, "run", &[RawVal::I32(20)]);
        assert_eq!(
            step,
            Step::HostCall {
                func: host,
                host: HostFuncId(7),
                args: vec![RawVal::I32(20)]
            }
        );
        assert_eq!(interp.resume(Ok(vec![RawVal::I32(40)])), Step::Done(vec![RawVal::I32(41)]));

        call(&mut interp, instance, "run", &[RawVal::I32(1)]);
        assert_eq!(interp.resume(Err("host failed".into())), Step::Trap("host failed".into()));
        assert!(interp.suspended.is_empty());
    }

    #[test]
    fn test_invoking_host_function_directly() {
        let mut interp = Interpreter::default();
        let host = interp.new_host_func(FuncType::new([ValueKind::F64], [ValueKind::F64]), HostFuncId(1));
        assert!(matches!(interp.invoke(host, &[RawVal::F64(1.5)]), Step::HostCall { .. }));
        assert_eq!(interp.resume(Ok(vec![RawVal::F64(3.0)])), Step::Done(vec![RawVal::F64(3.0)]));
    }

    #[test]
    fn test_traps() {
        let mut interp = Interpreter::new(Config::default().with_max_call_depth(50));
        let instance = instantiate(
            &mut interp,
            r#"(module
                (memory 1)
                (table 2 funcref)
                (elem (i32.const 0) $f)
                (type $ret_i64 (func (result i64)))
                (func $f (result i32) i32.const 7)
                (func (export "unreachable") unreachable)
                (func (export "div") (param i32 i32) (result i32) local.get 0 local.get 1 i32.div_s)
                (func (export "load") (param i32) (result i32) local.get 0 i32.load)
                (func $spin (export "recurse") call $spin)
                (func (export "indirect") (param i32) (result i32) local.get 0 call_indirect (result i32))
                (func (export "indirect_wrong_type") (result i64) i32.const 0 call_indirect (type $ret_i64)))"#,
        );
        let trap = |interp: &mut Interpreter, name: &str, args: &[RawVal]| match call(interp, instance, name, args) {
            Step::Trap(message) => message,
            other => panic!("expected a trap from {}, got {:?}", name, other),
        };
        assert_eq!(trap(&mut interp, "unreachable", &[]), "unreachable");
        assert_eq!(trap(&mut interp, "div", &[RawVal::I32(1), RawVal::I32(0)]), "integer divide by zero");
        assert_eq!(trap(&mut interp, "load", &[RawVal::I32(65534)]), "out of bounds memory access");
        assert_eq!(trap(&mut interp, "recurse", &[]), "call stack exhausted");
        assert_eq!(trap(&mut interp, "indirect", &[RawVal::I32(1)]), "uninitialized element");
        assert_eq!(trap(&mut interp, "indirect", &[RawVal::I32(2)]), "undefined element");
        assert_eq!(trap(&mut interp, "indirect_wrong_type", &[]), "indirect call type mismatch");
        assert_eq!(
            call(&mut interp, instance, "indirect", &[RawVal::I32(0)]),
            Step::Done(vec![RawVal::I32(7)])
        );
    }

    #[test]
    fn test_memory_bounds_follow_growth() {
        let mut interp = Interpreter::default();
        let instance = instantiate(
            &mut interp,
            r#"(module
                (memory (export "mem") 2 3)
                (data (i32.const 0x1fffe) "\01\02")
                (func (export "load") (param i32) (result i32) local.get 0 i32.load8_u)
                (func (export "grow") (param i32) (result i32) local.get 0 memory.grow))"#,
        );
        let load = |interp: &mut Interpreter, addr: i32| call(interp, instance, "load", &[RawVal::I32(addr)]);
        assert_eq!(load(&mut interp, 0x1ffff), Step::Done(vec![RawVal::I32(2)]));
        assert!(matches!(load(&mut interp, 0x20000), Step::Trap(_)));

        assert_eq!(
            call(&mut interp, instance, "grow", &[RawVal::I32(1)]),
            Step::Done(vec![RawVal::I32(2)])
        );
        assert_eq!(load(&mut interp, 0x20000), Step::Done(vec![RawVal::I32(0)]));
        assert!(matches!(load(&mut interp, 0x30000), Step::Trap(_)));
        assert_eq!(
            call(&mut interp, instance, "grow", &[RawVal::I32(1)]),
            Step::Done(vec![RawVal::I32(-1)])
        );
    }

    #[test]
    fn test_globals_and_imports() {
        let mut interp = Interpreter::default();
        let module = compile(
            &mut interp,
            r#"(module
                (import "env" "base" (global $base i32))
                (global $counter (export "counter") (mut i32) (global.get $base))
                (func (export "bump") (result i32)
                    global.get $counter
                    i32.const 1
                    i32.add
                    global.set $counter
                    global.get $counter))"#,
        );
        let base = interp.new_global(GlobalType::new(ValueKind::I32, Mutability::Const), RawVal::I32(10));
        let instance = interp.instantiate(module, &[ExternAddr::Global(base)]).unwrap().instance;
        assert_eq!(call(&mut interp, instance, "bump", &[]), Step::Done(vec![RawVal::I32(11)]));
        let Some(ExternAddr::Global(counter)) = interp.instance_export(instance, "counter") else {
            panic!("counter not exported");
        };
        assert_eq!(interp.global_get(counter), RawVal::I32(11));

        let mutable = interp.new_global(GlobalType::new(ValueKind::I32, Mutability::Var), RawVal::I32(0));
        assert!(matches!(
            interp.instantiate(module, &[ExternAddr::Global(mutable)]),
            Err(EngineError::Link(_))
        ));
        assert!(matches!(interp.instantiate(module, &[]), Err(EngineError::Link(_))));
    }

    #[test]
    fn test_segment_out_of_bounds_traps() {
        let mut interp = Interpreter::default();
        let module = compile(&mut interp, r#"(module (memory 1) (data (i32.const 65535) "ab"))"#);
        assert!(matches!(interp.instantiate(module, &[]), Err(EngineError::Trap(_))));
    }

    #[test]
    fn test_start_function_is_reported() {
        let mut interp = Interpreter::default();
        let module = compile(&mut interp, r#"(module (func $init) (start $init))"#);
        let instantiated = interp.instantiate(module, &[]).unwrap();
        let start = instantiated.start.unwrap();
        assert_eq!(interp.invoke(start, &[]), Step::Done(vec![]));
    }

    #[test]
    fn test_blob_round_trip() {
        let mut interp = Interpreter::default();
        let binary = wat::parse_str(r#"(module (func (export "seven") (result i32) i32.const 7))"#).unwrap();
        let module = interp.compile(&binary).unwrap();
        let blob = interp.module_blob(module).unwrap();

        let mut other = Interpreter::default();
        let loaded = other.load_module(&binary, &blob).unwrap();
        let instance = other.instantiate(loaded, &[]).unwrap().instance;
        assert_eq!(call(&mut other, instance, "seven", &[]), Step::Done(vec![RawVal::I32(7)]));

        assert!(matches!(
            other.load_module(&binary[..binary.len() - 1], &blob),
            Err(EngineError::IncompatibleBlob(_))
        ));
        let foreign = String::from_utf8(blob).unwrap().replace(ENGINE_NAME, "another-engine");
        assert!(matches!(
            other.load_module(&binary, foreign.as_bytes()),
            Err(EngineError::IncompatibleBlob(_))
        ));
        assert!(other.load_module(&binary, b"not json").is_err());
    }

    #[test]
    fn test_blob_of_another_module_with_the_same_length() {
        let mut interp = Interpreter::default();
        let one = wat::parse_str(r#"(module (func (export "f") (result i32) i32.const 1))"#).unwrap();
        let two = wat::parse_str(r#"(module (func (export "f") (result i32) i32.const 2))"#).unwrap();
        assert_eq!(one.len(), two.len());
        let module = interp.compile(&one).unwrap();
        let blob = interp.module_blob(module).unwrap();

        let mut other = Interpreter::default();
        assert!(other.load_module(&two, &blob).is_err());
        let loaded = other.load_module(&one, &blob).unwrap();
        let instance = other.instantiate(loaded, &[]).unwrap().instance;
        assert_eq!(call(&mut other, instance, "f", &[]), Step::Done(vec![RawVal::I32(1)]));
    }

    #[test]
    fn test_edited_blob_is_rejected() {
        let mut interp = Interpreter::default();
        let binary = wat::parse_str(r#"(module (func (export "id") (param i32) (result i32) local.get 0))"#).unwrap();
        let module = interp.compile(&binary).unwrap();
        let blob = String::from_utf8(interp.module_blob(module).unwrap()).unwrap();
        assert!(blob.contains(r#""locals":["I32"]"#), "{}", blob);

        let edited = blob.replace(r#""locals":["I32"]"#, r#""locals":[]"#);
        assert!(interp.load_module(&binary, edited.as_bytes()).is_err());
        let edited = blob.replace(r#"{"LocalGet":0}"#, r#"{"LocalGet":5}"#);
        assert_ne!(edited, blob);
        assert!(interp.load_module(&binary, edited.as_bytes()).is_err());
    }

    #[test]
    fn test_validation_rejects_malformed_code() {
        let interp = Interpreter::default();
        assert!(interp.validate(&wat::parse_str("(module (func (result i32) i32.const 1))").unwrap()));
        // a function declared with no code section entry
        let mut binary = b"\0asm\x01\0\0\0".to_vec();
        binary.extend_from_slice(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00, 0x03, 0x02, 0x01, 0x00]);
        assert!(!interp.validate(&binary));
        assert!(!interp.validate(b"\0asm\x02\0\0\0"));
    }
}
