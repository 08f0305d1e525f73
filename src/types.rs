//! Structural WebAssembly types
//!
//! Everything in here is a plain value: cheap to copy or clone, compared
//! structurally, and never tied to a live store. Descriptors are produced by
//! the binary decoder and by querying live handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a WebAssembly value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    I32,
    I64,
    F32,
    F64,
    AnyRef,
    FuncRef,
}

/// Value types carry no parameters, so the kind is the type.
pub type ValType = ValueKind;

impl ValueKind {
    /// Numeric kinds are I32, I64, F32 and F64.
    ///
    /// This is the only place the number/reference partition is spelled out;
    /// everything else asks `is_num` or `is_ref`.
    pub fn is_num(self) -> bool {
        matches!(self, ValueKind::I32 | ValueKind::I64 | ValueKind::F32 | ValueKind::F64)
    }

    /// Reference kinds are AnyRef and FuncRef.
    pub fn is_ref(self) -> bool {
        !self.is_num()
    }

    /// Decode a value type from its binary encoding
    pub fn from_byte(byte: u8) -> Option<ValueKind> {
        match byte {
            0x7f => Some(ValueKind::I32),
            0x7e => Some(ValueKind::I64),
            0x7d => Some(ValueKind::F32),
            0x7c => Some(ValueKind::F64),
            0x70 => Some(ValueKind::FuncRef),
            0x6f => Some(ValueKind::AnyRef),
            _ => None,
        }
    }

    /// The binary encoding of this value type
    pub fn to_byte(self) -> u8 {
        match self {
            ValueKind::I32 => 0x7f,
            ValueKind::I64 => 0x7e,
            ValueKind::F32 => 0x7d,
            ValueKind::F64 => 0x7c,
            ValueKind::FuncRef => 0x70,
            ValueKind::AnyRef => 0x6f,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::AnyRef => "anyref",
            ValueKind::FuncRef => "funcref",
        };
        f.write_str(name)
    }
}

/// Size limits of a table (elements) or memory (pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limits {
    pub min: u32,
    pub max: u32,
}

impl Limits {
    /// Sentinel for "no maximum".
    pub const UNBOUNDED: u32 = u32::MAX;

    /// Limits with a minimum and no maximum
    pub fn at_least(min: u32) -> Self {
        Limits {
            min,
            max: Self::UNBOUNDED,
        }
    }

    /// Limits with both bounds.
    ///
    /// # Panics
    ///
    /// If `min` is greater than `max`.
    pub fn new(min: u32, max: u32) -> Self {
        assert!(min <= max, "limits minimum {} exceeds maximum {}", min, max);
        Limits { min, max }
    }

    pub fn has_max(&self) -> bool {
        self.max != Self::UNBOUNDED
    }

    /// The maximum, if one was declared
    pub fn maximum(&self) -> Option<u32> {
        if self.has_max() {
            Some(self.max)
        } else {
            None
        }
    }

    /// Import subtyping: `self` (what the host supplies) can stand in for
    /// `declared` (what the module asks for).
    pub fn satisfies(&self, declared: &Limits) -> bool {
        if self.min < declared.min {
            return false;
        }
        match (declared.maximum(), self.maximum()) {
            (None, _) => true,
            (Some(want), Some(have)) => have <= want,
            (Some(_), None) => false,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits::at_least(0)
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.maximum() {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..", self.min),
        }
    }
}

/// A function signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    params: Vec<ValType>,
    results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: impl IntoIterator<Item = ValType>, results: impl IntoIterator<Item = ValType>) -> Self {
        FuncType {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |kinds: &[ValType]| kinds.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", ");
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    Const,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalType {
    content: ValType,
    mutability: Mutability,
}

impl GlobalType {
    pub fn new(content: ValType, mutability: Mutability) -> Self {
        GlobalType { content, mutability }
    }

    pub fn content(&self) -> ValType {
        self.content
    }

    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    pub fn is_mutable(&self) -> bool {
        self.mutability == Mutability::Var
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mutability {
            Mutability::Const => write!(f, "{}", self.content),
            Mutability::Var => write!(f, "(mut {})", self.content),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableType {
    element: ValType,
    limits: Limits,
}

impl TableType {
    pub fn new(element: ValType, limits: Limits) -> Self {
        TableType { element, limits }
    }

    pub fn element(&self) -> ValType {
        self.element
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {} {}", self.limits, self.element)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryType {
    limits: Limits,
}

impl MemoryType {
    pub fn new(limits: Limits) -> Self {
        MemoryType { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory {}", self.limits)
    }
}

/// Binary tag of an import or export descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternKind {
    pub fn from_byte(byte: u8) -> Option<ExternKind> {
        match byte {
            0x00 => Some(ExternKind::Func),
            0x01 => Some(ExternKind::Table),
            0x02 => Some(ExternKind::Memory),
            0x03 => Some(ExternKind::Global),
            _ => None,
        }
    }
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternKind::Func => "func",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
        };
        f.write_str(name)
    }
}

/// The type of anything importable or exportable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternType {
    Func(FuncType),
    Global(GlobalType),
    Table(TableType),
    Memory(MemoryType),
}

impl ExternType {
    pub fn kind(&self) -> ExternKind {
        match self {
            ExternType::Func(_) => ExternKind::Func,
            ExternType::Global(_) => ExternKind::Global,
            ExternType::Table(_) => ExternKind::Table,
            ExternType::Memory(_) => ExternKind::Memory,
        }
    }

    pub fn func(&self) -> Option<&FuncType> {
        match self {
            ExternType::Func(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn global(&self) -> Option<&GlobalType> {
        match self {
            ExternType::Global(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<&TableType> {
        match self {
            ExternType::Table(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryType> {
        match self {
            ExternType::Memory(ty) => Some(ty),
            _ => None,
        }
    }

    /// Whether an extern of type `self` may be supplied where `declared` is
    /// imported. Functions and globals must match exactly; tables and
    /// memories follow limits subtyping.
    pub fn matches(&self, declared: &ExternType) -> bool {
        match (self, declared) {
            (ExternType::Func(have), ExternType::Func(want)) => have == want,
            (ExternType::Global(have), ExternType::Global(want)) => have == want,
            (ExternType::Table(have), ExternType::Table(want)) => {
                have.element() == want.element() && have.limits().satisfies(want.limits())
            }
            (ExternType::Memory(have), ExternType::Memory(want)) => have.limits().satisfies(want.limits()),
            _ => false,
        }
    }
}

impl From<FuncType> for ExternType {
    fn from(ty: FuncType) -> Self {
        ExternType::Func(ty)
    }
}

impl From<GlobalType> for ExternType {
    fn from(ty: GlobalType) -> Self {
        ExternType::Global(ty)
    }
}

impl From<TableType> for ExternType {
    fn from(ty: TableType) -> Self {
        ExternType::Table(ty)
    }
}

impl From<MemoryType> for ExternType {
    fn from(ty: MemoryType) -> Self {
        ExternType::Memory(ty)
    }
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternType::Func(ty) => write!(f, "func {ty}"),
            ExternType::Global(ty) => write!(f, "global {ty}"),
            ExternType::Table(ty) => write!(f, "{ty}"),
            ExternType::Memory(ty) => write!(f, "{ty}"),
        }
    }
}

/// One entry of a module's import list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportType {
    module: String,
    name: String,
    ty: ExternType,
}

impl ImportType {
    pub fn new(module: impl Into<String>, name: impl Into<String>, ty: ExternType) -> Self {
        ImportType {
            module: module.into(),
            name: name.into(),
            ty,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ExternType {
        &self.ty
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "import {}.{}: {}", self.module, self.name, self.ty)
    }
}

/// One entry of a module's export list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportType {
    name: String,
    ty: ExternType,
}

impl ExportType {
    pub fn new(name: impl Into<String>, ty: ExternType) -> Self {
        ExportType { name: name.into(), ty }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ExternType {
        &self.ty
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "export {}: {}", self.name, self.ty)
    }
}
