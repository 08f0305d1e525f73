//! Binary module decoder
//!
//! Extracts a module's interface (types, imports, the synthesized index
//! spaces and exports) straight from its bytes, without involving an engine.
//! Every read is bounds-checked; malformed input produces a [`DecodeError`]
//! naming the section and absolute byte offset at fault.

pub mod encoding;
pub mod limits;
pub mod reader;
pub mod sections;

use std::fmt;

use log::trace;

pub use reader::Reader;
pub use sections::*;

use crate::types::{ExportType, ExternType, FuncType, GlobalType, ImportType, MemoryType, TableType};
use encoding::{HEADER_LEN, MAGIC, VERSION};

/// Where in a module a decode error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Header,
    Custom,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    Code,
    Data,
    DataCount,
}

impl Section {
    pub fn from_id(id: u8) -> Option<Section> {
        let section = match id {
            0 => Section::Custom,
            1 => Section::Type,
            2 => Section::Import,
            3 => Section::Function,
            4 => Section::Table,
            5 => Section::Memory,
            6 => Section::Global,
            7 => Section::Export,
            8 => Section::Start,
            9 => Section::Element,
            10 => Section::Code,
            11 => Section::Data,
            12 => Section::DataCount,
            _ => return None,
        };
        Some(section)
    }

    /// Position of the section in the required module order. Custom sections
    /// may appear anywhere and have none.
    pub fn order(&self) -> Option<u8> {
        let order = match self {
            Section::Header | Section::Custom => return None,
            Section::Type => 1,
            Section::Import => 2,
            Section::Function => 3,
            Section::Table => 4,
            Section::Memory => 5,
            Section::Global => 6,
            Section::Export => 7,
            Section::Start => 8,
            Section::Element => 9,
            Section::DataCount => 10,
            Section::Code => 11,
            Section::Data => 12,
        };
        Some(order)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Header => "header",
            Section::Custom => "custom",
            Section::Type => "type",
            Section::Import => "import",
            Section::Function => "function",
            Section::Table => "table",
            Section::Memory => "memory",
            Section::Global => "global",
            Section::Export => "export",
            Section::Start => "start",
            Section::Element => "element",
            Section::Code => "code",
            Section::Data => "data",
            Section::DataCount => "data count",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("integer too large")]
    IntegerOverflow,
    #[error("integer representation too long")]
    IntegerTooLong,
    #[error("malformed UTF-8 encoding")]
    InvalidUtf8,
    #[error("magic header not detected, found {0}")]
    BadMagic(String),
    #[error("unknown binary version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown section id {0}")]
    UnknownSection(u8),
    #[error("unknown value type {0:#04x}")]
    UnknownValType(u8),
    #[error("malformed reference type {0:#04x}")]
    UnknownRefType(u8),
    #[error("unknown import/export kind {0:#04x}")]
    UnknownExternKind(u8),
    #[error("expected function type tag 0x60, found {0:#04x}")]
    BadTypeTag(u8),
    #[error("malformed limits flags {0:#04x}")]
    BadLimitsFlag(u8),
    #[error("size minimum {min} must not be greater than maximum {max}")]
    LimitsMinExceedsMax { min: u32, max: u32 },
    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemoryTooLarge,
    #[error("malformed mutability {0:#04x}")]
    BadMutability(u8),
    #[error("unknown {space} {index}, {len} defined")]
    IndexOutOfRange { space: &'static str, index: u32, len: u32 },
    #[error("count {count} exceeds limit {limit} or the remaining input")]
    CountTooLarge { count: u32, limit: u32 },
    #[error("section size mismatch, {unread} bytes unread")]
    SectionSizeMismatch { unread: usize },
    #[error("constant expression required, found opcode {0:#04x}")]
    InvalidConstExpr(u8),
    #[error("{0}")]
    Invalid(String),
}

/// A structured decode failure: what went wrong, where.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} ({section} section, offset {offset:#x})")]
pub struct DecodeError {
    pub section: Section,
    /// Absolute byte offset within the module
    pub offset: usize,
    pub kind: DecodeErrorKind,
}

/// Everything the decoder extracts from a module without compiling it.
///
/// `funcs`, `globals`, `tables` and `memories` are the synthesized index
/// spaces: imported entries first, in import order, then the module's own
/// definitions in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInterface {
    pub types: Vec<FuncType>,
    pub imports: Vec<ImportType>,
    pub funcs: Vec<FuncType>,
    pub globals: Vec<GlobalType>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub exports: Vec<ExportType>,
}

impl ModuleInterface {
    /// Number of imports of each kind: (funcs, tables, memories, globals)
    pub fn import_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for import in &self.imports {
            match import.ty() {
                ExternType::Func(_) => counts.0 += 1,
                ExternType::Table(_) => counts.1 += 1,
                ExternType::Memory(_) => counts.2 += 1,
                ExternType::Global(_) => counts.3 += 1,
            }
        }
        counts
    }
}

/// Check the magic number and version
pub fn check_header(binary: &[u8]) -> Result<(), DecodeError> {
    let mut reader = Reader::new(binary);
    let magic = reader.read_bytes(MAGIC.len())?;
    if magic != MAGIC {
        return Err(reader.error_at(0, DecodeErrorKind::BadMagic(hex::encode(magic))));
    }
    let version = reader.read_u32_le()?;
    if version != VERSION {
        return Err(reader.error_at(MAGIC.len(), DecodeErrorKind::UnsupportedVersion(version)));
    }
    debug_assert_eq!(reader.offset(), HEADER_LEN);
    Ok(())
}

/// Decode a module's full interface
pub fn decode_module(binary: &[u8]) -> Result<ModuleInterface, DecodeError> {
    check_header(binary)?;

    let types = decode_type_section(binary)?;
    let imports = decode_import_section(binary, &types)?;

    let mut funcs = vec![];
    let mut tables = vec![];
    let mut memories = vec![];
    let mut globals = vec![];
    for import in &imports {
        match import.ty() {
            ExternType::Func(ty) => funcs.push(ty.clone()),
            ExternType::Table(ty) => tables.push(*ty),
            ExternType::Memory(ty) => memories.push(*ty),
            ExternType::Global(ty) => globals.push(*ty),
        }
    }

    funcs.extend(decode_function_section(binary, &types)?);
    tables.extend(decode_table_section(binary)?);
    memories.extend(decode_memory_section(binary)?);
    globals.extend(decode_global_section(binary)?);

    let exports = decode_export_section(binary, &funcs, &tables, &memories, &globals)?;

    trace!(
        "decoded module interface: {} imports, {} exports, {} functions",
        imports.len(),
        exports.len(),
        funcs.len()
    );

    Ok(ModuleInterface {
        types,
        imports,
        funcs,
        globals,
        tables,
        memories,
        exports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header() {
        assert!(check_header(b"\0asm\x01\0\0\0").is_ok());

        let err = check_header(b"\0asn\x01\0\0\0").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::BadMagic("0061736e".to_string()));
        assert_eq!(err.offset, 0);

        let err = check_header(b"\0asm\x02\0\0\0").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnsupportedVersion(2));
        assert_eq!(err.offset, 4);

        assert_eq!(check_header(b"\0as").unwrap_err().kind, DecodeErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_error_display() {
        let err = DecodeError {
            section: Section::Export,
            offset: 0x2a,
            kind: DecodeErrorKind::IndexOutOfRange {
                space: "function",
                index: 3,
                len: 2,
            },
        };
        assert_eq!(err.to_string(), "unknown function 3, 2 defined (export section, offset 0x2a)");
    }

    #[test]
    fn test_section_order() {
        assert!(Section::DataCount.order() < Section::Code.order());
        assert!(Section::Element.order() < Section::DataCount.order());
        assert_eq!(Section::Custom.order(), None);
        for id in 0..=12 {
            assert!(Section::from_id(id).is_some());
        }
        assert_eq!(Section::from_id(13), None);
    }
}
