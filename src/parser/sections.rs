//! Section location, type decoders and the per-section drivers that build a
//! module's interface.

use log::trace;
use serde::{Deserialize, Serialize};

use super::encoding::*;
use super::limits::*;
use super::reader::Reader;
use super::{DecodeError, DecodeErrorKind, Section};
use crate::types::{
    ExportType, ExternKind, ExternType, FuncType, GlobalType, ImportType, Limits, MemoryType, Mutability, TableType,
    ValueKind,
};

/// Locate the first section with the given id.
///
/// Scans forward from the end of the header, skipping the payload of every
/// other section. Returns `None` when the module has no such section, which
/// means zero declarations of that kind. The returned reader is bounded to the
/// section payload.
pub fn find_section(binary: &[u8], id: u8) -> Result<Option<Reader<'_>>, DecodeError> {
    let mut reader = Reader::new(binary);
    reader.skip(HEADER_LEN)?;

    while !reader.at_end() {
        let start = reader.offset();
        let section_id = reader.read_byte()?;
        let section = Section::from_id(section_id)
            .ok_or_else(|| reader.error_at(start, DecodeErrorKind::UnknownSection(section_id)))?;
        let len = reader.read_u32_leb()? as usize;
        let payload = reader.sub_reader(len, section)?;
        if section_id == id {
            trace!("found {} section at {:#x}, {} bytes", section, payload.offset(), len);
            return Ok(Some(payload));
        }
    }

    Ok(None)
}

/// Every non-custom section in module order, as `(section, payload)` pairs
pub fn sections(binary: &[u8]) -> Result<Vec<(Section, Reader<'_>)>, DecodeError> {
    let mut reader = Reader::new(binary);
    reader.skip(HEADER_LEN)?;
    let mut found = vec![];

    while !reader.at_end() {
        let start = reader.offset();
        let section_id = reader.read_byte()?;
        let section = Section::from_id(section_id)
            .ok_or_else(|| reader.error_at(start, DecodeErrorKind::UnknownSection(section_id)))?;
        let len = reader.read_u32_leb()? as usize;
        let payload = reader.sub_reader(len, section)?;
        if section != Section::Custom {
            found.push((section, payload));
        }
    }

    Ok(found)
}

// Type decoders ---------------------------------------------------------------

pub fn read_val_type(reader: &mut Reader) -> Result<ValueKind, DecodeError> {
    let start = reader.offset();
    let byte = reader.read_byte()?;
    ValueKind::from_byte(byte).ok_or_else(|| reader.error_at(start, DecodeErrorKind::UnknownValType(byte)))
}

pub fn read_ref_type(reader: &mut Reader) -> Result<ValueKind, DecodeError> {
    let start = reader.offset();
    let kind = read_val_type(reader)?;
    if !kind.is_ref() {
        return Err(reader.error_at(start, DecodeErrorKind::UnknownRefType(kind.to_byte())));
    }
    Ok(kind)
}

pub fn read_limits(reader: &mut Reader) -> Result<Limits, DecodeError> {
    let start = reader.offset();
    let flag = reader.read_byte()?;
    match flag {
        LIMITS_MIN => Ok(Limits::at_least(reader.read_u32_leb()?)),
        LIMITS_MIN_MAX => {
            let min = reader.read_u32_leb()?;
            let max = reader.read_u32_leb()?;
            if min > max {
                return Err(reader.error_at(start, DecodeErrorKind::LimitsMinExceedsMax { min, max }));
            }
            Ok(Limits { min, max })
        }
        other => Err(reader.error_at(start, DecodeErrorKind::BadLimitsFlag(other))),
    }
}

fn read_val_types(reader: &mut Reader, limit: u32) -> Result<Vec<ValueKind>, DecodeError> {
    let count = reader.read_count(limit)?;
    (0..count).map(|_| read_val_type(reader)).collect()
}

pub fn read_func_type(reader: &mut Reader) -> Result<FuncType, DecodeError> {
    let start = reader.offset();
    let tag = reader.read_byte()?;
    if tag != TYPE_FUNC {
        return Err(reader.error_at(start, DecodeErrorKind::BadTypeTag(tag)));
    }
    let params = read_val_types(reader, MAX_FUNCTION_PARAMS)?;
    let results = read_val_types(reader, MAX_FUNCTION_RETURNS)?;
    Ok(FuncType::new(params, results))
}

pub fn read_global_type(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
    let content = read_val_type(reader)?;
    let start = reader.offset();
    let mutability = match reader.read_byte()? {
        GLOBAL_CONST => Mutability::Const,
        GLOBAL_VAR => Mutability::Var,
        other => return Err(reader.error_at(start, DecodeErrorKind::BadMutability(other))),
    };
    Ok(GlobalType::new(content, mutability))
}

pub fn read_table_type(reader: &mut Reader) -> Result<TableType, DecodeError> {
    let element = read_ref_type(reader)?;
    let limits = read_limits(reader)?;
    Ok(TableType::new(element, limits))
}

pub fn read_memory_type(reader: &mut Reader) -> Result<MemoryType, DecodeError> {
    let start = reader.offset();
    let limits = read_limits(reader)?;
    if limits.min > MAX_MEMORY_PAGES_32 || limits.maximum().is_some_and(|max| max > MAX_MEMORY_PAGES_32) {
        return Err(reader.error_at(start, DecodeErrorKind::MemoryTooLarge));
    }
    Ok(MemoryType::new(limits))
}

/// Read an index and resolve it against `space`
pub fn read_index<'t, T>(reader: &mut Reader, space: &'t [T], what: &'static str) -> Result<&'t T, DecodeError> {
    let start = reader.offset();
    let index = reader.read_u32_leb()?;
    space.get(index as usize).ok_or_else(|| {
        reader.error_at(
            start,
            DecodeErrorKind::IndexOutOfRange {
                space: what,
                index,
                len: space.len() as u32,
            },
        )
    })
}

// Constant expressions --------------------------------------------------------

/// A constant initializer expression: a single instruction followed by `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    /// Bit pattern, so NaN payloads survive
    F32(u32),
    F64(u64),
    GlobalGet(u32),
    RefNull(ValueKind),
    RefFunc(u32),
}

impl ConstExpr {
    /// The kind of value the expression produces, if it can be known without
    /// looking up a global
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            ConstExpr::I32(_) => Some(ValueKind::I32),
            ConstExpr::I64(_) => Some(ValueKind::I64),
            ConstExpr::F32(_) => Some(ValueKind::F32),
            ConstExpr::F64(_) => Some(ValueKind::F64),
            ConstExpr::RefNull(kind) => Some(*kind),
            ConstExpr::RefFunc(_) => Some(ValueKind::FuncRef),
            ConstExpr::GlobalGet(_) => None,
        }
    }
}

pub fn read_const_expr(reader: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let start = reader.offset();
    let opcode = reader.read_byte()?;
    let expr = match opcode {
        0x41 => ConstExpr::I32(reader.read_s32_leb()?),
        0x42 => ConstExpr::I64(reader.read_s64_leb()?),
        0x43 => ConstExpr::F32(reader.read_u32_le()?),
        0x44 => ConstExpr::F64(reader.read_u64_le()?),
        0x23 => ConstExpr::GlobalGet(reader.read_u32_leb()?),
        0xd0 => ConstExpr::RefNull(read_ref_type(reader)?),
        0xd2 => ConstExpr::RefFunc(reader.read_u32_leb()?),
        other => return Err(reader.error_at(start, DecodeErrorKind::InvalidConstExpr(other))),
    };
    let end_at = reader.offset();
    let end = reader.read_byte()?;
    if end != 0x0b {
        return Err(reader.error_at(end_at, DecodeErrorKind::InvalidConstExpr(end)));
    }
    Ok(expr)
}

// Section drivers -------------------------------------------------------------

pub fn decode_type_section(binary: &[u8]) -> Result<Vec<FuncType>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_TYPE)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_TYPES)?;
    let types = (0..count)
        .map(|_| read_func_type(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(types)
}

pub fn decode_import_section(binary: &[u8], types: &[FuncType]) -> Result<Vec<ImportType>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_IMPORT)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_IMPORTS)?;
    let mut imports = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let module = reader.read_name()?;
        let name = reader.read_name()?;
        let start = reader.offset();
        let ty = match reader.read_byte()? {
            DESC_FUNC => ExternType::Func(read_index(&mut reader, types, "type")?.clone()),
            DESC_TABLE => ExternType::Table(read_table_type(&mut reader)?),
            DESC_MEMORY => ExternType::Memory(read_memory_type(&mut reader)?),
            DESC_GLOBAL => ExternType::Global(read_global_type(&mut reader)?),
            other => return Err(reader.error_at(start, DecodeErrorKind::UnknownExternKind(other))),
        };
        imports.push(ImportType::new(module, name, ty));
    }

    reader.finish()?;
    Ok(imports)
}

/// The type index of each function the module defines
pub fn decode_function_indices(binary: &[u8]) -> Result<Vec<u32>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_FUNCTION)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_FUNCTIONS)?;
    let indices = (0..count)
        .map(|_| reader.read_u32_leb())
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(indices)
}

/// The types of the functions the module defines, resolved through the type
/// section
pub fn decode_function_section(binary: &[u8], types: &[FuncType]) -> Result<Vec<FuncType>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_FUNCTION)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_FUNCTIONS)?;
    let funcs = (0..count)
        .map(|_| read_index(&mut reader, types, "type").cloned())
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(funcs)
}

pub fn decode_table_section(binary: &[u8]) -> Result<Vec<TableType>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_TABLE)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_TABLES)?;
    let tables = (0..count)
        .map(|_| read_table_type(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(tables)
}

pub fn decode_memory_section(binary: &[u8]) -> Result<Vec<MemoryType>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_MEMORY)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_MEMORIES)?;
    let memories = (0..count)
        .map(|_| read_memory_type(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(memories)
}

/// Defined globals together with their initializers
pub fn decode_global_entries(binary: &[u8]) -> Result<Vec<(GlobalType, ConstExpr)>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_GLOBAL)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_GLOBALS)?;
    let mut globals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let ty = read_global_type(&mut reader)?;
        let init = read_const_expr(&mut reader)?;
        globals.push((ty, init));
    }
    reader.finish()?;
    Ok(globals)
}

pub fn decode_global_section(binary: &[u8]) -> Result<Vec<GlobalType>, DecodeError> {
    Ok(decode_global_entries(binary)?.into_iter().map(|(ty, _)| ty).collect())
}

/// An export entry before its index is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExport {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

pub fn decode_export_entries(binary: &[u8]) -> Result<Vec<RawExport>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_EXPORT)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_EXPORTS)?;
    let mut exports = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.read_name()?;
        let start = reader.offset();
        let byte = reader.read_byte()?;
        let kind =
            ExternKind::from_byte(byte).ok_or_else(|| reader.error_at(start, DecodeErrorKind::UnknownExternKind(byte)))?;
        let index = reader.read_u32_leb()?;
        exports.push(RawExport { name, kind, index });
    }
    reader.finish()?;
    Ok(exports)
}

/// Decode the export section and resolve each entry against the synthesized
/// index spaces (imports first, then definitions).
pub fn decode_export_section(
    binary: &[u8],
    funcs: &[FuncType],
    tables: &[TableType],
    memories: &[MemoryType],
    globals: &[GlobalType],
) -> Result<Vec<ExportType>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_EXPORT)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_EXPORTS)?;
    let mut exports = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let name = reader.read_name()?;
        let start = reader.offset();
        let ty = match reader.read_byte()? {
            DESC_FUNC => ExternType::Func(read_index(&mut reader, funcs, "function")?.clone()),
            DESC_TABLE => ExternType::Table(*read_index(&mut reader, tables, "table")?),
            DESC_MEMORY => ExternType::Memory(*read_index(&mut reader, memories, "memory")?),
            DESC_GLOBAL => ExternType::Global(*read_index(&mut reader, globals, "global")?),
            other => return Err(reader.error_at(start, DecodeErrorKind::UnknownExternKind(other))),
        };
        exports.push(ExportType::new(name, ty));
    }

    reader.finish()?;
    Ok(exports)
}
