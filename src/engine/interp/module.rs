//! Compiled modules
//!
//! Everything the interpreter needs to instantiate a module, decoded once:
//! the interface, compiled function bodies, global initializers, element and
//! data segments and the start function. Decoding also performs the
//! module-level checks the interface decoder leaves out (section order,
//! duplicate exports, count agreement between sections).

use std::collections::HashSet;
use std::rc::Rc;

use log::debug;

use super::instruction::{compile_body, CodeContext, FuncBody};
use crate::parser::encoding::*;
use crate::parser::limits::{MAX_DATA_SEGMENTS, MAX_ELEMENT_SEGMENTS, MAX_FUNCTIONS, MAX_FUNCTION_SIZE};
use crate::parser::{
    decode_export_entries, decode_function_indices, decode_global_entries, decode_module, find_section,
    read_const_expr, read_ref_type, sections, ConstExpr, DecodeError, DecodeErrorKind, ModuleInterface,
    RawExport, Reader, Section,
};
use crate::types::ValueKind;

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Active { table: u32, offset: ConstExpr },
    Passive,
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub mode: ElementMode,
    pub kind: ValueKind,
    pub items: Vec<ConstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory: u32, offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct CompiledModule {
    pub interface: ModuleInterface,
    /// Bodies of the functions the module defines, in definition order
    pub bodies: Vec<Rc<FuncBody>>,
    /// Initializers of the globals the module defines
    pub global_inits: Vec<ConstExpr>,
    pub exports: Vec<RawExport>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    /// Index into the function index space
    pub start: Option<u32>,
    /// Size of the binary the module was decoded from
    pub binary_len: usize,
}

impl CompiledModule {
    /// Decode, validate and compile a module
    pub fn compile(binary: &[u8]) -> Result<CompiledModule, DecodeError> {
        let mut module = Self::decode(binary)?;
        module.bodies = module.compile_code(binary)?;
        debug!(
            "compiled module: {} functions, {} exports",
            module.bodies.len(),
            module.exports.len()
        );
        Ok(module)
    }

    /// Rebuild a module from its bytes and bodies compiled earlier. The
    /// bodies are accepted only if they are exactly what `binary` compiles
    /// to.
    pub fn with_bodies(binary: &[u8], bodies: Vec<FuncBody>) -> Result<CompiledModule, DecodeError> {
        let mut module = Self::decode(binary)?;
        let compiled = module.compile_code(binary)?;
        if bodies.len() != compiled.len() {
            return Err(mismatched_bodies(format!(
                "{} compiled bodies for {} functions",
                bodies.len(),
                compiled.len()
            )));
        }
        if let Some(index) = compiled.iter().zip(&bodies).position(|(own, given)| **own != *given) {
            return Err(mismatched_bodies(format!("compiled body {index} does not match the module")));
        }
        module.bodies = compiled;
        Ok(module)
    }

    fn decode(binary: &[u8]) -> Result<CompiledModule, DecodeError> {
        let interface = decode_module(binary)?;
        check_section_order(binary)?;

        if interface.memories.len() > 1 {
            return Err(DecodeError {
                section: Section::Memory,
                offset: 0,
                kind: DecodeErrorKind::Invalid("multiple memories".into()),
            });
        }

        let exports = decode_export_entries(binary)?;
        let mut names = HashSet::new();
        for export in &exports {
            if !names.insert(export.name.as_str()) {
                let offset = find_section(binary, SECTION_EXPORT)?.map_or(0, |reader| reader.offset());
                return Err(DecodeError {
                    section: Section::Export,
                    offset,
                    kind: DecodeErrorKind::Invalid(format!("duplicate export name {:?}", export.name)),
                });
            }
        }

        let (_, _, _, imported_globals) = interface.import_counts();
        let mut global_inits = vec![];
        let entries = decode_global_entries(binary)?;
        let global_section_offset = find_section(binary, SECTION_GLOBAL)?.map_or(0, |reader| reader.offset());
        for (ty, init) in entries {
            check_const_expr(&interface, imported_globals, &init, ty.content()).map_err(|kind| DecodeError {
                section: Section::Global,
                offset: global_section_offset,
                kind,
            })?;
            global_inits.push(init);
        }

        let start = decode_start_section(binary, &interface)?;
        let elements = decode_element_section(binary, &interface, imported_globals)?;
        let data = decode_data_section(binary, &interface, imported_globals)?;

        Ok(CompiledModule {
            interface,
            bodies: vec![],
            global_inits,
            exports,
            elements,
            data,
            start,
            binary_len: binary.len(),
        })
    }

    fn compile_code(&self, binary: &[u8]) -> Result<Vec<Rc<FuncBody>>, DecodeError> {
        let defined = decode_function_indices(binary)?.len();
        let (imported_funcs, _, _, _) = self.interface.import_counts();
        let ctx = CodeContext {
            types: &self.interface.types,
            funcs: &self.interface.funcs,
            globals: &self.interface.globals,
            tables: &self.interface.tables,
            has_memory: !self.interface.memories.is_empty(),
        };

        let Some(mut reader) = find_section(binary, SECTION_CODE)? else {
            if defined > 0 {
                return Err(inconsistent_code(Section::Function, 0));
            }
            return Ok(vec![]);
        };
        let count_at = reader.offset();
        let count = reader.read_count(MAX_FUNCTIONS)?;
        if count as usize != defined {
            return Err(inconsistent_code(Section::Code, count_at));
        }

        let mut bodies = Vec::with_capacity(defined);
        for index in 0..defined {
            let size_at = reader.offset();
            let size = reader.read_u32_leb()?;
            if size > MAX_FUNCTION_SIZE {
                return Err(DecodeError {
                    section: Section::Code,
                    offset: size_at,
                    kind: DecodeErrorKind::Invalid(format!("function body of {size} bytes is too large")),
                });
            }
            let size = size as usize;
            let mut body = reader.sub_reader(size, Section::Code)?;
            let ty = &self.interface.funcs[imported_funcs + index];
            bodies.push(Rc::new(compile_body(&mut body, ty, &ctx)?));
        }
        reader.finish()?;
        Ok(bodies)
    }
}

fn mismatched_bodies(message: String) -> DecodeError {
    DecodeError {
        section: Section::Code,
        offset: 0,
        kind: DecodeErrorKind::Invalid(message),
    }
}

fn inconsistent_code(section: Section, offset: usize) -> DecodeError {
    DecodeError {
        section,
        offset,
        kind: DecodeErrorKind::Invalid("function and code section have inconsistent lengths".into()),
    }
}

/// Non-custom sections must appear at most once each, in the prescribed
/// order
fn check_section_order(binary: &[u8]) -> Result<(), DecodeError> {
    let mut last = 0;
    for (section, reader) in sections(binary)? {
        let order = section.order().unwrap_or(0);
        if order <= last {
            return Err(reader.error(DecodeErrorKind::Invalid(format!("unexpected {section} section"))));
        }
        last = order;
    }
    Ok(())
}

/// A constant expression may read only imported globals, and must produce
/// `expected`
fn check_const_expr(
    interface: &ModuleInterface,
    imported_globals: usize,
    expr: &ConstExpr,
    expected: ValueKind,
) -> Result<(), DecodeErrorKind> {
    let kind = match *expr {
        ConstExpr::GlobalGet(index) => {
            if index as usize >= imported_globals {
                return Err(DecodeErrorKind::IndexOutOfRange {
                    space: "imported global",
                    index,
                    len: imported_globals as u32,
                });
            }
            interface.globals[index as usize].content()
        }
        ConstExpr::RefFunc(index) if index as usize >= interface.funcs.len() => {
            return Err(DecodeErrorKind::IndexOutOfRange {
                space: "function",
                index,
                len: interface.funcs.len() as u32,
            });
        }
        _ => expr.kind().unwrap_or(expected),
    };
    if kind != expected {
        return Err(DecodeErrorKind::Invalid(format!(
            "type mismatch in constant expression: expected {expected}, found {kind}"
        )));
    }
    Ok(())
}

fn decode_start_section(binary: &[u8], interface: &ModuleInterface) -> Result<Option<u32>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_START)? else {
        return Ok(None);
    };
    let start = reader.offset();
    let index = reader.read_u32_leb()?;
    let ty = interface.funcs.get(index as usize).ok_or_else(|| {
        reader.error_at(
            start,
            DecodeErrorKind::IndexOutOfRange {
                space: "function",
                index,
                len: interface.funcs.len() as u32,
            },
        )
    })?;
    if !ty.params().is_empty() || !ty.results().is_empty() {
        return Err(reader.error_at(start, DecodeErrorKind::Invalid("start function must take and return nothing".into())));
    }
    reader.finish()?;
    Ok(Some(index))
}

fn read_elem_kind(reader: &mut Reader) -> Result<ValueKind, DecodeError> {
    let start = reader.offset();
    match reader.read_byte()? {
        0x00 => Ok(ValueKind::FuncRef),
        other => Err(reader.error_at(start, DecodeErrorKind::Invalid(format!("malformed element kind {other:#04x}")))),
    }
}

fn decode_element_section(
    binary: &[u8],
    interface: &ModuleInterface,
    imported_globals: usize,
) -> Result<Vec<ElementSegment>, DecodeError> {
    let Some(mut reader) = find_section(binary, SECTION_ELEMENT)? else {
        return Ok(vec![]);
    };
    let count = reader.read_count(MAX_ELEMENT_SEGMENTS)?;
    let mut segments = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let start = reader.offset();
        let flags = reader.read_u32_leb()?;
        if flags > 7 {
            return Err(reader.error_at(start, DecodeErrorKind::Invalid(format!("malformed elements segment kind {flags}"))));
        }
        let passive_or_declarative = flags & 0b001 != 0;
        let explicit_table = flags & 0b010 != 0;
        let uses_exprs = flags & 0b100 != 0;

        let mode = if passive_or_declarative {
            if explicit_table {
                ElementMode::Declarative
            } else {
                ElementMode::Passive
            }
        } else {
            let table = if explicit_table { reader.read_u32_leb()? } else { 0 };
            let offset = read_const_expr(&mut reader)?;
            ElementMode::Active { table, offset }
        };

        // flags 0 and 4 imply funcref and carry no kind byte
        let kind = match (passive_or_declarative || explicit_table, uses_exprs) {
            (false, _) => ValueKind::FuncRef,
            (true, false) => read_elem_kind(&mut reader)?,
            (true, true) => read_ref_type(&mut reader)?,
        };

        let item_count = reader.read_count(u32::MAX)?;
        let mut items = Vec::with_capacity(item_count as usize);
        for _ in 0..item_count {
            let item_at = reader.offset();
            let item = if uses_exprs {
                read_const_expr(&mut reader)?
            } else {
                ConstExpr::RefFunc(reader.read_u32_leb()?)
            };
            check_const_expr(interface, imported_globals, &item, kind).map_err(|e| reader.error_at(item_at, e))?;
            items.push(item);
        }

        if let ElementMode::Active { table, offset } = &mode {
            let table_type = interface.tables.get(*table as usize).ok_or_else(|| {
                reader.error_at(
                    start,
                    DecodeErrorKind::IndexOutOfRange {
                        space: "table",
                        index: *table,
                        len: interface.tables.len() as u32,
                    },
                )
            })?;
            if table_type.element() != kind {
                return Err(reader.error_at(start, DecodeErrorKind::Invalid("element segment type mismatch".into())));
            }
            check_const_expr(interface, imported_globals, offset, ValueKind::I32).map_err(|e| reader.error_at(start, e))?;
        }

        segments.push(ElementSegment { mode, kind, items });
    }

    reader.finish()?;
    Ok(segments)
}

fn decode_data_section(
    binary: &[u8],
    interface: &ModuleInterface,
    imported_globals: usize,
) -> Result<Vec<DataSegment>, DecodeError> {
    let declared_count = match find_section(binary, SECTION_DATA_COUNT)? {
        Some(mut reader) => {
            let count = reader.read_u32_leb()?;
            reader.finish()?;
            Some((count, reader))
        }
        None => None,
    };

    let Some(mut reader) = find_section(binary, SECTION_DATA)? else {
        if let Some((count, reader)) = declared_count.filter(|(count, _)| *count != 0) {
            return Err(reader.error(DecodeErrorKind::Invalid(format!(
                "data count {count} with no data section"
            ))));
        }
        return Ok(vec![]);
    };
    let count_at = reader.offset();
    let count = reader.read_count(MAX_DATA_SEGMENTS)?;
    if let Some((declared, _)) = &declared_count {
        if *declared != count {
            return Err(reader.error_at(count_at, DecodeErrorKind::Invalid("data count and data section have inconsistent lengths".into())));
        }
    }

    let mut segments = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = reader.offset();
        let mode = match reader.read_u32_leb()? {
            0 => DataMode::Active {
                memory: 0,
                offset: read_const_expr(&mut reader)?,
            },
            1 => DataMode::Passive,
            2 => DataMode::Active {
                memory: reader.read_u32_leb()?,
                offset: read_const_expr(&mut reader)?,
            },
            other => {
                return Err(reader.error_at(start, DecodeErrorKind::Invalid(format!("malformed data segment kind {other}"))))
            }
        };
        if let DataMode::Active { memory, offset } = &mode {
            if *memory as usize >= interface.memories.len() {
                return Err(reader.error_at(
                    start,
                    DecodeErrorKind::IndexOutOfRange {
                        space: "memory",
                        index: *memory,
                        len: interface.memories.len() as u32,
                    },
                ));
            }
            check_const_expr(interface, imported_globals, offset, ValueKind::I32).map_err(|e| reader.error_at(start, e))?;
        }
        let len = reader.read_u32_leb()? as usize;
        let bytes = reader.read_bytes(len)?.to_vec();
        segments.push(DataSegment { mode, bytes });
    }

    reader.finish()?;
    Ok(segments)
}
