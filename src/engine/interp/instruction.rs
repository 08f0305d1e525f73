//! Function bodies, compiled to a flat instruction list
//!
//! Structured control flow is resolved once, at compile time: every `block`
//! and `if` records the position of its matching `end`, and every `if` the
//! position of its `else`, so a taken branch is a jump to a known index.
//!
//! Validation here is structural. Indices, labels, block types, alignment and
//! global mutability are checked; operand types are not, so a body that
//! mixes them up traps with a type mismatch when it runs.

use serde::{Deserialize, Serialize};

use crate::parser::encoding::TYPE_EMPTY_BLOCK;
use crate::parser::limits::{MAX_BR_TABLE_LABELS, MAX_FUNCTION_LOCALS};
use crate::parser::{read_ref_type, read_val_type, DecodeError, DecodeErrorKind, Reader};
use crate::types::{FuncType, GlobalType, TableType, ValueKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // Control
    Unreachable,
    Nop,
    Block { params: u32, results: u32, end: u32 },
    Loop { params: u32 },
    If { params: u32, results: u32, else_at: Option<u32>, end: u32 },
    Else { end: u32 },
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table: u32 },

    // Parametric
    Drop,
    Select,

    // Variables
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Tables
    TableGet(u32),
    TableSet(u32),
    TableSize(u32),
    TableGrow(u32),
    TableFill(u32),
    TableCopy { dst: u32, src: u32 },

    // Memory; `op` is the load or store opcode
    Load { op: u8, offset: u32 },
    Store { op: u8, offset: u32 },
    MemorySize,
    MemoryGrow,
    MemoryCopy,
    MemoryFill,

    // Numeric
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    /// Any opcode in 0x45..=0xc4
    Numeric(u8),
    /// Saturating truncation, by its 0xfc sub-opcode (0..=7)
    TruncSat(u8),

    // Reference
    RefNull(ValueKind),
    RefIsNull,
    RefFunc(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncBody {
    /// Parameters followed by declared locals
    pub locals: Vec<ValueKind>,
    pub code: Vec<Instr>,
}

/// The index spaces a function body may refer to
pub struct CodeContext<'m> {
    pub types: &'m [FuncType],
    pub funcs: &'m [FuncType],
    pub globals: &'m [GlobalType],
    pub tables: &'m [TableType],
    pub has_memory: bool,
}

/// log2 of the natural alignment of a load or store
pub fn natural_alignment(op: u8) -> u32 {
    match op {
        0x2c | 0x2d | 0x30 | 0x31 | 0x3a | 0x3c => 0,
        0x2e | 0x2f | 0x32 | 0x33 | 0x3b | 0x3d => 1,
        0x28 | 0x2a | 0x34 | 0x35 | 0x36 | 0x38 | 0x3e => 2,
        _ => 3,
    }
}

fn invalid(reader: &Reader, offset: usize, message: impl Into<String>) -> DecodeError {
    reader.error_at(offset, DecodeErrorKind::Invalid(message.into()))
}

fn read_index_in(reader: &mut Reader, len: usize, space: &'static str) -> Result<u32, DecodeError> {
    let start = reader.offset();
    let index = reader.read_u32_leb()?;
    if index as usize >= len {
        return Err(reader.error_at(
            start,
            DecodeErrorKind::IndexOutOfRange {
                space,
                index,
                len: len as u32,
            },
        ));
    }
    Ok(index)
}

fn read_zero_byte(reader: &mut Reader) -> Result<(), DecodeError> {
    let start = reader.offset();
    match reader.read_byte()? {
        0 => Ok(()),
        _ => Err(invalid(reader, start, "zero byte expected")),
    }
}

/// (param count, result count)
fn read_block_type(reader: &mut Reader, ctx: &CodeContext) -> Result<(u32, u32), DecodeError> {
    match reader.peek_byte() {
        Some(TYPE_EMPTY_BLOCK) => {
            reader.read_byte()?;
            Ok((0, 0))
        }
        Some(byte) if ValueKind::from_byte(byte).is_some() => {
            reader.read_byte()?;
            Ok((0, 1))
        }
        _ => {
            let start = reader.offset();
            let index = reader.read_s33_leb()?;
            if index < 0 {
                return Err(invalid(reader, start, "malformed block type"));
            }
            let ty = ctx.types.get(index as usize).ok_or_else(|| {
                reader.error_at(
                    start,
                    DecodeErrorKind::IndexOutOfRange {
                        space: "type",
                        index: index as u32,
                        len: ctx.types.len() as u32,
                    },
                )
            })?;
            Ok((ty.params().len() as u32, ty.results().len() as u32))
        }
    }
}

fn read_label(reader: &mut Reader, open_blocks: usize) -> Result<u32, DecodeError> {
    let start = reader.offset();
    let depth = reader.read_u32_leb()?;
    // depth == open_blocks targets the function body itself
    if depth as usize > open_blocks {
        return Err(invalid(reader, start, format!("unknown label {depth}")));
    }
    Ok(depth)
}

fn require_memory(reader: &Reader, offset: usize, ctx: &CodeContext) -> Result<(), DecodeError> {
    if !ctx.has_memory {
        return Err(reader.error_at(
            offset,
            DecodeErrorKind::IndexOutOfRange {
                space: "memory",
                index: 0,
                len: 0,
            },
        ));
    }
    Ok(())
}

fn read_memarg(reader: &mut Reader, op: u8) -> Result<u32, DecodeError> {
    let start = reader.offset();
    let align = reader.read_u32_leb()?;
    if align > natural_alignment(op) {
        return Err(invalid(reader, start, "alignment must not be larger than natural"));
    }
    reader.read_u32_leb()
}

/// Point the `block` or `if` opened at `open` (and its `else`) at `end_at`
fn patch_end(code: &mut [Instr], open: usize, end_at: u32) {
    let mut else_pos = None;
    match &mut code[open] {
        Instr::Block { end, .. } => *end = end_at,
        Instr::If { end, else_at, .. } => {
            *end = end_at;
            else_pos = *else_at;
        }
        _ => {}
    }
    if let Some(pos) = else_pos {
        if let Instr::Else { end } = &mut code[pos as usize] {
            *end = end_at;
        }
    }
}

/// Compile one entry of the code section. `reader` must cover exactly the
/// entry's body (locals and expression).
pub fn compile_body(reader: &mut Reader, ty: &FuncType, ctx: &CodeContext) -> Result<FuncBody, DecodeError> {
    let mut locals = ty.params().to_vec();
    let groups = reader.read_count(MAX_FUNCTION_LOCALS)?;
    let mut declared = 0u64;
    for _ in 0..groups {
        let start = reader.offset();
        let count = reader.read_u32_leb()?;
        declared += count as u64;
        if declared > MAX_FUNCTION_LOCALS as u64 {
            return Err(invalid(reader, start, "too many locals"));
        }
        let kind = read_val_type(reader)?;
        locals.extend(std::iter::repeat(kind).take(count as usize));
    }

    let mut code = vec![];
    // positions of the blocks, loops and ifs not yet closed
    let mut open: Vec<usize> = vec![];

    loop {
        let start = reader.offset();
        let opcode = reader.read_byte()?;
        let instr = match opcode {
            0x00 => Instr::Unreachable,
            0x01 => Instr::Nop,
            0x02 => {
                let (params, results) = read_block_type(reader, ctx)?;
                open.push(code.len());
                Instr::Block { params, results, end: 0 }
            }
            0x03 => {
                let (params, _) = read_block_type(reader, ctx)?;
                open.push(code.len());
                Instr::Loop { params }
            }
            0x04 => {
                let (params, results) = read_block_type(reader, ctx)?;
                open.push(code.len());
                Instr::If {
                    params,
                    results,
                    else_at: None,
                    end: 0,
                }
            }
            0x05 => {
                let else_pos = code.len() as u32;
                match open.last().map(|&pos| &mut code[pos]) {
                    Some(Instr::If { else_at, .. }) if else_at.is_none() => *else_at = Some(else_pos),
                    _ => return Err(invalid(reader, start, "else without matching if")),
                }
                Instr::Else { end: 0 }
            }
            0x0b => match open.pop() {
                Some(pos) => {
                    let end_at = code.len() as u32;
                    patch_end(&mut code, pos, end_at);
                    Instr::End
                }
                None => {
                    code.push(Instr::End);
                    break;
                }
            },
            0x0c => Instr::Br(read_label(reader, open.len())?),
            0x0d => Instr::BrIf(read_label(reader, open.len())?),
            0x0e => {
                let count = reader.read_count(MAX_BR_TABLE_LABELS)?;
                let targets = (0..count)
                    .map(|_| read_label(reader, open.len()))
                    .collect::<Result<Vec<_>, _>>()?;
                let default = read_label(reader, open.len())?;
                Instr::BrTable { targets, default }
            }
            0x0f => Instr::Return,
            0x10 => Instr::Call(read_index_in(reader, ctx.funcs.len(), "function")?),
            0x11 => {
                let type_index = read_index_in(reader, ctx.types.len(), "type")?;
                let table_at = reader.offset();
                let table = read_index_in(reader, ctx.tables.len(), "table")?;
                if ctx.tables[table as usize].element() != ValueKind::FuncRef {
                    return Err(invalid(reader, table_at, "call_indirect requires a funcref table"));
                }
                Instr::CallIndirect { type_index, table }
            }

            0x1a => Instr::Drop,
            0x1b => Instr::Select,
            0x1c => {
                let count_at = reader.offset();
                if reader.read_u32_leb()? != 1 {
                    return Err(invalid(reader, count_at, "invalid result arity for select"));
                }
                read_val_type(reader)?;
                Instr::Select
            }

            0x20 => Instr::LocalGet(read_index_in(reader, locals.len(), "local")?),
            0x21 => Instr::LocalSet(read_index_in(reader, locals.len(), "local")?),
            0x22 => Instr::LocalTee(read_index_in(reader, locals.len(), "local")?),
            0x23 => Instr::GlobalGet(read_index_in(reader, ctx.globals.len(), "global")?),
            0x24 => {
                let index = read_index_in(reader, ctx.globals.len(), "global")?;
                if !ctx.globals[index as usize].is_mutable() {
                    return Err(invalid(reader, start, "global is immutable"));
                }
                Instr::GlobalSet(index)
            }
            0x25 => Instr::TableGet(read_index_in(reader, ctx.tables.len(), "table")?),
            0x26 => Instr::TableSet(read_index_in(reader, ctx.tables.len(), "table")?),

            0x28..=0x35 => {
                require_memory(reader, start, ctx)?;
                let offset = read_memarg(reader, opcode)?;
                Instr::Load { op: opcode, offset }
            }
            0x36..=0x3e => {
                require_memory(reader, start, ctx)?;
                let offset = read_memarg(reader, opcode)?;
                Instr::Store { op: opcode, offset }
            }
            0x3f => {
                require_memory(reader, start, ctx)?;
                read_zero_byte(reader)?;
                Instr::MemorySize
            }
            0x40 => {
                require_memory(reader, start, ctx)?;
                read_zero_byte(reader)?;
                Instr::MemoryGrow
            }

            0x41 => Instr::I32Const(reader.read_s32_leb()?),
            0x42 => Instr::I64Const(reader.read_s64_leb()?),
            0x43 => Instr::F32Const(reader.read_u32_le()?),
            0x44 => Instr::F64Const(reader.read_u64_le()?),
            0x45..=0xc4 => Instr::Numeric(opcode),

            0xd0 => Instr::RefNull(read_ref_type(reader)?),
            0xd1 => Instr::RefIsNull,
            0xd2 => Instr::RefFunc(read_index_in(reader, ctx.funcs.len(), "function")?),

            0xfc => {
                let sub = reader.read_u32_leb()?;
                match sub {
                    0..=7 => Instr::TruncSat(sub as u8),
                    10 => {
                        require_memory(reader, start, ctx)?;
                        read_zero_byte(reader)?;
                        read_zero_byte(reader)?;
                        Instr::MemoryCopy
                    }
                    11 => {
                        require_memory(reader, start, ctx)?;
                        read_zero_byte(reader)?;
                        Instr::MemoryFill
                    }
                    14 => {
                        let dst = read_index_in(reader, ctx.tables.len(), "table")?;
                        let src = read_index_in(reader, ctx.tables.len(), "table")?;
                        Instr::TableCopy { dst, src }
                    }
                    15 => Instr::TableGrow(read_index_in(reader, ctx.tables.len(), "table")?),
                    16 => Instr::TableSize(read_index_in(reader, ctx.tables.len(), "table")?),
                    17 => Instr::TableFill(read_index_in(reader, ctx.tables.len(), "table")?),
                    other => return Err(invalid(reader, start, format!("unsupported instruction 0xfc {other}"))),
                }
            }

            other => return Err(invalid(reader, start, format!("unknown opcode {other:#04x}"))),
        };
        code.push(instr);
    }

    reader.finish()?;
    Ok(FuncBody { locals, code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Limits, Mutability};

    fn compile(bytes: &[u8], ty: &FuncType) -> Result<FuncBody, DecodeErrorKind> {
        let types = [FuncType::new([ValueKind::I32], [ValueKind::I32])];
        let globals = [
            GlobalType::new(ValueKind::I32, Mutability::Const),
            GlobalType::new(ValueKind::I64, Mutability::Var),
        ];
        let tables = [TableType::new(ValueKind::FuncRef, Limits::at_least(1))];
        let ctx = CodeContext {
            types: &types,
            funcs: &types,
            globals: &globals,
            tables: &tables,
            has_memory: false,
        };
        compile_body(&mut Reader::new(bytes), ty, &ctx).map_err(|e| e.kind)
    }

    fn void() -> FuncType {
        FuncType::new([], [])
    }

    #[test]
    fn test_locals_follow_params() {
        let ty = FuncType::new([ValueKind::F32], []);
        // 2 groups: 2 x i64, 1 x f64
        let body = compile(&[0x02, 0x02, 0x7e, 0x01, 0x7c, 0x0b], &ty).unwrap();
        assert_eq!(
            body.locals,
            vec![ValueKind::F32, ValueKind::I64, ValueKind::I64, ValueKind::F64]
        );
        assert_eq!(body.code, vec![Instr::End]);
    }

    #[test]
    fn test_block_ends_are_resolved() {
        // block (loop (br 1)) end; if else end; end
        let bytes = [
            0x00, 0x02, 0x40, 0x03, 0x40, 0x0c, 0x01, 0x0b, 0x0b, 0x41, 0x01, 0x04, 0x40, 0x05, 0x0b, 0x0b,
        ];
        let body = compile(&bytes, &void()).unwrap();
        assert_eq!(
            body.code,
            vec![
                Instr::Block {
                    params: 0,
                    results: 0,
                    end: 4
                },
                Instr::Loop { params: 0 },
                Instr::Br(1),
                Instr::End,
                Instr::End,
                Instr::I32Const(1),
                Instr::If {
                    params: 0,
                    results: 0,
                    else_at: Some(7),
                    end: 8
                },
                Instr::Else { end: 8 },
                Instr::End,
                Instr::End,
            ]
        );
    }

    #[test]
    fn test_block_type_by_index() {
        // block (type 0) end
        let body = compile(&[0x00, 0x02, 0x00, 0x0b, 0x0b], &void()).unwrap();
        assert_eq!(
            body.code[0],
            Instr::Block {
                params: 1,
                results: 1,
                end: 1
            }
        );
        assert!(matches!(
            compile(&[0x00, 0x02, 0x05, 0x0b, 0x0b], &void()),
            Err(DecodeErrorKind::IndexOutOfRange { space: "type", .. })
        ));
    }

    #[test]
    fn test_label_depth_is_checked() {
        assert!(compile(&[0x00, 0x0c, 0x00, 0x0b], &void()).is_ok());
        assert_eq!(
            compile(&[0x00, 0x0c, 0x01, 0x0b], &void()),
            Err(DecodeErrorKind::Invalid("unknown label 1".into()))
        );
    }

    #[test]
    fn test_global_set_requires_mutable() {
        assert!(compile(&[0x00, 0x42, 0x00, 0x24, 0x01, 0x0b], &void()).is_ok());
        assert_eq!(
            compile(&[0x00, 0x41, 0x00, 0x24, 0x00, 0x0b], &void()),
            Err(DecodeErrorKind::Invalid("global is immutable".into()))
        );
    }

    #[test]
    fn test_memory_instructions_need_a_memory() {
        assert!(matches!(
            compile(&[0x00, 0x41, 0x00, 0x28, 0x02, 0x00, 0x1a, 0x0b], &void()),
            Err(DecodeErrorKind::IndexOutOfRange { space: "memory", .. })
        ));
    }

    #[test]
    fn test_alignment_is_checked() {
        let mut reader = Reader::new(&[0x03, 0x00]);
        assert!(read_memarg(&mut reader, 0x28).is_err());
        let mut reader = Reader::new(&[0x02, 0x10]);
        assert_eq!(read_memarg(&mut reader, 0x28).unwrap(), 16);
    }

    #[test]
    fn test_body_must_end_exactly() {
        assert_eq!(
            compile(&[0x00, 0x01], &void()),
            Err(DecodeErrorKind::UnexpectedEof)
        );
        assert_eq!(
            compile(&[0x00, 0x0b, 0x01], &void()),
            Err(DecodeErrorKind::SectionSizeMismatch { unread: 1 })
        );
        assert_eq!(
            compile(&[0x00, 0x05, 0x0b], &void()),
            Err(DecodeErrorKind::Invalid("else without matching if".into()))
        );
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(
            compile(&[0x00, 0xff, 0x0b], &void()),
            Err(DecodeErrorKind::Invalid("unknown opcode 0xff".into()))
        );
    }
}
