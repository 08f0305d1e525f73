//! Numeric and memory instruction semantics
//!
//! Operands are popped in reverse: for a binary operation `b` is on top of
//! the stack and `a` below it. Integer arithmetic wraps; division by zero,
//! signed overflow and out-of-range float-to-int conversions trap.

use super::memory::Memory;
use super::stack::Stack;
use super::RuntimeError;
use crate::engine::RawVal;

macro_rules! unop {
    ($stack:ident, $pop:ident, $variant:ident, |$a:ident| $body:expr) => {{
        let $a = $stack.$pop()?;
        $stack.push(RawVal::$variant($body));
    }};
}

macro_rules! binop {
    ($stack:ident, $pop:ident, $variant:ident, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $stack.$pop()?;
        let $a = $stack.$pop()?;
        $stack.push(RawVal::$variant($body));
    }};
}

// ============================================================================
// Integer division
// ============================================================================

macro_rules! int_division {
    ($div_s:ident, $div_u:ident, $rem_s:ident, $rem_u:ident, $s:ty, $u:ty) => {
        fn $div_s(a: $s, b: $s) -> Result<$s, RuntimeError> {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.checked_div(b).ok_or(RuntimeError::IntegerOverflow)
        }

        fn $div_u(a: $s, b: $s) -> Result<$s, RuntimeError> {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(((a as $u) / (b as $u)) as $s)
        }

        fn $rem_s(a: $s, b: $s) -> Result<$s, RuntimeError> {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            // MIN % -1 is 0, not an overflow
            Ok(a.wrapping_rem(b))
        }

        fn $rem_u(a: $s, b: $s) -> Result<$s, RuntimeError> {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(((a as $u) % (b as $u)) as $s)
        }
    };
}

int_division!(i32_div_s, i32_div_u, i32_rem_s, i32_rem_u, i32, u32);
int_division!(i64_div_s, i64_div_u, i64_rem_s, i64_rem_u, i64, u64);

// ============================================================================
// Float min/max
// ============================================================================

macro_rules! float_min_max {
    ($min:ident, $max:ident, $t:ty) => {
        /// NaN if either operand is NaN; -0 is less than +0
        fn $min(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == b {
                if a.is_sign_negative() {
                    a
                } else {
                    b
                }
            } else {
                a.min(b)
            }
        }

        /// NaN if either operand is NaN; +0 is greater than -0
        fn $max(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == b {
                if a.is_sign_positive() {
                    a
                } else {
                    b
                }
            } else {
                a.max(b)
            }
        }
    };
}

float_min_max!(f32_min, f32_max, f32);
float_min_max!(f64_min, f64_max, f64);

// ============================================================================
// Float to integer truncation
// ============================================================================

/// Truncate `x` toward zero, trapping unless the result lies in
/// `[low, high)`. Every f32 is exactly representable as an f64, so both
/// widths go through here.
fn trunc_checked(x: f64, low: f64, high: f64) -> Result<f64, RuntimeError> {
    if x.is_nan() {
        return Err(RuntimeError::InvalidConversion);
    }
    let t = x.trunc();
    if t < low || t >= high {
        return Err(RuntimeError::IntegerOverflow);
    }
    Ok(t)
}

const TWO_31: f64 = 2147483648.0;
const TWO_32: f64 = 4294967296.0;
const TWO_63: f64 = 9223372036854775808.0;
const TWO_64: f64 = 18446744073709551616.0;

fn trunc_i32_s(x: f64) -> Result<i32, RuntimeError> {
    Ok(trunc_checked(x, -TWO_31, TWO_31)? as i32)
}

fn trunc_i32_u(x: f64) -> Result<i32, RuntimeError> {
    // anything in (-1, 0) truncates to -0, which is fine
    Ok(trunc_checked(x, -0.0, TWO_32)? as u32 as i32)
}

fn trunc_i64_s(x: f64) -> Result<i64, RuntimeError> {
    Ok(trunc_checked(x, -TWO_63, TWO_63)? as i64)
}

fn trunc_i64_u(x: f64) -> Result<i64, RuntimeError> {
    Ok(trunc_checked(x, -0.0, TWO_64)? as u64 as i64)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Execute a numeric instruction, opcodes 0x45 to 0xc4
pub fn numeric(stack: &mut Stack, op: u8) -> Result<(), RuntimeError> {
    match op {
        // i32 comparison
        0x45 => unop!(stack, pop_i32, I32, |a| (a == 0) as i32),
        0x46 => binop!(stack, pop_i32, I32, |a, b| (a == b) as i32),
        0x47 => binop!(stack, pop_i32, I32, |a, b| (a != b) as i32),
        0x48 => binop!(stack, pop_i32, I32, |a, b| (a < b) as i32),
        0x49 => binop!(stack, pop_i32, I32, |a, b| ((a as u32) < (b as u32)) as i32),
        0x4a => binop!(stack, pop_i32, I32, |a, b| (a > b) as i32),
        0x4b => binop!(stack, pop_i32, I32, |a, b| ((a as u32) > (b as u32)) as i32),
        0x4c => binop!(stack, pop_i32, I32, |a, b| (a <= b) as i32),
        0x4d => binop!(stack, pop_i32, I32, |a, b| ((a as u32) <= (b as u32)) as i32),
        0x4e => binop!(stack, pop_i32, I32, |a, b| (a >= b) as i32),
        0x4f => binop!(stack, pop_i32, I32, |a, b| ((a as u32) >= (b as u32)) as i32),

        // i64 comparison
        0x50 => unop!(stack, pop_i64, I32, |a| (a == 0) as i32),
        0x51 => binop!(stack, pop_i64, I32, |a, b| (a == b) as i32),
        0x52 => binop!(stack, pop_i64, I32, |a, b| (a != b) as i32),
        0x53 => binop!(stack, pop_i64, I32, |a, b| (a < b) as i32),
        0x54 => binop!(stack, pop_i64, I32, |a, b| ((a as u64) < (b as u64)) as i32),
        0x55 => binop!(stack, pop_i64, I32, |a, b| (a > b) as i32),
        0x56 => binop!(stack, pop_i64, I32, |a, b| ((a as u64) > (b as u64)) as i32),
        0x57 => binop!(stack, pop_i64, I32, |a, b| (a <= b) as i32),
        0x58 => binop!(stack, pop_i64, I32, |a, b| ((a as u64) <= (b as u64)) as i32),
        0x59 => binop!(stack, pop_i64, I32, |a, b| (a >= b) as i32),
        0x5a => binop!(stack, pop_i64, I32, |a, b| ((a as u64) >= (b as u64)) as i32),

        // float comparison
        0x5b => binop!(stack, pop_f32, I32, |a, b| (a == b) as i32),
        0x5c => binop!(stack, pop_f32, I32, |a, b| (a != b) as i32),
        0x5d => binop!(stack, pop_f32, I32, |a, b| (a < b) as i32),
        0x5e => binop!(stack, pop_f32, I32, |a, b| (a > b) as i32),
        0x5f => binop!(stack, pop_f32, I32, |a, b| (a <= b) as i32),
        0x60 => binop!(stack, pop_f32, I32, |a, b| (a >= b) as i32),
        0x61 => binop!(stack, pop_f64, I32, |a, b| (a == b) as i32),
        0x62 => binop!(stack, pop_f64, I32, |a, b| (a != b) as i32),
        0x63 => binop!(stack, pop_f64, I32, |a, b| (a < b) as i32),
        0x64 => binop!(stack, pop_f64, I32, |a, b| (a > b) as i32),
        0x65 => binop!(stack, pop_f64, I32, |a, b| (a <= b) as i32),
        0x66 => binop!(stack, pop_f64, I32, |a, b| (a >= b) as i32),

        // i32 arithmetic
        0x67 => unop!(stack, pop_i32, I32, |a| a.leading_zeros() as i32),
        0x68 => unop!(stack, pop_i32, I32, |a| a.trailing_zeros() as i32),
        0x69 => unop!(stack, pop_i32, I32, |a| a.count_ones() as i32),
        0x6a => binop!(stack, pop_i32, I32, |a, b| a.wrapping_add(b)),
        0x6b => binop!(stack, pop_i32, I32, |a, b| a.wrapping_sub(b)),
        0x6c => binop!(stack, pop_i32, I32, |a, b| a.wrapping_mul(b)),
        0x6d => binop!(stack, pop_i32, I32, |a, b| i32_div_s(a, b)?),
        0x6e => binop!(stack, pop_i32, I32, |a, b| i32_div_u(a, b)?),
        0x6f => binop!(stack, pop_i32, I32, |a, b| i32_rem_s(a, b)?),
        0x70 => binop!(stack, pop_i32, I32, |a, b| i32_rem_u(a, b)?),
        0x71 => binop!(stack, pop_i32, I32, |a, b| a & b),
        0x72 => binop!(stack, pop_i32, I32, |a, b| a | b),
        0x73 => binop!(stack, pop_i32, I32, |a, b| a ^ b),
        0x74 => binop!(stack, pop_i32, I32, |a, b| a.wrapping_shl(b as u32)),
        0x75 => binop!(stack, pop_i32, I32, |a, b| a.wrapping_shr(b as u32)),
        0x76 => binop!(stack, pop_i32, I32, |a, b| (a as u32).wrapping_shr(b as u32) as i32),
        0x77 => binop!(stack, pop_i32, I32, |a, b| a.rotate_left((b & 31) as u32)),
        0x78 => binop!(stack, pop_i32, I32, |a, b| a.rotate_right((b & 31) as u32)),

        // i64 arithmetic
        0x79 => unop!(stack, pop_i64, I64, |a| a.leading_zeros() as i64),
        0x7a => unop!(stack, pop_i64, I64, |a| a.trailing_zeros() as i64),
        0x7b => unop!(stack, pop_i64, I64, |a| a.count_ones() as i64),
        0x7c => binop!(stack, pop_i64, I64, |a, b| a.wrapping_add(b)),
        0x7d => binop!(stack, pop_i64, I64, |a, b| a.wrapping_sub(b)),
        0x7e => binop!(stack, pop_i64, I64, |a, b| a.wrapping_mul(b)),
        0x7f => binop!(stack, pop_i64, I64, |a, b| i64_div_s(a, b)?),
        0x80 => binop!(stack, pop_i64, I64, |a, b| i64_div_u(a, b)?),
        0x81 => binop!(stack, pop_i64, I64, |a, b| i64_rem_s(a, b)?),
        0x82 => binop!(stack, pop_i64, I64, |a, b| i64_rem_u(a, b)?),
        0x83 => binop!(stack, pop_i64, I64, |a, b| a & b),
        0x84 => binop!(stack, pop_i64, I64, |a, b| a | b),
        0x85 => binop!(stack, pop_i64, I64, |a, b| a ^ b),
        0x86 => binop!(stack, pop_i64, I64, |a, b| a.wrapping_shl(b as u32)),
        0x87 => binop!(stack, pop_i64, I64, |a, b| a.wrapping_shr(b as u32)),
        0x88 => binop!(stack, pop_i64, I64, |a, b| (a as u64).wrapping_shr(b as u32) as i64),
        0x89 => binop!(stack, pop_i64, I64, |a, b| a.rotate_left((b & 63) as u32)),
        0x8a => binop!(stack, pop_i64, I64, |a, b| a.rotate_right((b & 63) as u32)),

        // f32 arithmetic
        0x8b => unop!(stack, pop_f32, F32, |a| a.abs()),
        0x8c => unop!(stack, pop_f32, F32, |a| -a),
        0x8d => unop!(stack, pop_f32, F32, |a| a.ceil()),
        0x8e => unop!(stack, pop_f32, F32, |a| a.floor()),
        0x8f => unop!(stack, pop_f32, F32, |a| a.trunc()),
        0x90 => unop!(stack, pop_f32, F32, |a| a.round_ties_even()),
        0x91 => unop!(stack, pop_f32, F32, |a| a.sqrt()),
        0x92 => binop!(stack, pop_f32, F32, |a, b| a + b),
        0x93 => binop!(stack, pop_f32, F32, |a, b| a - b),
        0x94 => binop!(stack, pop_f32, F32, |a, b| a * b),
        0x95 => binop!(stack, pop_f32, F32, |a, b| a / b),
        0x96 => binop!(stack, pop_f32, F32, |a, b| f32_min(a, b)),
        0x97 => binop!(stack, pop_f32, F32, |a, b| f32_max(a, b)),
        0x98 => binop!(stack, pop_f32, F32, |a, b| a.copysign(b)),

        // f64 arithmetic
        0x99 => unop!(stack, pop_f64, F64, |a| a.abs()),
        0x9a => unop!(stack, pop_f64, F64, |a| -a),
        0x9b => unop!(stack, pop_f64, F64, |a| a.ceil()),
        0x9c => unop!(stack, pop_f64, F64, |a| a.floor()),
        0x9d => unop!(stack, pop_f64, F64, |a| a.trunc()),
        0x9e => unop!(stack, pop_f64, F64, |a| a.round_ties_even()),
        0x9f => unop!(stack, pop_f64, F64, |a| a.sqrt()),
        0xa0 => binop!(stack, pop_f64, F64, |a, b| a + b),
        0xa1 => binop!(stack, pop_f64, F64, |a, b| a - b),
        0xa2 => binop!(stack, pop_f64, F64, |a, b| a * b),
        0xa3 => binop!(stack, pop_f64, F64, |a, b| a / b),
        0xa4 => binop!(stack, pop_f64, F64, |a, b| f64_min(a, b)),
        0xa5 => binop!(stack, pop_f64, F64, |a, b| f64_max(a, b)),
        0xa6 => binop!(stack, pop_f64, F64, |a, b| a.copysign(b)),

        // conversions
        0xa7 => unop!(stack, pop_i64, I32, |a| a as i32),
        0xa8 => unop!(stack, pop_f32, I32, |a| trunc_i32_s(a as f64)?),
        0xa9 => unop!(stack, pop_f32, I32, |a| trunc_i32_u(a as f64)?),
        0xaa => unop!(stack, pop_f64, I32, |a| trunc_i32_s(a)?),
        0xab => unop!(stack, pop_f64, I32, |a| trunc_i32_u(a)?),
        0xac => unop!(stack, pop_i32, I64, |a| a as i64),
        0xad => unop!(stack, pop_i32, I64, |a| a as u32 as i64),
        0xae => unop!(stack, pop_f32, I64, |a| trunc_i64_s(a as f64)?),
        0xaf => unop!(stack, pop_f32, I64, |a| trunc_i64_u(a as f64)?),
        0xb0 => unop!(stack, pop_f64, I64, |a| trunc_i64_s(a)?),
        0xb1 => unop!(stack, pop_f64, I64, |a| trunc_i64_u(a)?),
        0xb2 => unop!(stack, pop_i32, F32, |a| a as f32),
        0xb3 => unop!(stack, pop_i32, F32, |a| a as u32 as f32),
        0xb4 => unop!(stack, pop_i64, F32, |a| a as f32),
        0xb5 => unop!(stack, pop_i64, F32, |a| a as u64 as f32),
        0xb6 => unop!(stack, pop_f64, F32, |a| a as f32),
        0xb7 => unop!(stack, pop_i32, F64, |a| a as f64),
        0xb8 => unop!(stack, pop_i32, F64, |a| a as u32 as f64),
        0xb9 => unop!(stack, pop_i64, F64, |a| a as f64),
        0xba => unop!(stack, pop_i64, F64, |a| a as u64 as f64),
        0xbb => unop!(stack, pop_f32, F64, |a| a as f64),
        0xbc => unop!(stack, pop_f32, I32, |a| a.to_bits() as i32),
        0xbd => unop!(stack, pop_f64, I64, |a| a.to_bits() as i64),
        0xbe => unop!(stack, pop_i32, F32, |a| f32::from_bits(a as u32)),
        0xbf => unop!(stack, pop_i64, F64, |a| f64::from_bits(a as u64)),

        // sign extension
        0xc0 => unop!(stack, pop_i32, I32, |a| a as i8 as i32),
        0xc1 => unop!(stack, pop_i32, I32, |a| a as i16 as i32),
        0xc2 => unop!(stack, pop_i64, I64, |a| a as i8 as i64),
        0xc3 => unop!(stack, pop_i64, I64, |a| a as i16 as i64),
        0xc4 => unop!(stack, pop_i64, I64, |a| a as i32 as i64),

        other => return Err(RuntimeError::Unimplemented(format!("numeric opcode {other:#04x}"))),
    }
    Ok(())
}

/// Saturating float-to-int truncation, 0xfc sub-opcodes 0 to 7. NaN becomes
/// zero; out-of-range values clamp.
pub fn trunc_sat(stack: &mut Stack, sub: u8) -> Result<(), RuntimeError> {
    match sub {
        0 => unop!(stack, pop_f32, I32, |a| a as i32),
        1 => unop!(stack, pop_f32, I32, |a| a as u32 as i32),
        2 => unop!(stack, pop_f64, I32, |a| a as i32),
        3 => unop!(stack, pop_f64, I32, |a| a as u32 as i32),
        4 => unop!(stack, pop_f32, I64, |a| a as i64),
        5 => unop!(stack, pop_f32, I64, |a| a as u64 as i64),
        6 => unop!(stack, pop_f64, I64, |a| a as i64),
        7 => unop!(stack, pop_f64, I64, |a| a as u64 as i64),
        other => return Err(RuntimeError::Unimplemented(format!("0xfc {other}"))),
    }
    Ok(())
}

/// Effective address of an access: the i32 operand, zero-extended, plus the
/// static offset. Never wraps.
fn effective_address(stack: &mut Stack, offset: u32) -> Result<u64, RuntimeError> {
    Ok(stack.pop_u32()? as u64 + offset as u64)
}

/// Execute a load, opcodes 0x28 to 0x35
pub fn load(stack: &mut Stack, memory: &Memory, op: u8, offset: u32) -> Result<(), RuntimeError> {
    let addr = effective_address(stack, offset)?;
    let value = match op {
        0x28 => RawVal::I32(memory.read_u32(addr)? as i32),
        0x29 => RawVal::I64(memory.read_u64(addr)? as i64),
        0x2a => RawVal::F32(f32::from_bits(memory.read_u32(addr)?)),
        0x2b => RawVal::F64(f64::from_bits(memory.read_u64(addr)?)),
        0x2c => RawVal::I32(memory.read_u8(addr)? as i8 as i32),
        0x2d => RawVal::I32(memory.read_u8(addr)? as i32),
        0x2e => RawVal::I32(memory.read_u16(addr)? as i16 as i32),
        0x2f => RawVal::I32(memory.read_u16(addr)? as i32),
        0x30 => RawVal::I64(memory.read_u8(addr)? as i8 as i64),
        0x31 => RawVal::I64(memory.read_u8(addr)? as i64),
        0x32 => RawVal::I64(memory.read_u16(addr)? as i16 as i64),
        0x33 => RawVal::I64(memory.read_u16(addr)? as i64),
        0x34 => RawVal::I64(memory.read_u32(addr)? as i32 as i64),
        0x35 => RawVal::I64(memory.read_u32(addr)? as i64),
        other => return Err(RuntimeError::Unimplemented(format!("load opcode {other:#04x}"))),
    };
    stack.push(value);
    Ok(())
}

/// Execute a store, opcodes 0x36 to 0x3e
pub fn store(stack: &mut Stack, memory: &mut Memory, op: u8, offset: u32) -> Result<(), RuntimeError> {
    match op {
        0x36 | 0x3a | 0x3b => {
            let value = stack.pop_i32()?;
            let addr = effective_address(stack, offset)?;
            match op {
                0x36 => memory.write_u32(addr, value as u32),
                0x3a => memory.write_u8(addr, value as u8),
                _ => memory.write_u16(addr, value as u16),
            }
        }
        0x37 | 0x3c | 0x3d | 0x3e => {
            let value = stack.pop_i64()?;
            let addr = effective_address(stack, offset)?;
            match op {
                0x37 => memory.write_u64(addr, value as u64),
                0x3c => memory.write_u8(addr, value as u8),
                0x3d => memory.write_u16(addr, value as u16),
                _ => memory.write_u32(addr, value as u32),
            }
        }
        0x38 => {
            let value = stack.pop_f32()?;
            let addr = effective_address(stack, offset)?;
            memory.write_u32(addr, value.to_bits())
        }
        0x39 => {
            let value = stack.pop_f64()?;
            let addr = effective_address(stack, offset)?;
            memory.write_u64(addr, value.to_bits())
        }
        other => Err(RuntimeError::Unimplemented(format!("store opcode {other:#04x}"))),
    }
}
