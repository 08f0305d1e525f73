//! Binary format constants and LEB128 writers
//!
//! The decoder never needs to write, but the serialized-module header and the
//! hand-built modules in tests do.

/// `\0asm`
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 8;

// Section ids
pub const SECTION_CUSTOM: u8 = 0;
pub const SECTION_TYPE: u8 = 1;
pub const SECTION_IMPORT: u8 = 2;
pub const SECTION_FUNCTION: u8 = 3;
pub const SECTION_TABLE: u8 = 4;
pub const SECTION_MEMORY: u8 = 5;
pub const SECTION_GLOBAL: u8 = 6;
pub const SECTION_EXPORT: u8 = 7;
pub const SECTION_START: u8 = 8;
pub const SECTION_ELEMENT: u8 = 9;
pub const SECTION_CODE: u8 = 10;
pub const SECTION_DATA: u8 = 11;
pub const SECTION_DATA_COUNT: u8 = 12;

// Type constructors
pub const TYPE_FUNC: u8 = 0x60;
pub const TYPE_EMPTY_BLOCK: u8 = 0x40;

// Import/export descriptors
pub const DESC_FUNC: u8 = 0x00;
pub const DESC_TABLE: u8 = 0x01;
pub const DESC_MEMORY: u8 = 0x02;
pub const DESC_GLOBAL: u8 = 0x03;

// Limits flags
pub const LIMITS_MIN: u8 = 0x00;
pub const LIMITS_MIN_MAX: u8 = 0x01;

// Global mutability
pub const GLOBAL_CONST: u8 = 0x00;
pub const GLOBAL_VAR: u8 = 0x01;

fn write_vu(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_vs(buf: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_u32_leb(buf: &mut Vec<u8>, v: u32) {
    write_vu(buf, v as u64);
}

pub fn write_u64_leb(buf: &mut Vec<u8>, v: u64) {
    write_vu(buf, v);
}

pub fn write_s32_leb(buf: &mut Vec<u8>, v: i32) {
    write_vs(buf, v as i64);
}

pub fn write_s64_leb(buf: &mut Vec<u8>, v: i64) {
    write_vs(buf, v);
}

/// Write a length-prefixed name
pub fn write_name(buf: &mut Vec<u8>, name: &str) {
    write_u32_leb(buf, name.len() as u32);
    buf.extend_from_slice(name.as_bytes());
}

/// Frame `payload` as a section with the given id
pub fn write_section(buf: &mut Vec<u8>, id: u8, payload: &[u8]) {
    buf.push(id);
    write_u32_leb(buf, payload.len() as u32);
    buf.extend_from_slice(payload);
}

/// The eight byte module header
pub fn write_header(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
}

#[test]
fn test_write_unsigned() {
    let emit = |v: u64| {
        let mut buf = vec![];
        write_u64_leb(&mut buf, v);
        buf
    };

    assert_eq!(emit(0), vec![0]);
    assert_eq!(emit(127), vec![0x7f]);
    assert_eq!(emit(128), vec![0x80, 0x01]);
    assert_eq!(emit(624485), vec![0xe5, 0x8e, 0x26]);
    assert_eq!(emit(u32::MAX as u64), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
}

#[test]
fn test_write_signed() {
    let emit = |v: i64| {
        let mut buf = vec![];
        write_s64_leb(&mut buf, v);
        buf
    };

    assert_eq!(emit(0), vec![0]);
    assert_eq!(emit(-1), vec![0x7f]);
    assert_eq!(emit(63), vec![0x3f]);
    assert_eq!(emit(64), vec![0xc0, 0x00]);
    assert_eq!(emit(-123456), vec![0xc0, 0xbb, 0x78]);
}
