use byteorder::{ByteOrder, LittleEndian};

use super::{DecodeError, DecodeErrorKind, Section};

/// A forward-only cursor over a slice of module bytes.
///
/// Offsets reported in errors are absolute within the module: a reader
/// created for a section payload carries the payload's starting offset.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
    section: Section,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            bytes,
            pos: 0,
            base: 0,
            section: Section::Header,
        }
    }

    /// A reader over `bytes`, which start at absolute offset `base` inside
    /// `section`
    pub fn with_section(bytes: &'a [u8], base: usize, section: Section) -> Reader<'a> {
        Reader {
            bytes,
            pos: 0,
            base,
            section,
        }
    }
}

impl<'a> Reader<'a> {
    // Basic operations --------------------------------------------------------

    /// Absolute offset of the next byte
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        self.error_at(self.offset(), kind)
    }

    pub fn error_at(&self, offset: usize, kind: DecodeErrorKind) -> DecodeError {
        DecodeError {
            section: self.section,
            offset,
            kind,
        }
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        match self.bytes.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                Ok(byte)
            }
            None => Err(self.error(DecodeErrorKind::UnexpectedEof)),
        }
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(self.error(DecodeErrorKind::UnexpectedEof));
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.read_bytes(len).map(|_| ())
    }

    /// Split off the next `len` bytes as a reader of their own, labelled with
    /// `section`
    pub fn sub_reader(&mut self, len: usize, section: Section) -> Result<Reader<'a>, DecodeError> {
        let base = self.offset();
        let bytes = self.read_bytes(len)?;
        Ok(Reader::with_section(bytes, base, section))
    }

    /// Fail unless every byte has been consumed
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error(DecodeErrorKind::SectionSizeMismatch {
                unread: self.remaining(),
            }))
        }
    }

    // Read and interpret types ------------------------------------------------

    fn read_unsigned(&mut self, bits: u32) -> Result<u64, DecodeError> {
        let start = self.offset();
        let max_bytes = (bits + 6) / 7;
        let mut result = 0u64;
        let mut shift = 0u32;

        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            let low = (byte & 0x7f) as u64;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(self.error_at(start, DecodeErrorKind::IntegerTooLong));
                }
                let avail = bits - shift;
                if avail < 7 && low >> avail != 0 {
                    return Err(self.error_at(start, DecodeErrorKind::IntegerOverflow));
                }
            }
            result |= low << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(self.error_at(start, DecodeErrorKind::IntegerTooLong))
    }

    fn read_signed(&mut self, bits: u32) -> Result<i64, DecodeError> {
        let start = self.offset();
        let max_bytes = (bits + 6) / 7;
        let mut result = 0i64;
        let mut shift = 0u32;

        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(self.error_at(start, DecodeErrorKind::IntegerTooLong));
                }
                // unused high bits must all equal the sign bit
                let avail = bits - shift;
                let mask = (0x7fu8 << (avail - 1)) & 0x7f;
                let upper = byte & mask;
                if upper != 0 && upper != mask {
                    return Err(self.error_at(start, DecodeErrorKind::IntegerOverflow));
                }
            }
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }

        Err(self.error_at(start, DecodeErrorKind::IntegerTooLong))
    }

    pub fn read_u32_leb(&mut self) -> Result<u32, DecodeError> {
        self.read_unsigned(32).map(|v| v as u32)
    }

    pub fn read_u64_leb(&mut self) -> Result<u64, DecodeError> {
        self.read_unsigned(64)
    }

    pub fn read_s32_leb(&mut self) -> Result<i32, DecodeError> {
        self.read_signed(32).map(|v| v as i32)
    }

    /// Block types use a 33-bit signed encoding
    pub fn read_s33_leb(&mut self) -> Result<i64, DecodeError> {
        self.read_signed(33)
    }

    pub fn read_s64_leb(&mut self) -> Result<i64, DecodeError> {
        self.read_signed(64)
    }

    /// A LEB128 element count, checked against `limit` and against the bytes
    /// left (every entry takes at least one byte)
    pub fn read_count(&mut self, limit: u32) -> Result<u32, DecodeError> {
        let start = self.offset();
        let count = self.read_u32_leb()?;
        if count > limit || count as usize > self.remaining() {
            return Err(self.error_at(start, DecodeErrorKind::CountTooLarge { count, limit }));
        }
        Ok(count)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let start = self.offset();
        let len = self.read_u32_leb()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| self.error_at(start, DecodeErrorKind::InvalidUtf8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::encoding::{write_s64_leb, write_u64_leb};

    fn kind_of(err: DecodeError) -> DecodeErrorKind {
        err.kind
    }

    #[test]
    fn test_read_u32_leb() {
        let read = |v: &[u8]| Reader::new(v).read_u32_leb();

        assert_eq!(read(&[0]), Ok(0));
        assert_eq!(read(&[1]), Ok(1));
        assert_eq!(read(&[0b11100101, 0b10001110, 0b00100110]), Ok(624485));
        assert_eq!(read(&[0x80, 0x7f]), Ok(16256));
        assert_eq!(read(&[0xff, 0xff, 0xff, 0xff, 0x0f]), Ok(0xffffffff));
        assert_eq!(read(&[128, 128, 128, 128, 8]), Ok(0x80000000));
        // redundant zero padding is legal within five bytes
        assert_eq!(read(&[0x81, 0x80, 0x80, 0x80, 0x00]), Ok(1));
    }

    #[test]
    fn test_read_u32_leb_overflow() {
        let read = |v: &[u8]| Reader::new(v).read_u32_leb().map_err(kind_of);

        assert_eq!(read(&[0xff, 0xff, 0xff, 0xff, 0x1f]), Err(DecodeErrorKind::IntegerOverflow));
        assert_eq!(read(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]), Err(DecodeErrorKind::IntegerTooLong));
        assert_eq!(read(&[0x80, 0x80]), Err(DecodeErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_read_signed_leb() {
        let read32 = |v: &[u8]| Reader::new(v).read_s32_leb().map_err(kind_of);

        assert_eq!(read32(&[0x7f]), Ok(-1));
        assert_eq!(read32(&[0xc0, 0xbb, 0x78]), Ok(-123456));
        assert_eq!(read32(&[0x80, 0x80, 0x80, 0x80, 0x78]), Ok(i32::MIN));
        assert_eq!(read32(&[0xff, 0xff, 0xff, 0xff, 0x07]), Ok(i32::MAX));
        assert_eq!(read32(&[0x80, 0x80, 0x80, 0x80, 0x70]), Err(DecodeErrorKind::IntegerOverflow));
        assert_eq!(read32(&[0xff, 0xff, 0xff, 0xff, 0x0f]), Err(DecodeErrorKind::IntegerOverflow));

        for v in [0i64, 1, -1, 63, -64, 64, i64::MAX, i64::MIN, -123456789012] {
            let mut buf = vec![];
            write_s64_leb(&mut buf, v);
            assert_eq!(Reader::new(&buf).read_s64_leb(), Ok(v));
        }
    }

    #[test]
    fn test_read_u64_leb() {
        for v in [0u64, 1, 127, 128, u32::MAX as u64 + 1, u64::MAX] {
            let mut buf = vec![];
            write_u64_leb(&mut buf, v);
            assert_eq!(Reader::new(&buf).read_u64_leb(), Ok(v));
        }
        let mut too_big = vec![0xff; 9];
        too_big.push(0x02);
        assert_eq!(
            Reader::new(&too_big).read_u64_leb().map_err(kind_of),
            Err(DecodeErrorKind::IntegerOverflow)
        );
    }

    #[test]
    fn test_read_name() {
        let mut reader = Reader::new(&[3, b'e', b'n', b'v', 1, 0xff]);
        assert_eq!(reader.read_name(), Ok("env".to_string()));
        let err = reader.read_name().unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidUtf8);
        assert_eq!(err.offset, 4);

        let mut short = Reader::new(&[5, b'a']);
        assert_eq!(short.read_name().map_err(kind_of), Err(DecodeErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_sub_reader_offsets() {
        let bytes = [0u8, 1, 2, 3, 4, 5];
        let mut reader = Reader::new(&bytes);
        reader.skip(2).unwrap();
        let mut sub = reader.sub_reader(3, Section::Code).unwrap();
        assert_eq!(sub.offset(), 2);
        assert_eq!(sub.read_byte(), Ok(2));
        assert_eq!(sub.finish().map_err(kind_of), Err(DecodeErrorKind::SectionSizeMismatch { unread: 2 }));
        assert_eq!(reader.offset(), 5);

        let err = Reader::with_section(&[], 40, Section::Export).read_byte().unwrap_err();
        assert_eq!(err.offset, 40);
        assert_eq!(err.section, Section::Export);
    }

    #[test]
    fn test_read_floats() {
        let mut reader = Reader::new(&[0x00, 0x00, 0x80, 0x3f, 0, 0, 0, 0, 0, 0, 0xf0, 0xbf]);
        assert_eq!(reader.read_f32(), Ok(1.0));
        assert_eq!(reader.read_f64(), Ok(-1.0));
        assert!(reader.at_end());
    }

    #[test]
    fn test_read_count_bounds() {
        let err = Reader::new(&[5, 0, 0]).read_count(100).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::CountTooLarge { count: 5, limit: 100 });
        assert_eq!(Reader::new(&[2, 0, 0]).read_count(100), Ok(2));
        assert!(Reader::new(&[3, 0, 0, 0]).read_count(2).is_err());
    }
}
