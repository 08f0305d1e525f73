//! Operand stack shared by every frame of a call

use super::RuntimeError;
use crate::engine::{FuncAddr, RawRef, RawVal};
use crate::types::ValueKind;

#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<RawVal>,
}

macro_rules! typed_pop {
    ($name:ident, $variant:ident, $ty:ty, $kind:ident) => {
        pub fn $name(&mut self) -> Result<$ty, RuntimeError> {
            match self.pop()? {
                RawVal::$variant(v) => Ok(v),
                other => Err(mismatch(ValueKind::$kind, &other)),
            }
        }
    };
}

fn mismatch(expected: ValueKind, actual: &RawVal) -> RuntimeError {
    RuntimeError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

impl Stack {
    pub fn new() -> Self {
        Stack { values: Vec::new() }
    }

    pub fn push(&mut self, value: RawVal) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = RawVal>) {
        self.values.extend(values);
    }

    pub fn pop(&mut self) -> Result<RawVal, RuntimeError> {
        self.values.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Pop a value and check its kind
    pub fn pop_typed(&mut self, expected: ValueKind) -> Result<RawVal, RuntimeError> {
        let value = self.pop()?;
        if value.kind() != expected {
            return Err(mismatch(expected, &value));
        }
        Ok(value)
    }

    typed_pop!(pop_i32, I32, i32, I32);
    typed_pop!(pop_i64, I64, i64, I64);
    typed_pop!(pop_f32, F32, f32, F32);
    typed_pop!(pop_f64, F64, f64, F64);
    typed_pop!(pop_funcref, FuncRef, Option<FuncAddr>, FuncRef);
    typed_pop!(pop_anyref, AnyRef, Option<RawRef>, AnyRef);

    /// Pop an i32 used as an address or length, zero-extended
    pub fn pop_u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(self.pop_i32()? as u32)
    }

    /// Pop the top `n` values, bottom first
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<RawVal>, RuntimeError> {
        let start = self.values.len().checked_sub(n).ok_or(RuntimeError::StackUnderflow)?;
        Ok(self.values.split_off(start))
    }

    /// Drop everything between `height` and the top `keep` values
    pub fn unwind(&mut self, height: usize, keep: usize) -> Result<(), RuntimeError> {
        let len = self.values.len();
        if len < height + keep {
            return Err(RuntimeError::StackUnderflow);
        }
        self.values.drain(height..len - keep);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn truncate(&mut self, height: usize) {
        self.values.truncate(height);
    }

    pub fn peek(&self) -> Option<&RawVal> {
        self.values.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new();
        stack.push(RawVal::I32(42));
        stack.push(RawVal::I64(100));

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop().unwrap(), RawVal::I64(100));
        assert_eq!(stack.pop().unwrap(), RawVal::I32(42));
        assert!(matches!(stack.pop(), Err(RuntimeError::StackUnderflow)));
    }

    #[test]
    fn test_typed_pop_methods() {
        let mut stack = Stack::new();
        stack.push_all([
            RawVal::FuncRef(Some(FuncAddr(3))),
            RawVal::F64(2.5),
            RawVal::F32(1.5),
            RawVal::I64(100),
            RawVal::I32(-1),
        ]);
        assert_eq!(stack.pop_u32().unwrap(), u32::MAX);
        assert_eq!(stack.pop_i64().unwrap(), 100);
        assert_eq!(stack.pop_f32().unwrap(), 1.5);
        assert_eq!(stack.pop_f64().unwrap(), 2.5);
        assert_eq!(stack.pop_funcref().unwrap(), Some(FuncAddr(3)));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_pop_typed_mismatch() {
        let mut stack = Stack::new();
        stack.push(RawVal::I32(42));
        let err = stack.pop_typed(ValueKind::I64).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch: expected i64, got i32");
    }

    #[test]
    fn test_unwind_keeps_results() {
        let mut stack = Stack::new();
        stack.push_all((0..5).map(RawVal::I32));
        stack.unwind(1, 2).unwrap();
        assert_eq!(stack.pop_n(3).unwrap(), vec![RawVal::I32(0), RawVal::I32(3), RawVal::I32(4)]);
        assert!(stack.unwind(0, 1).is_err());
        assert!(stack.pop_n(1).is_err());
    }
}
