//! The machine word every instruction operates on.
//!
//! A [`Value`] is a bare 64-bit pattern with no runtime tag. Each opcode
//! decides how to read it: as a signed integer, a boolean, a float or a
//! guest heap pointer. The same bits can be read any of those ways, but a
//! single instruction only ever uses one interpretation per operand.

use std::fmt;

/// One untagged machine word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Value(u64);

impl Value {
    pub const ZERO: Value = Value(0);
    pub const TRUE: Value = Value(1);
    pub const FALSE: Value = Value(0);

    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    #[inline(always)]
    pub const fn from_i64(n: i64) -> Self {
        Value(n as u64)
    }

    #[inline(always)]
    pub fn from_f64(f: f64) -> Self {
        Value(f.to_bits())
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Value::TRUE } else { Value::FALSE }
    }

    /// Wraps a guest heap address handed out by the chunk registry.
    #[inline(always)]
    pub const fn from_ptr(addr: u64) -> Self {
        Value(addr)
    }

    #[inline(always)]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    #[inline(always)]
    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Any non-zero word is true.
    #[inline(always)]
    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub const fn as_ptr(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({} / {:#018x})", self.as_i64(), self.0)
    }
}

/// Integers are the default reading for listings and stack dumps.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_reinterpretation_is_lossless() {
        for n in [0, 1, -1, 42, i64::MIN, i64::MAX] {
            assert_eq!(Value::from_i64(n).as_i64(), n);
        }
        assert_eq!(Value::from_i64(-1).bits(), u64::MAX);
    }

    #[test]
    fn float_keeps_exact_bits() {
        let v = Value::from_f64(-0.0);
        assert_eq!(v.as_f64().to_bits(), (-0.0f64).to_bits());
        assert!(Value::from_f64(f64::NAN).as_f64().is_nan());
        assert_eq!(Value::from_f64(2.5).as_f64(), 2.5);
    }

    #[test]
    fn booleans_are_zero_and_one() {
        assert_eq!(Value::from_bool(true), Value::from_i64(1));
        assert_eq!(Value::from_bool(false), Value::ZERO);
        assert!(Value::from_i64(-7).as_bool());
        assert!(!Value::ZERO.as_bool());
    }

    #[test]
    fn display_reads_as_integer() {
        assert_eq!(Value::from_i64(-12).to_string(), "-12");
        assert_eq!(format!("{:?}", Value::from_i64(255)), "Value(255 / 0x00000000000000ff)");
    }
}
