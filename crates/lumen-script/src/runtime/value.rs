//! Script value representation.
//!
//! A [`Value`] is a fixed-size, `Copy` tagged union. Heap objects are never
//! stored inline; a value only carries a [`GcRef`] handle into the heap, so
//! copying a value never copies the object it points at.

use std::fmt;

use crate::gc::GcRef;

/// Index of a bound native function inside a loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeRef(pub u32);

/// The runtime tag of a [`Value`].
///
/// The discriminants are part of the bytecode format (`Push`, `Convert`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// The empty value
    None = 0,
    /// 8-bit signed integer
    I8 = 1,
    /// 16-bit signed integer
    I16 = 2,
    /// 32-bit signed integer
    I32 = 3,
    /// 64-bit signed integer
    I64 = 4,
    /// 8-bit unsigned integer
    U8 = 5,
    /// 16-bit unsigned integer
    U16 = 6,
    /// 32-bit unsigned integer
    U32 = 7,
    /// 64-bit unsigned integer
    U64 = 8,
    /// 32-bit float
    F32 = 9,
    /// 64-bit float
    F64 = 10,
    /// Boolean
    Bool = 11,
    /// Heap reference
    Ref = 12,
    /// Native function reference
    Native = 13,
}

impl Tag {
    /// Decodes a tag byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Tag::None,
            1 => Tag::I8,
            2 => Tag::I16,
            3 => Tag::I32,
            4 => Tag::I64,
            5 => Tag::U8,
            6 => Tag::U16,
            7 => Tag::U32,
            8 => Tag::U64,
            9 => Tag::F32,
            10 => Tag::F64,
            11 => Tag::Bool,
            12 => Tag::Ref,
            13 => Tag::Native,
            _ => return None,
        })
    }

    /// Returns true for the integer tags.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Tag::I8 | Tag::I16 | Tag::I32 | Tag::I64 | Tag::U8 | Tag::U16 | Tag::U32 | Tag::U64
        )
    }

    /// Returns true for the float tags.
    pub fn is_float(self) -> bool {
        matches!(self, Tag::F32 | Tag::F64)
    }

    /// Returns true for any numeric tag.
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Size in bytes of an immediate operand carrying this tag's payload.
    pub fn payload_size(self) -> usize {
        match self {
            Tag::None | Tag::Ref | Tag::Native => 0,
            Tag::I8 | Tag::U8 | Tag::Bool => 1,
            Tag::I16 | Tag::U16 => 2,
            Tag::I32 | Tag::U32 | Tag::F32 => 4,
            Tag::I64 | Tag::U64 | Tag::F64 => 8,
        }
    }

    /// The lowercase type name used in listings and messages.
    pub fn name(self) -> &'static str {
        match self {
            Tag::None => "none",
            Tag::I8 => "i8",
            Tag::I16 => "i16",
            Tag::I32 => "i32",
            Tag::I64 => "i64",
            Tag::U8 => "u8",
            Tag::U16 => "u16",
            Tag::U32 => "u32",
            Tag::U64 => "u64",
            Tag::F32 => "f32",
            Tag::F64 => "f64",
            Tag::Bool => "bool",
            Tag::Ref => "ref",
            Tag::Native => "native",
        }
    }
}

/// A script value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// The empty value
    #[default]
    None,
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 8-bit unsigned integer
    U8(u8),
    /// 16-bit unsigned integer
    U16(u16),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit unsigned integer
    U64(u64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Boolean
    Bool(bool),
    /// Reference to a heap value
    Ref(GcRef),
    /// Reference to a bound native function
    Native(NativeRef),
}

/// Arithmetic and bitwise binary operators shared by the VM and the
/// optimizer's constant folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Failure of a primitive value operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    /// Operand tags do not fit the operator (corrupt bytecode)
    TypeMismatch,
    /// Integer division or remainder by zero (catchable)
    DivisionByZero,
}

macro_rules! int_arith {
    ($op:expr, $a:expr, $b:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Ok(Value::$variant(match $op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => {
                if b == 0 {
                    return Err(ValueError::DivisionByZero);
                }
                a.wrapping_div(b)
            }
            ArithOp::Rem => {
                if b == 0 {
                    return Err(ValueError::DivisionByZero);
                }
                a.wrapping_rem(b)
            }
            ArithOp::BitAnd => a & b,
            ArithOp::BitOr => a | b,
            ArithOp::BitXor => a ^ b,
            ArithOp::Shl => a.wrapping_shl(b as u32),
            ArithOp::Shr => a.wrapping_shr(b as u32),
        }))
    }};
}

macro_rules! float_arith {
    ($op:expr, $a:expr, $b:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Ok(Value::$variant(match $op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
            _ => return Err(ValueError::TypeMismatch),
        }))
    }};
}

macro_rules! compare {
    ($op:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a, $b);
        match $op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }};
}

macro_rules! convert_from {
    ($x:expr, $tag:expr) => {{
        let x = $x;
        match $tag {
            Tag::I8 => Value::I8(x as i8),
            Tag::I16 => Value::I16(x as i16),
            Tag::I32 => Value::I32(x as i32),
            Tag::I64 => Value::I64(x as i64),
            Tag::U8 => Value::U8(x as u8),
            Tag::U16 => Value::U16(x as u16),
            Tag::U32 => Value::U32(x as u32),
            Tag::U64 => Value::U64(x as u64),
            Tag::F32 => Value::F32(x as f32),
            Tag::F64 => Value::F64(x as f64),
            _ => return None,
        }
    }};
}

impl Value {
    /// Returns this value's tag.
    pub fn tag(&self) -> Tag {
        match self {
            Value::None => Tag::None,
            Value::I8(_) => Tag::I8,
            Value::I16(_) => Tag::I16,
            Value::I32(_) => Tag::I32,
            Value::I64(_) => Tag::I64,
            Value::U8(_) => Tag::U8,
            Value::U16(_) => Tag::U16,
            Value::U32(_) => Tag::U32,
            Value::U64(_) => Tag::U64,
            Value::F32(_) => Tag::F32,
            Value::F64(_) => Tag::F64,
            Value::Bool(_) => Tag::Bool,
            Value::Ref(_) => Tag::Ref,
            Value::Native(_) => Tag::Native,
        }
    }

    /// Returns the heap reference, if this value holds one.
    pub fn as_ref(&self) -> Option<GcRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Widens any integer value to `i128`.
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Value::I8(v) => v as i128,
            Value::I16(v) => v as i128,
            Value::I32(v) => v as i128,
            Value::I64(v) => v as i128,
            Value::U8(v) => v as i128,
            Value::U16(v) => v as i128,
            Value::U32(v) => v as i128,
            Value::U64(v) => v as i128,
            _ => return None,
        })
    }

    /// Reads a float value as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Builds an integer value of the given tag from an `i128`, wrapping.
    pub fn from_i128(tag: Tag, raw: i128) -> Option<Value> {
        Some(convert_from!(raw, tag))
    }

    /// Builds a float value of the given tag.
    pub fn from_f64(tag: Tag, raw: f64) -> Option<Value> {
        Some(convert_from!(raw, tag))
    }

    /// The compare-to-zero test used by every conditional branch.
    ///
    /// `none`, `false`, and numeric zero are zero; references never are.
    pub fn is_zero(&self) -> bool {
        match *self {
            Value::None => true,
            Value::Bool(b) => !b,
            Value::F32(v) => v == 0.0,
            Value::F64(v) => v == 0.0,
            Value::Ref(_) | Value::Native(_) => false,
            other => other.as_i128() == Some(0),
        }
    }

    /// Applies an arithmetic or bitwise operator to two values of the same tag.
    pub fn arith(op: ArithOp, a: Value, b: Value) -> Result<Value, ValueError> {
        match (a, b) {
            (Value::I8(a), Value::I8(b)) => int_arith!(op, a, b, I8),
            (Value::I16(a), Value::I16(b)) => int_arith!(op, a, b, I16),
            (Value::I32(a), Value::I32(b)) => int_arith!(op, a, b, I32),
            (Value::I64(a), Value::I64(b)) => int_arith!(op, a, b, I64),
            (Value::U8(a), Value::U8(b)) => int_arith!(op, a, b, U8),
            (Value::U16(a), Value::U16(b)) => int_arith!(op, a, b, U16),
            (Value::U32(a), Value::U32(b)) => int_arith!(op, a, b, U32),
            (Value::U64(a), Value::U64(b)) => int_arith!(op, a, b, U64),
            (Value::F32(a), Value::F32(b)) => float_arith!(op, a, b, F32),
            (Value::F64(a), Value::F64(b)) => float_arith!(op, a, b, F64),
            (Value::Bool(a), Value::Bool(b)) => match op {
                ArithOp::BitAnd => Ok(Value::Bool(a & b)),
                ArithOp::BitOr => Ok(Value::Bool(a | b)),
                ArithOp::BitXor => Ok(Value::Bool(a ^ b)),
                _ => Err(ValueError::TypeMismatch),
            },
            _ => Err(ValueError::TypeMismatch),
        }
    }

    /// Compares two non-heap values of the same tag.
    ///
    /// References compare by identity here; string contents are compared by
    /// the interpreter, which has heap access.
    pub fn compare(op: CompareOp, a: Value, b: Value) -> Result<bool, ValueError> {
        Ok(match (a, b) {
            (Value::I8(a), Value::I8(b)) => compare!(op, a, b),
            (Value::I16(a), Value::I16(b)) => compare!(op, a, b),
            (Value::I32(a), Value::I32(b)) => compare!(op, a, b),
            (Value::I64(a), Value::I64(b)) => compare!(op, a, b),
            (Value::U8(a), Value::U8(b)) => compare!(op, a, b),
            (Value::U16(a), Value::U16(b)) => compare!(op, a, b),
            (Value::U32(a), Value::U32(b)) => compare!(op, a, b),
            (Value::U64(a), Value::U64(b)) => compare!(op, a, b),
            (Value::F32(a), Value::F32(b)) => compare!(op, a, b),
            (Value::F64(a), Value::F64(b)) => compare!(op, a, b),
            (Value::Bool(a), Value::Bool(b)) => compare!(op, a, b),
            (a, b) => match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                _ => return Err(ValueError::TypeMismatch),
            },
        })
    }

    /// Arithmetic negation, wrapping for integers.
    pub fn negate(self) -> Result<Value, ValueError> {
        Ok(match self {
            Value::I8(v) => Value::I8(v.wrapping_neg()),
            Value::I16(v) => Value::I16(v.wrapping_neg()),
            Value::I32(v) => Value::I32(v.wrapping_neg()),
            Value::I64(v) => Value::I64(v.wrapping_neg()),
            Value::U8(v) => Value::U8(v.wrapping_neg()),
            Value::U16(v) => Value::U16(v.wrapping_neg()),
            Value::U32(v) => Value::U32(v.wrapping_neg()),
            Value::U64(v) => Value::U64(v.wrapping_neg()),
            Value::F32(v) => Value::F32(-v),
            Value::F64(v) => Value::F64(-v),
            _ => return Err(ValueError::TypeMismatch),
        })
    }

    /// Bitwise complement for integers, logical not for booleans.
    pub fn complement(self) -> Result<Value, ValueError> {
        Ok(match self {
            Value::I8(v) => Value::I8(!v),
            Value::I16(v) => Value::I16(!v),
            Value::I32(v) => Value::I32(!v),
            Value::I64(v) => Value::I64(!v),
            Value::U8(v) => Value::U8(!v),
            Value::U16(v) => Value::U16(!v),
            Value::U32(v) => Value::U32(!v),
            Value::U64(v) => Value::U64(!v),
            Value::Bool(b) => Value::Bool(!b),
            _ => return Err(ValueError::TypeMismatch),
        })
    }

    /// Numeric/boolean conversion used by `as` casts.
    ///
    /// Returns `None` when the source value cannot be converted to `tag`.
    pub fn convert(self, tag: Tag) -> Option<Value> {
        if self.tag() == tag {
            return Some(self);
        }
        if tag == Tag::Bool {
            return match self {
                Value::Ref(_) | Value::Native(_) => None,
                other => Some(Value::Bool(!other.is_zero())),
            };
        }
        match self {
            Value::Bool(b) => Value::from_i128(tag, b as i128),
            Value::F32(v) => Value::from_f64(tag, v as f64),
            Value::F64(v) => Value::from_f64(tag, v),
            other => Value::from_i128(tag, other.as_i128()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Ref(r) => write!(f, "{:?}", r),
            Value::Native(n) => write!(f, "[native {}]", n.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_wrapping() {
        let result = Value::arith(ArithOp::Add, Value::U8(250), Value::U8(10)).unwrap();
        assert_eq!(result, Value::U8(4));
        let result = Value::arith(ArithOp::Sub, Value::I8(-128), Value::I8(1)).unwrap();
        assert_eq!(result, Value::I8(127));
    }

    #[test]
    fn test_division_by_zero_is_reported() {
        assert_eq!(
            Value::arith(ArithOp::Div, Value::I32(1), Value::I32(0)),
            Err(ValueError::DivisionByZero)
        );
        assert_eq!(
            Value::arith(ArithOp::Rem, Value::U64(1), Value::U64(0)),
            Err(ValueError::DivisionByZero)
        );
        // Floats follow IEEE semantics instead.
        let inf = Value::arith(ArithOp::Div, Value::F64(1.0), Value::F64(0.0)).unwrap();
        assert_eq!(inf, Value::F64(f64::INFINITY));
    }

    #[test]
    fn test_mismatched_tags() {
        assert_eq!(
            Value::arith(ArithOp::Add, Value::I32(1), Value::I64(1)),
            Err(ValueError::TypeMismatch)
        );
        assert_eq!(
            Value::compare(CompareOp::Lt, Value::Bool(true), Value::None),
            Err(ValueError::TypeMismatch)
        );
    }

    #[test]
    fn test_compare() {
        assert!(Value::compare(CompareOp::Lt, Value::I32(-1), Value::I32(3)).unwrap());
        assert!(Value::compare(CompareOp::Ge, Value::F32(2.5), Value::F32(2.5)).unwrap());
        assert!(Value::compare(CompareOp::Eq, Value::None, Value::None).unwrap());
    }

    #[test]
    fn test_is_zero() {
        assert!(Value::None.is_zero());
        assert!(Value::Bool(false).is_zero());
        assert!(Value::I64(0).is_zero());
        assert!(Value::F32(0.0).is_zero());
        assert!(!Value::U16(7).is_zero());
        assert!(!Value::Ref(GcRef::new(0, 0)).is_zero());
    }

    #[test]
    fn test_convert() {
        assert_eq!(Value::I32(300).convert(Tag::U8), Some(Value::U8(44)));
        assert_eq!(Value::F64(3.9).convert(Tag::I32), Some(Value::I32(3)));
        assert_eq!(Value::I32(2).convert(Tag::F32), Some(Value::F32(2.0)));
        assert_eq!(Value::I32(2).convert(Tag::Bool), Some(Value::Bool(true)));
        assert_eq!(Value::Ref(GcRef::new(1, 0)).convert(Tag::I32), None);
    }

    #[test]
    fn test_tag_round_trip_byte() {
        for byte in 0..=13u8 {
            assert_eq!(Tag::from_u8(byte).map(|t| t as u8), Some(byte));
        }
        assert_eq!(Tag::from_u8(14), None);
    }
}
