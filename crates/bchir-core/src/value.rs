//! Interpreter values
//!
//! [`IVal`] is the tagged sum the interpreter computes with. Primitives are
//! stored inline; aggregates own their field vectors; [`ValueRef`] is a
//! non-owning pointer to a slot owned by the arena or by a global
//! environment cell.

use std::fmt;

use bchir_bytecode::{ClassId, Pc};

/// A non-owning reference to an `IVal` slot
///
/// The pointee is owned by the heap arena or by a global environment slot.
/// Both keep their slots at stable addresses for the lifetime of the
/// interpreter (arena buckets never move, the global vector is sized once),
/// and `Run` returns before either is dropped, so dereferencing inside the
/// interpreter is sound. Pointer identity is observable through
/// `OBJECT_REFEQ` and `IDENTITY_HASHCODE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(pub(crate) *mut IVal);

impl ValueRef {
    /// Wrap a raw slot pointer
    pub fn new(ptr: *mut IVal) -> Self {
        ValueRef(ptr)
    }

    /// The slot address, used for identity hashing
    pub fn addr(self) -> usize {
        self.0 as usize
    }

    /// Shared access to the pointee
    ///
    /// # Safety
    ///
    /// The slot must still be owned by a live arena or global environment.
    #[inline]
    pub unsafe fn get<'a>(self) -> &'a IVal {
        &*self.0
    }

    /// Exclusive access to the pointee
    ///
    /// # Safety
    ///
    /// As [`ValueRef::get`], and no other reference to the slot may be live.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<'a>(self) -> &'a mut IVal {
        &mut *self.0
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ptr({:#x})", self.0 as usize)
    }
}

/// A value manipulated by the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum IVal {
    /// Poison; only legal as an uninitialised global slot
    Invalid,
    /// Unsigned 8-bit integer
    UInt8(u8),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Unsigned native-width integer
    UIntNat(usize),
    /// Signed 8-bit integer
    Int8(i8),
    /// Signed 16-bit integer
    Int16(i16),
    /// Signed 32-bit integer
    Int32(i32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Signed native-width integer
    IntNat(isize),
    /// 16-bit float, stored as 32-bit
    Float16(f32),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
    /// Unicode scalar; kept raw so `CHR` and the `UInt32` casts are bit-identities
    Rune(u32),
    /// Boolean
    Bool(bool),
    /// The unit value
    Unit,
    /// Null reference
    Nullptr,
    /// Non-owning pointer into the arena or a global slot
    Pointer(ValueRef),
    /// Ordered heterogeneous fields
    Tuple(Vec<IVal>),
    /// Element 0 is the length as `Int64`; elements 1..=len are the content.
    /// Intrinsics index this layout directly.
    Array(Vec<IVal>),
    /// Class instance
    Object {
        /// Post-link class id
        class_id: ClassId,
        /// Field slots
        fields: Vec<IVal>,
    },
    /// Function value; the payload is the entry PC of the body
    Func(Pc),
}

impl IVal {
    /// Build the core-library `RawArray<UInt8>` representation of a string:
    /// element 0 is the byte length as `Int64`, then one `UInt8` per byte.
    pub fn string_to_array(s: &str) -> IVal {
        let bytes = s.as_bytes();
        let mut content = Vec::with_capacity(bytes.len() + 1);
        content.push(IVal::Int64(bytes.len() as i64));
        content.extend(bytes.iter().map(|&b| IVal::UInt8(b)));
        IVal::Array(content)
    }

    /// Build a CPointer value: a one-field tuple holding the raw address
    pub fn cpointer(addr: usize) -> IVal {
        IVal::Tuple(vec![IVal::UIntNat(addr)])
    }

    /// Extract a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            IVal::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Extract a signed 64-bit integer
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            IVal::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Extract an unsigned 64-bit integer
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            IVal::UInt64(v) => Some(v),
            _ => None,
        }
    }

    /// Extract a native-width unsigned integer
    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            IVal::UIntNat(v) => Some(v),
            _ => None,
        }
    }

    /// Extract a pointer
    pub fn as_pointer(&self) -> Option<ValueRef> {
        match *self {
            IVal::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Borrow tuple fields
    pub fn as_tuple(&self) -> Option<&Vec<IVal>> {
        match self {
            IVal::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    /// Borrow array content (length slot included)
    pub fn as_array(&self) -> Option<&Vec<IVal>> {
        match self {
            IVal::Array(content) => Some(content),
            _ => None,
        }
    }

    /// Mutably borrow array content (length slot included)
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<IVal>> {
        match self {
            IVal::Array(content) => Some(content),
            _ => None,
        }
    }

    /// Whether this value is an `Object`
    pub fn is_object(&self) -> bool {
        matches!(self, IVal::Object { .. })
    }

    /// A short tag name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            IVal::Invalid => "Invalid",
            IVal::UInt8(_) => "UInt8",
            IVal::UInt16(_) => "UInt16",
            IVal::UInt32(_) => "UInt32",
            IVal::UInt64(_) => "UInt64",
            IVal::UIntNat(_) => "UIntNat",
            IVal::Int8(_) => "Int8",
            IVal::Int16(_) => "Int16",
            IVal::Int32(_) => "Int32",
            IVal::Int64(_) => "Int64",
            IVal::IntNat(_) => "IntNat",
            IVal::Float16(_) => "Float16",
            IVal::Float32(_) => "Float32",
            IVal::Float64(_) => "Float64",
            IVal::Rune(_) => "Rune",
            IVal::Bool(_) => "Bool",
            IVal::Unit => "Unit",
            IVal::Nullptr => "Nullptr",
            IVal::Pointer(_) => "Pointer",
            IVal::Tuple(_) => "Tuple",
            IVal::Array(_) => "Array",
            IVal::Object { .. } => "Object",
            IVal::Func(_) => "Func",
        }
    }
}

impl fmt::Display for IVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[IVal]) -> fmt::Result {
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", field)?;
            }
            Ok(())
        }
        match self {
            IVal::Invalid => write!(f, "<invalid>"),
            IVal::UInt8(v) => write!(f, "{}", v),
            IVal::UInt16(v) => write!(f, "{}", v),
            IVal::UInt32(v) => write!(f, "{}", v),
            IVal::UInt64(v) => write!(f, "{}", v),
            IVal::UIntNat(v) => write!(f, "{}", v),
            IVal::Int8(v) => write!(f, "{}", v),
            IVal::Int16(v) => write!(f, "{}", v),
            IVal::Int32(v) => write!(f, "{}", v),
            IVal::Int64(v) => write!(f, "{}", v),
            IVal::IntNat(v) => write!(f, "{}", v),
            IVal::Float16(v) => write!(f, "{}", v),
            IVal::Float32(v) => write!(f, "{}", v),
            IVal::Float64(v) => write!(f, "{}", v),
            IVal::Rune(v) => match char::from_u32(*v) {
                Some(c) => write!(f, "r'{}'", c),
                None => write!(f, "r'\\u{{{:x}}}'", v),
            },
            IVal::Bool(v) => write!(f, "{}", v),
            IVal::Unit => write!(f, "unit"),
            IVal::Nullptr => write!(f, "null"),
            IVal::Pointer(p) => write!(f, "{:?}", p),
            IVal::Tuple(fields) => {
                write!(f, "(")?;
                write_fields(f, fields)?;
                write!(f, ")")
            }
            IVal::Array(content) => {
                write!(f, "[")?;
                write_fields(f, content)?;
                write!(f, "]")
            }
            IVal::Object { class_id, fields } => {
                write!(f, "object#{}(", class_id)?;
                write_fields(f, fields)?;
                write!(f, ")")
            }
            IVal::Func(pc) => write!(f, "func@{}", pc),
        }
    }
}

/// Outcome of one interpreter run
#[derive(Debug, Clone, PartialEq)]
pub enum IResult {
    /// The interpreter has not run yet
    NotRun,
    /// A Cangjie-level exception or error escaped to the top
    Exception(IVal),
    /// Normal completion
    Success(IVal),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_array_layout() {
        let arr = IVal::string_to_array("ab");
        let content = arr.as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0], IVal::Int64(2));
        assert_eq!(content[1], IVal::UInt8(b'a'));
        assert_eq!(content[2], IVal::UInt8(b'b'));
    }

    #[test]
    fn test_empty_string_to_array() {
        let arr = IVal::string_to_array("");
        assert_eq!(arr.as_array().unwrap().as_slice(), &[IVal::Int64(0)]);
    }

    #[test]
    fn test_cpointer_shape() {
        let p = IVal::cpointer(0xdead);
        assert_eq!(p.as_tuple().unwrap().as_slice(), &[IVal::UIntNat(0xdead)]);
    }

    #[test]
    fn test_pointer_identity() {
        let mut a = IVal::Int64(1);
        let mut b = IVal::Int64(1);
        let pa = ValueRef::new(&mut a);
        let pa2 = ValueRef::new(&mut a);
        let pb = ValueRef::new(&mut b);
        assert_eq!(pa, pa2);
        assert_ne!(pa, pb);
        assert_eq!(pa.addr(), pa2.addr());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(IVal::Bool(true).as_bool(), Some(true));
        assert_eq!(IVal::Int64(-3).as_i64(), Some(-3));
        assert_eq!(IVal::UInt64(3).as_i64(), None);
        assert!(IVal::Object { class_id: 0, fields: vec![] }.is_object());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", IVal::Int32(42)), "42");
        assert_eq!(format!("{}", IVal::Unit), "unit");
        assert_eq!(format!("{}", IVal::Rune('x' as u32)), "r'x'");
        assert_eq!(
            format!("{}", IVal::Tuple(vec![IVal::Bool(false), IVal::UInt8(255)])),
            "(false, 255)"
        );
        assert_eq!(format!("{}", IVal::Func(7)), "func@7");
    }
}
