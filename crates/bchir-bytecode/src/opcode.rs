//! Bytecode opcodes for the BCHIR interpreter
//!
//! Every instruction is a sequence of 32-bit [`Word`](crate::Word)s: the
//! opcode itself followed by a fixed number of argument words. Opcodes that
//! may transfer control to an exception handler come in a plain and an
//! `_EXC` variant; the `_EXC` variant carries one extra trailing word, the
//! PC of the handler block. [`OpCode::width`] deliberately excludes that
//! trailing word so the handler slot of an `_EXC` instruction is always at
//! `pc + width`.

/// Bytecode opcode enumeration
///
/// Opcodes are organized into families:
/// - 0x00-0x1F: constants and environment
/// - 0x20-0x3F: aggregates and memory
/// - 0x40-0x6F: arithmetic
/// - 0x70-0x7F: control flow
/// - 0x80-0x8F: calls
/// - 0x90-0x9F: casts and type tests
/// - 0xA0-0xAF: exceptions
/// - 0xB0-0xBF: intrinsics
/// - 0xC0-0xCF: miscellaneous
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ===== Constants & environment (0x00-0x1F) =====
    /// Push a `UInt8` literal (operand: value)
    Uint8 = 0x00,
    /// Push a `UInt16` literal (operand: value)
    Uint16 = 0x01,
    /// Push a `UInt32` literal (operand: value)
    Uint32 = 0x02,
    /// Push a `UInt64` literal (operands: low word, high word)
    Uint64 = 0x03,
    /// Push a `UIntNat` literal (operands: low word, high word)
    Uintnat = 0x04,
    /// Push an `Int8` literal (operand: value)
    Int8 = 0x05,
    /// Push an `Int16` literal (operand: value)
    Int16 = 0x06,
    /// Push an `Int32` literal (operand: value)
    Int32 = 0x07,
    /// Push an `Int64` literal (operands: low word, high word)
    Int64 = 0x08,
    /// Push an `IntNat` literal (operands: low word, high word)
    Intnat = 0x09,
    /// Push a `Float16` literal (operand: f32 bits)
    Float16 = 0x0A,
    /// Push a `Float32` literal (operand: f32 bits)
    Float32 = 0x0B,
    /// Push a `Float64` literal (operands: low word, high word of f64 bits)
    Float64 = 0x0C,
    /// Push a `Rune` literal (operand: Unicode scalar)
    Rune = 0x0D,
    /// Push a `Bool` literal (operand: 0 or 1)
    Bool = 0x0E,
    /// Push `Unit`
    Unit = 0x0F,
    /// Push `Nullptr`
    Nullptr = 0x10,
    /// Push a string literal (operand: string pool index)
    String = 0x11,
    /// Push a function value (operand: entry PC; pre-link, a name index)
    Func = 0x12,
    /// Push a copy of local variable (operand: local index)
    Lvar = 0x13,
    /// Pop into local variable (operand: local index)
    LvarSet = 0x14,
    /// Push a pointer to a global slot (operand: global id)
    Gvar = 0x15,
    /// Pop into global slot (operand: global id)
    GvarSet = 0x16,
    /// Allocate local slots for the current frame (operand: count)
    Frame = 0x17,

    // ===== Aggregates & memory (0x20-0x3F) =====
    /// Pop n values, push a `Tuple` (operand: n)
    Tuple = 0x20,
    /// Pop n values, push an `Array` (operand: n)
    Array = 0x21,
    /// Pop n values, push a VArray (operand: n)
    Varray = 0x22,
    /// Pop padding, item and size; push an array of size copies of item
    VarrayByValue = 0x23,
    /// Pop an index path and a VArray, push the indexed element (operand: path length)
    VarrayGet = 0x24,
    /// Pop n values, push an `Object` (operands: n, class id)
    Object = 0x25,
    /// Pop an aggregate, push field i (operand: i; 1-based for objects)
    Field = 0x26,
    /// Pop a tuple, push the field at a nested path (operands: path length, path...)
    FieldTpl = 0x27,
    /// Pop a pointer, push a pointer to a nested field (operands: path length, path...)
    GetRef = 0x28,
    /// Pop a pointer and a value, store through a nested path, push `Unit`
    StoreInRef = 0x29,
    /// Pop a pointer and a value, store, push `Unit`
    Asg = 0x2A,
    /// Pop a pointer and a value, store
    Store = 0x2B,
    /// Pop a pointer, push a copy of the pointee
    Deref = 0x2C,
    /// Allocate an uninitialised arena slot, push a pointer to it
    Allocate = 0x2D,
    /// `ALLOCATE` with an exception successor
    AllocateExc = 0x2E,
    /// Allocate a tuple of n null fields, push a pointer (operand: n)
    AllocateStruct = 0x2F,
    /// `ALLOCATE_STRUCT` with an exception successor
    AllocateStructExc = 0x30,
    /// Allocate an object of n null fields, push a pointer (operands: class id, n)
    AllocateClass = 0x31,
    /// `ALLOCATE_CLASS` with an exception successor
    AllocateClassExc = 0x32,
    /// Pop an `Int64` size, allocate a raw array, push a pointer
    AllocateRawArray = 0x33,
    /// `ALLOCATE_RAW_ARRAY` with an exception successor
    AllocateRawArrayExc = 0x34,
    /// Pop n values, allocate a raw array from them, push a pointer (operand: n)
    AllocateRawArrayLiteral = 0x35,
    /// `ALLOCATE_RAW_ARRAY_LITERAL` with an exception successor
    AllocateRawArrayLiteralExc = 0x36,
    /// Pop item, size and array pointer; fill the array with the item, push `Unit`
    RawArrayInitByValue = 0x37,
    /// Pop n values and an array pointer; fill the array, push `Unit` (operand: n)
    RawArrayLiteralInit = 0x38,

    // ===== Arithmetic (0x40-0x6F) =====
    // All arithmetic opcodes carry a type-kind and an overflow-strategy
    // word; shifts carry an extra rhs-type-kind word.
    /// Arithmetic negation
    UnNeg = 0x40,
    /// `UN_NEG` with an exception successor
    UnNegExc = 0x41,
    /// Increment by one
    UnInc = 0x42,
    /// Decrement by one
    UnDec = 0x43,
    /// Boolean negation
    UnNot = 0x44,
    /// Bitwise complement
    UnBitnot = 0x45,
    /// Addition
    BinAdd = 0x46,
    /// `BIN_ADD` with an exception successor
    BinAddExc = 0x47,
    /// Subtraction
    BinSub = 0x48,
    /// `BIN_SUB` with an exception successor
    BinSubExc = 0x49,
    /// Multiplication
    BinMul = 0x4A,
    /// `BIN_MUL` with an exception successor
    BinMulExc = 0x4B,
    /// Division
    BinDiv = 0x4C,
    /// `BIN_DIV` with an exception successor
    BinDivExc = 0x4D,
    /// Remainder
    BinMod = 0x4E,
    /// `BIN_MOD` with an exception successor
    BinModExc = 0x4F,
    /// Exponentiation
    BinExp = 0x50,
    /// `BIN_EXP` with an exception successor
    BinExpExc = 0x51,
    /// Less than
    BinLt = 0x52,
    /// Greater than
    BinGt = 0x53,
    /// Less or equal
    BinLe = 0x54,
    /// Greater or equal
    BinGe = 0x55,
    /// Equality
    BinEqual = 0x56,
    /// Inequality
    BinNoteq = 0x57,
    /// Bitwise and
    BinBitand = 0x58,
    /// Bitwise or
    BinBitor = 0x59,
    /// Bitwise xor
    BinBitxor = 0x5A,
    /// Left shift
    BinLshift = 0x5B,
    /// `BIN_LSHIFT` with an exception successor
    BinLshiftExc = 0x5C,
    /// Right shift
    BinRshift = 0x5D,
    /// `BIN_RSHIFT` with an exception successor
    BinRshiftExc = 0x5E,

    // ===== Control flow (0x70-0x7F) =====
    /// Unconditional jump (operand: target PC)
    Jump = 0x70,
    /// Pop a `Bool`, jump (operands: true target, false target)
    Branch = 0x71,
    /// Pop an integer, binary-search the case table (operands: type kind,
    /// case count, 8-byte case values..., targets..., default target)
    Switch = 0x72,
    /// Return from the current call frame
    Return = 0x73,
    /// Stop interpretation
    Exit = 0x74,
    /// Pop and discard the top of the argument stack
    Drop = 0x75,

    // ===== Calls (0x80-0x8F) =====
    /// Call the function value at depth n (operand: n)
    Apply = 0x80,
    /// `APPLY` with an exception successor
    ApplyExc = 0x81,
    /// Virtual call through the receiver at depth n (operands: n, method id)
    Invoke = 0x82,
    /// `INVOKE` with an exception successor
    InvokeExc = 0x83,
    /// C call; aborts in const-eval
    Capply = 0x84,
    /// `CAPPLY` with an exception successor
    CapplyExc = 0x85,

    // ===== Casts & types (0x90-0x9F) =====
    /// Numeric conversion (operands: source kind, target kind, strategy)
    Typecast = 0x90,
    /// `TYPECAST` with an exception successor
    TypecastExc = 0x91,
    /// Pop an object pointer, push whether its class is a subclass (operand: class id)
    Instanceof = 0x92,
    /// Pop a value, wrap in a one-field object, push a pointer (operand: class id)
    Box = 0x93,
    /// Pop an object pointer, push field 0
    Unbox = 0x94,
    /// Pop an object pointer, push a pointer to field 0
    UnboxRef = 0x95,

    // ===== Exceptions (0xA0-0xAF) =====
    /// Pop an exception pointer and unwind to the nearest handler
    Raise = 0xA0,
    /// `RAISE` with an exception successor in the same function
    RaiseExc = 0xA1,
    /// Push the pending exception
    GetException = 0xA2,

    // ===== Intrinsics (0xB0-0xBF) =====
    /// Intrinsic with no immediates (operand: intrinsic kind)
    Intrinsic0 = 0xB0,
    /// `INTRINSIC0` with an exception successor
    Intrinsic0Exc = 0xB1,
    /// Intrinsic with a type immediate (operands: kind, type index)
    Intrinsic1 = 0xB2,
    /// `INTRINSIC1` with an exception successor
    Intrinsic1Exc = 0xB3,
    /// Intrinsic with type and strategy immediates (operands: kind, type index, strategy)
    Intrinsic2 = 0xB4,
    /// `INTRINSIC2` with an exception successor
    Intrinsic2Exc = 0xB5,

    // ===== Miscellaneous (0xC0-0xCF) =====
    /// Abort interpretation
    Abort = 0xC0,
    /// Placeholder for operations the lowering pass rejected
    NotSupported = 0xC1,
    /// Host system call; aborts in const-eval
    Syscall = 0xC2,
    /// Thread spawn; aborts in const-eval
    Spawn = 0xC3,
    /// `SPAWN` with an exception successor; aborts in const-eval
    SpawnExc = 0xC4,
    /// Invalid opcode
    Invalid = 0xC5,
}

impl OpCode {
    /// Convert a bytecode word to an opcode
    ///
    /// Returns `None` if the word does not correspond to a valid opcode.
    pub fn from_u32(word: u32) -> Option<Self> {
        use OpCode::*;
        Some(match word {
            0x00 => Uint8,
            0x01 => Uint16,
            0x02 => Uint32,
            0x03 => Uint64,
            0x04 => Uintnat,
            0x05 => Int8,
            0x06 => Int16,
            0x07 => Int32,
            0x08 => Int64,
            0x09 => Intnat,
            0x0A => Float16,
            0x0B => Float32,
            0x0C => Float64,
            0x0D => Rune,
            0x0E => Bool,
            0x0F => Unit,
            0x10 => Nullptr,
            0x11 => String,
            0x12 => Func,
            0x13 => Lvar,
            0x14 => LvarSet,
            0x15 => Gvar,
            0x16 => GvarSet,
            0x17 => Frame,
            0x20 => Tuple,
            0x21 => Array,
            0x22 => Varray,
            0x23 => VarrayByValue,
            0x24 => VarrayGet,
            0x25 => Object,
            0x26 => Field,
            0x27 => FieldTpl,
            0x28 => GetRef,
            0x29 => StoreInRef,
            0x2A => Asg,
            0x2B => Store,
            0x2C => Deref,
            0x2D => Allocate,
            0x2E => AllocateExc,
            0x2F => AllocateStruct,
            0x30 => AllocateStructExc,
            0x31 => AllocateClass,
            0x32 => AllocateClassExc,
            0x33 => AllocateRawArray,
            0x34 => AllocateRawArrayExc,
            0x35 => AllocateRawArrayLiteral,
            0x36 => AllocateRawArrayLiteralExc,
            0x37 => RawArrayInitByValue,
            0x38 => RawArrayLiteralInit,
            0x40 => UnNeg,
            0x41 => UnNegExc,
            0x42 => UnInc,
            0x43 => UnDec,
            0x44 => UnNot,
            0x45 => UnBitnot,
            0x46 => BinAdd,
            0x47 => BinAddExc,
            0x48 => BinSub,
            0x49 => BinSubExc,
            0x4A => BinMul,
            0x4B => BinMulExc,
            0x4C => BinDiv,
            0x4D => BinDivExc,
            0x4E => BinMod,
            0x4F => BinModExc,
            0x50 => BinExp,
            0x51 => BinExpExc,
            0x52 => BinLt,
            0x53 => BinGt,
            0x54 => BinLe,
            0x55 => BinGe,
            0x56 => BinEqual,
            0x57 => BinNoteq,
            0x58 => BinBitand,
            0x59 => BinBitor,
            0x5A => BinBitxor,
            0x5B => BinLshift,
            0x5C => BinLshiftExc,
            0x5D => BinRshift,
            0x5E => BinRshiftExc,
            0x70 => Jump,
            0x71 => Branch,
            0x72 => Switch,
            0x73 => Return,
            0x74 => Exit,
            0x75 => Drop,
            0x80 => Apply,
            0x81 => ApplyExc,
            0x82 => Invoke,
            0x83 => InvokeExc,
            0x84 => Capply,
            0x85 => CapplyExc,
            0x90 => Typecast,
            0x91 => TypecastExc,
            0x92 => Instanceof,
            0x93 => Box,
            0x94 => Unbox,
            0x95 => UnboxRef,
            0xA0 => Raise,
            0xA1 => RaiseExc,
            0xA2 => GetException,
            0xB0 => Intrinsic0,
            0xB1 => Intrinsic0Exc,
            0xB2 => Intrinsic1,
            0xB3 => Intrinsic1Exc,
            0xB4 => Intrinsic2,
            0xB5 => Intrinsic2Exc,
            0xC0 => Abort,
            0xC1 => NotSupported,
            0xC2 => Syscall,
            0xC3 => Spawn,
            0xC4 => SpawnExc,
            0xC5 => Invalid,
            _ => return None,
        })
    }

    /// Convert the opcode to its bytecode word
    #[inline]
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Instruction width in words, including the opcode word itself
    ///
    /// For `_EXC` variants the trailing handler word is NOT counted, so the
    /// handler slot is always at `pc + width`. For variable-length
    /// instructions (`SWITCH`, `FIELD_TPL`, `GETREF`, `STOREINREF`,
    /// `VARRAY_GET`) this is the fixed prefix only; none of those have an
    /// `_EXC` form.
    pub fn width(self) -> u32 {
        use OpCode::*;
        match self {
            Unit | Nullptr | VarrayByValue | RawArrayInitByValue | Asg | Store | Deref
            | Allocate | AllocateExc | AllocateRawArray | AllocateRawArrayExc | Return | Exit
            | Drop | Capply | CapplyExc | Unbox | UnboxRef | Raise | RaiseExc | GetException
            | Abort | NotSupported | Syscall | Spawn | SpawnExc | Invalid => 1,

            Uint8 | Uint16 | Uint32 | Int8 | Int16 | Int32 | Float16 | Float32 | Rune | Bool
            | String | Func | Lvar | LvarSet | Gvar | GvarSet | Frame | Tuple | Array | Varray
            | Field | AllocateStruct | AllocateStructExc | AllocateRawArrayLiteral
            | AllocateRawArrayLiteralExc | RawArrayLiteralInit | Jump | Apply | ApplyExc
            | Instanceof | Box | Intrinsic0 | Intrinsic0Exc | VarrayGet | FieldTpl | GetRef
            | StoreInRef | Switch => 2,

            Uint64 | Uintnat | Int64 | Intnat | Float64 | Object | AllocateClass
            | AllocateClassExc | Branch | Invoke | InvokeExc | Intrinsic1 | Intrinsic1Exc
            | UnNeg | UnNegExc | UnInc | UnDec | UnNot | UnBitnot | BinAdd | BinAddExc | BinSub
            | BinSubExc | BinMul | BinMulExc | BinDiv | BinDivExc | BinMod | BinModExc | BinExp
            | BinExpExc | BinLt | BinGt | BinLe | BinGe | BinEqual | BinNoteq | BinBitand
            | BinBitor | BinBitxor => 3,

            Typecast | TypecastExc | Intrinsic2 | Intrinsic2Exc | BinLshift | BinLshiftExc
            | BinRshift | BinRshiftExc => 4,
        }
    }

    /// Whether this opcode carries a trailing exception-handler word
    pub fn has_exception_handler(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            AllocateExc
                | AllocateStructExc
                | AllocateClassExc
                | AllocateRawArrayExc
                | AllocateRawArrayLiteralExc
                | UnNegExc
                | BinAddExc
                | BinSubExc
                | BinMulExc
                | BinDivExc
                | BinModExc
                | BinExpExc
                | BinLshiftExc
                | BinRshiftExc
                | ApplyExc
                | InvokeExc
                | CapplyExc
                | TypecastExc
                | RaiseExc
                | Intrinsic0Exc
                | Intrinsic1Exc
                | Intrinsic2Exc
                | SpawnExc
        )
    }

    /// Whether this opcode pushes a call frame that `RETURN` pops
    pub fn is_call(self) -> bool {
        use OpCode::*;
        matches!(self, Apply | ApplyExc | Invoke | InvokeExc | Capply | CapplyExc)
    }

    /// The human-readable label of the opcode
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Uint8 => "UINT8",
            Uint16 => "UINT16",
            Uint32 => "UINT32",
            Uint64 => "UINT64",
            Uintnat => "UINTNAT",
            Int8 => "INT8",
            Int16 => "INT16",
            Int32 => "INT32",
            Int64 => "INT64",
            Intnat => "INTNAT",
            Float16 => "FLOAT16",
            Float32 => "FLOAT32",
            Float64 => "FLOAT64",
            Rune => "RUNE",
            Bool => "BOOL",
            Unit => "UNIT",
            Nullptr => "NULLPTR",
            String => "STRING",
            Func => "FUNC",
            Lvar => "LVAR",
            LvarSet => "LVAR_SET",
            Gvar => "GVAR",
            GvarSet => "GVAR_SET",
            Frame => "FRAME",
            Tuple => "TUPLE",
            Array => "ARRAY",
            Varray => "VARRAY",
            VarrayByValue => "VARRAY_BY_VALUE",
            VarrayGet => "VARRAY_GET",
            Object => "OBJECT",
            Field => "FIELD",
            FieldTpl => "FIELD_TPL",
            GetRef => "GETREF",
            StoreInRef => "STOREINREF",
            Asg => "ASG",
            Store => "STORE",
            Deref => "DEREF",
            Allocate => "ALLOCATE",
            AllocateExc => "ALLOCATE_EXC",
            AllocateStruct => "ALLOCATE_STRUCT",
            AllocateStructExc => "ALLOCATE_STRUCT_EXC",
            AllocateClass => "ALLOCATE_CLASS",
            AllocateClassExc => "ALLOCATE_CLASS_EXC",
            AllocateRawArray => "ALLOCATE_RAW_ARRAY",
            AllocateRawArrayExc => "ALLOCATE_RAW_ARRAY_EXC",
            AllocateRawArrayLiteral => "ALLOCATE_RAW_ARRAY_LITERAL",
            AllocateRawArrayLiteralExc => "ALLOCATE_RAW_ARRAY_LITERAL_EXC",
            RawArrayInitByValue => "RAW_ARRAY_INIT_BY_VALUE",
            RawArrayLiteralInit => "RAW_ARRAY_LITERAL_INIT",
            UnNeg => "UN_NEG",
            UnNegExc => "UN_NEG_EXC",
            UnInc => "UN_INC",
            UnDec => "UN_DEC",
            UnNot => "UN_NOT",
            UnBitnot => "UN_BITNOT",
            BinAdd => "BIN_ADD",
            BinAddExc => "BIN_ADD_EXC",
            BinSub => "BIN_SUB",
            BinSubExc => "BIN_SUB_EXC",
            BinMul => "BIN_MUL",
            BinMulExc => "BIN_MUL_EXC",
            BinDiv => "BIN_DIV",
            BinDivExc => "BIN_DIV_EXC",
            BinMod => "BIN_MOD",
            BinModExc => "BIN_MOD_EXC",
            BinExp => "BIN_EXP",
            BinExpExc => "BIN_EXP_EXC",
            BinLt => "BIN_LT",
            BinGt => "BIN_GT",
            BinLe => "BIN_LE",
            BinGe => "BIN_GE",
            BinEqual => "BIN_EQUAL",
            BinNoteq => "BIN_NOTEQ",
            BinBitand => "BIN_BITAND",
            BinBitor => "BIN_BITOR",
            BinBitxor => "BIN_BITXOR",
            BinLshift => "BIN_LSHIFT",
            BinLshiftExc => "BIN_LSHIFT_EXC",
            BinRshift => "BIN_RSHIFT",
            BinRshiftExc => "BIN_RSHIFT_EXC",
            Jump => "JUMP",
            Branch => "BRANCH",
            Switch => "SWITCH",
            Return => "RETURN",
            Exit => "EXIT",
            Drop => "DROP",
            Apply => "APPLY",
            ApplyExc => "APPLY_EXC",
            Invoke => "INVOKE",
            InvokeExc => "INVOKE_EXC",
            Capply => "CAPPLY",
            CapplyExc => "CAPPLY_EXC",
            Typecast => "TYPECAST",
            TypecastExc => "TYPECAST_EXC",
            Instanceof => "INSTANCEOF",
            Box => "BOX",
            Unbox => "UNBOX",
            UnboxRef => "UNBOX_REF",
            Raise => "RAISE",
            RaiseExc => "RAISE_EXC",
            GetException => "GET_EXCEPTION",
            Intrinsic0 => "INTRINSIC0",
            Intrinsic0Exc => "INTRINSIC0_EXC",
            Intrinsic1 => "INTRINSIC1",
            Intrinsic1Exc => "INTRINSIC1_EXC",
            Intrinsic2 => "INTRINSIC2",
            Intrinsic2Exc => "INTRINSIC2_EXC",
            Abort => "ABORT",
            NotSupported => "NOT_SUPPORTED",
            Syscall => "SYSCALL",
            Spawn => "SPAWN",
            SpawnExc => "SPAWN_EXC",
            Invalid => "INVALID",
        }
    }
}
