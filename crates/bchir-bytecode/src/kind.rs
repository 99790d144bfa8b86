//! Instruction immediates
//!
//! Arithmetic, cast, switch and intrinsic instructions carry small
//! enumerated immediates: the numeric kind they operate on, the overflow
//! strategy, and for intrinsic calls the intrinsic kind. All of them are
//! encoded as single bytecode words.

use crate::opcode::OpCode;

/// Primitive type kinds referenced from instruction immediates
///
/// A subset mirrors the CHIR type lattice: the numeric kinds drive the
/// arithmetic and cast layers, the remaining kinds only appear in
/// [`TypeRef`](crate::TypeRef)s consumed by intrinsics.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Poison kind
    Invalid = 0,
    /// The unit type
    Unit = 1,
    /// Boolean
    Bool = 2,
    /// Unicode scalar
    Rune = 3,
    /// Unsigned 8-bit integer
    UInt8 = 4,
    /// Unsigned 16-bit integer
    UInt16 = 5,
    /// Unsigned 32-bit integer
    UInt32 = 6,
    /// Unsigned 64-bit integer
    UInt64 = 7,
    /// Unsigned native-width integer
    UIntNat = 8,
    /// Signed 8-bit integer
    Int8 = 9,
    /// Signed 16-bit integer
    Int16 = 10,
    /// Signed 32-bit integer
    Int32 = 11,
    /// Signed 64-bit integer
    Int64 = 12,
    /// Signed native-width integer
    IntNat = 13,
    /// 16-bit float (stored as 32-bit)
    Float16 = 14,
    /// 32-bit float
    Float32 = 15,
    /// 64-bit float
    Float64 = 16,
    /// Enum payload, treated as `UInt64` by the value layer
    Enum = 17,
    /// C pointer
    CPointer = 18,
    /// C string
    CString = 19,
    /// Struct reference, only meaningful inside `TypeRef`s
    Struct = 20,
    /// Class reference, only meaningful inside `TypeRef`s
    Class = 21,
}

impl TypeKind {
    /// Convert a bytecode word to a type kind
    pub fn from_u32(word: u32) -> Option<Self> {
        use TypeKind::*;
        Some(match word {
            0 => Invalid,
            1 => Unit,
            2 => Bool,
            3 => Rune,
            4 => UInt8,
            5 => UInt16,
            6 => UInt32,
            7 => UInt64,
            8 => UIntNat,
            9 => Int8,
            10 => Int16,
            11 => Int32,
            12 => Int64,
            13 => IntNat,
            14 => Float16,
            15 => Float32,
            16 => Float64,
            17 => Enum,
            18 => CPointer,
            19 => CString,
            20 => Struct,
            21 => Class,
            _ => return None,
        })
    }

    /// Whether this kind is a signed or unsigned integer (including native)
    pub fn is_integer(self) -> bool {
        use TypeKind::*;
        matches!(
            self,
            UInt8 | UInt16 | UInt32 | UInt64 | UIntNat | Int8 | Int16 | Int32 | Int64 | IntNat
        )
    }

    /// Whether this kind is one of the float kinds
    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float16 | TypeKind::Float32 | TypeKind::Float64)
    }

    /// The label used by the printer
    pub fn name(self) -> &'static str {
        use TypeKind::*;
        match self {
            Invalid => "Invalid",
            Unit => "Unit",
            Bool => "Bool",
            Rune => "Rune",
            UInt8 => "UInt8",
            UInt16 => "UInt16",
            UInt32 => "UInt32",
            UInt64 => "UInt64",
            UIntNat => "UIntNat",
            Int8 => "Int8",
            Int16 => "Int16",
            Int32 => "Int32",
            Int64 => "Int64",
            IntNat => "IntNat",
            Float16 => "Float16",
            Float32 => "Float32",
            Float64 => "Float64",
            Enum => "Enum",
            CPointer => "CPointer",
            CString => "CString",
            Struct => "Struct",
            Class => "Class",
        }
    }
}

/// Overflow strategy for integer arithmetic and casts
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowStrategy {
    /// Caller has proved non-overflow; wraps in this implementation
    Na = 0,
    /// Push an option-shaped tuple: `(true)` on overflow, `(false, value)` otherwise
    Checked = 1,
    /// Two's-complement wrap
    Wrapping = 2,
    /// Raise `OverflowException` on overflow
    Throwing = 3,
    /// Clamp to the type's min/max
    Saturating = 4,
}

impl OverflowStrategy {
    /// Convert a bytecode word to an overflow strategy
    pub fn from_u32(word: u32) -> Option<Self> {
        Some(match word {
            0 => Self::Na,
            1 => Self::Checked,
            2 => Self::Wrapping,
            3 => Self::Throwing,
            4 => Self::Saturating,
            _ => return None,
        })
    }

    /// The label used by the printer
    pub fn name(self) -> &'static str {
        match self {
            Self::Na => "NA",
            Self::Checked => "CHECKED",
            Self::Wrapping => "WRAPPING",
            Self::Throwing => "THROWING",
            Self::Saturating => "SATURATING",
        }
    }
}

macro_rules! intrinsic_kinds {
    ($($(#[$doc:meta])* $name:ident = $val:literal => $label:literal,)*) => {
        /// Intrinsic kinds dispatched by the `INTRINSIC0/1/2` opcodes
        ///
        /// The semantics of each kind is hard-wired in the interpreter's
        /// intrinsic layer; the lowering pass selects kinds by the mangled
        /// name of the core-library function being replaced.
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum IntrinsicKind {
            $($(#[$doc])* $name = $val,)*
        }

        impl IntrinsicKind {
            /// Convert a bytecode word to an intrinsic kind
            pub fn from_u32(word: u32) -> Option<Self> {
                Some(match word {
                    $($val => Self::$name,)*
                    _ => return None,
                })
            }

            /// The label used by the printer and by diagnostics
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => $label,)*
                }
            }
        }
    };
}

intrinsic_kinds! {
    // ===== Memory / C interop =====
    /// C `strlen` over a CPointer
    Strlen = 0x000 => "STRLEN",
    /// Bounds-checked `memcpy`
    MemcpyS = 0x001 => "MEMCPY_S",
    /// Bounds-checked `memset`
    MemsetS = 0x002 => "MEMSET_S",
    /// C `strcmp`
    Strcmp = 0x003 => "STRCMP",
    /// C `memcmp`
    Memcmp = 0x004 => "MEMCMP",
    /// C `strncmp`
    Strncmp = 0x005 => "STRNCMP",
    /// C `strcasecmp`
    Strcasecmp = 0x006 => "STRCASECMP",
    /// Host `malloc`, returns a CPointer tuple
    Malloc = 0x007 => "MALLOC",
    /// Host `free` of a CPointer
    Free = 0x008 => "FREE",

    // ===== CString / CPointer =====
    /// Copy a string value into a fresh NUL-terminated host buffer
    CStringInit = 0x010 => "CSTRING_INIT",
    /// Reinterpret a CString as a CPointer (no-op on the value layer)
    CStringConvertCStrToPtr = 0x011 => "CSTRING_CONVERT_CSTR_TO_PTR",
    /// Null CPointer
    CPointerInit0 = 0x012 => "CPOINTER_INIT0",
    /// CPointer from an existing address
    CPointerInit1 = 0x013 => "CPOINTER_INIT1",
    /// Pointer arithmetic on a CPointer
    CPointerAdd = 0x014 => "CPOINTER_ADD",
    /// Typed read through a CPointer
    CPointerRead = 0x015 => "CPOINTER_READ",
    /// Typed write through a CPointer
    CPointerWrite = 0x016 => "CPOINTER_WRITE",
    /// Raw address of a CPointer
    CPointerGetPointerAddress = 0x017 => "CPOINTER_GET_POINTER_ADDRESS",

    // ===== Arrays and slices =====
    /// Array length
    ArraySize = 0x020 => "ARRAY_SIZE",
    /// Bounds-checked element read
    ArrayGet = 0x021 => "ARRAY_GET",
    /// Unchecked element read
    ArrayGetUnchecked = 0x022 => "ARRAY_GET_UNCHECKED",
    /// Bounds-checked element write
    ArraySet = 0x023 => "ARRAY_SET",
    /// Unchecked element write
    ArraySetUnchecked = 0x024 => "ARRAY_SET_UNCHECKED",
    /// Shallow copy of a raw array
    ArrayClone = 0x025 => "ARRAY_CLONE",
    /// Fill an allocated raw array with one element
    ArrayInit = 0x026 => "ARRAY_INIT",
    /// Overlap-safe element copy between raw arrays
    ArrayBuiltInCopyTo = 0x027 => "ARRAY_BUILT_IN_COPY_TO",
    /// Re-slice: `{raw, start, len}` with a checked start add
    ArraySlice = 0x028 => "ARRAY_SLICE",
    /// Initialise a slice struct in place
    ArraySliceInit = 0x029 => "ARRAY_SLICE_INIT",
    /// Raw-array component of a slice
    ArraySliceRawArray = 0x02A => "ARRAY_SLICE_RAWARRAY",
    /// Start component of a slice
    ArraySliceStart = 0x02B => "ARRAY_SLICE_START",
    /// Length component of a slice
    ArraySliceSize = 0x02C => "ARRAY_SLICE_SIZE",
    /// Bounds-checked slice element read
    ArraySliceGetElement = 0x02D => "ARRAY_SLICE_GET_ELEMENT",
    /// Unchecked slice element read
    ArraySliceGetElementUnchecked = 0x02E => "ARRAY_SLICE_GET_ELEMENT_UNCHECKED",
    /// Bounds-checked slice element write
    ArraySliceSetElement = 0x02F => "ARRAY_SLICE_SET_ELEMENT",
    /// Unchecked slice element write
    ArraySliceSetElementUnchecked = 0x030 => "ARRAY_SLICE_SET_ELEMENT_UNCHECKED",
    /// Bounds-checked VArray element write
    VarraySet = 0x031 => "VARRAY_SET",
    /// Raw-array reference equality
    RawArrayRefeq = 0x032 => "RAW_ARRAY_REFEQ",
    /// Object reference equality
    ObjectRefeq = 0x033 => "OBJECT_REFEQ",
    /// Zero value for object references
    ObjectZeroValue = 0x034 => "OBJECT_ZERO_VALUE",

    // ===== Identity =====
    /// Identity hash of an object pointer
    IdentityHashcode = 0x040 => "IDENTITY_HASHCODE",
    /// Identity hash of a raw-array pointer
    IdentityHashcodeForArray = 0x041 => "IDENTITY_HASHCODE_FOR_ARRAY",

    // ===== Reflection helpers =====
    /// Printed form of a type argument as `Array<UInt8>`
    GetTypeForTypeParameter = 0x048 => "GET_TYPE_FOR_TYPE_PARAMETER",
    /// Size in bytes of the C type for a type argument
    SizeOf = 0x049 => "SIZE_OF",
    /// Alignment in bytes of the C type for a type argument
    AlignOf = 0x04A => "ALIGN_OF",

    // ===== Backtrace =====
    /// Snapshot the control stack into a PC array
    FillInStackTrace = 0x050 => "FILL_IN_STACK_TRACE",
    /// Refill the PC array of an existing exception object
    FillInStackTraceException = 0x051 => "FILL_IN_STACK_TRACE_EXCEPTION",
    /// Decode one PC-array frame into `{class, method, file, line}`
    DecodeStackTrace = 0x052 => "DECODE_STACK_TRACE",

    // ===== Miscellaneous =====
    /// `UInt32` to `Rune`
    Chr = 0x058 => "CHR",
    /// `Rune` to `Int32`
    Ord = 0x059 => "ORD",
    /// Sleep for a nanosecond count
    Sleep = 0x05A => "SLEEP",
    /// Configured heap budget (`cjHeapSize` or the 64 MiB default)
    GetMaxHeapSize = 0x05B => "GET_MAX_HEAP_SIZE",
    /// Bytes currently allocated in the arena
    GetAllocateHeapSize = 0x05C => "GET_ALLOCATE_HEAP_SIZE",
    /// Real heap usage; 0 in the interpreter
    GetRealHeapSize = 0x05D => "GET_REAL_HEAP_SIZE",
    /// Runtime pre-initialisation; no-op
    Preinitialize = 0x05E => "PREINITIALIZE",
    /// GC request; no-op
    InvokeGc = 0x05F => "INVOKE_GC",
    /// GC watch registration; no-op
    RegisterWatchedObject = 0x060 => "REGISTER_WATCHED_OBJECT",

    // ===== Concurrency stubs =====
    /// Mutex construction stub
    MutexInit = 0x070 => "MUTEX_INIT",
    /// Mutex lock stub
    MutexLock = 0x071 => "MUTEX_LOCK",
    /// Mutex unlock stub
    MutexUnlock = 0x072 => "MUTEX_UNLOCK",
    /// Mutex try-lock stub; always succeeds
    MutexTryLock = 0x073 => "MUTEX_TRY_LOCK",
    /// Mutex status stub; always held
    MutexCheckStatus = 0x074 => "MUTEX_CHECK_STATUS",
    /// Monitor construction stub
    MonitorInit = 0x075 => "MONITOR_INIT",
    /// Monitor notify stub
    MonitorNotify = 0x076 => "MONITOR_NOTIFY",
    /// Monitor notify-all stub
    MonitorNotifyAll = 0x077 => "MONITOR_NOTIFY_ALL",
    /// Monitor wait stub; returns immediately
    MonitorWait = 0x078 => "MONITOR_WAIT",
    /// Wait-queue construction stub
    WaitQueueInit = 0x079 => "WAITQUEUE_INIT",
    /// Multi-condition construction stub
    MulticonditionInit = 0x07A => "MULTICONDITION_INIT",
    /// Multi-condition notify stub
    MulticonditionNotify = 0x07B => "MULTICONDITION_NOTIFY",
    /// Multi-condition notify-all stub
    MulticonditionNotifyAll = 0x07C => "MULTICONDITION_NOTIFY_ALL",
    /// Multi-condition wait stub; returns immediately
    MulticonditionWait = 0x07D => "MULTICONDITION_WAIT",
    /// Future construction stub
    FutureInit = 0x07E => "FUTURE_INIT",
    /// Future completion query stub
    FutureIsComplete = 0x07F => "FUTURE_IS_COMPLETE",
    /// Future wait stub; returns immediately
    FutureWait = 0x080 => "FUTURE_WAIT",
    /// Future notify-all stub
    FutureNotifyAll = 0x081 => "FUTURE_NOTIFY_ALL",

    // ===== Atomics (plain loads/stores; the VM is single-threaded) =====
    /// Atomic bool load
    AtomicBoolLoad = 0x090 => "ATOMIC_BOOL_LOAD",
    /// Atomic bool store
    AtomicBoolStore = 0x091 => "ATOMIC_BOOL_STORE",
    /// Atomic bool swap
    AtomicBoolSwap = 0x092 => "ATOMIC_BOOL_SWAP",
    /// Atomic bool compare-and-swap
    AtomicBoolCas = 0x093 => "ATOMIC_BOOL_CAS",
    /// Atomic Int8 load
    AtomicInt8Load = 0x094 => "ATOMIC_INT8_LOAD",
    /// Atomic Int8 store
    AtomicInt8Store = 0x095 => "ATOMIC_INT8_STORE",
    /// Atomic Int8 swap
    AtomicInt8Swap = 0x096 => "ATOMIC_INT8_SWAP",
    /// Atomic Int8 compare-and-swap
    AtomicInt8Cas = 0x097 => "ATOMIC_INT8_CAS",
    /// Atomic Int8 fetch-add
    AtomicInt8FetchAdd = 0x098 => "ATOMIC_INT8_FETCH_ADD",
    /// Atomic Int8 fetch-sub
    AtomicInt8FetchSub = 0x099 => "ATOMIC_INT8_FETCH_SUB",
    /// Atomic Int8 fetch-and
    AtomicInt8FetchAnd = 0x09A => "ATOMIC_INT8_FETCH_AND",
    /// Atomic Int8 fetch-or
    AtomicInt8FetchOr = 0x09B => "ATOMIC_INT8_FETCH_OR",
    /// Atomic Int8 fetch-xor
    AtomicInt8FetchXor = 0x09C => "ATOMIC_INT8_FETCH_XOR",
    /// Atomic Int16 load
    AtomicInt16Load = 0x09D => "ATOMIC_INT16_LOAD",
    /// Atomic Int16 store
    AtomicInt16Store = 0x09E => "ATOMIC_INT16_STORE",
    /// Atomic Int16 swap
    AtomicInt16Swap = 0x09F => "ATOMIC_INT16_SWAP",
    /// Atomic Int16 compare-and-swap
    AtomicInt16Cas = 0x0A0 => "ATOMIC_INT16_CAS",
    /// Atomic Int16 fetch-add
    AtomicInt16FetchAdd = 0x0A1 => "ATOMIC_INT16_FETCH_ADD",
    /// Atomic Int16 fetch-sub
    AtomicInt16FetchSub = 0x0A2 => "ATOMIC_INT16_FETCH_SUB",
    /// Atomic Int16 fetch-and
    AtomicInt16FetchAnd = 0x0A3 => "ATOMIC_INT16_FETCH_AND",
    /// Atomic Int16 fetch-or
    AtomicInt16FetchOr = 0x0A4 => "ATOMIC_INT16_FETCH_OR",
    /// Atomic Int16 fetch-xor
    AtomicInt16FetchXor = 0x0A5 => "ATOMIC_INT16_FETCH_XOR",
    /// Atomic Int32 load
    AtomicInt32Load = 0x0A6 => "ATOMIC_INT32_LOAD",
    /// Atomic Int32 store
    AtomicInt32Store = 0x0A7 => "ATOMIC_INT32_STORE",
    /// Atomic Int32 swap
    AtomicInt32Swap = 0x0A8 => "ATOMIC_INT32_SWAP",
    /// Atomic Int32 compare-and-swap
    AtomicInt32Cas = 0x0A9 => "ATOMIC_INT32_CAS",
    /// Atomic Int32 fetch-add
    AtomicInt32FetchAdd = 0x0AA => "ATOMIC_INT32_FETCH_ADD",
    /// Atomic Int32 fetch-sub
    AtomicInt32FetchSub = 0x0AB => "ATOMIC_INT32_FETCH_SUB",
    /// Atomic Int32 fetch-and
    AtomicInt32FetchAnd = 0x0AC => "ATOMIC_INT32_FETCH_AND",
    /// Atomic Int32 fetch-or
    AtomicInt32FetchOr = 0x0AD => "ATOMIC_INT32_FETCH_OR",
    /// Atomic Int32 fetch-xor
    AtomicInt32FetchXor = 0x0AE => "ATOMIC_INT32_FETCH_XOR",
    /// Atomic Int64 load
    AtomicInt64Load = 0x0AF => "ATOMIC_INT64_LOAD",
    /// Atomic Int64 store
    AtomicInt64Store = 0x0B0 => "ATOMIC_INT64_STORE",
    /// Atomic Int64 swap
    AtomicInt64Swap = 0x0B1 => "ATOMIC_INT64_SWAP",
    /// Atomic Int64 compare-and-swap
    AtomicInt64Cas = 0x0B2 => "ATOMIC_INT64_CAS",
    /// Atomic Int64 fetch-add
    AtomicInt64FetchAdd = 0x0B3 => "ATOMIC_INT64_FETCH_ADD",
    /// Atomic Int64 fetch-sub
    AtomicInt64FetchSub = 0x0B4 => "ATOMIC_INT64_FETCH_SUB",
    /// Atomic Int64 fetch-and
    AtomicInt64FetchAnd = 0x0B5 => "ATOMIC_INT64_FETCH_AND",
    /// Atomic Int64 fetch-or
    AtomicInt64FetchOr = 0x0B6 => "ATOMIC_INT64_FETCH_OR",
    /// Atomic Int64 fetch-xor
    AtomicInt64FetchXor = 0x0B7 => "ATOMIC_INT64_FETCH_XOR",
    /// Atomic UInt8 load
    AtomicUint8Load = 0x0B8 => "ATOMIC_UINT8_LOAD",
    /// Atomic UInt8 store
    AtomicUint8Store = 0x0B9 => "ATOMIC_UINT8_STORE",
    /// Atomic UInt8 swap
    AtomicUint8Swap = 0x0BA => "ATOMIC_UINT8_SWAP",
    /// Atomic UInt8 compare-and-swap
    AtomicUint8Cas = 0x0BB => "ATOMIC_UINT8_CAS",
    /// Atomic UInt8 fetch-add
    AtomicUint8FetchAdd = 0x0BC => "ATOMIC_UINT8_FETCH_ADD",
    /// Atomic UInt8 fetch-sub
    AtomicUint8FetchSub = 0x0BD => "ATOMIC_UINT8_FETCH_SUB",
    /// Atomic UInt8 fetch-and
    AtomicUint8FetchAnd = 0x0BE => "ATOMIC_UINT8_FETCH_AND",
    /// Atomic UInt8 fetch-or
    AtomicUint8FetchOr = 0x0BF => "ATOMIC_UINT8_FETCH_OR",
    /// Atomic UInt8 fetch-xor
    AtomicUint8FetchXor = 0x0C0 => "ATOMIC_UINT8_FETCH_XOR",
    /// Atomic UInt16 load
    AtomicUint16Load = 0x0C1 => "ATOMIC_UINT16_LOAD",
    /// Atomic UInt16 store
    AtomicUint16Store = 0x0C2 => "ATOMIC_UINT16_STORE",
    /// Atomic UInt16 swap
    AtomicUint16Swap = 0x0C3 => "ATOMIC_UINT16_SWAP",
    /// Atomic UInt16 compare-and-swap
    AtomicUint16Cas = 0x0C4 => "ATOMIC_UINT16_CAS",
    /// Atomic UInt16 fetch-add
    AtomicUint16FetchAdd = 0x0C5 => "ATOMIC_UINT16_FETCH_ADD",
    /// Atomic UInt16 fetch-sub
    AtomicUint16FetchSub = 0x0C6 => "ATOMIC_UINT16_FETCH_SUB",
    /// Atomic UInt16 fetch-and
    AtomicUint16FetchAnd = 0x0C7 => "ATOMIC_UINT16_FETCH_AND",
    /// Atomic UInt16 fetch-or
    AtomicUint16FetchOr = 0x0C8 => "ATOMIC_UINT16_FETCH_OR",
    /// Atomic UInt16 fetch-xor
    AtomicUint16FetchXor = 0x0C9 => "ATOMIC_UINT16_FETCH_XOR",
    /// Atomic UInt32 load
    AtomicUint32Load = 0x0CA => "ATOMIC_UINT32_LOAD",
    /// Atomic UInt32 store
    AtomicUint32Store = 0x0CB => "ATOMIC_UINT32_STORE",
    /// Atomic UInt32 swap
    AtomicUint32Swap = 0x0CC => "ATOMIC_UINT32_SWAP",
    /// Atomic UInt32 compare-and-swap
    AtomicUint32Cas = 0x0CD => "ATOMIC_UINT32_CAS",
    /// Atomic UInt32 fetch-add
    AtomicUint32FetchAdd = 0x0CE => "ATOMIC_UINT32_FETCH_ADD",
    /// Atomic UInt32 fetch-sub
    AtomicUint32FetchSub = 0x0CF => "ATOMIC_UINT32_FETCH_SUB",
    /// Atomic UInt32 fetch-and
    AtomicUint32FetchAnd = 0x0D0 => "ATOMIC_UINT32_FETCH_AND",
    /// Atomic UInt32 fetch-or
    AtomicUint32FetchOr = 0x0D1 => "ATOMIC_UINT32_FETCH_OR",
    /// Atomic UInt32 fetch-xor
    AtomicUint32FetchXor = 0x0D2 => "ATOMIC_UINT32_FETCH_XOR",
    /// Atomic UInt64 load
    AtomicUint64Load = 0x0D3 => "ATOMIC_UINT64_LOAD",
    /// Atomic UInt64 store
    AtomicUint64Store = 0x0D4 => "ATOMIC_UINT64_STORE",
    /// Atomic UInt64 swap
    AtomicUint64Swap = 0x0D5 => "ATOMIC_UINT64_SWAP",
    /// Atomic UInt64 compare-and-swap
    AtomicUint64Cas = 0x0D6 => "ATOMIC_UINT64_CAS",
    /// Atomic UInt64 fetch-add
    AtomicUint64FetchAdd = 0x0D7 => "ATOMIC_UINT64_FETCH_ADD",
    /// Atomic UInt64 fetch-sub
    AtomicUint64FetchSub = 0x0D8 => "ATOMIC_UINT64_FETCH_SUB",
    /// Atomic UInt64 fetch-and
    AtomicUint64FetchAnd = 0x0D9 => "ATOMIC_UINT64_FETCH_AND",
    /// Atomic UInt64 fetch-or
    AtomicUint64FetchOr = 0x0DA => "ATOMIC_UINT64_FETCH_OR",
    /// Atomic UInt64 fetch-xor
    AtomicUint64FetchXor = 0x0DB => "ATOMIC_UINT64_FETCH_XOR",
    /// Atomic reference load
    AtomicReferencebaseLoad = 0x0DC => "ATOMIC_REFERENCEBASE_LOAD",
    /// Atomic reference store
    AtomicReferencebaseStore = 0x0DD => "ATOMIC_REFERENCEBASE_STORE",
    /// Atomic reference swap
    AtomicReferencebaseSwap = 0x0DE => "ATOMIC_REFERENCEBASE_SWAP",
    /// Atomic reference compare-and-swap
    AtomicReferencebaseCas = 0x0DF => "ATOMIC_REFERENCEBASE_CAS",
    /// Atomic option-reference load
    AtomicOptionreferenceLoad = 0x0E0 => "ATOMIC_OPTIONREFERENCE_LOAD",
    /// Atomic option-reference store
    AtomicOptionreferenceStore = 0x0E1 => "ATOMIC_OPTIONREFERENCE_STORE",
    /// Atomic option-reference swap
    AtomicOptionreferenceSwap = 0x0E2 => "ATOMIC_OPTIONREFERENCE_SWAP",
    /// Atomic option-reference compare-and-swap
    AtomicOptionreferenceCas = 0x0E3 => "ATOMIC_OPTIONREFERENCE_CAS",

    // ===== Overflow-intrinsic aliases =====
    /// Checked addition
    OverflowCheckedAdd = 0x100 => "OVERFLOW_CHECKED_ADD",
    /// Checked subtraction
    OverflowCheckedSub = 0x101 => "OVERFLOW_CHECKED_SUB",
    /// Checked multiplication
    OverflowCheckedMul = 0x102 => "OVERFLOW_CHECKED_MUL",
    /// Checked division
    OverflowCheckedDiv = 0x103 => "OVERFLOW_CHECKED_DIV",
    /// Checked remainder
    OverflowCheckedMod = 0x104 => "OVERFLOW_CHECKED_MOD",
    /// Checked exponentiation
    OverflowCheckedPow = 0x105 => "OVERFLOW_CHECKED_POW",
    /// Checked increment
    OverflowCheckedInc = 0x106 => "OVERFLOW_CHECKED_INC",
    /// Checked decrement
    OverflowCheckedDec = 0x107 => "OVERFLOW_CHECKED_DEC",
    /// Checked negation
    OverflowCheckedNeg = 0x108 => "OVERFLOW_CHECKED_NEG",
    /// Throwing addition
    OverflowThrowingAdd = 0x109 => "OVERFLOW_THROWING_ADD",
    /// Throwing subtraction
    OverflowThrowingSub = 0x10A => "OVERFLOW_THROWING_SUB",
    /// Throwing multiplication
    OverflowThrowingMul = 0x10B => "OVERFLOW_THROWING_MUL",
    /// Throwing division
    OverflowThrowingDiv = 0x10C => "OVERFLOW_THROWING_DIV",
    /// Throwing remainder
    OverflowThrowingMod = 0x10D => "OVERFLOW_THROWING_MOD",
    /// Throwing exponentiation
    OverflowThrowingPow = 0x10E => "OVERFLOW_THROWING_POW",
    /// Throwing increment
    OverflowThrowingInc = 0x10F => "OVERFLOW_THROWING_INC",
    /// Throwing decrement
    OverflowThrowingDec = 0x110 => "OVERFLOW_THROWING_DEC",
    /// Throwing negation
    OverflowThrowingNeg = 0x111 => "OVERFLOW_THROWING_NEG",
    /// Wrapping addition
    OverflowWrappingAdd = 0x112 => "OVERFLOW_WRAPPING_ADD",
    /// Wrapping subtraction
    OverflowWrappingSub = 0x113 => "OVERFLOW_WRAPPING_SUB",
    /// Wrapping multiplication
    OverflowWrappingMul = 0x114 => "OVERFLOW_WRAPPING_MUL",
    /// Wrapping division
    OverflowWrappingDiv = 0x115 => "OVERFLOW_WRAPPING_DIV",
    /// Wrapping remainder
    OverflowWrappingMod = 0x116 => "OVERFLOW_WRAPPING_MOD",
    /// Wrapping exponentiation
    OverflowWrappingPow = 0x117 => "OVERFLOW_WRAPPING_POW",
    /// Wrapping increment
    OverflowWrappingInc = 0x118 => "OVERFLOW_WRAPPING_INC",
    /// Wrapping decrement
    OverflowWrappingDec = 0x119 => "OVERFLOW_WRAPPING_DEC",
    /// Wrapping negation
    OverflowWrappingNeg = 0x11A => "OVERFLOW_WRAPPING_NEG",
    /// Saturating addition
    OverflowSaturatingAdd = 0x11B => "OVERFLOW_SATURATING_ADD",
    /// Saturating subtraction
    OverflowSaturatingSub = 0x11C => "OVERFLOW_SATURATING_SUB",
    /// Saturating multiplication
    OverflowSaturatingMul = 0x11D => "OVERFLOW_SATURATING_MUL",
    /// Saturating division
    OverflowSaturatingDiv = 0x11E => "OVERFLOW_SATURATING_DIV",
    /// Saturating remainder
    OverflowSaturatingMod = 0x11F => "OVERFLOW_SATURATING_MOD",
    /// Saturating exponentiation
    OverflowSaturatingPow = 0x120 => "OVERFLOW_SATURATING_POW",
    /// Saturating increment
    OverflowSaturatingInc = 0x121 => "OVERFLOW_SATURATING_INC",
    /// Saturating decrement
    OverflowSaturatingDec = 0x122 => "OVERFLOW_SATURATING_DEC",
    /// Saturating negation
    OverflowSaturatingNeg = 0x123 => "OVERFLOW_SATURATING_NEG",
}

impl IntrinsicKind {
    /// If this is an overflow-intrinsic alias, the arithmetic opcode and
    /// strategy it lowers to
    pub fn overflow_alias(self) -> Option<(OpCode, OverflowStrategy)> {
        use IntrinsicKind::*;
        use OverflowStrategy::*;
        let (op, strat) = match self {
            OverflowCheckedAdd => (OpCode::BinAdd, Checked),
            OverflowCheckedSub => (OpCode::BinSub, Checked),
            OverflowCheckedMul => (OpCode::BinMul, Checked),
            OverflowCheckedDiv => (OpCode::BinDiv, Checked),
            OverflowCheckedMod => (OpCode::BinMod, Checked),
            OverflowCheckedPow => (OpCode::BinExp, Checked),
            OverflowCheckedInc => (OpCode::UnInc, Checked),
            OverflowCheckedDec => (OpCode::UnDec, Checked),
            OverflowCheckedNeg => (OpCode::UnNeg, Checked),
            OverflowThrowingAdd => (OpCode::BinAdd, Throwing),
            OverflowThrowingSub => (OpCode::BinSub, Throwing),
            OverflowThrowingMul => (OpCode::BinMul, Throwing),
            OverflowThrowingDiv => (OpCode::BinDiv, Throwing),
            OverflowThrowingMod => (OpCode::BinMod, Throwing),
            OverflowThrowingPow => (OpCode::BinExp, Throwing),
            OverflowThrowingInc => (OpCode::UnInc, Throwing),
            OverflowThrowingDec => (OpCode::UnDec, Throwing),
            OverflowThrowingNeg => (OpCode::UnNeg, Throwing),
            OverflowWrappingAdd => (OpCode::BinAdd, Wrapping),
            OverflowWrappingSub => (OpCode::BinSub, Wrapping),
            OverflowWrappingMul => (OpCode::BinMul, Wrapping),
            OverflowWrappingDiv => (OpCode::BinDiv, Wrapping),
            OverflowWrappingMod => (OpCode::BinMod, Wrapping),
            OverflowWrappingPow => (OpCode::BinExp, Wrapping),
            OverflowWrappingInc => (OpCode::UnInc, Wrapping),
            OverflowWrappingDec => (OpCode::UnDec, Wrapping),
            OverflowWrappingNeg => (OpCode::UnNeg, Wrapping),
            OverflowSaturatingAdd => (OpCode::BinAdd, Saturating),
            OverflowSaturatingSub => (OpCode::BinSub, Saturating),
            OverflowSaturatingMul => (OpCode::BinMul, Saturating),
            OverflowSaturatingDiv => (OpCode::BinDiv, Saturating),
            OverflowSaturatingMod => (OpCode::BinMod, Saturating),
            OverflowSaturatingPow => (OpCode::BinExp, Saturating),
            OverflowSaturatingInc => (OpCode::UnInc, Saturating),
            OverflowSaturatingDec => (OpCode::UnDec, Saturating),
            OverflowSaturatingNeg => (OpCode::UnNeg, Saturating),
            _ => return None,
        };
        Some((op, strat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_kind_roundtrip() {
        for word in 0..32u32 {
            if let Some(kind) = TypeKind::from_u32(word) {
                assert_eq!(kind as u32, word);
            }
        }
        assert_eq!(TypeKind::from_u32(22), None);
    }

    #[test]
    fn test_type_kind_predicates() {
        assert!(TypeKind::Int8.is_integer());
        assert!(TypeKind::UIntNat.is_integer());
        assert!(!TypeKind::Float32.is_integer());
        assert!(TypeKind::Float16.is_float());
        assert!(!TypeKind::Rune.is_float());
    }

    #[test]
    fn test_overflow_strategy_roundtrip() {
        for word in 0..5u32 {
            let strat = OverflowStrategy::from_u32(word).unwrap();
            assert_eq!(strat as u32, word);
        }
        assert_eq!(OverflowStrategy::from_u32(5), None);
    }

    #[test]
    fn test_intrinsic_kind_roundtrip() {
        for word in 0..0x200u32 {
            if let Some(kind) = IntrinsicKind::from_u32(word) {
                assert_eq!(kind as u32, word, "failed roundtrip for {:?}", kind);
            }
        }
    }

    #[test]
    fn test_intrinsic_labels() {
        assert_eq!(IntrinsicKind::MemcpyS.name(), "MEMCPY_S");
        assert_eq!(IntrinsicKind::AtomicInt64FetchAdd.name(), "ATOMIC_INT64_FETCH_ADD");
        assert_eq!(IntrinsicKind::ArraySliceGetElementUnchecked.name(),
            "ARRAY_SLICE_GET_ELEMENT_UNCHECKED");
    }

    #[test]
    fn test_overflow_aliases() {
        let (op, strat) = IntrinsicKind::OverflowThrowingAdd.overflow_alias().unwrap();
        assert_eq!(op, OpCode::BinAdd);
        assert_eq!(strat, OverflowStrategy::Throwing);
        let (op, strat) = IntrinsicKind::OverflowSaturatingNeg.overflow_alias().unwrap();
        assert_eq!(op, OpCode::UnNeg);
        assert_eq!(strat, OverflowStrategy::Saturating);
        assert!(IntrinsicKind::Malloc.overflow_alias().is_none());
    }
}
