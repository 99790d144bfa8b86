//! Intrinsic functions
//!
//! Operations whose semantics are hard-wired in the interpreter instead of
//! being implemented in Cangjie: C-interop through the host libc, the
//! raw-array and slice families, identity hashing, backtrace assembly, and
//! trivial stubs for the GC and concurrency surface (the VM is
//! single-threaded, so atomics degrade to plain loads and stores and lock
//! operations succeed immediately).

use std::ops::{BitAnd, BitOr, BitXor};
use std::time::Duration;

use once_cell::sync::Lazy;

use bchir_bytecode::{IntrinsicKind, OpCode, OverflowStrategy, Pc, TypeKind};

use super::{Fault, Interpreter};
use crate::stack::ControlState;
use crate::value::{IVal, ValueRef};

const KB: i64 = 1024;
const MB: i64 = KB * KB;
const GB: i64 = KB * MB;
const DEFAULT_HEAP_SIZE: i64 = 64 * MB;

/// Heap budget from the `cjHeapSize` environment variable, e.g. `256mb`.
/// Malformed or missing values fall back to 64 MiB.
static MAX_HEAP_SIZE: Lazy<i64> = Lazy::new(|| {
    let Ok(raw) = std::env::var("cjHeapSize") else {
        return DEFAULT_HEAP_SIZE;
    };
    parse_heap_size(&raw).unwrap_or(DEFAULT_HEAP_SIZE)
});

fn parse_heap_size(raw: &str) -> Option<i64> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.len() <= 2 {
        return None;
    }
    let (num, unit) = s.split_at(s.len() - 2);
    let value: i64 = num.parse().ok()?;
    if value <= 0 {
        return None;
    }
    let scale = match unit.to_ascii_lowercase().as_str() {
        "kb" => KB,
        "mb" => MB,
        "gb" => GB,
        _ => return None,
    };
    value.checked_mul(scale)
}

/// Length of a raw array: the stored content minus the length slot. Also
/// accepts a C-style array, whose length sits just below the data pointer.
fn array_size(val: &IVal) -> Result<i64, Fault> {
    match val {
        IVal::Array(content) => Ok(content.len() as i64 - 1),
        IVal::Tuple(fields) => {
            let addr = fields
                .first()
                .and_then(IVal::as_usize)
                .ok_or(Fault::StackType { expected: "CPointer", found: "Tuple" })?;
            let len_ptr = (addr - std::mem::size_of::<i64>()) as *const i64;
            Ok(unsafe { len_ptr.read_unaligned() })
        }
        other => Err(Fault::StackType { expected: "Array", found: other.kind_name() }),
    }
}

fn cpointer_addr(fields: &[IVal]) -> Result<usize, Fault> {
    fields.first().and_then(IVal::as_usize).ok_or(Fault::StackType {
        expected: "CPointer",
        found: "Tuple",
    })
}

/// Byte size of the C type behind a type-pool entry
fn ffi_size_of(kind: TypeKind) -> usize {
    match kind {
        TypeKind::Unit => 0,
        TypeKind::Bool | TypeKind::Int8 | TypeKind::UInt8 => 1,
        TypeKind::Int16 | TypeKind::UInt16 | TypeKind::Float16 => 2,
        TypeKind::Int32 | TypeKind::UInt32 | TypeKind::Rune | TypeKind::Float32 => 4,
        TypeKind::Int64 | TypeKind::UInt64 | TypeKind::Float64 => 8,
        // native and reference kinds are pointer sized
        _ => std::mem::size_of::<usize>(),
    }
}

fn ffi_align_of(kind: TypeKind) -> usize {
    ffi_size_of(kind).max(1)
}

macro_rules! int_fetch_op {
    ($cur:expr, $val:expr, $f:ident) => {
        match ($cur, $val) {
            (IVal::Int8(a), IVal::Int8(b)) => Some(IVal::Int8(a.$f(*b))),
            (IVal::Int16(a), IVal::Int16(b)) => Some(IVal::Int16(a.$f(*b))),
            (IVal::Int32(a), IVal::Int32(b)) => Some(IVal::Int32(a.$f(*b))),
            (IVal::Int64(a), IVal::Int64(b)) => Some(IVal::Int64(a.$f(*b))),
            (IVal::UInt8(a), IVal::UInt8(b)) => Some(IVal::UInt8(a.$f(*b))),
            (IVal::UInt16(a), IVal::UInt16(b)) => Some(IVal::UInt16(a.$f(*b))),
            (IVal::UInt32(a), IVal::UInt32(b)) => Some(IVal::UInt32(a.$f(*b))),
            (IVal::UInt64(a), IVal::UInt64(b)) => Some(IVal::UInt64(a.$f(*b))),
            _ => None,
        }
    };
}

impl<'a> Interpreter<'a> {
    pub(crate) fn op_intrinsic(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        match op {
            OpCode::Intrinsic0 => {
                self.intrinsic0(op_pc)?;
            }
            OpCode::Intrinsic1 => {
                self.intrinsic1(op_pc)?;
            }
            OpCode::Intrinsic2 => {
                self.intrinsic2(op_pc)?;
            }
            _ => {
                self.stack.ctrl_push(ControlState {
                    op_code: op,
                    callee_pc: 0,
                    return_pc: op_pc,
                    prev_bp: self.env.bp(),
                });
                let raised = match op {
                    OpCode::Intrinsic0Exc => self.intrinsic0(op_pc)?,
                    OpCode::Intrinsic1Exc => self.intrinsic1(op_pc)?,
                    _ => self.intrinsic2(op_pc)?,
                };
                if !raised {
                    self.stack.ctrl_pop();
                    // skip the handler word
                    self.pc += 1;
                }
            }
        }
        Ok(())
    }

    fn intrinsic_kind(&self, idx: Pc) -> Result<IntrinsicKind, Fault> {
        let word = self.bchir.get(idx);
        IntrinsicKind::from_u32(word).ok_or(Fault::UnknownIntrinsic(word))
    }

    fn intrinsic0(&mut self, op_pc: Pc) -> Result<bool, Fault> {
        use IntrinsicKind::*;
        let kind = self.intrinsic_kind(op_pc + 1)?;
        self.pc = op_pc + 2;
        match kind {
            Strlen => self.intr_strlen()?,
            MemcpyS => self.intr_memcpy_s()?,
            MemsetS => self.intr_memset_s()?,
            Free => self.intr_free()?,
            Malloc => self.intr_malloc()?,
            Strcmp => self.intr_strcmp()?,
            Memcmp => self.intr_memcmp()?,
            Strncmp => self.intr_strncmp()?,
            Strcasecmp => self.intr_strcasecmp()?,
            VarraySet => return self.intr_varray_set(op_pc),
            ArraySize => {
                let ptr = self.pop_pointer()?;
                let size = array_size(unsafe { ptr.get() })?;
                self.stack.push(IVal::Int64(size));
            }
            ObjectZeroValue => self.stack.push(IVal::Nullptr),
            CPointerInit0 => self.stack.push(IVal::cpointer(0)),
            CPointerInit1 => {
                let src = self.pop_tuple()?;
                let addr = cpointer_addr(&src)?;
                self.stack.push(IVal::cpointer(addr));
            }
            CPointerGetPointerAddress => {
                let tuple = self.pop_tuple()?;
                let addr = cpointer_addr(&tuple)?;
                self.stack.push(IVal::UIntNat(addr));
            }
            ArrayInit => self.intr_array_init()?,
            ArraySliceInit => self.intr_array_slice_init()?,
            ArraySliceRawArray => {
                let mut tuple = self.pop_tuple()?;
                self.stack.push(tuple.swap_remove(0));
            }
            ArraySliceStart => {
                let mut tuple = self.pop_tuple()?;
                self.stack.push(tuple.swap_remove(1));
            }
            ArraySliceSize => {
                let mut tuple = self.pop_tuple()?;
                self.stack.push(tuple.swap_remove(2));
            }
            ArraySlice => self.intr_array_slice()?,
            Chr => {
                let v = match self.pop_val()? {
                    IVal::UInt32(v) => v,
                    other => {
                        return Err(Fault::StackType {
                            expected: "UInt32",
                            found: other.kind_name(),
                        })
                    }
                };
                self.stack.push(IVal::Rune(v));
            }
            Ord => {
                let v = self.pop_rune()?;
                self.stack.push(IVal::Int32(v as i32));
            }
            Sleep => {
                let ns = self.pop_i64()?;
                if !self.const_eval && ns > 0 {
                    std::thread::sleep(Duration::from_nanos(ns as u64));
                }
                self.stack.push(IVal::Unit);
            }
            RawArrayRefeq | ObjectRefeq => self.intr_ref_eq()?,
            CStringInit => self.intr_cstring_init()?,
            CStringConvertCStrToPtr => {
                // already CPointer shaped on the value layer
                match self.stack.top() {
                    Some(IVal::Tuple(_)) => {}
                    Some(other) => {
                        return Err(Fault::StackType {
                            expected: "CString",
                            found: other.kind_name(),
                        })
                    }
                    None => return Err(Fault::StackUnderflow),
                }
            }
            IdentityHashcode => {
                let ptr = self.pop_pointer()?;
                self.stack.push(IVal::Int64(ptr.addr() as i64));
            }
            IdentityHashcodeForArray => {
                let tuple = self.pop_tuple()?;
                let ptr = tuple.first().and_then(IVal::as_pointer).ok_or(
                    Fault::StackType { expected: "Pointer", found: "Tuple" },
                )?;
                self.stack.push(IVal::Int64(ptr.addr() as i64));
            }
            InvokeGc => {
                self.pop_val()?;
                self.stack.push(IVal::Unit);
            }
            Preinitialize => self.stack.push(IVal::Unit),
            RegisterWatchedObject => {
                self.pop_val()?;
                self.stack.push(IVal::Unit);
            }
            GetMaxHeapSize => self.stack.push(IVal::Int64(*MAX_HEAP_SIZE)),
            GetAllocateHeapSize => {
                self.stack.push(IVal::Int64(self.arena.allocated_size()))
            }
            GetRealHeapSize => self.stack.push(IVal::Int64(0)),
            FillInStackTrace => self.intr_fill_in_stack_trace()?,
            FillInStackTraceException => self.intr_fill_in_stack_trace_exception()?,
            DecodeStackTrace => self.intr_decode_stack_trace()?,

            // lock constructors report "not locked", queries succeed
            MutexInit | MonitorInit | MulticonditionInit => {
                self.pop_val()?;
                self.stack.push(IVal::Bool(false));
            }
            MutexLock | MutexUnlock | MonitorNotify | MonitorNotifyAll | WaitQueueInit
            | FutureInit | FutureNotifyAll => {
                self.pop_val()?;
                self.stack.push(IVal::Unit);
            }
            MutexTryLock | MutexCheckStatus | FutureIsComplete => {
                self.pop_val()?;
                self.stack.push(IVal::Bool(true));
            }
            MonitorWait | FutureWait => {
                self.pop_val()?;
                self.pop_val()?;
                self.stack.push(IVal::Bool(true));
            }
            MulticonditionNotify | MulticonditionNotifyAll => {
                self.pop_val()?;
                self.pop_val()?;
                self.stack.push(IVal::Unit);
            }
            MulticonditionWait => {
                self.pop_val()?;
                self.pop_val()?;
                self.pop_val()?;
                self.stack.push(IVal::Bool(true));
            }

            AtomicBoolLoad | AtomicInt8Load | AtomicInt16Load | AtomicInt32Load
            | AtomicInt64Load | AtomicUint8Load | AtomicUint16Load | AtomicUint32Load
            | AtomicUint64Load | AtomicReferencebaseLoad | AtomicOptionreferenceLoad => {
                self.intr_atomic_load()?
            }
            AtomicBoolStore | AtomicInt8Store | AtomicInt16Store | AtomicInt32Store
            | AtomicInt64Store | AtomicUint8Store | AtomicUint16Store | AtomicUint32Store
            | AtomicUint64Store | AtomicReferencebaseStore | AtomicOptionreferenceStore => {
                self.intr_atomic_store()?
            }
            AtomicBoolSwap | AtomicInt8Swap | AtomicInt16Swap | AtomicInt32Swap
            | AtomicInt64Swap | AtomicUint8Swap | AtomicUint16Swap | AtomicUint32Swap
            | AtomicUint64Swap | AtomicReferencebaseSwap | AtomicOptionreferenceSwap => {
                self.intr_atomic_swap()?
            }
            AtomicBoolCas | AtomicInt8Cas | AtomicInt16Cas | AtomicInt32Cas | AtomicInt64Cas
            | AtomicUint8Cas | AtomicUint16Cas | AtomicUint32Cas | AtomicUint64Cas
            | AtomicReferencebaseCas | AtomicOptionreferenceCas => self.intr_atomic_cas()?,
            AtomicInt8FetchAdd | AtomicInt16FetchAdd | AtomicInt32FetchAdd
            | AtomicInt64FetchAdd | AtomicUint8FetchAdd | AtomicUint16FetchAdd
            | AtomicUint32FetchAdd | AtomicUint64FetchAdd => {
                self.intr_atomic_fetch(|cur, val| int_fetch_op!(cur, val, wrapping_add))?
            }
            AtomicInt8FetchSub | AtomicInt16FetchSub | AtomicInt32FetchSub
            | AtomicInt64FetchSub | AtomicUint8FetchSub | AtomicUint16FetchSub
            | AtomicUint32FetchSub | AtomicUint64FetchSub => {
                self.intr_atomic_fetch(|cur, val| int_fetch_op!(cur, val, wrapping_sub))?
            }
            AtomicInt8FetchAnd | AtomicInt16FetchAnd | AtomicInt32FetchAnd
            | AtomicInt64FetchAnd | AtomicUint8FetchAnd | AtomicUint16FetchAnd
            | AtomicUint32FetchAnd | AtomicUint64FetchAnd => {
                self.intr_atomic_fetch(|cur, val| int_fetch_op!(cur, val, bitand))?
            }
            AtomicInt8FetchOr | AtomicInt16FetchOr | AtomicInt32FetchOr | AtomicInt64FetchOr
            | AtomicUint8FetchOr | AtomicUint16FetchOr | AtomicUint32FetchOr
            | AtomicUint64FetchOr => {
                self.intr_atomic_fetch(|cur, val| int_fetch_op!(cur, val, bitor))?
            }
            AtomicInt8FetchXor | AtomicInt16FetchXor | AtomicInt32FetchXor
            | AtomicInt64FetchXor | AtomicUint8FetchXor | AtomicUint16FetchXor
            | AtomicUint32FetchXor | AtomicUint64FetchXor => {
                self.intr_atomic_fetch(|cur, val| int_fetch_op!(cur, val, bitxor))?
            }

            _ => return Err(Fault::UnknownIntrinsic(kind as u32)),
        }
        Ok(false)
    }

    fn intrinsic1(&mut self, op_pc: Pc) -> Result<bool, Fault> {
        use IntrinsicKind::*;
        let kind = self.intrinsic_kind(op_pc + 1)?;
        self.pc = op_pc + 3;
        if let Some((op, strat)) = kind.overflow_alias() {
            let ty_kind = self.type_kind_at(op_pc + 2)?;
            return self.bin_op_with_kind(op, ty_kind, strat, op_pc);
        }
        match kind {
            ArrayBuiltInCopyTo => self.intr_array_copy_to()?,
            GetTypeForTypeParameter => {
                let ty_idx = self.bchir.get(op_pc + 2);
                let name = self.bchir.type_at(ty_idx).name.clone();
                self.stack.push(IVal::string_to_array(&name));
            }
            ArrayClone => self.intr_array_clone()?,
            ArrayGet => return self.intr_array_get(op_pc, true),
            ArrayGetUnchecked => return self.intr_array_get(op_pc, false),
            ArraySet => return self.intr_array_set(op_pc, true),
            ArraySetUnchecked => return self.intr_array_set(op_pc, false),
            SizeOf => {
                let ty_kind = self.type_kind_at(op_pc + 2)?;
                self.stack.push(IVal::UIntNat(ffi_size_of(ty_kind)));
            }
            AlignOf => {
                let ty_kind = self.type_kind_at(op_pc + 2)?;
                self.stack.push(IVal::UIntNat(ffi_align_of(ty_kind)));
            }
            CPointerAdd => {
                let offset = self.pop_i64()?;
                let tuple = self.pop_tuple()?;
                let addr = cpointer_addr(&tuple)?;
                let elem = ffi_size_of(self.type_kind_at(op_pc + 2)?);
                let new_addr =
                    addr.wrapping_add_signed((offset as isize).wrapping_mul(elem as isize));
                self.stack.push(IVal::cpointer(new_addr));
            }
            CPointerRead => self.intr_cpointer_read(op_pc)?,
            CPointerWrite => self.intr_cpointer_write(op_pc)?,
            _ => return Err(Fault::UnknownIntrinsic(kind as u32)),
        }
        Ok(false)
    }

    fn intrinsic2(&mut self, op_pc: Pc) -> Result<bool, Fault> {
        use IntrinsicKind::*;
        let kind = self.intrinsic_kind(op_pc + 1)?;
        self.pc = op_pc + 4;
        match kind {
            ArraySliceGetElement => self.intr_array_slice_get(op_pc, true),
            ArraySliceGetElementUnchecked => self.intr_array_slice_get(op_pc, false),
            ArraySliceSetElement => self.intr_array_slice_set(op_pc, true),
            ArraySliceSetElementUnchecked => self.intr_array_slice_set(op_pc, false),
            _ => Err(Fault::UnknownIntrinsic(kind as u32)),
        }
    }

    fn type_kind_at(&self, idx: Pc) -> Result<TypeKind, Fault> {
        let ty_idx = self.bchir.get(idx);
        if ty_idx as usize >= self.bchir.types().len() {
            return Err(Fault::BadImmediate { what: "type index", value: ty_idx });
        }
        Ok(self.bchir.type_at(ty_idx).kind)
    }

    // ===== C interop =====

    fn intr_strlen(&mut self) -> Result<(), Fault> {
        let tuple = self.pop_tuple()?;
        let addr = cpointer_addr(&tuple)?;
        let len = unsafe { libc::strlen(addr as *const libc::c_char) };
        self.stack.push(IVal::UIntNat(len));
        Ok(())
    }

    fn intr_memcpy_s(&mut self) -> Result<(), Fault> {
        let count = self.pop_usize()?;
        let src = self.pop_tuple()?;
        let dest_max = self.pop_usize()?;
        let dest = self.pop_tuple()?;
        let dest_addr = cpointer_addr(&dest)?;
        let src_addr = cpointer_addr(&src)?;
        let ret = if count > dest_max || dest_addr == 0 || src_addr == 0 {
            libc::ERANGE
        } else {
            unsafe {
                std::ptr::copy(src_addr as *const u8, dest_addr as *mut u8, count);
            }
            0
        };
        self.stack.push(IVal::Int32(ret));
        Ok(())
    }

    fn intr_memset_s(&mut self) -> Result<(), Fault> {
        let count = self.pop_usize()?;
        let value = match self.pop_val()? {
            IVal::Int32(v) => v,
            other => {
                return Err(Fault::StackType { expected: "Int32", found: other.kind_name() })
            }
        };
        let dest_max = self.pop_usize()?;
        let dest = self.pop_tuple()?;
        let dest_addr = cpointer_addr(&dest)?;
        let ret = if count > dest_max || dest_addr == 0 {
            libc::ERANGE
        } else {
            unsafe {
                std::ptr::write_bytes(dest_addr as *mut u8, value as u8, count);
            }
            0
        };
        self.stack.push(IVal::Int32(ret));
        Ok(())
    }

    fn intr_free(&mut self) -> Result<(), Fault> {
        let tuple = self.pop_tuple()?;
        let addr = cpointer_addr(&tuple)?;
        unsafe {
            libc::free(addr as *mut libc::c_void);
        }
        self.stack.push(IVal::Unit);
        Ok(())
    }

    fn intr_malloc(&mut self) -> Result<(), Fault> {
        let size = self.pop_usize()?;
        let addr = unsafe { libc::malloc(size) };
        self.stack.push(IVal::cpointer(addr as usize));
        Ok(())
    }

    fn intr_strcmp(&mut self) -> Result<(), Fault> {
        let rhs = self.pop_tuple()?;
        let lhs = self.pop_tuple()?;
        let res = unsafe {
            libc::strcmp(
                cpointer_addr(&lhs)? as *const libc::c_char,
                cpointer_addr(&rhs)? as *const libc::c_char,
            )
        };
        self.stack.push(IVal::Int32(res));
        Ok(())
    }

    fn intr_memcmp(&mut self) -> Result<(), Fault> {
        let count = self.pop_usize()?;
        let rhs = self.pop_tuple()?;
        let lhs = self.pop_tuple()?;
        let res = unsafe {
            libc::memcmp(
                cpointer_addr(&lhs)? as *const libc::c_void,
                cpointer_addr(&rhs)? as *const libc::c_void,
                count,
            )
        };
        self.stack.push(IVal::Int32(res));
        Ok(())
    }

    fn intr_strncmp(&mut self) -> Result<(), Fault> {
        let count = self.pop_usize()?;
        let rhs = self.pop_tuple()?;
        let lhs = self.pop_tuple()?;
        let res = unsafe {
            libc::strncmp(
                cpointer_addr(&lhs)? as *const libc::c_char,
                cpointer_addr(&rhs)? as *const libc::c_char,
                count,
            )
        };
        self.stack.push(IVal::Int32(res));
        Ok(())
    }

    fn intr_strcasecmp(&mut self) -> Result<(), Fault> {
        let rhs = self.pop_tuple()?;
        let lhs = self.pop_tuple()?;
        let res = unsafe {
            libc::strcasecmp(
                cpointer_addr(&lhs)? as *const libc::c_char,
                cpointer_addr(&rhs)? as *const libc::c_char,
            )
        };
        self.stack.push(IVal::Int32(res));
        Ok(())
    }

    fn intr_cstring_init(&mut self) -> Result<(), Fault> {
        let tuple = self.pop_tuple()?;
        // already a CPointer: pass through
        if matches!(tuple.first(), Some(IVal::UIntNat(_))) {
            self.stack.push(IVal::Tuple(tuple));
            return Ok(());
        }
        let ptr = tuple.first().and_then(IVal::as_pointer).ok_or(Fault::StackType {
            expected: "String",
            found: "Tuple",
        })?;
        match unsafe { ptr.get() } {
            IVal::Array(content) => {
                // the caller must free this buffer, as with the native backend
                let len = content.first().and_then(IVal::as_i64).unwrap_or(0) as usize;
                let buf = unsafe { libc::calloc(len + 1, 1) } as *mut u8;
                if buf.is_null() {
                    return Err(Fault::UnsupportedOp("CSTRING_INIT allocation failed"));
                }
                for i in 0..len {
                    let byte = match content.get(i + 1) {
                        Some(IVal::UInt8(b)) => *b,
                        _ => 0,
                    };
                    unsafe {
                        buf.add(i).write(byte);
                    }
                }
                self.stack.push(IVal::cpointer(buf as usize));
            }
            IVal::Tuple(fields) => {
                // a CPointer to NUL-terminated host data: duplicate it
                let src = cpointer_addr(fields)?;
                let len = unsafe {
                    ((src - std::mem::size_of::<i64>()) as *const i64).read_unaligned()
                } as usize;
                let buf = unsafe { libc::calloc(len + 1, 1) } as *mut u8;
                if buf.is_null() {
                    return Err(Fault::UnsupportedOp("CSTRING_INIT allocation failed"));
                }
                unsafe {
                    std::ptr::copy(src as *const u8, buf, len);
                    buf.add(len).write(0);
                }
                self.stack.push(IVal::cpointer(buf as usize));
            }
            other => {
                return Err(Fault::StackType { expected: "Array", found: other.kind_name() })
            }
        }
        Ok(())
    }

    fn intr_cpointer_read(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let ty_kind = self.type_kind_at(op_pc + 2)?;
        let tuple = self.pop_tuple()?;
        let addr = cpointer_addr(&tuple)?;
        macro_rules! read {
            ($ty:ty, $wrap:expr) => {
                $wrap(unsafe { (addr as *const $ty).read_unaligned() })
            };
        }
        let val = match ty_kind {
            TypeKind::Bool => IVal::Bool(unsafe { (addr as *const u8).read_unaligned() } != 0),
            TypeKind::Int8 => read!(i8, IVal::Int8),
            TypeKind::Int16 => read!(i16, IVal::Int16),
            TypeKind::Int32 => read!(i32, IVal::Int32),
            TypeKind::Int64 => read!(i64, IVal::Int64),
            TypeKind::IntNat => read!(isize, IVal::IntNat),
            TypeKind::UInt8 => read!(u8, IVal::UInt8),
            TypeKind::UInt16 => read!(u16, IVal::UInt16),
            TypeKind::UInt32 => read!(u32, IVal::UInt32),
            TypeKind::UInt64 => read!(u64, IVal::UInt64),
            TypeKind::UIntNat => read!(usize, IVal::UIntNat),
            TypeKind::Rune => read!(u32, IVal::Rune),
            TypeKind::Float16 | TypeKind::Float32 => read!(f32, IVal::Float32),
            TypeKind::Float64 => read!(f64, IVal::Float64),
            TypeKind::CPointer | TypeKind::CString => {
                IVal::cpointer(unsafe { (addr as *const usize).read_unaligned() })
            }
            _ => {
                return Err(Fault::BadImmediate {
                    what: "CPOINTER_READ type",
                    value: ty_kind as u32,
                })
            }
        };
        self.stack.push(val);
        Ok(())
    }

    fn intr_cpointer_write(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let ty_kind = self.type_kind_at(op_pc + 2)?;
        let value = self.pop_val()?;
        let tuple = self.pop_tuple()?;
        let addr = cpointer_addr(&tuple)?;
        macro_rules! write_prim {
            ($variant:ident, $ty:ty) => {
                match &value {
                    IVal::$variant(v) => unsafe { (addr as *mut $ty).write_unaligned(*v) },
                    other => {
                        return Err(Fault::StackType {
                            expected: stringify!($variant),
                            found: other.kind_name(),
                        })
                    }
                }
            };
        }
        match ty_kind {
            TypeKind::Bool => match &value {
                IVal::Bool(v) => unsafe { (addr as *mut u8).write_unaligned(*v as u8) },
                other => {
                    return Err(Fault::StackType {
                        expected: "Bool",
                        found: other.kind_name(),
                    })
                }
            },
            TypeKind::Int8 => write_prim!(Int8, i8),
            TypeKind::Int16 => write_prim!(Int16, i16),
            TypeKind::Int32 => write_prim!(Int32, i32),
            TypeKind::Int64 => write_prim!(Int64, i64),
            TypeKind::IntNat => write_prim!(IntNat, isize),
            TypeKind::UInt8 => write_prim!(UInt8, u8),
            TypeKind::UInt16 => write_prim!(UInt16, u16),
            TypeKind::UInt32 => write_prim!(UInt32, u32),
            TypeKind::UInt64 => write_prim!(UInt64, u64),
            TypeKind::UIntNat => write_prim!(UIntNat, usize),
            TypeKind::Rune => write_prim!(Rune, u32),
            TypeKind::Float16 | TypeKind::Float32 => write_prim!(Float32, f32),
            TypeKind::Float64 => write_prim!(Float64, f64),
            TypeKind::CPointer | TypeKind::CString => match &value {
                IVal::Tuple(fields) => {
                    let v = cpointer_addr(fields)?;
                    unsafe { (addr as *mut usize).write_unaligned(v) }
                }
                other => {
                    return Err(Fault::StackType {
                        expected: "CPointer",
                        found: other.kind_name(),
                    })
                }
            },
            _ => {
                return Err(Fault::BadImmediate {
                    what: "CPOINTER_WRITE type",
                    value: ty_kind as u32,
                })
            }
        }
        self.stack.push(IVal::Unit);
        Ok(())
    }

    // ===== Arrays and slices =====

    fn intr_varray_set(&mut self, op_pc: Pc) -> Result<bool, Fault> {
        let index = self.pop_i64()?;
        let value = self.pop_val()?;
        let ptr = self.pop_pointer()?;
        let size = array_size(unsafe { ptr.get() })?;
        if index < 0 || index > size {
            self.raise_index_out_of_bounds(op_pc);
            return Ok(true);
        }
        if let IVal::Array(content) = unsafe { ptr.get_mut() } {
            content[index as usize] = value;
        }
        self.stack.push(IVal::Unit);
        Ok(false)
    }

    fn intr_array_get(&mut self, op_pc: Pc, index_check: bool) -> Result<bool, Fault> {
        let index = self.pop_i64()?;
        let ptr = self.pop_pointer()?;
        self.array_get_at(op_pc, index_check, ptr, index)
    }

    fn array_get_at(
        &mut self,
        op_pc: Pc,
        index_check: bool,
        ptr: ValueRef,
        index: i64,
    ) -> Result<bool, Fault> {
        if index_check && (index < 0 || index >= array_size(unsafe { ptr.get() })?) {
            self.raise_index_out_of_bounds(op_pc);
            return Ok(true);
        }
        if let IVal::Array(content) = unsafe { ptr.get() } {
            let element = content[index as usize + 1].clone();
            self.stack.push(element);
        }
        Ok(false)
    }

    fn intr_array_set(&mut self, op_pc: Pc, index_check: bool) -> Result<bool, Fault> {
        let value = self.pop_val()?;
        let index = self.pop_i64()?;
        let ptr = self.pop_pointer()?;
        self.array_set_at(op_pc, index_check, ptr, index, value)
    }

    fn array_set_at(
        &mut self,
        op_pc: Pc,
        index_check: bool,
        ptr: ValueRef,
        index: i64,
        value: IVal,
    ) -> Result<bool, Fault> {
        if index_check && (index < 0 || index >= array_size(unsafe { ptr.get() })?) {
            self.raise_index_out_of_bounds(op_pc);
            return Ok(true);
        }
        if let IVal::Array(content) = unsafe { ptr.get_mut() } {
            content[index as usize + 1] = value;
        }
        self.stack.push(IVal::Unit);
        Ok(false)
    }

    fn intr_array_clone(&mut self) -> Result<(), Fault> {
        let ptr = self.pop_pointer()?;
        if let IVal::Array(content) = unsafe { ptr.get() } {
            let cloned = IVal::Array(content.clone());
            let new_ptr = self.arena.allocate(cloned);
            self.stack.push(IVal::Pointer(new_ptr));
        }
        Ok(())
    }

    fn intr_array_init(&mut self) -> Result<(), Fault> {
        let len = self.pop_i64()?;
        let elem = self.pop_val()?;
        let ptr = self.pop_pointer()?;
        if let IVal::Array(content) = unsafe { ptr.get_mut() } {
            for i in 1..=len.max(0) as usize {
                content[i] = elem.clone();
            }
        }
        Ok(())
    }

    fn intr_array_copy_to(&mut self) -> Result<(), Fault> {
        let copy_len = self.pop_i64()?.max(0) as usize;
        let dst_start = self.pop_i64()?.max(0) as usize;
        let src_start = self.pop_i64()?.max(0) as usize;
        let dst = self.pop_pointer()?;
        let src = self.pop_pointer()?;
        // direction is chosen by the start offsets so overlapping copies
        // within one array stay safe
        if src == dst {
            if let IVal::Array(content) = unsafe { dst.get_mut() } {
                if dst_start > src_start {
                    for i in (0..copy_len).rev() {
                        content[dst_start + 1 + i] = content[src_start + 1 + i].clone();
                    }
                } else {
                    for i in 0..copy_len {
                        content[dst_start + 1 + i] = content[src_start + 1 + i].clone();
                    }
                }
            }
        } else if let (IVal::Array(src_content), IVal::Array(dst_content)) =
            (unsafe { src.get() }, unsafe { dst.get_mut() })
        {
            for i in 0..copy_len {
                dst_content[dst_start + 1 + i] = src_content[src_start + 1 + i].clone();
            }
        }
        self.stack.push(IVal::Unit);
        Ok(())
    }

    fn intr_array_slice_init(&mut self) -> Result<(), Fault> {
        let len = self.pop_i64()?;
        let start = self.pop_i64()?;
        let raw = self.pop_val()?;
        let struct_ptr = self.pop_pointer()?;
        match unsafe { struct_ptr.get_mut() } {
            IVal::Tuple(fields) => {
                *fields = vec![raw, IVal::Int64(start), IVal::Int64(len)];
            }
            other => {
                return Err(Fault::StackType { expected: "Tuple", found: other.kind_name() })
            }
        }
        self.stack.push(IVal::Unit);
        Ok(())
    }

    fn intr_array_slice(&mut self) -> Result<(), Fault> {
        let len = self.pop_i64()?;
        let start = self.pop_i64()?;
        let mut slice = self.pop_tuple()?;
        let base = slice.get(1).and_then(IVal::as_i64).ok_or(Fault::StackType {
            expected: "Int64",
            found: "Tuple",
        })?;
        // slice() in the standard library has already checked the add
        let new_start = base.wrapping_add(start);
        let raw = slice.swap_remove(0);
        self.stack
            .push(IVal::Tuple(vec![raw, IVal::Int64(new_start), IVal::Int64(len)]));
        Ok(())
    }

    /// Resolve the absolute index of a slice access under the declared
    /// overflow strategy; `Err(true)` means the overflow exception was
    /// raised
    fn slice_index(
        &mut self,
        op_pc: Pc,
        slice: &[IVal],
        index: i64,
        strat: OverflowStrategy,
    ) -> Result<i64, bool> {
        let start = slice.get(1).and_then(IVal::as_i64).unwrap_or(0);
        match start.checked_add(index) {
            Some(res) => Ok(res),
            None => {
                if strat == OverflowStrategy::Throwing {
                    self.raise_overflow_exception(op_pc);
                    Err(true)
                } else {
                    Ok(start.wrapping_add(index))
                }
            }
        }
    }

    fn intr_array_slice_get(&mut self, op_pc: Pc, index_check: bool) -> Result<bool, Fault> {
        let strat_word = self.bchir.get(op_pc + 3);
        let strat = OverflowStrategy::from_u32(strat_word)
            .ok_or(Fault::BadImmediate { what: "overflow strategy", value: strat_word })?;
        let index = self.pop_i64()?;
        let slice = self.pop_tuple()?;
        let abs = match self.slice_index(op_pc, &slice, index, strat) {
            Ok(abs) => abs,
            Err(raised) => return Ok(raised),
        };
        let ptr = slice.first().and_then(IVal::as_pointer).ok_or(Fault::StackType {
            expected: "Pointer",
            found: "Tuple",
        })?;
        self.array_get_at(op_pc, index_check, ptr, abs)
    }

    fn intr_array_slice_set(&mut self, op_pc: Pc, index_check: bool) -> Result<bool, Fault> {
        let strat_word = self.bchir.get(op_pc + 3);
        let strat = OverflowStrategy::from_u32(strat_word)
            .ok_or(Fault::BadImmediate { what: "overflow strategy", value: strat_word })?;
        let value = self.pop_val()?;
        let index = self.pop_i64()?;
        let slice = self.pop_tuple()?;
        let abs = match self.slice_index(op_pc, &slice, index, strat) {
            Ok(abs) => abs,
            Err(raised) => return Ok(raised),
        };
        let ptr = slice.first().and_then(IVal::as_pointer).ok_or(Fault::StackType {
            expected: "Pointer",
            found: "Tuple",
        })?;
        self.array_set_at(op_pc, index_check, ptr, abs, value)
    }

    fn intr_ref_eq(&mut self) -> Result<(), Fault> {
        let a = self.pop_val()?;
        let b = self.pop_val()?;
        let eq = match (&a, &b) {
            (IVal::Nullptr, IVal::Nullptr) => true,
            (IVal::Nullptr, _) | (_, IVal::Nullptr) => false,
            (IVal::Pointer(pa), IVal::Pointer(pb)) => pa == pb,
            _ => {
                return Err(Fault::StackType {
                    expected: "Pointer or Nullptr",
                    found: a.kind_name(),
                })
            }
        };
        self.stack.push(IVal::Bool(eq));
        Ok(())
    }

    // ===== Atomics (plain accesses; single-threaded VM) =====

    fn atomic_cell(&mut self) -> Result<ValueRef, Fault> {
        let ptr = self.pop_pointer()?;
        match unsafe { ptr.get_mut() } {
            IVal::Object { fields, .. } => Ok(ValueRef::new(&mut fields[0])),
            other => Err(Fault::StackType { expected: "Object", found: other.kind_name() }),
        }
    }

    fn intr_atomic_load(&mut self) -> Result<(), Fault> {
        self.pop_val()?; // memory order
        let cell = self.atomic_cell()?;
        let val = unsafe { cell.get() }.clone();
        self.stack.push(val);
        Ok(())
    }

    fn intr_atomic_store(&mut self) -> Result<(), Fault> {
        self.pop_val()?; // memory order
        let val = self.pop_val()?;
        let cell = self.atomic_cell()?;
        unsafe {
            *cell.get_mut() = val;
        }
        self.stack.push(IVal::Unit);
        Ok(())
    }

    fn intr_atomic_swap(&mut self) -> Result<(), Fault> {
        self.pop_val()?; // memory order
        let val = self.pop_val()?;
        let cell = self.atomic_cell()?;
        let old = std::mem::replace(unsafe { cell.get_mut() }, val);
        self.stack.push(old);
        Ok(())
    }

    fn intr_atomic_cas(&mut self) -> Result<(), Fault> {
        self.pop_val()?; // success memory order
        self.pop_val()?; // failure memory order
        let new = self.pop_val()?;
        let old = self.pop_val()?;
        let cell = self.atomic_cell()?;
        let cur = unsafe { cell.get_mut() };
        if atomic_equal(cur, &old) {
            *cur = new;
            self.stack.push(IVal::Bool(true));
        } else {
            self.stack.push(IVal::Bool(false));
        }
        Ok(())
    }

    fn intr_atomic_fetch(
        &mut self,
        f: impl Fn(&IVal, &IVal) -> Option<IVal>,
    ) -> Result<(), Fault> {
        self.pop_val()?; // memory order
        let val = self.pop_val()?;
        let cell = self.atomic_cell()?;
        let cur = unsafe { cell.get_mut() };
        let new = f(cur, &val).ok_or(Fault::StackType {
            expected: "matching integer",
            found: val.kind_name(),
        })?;
        let old = std::mem::replace(cur, new);
        self.stack.push(old);
        Ok(())
    }

    // ===== Backtrace =====

    /// Flatten the call frames of the control stack into PC records:
    /// (call-site pc, entry of the containing function, reserved word)
    fn copy_control_stack(&self, out: &mut Vec<IVal>) {
        let ctrl = self.stack.ctrl_stack();
        for i in (1..ctrl.len()).rev() {
            if ctrl[i].op_code.is_call() {
                out.push(IVal::UInt64(ctrl[i].return_pc as u64));
                out.push(IVal::UInt64(ctrl[i - 1].callee_pc as u64));
                out.push(IVal::UInt64(0));
            }
        }
        out[0] = IVal::Int64(out.len() as i64 - 1);
    }

    fn intr_fill_in_stack_trace(&mut self) -> Result<(), Fault> {
        self.pop_val()?;
        self.pop_val()?;
        let mut content = vec![IVal::Unit];
        self.copy_control_stack(&mut content);
        let ptr = self.arena.allocate(IVal::Array(content));
        self.stack.push(IVal::Pointer(ptr));
        Ok(())
    }

    fn intr_fill_in_stack_trace_exception(&mut self) -> Result<(), Fault> {
        let exn = self.pop_pointer()?;
        let trace_tuple = match unsafe { exn.get_mut() } {
            IVal::Object { fields, .. } => match fields.get_mut(1) {
                Some(IVal::Tuple(t)) => t,
                _ => return Err(Fault::StackType { expected: "Tuple", found: "Object" }),
            },
            other => {
                return Err(Fault::StackType { expected: "Object", found: other.kind_name() })
            }
        };
        let pc_arr = trace_tuple.first().and_then(IVal::as_pointer).ok_or(
            Fault::StackType { expected: "Pointer", found: "Tuple" },
        )?;
        let len = {
            let content = match unsafe { pc_arr.get_mut() } {
                IVal::Array(content) => content,
                other => {
                    return Err(Fault::StackType {
                        expected: "Array",
                        found: other.kind_name(),
                    })
                }
            };
            content.clear();
            content.push(IVal::Unit);
            self.copy_control_stack(content);
            content.len() as i64 - 1
        };
        trace_tuple[1] = IVal::Int64(len);
        self.stack.push(IVal::Unit);
        Ok(())
    }

    fn intr_decode_stack_trace(&mut self) -> Result<(), Fault> {
        let _func_desc = self.pop_val()?;
        let func_start = self.pop_val()?.as_u64().unwrap_or(0);
        let frame_pc = self.pop_val()?.as_u64().unwrap_or(0);
        let (mangled, file, line) =
            self.pc_func_to_strings(frame_pc as Pc, func_start as Pc);
        let (class_str, method_str) = crate::printer::demangle_name(&mangled);
        let class_ptr = self.arena.allocate(IVal::string_to_array(&class_str));
        let method_ptr = self.arena.allocate(IVal::string_to_array(&method_str));
        let file_ptr = self.arena.allocate(IVal::string_to_array(&file));
        self.stack.push(IVal::Tuple(vec![
            IVal::Pointer(class_ptr),
            IVal::Pointer(method_ptr),
            IVal::Pointer(file_ptr),
            IVal::Int64(line as i64),
        ]));
        Ok(())
    }
}

/// Equality used by compare-and-swap: pointers by address, option
/// references by tag and payload address, primitives by value
fn atomic_equal(cur: &IVal, old: &IVal) -> bool {
    match (cur, old) {
        (IVal::Tuple(a), IVal::Tuple(b)) => {
            let (ta, tb) = (a.first().and_then(IVal::as_bool), b.first().and_then(IVal::as_bool));
            if ta != tb {
                return false;
            }
            // tag false means Some(reference): compare the payload pointers
            if ta == Some(false) {
                return a.get(1).and_then(IVal::as_pointer)
                    == b.get(1).and_then(IVal::as_pointer);
            }
            true
        }
        _ => cur == old,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heap_size() {
        assert_eq!(parse_heap_size("16kb"), Some(16 * KB));
        assert_eq!(parse_heap_size("2MB"), Some(2 * MB));
        assert_eq!(parse_heap_size(" 1 Gb "), Some(GB));
        assert_eq!(parse_heap_size("0mb"), None);
        assert_eq!(parse_heap_size("-4kb"), None);
        assert_eq!(parse_heap_size("12"), None);
        assert_eq!(parse_heap_size("12tb"), None);
        assert_eq!(parse_heap_size(""), None);
    }

    #[test]
    fn test_ffi_sizes() {
        assert_eq!(ffi_size_of(TypeKind::UInt8), 1);
        assert_eq!(ffi_size_of(TypeKind::Float16), 2);
        assert_eq!(ffi_size_of(TypeKind::Rune), 4);
        assert_eq!(ffi_size_of(TypeKind::Int64), 8);
        assert_eq!(ffi_size_of(TypeKind::CPointer), std::mem::size_of::<usize>());
        assert_eq!(ffi_align_of(TypeKind::Unit), 1);
    }

    #[test]
    fn test_array_size_of_raw_array() {
        let arr = IVal::string_to_array("abc");
        assert_eq!(array_size(&arr).unwrap(), 3);
    }

    #[test]
    fn test_atomic_equal_primitives() {
        assert!(atomic_equal(&IVal::Int32(3), &IVal::Int32(3)));
        assert!(!atomic_equal(&IVal::Int32(3), &IVal::Int32(4)));
    }

    #[test]
    fn test_atomic_equal_option_reference() {
        // None == None regardless of payload
        let none_a = IVal::Tuple(vec![IVal::Bool(true)]);
        let none_b = IVal::Tuple(vec![IVal::Bool(true)]);
        assert!(atomic_equal(&none_a, &none_b));

        let mut slot_a = IVal::Int64(0);
        let mut slot_b = IVal::Int64(0);
        let some_a =
            IVal::Tuple(vec![IVal::Bool(false), IVal::Pointer(ValueRef::new(&mut slot_a))]);
        let some_a2 =
            IVal::Tuple(vec![IVal::Bool(false), IVal::Pointer(ValueRef::new(&mut slot_a))]);
        let some_b =
            IVal::Tuple(vec![IVal::Bool(false), IVal::Pointer(ValueRef::new(&mut slot_b))]);
        assert!(atomic_equal(&some_a, &some_a2));
        assert!(!atomic_equal(&some_a, &some_b));
        assert!(!atomic_equal(&none_a, &some_a));
    }
}
