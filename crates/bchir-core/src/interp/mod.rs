//! BCHIR interpreter
//!
//! A fetch-decode-dispatch loop over the linked program buffer. The
//! interpreted program's recursion lives on the explicit control stack;
//! exceptions unwind it to the nearest `_EXC`-flagged frame. Runtime
//! helpers (the throw functions, `checkIsError`, the print-stack-trace
//! pair) are invoked by writing a short `APPLY`/`EXIT` snippet into the
//! internal playground region of the code buffer and re-entering the loop.

mod arith;
mod cast;
mod intrinsic;

use std::fs;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use thiserror::Error;

use bchir_bytecode::{
    Bchir, ClassId, DefaultFunctionKind, GlobalId, MethodId, OpCode, Pc, TypeKind, Word,
};

use crate::arena::Arena;
use crate::diag::{DiagKind, DiagSink, Diagnostic, Position, SourceManager};
use crate::env::Env;
use crate::printer;
use crate::stack::{ControlState, InterpreterStack};
use crate::value::{IResult, IVal, ValueRef};

/// Words reserved for the interpreter's own helper-call snippets
pub const INTERNAL_PLAYGROUND_SIZE: usize = 20;
/// Words reserved for snippets written by the embedding driver
pub const EXTERNAL_PLAYGROUND_SIZE: usize = 20;

/// Options relevant to the interpreter, surfaced by the outer driver
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Write a per-PC trace file while interpreting
    pub print_bchir_interpreter: bool,
    /// Directory the trace file is created under
    pub output_dir: PathBuf,
}

/// Interpreter-level fatal conditions
///
/// These are not Cangjie exceptions: they indicate malformed bytecode, an
/// unsupported operation, or a broken image, and turn into a compile-time
/// diagnostic plus an `Exception(Invalid)` result.
#[derive(Debug, Error)]
pub(crate) enum Fault {
    #[error("argument stack underflow")]
    StackUnderflow,
    #[error("expected {expected} on the argument stack, found {found}")]
    StackType { expected: &'static str, found: &'static str },
    #[error("program counter {0} outside the code buffer")]
    PcOutOfBounds(Pc),
    #[error("invalid opcode word {0:#x}")]
    UnknownOpcode(Word),
    #[error("invalid {what} immediate {value}")]
    BadImmediate { what: &'static str, value: Word },
    #[error("operation {0} not currently supported in const eval")]
    ConstEvalUnsupported(&'static str),
    #[error("interpreter does not support operation {0}")]
    UnsupportedOp(&'static str),
    #[error("interpreter does not support intrinsic function {0}")]
    UnknownIntrinsic(Word),
    #[error("no class with id {0} in the linked image")]
    MissingClass(ClassId),
    #[error("class {class} has no method {method} in its vtable")]
    MissingMethod {
        class: ClassId,
        method: MethodId,
    },
    #[error("no exception pending for GET_EXCEPTION")]
    NoPendingException,
    #[error("helper call does not fit the playground")]
    PlaygroundOverflow,
}

/// What the dispatch loop should do after one instruction
enum Flow {
    Continue,
    Exit,
}

/// The BCHIR interpreter
///
/// Owns the arena, stacks and environment; borrows the linked image (for
/// the playground regions it needs write access) and the diagnostics seam.
pub struct Interpreter<'a> {
    pub(crate) bchir: &'a mut Bchir,
    diag: &'a mut dyn DiagSink,
    sm: &'a mut SourceManager,
    pub(crate) stack: InterpreterStack,
    pub(crate) env: Env,
    pub(crate) arena: Arena,
    pub(crate) interpreter_error: bool,
    pub(crate) pc: Pc,
    base_index: Pc,
    playground_base: Pc,
    playground_idx: Pc,
    external_playground_idx: Pc,
    pub(crate) raise_to_top: bool,
    exception: Option<ValueRef>,
    pub(crate) const_eval: bool,
    result: IResult,
    finalizers_run: bool,
    trace: Option<BufWriter<fs::File>>,
    /// The program's main argument strings, kept for runtime queries
    pub main_args: Vec<String>,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter over a linked image
    ///
    /// `playground_base` and `external_playground_base` are the two
    /// reserved code regions the linker set aside; `const_eval` switches
    /// top-level exceptions from stack-trace printing to diagnostics.
    pub fn new(
        bchir: &'a mut Bchir,
        diag: &'a mut dyn DiagSink,
        sm: &'a mut SourceManager,
        playground_base: Pc,
        external_playground_base: Pc,
        const_eval: bool,
    ) -> Self {
        let num_globals = bchir.num_global_vars();
        Self {
            bchir,
            diag,
            sm,
            stack: InterpreterStack::new(),
            env: Env::new(num_globals),
            arena: Arena::new(),
            interpreter_error: false,
            pc: 0,
            base_index: 0,
            playground_base,
            playground_idx: playground_base,
            external_playground_idx: external_playground_base,
            raise_to_top: false,
            exception: None,
            const_eval,
            result: IResult::NotRun,
            finalizers_run: false,
            trace: None,
            main_args: Vec::new(),
        }
    }

    /// The image being interpreted
    pub fn bchir(&self) -> &Bchir {
        self.bchir
    }

    // ===== Entry points =====

    /// Run the interpreter from `base_idx`
    ///
    /// With `expects_return` the single value left on the argument stack is
    /// returned as `Success`; without it the run is for effect only.
    pub fn run(&mut self, base_idx: Pc, expects_return: bool) -> IResult {
        self.base_index = base_idx;
        self.pc = base_idx;
        self.playground_idx = self.playground_base;
        self.raise_to_top = false;
        self.interpret();
        if self.interpreter_error {
            self.result = IResult::Exception(IVal::Invalid);
        } else if self.raise_to_top {
            self.raise_to_top = false;
            let ptr = self.stack.pop().unwrap_or(IVal::Invalid);
            let is_error = self.check_is_error(ptr.clone()).unwrap_or(false);
            if !self.const_eval {
                if is_error {
                    self.call_print_stack_trace_error(ptr.clone());
                } else {
                    self.call_print_stack_trace(ptr.clone());
                }
            }
            self.raise_to_top = true;
            self.stack.ctrl_clear();
            self.stack.args_clear();
            self.result = IResult::Exception(ptr);
        } else if !expects_return {
            self.result = IResult::NotRun;
        } else {
            let val = self.stack.pop().unwrap_or(IVal::Invalid);
            self.result = IResult::Success(val);
        }
        self.result.clone()
    }

    /// Call a function through the external playground and return its result
    pub fn run_call(&mut self, callee_pc: Pc, args: Vec<IVal>) -> IResult {
        let nargs = args.len();
        self.stack.push(IVal::Func(callee_pc));
        for arg in args {
            self.stack.push(arg);
        }
        let idx = self.external_playground_idx;
        self.bchir.set_op(idx, OpCode::Apply);
        self.bchir.set(idx + 1, nargs as Word);
        self.bchir.set_op(idx + 2, OpCode::Exit);
        self.run(idx, true)
    }

    /// Push a value onto the argument stack; used by the driver to marshal
    /// arguments between evaluation invocations
    pub fn push_arg(&mut self, val: IVal) {
        self.stack.push(val);
    }

    /// Move a value to the arena and return a pointer to it
    pub fn to_arena(&mut self, val: IVal) -> ValueRef {
        self.allocate_value(val)
    }

    /// The current value of a global slot; `Invalid` before initialisation
    pub fn peek_global(&self, id: GlobalId) -> &IVal {
        self.env.global(id)
    }

    /// Install linker-computed const-eval values into the global environment
    pub fn set_global_vars(&mut self, inits: FxHashMap<GlobalId, IVal>) {
        for (id, val) in inits {
            self.env.set_global(id, val);
        }
    }

    /// The result of the previous run, `NotRun` before the first
    pub fn last_result(&self) -> &IResult {
        &self.result
    }

    /// Run every queued finaliser, in allocation order
    ///
    /// Happens automatically on drop; calling it earlier is idempotent.
    pub fn execute_finalizers(&mut self) {
        if self.finalizers_run {
            return;
        }
        self.finalizers_run = true;
        let saved_raise = self.raise_to_top;
        let objects = std::mem::take(&mut self.arena.finalizing_objects);
        for ptr in objects {
            let class_id = match unsafe { ptr.get() } {
                IVal::Object { class_id, .. } => *class_id,
                _ => continue,
            };
            let finalizer = self.bchir.class_finalizer(class_id);
            if finalizer == 0 {
                continue;
            }
            self.raise_to_top = false;
            let _ = self.call_function(finalizer, vec![IVal::Pointer(ptr)]);
            self.stack.args_clear();
            self.stack.ctrl_clear();
        }
        self.raise_to_top = saved_raise;
    }

    /// Open the per-PC trace file when `print-bchir=interpreter` is set
    pub fn prepare_runtime_debug(&mut self, options: &GlobalOptions) {
        self.trace = None;
        if options.print_bchir_interpreter {
            let stage = if self.const_eval { "ce-interpreted" } else { "interpreted" };
            if let Ok(file) =
                printer::bchir_output_file(options, &self.bchir.package_name, stage)
            {
                self.trace = Some(BufWriter::new(file));
            }
        }
    }

    // ===== Dispatch loop =====

    fn interpret(&mut self) {
        while !self.interpreter_error {
            let op_pc = self.pc;
            let flow = self.fetch_and_step(op_pc);
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return,
                Err(fault) => {
                    self.fail_with(op_pc, fault);
                    return;
                }
            }
            if self.raise_to_top {
                return;
            }
        }
    }

    fn fetch_and_step(&mut self, op_pc: Pc) -> Result<Flow, Fault> {
        if op_pc as usize >= self.bchir.linked().size() {
            return Err(Fault::PcOutOfBounds(op_pc));
        }
        let word = self.bchir.get(op_pc);
        let op = OpCode::from_u32(word).ok_or(Fault::UnknownOpcode(word))?;
        self.trace_pc(op_pc, op);
        self.step(op, op_pc)
    }

    fn step(&mut self, op: OpCode, op_pc: Pc) -> Result<Flow, Fault> {
        match op {
            // ===== Literals =====
            OpCode::Uint8 => {
                self.stack.push(IVal::UInt8(self.bchir.get(op_pc + 1) as u8));
                self.pc = op_pc + 2;
            }
            OpCode::Uint16 => {
                self.stack.push(IVal::UInt16(self.bchir.get(op_pc + 1) as u16));
                self.pc = op_pc + 2;
            }
            OpCode::Uint32 => {
                self.stack.push(IVal::UInt32(self.bchir.get(op_pc + 1)));
                self.pc = op_pc + 2;
            }
            OpCode::Uint64 => {
                self.stack.push(IVal::UInt64(self.bchir.get_u64(op_pc + 1)));
                self.pc = op_pc + 3;
            }
            OpCode::Uintnat => {
                self.stack.push(IVal::UIntNat(self.bchir.get_u64(op_pc + 1) as usize));
                self.pc = op_pc + 3;
            }
            OpCode::Int8 => {
                self.stack.push(IVal::Int8(self.bchir.get(op_pc + 1) as i8));
                self.pc = op_pc + 2;
            }
            OpCode::Int16 => {
                self.stack.push(IVal::Int16(self.bchir.get(op_pc + 1) as i16));
                self.pc = op_pc + 2;
            }
            OpCode::Int32 => {
                self.stack.push(IVal::Int32(self.bchir.get(op_pc + 1) as i32));
                self.pc = op_pc + 2;
            }
            OpCode::Int64 => {
                self.stack.push(IVal::Int64(self.bchir.get_u64(op_pc + 1) as i64));
                self.pc = op_pc + 3;
            }
            OpCode::Intnat => {
                self.stack.push(IVal::IntNat(self.bchir.get_u64(op_pc + 1) as i64 as isize));
                self.pc = op_pc + 3;
            }
            OpCode::Float16 => {
                self.stack.push(IVal::Float16(f32::from_bits(self.bchir.get(op_pc + 1))));
                self.pc = op_pc + 2;
            }
            OpCode::Float32 => {
                self.stack.push(IVal::Float32(f32::from_bits(self.bchir.get(op_pc + 1))));
                self.pc = op_pc + 2;
            }
            OpCode::Float64 => {
                self.stack.push(IVal::Float64(f64::from_bits(self.bchir.get_u64(op_pc + 1))));
                self.pc = op_pc + 3;
            }
            OpCode::Rune => {
                self.stack.push(IVal::Rune(self.bchir.get(op_pc + 1)));
                self.pc = op_pc + 2;
            }
            OpCode::Bool => {
                self.stack.push(IVal::Bool(self.bchir.get(op_pc + 1) != 0));
                self.pc = op_pc + 2;
            }
            OpCode::Unit => {
                self.stack.push(IVal::Unit);
                self.pc = op_pc + 1;
            }
            OpCode::Nullptr => {
                self.stack.push(IVal::Nullptr);
                self.pc = op_pc + 1;
            }
            OpCode::String => {
                self.op_string(op_pc);
                self.pc = op_pc + 2;
            }
            OpCode::Func => {
                self.stack.push(IVal::Func(self.bchir.get(op_pc + 1)));
                self.pc = op_pc + 2;
            }

            // ===== Environment =====
            OpCode::Lvar => {
                let var = self.bchir.get(op_pc + 1);
                self.pc = op_pc + 2;
                let val = self.env.local(var).clone();
                self.stack.push(val);
            }
            OpCode::LvarSet => {
                let var = self.bchir.get(op_pc + 1);
                let val = self.pop_val()?;
                self.env.set_local(var, val);
                self.pc = op_pc + 2;
            }
            OpCode::Gvar => {
                let var = self.bchir.get(op_pc + 1);
                let slot = self.env.global_ref(var);
                self.stack.push(IVal::Pointer(slot));
                self.pc = op_pc + 2;
            }
            OpCode::GvarSet => {
                let var = self.bchir.get(op_pc + 1);
                let val = self.pop_val()?;
                self.env.set_global(var, val);
                self.pc = op_pc + 2;
            }
            OpCode::Frame => {
                let num = self.bchir.get(op_pc + 1);
                self.env.allocate_locals(num as usize);
                self.pc = op_pc + 2;
            }

            // ===== Aggregates =====
            OpCode::Tuple => {
                let size = self.bchir.get(op_pc + 1) as usize;
                let fields = self.pop_vals(size)?;
                self.stack.push(IVal::Tuple(fields));
                self.pc = op_pc + 2;
            }
            OpCode::Array => {
                let size = self.bchir.get(op_pc + 1) as usize;
                let elems = self.pop_vals(size)?;
                let mut content = Vec::with_capacity(size + 1);
                content.push(IVal::Int64(size as i64));
                content.extend(elems);
                self.stack.push(IVal::Array(content));
                self.pc = op_pc + 2;
            }
            OpCode::Varray => {
                // VArrays carry no length slot; VARRAY_GET indexes directly
                let size = self.bchir.get(op_pc + 1) as usize;
                let content = self.pop_vals(size)?;
                self.stack.push(IVal::Array(content));
                self.pc = op_pc + 2;
            }
            OpCode::VarrayByValue => self.op_varray_by_value(op_pc)?,
            OpCode::VarrayGet => self.op_varray_get(op_pc)?,
            OpCode::Object => {
                let size = self.bchir.get(op_pc + 1) as usize;
                let class_id = self.bchir.get(op_pc + 2);
                let fields = self.pop_vals(size)?;
                self.stack.push(IVal::Object { class_id, fields });
                self.pc = op_pc + 3;
            }
            OpCode::Field => {
                let field = self.bchir.get(op_pc + 1) as usize;
                match self.pop_val()? {
                    IVal::Tuple(mut fields) => self.stack.push(fields.swap_remove(field)),
                    // source-level field 0 is the class node, gone by now
                    IVal::Object { mut fields, .. } => {
                        self.stack.push(fields.swap_remove(field - 1))
                    }
                    other => {
                        return Err(Fault::StackType {
                            expected: "Tuple or Object",
                            found: other.kind_name(),
                        })
                    }
                }
                self.pc = op_pc + 2;
            }
            OpCode::FieldTpl => self.op_field_tpl(op_pc)?,
            OpCode::GetRef => self.op_get_ref(op_pc)?,
            OpCode::StoreInRef => self.op_store_in_ref(op_pc)?,
            OpCode::Asg => {
                let ptr = self.pop_pointer()?;
                let val = self.pop_val()?;
                unsafe {
                    *ptr.get_mut() = val;
                }
                self.stack.push(IVal::Unit);
                self.pc = op_pc + 1;
            }
            OpCode::Store => {
                let ptr = self.pop_pointer()?;
                let val = self.pop_val()?;
                unsafe {
                    *ptr.get_mut() = val;
                }
                self.pc = op_pc + 1;
            }
            OpCode::Deref => {
                let ptr = self.pop_pointer()?;
                let val = unsafe { ptr.get() }.clone();
                self.stack.push(val);
                self.pc = op_pc + 1;
            }

            // ===== Allocation =====
            OpCode::Allocate | OpCode::AllocateExc => {
                // allocation itself never raises
                let ptr = self.allocate_value(IVal::Nullptr);
                self.stack.push(IVal::Pointer(ptr));
                self.pc = op_pc + op.width() + exc_word(op);
            }
            OpCode::AllocateStruct | OpCode::AllocateStructExc => {
                let num = self.bchir.get(op_pc + 1) as usize;
                let ptr = self.allocate_value(IVal::Tuple(vec![IVal::Nullptr; num]));
                self.stack.push(IVal::Pointer(ptr));
                self.pc = op_pc + op.width() + exc_word(op);
            }
            OpCode::AllocateClass | OpCode::AllocateClassExc => {
                let class_id = self.bchir.get(op_pc + 1);
                let num = self.bchir.get(op_pc + 2) as usize;
                let ptr = self.allocate_value(IVal::Object {
                    class_id,
                    fields: vec![IVal::Nullptr; num],
                });
                self.stack.push(IVal::Pointer(ptr));
                self.pc = op_pc + op.width() + exc_word(op);
            }
            OpCode::AllocateRawArray | OpCode::AllocateRawArrayExc => {
                self.op_allocate_raw_array(op, op_pc)?
            }
            OpCode::AllocateRawArrayLiteral | OpCode::AllocateRawArrayLiteralExc => {
                let size = self.bchir.get(op_pc + 1) as usize;
                let content = self.pop_vals(size)?;
                let ptr = self.allocate_value(IVal::Array(content));
                self.stack.push(IVal::Pointer(ptr));
                self.pc = op_pc + op.width() + exc_word(op);
            }
            OpCode::RawArrayInitByValue => self.op_raw_array_init_by_value(op_pc)?,
            OpCode::RawArrayLiteralInit => self.op_raw_array_literal_init(op_pc)?,

            // ===== Arithmetic =====
            OpCode::UnNeg
            | OpCode::UnNegExc
            | OpCode::UnInc
            | OpCode::UnDec
            | OpCode::UnNot
            | OpCode::UnBitnot
            | OpCode::BinAdd
            | OpCode::BinAddExc
            | OpCode::BinSub
            | OpCode::BinSubExc
            | OpCode::BinMul
            | OpCode::BinMulExc
            | OpCode::BinDiv
            | OpCode::BinDivExc
            | OpCode::BinMod
            | OpCode::BinModExc
            | OpCode::BinExp
            | OpCode::BinExpExc
            | OpCode::BinLt
            | OpCode::BinGt
            | OpCode::BinLe
            | OpCode::BinGe
            | OpCode::BinEqual
            | OpCode::BinNoteq
            | OpCode::BinBitand
            | OpCode::BinBitor
            | OpCode::BinBitxor
            | OpCode::BinLshift
            | OpCode::BinLshiftExc
            | OpCode::BinRshift
            | OpCode::BinRshiftExc => self.op_bin(op, op_pc)?,

            // ===== Control flow =====
            OpCode::Jump => {
                self.pc = self.bchir.get(op_pc + 1);
            }
            OpCode::Branch => {
                let cond = self.pop_bool()?;
                self.pc = if cond {
                    self.bchir.get(op_pc + 1)
                } else {
                    self.bchir.get(op_pc + 2)
                };
            }
            OpCode::Switch => self.op_switch(op_pc)?,
            OpCode::Return => self.op_return()?,
            OpCode::Exit => return Ok(Flow::Exit),
            OpCode::Drop => {
                self.pop_val()?;
                self.pc = op_pc + 1;
            }

            // ===== Calls =====
            OpCode::Apply | OpCode::ApplyExc => self.op_apply(op, op_pc)?,
            OpCode::Invoke | OpCode::InvokeExc => self.op_invoke(op, op_pc)?,

            // ===== Casts & types =====
            OpCode::Typecast | OpCode::TypecastExc => self.op_typecast(op, op_pc)?,
            OpCode::Instanceof => {
                let ptr = self.pop_pointer()?;
                let lhs = match unsafe { ptr.get() } {
                    IVal::Object { class_id, .. } => *class_id,
                    other => {
                        return Err(Fault::StackType {
                            expected: "Object",
                            found: other.kind_name(),
                        })
                    }
                };
                let rhs = self.bchir.get(op_pc + 1);
                let result = self.is_subclass(lhs, rhs)?;
                self.stack.push(IVal::Bool(result));
                self.pc = op_pc + 2;
            }
            OpCode::Box => {
                let class_id = self.bchir.get(op_pc + 1);
                let val = self.pop_val()?;
                let ptr = self.allocate_value(IVal::Object { class_id, fields: vec![val] });
                self.stack.push(IVal::Pointer(ptr));
                self.pc = op_pc + 2;
            }
            OpCode::Unbox => {
                let ptr = self.pop_pointer()?;
                let val = match unsafe { ptr.get() } {
                    IVal::Object { fields, .. } => fields[0].clone(),
                    other => {
                        return Err(Fault::StackType {
                            expected: "Object",
                            found: other.kind_name(),
                        })
                    }
                };
                self.stack.push(val);
                self.pc = op_pc + 1;
            }
            OpCode::UnboxRef => {
                let ptr = self.pop_pointer()?;
                let slot = match unsafe { ptr.get_mut() } {
                    IVal::Object { fields, .. } => ValueRef::new(&mut fields[0]),
                    other => {
                        return Err(Fault::StackType {
                            expected: "Object",
                            found: other.kind_name(),
                        })
                    }
                };
                self.stack.push(IVal::Pointer(slot));
                self.pc = op_pc + 1;
            }

            // ===== Exceptions =====
            OpCode::Raise | OpCode::RaiseExc => self.op_raise(op, op_pc)?,
            OpCode::GetException => {
                let exn = self.exception.take().ok_or(Fault::NoPendingException)?;
                self.stack.push(IVal::Pointer(exn));
                self.pc = op_pc + 1;
            }

            // ===== Intrinsics =====
            OpCode::Intrinsic0
            | OpCode::Intrinsic1
            | OpCode::Intrinsic2
            | OpCode::Intrinsic0Exc
            | OpCode::Intrinsic1Exc
            | OpCode::Intrinsic2Exc => self.op_intrinsic(op, op_pc)?,

            // ===== Miscellaneous =====
            OpCode::Capply | OpCode::CapplyExc | OpCode::Syscall | OpCode::Abort => {
                return Err(Fault::ConstEvalUnsupported(op.name()));
            }
            OpCode::Spawn | OpCode::SpawnExc | OpCode::NotSupported | OpCode::Invalid => {
                return Err(Fault::UnsupportedOp(op.name()));
            }
        }
        Ok(Flow::Continue)
    }

    // ===== Stack helpers =====

    pub(crate) fn pop_val(&mut self) -> Result<IVal, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    pub(crate) fn pop_vals(&mut self, n: usize) -> Result<Vec<IVal>, Fault> {
        self.stack.pop_n(n).ok_or(Fault::StackUnderflow)
    }

    pub(crate) fn pop_bool(&mut self) -> Result<bool, Fault> {
        match self.pop_val()? {
            IVal::Bool(b) => Ok(b),
            other => Err(Fault::StackType { expected: "Bool", found: other.kind_name() }),
        }
    }

    pub(crate) fn pop_i64(&mut self) -> Result<i64, Fault> {
        match self.pop_val()? {
            IVal::Int64(v) => Ok(v),
            other => Err(Fault::StackType { expected: "Int64", found: other.kind_name() }),
        }
    }

    pub(crate) fn pop_usize(&mut self) -> Result<usize, Fault> {
        match self.pop_val()? {
            IVal::UIntNat(v) => Ok(v),
            other => Err(Fault::StackType { expected: "UIntNat", found: other.kind_name() }),
        }
    }

    pub(crate) fn pop_rune(&mut self) -> Result<u32, Fault> {
        match self.pop_val()? {
            IVal::Rune(v) => Ok(v),
            other => Err(Fault::StackType { expected: "Rune", found: other.kind_name() }),
        }
    }

    pub(crate) fn pop_pointer(&mut self) -> Result<ValueRef, Fault> {
        match self.pop_val()? {
            IVal::Pointer(p) => Ok(p),
            other => Err(Fault::StackType { expected: "Pointer", found: other.kind_name() }),
        }
    }

    pub(crate) fn pop_tuple(&mut self) -> Result<Vec<IVal>, Fault> {
        match self.pop_val()? {
            IVal::Tuple(fields) => Ok(fields),
            other => Err(Fault::StackType { expected: "Tuple", found: other.kind_name() }),
        }
    }

    pub(crate) fn pop_array(&mut self) -> Result<Vec<IVal>, Fault> {
        match self.pop_val()? {
            IVal::Array(content) => Ok(content),
            other => Err(Fault::StackType { expected: "Array", found: other.kind_name() }),
        }
    }

    // ===== Allocation =====

    /// Move a value into the arena; objects of finalised classes join the
    /// finaliser queue
    pub(crate) fn allocate_value(&mut self, value: IVal) -> ValueRef {
        let finalized = match &value {
            IVal::Object { class_id, .. } => self.bchir.class_finalizer(*class_id) != 0,
            _ => false,
        };
        let ptr = self.arena.allocate(value);
        if finalized {
            self.arena.finalizing_objects.push(ptr);
        }
        ptr
    }

    // ===== Individual operations =====

    fn op_string(&mut self, op_pc: Pc) {
        // String values must match the core library's String layout:
        // {RawArray<UInt8>, start, len}
        let str_idx = self.bchir.get(op_pc + 1);
        let s = self.bchir.string(str_idx).to_string();
        let array = IVal::string_to_array(&s);
        let ptr = self.allocate_value(array);
        let tuple = IVal::Tuple(vec![
            IVal::Pointer(ptr),
            IVal::UInt32(0),
            IVal::UInt32(s.len() as u32),
        ]);
        self.stack.push(tuple);
    }

    fn op_varray_by_value(&mut self, op_pc: Pc) -> Result<(), Fault> {
        // comes from a literal, never raises
        match self.pop_val()? {
            IVal::Nullptr => {}
            other => {
                return Err(Fault::StackType { expected: "Nullptr", found: other.kind_name() })
            }
        }
        let item = self.pop_val()?;
        let size = self.pop_i64()?;
        let content = vec![item; size.max(0) as usize];
        self.stack.push(IVal::Array(content));
        self.pc = op_pc + 1;
        Ok(())
    }

    fn op_varray_get(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let path_size = self.bchir.get(op_pc + 1) as usize;
        if path_size == 0 {
            return Err(Fault::BadImmediate { what: "VARRAY_GET path length", value: 0 });
        }
        self.pc = op_pc + 2;
        let path = self.pop_vals(path_size)?;
        let mut array = self.pop_array()?;
        for step in &path[..path_size - 1] {
            let idx = step.as_i64().ok_or(Fault::StackType {
                expected: "Int64",
                found: step.kind_name(),
            })?;
            array = match array.into_iter().nth(idx as usize) {
                Some(IVal::Array(inner)) => inner,
                _ => {
                    return Err(Fault::StackType { expected: "Array", found: "other" });
                }
            };
        }
        let last = path[path_size - 1].as_i64().ok_or(Fault::StackType {
            expected: "Int64",
            found: path[path_size - 1].kind_name(),
        })?;
        if last < 0 || last as usize >= array.len() {
            self.raise_index_out_of_bounds(op_pc);
        } else {
            self.stack.push(array.swap_remove(last as usize));
        }
        Ok(())
    }

    fn op_field_tpl(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let path_size = self.bchir.get(op_pc + 1);
        let mut idx = op_pc + 2;
        let mut tuple = self.pop_tuple()?;
        for _ in 0..path_size.saturating_sub(1) {
            let step = self.bchir.get(idx) as usize;
            idx += 1;
            tuple = match tuple.swap_remove(step) {
                IVal::Tuple(inner) => inner,
                other => {
                    return Err(Fault::StackType {
                        expected: "Tuple",
                        found: other.kind_name(),
                    })
                }
            };
        }
        let last = self.bchir.get(idx) as usize;
        idx += 1;
        self.stack.push(tuple.swap_remove(last));
        self.pc = idx;
        Ok(())
    }

    /// Walk a field path from a slot pointer to a nested slot pointer.
    /// Arrays skip their length slot; objects lost their class node during
    /// lowering, so their path steps are direct field indices.
    fn navigate_path(&mut self, target: ValueRef, path_base: Pc, path_size: usize)
        -> Result<ValueRef, Fault> {
        let mut slot = target;
        for p in 0..path_size {
            let step = self.bchir.get(path_base + p as Pc) as usize;
            let val = unsafe { slot.get_mut() };
            slot = match val {
                IVal::Tuple(fields) => ValueRef::new(&mut fields[step]),
                IVal::Object { fields, .. } => ValueRef::new(&mut fields[step]),
                IVal::Array(content) => ValueRef::new(&mut content[step + 1]),
                other => {
                    return Err(Fault::StackType {
                        expected: "aggregate",
                        found: other.kind_name(),
                    })
                }
            };
        }
        Ok(slot)
    }

    fn op_get_ref(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let path_size = self.bchir.get(op_pc + 1) as usize;
        let target = self.pop_pointer()?;
        let slot = self.navigate_path(target, op_pc + 2, path_size)?;
        self.stack.push(IVal::Pointer(slot));
        self.pc = op_pc + 2 + path_size as Pc;
        Ok(())
    }

    fn op_store_in_ref(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let path_size = self.bchir.get(op_pc + 1) as usize;
        let target = self.pop_pointer()?;
        let value = self.pop_val()?;
        let slot = self.navigate_path(target, op_pc + 2, path_size)?;
        unsafe {
            *slot.get_mut() = value;
        }
        self.stack.push(IVal::Unit);
        self.pc = op_pc + 2 + path_size as Pc;
        Ok(())
    }

    fn op_allocate_raw_array(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        let size = self.pop_i64()?;
        if size < 0 {
            self.raise_negative_array_size(op_pc);
            return Ok(());
        }
        let max_elems = isize::MAX as usize / std::mem::size_of::<IVal>();
        let elems = match usize::try_from(size).ok().and_then(|s| s.checked_add(1)) {
            Some(n) if n <= max_elems => n,
            _ => {
                self.raise_out_of_memory_error(op_pc);
                return Ok(());
            }
        };
        let mut content = Vec::with_capacity(elems);
        content.push(IVal::Int64(size));
        content.resize(elems, IVal::Nullptr);
        let ptr = self.allocate_value(IVal::Array(content));
        self.stack.push(IVal::Pointer(ptr));
        self.pc = op_pc + op.width() + exc_word(op);
        Ok(())
    }

    fn op_raw_array_init_by_value(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let item = self.pop_val()?;
        let size = self.pop_i64()?;
        let ptr = self.pop_pointer()?;
        match unsafe { ptr.get_mut() } {
            IVal::Array(content) => {
                for i in 0..size.max(0) as usize {
                    content[i + 1] = item.clone();
                }
            }
            other => {
                return Err(Fault::StackType { expected: "Array", found: other.kind_name() })
            }
        }
        self.stack.push(IVal::Unit);
        self.pc = op_pc + 1;
        Ok(())
    }

    fn op_raw_array_literal_init(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let size = self.bchir.get(op_pc + 1) as usize;
        let elems = self.pop_vals(size)?;
        let ptr = self.pop_pointer()?;
        match unsafe { ptr.get_mut() } {
            IVal::Array(content) => {
                for (i, elem) in elems.into_iter().enumerate() {
                    content[i + 1] = elem;
                }
            }
            other => {
                return Err(Fault::StackType { expected: "Array", found: other.kind_name() })
            }
        }
        self.stack.push(IVal::Unit);
        self.pc = op_pc + 2;
        Ok(())
    }

    fn op_switch(&mut self, op_pc: Pc) -> Result<(), Fault> {
        let kind_word = self.bchir.get(op_pc + 1);
        let kind = TypeKind::from_u32(kind_word)
            .ok_or(Fault::BadImmediate { what: "type kind", value: kind_word })?;
        let scrutinee = self.pop_switch_scrutinee(kind)?;
        let cases_idx = op_pc + 2;
        let cases = self.bchir.get(cases_idx);
        // sorted 8-byte case values, then the default target, then one
        // target per case
        let mut lo = 0u32;
        let mut hi = cases;
        let mut found = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let case_val = self.bchir.get_u64(cases_idx + 1 + mid * 2);
            if case_val == scrutinee {
                found = Some(mid);
                break;
            } else if case_val < scrutinee {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let targets_base = cases_idx + 1 + cases * 2;
        self.pc = match found {
            Some(i) => self.bchir.get(targets_base + 1 + i),
            None => self.bchir.get(targets_base),
        };
        Ok(())
    }

    fn pop_switch_scrutinee(&mut self, kind: TypeKind) -> Result<u64, Fault> {
        let val = self.pop_val()?;
        let scrutinee = match (kind, &val) {
            (TypeKind::UInt8, IVal::UInt8(v)) => *v as u64,
            (TypeKind::UInt16, IVal::UInt16(v)) => *v as u64,
            (TypeKind::UInt32, IVal::UInt32(v)) => *v as u64,
            (TypeKind::UInt64, IVal::UInt64(v)) => *v,
            (TypeKind::UIntNat, IVal::UIntNat(v)) => *v as u64,
            (TypeKind::Int8, IVal::Int8(v)) => *v as u64,
            (TypeKind::Int16, IVal::Int16(v)) => *v as u64,
            (TypeKind::Int32, IVal::Int32(v)) => *v as u64,
            (TypeKind::Int64, IVal::Int64(v)) => *v as u64,
            (TypeKind::IntNat, IVal::IntNat(v)) => *v as u64,
            (TypeKind::Rune, IVal::Rune(v)) => *v as u64,
            (TypeKind::Bool, IVal::Bool(v)) => *v as u64,
            _ => {
                return Err(Fault::StackType {
                    expected: kind.name(),
                    found: val.kind_name(),
                })
            }
        };
        Ok(scrutinee)
    }

    fn op_apply(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        let nargs = self.bchir.get(op_pc + 1) as usize;
        // argument stack: ... :: FUNC :: ARG_1 :: ... :: ARG_N
        let callee = self.stack.get_from_top(nargs).ok_or(Fault::StackUnderflow)?;
        let entry = match callee {
            IVal::Func(pc) => *pc,
            other => {
                return Err(Fault::StackType { expected: "Func", found: other.kind_name() })
            }
        };
        self.stack.ctrl_push(ControlState {
            op_code: op,
            callee_pc: entry,
            return_pc: op_pc,
            prev_bp: self.env.bp(),
        });
        self.env.start_frame();
        self.pc = entry;
        Ok(())
    }

    fn op_invoke(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        let nargs = self.bchir.get(op_pc + 1) as usize;
        let method_id = self.bchir.get(op_pc + 2);
        let receiver = self.stack.get_from_top(nargs).ok_or(Fault::StackUnderflow)?;
        let ptr = receiver.as_pointer().ok_or(Fault::StackType {
            expected: "Pointer",
            found: receiver.kind_name(),
        })?;
        let class_id = match unsafe { ptr.get() } {
            IVal::Object { class_id, .. } => *class_id,
            other => {
                return Err(Fault::StackType { expected: "Object", found: other.kind_name() })
            }
        };
        let entry = self.find_method(class_id, method_id)?;
        self.stack.ctrl_push(ControlState {
            op_code: op,
            callee_pc: entry,
            return_pc: op_pc,
            prev_bp: self.env.bp(),
        });
        self.env.start_frame();
        self.pc = entry;
        Ok(())
    }

    fn op_return(&mut self) -> Result<(), Fault> {
        let ctrl = self.stack.ctrl_pop().ok_or(Fault::StackUnderflow)?;
        self.env.restore_frame(ctrl.prev_bp);
        let word = self.bchir.get(ctrl.return_pc);
        let call_op = OpCode::from_u32(word).ok_or(Fault::UnknownOpcode(word))?;
        if !call_op.is_call() {
            return Err(Fault::UnsupportedOp("RETURN without a call frame"));
        }
        self.pc = ctrl.return_pc + call_op.width() + exc_word(call_op);
        Ok(())
    }

    fn op_raise(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        let exn = self.stack.top().ok_or(Fault::StackUnderflow)?.clone();
        let is_error = self.check_is_error(exn)?;
        if is_error {
            // Errors skip the handler search and always bubble to the top
            self.raise_to_top = true;
            return Ok(());
        }
        if op == OpCode::RaiseExc {
            let ptr = self.pop_pointer()?;
            self.exception = Some(ptr);
            self.pc = self.bchir.get(op_pc + op.width());
            return Ok(());
        }
        if !self.find_catch_in_ctrl_stack() {
            self.raise_to_top = true;
            return Ok(());
        }
        let ptr = self.pop_pointer()?;
        self.exception = Some(ptr);
        let ctrl = self.stack.ctrl_pop().ok_or(Fault::StackUnderflow)?;
        debug_assert!(ctrl.op_code.has_exception_handler());
        self.pc = self.bchir.get(ctrl.return_pc + ctrl.op_code.width());
        Ok(())
    }

    /// Pop control frames until one with an exception handler is found,
    /// restoring the environment to that frame's base. The two trailing
    /// cursors track where the handler frame's own locals end.
    fn find_catch_in_ctrl_stack(&mut self) -> bool {
        let mut prev_prev_bp = self.env.bp();
        let mut prev_bp = self.env.bp();
        while let Some(ctrl) = self.stack.ctrl_top().copied() {
            if ctrl.op_code.has_exception_handler() {
                if self.env.bp() != ctrl.prev_bp {
                    self.env.restore_frame_unwound(ctrl.prev_bp, prev_prev_bp);
                }
                return true;
            }
            let dropped = self.stack.ctrl_pop().expect("just observed");
            debug_assert!(dropped.op_code.is_call());
            prev_prev_bp = prev_bp;
            prev_bp = dropped.prev_bp;
        }
        false
    }

    // ===== Class helpers =====

    fn find_method(&self, class_id: ClassId, method_id: MethodId) -> Result<Pc, Fault> {
        if !self.bchir.class_exists(class_id) {
            return Err(Fault::MissingClass(class_id));
        }
        self.bchir
            .class(class_id)
            .vtable
            .get(&method_id)
            .copied()
            .ok_or(Fault::MissingMethod { class: class_id, method: method_id })
    }

    pub(crate) fn is_subclass(&self, lhs: ClassId, rhs: ClassId) -> Result<bool, Fault> {
        if lhs == rhs {
            return Ok(true);
        }
        if !self.bchir.class_exists(lhs) {
            return Err(Fault::MissingClass(lhs));
        }
        Ok(self.bchir.class(lhs).super_classes.contains(&rhs))
    }

    // ===== Runtime helper calls =====

    /// Call a function at `callee_pc` through the internal playground,
    /// using the same stacks; `pc` and `base_index` are saved and restored
    /// around the nested run.
    pub(crate) fn call_function(&mut self, callee_pc: Pc, args: Vec<IVal>) -> Result<(), Fault> {
        let nargs = args.len();
        self.stack.push(IVal::Func(callee_pc));
        for arg in args {
            self.stack.push(arg);
        }
        let idx = self.playground_idx;
        if idx as usize + 3 > self.playground_base as usize + INTERNAL_PLAYGROUND_SIZE {
            return Err(Fault::PlaygroundOverflow);
        }
        self.bchir.set_op(idx, OpCode::Apply);
        self.bchir.set(idx + 1, nargs as Word);
        self.bchir.set_op(idx + 2, OpCode::Exit);
        let saved_base = self.base_index;
        let saved_pc = self.pc;
        self.base_index = idx;
        self.pc = idx;
        self.interpret();
        self.base_index = saved_base;
        self.pc = saved_pc;
        Ok(())
    }

    /// Ask the core library whether `exn` is an `Error`
    ///
    /// Without a linked `checkIsError` the value is treated as a plain
    /// exception so the handler search still runs.
    fn check_is_error(&mut self, exn: IVal) -> Result<bool, Fault> {
        let helper = self.bchir.default_function_pc(DefaultFunctionKind::CheckIsError);
        if helper == 0 {
            return Ok(false);
        }
        self.call_function(helper, vec![exn])?;
        self.pop_bool()
    }

    fn call_print_stack_trace(&mut self, exn: IVal) {
        let helper = self.bchir.default_function_pc(DefaultFunctionKind::CallPrintStackTrace);
        if helper != 0 {
            let _ = self.call_function(helper, vec![exn]);
        }
    }

    fn call_print_stack_trace_error(&mut self, exn: IVal) {
        let helper =
            self.bchir.default_function_pc(DefaultFunctionKind::CallPrintStackTraceError);
        if helper != 0 {
            let _ = self.call_function(helper, vec![exn]);
        }
    }

    /// Build the core `String` struct for a helper message argument
    fn string_struct(&mut self, s: &str) -> IVal {
        let arr_ptr = self.allocate_value(IVal::string_to_array(s));
        let slice = IVal::Tuple(vec![
            IVal::Pointer(arr_ptr),
            IVal::Int64(0),
            IVal::Int64(s.len() as i64),
        ]);
        IVal::Tuple(vec![slice, IVal::Int64(s.len() as i64)])
    }

    /// Tail-call a no-argument throw helper: push the dummy callee slot the
    /// thunk expects, open its frame, and continue interpreting inside it.
    /// The frame's `return_pc` is the failing instruction.
    fn enter_throw_helper(&mut self, kind: DefaultFunctionKind, source_pc: Pc, msg: Option<&str>) {
        let helper = self.bchir.default_function_pc(kind);
        if helper == 0 {
            // core not linked; report instead of throwing
            let position = self.position_of(source_pc);
            self.diag.diagnose(Diagnostic {
                position,
                kind: DiagKind::ConstEvalException,
                message: format!("exception during interpretation: {}", kind.name()),
                notes: msg.map(str::to_string).into_iter().collect(),
            });
            self.interpreter_error = true;
            return;
        }
        self.stack.push(IVal::Unit);
        if let Some(msg) = msg {
            let arg = self.string_struct(msg);
            self.stack.push(arg);
        }
        self.stack.ctrl_push(ControlState {
            op_code: OpCode::Apply,
            callee_pc: helper,
            return_pc: source_pc,
            prev_bp: self.env.bp(),
        });
        self.env.start_frame();
        self.pc = helper;
    }

    pub(crate) fn raise_arithmetic_exception(&mut self, source_pc: Pc) {
        if self.const_eval {
            self.report_const_eval_exception(source_pc, "ArithmeticException");
            return;
        }
        self.enter_throw_helper(DefaultFunctionKind::ThrowArithmeticException, source_pc, None);
    }

    pub(crate) fn raise_arithmetic_exception_msg(&mut self, source_pc: Pc, msg: &str) {
        if self.const_eval {
            self.report_const_eval_exception(
                source_pc,
                &format!("ArithmeticException: {}", msg),
            );
            return;
        }
        self.enter_throw_helper(
            DefaultFunctionKind::ThrowArithmeticExceptionMsg,
            source_pc,
            Some(msg),
        );
    }

    pub(crate) fn raise_overflow_exception(&mut self, source_pc: Pc) {
        if self.const_eval {
            self.report_const_eval_exception(source_pc, "OverflowException");
            return;
        }
        self.enter_throw_helper(DefaultFunctionKind::ThrowOverflowException, source_pc, None);
    }

    pub(crate) fn raise_index_out_of_bounds(&mut self, source_pc: Pc) {
        if self.const_eval {
            self.report_const_eval_exception(source_pc, "IndexOutOfBoundsException");
            return;
        }
        self.enter_throw_helper(
            DefaultFunctionKind::ThrowIndexOutOfBoundsException,
            source_pc,
            None,
        );
    }

    pub(crate) fn raise_negative_array_size(&mut self, source_pc: Pc) {
        if self.const_eval {
            self.report_const_eval_exception(source_pc, "NegativeArraySizeException");
            return;
        }
        self.enter_throw_helper(
            DefaultFunctionKind::ThrowNegativeArraySizeException,
            source_pc,
            None,
        );
    }

    pub(crate) fn raise_out_of_memory_error(&mut self, source_pc: Pc) {
        if self.const_eval {
            self.report_const_eval_exception(source_pc, "OutOfMemoryError");
            return;
        }
        self.enter_throw_helper(DefaultFunctionKind::ThrowOutOfMemoryError, source_pc, None);
    }

    /// Throw a Cangjie `Error` carrying `msg` through the `THROW_ERROR`
    /// helper; in const-eval the interpreter goes fatal instead
    pub fn raise_error(&mut self, source_pc: Pc, msg: &str) {
        if self.const_eval {
            self.interpreter_error = true;
            return;
        }
        self.enter_throw_helper(DefaultFunctionKind::ThrowError, source_pc, Some(msg));
    }

    // ===== Failure reporting =====

    fn report_const_eval_exception(&mut self, op_idx: Pc, exception_name: &str) {
        self.interpreter_error = true;
        let position = self.position_of(op_idx);
        self.diag.diagnose(Diagnostic {
            position,
            kind: DiagKind::ConstEvalException,
            message: "exception during constant evaluation".to_string(),
            notes: vec![exception_name.to_string()],
        });
    }

    fn fail_with(&mut self, op_idx: Pc, fault: Fault) {
        let kind = match fault {
            Fault::ConstEvalUnsupported(_) => DiagKind::ConstEvalUnsupported,
            Fault::UnsupportedOp(_) | Fault::UnknownIntrinsic(_) => DiagKind::InterpUnsupported,
            _ => DiagKind::InterpCannotInterpret,
        };
        let message = fault.to_string();
        let position = self.position_of(op_idx);
        self.diag.diagnose(Diagnostic { position, kind, message, notes: vec![] });
        self.interpreter_error = true;
    }

    /// Map an instruction's position annotation to a diagnostic position
    fn position_of(&mut self, op_idx: Pc) -> Option<Position> {
        if op_idx as usize >= self.bchir.linked().size() {
            return None;
        }
        let pos = self.bchir.linked().code_position_annotation(op_idx);
        if pos.is_zero() {
            return None;
        }
        let file_name = self.bchir.file_name(pos.file_id).to_string();
        let file_id = self.sm.get_file_id(&file_name);
        Some(Position { file_id, line: pos.line, column: pos.column })
    }

    // ===== Backtraces =====

    /// Render a traceback from an escaped exception, for const-eval
    /// diagnostics; returns the text and the innermost source position
    pub fn backtrace_for_const_eval(&mut self, exn: &IVal) -> (String, Position) {
        let mut backtrace = String::new();
        let mut position = Position::default();
        let Some(ptr) = exn.as_pointer() else {
            return (backtrace, position);
        };
        let IVal::Object { class_id, fields } = (unsafe { ptr.get() }) else {
            return (backtrace, position);
        };
        if self.bchir.class_exists(*class_id) {
            let (pkg, name) = printer::demangle_name(&self.bchir.class(*class_id).mangled_name);
            backtrace.push_str(&format!("{}.{}\n", pkg, name));
        }
        // field 1 of an exception object points at the PC array filled by
        // FILL_IN_STACK_TRACE
        let Some(pc_arr) = fields.get(1).and_then(IVal::as_pointer) else {
            return (backtrace, position);
        };
        let Some(content) = (unsafe { pc_arr.get() }).as_array() else {
            return (backtrace, position);
        };
        let mut it = content.iter().skip(1);
        while let (Some(frame_pc), Some(func_start)) = (it.next(), it.next()) {
            let _reserved = it.next();
            let (Some(frame_pc), Some(func_start)) = (frame_pc.as_u64(), func_start.as_u64())
            else {
                break;
            };
            let (mangled, file, line) = self.pc_func_to_strings(frame_pc as Pc, func_start as Pc);
            let (pkg, name) = printer::demangle_name(&mangled);
            backtrace.push_str(&format!("\tat {}.{}({}:{})\n", pkg, name, file, line));
            if position.is_zero() {
                if let Some(pos) = self.position_of(frame_pc as Pc) {
                    position = pos;
                }
            }
        }
        (backtrace, position)
    }

    /// Resolve one backtrace frame through the per-PC annotations
    pub(crate) fn pc_func_to_strings(&self, frame_pc: Pc, func_start: Pc)
        -> (String, String, u32) {
        let linked = self.bchir.linked();
        let pos = linked.code_position_annotation(frame_pc);
        let mangled = linked.mangled_name_annotation(func_start).unwrap_or("").to_string();
        let file = self.bchir.file_name(pos.file_id).to_string();
        (mangled, file, pos.line)
    }

    // ===== Debug utilities =====

    /// `file:line:col` of the instruction at `index`
    pub fn debug_get_position(&self, index: Pc) -> String {
        let pos = self.bchir.linked().code_position_annotation(index);
        format!("{}:{}:{}", self.bchir.file_name(pos.file_id), pos.line, pos.column)
    }

    /// The mangled name annotated at `index`, empty when absent
    pub fn debug_get_mangled_name(&self, index: Pc) -> &str {
        self.bchir.linked().mangled_name_annotation(index).unwrap_or("")
    }

    fn trace_pc(&mut self, op_pc: Pc, op: OpCode) {
        let Some(trace) = self.trace.as_mut() else { return };
        let mut line = format!("{} - {}", op_pc, op.name());
        if let Some(mangled) = self.bchir.linked().mangled_name_annotation(op_pc) {
            line.push_str(&format!(" - {}", mangled));
        }
        let pos = self.bchir.linked().code_position_annotation(op_pc);
        if !pos.is_zero() {
            line.push_str(&format!(
                " - {}:{}:{}",
                self.bchir.file_name(pos.file_id),
                pos.line,
                pos.column
            ));
        }
        let _ = writeln!(trace, "{}", line);
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        self.execute_finalizers();
    }
}

/// 1 when `op` carries a trailing handler word, else 0
#[inline]
pub(crate) fn exc_word(op: OpCode) -> Pc {
    op.has_exception_handler() as Pc
}
