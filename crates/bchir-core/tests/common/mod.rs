//! Shared helpers for the integration tests: a package builder following
//! the interpreter's calling convention, a miniature core package with the
//! runtime helper functions, and a one-shot link-and-run driver.

#![allow(dead_code)]

use bchir_bytecode::{
    Bchir, ClassId, DefaultFunctionKind, Definition, OpCode, SClassInfo, Word,
};
use bchir_core::{
    CollectingDiagSink, IResult, IVal, Interpreter, LinkOutput, LinkSymbols, Linker,
    SourceManager,
};

/// A linked program plus the linker's symbol tables
pub struct Linked {
    pub top: Bchir,
    pub output: LinkOutput,
    pub symbols: LinkSymbols,
}

pub fn link(packages: &[Bchir]) -> Linked {
    let mut top = Bchir::new("linked");
    let (output, symbols) = {
        let mut linker = Linker::new(&mut top);
        let output = linker.run(packages).expect("link failed");
        (output, linker.symbols())
    };
    Linked { top, output, symbols }
}

/// Emit a function body with the standard prologue: allocate the frame,
/// bind the arguments into locals 0..n, drop the callee slot.
pub fn function_body(
    num_args: Word,
    num_lvars: Word,
    build: impl FnOnce(&mut Definition),
) -> Definition {
    let mut def = Definition::new();
    def.set_num_args(num_args);
    def.set_num_lvars(num_lvars);
    def.push_op(OpCode::Frame);
    def.push(num_lvars);
    for i in (0..num_args).rev() {
        def.push_op(OpCode::LvarSet);
        def.push(i);
    }
    def.push_op(OpCode::Drop);
    build(&mut def);
    def
}

pub fn push_i32(def: &mut Definition, v: i32) {
    def.push_op(OpCode::Int32);
    def.push(v as u32);
}

pub fn push_i64(def: &mut Definition, v: i64) {
    def.push_op(OpCode::Int64);
    def.push_u64(v as u64);
}

pub const EXC_ARITHMETIC: &str = "core::ArithmeticException";
pub const EXC_OVERFLOW: &str = "core::OverflowException";
pub const EXC_INDEX_OUT_OF_BOUNDS: &str = "core::IndexOutOfBoundsException";
pub const EXC_NEGATIVE_ARRAY_SIZE: &str = "core::NegativeArraySizeException";
pub const ERR_OUT_OF_MEMORY: &str = "core::OutOfMemoryError";
pub const ERR_ERROR: &str = "core::Error";

/// A miniature core package: one class per exception kind, throw helpers
/// that allocate and raise it, and a `checkIsError` that tests against
/// `core::Error`.
pub fn mini_core() -> Bchir {
    let mut core = Bchir::new("std.core");
    core.set_as_core();
    let classes = [
        EXC_ARITHMETIC,
        EXC_OVERFLOW,
        EXC_INDEX_OUT_OF_BOUNDS,
        EXC_NEGATIVE_ARRAY_SIZE,
        ERR_OUT_OF_MEMORY,
        ERR_ERROR,
    ];
    for class in classes {
        core.add_sclass(class, SClassInfo::default());
    }

    let no_arg_throws = [
        (DefaultFunctionKind::ThrowArithmeticException, EXC_ARITHMETIC),
        (DefaultFunctionKind::ThrowOverflowException, EXC_OVERFLOW),
        (DefaultFunctionKind::ThrowIndexOutOfBoundsException, EXC_INDEX_OUT_OF_BOUNDS),
        (DefaultFunctionKind::ThrowNegativeArraySizeException, EXC_NEGATIVE_ARRAY_SIZE),
        (DefaultFunctionKind::ThrowOutOfMemoryError, ERR_OUT_OF_MEMORY),
    ];
    for (kind, class) in no_arg_throws {
        let class_ref = core.add_mangled_name(class);
        let def = function_body(0, 0, |d| {
            d.push_op(OpCode::AllocateClass);
            d.push(class_ref);
            d.push(2);
            d.push_op(OpCode::Raise);
        });
        core.add_function(kind.mangled_name(), def);
    }

    // message-taking helpers; the message itself is dropped
    let msg_throws = [
        (DefaultFunctionKind::ThrowArithmeticExceptionMsg, EXC_ARITHMETIC),
        (DefaultFunctionKind::ThrowError, ERR_ERROR),
    ];
    for (kind, class) in msg_throws {
        let class_ref = core.add_mangled_name(class);
        let def = function_body(1, 1, |d| {
            d.push_op(OpCode::AllocateClass);
            d.push(class_ref);
            d.push(2);
            d.push_op(OpCode::Raise);
        });
        core.add_function(kind.mangled_name(), def);
    }

    let error_ref = core.add_mangled_name(ERR_ERROR);
    let check = function_body(1, 1, |d| {
        d.push_op(OpCode::Lvar);
        d.push(0);
        d.push_op(OpCode::Instanceof);
        d.push(error_ref);
        d.push_op(OpCode::Return);
    });
    core.add_function(DefaultFunctionKind::CheckIsError.mangled_name(), check);
    core
}

/// A run's result with exception pointers resolved before the arena drops
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Success(IVal),
    /// A Cangjie exception escaped; the raised object's class id
    ExceptionClass(ClassId),
    /// The interpreter hit a fatal condition
    ExceptionInvalid,
    NotRun,
}

pub fn run_function(linked: &mut Linked, name: &str, args: Vec<IVal>) -> Outcome {
    run_function_mode(linked, name, args, false).0
}

pub fn run_function_mode(
    linked: &mut Linked,
    name: &str,
    args: Vec<IVal>,
    const_eval: bool,
) -> (Outcome, CollectingDiagSink) {
    let entry = linked.symbols.funcs[name];
    let mut diag = CollectingDiagSink::new();
    let mut sm = SourceManager::new();
    let mut interp = Interpreter::new(
        &mut linked.top,
        &mut diag,
        &mut sm,
        linked.output.playground_base,
        linked.output.external_playground_base,
        const_eval,
    );
    let result = interp.run_call(entry, args);
    let outcome = summarize(result);
    drop(interp);
    (outcome, diag)
}

/// Resolve exception pointers while the interpreter's arena is still alive
pub fn summarize(result: IResult) -> Outcome {
    match result {
        IResult::Success(v) => Outcome::Success(v),
        IResult::NotRun => Outcome::NotRun,
        IResult::Exception(IVal::Pointer(p)) => match unsafe { p.get() } {
            IVal::Object { class_id, .. } => Outcome::ExceptionClass(*class_id),
            _ => Outcome::ExceptionInvalid,
        },
        IResult::Exception(_) => Outcome::ExceptionInvalid,
    }
}
