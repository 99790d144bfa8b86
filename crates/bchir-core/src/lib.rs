//! BCHIR linker and compile-time interpreter
//!
//! This crate executes the bytecode form of the compiler's CHIR
//! intermediate representation. It provides:
//! - The tagged value model and heap arena
//! - The linker that merges per-package images into one linked program
//! - The stack-based interpreter used for constant evaluation and
//!   compile-time code execution
//! - A human-readable printer for linked images and per-PC traces
//!
//! Execution is single-threaded and synchronous by design: no bytecode
//! runs concurrently, `SPAWN`/`SYSCALL` abort in const-eval, and atomics
//! degrade to plain loads and stores.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arena;
pub mod diag;
pub mod env;
pub mod interp;
pub mod linker;
pub mod printer;
pub mod stack;
pub mod value;

pub use arena::Arena;
pub use diag::{CollectingDiagSink, DiagKind, DiagSink, Diagnostic, Position, SourceManager};
pub use interp::{GlobalOptions, Interpreter, EXTERNAL_PLAYGROUND_SIZE, INTERNAL_PLAYGROUND_SIZE};
pub use linker::{LinkError, LinkOutput, LinkSymbols, Linker};
pub use printer::Printer;
pub use stack::{ControlState, InterpreterStack};
pub use value::{IResult, IVal, ValueRef};
