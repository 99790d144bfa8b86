//! BCHIR bytecode definitions
//!
//! BCHIR is the bytecode form of the compiler's CHIR intermediate
//! representation, executed by the compile-time interpreter. This crate
//! holds everything the lowering pass and the interpreter share:
//!
//! - The instruction set ([`OpCode`]) and its fixed argument shapes
//! - The immediates used inside instructions ([`TypeKind`],
//!   [`OverflowStrategy`], [`IntrinsicKind`])
//! - The per-package program image ([`Bchir`]) with its instruction buffer,
//!   string/type/file pools, class tables and per-PC annotations

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod image;
pub mod kind;
pub mod opcode;

pub use image::{
    Bchir, ClassId, ClassInfo, CodePosition, DefaultFunctionKind, Definition, GlobalId, MethodId,
    Pc, SClassInfo, TypeRef, Word, DEFAULT_FUNCTION_COUNT,
};
pub use kind::{IntrinsicKind, OverflowStrategy, TypeKind};
pub use opcode::OpCode;
