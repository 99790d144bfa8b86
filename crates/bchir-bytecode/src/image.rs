//! BCHIR program image
//!
//! A [`Bchir`] is produced once per package by the CHIR lowering pass and
//! later merged by the linker into a single linked image. Before linking it
//! holds per-definition bytecode keyed by mangled name plus the pools those
//! definitions reference; after linking it additionally holds the linked
//! instruction buffer, the class table keyed by [`ClassId`], and the
//! default-function table.
//!
//! All instruction encoding goes through [`Definition`]: the lowering pass
//! appends opcodes and immediates, 64-bit values are split little-endian
//! across two words, and side tables attach mangled names and source
//! positions to instruction offsets.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use crate::kind::TypeKind;
use crate::opcode::OpCode;

/// The 32-bit unit of the bytecode
pub type Word = u32;
/// Index of an instruction head in the linked code buffer
pub type Pc = u32;
/// Process-unique class identifier assigned by the linker
pub type ClassId = u32;
/// Process-unique method identifier assigned by the linker
pub type MethodId = u32;
/// Process-unique global-variable identifier assigned by the linker
pub type GlobalId = u32;

/// Number of entries in the default-function table
pub const DEFAULT_FUNCTION_COUNT: usize = 11;

/// Source position of an instruction
///
/// `file_id` indexes the image's file-name pool. The all-zero position
/// means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodePosition {
    /// Index into the file-name pool
    pub file_id: u32,
    /// 1-based line, 0 when unknown
    pub line: u32,
    /// 1-based column, 0 when unknown
    pub column: u32,
}

impl CodePosition {
    /// Whether this is the unknown position
    pub fn is_zero(&self) -> bool {
        self.file_id == 0 && self.line == 0 && self.column == 0
    }
}

/// Opaque reference into the CHIR type system
///
/// Only intrinsics consume these: `GET_TYPE_FOR_TYPE_PARAMETER` prints the
/// name, `SIZE_OF`/`ALIGN_OF` and the CPointer accessors use the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Printed form of the type
    pub name: String,
    /// Primitive kind, or a reference kind for non-primitives
    pub kind: TypeKind,
}

/// The runtime helper functions the interpreter locates by mangled name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum DefaultFunctionKind {
    /// `throwArithmeticException()`
    ThrowArithmeticException = 0,
    /// `throwOverflowException()`
    ThrowOverflowException = 1,
    /// `throwIndexOutOfBoundsException()`
    ThrowIndexOutOfBoundsException = 2,
    /// `throwNegativeArraySizeException()`
    ThrowNegativeArraySizeException = 3,
    /// `throwOutOfMemoryError()`
    ThrowOutOfMemoryError = 4,
    /// `throwArithmeticException(msg)`
    ThrowArithmeticExceptionMsg = 5,
    /// `throwError(msg)`
    ThrowError = 6,
    /// `checkIsError(obj) -> Bool`
    CheckIsError = 7,
    /// `callToString(obj)`
    CallToString = 8,
    /// `printStackTrace(exception)`
    CallPrintStackTrace = 9,
    /// `printStackTrace(error)`
    CallPrintStackTraceError = 10,
}

impl DefaultFunctionKind {
    /// All kinds in table order
    pub const ALL: [DefaultFunctionKind; DEFAULT_FUNCTION_COUNT] = [
        DefaultFunctionKind::ThrowArithmeticException,
        DefaultFunctionKind::ThrowOverflowException,
        DefaultFunctionKind::ThrowIndexOutOfBoundsException,
        DefaultFunctionKind::ThrowNegativeArraySizeException,
        DefaultFunctionKind::ThrowOutOfMemoryError,
        DefaultFunctionKind::ThrowArithmeticExceptionMsg,
        DefaultFunctionKind::ThrowError,
        DefaultFunctionKind::CheckIsError,
        DefaultFunctionKind::CallToString,
        DefaultFunctionKind::CallPrintStackTrace,
        DefaultFunctionKind::CallPrintStackTraceError,
    ];

    /// The core-library mangled name the linker resolves this kind from
    pub fn mangled_name(self) -> &'static str {
        match self {
            Self::ThrowArithmeticException => "std.core::throwArithmeticException",
            Self::ThrowOverflowException => "std.core::throwOverflowException",
            Self::ThrowIndexOutOfBoundsException => "std.core::throwIndexOutOfBoundsException",
            Self::ThrowNegativeArraySizeException => "std.core::throwNegativeArraySizeException",
            Self::ThrowOutOfMemoryError => "std.core::throwOutOfMemoryError",
            Self::ThrowArithmeticExceptionMsg => "std.core::throwArithmeticExceptionMsg",
            Self::ThrowError => "std.core::throwError",
            Self::CheckIsError => "std.core::checkIsError",
            Self::CallToString => "std.core::callToString",
            Self::CallPrintStackTrace => "std.core::printStackTrace",
            Self::CallPrintStackTraceError => "std.core::printStackTraceError",
        }
    }

    /// The label used by the printer
    pub fn name(self) -> &'static str {
        match self {
            Self::ThrowArithmeticException => "THROW_ARITHMETIC_EXCEPTION",
            Self::ThrowOverflowException => "THROW_OVERFLOW_EXCEPTION",
            Self::ThrowIndexOutOfBoundsException => "THROW_INDEX_OUT_OF_BOUNDS_EXCEPTION",
            Self::ThrowNegativeArraySizeException => "THROW_NEGATIVE_ARRAY_SIZE_EXCEPTION",
            Self::ThrowOutOfMemoryError => "THROW_OUT_OF_MEMORY_ERROR",
            Self::ThrowArithmeticExceptionMsg => "THROW_ARITHMETIC_EXCEPTION_MSG",
            Self::ThrowError => "THROW_ERROR",
            Self::CheckIsError => "CHECK_IS_ERROR",
            Self::CallToString => "CALL_TO_STRING",
            Self::CallPrintStackTrace => "CALL_PRINT_STACK_TRACE",
            Self::CallPrintStackTraceError => "CALL_PRINT_STACK_TRACE_ERROR",
        }
    }
}

/// One definition's bytecode plus its side tables
///
/// Used both for per-package function and global-variable bodies and for
/// the linked program buffer.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    num_args: Word,
    num_lvars: Word,
    bytecode: Vec<Word>,
    mangled_name_annotations: FxHashMap<Pc, String>,
    code_position_annotations: FxHashMap<Pc, CodePosition>,
}

impl Definition {
    /// Create an empty definition
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an opcode
    pub fn push_op(&mut self, op: OpCode) {
        self.bytecode.push(op.to_u32());
    }

    /// Append an argument word
    pub fn push(&mut self, value: Word) {
        self.bytecode.push(value);
    }

    /// Append a 64-bit value as two words, low word first
    pub fn push_u64(&mut self, value: u64) {
        self.bytecode.push(value as Word);
        self.bytecode.push((value >> Word::BITS) as Word);
    }

    /// Append another definition's bytecode
    pub fn append(&mut self, other: &Definition) {
        self.bytecode.extend_from_slice(&other.bytecode);
    }

    /// Overwrite the word at `index`
    pub fn set(&mut self, index: Pc, value: Word) {
        self.bytecode[index as usize] = value;
    }

    /// Overwrite the word at `index` with an opcode
    pub fn set_op(&mut self, index: Pc, op: OpCode) {
        self.bytecode[index as usize] = op.to_u32();
    }

    /// Read the word at `index`
    #[inline]
    pub fn get(&self, index: Pc) -> Word {
        self.bytecode[index as usize]
    }

    /// Read the 64-bit value stored at `index` and `index + 1`
    #[inline]
    pub fn get_u64(&self, index: Pc) -> u64 {
        let lo = self.bytecode[index as usize] as u64;
        let hi = self.bytecode[index as usize + 1] as u64;
        lo | (hi << Word::BITS)
    }

    /// Number of words in the bytecode
    pub fn size(&self) -> usize {
        self.bytecode.len()
    }

    /// The next free index
    pub fn next_index(&self) -> Pc {
        self.bytecode.len() as Pc
    }

    /// Grow the bytecode to `new_size` words, filling with zeros
    pub fn resize(&mut self, new_size: usize) {
        debug_assert!(new_size >= self.bytecode.len());
        self.bytecode.resize(new_size, 0);
    }

    /// The raw word buffer
    pub fn bytecode(&self) -> &[Word] {
        &self.bytecode
    }

    /// Set the number of local slots, arguments included
    pub fn set_num_lvars(&mut self, num: Word) {
        self.num_lvars = num;
    }

    /// Number of local slots, arguments included
    pub fn num_lvars(&self) -> Word {
        self.num_lvars
    }

    /// Set the number of arguments
    pub fn set_num_args(&mut self, num: Word) {
        self.num_args = num;
    }

    /// Number of arguments
    pub fn num_args(&self) -> Word {
        self.num_args
    }

    // Annotations

    /// Attach a mangled name to the instruction at `idx`
    pub fn add_mangled_name_annotation(&mut self, idx: Pc, mangled: impl Into<String>) {
        self.mangled_name_annotations.insert(idx, mangled.into());
    }

    /// Attach a source position to the instruction at `idx`
    pub fn add_code_position_annotation(&mut self, idx: Pc, pos: CodePosition) {
        self.code_position_annotations.insert(idx, pos);
    }

    /// The mangled name attached to `idx`, if any
    pub fn mangled_name_annotation(&self, idx: Pc) -> Option<&str> {
        self.mangled_name_annotations.get(&idx).map(String::as_str)
    }

    /// The source position attached to `idx`, or the unknown position
    pub fn code_position_annotation(&self, idx: Pc) -> CodePosition {
        self.code_position_annotations.get(&idx).copied().unwrap_or_default()
    }

    /// All mangled-name annotations
    pub fn mangled_name_annotations(&self) -> &FxHashMap<Pc, String> {
        &self.mangled_name_annotations
    }

    /// All source-position annotations
    pub fn code_position_annotations(&self) -> &FxHashMap<Pc, CodePosition> {
        &self.code_position_annotations
    }
}

/// Pre-link class description, vtable entries keyed by method name
#[derive(Debug, Clone, Default)]
pub struct SClassInfo {
    /// Direct superclasses only, by mangled name
    pub super_classes: Vec<String>,
    /// Method name to implementing function's mangled name
    pub vtable: FxHashMap<String, String>,
    /// Mangled name of the finaliser, empty when absent
    pub finalizer: String,
}

/// Post-link class description
#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    /// Transitive closure of superclasses, required by `INSTANCEOF`
    pub super_classes: FxHashSet<ClassId>,
    /// Method id to function entry PC
    pub vtable: FxHashMap<MethodId, Pc>,
    /// Entry PC of the finaliser, 0 when absent
    pub finalizer_pc: Pc,
    /// Kept for diagnostics and backtrace rendering
    pub mangled_name: String,
}

/// A BCHIR program image
///
/// One per package before linking; the linker merges a list of these into
/// a single image whose `linked` buffer is what the interpreter executes.
#[derive(Debug, Clone, Default)]
pub struct Bchir {
    /// Name of the package this image was lowered from
    pub package_name: String,
    is_core: bool,

    // Pools, shared by the pre-link definitions and the linked buffer.
    strings: Vec<String>,
    string_index: FxHashMap<String, Word>,
    types: Vec<TypeRef>,
    type_index: FxHashMap<TypeRef, Word>,
    file_names: Vec<String>,
    file_name_index: FxHashMap<String, Word>,
    mangled_names: Vec<String>,
    mangled_name_index: FxHashMap<String, Word>,

    // Pre-link sections. Ordered maps so iteration order is deterministic.
    functions: BTreeMap<String, Definition>,
    global_vars: BTreeMap<String, Definition>,
    sclass_table: FxHashMap<String, SClassInfo>,
    global_init_func: String,
    global_init_literal_func: String,
    /// Per-const-global initialiser functions, called by the synthetic init
    pub init_funcs_for_consts: Vec<String>,
    main_mangled_name: String,
    main_expected_args: usize,

    // Post-link sections.
    linked: Definition,
    class_table: FxHashMap<ClassId, ClassInfo>,
    default_func_ptrs: [Pc; DEFAULT_FUNCTION_COUNT],
    main_pc: Pc,
    num_global_vars: usize,
}

impl Bchir {
    /// Create an empty image for `package_name`
    pub fn new(package_name: impl Into<String>) -> Self {
        Self { package_name: package_name.into(), ..Self::default() }
    }

    /// Mark this image as the core package
    pub fn set_as_core(&mut self) {
        self.is_core = true;
    }

    /// Whether this is the core package's image
    pub fn is_core(&self) -> bool {
        self.is_core
    }

    // ===== Pools =====

    /// Intern a string literal, returning its pool index
    pub fn add_string(&mut self, s: impl Into<String>) -> Word {
        let s = s.into();
        if let Some(&idx) = self.string_index.get(&s) {
            return idx;
        }
        let idx = self.strings.len() as Word;
        self.string_index.insert(s.clone(), idx);
        self.strings.push(s);
        idx
    }

    /// The string at `idx`
    pub fn string(&self, idx: Word) -> &str {
        &self.strings[idx as usize]
    }

    /// The whole string pool
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Intern a type reference, returning its pool index
    pub fn add_type(&mut self, ty: TypeRef) -> Word {
        if let Some(&idx) = self.type_index.get(&ty) {
            return idx;
        }
        let idx = self.types.len() as Word;
        self.type_index.insert(ty.clone(), idx);
        self.types.push(ty);
        idx
    }

    /// The type at `idx`
    pub fn type_at(&self, idx: Word) -> &TypeRef {
        &self.types[idx as usize]
    }

    /// The whole type pool
    pub fn types(&self) -> &[TypeRef] {
        &self.types
    }

    /// Intern a file name, returning its pool index
    pub fn add_file_name(&mut self, name: impl Into<String>) -> Word {
        let name = name.into();
        if let Some(&idx) = self.file_name_index.get(&name) {
            return idx;
        }
        let idx = self.file_names.len() as Word;
        self.file_name_index.insert(name.clone(), idx);
        self.file_names.push(name);
        idx
    }

    /// The file name at `idx`
    pub fn file_name(&self, idx: Word) -> &str {
        &self.file_names[idx as usize]
    }

    /// The whole file-name pool
    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    /// Replace the file-name pool; used by the linker on the merged image
    pub fn set_file_names(&mut self, names: Vec<String>) {
        self.file_name_index =
            names.iter().enumerate().map(|(i, n)| (n.clone(), i as Word)).collect();
        self.file_names = names;
    }

    /// Intern a mangled name, returning its index in the name table
    ///
    /// Pre-link operands of `FUNC`, `GVAR`, class and method references are
    /// indices into this table; the linker resolves them.
    pub fn add_mangled_name(&mut self, name: impl Into<String>) -> Word {
        let name = name.into();
        if let Some(&idx) = self.mangled_name_index.get(&name) {
            return idx;
        }
        let idx = self.mangled_names.len() as Word;
        self.mangled_name_index.insert(name.clone(), idx);
        self.mangled_names.push(name);
        idx
    }

    /// The mangled name at `idx` in the name table
    pub fn mangled_name(&self, idx: Word) -> &str {
        &self.mangled_names[idx as usize]
    }

    /// The whole mangled-name table
    pub fn mangled_names(&self) -> &[String] {
        &self.mangled_names
    }

    // ===== Pre-link definitions =====

    /// Add a function definition under its mangled name
    pub fn add_function(&mut self, mangled: impl Into<String>, def: Definition) {
        self.functions.insert(mangled.into(), def);
    }

    /// All function definitions in deterministic order
    pub fn functions(&self) -> &BTreeMap<String, Definition> {
        &self.functions
    }

    /// Add a global-variable definition under its mangled name
    ///
    /// The body is the initialiser: either a literal or a `FUNC` reference.
    pub fn add_global_var(&mut self, mangled: impl Into<String>, def: Definition) {
        self.global_vars.insert(mangled.into(), def);
    }

    /// All global-variable definitions in deterministic order
    pub fn global_vars(&self) -> &BTreeMap<String, Definition> {
        &self.global_vars
    }

    /// Remove the function with the given mangled name
    pub fn remove_function(&mut self, name: &str) {
        self.functions.remove(name);
    }

    /// Remove the global variable with the given mangled name
    pub fn remove_global_var(&mut self, name: &str) {
        self.global_vars.remove(name);
    }

    /// Remove the class with the given mangled name
    pub fn remove_class(&mut self, name: &str) {
        self.sclass_table.remove(name);
    }

    /// Remove the function, variable or class with the given mangled name
    pub fn remove_definition(&mut self, name: &str) {
        self.remove_function(name);
        self.remove_global_var(name);
        self.remove_class(name);
    }

    // ===== Classes =====

    /// Add a pre-link class description
    pub fn add_sclass(&mut self, mangled: impl Into<String>, info: SClassInfo) {
        self.sclass_table.insert(mangled.into(), info);
    }

    /// The pre-link class description for `mangled`, if any
    pub fn sclass(&self, mangled: &str) -> Option<&SClassInfo> {
        self.sclass_table.get(mangled)
    }

    /// The whole pre-link class table
    pub fn sclass_table(&self) -> &FxHashMap<String, SClassInfo> {
        &self.sclass_table
    }

    /// Add a post-link class
    pub fn add_class(&mut self, id: ClassId, info: ClassInfo) {
        self.class_table.insert(id, info);
    }

    /// The post-link class for `id`
    ///
    /// # Panics
    ///
    /// Panics if the class does not exist; the linker guarantees every
    /// referenced id does.
    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.class_table[&id]
    }

    /// Whether a post-link class exists for `id`
    pub fn class_exists(&self, id: ClassId) -> bool {
        self.class_table.contains_key(&id)
    }

    /// Install one vtable entry on a post-link class
    pub fn set_vtable_entry(&mut self, class_id: ClassId, method_id: MethodId, pc: Pc) {
        if let Some(info) = self.class_table.get_mut(&class_id) {
            info.vtable.insert(method_id, pc);
        }
    }

    /// Set the finaliser entry PC of a post-link class
    pub fn set_class_finalizer(&mut self, class_id: ClassId, pc: Pc) {
        if let Some(info) = self.class_table.get_mut(&class_id) {
            info.finalizer_pc = pc;
        }
    }

    /// The finaliser entry PC of `class_id`, 0 when absent
    pub fn class_finalizer(&self, class_id: ClassId) -> Pc {
        self.class_table.get(&class_id).map_or(0, |c| c.finalizer_pc)
    }

    /// The whole post-link class table
    pub fn class_table(&self) -> &FxHashMap<ClassId, ClassInfo> {
        &self.class_table
    }

    // ===== Main and global init =====

    /// Set the mangled name of this package's `main`
    pub fn set_main_mangled_name(&mut self, name: impl Into<String>) {
        self.main_mangled_name = name.into();
    }

    /// The mangled name of `main`, empty if the package has none
    pub fn main_mangled_name(&self) -> &str {
        &self.main_mangled_name
    }

    /// Set the number of arguments `main` expects
    pub fn set_main_expected_args(&mut self, n: usize) {
        self.main_expected_args = n;
    }

    /// The number of arguments `main` expects, 0 when there is no `main`
    pub fn main_expected_args(&self) -> usize {
        self.main_expected_args
    }

    /// Set the linked entry PC of `main`; written by the linker
    pub fn set_main_pc(&mut self, pc: Pc) {
        self.main_pc = pc;
    }

    /// The linked entry PC of `main`, 0 when absent
    pub fn main_pc(&self) -> Pc {
        self.main_pc
    }

    /// Set the mangled name of this package's global-init function
    pub fn set_global_init_func(&mut self, name: impl Into<String>) {
        self.global_init_func = name.into();
    }

    /// The mangled name of the global-init function, empty when absent
    pub fn global_init_func(&self) -> &str {
        &self.global_init_func
    }

    /// Set the mangled name of the global-init-literal function
    pub fn set_global_init_literal_func(&mut self, name: impl Into<String>) {
        self.global_init_literal_func = name.into();
    }

    /// The mangled name of the global-init-literal function, empty when absent
    pub fn global_init_literal_func(&self) -> &str {
        &self.global_init_literal_func
    }

    /// Total number of global slots in the linked image
    pub fn num_global_vars(&self) -> usize {
        self.num_global_vars
    }

    /// Set the total number of global slots; written by the linker
    pub fn set_num_global_vars(&mut self, n: usize) {
        self.num_global_vars = n;
    }

    // ===== Default functions =====

    /// The entry PC of a default function, 0 when it was not linked
    pub fn default_function_pc(&self, kind: DefaultFunctionKind) -> Pc {
        self.default_func_ptrs[kind as usize]
    }

    /// The whole default-function table
    pub fn default_func_ptrs(&self) -> &[Pc; DEFAULT_FUNCTION_COUNT] {
        &self.default_func_ptrs
    }

    /// Resolve the default-function table from a name-to-PC map
    pub fn link_default_functions(&mut self, mangled_to_pc: &FxHashMap<String, Pc>) {
        for kind in DefaultFunctionKind::ALL {
            if let Some(&pc) = mangled_to_pc.get(kind.mangled_name()) {
                self.default_func_ptrs[kind as usize] = pc;
            }
            // else: the interpreter runs without core linked
        }
        if let Some(&pc) = mangled_to_pc.get(&self.main_mangled_name) {
            self.main_pc = pc;
        }
    }

    // ===== Linked buffer =====

    /// The linked program buffer
    pub fn linked(&self) -> &Definition {
        &self.linked
    }

    /// Mutable access to the linked program buffer; linker and playground only
    pub fn linked_mut(&mut self) -> &mut Definition {
        &mut self.linked
    }

    /// Read the word at `index` of the linked buffer
    #[inline]
    pub fn get(&self, index: Pc) -> Word {
        self.linked.get(index)
    }

    /// Read the 64-bit value at `index` of the linked buffer
    #[inline]
    pub fn get_u64(&self, index: Pc) -> u64 {
        self.linked.get_u64(index)
    }

    /// Overwrite the word at `index` of the linked buffer
    pub fn set(&mut self, index: Pc, value: Word) {
        self.linked.set(index, value);
    }

    /// Overwrite the word at `index` of the linked buffer with an opcode
    pub fn set_op(&mut self, index: Pc, op: OpCode) {
        self.linked.set_op(index, op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_u64_little_endian() {
        let mut def = Definition::new();
        def.push_u64(0x1122_3344_5566_7788);
        assert_eq!(def.get(0), 0x5566_7788);
        assert_eq!(def.get(1), 0x1122_3344);
        assert_eq!(def.get_u64(0), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_definition_emit() {
        let mut def = Definition::new();
        def.push_op(OpCode::Int32);
        def.push(42);
        def.push_op(OpCode::Return);
        assert_eq!(def.size(), 3);
        assert_eq!(def.next_index(), 3);
        assert_eq!(OpCode::from_u32(def.get(0)), Some(OpCode::Int32));
        assert_eq!(def.get(1), 42);
        assert_eq!(OpCode::from_u32(def.get(2)), Some(OpCode::Return));
    }

    #[test]
    fn test_definition_patching() {
        let mut def = Definition::new();
        def.push_op(OpCode::Jump);
        def.push(0);
        def.push_op(OpCode::Exit);
        def.set(1, 2);
        assert_eq!(def.get(1), 2);
        def.set_op(2, OpCode::Abort);
        assert_eq!(OpCode::from_u32(def.get(2)), Some(OpCode::Abort));
    }

    #[test]
    fn test_annotations() {
        let mut def = Definition::new();
        def.push_op(OpCode::Unit);
        def.add_mangled_name_annotation(0, "pkg::f");
        def.add_code_position_annotation(0, CodePosition { file_id: 1, line: 3, column: 7 });
        assert_eq!(def.mangled_name_annotation(0), Some("pkg::f"));
        assert_eq!(def.code_position_annotation(0).line, 3);
        assert_eq!(def.mangled_name_annotation(5), None);
        assert!(def.code_position_annotation(5).is_zero());
    }

    #[test]
    fn test_pool_interning() {
        let mut bchir = Bchir::new("test");
        let a = bchir.add_string("hello");
        let b = bchir.add_string("world");
        let c = bchir.add_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(bchir.string(a), "hello");
        assert_eq!(bchir.string(b), "world");

        let f = bchir.add_file_name("lib.cj");
        assert_eq!(bchir.add_file_name("lib.cj"), f);
        assert_eq!(bchir.file_name(f), "lib.cj");

        let ty = TypeRef { name: "Int64".into(), kind: TypeKind::Int64 };
        let t = bchir.add_type(ty.clone());
        assert_eq!(bchir.add_type(ty), t);
        assert_eq!(bchir.type_at(t).kind, TypeKind::Int64);
    }

    #[test]
    fn test_mangled_name_table() {
        let mut bchir = Bchir::new("test");
        let f = bchir.add_mangled_name("pkg::f");
        let g = bchir.add_mangled_name("pkg::g");
        assert_eq!(bchir.add_mangled_name("pkg::f"), f);
        assert_eq!(bchir.mangled_name(g), "pkg::g");
    }

    #[test]
    fn test_deterministic_function_order() {
        let mut bchir = Bchir::new("test");
        bchir.add_function("pkg::z", Definition::new());
        bchir.add_function("pkg::a", Definition::new());
        bchir.add_function("pkg::m", Definition::new());
        let names: Vec<_> = bchir.functions().keys().cloned().collect();
        assert_eq!(names, vec!["pkg::a", "pkg::m", "pkg::z"]);
    }

    #[test]
    fn test_default_function_linking() {
        let mut bchir = Bchir::new("test");
        bchir.set_main_mangled_name("pkg::main");
        let mut map = FxHashMap::default();
        map.insert(DefaultFunctionKind::CheckIsError.mangled_name().to_string(), 17 as Pc);
        map.insert("pkg::main".to_string(), 99 as Pc);
        bchir.link_default_functions(&map);
        assert_eq!(bchir.default_function_pc(DefaultFunctionKind::CheckIsError), 17);
        assert_eq!(bchir.default_function_pc(DefaultFunctionKind::ThrowError), 0);
        assert_eq!(bchir.main_pc(), 99);
    }

    #[test]
    fn test_class_table() {
        let mut bchir = Bchir::new("test");
        let mut info = ClassInfo { mangled_name: "pkg::A".into(), ..Default::default() };
        info.super_classes.insert(3);
        bchir.add_class(7, info);
        assert!(bchir.class_exists(7));
        assert!(!bchir.class_exists(8));
        bchir.set_vtable_entry(7, 2, 123);
        bchir.set_class_finalizer(7, 55);
        assert_eq!(bchir.class(7).vtable[&2], 123);
        assert_eq!(bchir.class_finalizer(7), 55);
        assert_eq!(bchir.class_finalizer(8), 0);
    }
}
