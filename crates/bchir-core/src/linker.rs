//! BCHIR linker
//!
//! Merges per-package images into one linked program: assigns class,
//! method and global ids, rebases function-local jump targets, remaps the
//! string/type/file pools, resolves `FUNC` and vtable references by
//! mangled name (patching forward references), synthesises the global-init
//! entry function, and reserves the two playground regions the interpreter
//! writes helper-call snippets into.
//!
//! Function bodies follow the interpreter's calling convention: the body
//! starts with `FRAME`, binds its arguments with `LVAR_SET`, drops the
//! callee slot, and leaves its result on the argument stack at `RETURN`.

use rustc_hash::FxHashMap;
use thiserror::Error;

use bchir_bytecode::{
    Bchir, ClassId, ClassInfo, Definition, GlobalId, MethodId, OpCode, Pc, Word,
};

use crate::interp::{EXTERNAL_PLAYGROUND_SIZE, INTERNAL_PLAYGROUND_SIZE};
use crate::value::IVal;

/// Errors detected while linking
#[derive(Debug, Error)]
pub enum LinkError {
    /// The same mangled name is defined by two packages
    #[error("duplicate symbol '{0}' across packages")]
    DuplicateSymbol(String),

    /// A definition's bytecode could not be decoded
    #[error("malformed bytecode in '{name}' at offset {offset}: {reason}")]
    MalformedDefinition {
        /// Mangled name of the definition
        name: String,
        /// Word offset of the undecodable instruction
        offset: Pc,
        /// What went wrong
        reason: &'static str,
    },

    /// A global initialiser that is neither a literal nor a function
    #[error("global '{0}' has an unsupported initialiser")]
    BadGlobalInit(String),

    /// A class names a superclass that no package defines
    #[error("class '{class}' names undefined superclass '{superclass}'")]
    MissingSuperclass {
        /// The defining class
        class: String,
        /// The missing superclass
        superclass: String,
    },
}

/// Everything the driver needs after a successful link
#[derive(Debug, Default)]
pub struct LinkOutput {
    /// Values of const-initialised globals, to be installed through
    /// `Interpreter::set_global_vars`
    pub const_global_inits: FxHashMap<GlobalId, IVal>,
    /// Entry PC of the synthetic init function; run before `main`
    pub top_level_pc: Pc,
    /// Base of the interpreter's internal playground
    pub playground_base: Pc,
    /// Base of the external playground the driver may write into
    pub external_playground_base: Pc,
}

/// The linker's symbol tables, for API-level queries by the lowering pass
/// and the interpreter's diagnostics
#[derive(Debug, Clone, Default)]
pub struct LinkSymbols {
    /// Mangled name to linked function entry PC
    pub funcs: FxHashMap<String, Pc>,
    /// Mangled name to global id
    pub gvars: FxHashMap<String, GlobalId>,
    /// Mangled name to class id
    pub classes: FxHashMap<String, ClassId>,
    /// Method name to method id
    pub methods: FxHashMap<String, MethodId>,
}

struct PendingClass {
    id: ClassId,
    mangled_name: String,
    super_closure: Vec<ClassId>,
    // method id -> implementing function's mangled name
    vtable: Vec<(MethodId, String)>,
    finalizer: String,
}

/// Merges an ordered list of package images into `top`
pub struct Linker<'a> {
    top: &'a mut Bchir,
    name_to_func_pc: FxHashMap<String, Pc>,
    pending_func_refs: FxHashMap<String, Vec<Pc>>,
    name_to_gvar: FxHashMap<String, GlobalId>,
    next_gvar: GlobalId,
    name_to_class: FxHashMap<String, ClassId>,
    next_class: ClassId,
    name_to_method: FxHashMap<String, MethodId>,
    next_method: MethodId,
    pending_classes: Vec<PendingClass>,
    dummy_abort_pc: Pc,
}

struct RemapTables {
    files: Vec<Word>,
    types: Vec<Word>,
    strings: Vec<Word>,
}

impl<'a> Linker<'a> {
    /// Create a linker that writes the merged program into `top`
    pub fn new(top: &'a mut Bchir) -> Self {
        Self {
            top,
            name_to_func_pc: FxHashMap::default(),
            pending_func_refs: FxHashMap::default(),
            name_to_gvar: FxHashMap::default(),
            next_gvar: 0,
            name_to_class: FxHashMap::default(),
            next_class: 0,
            name_to_method: FxHashMap::default(),
            next_method: 0,
            pending_classes: Vec::new(),
            dummy_abort_pc: 0,
        }
    }

    /// Link `packages` in dependency order (dependencies first)
    pub fn run(&mut self, packages: &[Bchir]) -> Result<LinkOutput, LinkError> {
        let mut output = LinkOutput::default();

        // index 0 must never be a valid entry: 0 means "function absent"
        self.top.linked_mut().push_op(OpCode::Invalid);
        self.generate_dummy_abort_function();

        // superclass chains may cross package boundaries
        let mut merged_classes: FxHashMap<&str, &bchir_bytecode::SClassInfo> =
            FxHashMap::default();
        for package in packages {
            for (name, info) in package.sclass_table() {
                merged_classes.insert(name.as_str(), info);
            }
        }
        for package in packages {
            self.collect_classes(package, &merged_classes)?;
        }
        for package in packages {
            self.collect_globals(package);
        }

        let remaps: Vec<RemapTables> =
            packages.iter().map(|p| self.build_remaps(p)).collect();
        for (package, maps) in packages.iter().zip(&remaps) {
            self.link_functions(package, maps)?;
        }

        output.top_level_pc = self.top.linked().next_index();
        for package in packages {
            self.link_and_init_global_vars(package, &mut output)?;
        }
        for package in packages {
            for name in &package.init_funcs_for_consts {
                let pc = self.func_pc_or_abort(name);
                self.emit_call_for_effect(pc);
            }
        }
        self.top.linked_mut().push_op(OpCode::Exit);

        self.resolve_pending_refs();
        self.finalize_classes();

        for package in packages {
            if !package.main_mangled_name().is_empty() {
                self.top.set_main_mangled_name(package.main_mangled_name());
                self.top.set_main_expected_args(package.main_expected_args());
            }
        }
        let resolved = self.name_to_func_pc.clone();
        self.top.link_default_functions(&resolved);
        self.top.set_num_global_vars(self.next_gvar as usize);

        output.playground_base = self.reserve_playground(INTERNAL_PLAYGROUND_SIZE);
        output.external_playground_base = self.reserve_playground(EXTERNAL_PLAYGROUND_SIZE);
        Ok(output)
    }

    // ===== Symbol tables =====

    /// The linked entry PC of a function, if it was defined
    pub fn func_pc(&self, mangled: &str) -> Option<Pc> {
        self.name_to_func_pc.get(mangled).copied()
    }

    /// The global id assigned to a mangled name, if any
    pub fn gvar_id(&self, mangled: &str) -> Option<GlobalId> {
        self.name_to_gvar.get(mangled).copied()
    }

    /// The class id assigned to a mangled name, if any
    pub fn class_id(&self, mangled: &str) -> Option<ClassId> {
        self.name_to_class.get(mangled).copied()
    }

    /// The method id assigned to a method name, if any
    pub fn method_id(&self, name: &str) -> Option<MethodId> {
        self.name_to_method.get(name).copied()
    }

    /// Snapshot of every symbol table, for queries after linking
    pub fn symbols(&self) -> LinkSymbols {
        LinkSymbols {
            funcs: self.name_to_func_pc.clone(),
            gvars: self.name_to_gvar.clone(),
            classes: self.name_to_class.clone(),
            methods: self.name_to_method.clone(),
        }
    }

    fn fresh_gvar_id(&mut self, name: &str) -> GlobalId {
        if let Some(&id) = self.name_to_gvar.get(name) {
            return id;
        }
        let id = self.next_gvar;
        self.next_gvar += 1;
        self.name_to_gvar.insert(name.to_string(), id);
        id
    }

    fn get_class_id(&mut self, name: &str) -> ClassId {
        if let Some(&id) = self.name_to_class.get(name) {
            return id;
        }
        let id = self.next_class;
        self.next_class += 1;
        self.name_to_class.insert(name.to_string(), id);
        id
    }

    fn get_method_id(&mut self, name: &str) -> MethodId {
        if let Some(&id) = self.name_to_method.get(name) {
            return id;
        }
        let id = self.next_method;
        self.next_method += 1;
        self.name_to_method.insert(name.to_string(), id);
        id
    }

    // ===== Phases =====

    /// A function of the form `FRAME 0 :: ABORT`, used as the target of
    /// references to genuinely absent functions
    fn generate_dummy_abort_function(&mut self) {
        let def = self.top.linked_mut();
        self.dummy_abort_pc = def.next_index();
        def.push_op(OpCode::Frame);
        def.push(0);
        def.push_op(OpCode::Abort);
    }

    fn collect_classes(
        &mut self,
        package: &Bchir,
        merged: &FxHashMap<&str, &bchir_bytecode::SClassInfo>,
    ) -> Result<(), LinkError> {
        // deterministic id assignment: sorted by mangled name
        let mut names: Vec<&String> = package.sclass_table().keys().collect();
        names.sort();
        for name in names {
            let info = package.sclass_table().get(name).expect("just listed");
            let id = self.get_class_id(name);
            let mut closure = Vec::new();
            self.superclass_closure(merged, name, &mut closure)?;
            let mut vtable = Vec::new();
            for (method_name, impl_name) in &info.vtable {
                let method_id = self.get_method_id(method_name);
                vtable.push((method_id, impl_name.clone()));
            }
            self.pending_classes.push(PendingClass {
                id,
                mangled_name: name.clone(),
                super_closure: closure,
                vtable,
                finalizer: info.finalizer.clone(),
            });
        }
        Ok(())
    }

    fn superclass_closure(
        &mut self,
        merged: &FxHashMap<&str, &bchir_bytecode::SClassInfo>,
        name: &str,
        out: &mut Vec<ClassId>,
    ) -> Result<(), LinkError> {
        let Some(info) = merged.get(name) else {
            return Ok(());
        };
        for superclass in &info.super_classes {
            if !merged.contains_key(superclass.as_str()) {
                return Err(LinkError::MissingSuperclass {
                    class: name.to_string(),
                    superclass: superclass.clone(),
                });
            }
            let id = self.get_class_id(superclass);
            if !out.contains(&id) {
                out.push(id);
                self.superclass_closure(merged, superclass, out)?;
            }
        }
        Ok(())
    }

    fn collect_globals(&mut self, package: &Bchir) {
        for name in package.global_vars().keys() {
            self.fresh_gvar_id(name);
        }
    }

    fn build_remaps(&mut self, package: &Bchir) -> RemapTables {
        RemapTables {
            files: package
                .file_names()
                .iter()
                .map(|f| self.top.add_file_name(f.clone()))
                .collect(),
            types: package
                .types()
                .iter()
                .map(|t| self.top.add_type(t.clone()))
                .collect(),
            strings: package
                .strings()
                .iter()
                .map(|s| self.top.add_string(s.clone()))
                .collect(),
        }
    }

    fn link_functions(&mut self, package: &Bchir, maps: &RemapTables)
        -> Result<(), LinkError> {
        for (name, def) in package.functions() {
            let entry = self.top.linked().next_index();
            if self.name_to_func_pc.insert(name.clone(), entry).is_some() {
                return Err(LinkError::DuplicateSymbol(name.clone()));
            }
            self.top.linked_mut().add_mangled_name_annotation(entry, name.clone());
            self.traverse_and_link(package, name, def, maps)?;
            self.resolve_func_refs(name, entry);
        }
        Ok(())
    }

    /// Append one definition to the linked buffer, rebasing jump targets
    /// and translating name and pool references
    fn traverse_and_link(
        &mut self,
        package: &Bchir,
        name: &str,
        def: &Definition,
        maps: &RemapTables,
    ) -> Result<(), LinkError> {
        let base = self.top.linked().next_index();
        self.top.linked_mut().append(def);
        for (&idx, mangled) in def.mangled_name_annotations() {
            self.top.linked_mut().add_mangled_name_annotation(base + idx, mangled.clone());
        }
        for (&idx, pos) in def.code_position_annotations() {
            let mut pos = *pos;
            pos.file_id = maps.files.get(pos.file_id as usize).copied().unwrap_or(0);
            self.top.linked_mut().add_code_position_annotation(base + idx, pos);
        }

        let malformed = |offset: Pc, reason: &'static str| LinkError::MalformedDefinition {
            name: name.to_string(),
            offset,
            reason,
        };

        let mut i: Pc = 0;
        while (i as usize) < def.size() {
            let word = def.get(i);
            let op = OpCode::from_u32(word).ok_or_else(|| malformed(i, "invalid opcode"))?;
            let mut len = op.width() + op.has_exception_handler() as Pc;
            match op {
                OpCode::String => {
                    let old = def.get(i + 1) as usize;
                    let new = *maps
                        .strings
                        .get(old)
                        .ok_or_else(|| malformed(i, "string index out of range"))?;
                    self.top.set(base + i + 1, new);
                }
                OpCode::Func => {
                    let name_idx = def.get(i + 1);
                    let target = package.mangled_name(name_idx).to_string();
                    self.patch_func_ref(base + i + 1, &target);
                }
                OpCode::Gvar | OpCode::GvarSet => {
                    let name_idx = def.get(i + 1);
                    let target = package.mangled_name(name_idx).to_string();
                    let id = self.fresh_gvar_id(&target);
                    self.top.set(base + i + 1, id);
                }
                OpCode::Instanceof | OpCode::Box => {
                    let name_idx = def.get(i + 1);
                    let target = package.mangled_name(name_idx).to_string();
                    let id = self.get_class_id(&target);
                    self.top.set(base + i + 1, id);
                }
                OpCode::AllocateClass | OpCode::AllocateClassExc => {
                    let name_idx = def.get(i + 1);
                    let target = package.mangled_name(name_idx).to_string();
                    let id = self.get_class_id(&target);
                    self.top.set(base + i + 1, id);
                }
                OpCode::Object => {
                    let name_idx = def.get(i + 2);
                    let target = package.mangled_name(name_idx).to_string();
                    let id = self.get_class_id(&target);
                    self.top.set(base + i + 2, id);
                }
                OpCode::Invoke | OpCode::InvokeExc => {
                    let name_idx = def.get(i + 2);
                    let target = package.mangled_name(name_idx).to_string();
                    let id = self.get_method_id(&target);
                    self.top.set(base + i + 2, id);
                }
                OpCode::Intrinsic1
                | OpCode::Intrinsic1Exc
                | OpCode::Intrinsic2
                | OpCode::Intrinsic2Exc => {
                    let old = def.get(i + 2) as usize;
                    // the type immediate may be unused for some kinds
                    if let Some(&new) = maps.types.get(old) {
                        self.top.set(base + i + 2, new);
                    }
                }
                OpCode::Jump => {
                    self.top.set(base + i + 1, def.get(i + 1) + base);
                }
                OpCode::Branch => {
                    self.top.set(base + i + 1, def.get(i + 1) + base);
                    self.top.set(base + i + 2, def.get(i + 2) + base);
                }
                OpCode::Switch => {
                    let cases = def.get(i + 2);
                    let targets_base = i + 3 + cases * 2;
                    for t in 0..=cases {
                        self.top.set(base + targets_base + t, def.get(targets_base + t) + base);
                    }
                    len = 4 + cases * 3;
                }
                OpCode::FieldTpl | OpCode::GetRef | OpCode::StoreInRef => {
                    len = 2 + def.get(i + 1);
                }
                _ => {}
            }
            if op.has_exception_handler() {
                let handler_slot = i + op.width();
                self.top.set(base + handler_slot, def.get(handler_slot) + base);
            }
            i += len;
        }
        Ok(())
    }

    fn patch_func_ref(&mut self, slot: Pc, target: &str) {
        match self.name_to_func_pc.get(target) {
            Some(&pc) => self.top.set(slot, pc),
            None => {
                self.pending_func_refs.entry(target.to_string()).or_default().push(slot);
            }
        }
    }

    fn resolve_func_refs(&mut self, name: &str, entry: Pc) {
        if let Some(slots) = self.pending_func_refs.remove(name) {
            for slot in slots {
                self.top.set(slot, entry);
            }
        }
    }

    fn resolve_pending_refs(&mut self) {
        // anything still unresolved is genuinely absent from the program
        let pending = std::mem::take(&mut self.pending_func_refs);
        for slots in pending.into_values() {
            for slot in slots {
                self.top.set(slot, self.dummy_abort_pc);
            }
        }
    }

    fn func_pc_or_abort(&self, name: &str) -> Pc {
        self.name_to_func_pc.get(name).copied().unwrap_or(self.dummy_abort_pc)
    }

    fn emit_call_for_effect(&mut self, pc: Pc) {
        let def = self.top.linked_mut();
        def.push_op(OpCode::Func);
        def.push(pc);
        def.push_op(OpCode::Apply);
        def.push(0);
        def.push_op(OpCode::Drop);
    }

    /// Decode one global initialiser: a single literal, or a `FUNC`
    /// reference to the function computing the value
    fn link_and_init_global_vars(
        &mut self,
        package: &Bchir,
        output: &mut LinkOutput,
    ) -> Result<(), LinkError> {
        for (name, def) in package.global_vars() {
            if def.size() == 0 {
                continue;
            }
            let id = self.fresh_gvar_id(name);
            let word = def.get(0);
            let op = OpCode::from_u32(word).ok_or_else(|| LinkError::MalformedDefinition {
                name: name.clone(),
                offset: 0,
                reason: "invalid opcode",
            })?;
            if op == OpCode::Func {
                let name_idx = def.get(1);
                let target = package.mangled_name(name_idx);
                let pc = self.func_pc_or_abort(target);
                let top_def = self.top.linked_mut();
                top_def.push_op(OpCode::Func);
                top_def.push(pc);
                top_def.push_op(OpCode::Apply);
                top_def.push(0);
                top_def.push_op(OpCode::GvarSet);
                top_def.push(id);
                continue;
            }
            let value = decode_literal(package, def)
                .ok_or_else(|| LinkError::BadGlobalInit(name.clone()))?;
            output.const_global_inits.insert(id, value);
        }
        if !package.global_init_func().is_empty() {
            let pc = self.func_pc_or_abort(package.global_init_func());
            self.emit_call_for_effect(pc);
        }
        if !package.global_init_literal_func().is_empty() {
            let pc = self.func_pc_or_abort(package.global_init_literal_func());
            self.emit_call_for_effect(pc);
        }
        Ok(())
    }

    fn finalize_classes(&mut self) {
        let pending = std::mem::take(&mut self.pending_classes);
        for class in pending {
            let mut info = ClassInfo {
                mangled_name: class.mangled_name,
                finalizer_pc: 0,
                ..Default::default()
            };
            info.super_classes.extend(class.super_closure);
            for (method_id, impl_name) in class.vtable {
                let pc = self.func_pc_or_abort(&impl_name);
                info.vtable.insert(method_id, pc);
            }
            if !class.finalizer.is_empty() {
                info.finalizer_pc = self.func_pc_or_abort(&class.finalizer);
            }
            self.top.add_class(class.id, info);
        }
    }

    fn reserve_playground(&mut self, size: usize) -> Pc {
        let def = self.top.linked_mut();
        let base = def.next_index();
        for _ in 0..size {
            def.push_op(OpCode::Invalid);
        }
        base
    }
}

/// Decode the single-literal initialiser of a const global
fn decode_literal(package: &Bchir, def: &Definition) -> Option<IVal> {
    let op = OpCode::from_u32(def.get(0))?;
    let val = match op {
        OpCode::Uint8 => IVal::UInt8(def.get(1) as u8),
        OpCode::Uint16 => IVal::UInt16(def.get(1) as u16),
        OpCode::Uint32 => IVal::UInt32(def.get(1)),
        OpCode::Uint64 => IVal::UInt64(def.get_u64(1)),
        OpCode::Uintnat => IVal::UIntNat(def.get_u64(1) as usize),
        OpCode::Int8 => IVal::Int8(def.get(1) as i8),
        OpCode::Int16 => IVal::Int16(def.get(1) as i16),
        OpCode::Int32 => IVal::Int32(def.get(1) as i32),
        OpCode::Int64 => IVal::Int64(def.get_u64(1) as i64),
        OpCode::Intnat => IVal::IntNat(def.get_u64(1) as i64 as isize),
        OpCode::Float16 => IVal::Float16(f32::from_bits(def.get(1))),
        OpCode::Float32 => IVal::Float32(f32::from_bits(def.get(1))),
        OpCode::Float64 => IVal::Float64(f64::from_bits(def.get_u64(1))),
        OpCode::Rune => IVal::Rune(def.get(1)),
        OpCode::Bool => IVal::Bool(def.get(1) != 0),
        OpCode::Unit => IVal::Unit,
        OpCode::Nullptr => IVal::Nullptr,
        OpCode::String => {
            let idx = def.get(1) as usize;
            let s = package.strings().get(idx)?;
            IVal::string_to_array(s)
        }
        _ => return None,
    };
    Some(val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bchir_bytecode::{SClassInfo, TypeKind, TypeRef};

    fn literal_global(value: i64) -> Definition {
        let mut def = Definition::new();
        def.push_op(OpCode::Int64);
        def.push_u64(value as u64);
        def
    }

    #[test]
    fn test_pool_remapping_dedups() {
        let mut a = Bchir::new("a");
        a.add_string("shared");
        a.add_string("only-a");
        a.add_file_name("a.cj");
        let mut b = Bchir::new("b");
        b.add_string("shared");
        b.add_file_name("a.cj");
        b.add_type(TypeRef { name: "Int64".into(), kind: TypeKind::Int64 });

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        linker.run(&[a, b]).unwrap();

        assert_eq!(top.strings().iter().filter(|s| *s == "shared").count(), 1);
        assert_eq!(top.file_names().iter().filter(|f| *f == "a.cj").count(), 1);
        assert_eq!(top.types().len(), 1);
    }

    #[test]
    fn test_const_globals_are_captured() {
        let mut pkg = Bchir::new("pkg");
        pkg.add_global_var("pkg::answer", literal_global(42));
        pkg.add_global_var("pkg::zero", literal_global(0));

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        let output = linker.run(&[pkg]).unwrap();

        let answer = linker.gvar_id("pkg::answer").unwrap();
        let zero = linker.gvar_id("pkg::zero").unwrap();
        assert_eq!(top.num_global_vars(), 2);
        assert_eq!(output.const_global_inits[&answer], IVal::Int64(42));
        assert_eq!(output.const_global_inits[&zero], IVal::Int64(0));
    }

    #[test]
    fn test_duplicate_symbol_is_an_error() {
        let mut a = Bchir::new("a");
        let mut def = Definition::new();
        def.push_op(OpCode::Return);
        a.add_function("pkg::f", def.clone());
        let mut b = Bchir::new("b");
        b.add_function("pkg::f", def);

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        assert!(matches!(linker.run(&[a, b]), Err(LinkError::DuplicateSymbol(_))));
    }

    #[test]
    fn test_forward_reference_is_patched() {
        // f refers to g, which is linked after f
        let mut pkg = Bchir::new("pkg");
        let g_ref = pkg.add_mangled_name("pkg::g");
        let mut f = Definition::new();
        f.push_op(OpCode::Func);
        f.push(g_ref);
        f.push_op(OpCode::Return);
        pkg.add_function("pkg::f", f);
        let mut g = Definition::new();
        g.push_op(OpCode::Return);
        pkg.add_function("pkg::g", g);

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        linker.run(&[pkg]).unwrap();

        let f_pc = linker.func_pc("pkg::f").unwrap();
        let g_pc = linker.func_pc("pkg::g").unwrap();
        assert_eq!(OpCode::from_u32(top.get(f_pc)), Some(OpCode::Func));
        assert_eq!(top.get(f_pc + 1), g_pc);
    }

    #[test]
    fn test_absent_function_falls_back_to_abort() {
        let mut pkg = Bchir::new("pkg");
        let missing = pkg.add_mangled_name("pkg::missing");
        let mut f = Definition::new();
        f.push_op(OpCode::Func);
        f.push(missing);
        f.push_op(OpCode::Return);
        pkg.add_function("pkg::f", f);

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        linker.run(&[pkg]).unwrap();

        let f_pc = linker.func_pc("pkg::f").unwrap();
        let abort_target = top.get(f_pc + 1);
        assert_eq!(OpCode::from_u32(top.get(abort_target)), Some(OpCode::Frame));
        assert_eq!(OpCode::from_u32(top.get(abort_target + 2)), Some(OpCode::Abort));
    }

    #[test]
    fn test_jump_targets_are_rebased() {
        let mut pkg = Bchir::new("pkg");
        let mut f = Definition::new();
        f.push_op(OpCode::Jump); // 0
        f.push(3); // -> the RETURN below, function-local
        f.push_op(OpCode::Unit); // 2, skipped
        f.push_op(OpCode::Return); // 3
        pkg.add_function("pkg::f", f);

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        linker.run(&[pkg]).unwrap();

        let f_pc = linker.func_pc("pkg::f").unwrap();
        assert_eq!(top.get(f_pc + 1), f_pc + 3);
    }

    #[test]
    fn test_class_ids_and_vtables() {
        let mut pkg = Bchir::new("pkg");
        let mut base = SClassInfo::default();
        base.vtable.insert("foo".into(), "pkg::A::foo".into());
        pkg.add_sclass("pkg::A", base);
        let mut derived = SClassInfo::default();
        derived.super_classes.push("pkg::A".into());
        derived.vtable.insert("foo".into(), "pkg::B::foo".into());
        pkg.add_sclass("pkg::B", derived);

        let mut foo_a = Definition::new();
        foo_a.push_op(OpCode::Return);
        pkg.add_function("pkg::A::foo", foo_a);
        let mut foo_b = Definition::new();
        foo_b.push_op(OpCode::Return);
        pkg.add_function("pkg::B::foo", foo_b);

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        linker.run(&[pkg]).unwrap();

        let a = linker.class_id("pkg::A").unwrap();
        let b = linker.class_id("pkg::B").unwrap();
        let foo = linker.method_id("foo").unwrap();
        let foo_a_pc = linker.func_pc("pkg::A::foo").unwrap();
        let foo_b_pc = linker.func_pc("pkg::B::foo").unwrap();
        assert!(top.class(b).super_classes.contains(&a));
        assert!(!top.class(a).super_classes.contains(&b));
        assert_eq!(top.class(a).vtable[&foo], foo_a_pc);
        assert_eq!(top.class(b).vtable[&foo], foo_b_pc);
    }

    #[test]
    fn test_missing_superclass_is_an_error() {
        let mut pkg = Bchir::new("pkg");
        let mut derived = SClassInfo::default();
        derived.super_classes.push("pkg::Gone".into());
        pkg.add_sclass("pkg::B", derived);

        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        assert!(matches!(
            linker.run(&[pkg]),
            Err(LinkError::MissingSuperclass { .. })
        ));
    }

    #[test]
    fn test_playgrounds_reserved() {
        let mut top = Bchir::new("top");
        let mut linker = Linker::new(&mut top);
        let output = linker.run(&[Bchir::new("pkg")]).unwrap();
        assert!(output.playground_base > 0);
        assert_eq!(
            output.external_playground_base,
            output.playground_base + INTERNAL_PLAYGROUND_SIZE as Pc
        );
        assert_eq!(
            top.linked().size(),
            output.external_playground_base as usize + EXTERNAL_PLAYGROUND_SIZE
        );
    }
}
