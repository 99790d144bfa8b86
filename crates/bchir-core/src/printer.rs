//! Human-readable dumps of BCHIR images
//!
//! Renders per-instruction disassembly with annotation hints and section
//! dumps for classes, pools and the default-function table. Backs the
//! `-print-bchir` debug output; nothing here is normative for execution.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use bchir_bytecode::{
    Bchir, DefaultFunctionKind, Definition, IntrinsicKind, OpCode, OverflowStrategy, Pc,
    TypeKind, Word,
};

use crate::interp::GlobalOptions;

/// Split a mangled name into its qualifier and item parts
///
/// `std.core::Exception::toString` becomes `("std.core::Exception",
/// "toString")`; names without a qualifier keep an empty first component.
/// A trailing parameter list is dropped.
pub fn demangle_name(mangled: &str) -> (String, String) {
    let trimmed = mangled.strip_suffix("()").unwrap_or(mangled);
    match trimmed.rfind("::") {
        Some(pos) => (trimmed[..pos].to_string(), trimmed[pos + 2..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

/// Open the debug dump file `<output>/BCHIR_Debug/<package>_<stage>.bchir`
pub fn bchir_output_file(
    options: &GlobalOptions,
    package: &str,
    stage: &str,
) -> io::Result<fs::File> {
    let dir: PathBuf = options.output_dir.join("BCHIR_Debug");
    fs::create_dir_all(&dir)?;
    fs::File::create(dir.join(format!("{}_{}.bchir", package, stage)))
}

/// Renders one image to a writer
pub struct Printer<'a> {
    bchir: &'a Bchir,
}

impl<'a> Printer<'a> {
    /// Create a printer over `bchir`
    pub fn new(bchir: &'a Bchir) -> Self {
        Self { bchir }
    }

    /// Print the whole image under a header line
    pub fn print(&self, header: &str, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "+++ {}", header)?;
        if self.bchir.linked().size() > 0 {
            writeln!(out, "====== Linked bytecode ======")?;
            self.print_definition(self.bchir.linked(), out)?;
        } else {
            writeln!(out, "====== Global vars before linkage ======")?;
            for (mangled, def) in self.bchir.global_vars() {
                writeln!(out, "---- {}", mangled)?;
                self.print_definition(def, out)?;
            }
            writeln!(out, "====== Functions before linkage ======")?;
            for (mangled, def) in self.bchir.functions() {
                writeln!(out, "---- {}", mangled)?;
                self.print_definition(def, out)?;
            }
        }
        self.print_sections(out)
    }

    fn print_sections(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "====== Default functions ======")?;
        writeln!(out, "main mangled name: {}", self.bchir.main_mangled_name())?;
        writeln!(out, "main expected arguments: {}", self.bchir.main_expected_args())?;
        if self.bchir.linked().size() > 0 {
            for kind in DefaultFunctionKind::ALL {
                writeln!(out, "{}: {}", kind.name(), self.bchir.default_function_pc(kind))?;
            }
        }
        if !self.bchir.strings().is_empty() {
            writeln!(out, "====== Strings ======")?;
            for (i, s) in self.bchir.strings().iter().enumerate() {
                writeln!(out, "{}: {:?}", i, s)?;
            }
        }
        if !self.bchir.types().is_empty() {
            writeln!(out, "====== Types ======")?;
            for (i, ty) in self.bchir.types().iter().enumerate() {
                writeln!(out, "{}: {} ({})", i, ty.name, ty.kind.name())?;
            }
        }
        if !self.bchir.file_names().is_empty() {
            writeln!(out, "====== Source files ======")?;
            for (i, f) in self.bchir.file_names().iter().enumerate() {
                writeln!(out, "{}: {}", i, f)?;
            }
        }
        if !self.bchir.class_table().is_empty() {
            writeln!(out, "====== Classes ======")?;
            let mut ids: Vec<_> = self.bchir.class_table().keys().copied().collect();
            ids.sort_unstable();
            for id in ids {
                let info = self.bchir.class(id);
                let mut supers: Vec<_> = info.super_classes.iter().copied().collect();
                supers.sort_unstable();
                writeln!(out, "class {} ({})", id, info.mangled_name)?;
                writeln!(out, "  superclasses: {:?}", supers)?;
                let mut methods: Vec<_> = info.vtable.iter().collect();
                methods.sort_by_key(|(m, _)| **m);
                for (method, pc) in methods {
                    writeln!(out, "  method {} -> {}", method, pc)?;
                }
                if info.finalizer_pc != 0 {
                    writeln!(out, "  finalizer -> {}", info.finalizer_pc)?;
                }
            }
        }
        Ok(())
    }

    /// Disassemble one definition
    pub fn print_definition(&self, def: &Definition, out: &mut dyn Write) -> io::Result<()> {
        let mut i: Pc = 0;
        while (i as usize) < def.size() {
            let word = def.get(i);
            let Some(op) = OpCode::from_u32(word) else {
                writeln!(out, "{:6}  <bad opcode {:#x}>", i, word)?;
                i += 1;
                continue;
            };
            let (args, len) = self.render_args(def, i, op);
            let mut line = format!("{:6}  {}", i, op.name());
            if !args.is_empty() {
                line.push(' ');
                line.push_str(&args);
            }
            if let Some(annot) = self.render_annotations(def, i) {
                line.push_str("    ; ");
                line.push_str(&annot);
            }
            writeln!(out, "{}", line)?;
            i += len;
        }
        Ok(())
    }

    fn render_annotations(&self, def: &Definition, idx: Pc) -> Option<String> {
        let mangled = def.mangled_name_annotation(idx);
        let pos = def.code_position_annotation(idx);
        if mangled.is_none() && pos.is_zero() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(mangled) = mangled {
            parts.push(mangled.to_string());
        }
        if !pos.is_zero() {
            let file = self
                .bchir
                .file_names()
                .get(pos.file_id as usize)
                .map(String::as_str)
                .unwrap_or("?");
            parts.push(format!("{}:{}:{}", file, pos.line, pos.column));
        }
        Some(parts.join(", "))
    }

    /// Rendered operand text plus the instruction's full length in words
    fn render_args(&self, def: &Definition, i: Pc, op: OpCode) -> (String, Pc) {
        use OpCode::*;
        let fixed = op.width() + op.has_exception_handler() as Pc;
        let handler = |def: &Definition| {
            format!("handler -> {}", def.get(i + op.width()))
        };
        match op {
            Uint64 | Uintnat => (format!("{}", def.get_u64(i + 1)), fixed),
            Int64 | Intnat => (format!("{}", def.get_u64(i + 1) as i64), fixed),
            Float16 | Float32 => (format!("{}", f32::from_bits(def.get(i + 1))), fixed),
            Float64 => (format!("{}", f64::from_bits(def.get_u64(i + 1))), fixed),
            Int8 => (format!("{}", def.get(i + 1) as i8), fixed),
            Int16 => (format!("{}", def.get(i + 1) as i16), fixed),
            Int32 => (format!("{}", def.get(i + 1) as i32), fixed),
            Rune => {
                let v = def.get(i + 1);
                let rendered = match char::from_u32(v) {
                    Some(c) if (' '..='~').contains(&c) => format!("r'{}'", c),
                    _ => format!("r'\\u{{{:x}}}'", v),
                };
                (rendered, fixed)
            }
            Bool => ((def.get(i + 1) != 0).to_string(), fixed),
            String => {
                let idx = def.get(i + 1) as usize;
                let text = self
                    .bchir
                    .strings()
                    .get(idx)
                    .map(std::string::String::as_str)
                    .unwrap_or("?");
                (format!("{} ({:?})", idx, text), fixed)
            }
            UnNeg | UnNegExc | UnInc | UnDec | UnNot | UnBitnot | BinAdd | BinAddExc | BinSub
            | BinSubExc | BinMul | BinMulExc | BinDiv | BinDivExc | BinMod | BinModExc
            | BinExp | BinExpExc | BinLt | BinGt | BinLe | BinGe | BinEqual | BinNoteq
            | BinBitand | BinBitor | BinBitxor => {
                let mut text = format!(
                    "{} {}",
                    kind_label(def.get(i + 1)),
                    strat_label(def.get(i + 2))
                );
                if op.has_exception_handler() {
                    text.push_str(&format!(" {}", handler(def)));
                }
                (text, fixed)
            }
            BinLshift | BinLshiftExc | BinRshift | BinRshiftExc => {
                let mut text = format!(
                    "{} {} rhs:{}",
                    kind_label(def.get(i + 1)),
                    strat_label(def.get(i + 2)),
                    kind_label(def.get(i + 3))
                );
                if op.has_exception_handler() {
                    text.push_str(&format!(" {}", handler(def)));
                }
                (text, fixed)
            }
            Typecast | TypecastExc => {
                let mut text = format!(
                    "{} -> {} {}",
                    kind_label(def.get(i + 1)),
                    kind_label(def.get(i + 2)),
                    strat_label(def.get(i + 3))
                );
                if op.has_exception_handler() {
                    text.push_str(&format!(" {}", handler(def)));
                }
                (text, fixed)
            }
            Intrinsic0 | Intrinsic0Exc => {
                let mut text = intrinsic_label(def.get(i + 1));
                if op.has_exception_handler() {
                    text.push_str(&format!(" {}", handler(def)));
                }
                (text, fixed)
            }
            Intrinsic1 | Intrinsic1Exc => {
                let mut text =
                    format!("{} ty:{}", intrinsic_label(def.get(i + 1)), def.get(i + 2));
                if op.has_exception_handler() {
                    text.push_str(&format!(" {}", handler(def)));
                }
                (text, fixed)
            }
            Intrinsic2 | Intrinsic2Exc => {
                let mut text = format!(
                    "{} ty:{} {}",
                    intrinsic_label(def.get(i + 1)),
                    def.get(i + 2),
                    strat_label(def.get(i + 3))
                );
                if op.has_exception_handler() {
                    text.push_str(&format!(" {}", handler(def)));
                }
                (text, fixed)
            }
            Switch => {
                let cases = def.get(i + 2);
                let mut text = format!("{} cases:{}", kind_label(def.get(i + 1)), cases);
                for c in 0..cases {
                    text.push_str(&format!(" {}", def.get_u64(i + 3 + c * 2) as i64));
                }
                let targets_base = i + 3 + cases * 2;
                text.push_str(&format!(" default -> {}", def.get(targets_base)));
                for c in 0..cases {
                    text.push_str(&format!(" -> {}", def.get(targets_base + 1 + c)));
                }
                (text, 4 + cases * 3)
            }
            FieldTpl | GetRef | StoreInRef => {
                let path_len = def.get(i + 1);
                let mut text = format!("path:{}", path_len);
                for p in 0..path_len {
                    text.push_str(&format!(" {}", def.get(i + 2 + p)));
                }
                (text, 2 + path_len)
            }
            _ => {
                // generic rendering: raw operand words, then the handler
                let mut text = std::string::String::new();
                for a in 1..op.width() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(&def.get(i + a).to_string());
                }
                if op.has_exception_handler() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(&handler(def));
                }
                (text, fixed)
            }
        }
    }
}

fn kind_label(word: Word) -> String {
    TypeKind::from_u32(word).map_or_else(|| format!("kind?{}", word), |k| k.name().to_string())
}

fn strat_label(word: Word) -> String {
    OverflowStrategy::from_u32(word)
        .map_or_else(|| format!("strat?{}", word), |s| s.name().to_string())
}

fn intrinsic_label(word: Word) -> String {
    IntrinsicKind::from_u32(word)
        .map_or_else(|| format!("intrinsic?{}", word), |k| k.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_name() {
        assert_eq!(
            demangle_name("std.core::Exception::toString"),
            ("std.core::Exception".to_string(), "toString".to_string())
        );
        assert_eq!(demangle_name("main"), (String::new(), "main".to_string()));
        assert_eq!(
            demangle_name("pkg::f()"),
            ("pkg".to_string(), "f".to_string())
        );
    }

    #[test]
    fn test_print_simple_function() {
        let mut bchir = Bchir::new("test");
        let mut def = Definition::new();
        def.push_op(OpCode::Frame);
        def.push(0);
        def.push_op(OpCode::Int64);
        def.push_u64(42);
        def.push_op(OpCode::Return);
        def.add_mangled_name_annotation(0, "pkg::f");
        bchir.add_function("pkg::f", def);

        let mut out = Vec::new();
        Printer::new(&bchir).print("pre-link", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("pkg::f"));
        assert!(text.contains("FRAME"));
        assert!(text.contains("INT64 42"));
        assert!(text.contains("RETURN"));
    }

    #[test]
    fn test_print_arith_immediates() {
        let mut bchir = Bchir::new("test");
        let mut def = Definition::new();
        def.push_op(OpCode::BinAdd);
        def.push(TypeKind::Int32 as Word);
        def.push(OverflowStrategy::Wrapping as Word);
        bchir.add_function("pkg::f", def);

        let mut out = Vec::new();
        Printer::new(&bchir).print("pre-link", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("BIN_ADD Int32 WRAPPING"));
    }

    #[test]
    fn test_print_switch_layout() {
        let mut bchir = Bchir::new("test");
        let mut def = Definition::new();
        def.push_op(OpCode::Switch);
        def.push(TypeKind::Int64 as Word);
        def.push(2); // cases
        def.push_u64(1);
        def.push_u64(5);
        def.push(90); // default
        def.push(91);
        def.push(92);
        def.push_op(OpCode::Exit);
        bchir.add_function("pkg::f", def);

        let mut out = Vec::new();
        Printer::new(&bchir).print("pre-link", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("SWITCH Int64 cases:2 1 5 default -> 90 -> 91 -> 92"));
        // the decoder walked past the variable-length tail
        assert!(text.contains("EXIT"));
    }
}
