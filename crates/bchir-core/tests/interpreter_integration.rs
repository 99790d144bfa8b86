//! End-to-end scenarios through the linker and interpreter: virtual
//! dispatch, globals and their initialisers, finalisers, and the intrinsic
//! surface.

mod common;

use bchir_bytecode::{
    Bchir, Definition, IntrinsicKind, OpCode, OverflowStrategy, SClassInfo, TypeKind, Word,
};
use bchir_core::{CollectingDiagSink, GlobalOptions, IResult, IVal, Interpreter, SourceManager};
use common::{function_body, link, mini_core, push_i64, run_function, Outcome};

/// A method body: like `function_body`, but the receiver occupies the
/// callee slot, so there is no extra slot to drop.
fn method_body(
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
    build(&mut def);
    def
}

fn arith(op: OpCode, kind: TypeKind, strat: OverflowStrategy, d: &mut Definition) {
    d.push_op(op);
    d.push(kind as u32);
    d.push(strat as u32);
}

/// S4: `B <: A` overriding `foo`; dispatch through the receiver's vtable.
#[test]
fn test_virtual_dispatch_selects_override() {
    let mut pkg = Bchir::new("test");
    let mut class_a = SClassInfo::default();
    class_a.vtable.insert("foo".into(), "test::A::foo".into());
    pkg.add_sclass("test::A", class_a);
    let mut class_b = SClassInfo::default();
    class_b.super_classes.push("test::A".into());
    class_b.vtable.insert("foo".into(), "test::B::foo".into());
    pkg.add_sclass("test::B", class_b);

    pkg.add_function(
        "test::A::foo",
        method_body(1, 1, |d| {
            push_i64(d, 1);
            d.push_op(OpCode::Return);
        }),
    );
    pkg.add_function(
        "test::B::foo",
        method_body(1, 1, |d| {
            push_i64(d, 2);
            d.push_op(OpCode::Return);
        }),
    );

    let foo_ref = pkg.add_mangled_name("foo");
    for (name, class) in [("test::call_a", "test::A"), ("test::call_b", "test::B")] {
        let class_ref = pkg.add_mangled_name(class);
        pkg.add_function(
            name,
            function_body(0, 0, |d| {
                d.push_op(OpCode::AllocateClass);
                d.push(class_ref);
                d.push(0);
                d.push_op(OpCode::Invoke);
                d.push(0); // receiver only
                d.push(foo_ref);
                d.push_op(OpCode::Return);
            }),
        );
    }

    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::call_a", vec![]),
        Outcome::Success(IVal::Int64(1))
    );
    assert_eq!(
        run_function(&mut linked, "test::call_b", vec![]),
        Outcome::Success(IVal::Int64(2))
    );
}

#[test]
fn test_instanceof_uses_superclass_closure() {
    let mut pkg = Bchir::new("test");
    pkg.add_sclass("test::A", SClassInfo::default());
    let mut class_b = SClassInfo::default();
    class_b.super_classes.push("test::A".into());
    pkg.add_sclass("test::B", class_b);

    let a_ref = pkg.add_mangled_name("test::A");
    let b_ref = pkg.add_mangled_name("test::B");
    pkg.add_function(
        "test::f",
        function_body(0, 1, |d| {
            d.push_op(OpCode::AllocateClass);
            d.push(b_ref);
            d.push(0);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Instanceof);
            d.push(a_ref); // B is an A
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Instanceof);
            d.push(b_ref); // and a B
            d.push_op(OpCode::AllocateClass);
            d.push(a_ref);
            d.push(0);
            d.push_op(OpCode::Instanceof);
            d.push(b_ref); // but an A is not a B
            d.push_op(OpCode::Tuple);
            d.push(3);
            d.push_op(OpCode::Return);
        }),
    );

    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![
            IVal::Bool(true),
            IVal::Bool(true),
            IVal::Bool(false),
        ]))
    );
}

#[test]
fn test_const_global_init_and_gvar_access() {
    let mut pkg = Bchir::new("test");
    let mut init = Definition::new();
    init.push_op(OpCode::Int64);
    init.push_u64(42);
    pkg.add_global_var("test::answer", init);

    let answer_ref = pkg.add_mangled_name("test::answer");
    pkg.add_function(
        "test::read",
        function_body(0, 0, |d| {
            d.push_op(OpCode::Gvar);
            d.push(answer_ref);
            d.push_op(OpCode::Deref);
            d.push_op(OpCode::Return);
        }),
    );

    let mut linked = link(&[pkg]);
    let entry = linked.symbols.funcs["test::read"];
    let mut diag = CollectingDiagSink::new();
    let mut sm = SourceManager::new();
    let mut interp = Interpreter::new(
        &mut linked.top,
        &mut diag,
        &mut sm,
        linked.output.playground_base,
        linked.output.external_playground_base,
        true,
    );
    interp.set_global_vars(linked.output.const_global_inits.clone());
    let result = interp.run_call(entry, vec![]);
    assert_eq!(result, IResult::Success(IVal::Int64(42)));
}

#[test]
fn test_function_initialised_global_runs_before_main() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::init_g",
        function_body(0, 0, |d| {
            push_i64(d, 5);
            push_i64(d, 5);
            arith(OpCode::BinMul, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::Return);
        }),
    );
    let init_ref = pkg.add_mangled_name("test::init_g");
    let mut init = Definition::new();
    init.push_op(OpCode::Func);
    init.push(init_ref);
    pkg.add_global_var("test::g", init);

    let mut linked = link(&[pkg]);
    let g = linked.symbols.gvars["test::g"];
    let mut diag = CollectingDiagSink::new();
    let mut sm = SourceManager::new();
    let mut interp = Interpreter::new(
        &mut linked.top,
        &mut diag,
        &mut sm,
        linked.output.playground_base,
        linked.output.external_playground_base,
        true,
    );
    let result = interp.run(linked.output.top_level_pc, false);
    assert_eq!(result, IResult::NotRun);
    assert_eq!(interp.peek_global(g), &IVal::Int64(25));
}

#[test]
fn test_package_global_init_func_is_called() {
    let mut pkg = Bchir::new("test");
    let counter_ref = pkg.add_mangled_name("test::counter");
    pkg.add_function(
        "test::global_init",
        function_body(0, 0, |d| {
            push_i64(d, 7);
            d.push_op(OpCode::GvarSet);
            d.push(counter_ref);
            d.push_op(OpCode::Unit);
            d.push_op(OpCode::Return);
        }),
    );
    pkg.set_global_init_func("test::global_init");
    // the global exists but carries no initialiser of its own
    pkg.add_global_var("test::counter", Definition::new());

    let mut linked = link(&[pkg]);
    let counter = linked.symbols.gvars["test::counter"];
    let mut diag = CollectingDiagSink::new();
    let mut sm = SourceManager::new();
    let mut interp = Interpreter::new(
        &mut linked.top,
        &mut diag,
        &mut sm,
        linked.output.playground_base,
        linked.output.external_playground_base,
        true,
    );
    interp.run(linked.output.top_level_pc, false);
    assert_eq!(interp.peek_global(counter), &IVal::Int64(7));
}

/// S6: three objects of a finalised class run their finaliser at teardown
/// in allocation order.
#[test]
fn test_finalizers_run_in_allocation_order() {
    let mut pkg = Bchir::new("test");
    let mut class_c = SClassInfo::default();
    class_c.finalizer = "test::fin".into();
    pkg.add_sclass("test::C", class_c);

    let counter_ref = pkg.add_mangled_name("test::counter");
    let mut counter_init = Definition::new();
    counter_init.push_op(OpCode::Int64);
    counter_init.push_u64(0);
    pkg.add_global_var("test::counter", counter_init);

    // counter = counter * 10 + obj.field0
    pkg.add_function(
        "test::fin",
        function_body(1, 1, |d| {
            d.push_op(OpCode::Gvar);
            d.push(counter_ref);
            d.push_op(OpCode::Deref);
            push_i64(d, 10);
            arith(OpCode::BinMul, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::GetRef);
            d.push(1);
            d.push(0);
            d.push_op(OpCode::Deref);
            arith(OpCode::BinAdd, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::GvarSet);
            d.push(counter_ref);
            d.push_op(OpCode::Unit);
            d.push_op(OpCode::Return);
        }),
    );

    let class_ref = pkg.add_mangled_name("test::C");
    pkg.add_function(
        "test::main",
        function_body(0, 1, |d| {
            for i in 1..=3i64 {
                d.push_op(OpCode::AllocateClass);
                d.push(class_ref);
                d.push(1);
                d.push_op(OpCode::LvarSet);
                d.push(0);
                push_i64(d, i);
                d.push_op(OpCode::Lvar);
                d.push(0);
                d.push_op(OpCode::StoreInRef);
                d.push(1);
                d.push(0);
                d.push_op(OpCode::Drop);
            }
            d.push_op(OpCode::Unit);
            d.push_op(OpCode::Return);
        }),
    );

    let mut linked = link(&[pkg]);
    let counter = linked.symbols.gvars["test::counter"];
    let entry = linked.symbols.funcs["test::main"];
    let mut diag = CollectingDiagSink::new();
    let mut sm = SourceManager::new();
    let mut interp = Interpreter::new(
        &mut linked.top,
        &mut diag,
        &mut sm,
        linked.output.playground_base,
        linked.output.external_playground_base,
        true,
    );
    interp.set_global_vars(linked.output.const_global_inits.clone());
    let result = interp.run_call(entry, vec![]);
    assert_eq!(result, IResult::Success(IVal::Unit));

    interp.execute_finalizers();
    assert_eq!(interp.peek_global(counter), &IVal::Int64(123));
}

#[test]
fn test_allocated_heap_size_grows_with_objects() {
    let mut pkg = Bchir::new("test");
    pkg.add_sclass("test::C", SClassInfo::default());
    let class_ref = pkg.add_mangled_name("test::C");
    pkg.add_function(
        "test::f",
        function_body(0, 1, |d| {
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::GetAllocateHeapSize as u32);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            for _ in 0..3 {
                d.push_op(OpCode::AllocateClass);
                d.push(class_ref);
                d.push(0);
                d.push_op(OpCode::Drop);
            }
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::GetAllocateHeapSize as u32);
            d.push_op(OpCode::Lvar);
            d.push(0);
            arith(OpCode::BinSub, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    match run_function(&mut linked, "test::f", vec![]) {
        Outcome::Success(IVal::Int64(delta)) => {
            assert!(delta >= 3 * std::mem::size_of::<IVal>() as i64, "delta {}", delta);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_max_heap_size_has_a_default() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::f",
        function_body(0, 0, |d| {
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::GetMaxHeapSize as u32);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    match run_function(&mut linked, "test::f", vec![]) {
        Outcome::Success(IVal::Int64(size)) => assert!(size > 0),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_chr_ord_roundtrip() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::f",
        function_body(0, 0, |d| {
            d.push_op(OpCode::Uint32);
            d.push('A' as u32);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::Chr as u32);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::Ord as u32);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int32(65))
    );
}

#[test]
fn test_object_refeq_is_pointer_identity() {
    let mut pkg = Bchir::new("test");
    pkg.add_sclass("test::C", SClassInfo::default());
    let class_ref = pkg.add_mangled_name("test::C");
    pkg.add_function(
        "test::f",
        function_body(0, 1, |d| {
            d.push_op(OpCode::AllocateClass);
            d.push(class_ref);
            d.push(0);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            // same object twice
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::ObjectRefeq as u32);
            // a fresh object against the first
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::AllocateClass);
            d.push(class_ref);
            d.push(0);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::ObjectRefeq as u32);
            d.push_op(OpCode::Tuple);
            d.push(2);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Bool(true), IVal::Bool(false)]))
    );
}

#[test]
fn test_identity_hashcode_is_stable() {
    let mut pkg = Bchir::new("test");
    pkg.add_sclass("test::C", SClassInfo::default());
    let class_ref = pkg.add_mangled_name("test::C");
    pkg.add_function(
        "test::f",
        function_body(0, 1, |d| {
            d.push_op(OpCode::AllocateClass);
            d.push(class_ref);
            d.push(0);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::IdentityHashcode as u32);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::IdentityHashcode as u32);
            arith(OpCode::BinEqual, TypeKind::Int64, OverflowStrategy::Na, d);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Bool(true))
    );
}

#[test]
fn test_cstring_init_strlen_free() {
    let mut pkg = Bchir::new("test");
    let hello = pkg.add_string("hello");
    pkg.add_function(
        "test::f",
        function_body(0, 2, |d| {
            d.push_op(OpCode::String);
            d.push(hello);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::CStringInit as u32);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::Strlen as u32);
            d.push_op(OpCode::LvarSet);
            d.push(1);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::Free as u32);
            d.push_op(OpCode::Drop);
            d.push_op(OpCode::Lvar);
            d.push(1);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::UIntNat(5))
    );
}

#[test]
fn test_array_slice_init_and_get() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::f",
        function_body(0, 2, |d| {
            // raw array [10, 20, 30]
            push_i64(d, 3);
            d.push_op(OpCode::AllocateRawArray);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(0);
            push_i64(d, 10);
            push_i64(d, 20);
            push_i64(d, 30);
            d.push_op(OpCode::RawArrayLiteralInit);
            d.push(3);
            d.push_op(OpCode::Drop);
            // slice {raw, start: 1, len: 2} built in place
            d.push_op(OpCode::AllocateStruct);
            d.push(3);
            d.push_op(OpCode::LvarSet);
            d.push(1);
            d.push_op(OpCode::Lvar);
            d.push(1);
            d.push_op(OpCode::Lvar);
            d.push(0);
            push_i64(d, 1);
            push_i64(d, 2);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::ArraySliceInit as u32);
            d.push_op(OpCode::Drop);
            // slice[1] is the raw array's element 2
            d.push_op(OpCode::Lvar);
            d.push(1);
            d.push_op(OpCode::Deref);
            push_i64(d, 1);
            d.push_op(OpCode::Intrinsic2);
            d.push(IntrinsicKind::ArraySliceGetElement as u32);
            d.push(0);
            d.push(OverflowStrategy::Throwing as u32);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[mini_core(), pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(30))
    );
}

#[test]
fn test_atomic_fetch_add_and_load() {
    let mut pkg = Bchir::new("test");
    pkg.add_sclass("test::AtomicInt64", SClassInfo::default());
    let class_ref = pkg.add_mangled_name("test::AtomicInt64");
    pkg.add_function(
        "test::f",
        function_body(0, 1, |d| {
            // atomic cell: an object whose field 0 holds the value
            push_i64(d, 0);
            d.push_op(OpCode::Object);
            d.push(1);
            d.push(class_ref);
            d.push_op(OpCode::Allocate);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Store);
            d.push_op(OpCode::Lvar);
            d.push(0);
            push_i64(d, 5);
            d.push_op(OpCode::Unit); // memory order
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::AtomicInt64FetchAdd as u32);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Unit); // memory order
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::AtomicInt64Load as u32);
            d.push_op(OpCode::Tuple);
            d.push(2);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Int64(0), IVal::Int64(5)]))
    );
}

#[test]
fn test_fill_in_stack_trace_counts_call_frames() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::g",
        function_body(0, 0, |d| {
            d.push_op(OpCode::Unit);
            d.push_op(OpCode::Unit);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::FillInStackTrace as u32);
            d.push_op(OpCode::Intrinsic0);
            d.push(IntrinsicKind::ArraySize as u32);
            d.push_op(OpCode::Return);
        }),
    );
    let g_ref = pkg.add_mangled_name("test::g");
    pkg.add_function(
        "test::f",
        function_body(0, 0, |d| {
            d.push_op(OpCode::Func);
            d.push(g_ref);
            d.push_op(OpCode::Apply);
            d.push(0);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    // one call frame above the entry call: one record of three words
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(3))
    );
}

#[test]
fn test_per_pc_trace_file_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let mut pkg = Bchir::new("traced");
    pkg.add_function(
        "test::f",
        function_body(0, 0, |d| {
            push_i64(d, 1);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    let entry = linked.symbols.funcs["test::f"];
    let mut diag = CollectingDiagSink::new();
    let mut sm = SourceManager::new();
    let mut interp = Interpreter::new(
        &mut linked.top,
        &mut diag,
        &mut sm,
        linked.output.playground_base,
        linked.output.external_playground_base,
        false,
    );
    let options = GlobalOptions {
        print_bchir_interpreter: true,
        output_dir: dir.path().to_path_buf(),
    };
    interp.prepare_runtime_debug(&options);
    interp.run_call(entry, vec![]);
    drop(interp);

    let trace_path = dir.path().join("BCHIR_Debug").join("linked_interpreted.bchir");
    let text = std::fs::read_to_string(trace_path).unwrap();
    assert!(text.contains("APPLY"));
    assert!(text.contains("INT64"));
    assert!(text.contains("RETURN"));
}
