//! Opcode-level behaviour: literals, arithmetic strategies, control flow,
//! aggregates and references, driven through hand-assembled packages.

mod common;

use bchir_bytecode::{Bchir, OpCode, OverflowStrategy, TypeKind};
use bchir_core::IVal;
use common::{function_body, link, push_i32, push_i64, run_function, Outcome};

fn single_function(build: impl FnOnce(&mut bchir_bytecode::Definition)) -> common::Linked {
    let mut pkg = Bchir::new("test");
    pkg.add_function("test::f", function_body(0, 0, build));
    link(&[pkg])
}

fn arith(op: OpCode, kind: TypeKind, strat: OverflowStrategy, d: &mut bchir_bytecode::Definition) {
    d.push_op(op);
    d.push(kind as u32);
    d.push(strat as u32);
}

#[test]
fn test_int32_wrapping_add_overflow() {
    // S1: i32::MAX + 1 wraps to i32::MIN
    let mut linked = single_function(|d| {
        push_i32(d, i32::MAX);
        push_i32(d, 1);
        arith(OpCode::BinAdd, TypeKind::Int32, OverflowStrategy::Wrapping, d);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int32(i32::MIN))
    );
}

#[test]
fn test_checked_add_matches_wrapping_on_overflow() {
    let mut linked = single_function(|d| {
        push_i32(d, i32::MAX);
        push_i32(d, 1);
        arith(OpCode::BinAdd, TypeKind::Int32, OverflowStrategy::Checked, d);
        d.push_op(OpCode::Return);
    });
    // overflow: the None arm of the option tuple
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Bool(true)]))
    );
}

#[test]
fn test_checked_add_some_when_exact() {
    let mut linked = single_function(|d| {
        push_i32(d, 20);
        push_i32(d, 22);
        arith(OpCode::BinAdd, TypeKind::Int32, OverflowStrategy::Checked, d);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Bool(false), IVal::Int32(42)]))
    );
}

#[test]
fn test_saturating_arithmetic_clamps() {
    let mut linked = single_function(|d| {
        push_i32(d, i32::MAX);
        push_i32(d, 100);
        arith(OpCode::BinAdd, TypeKind::Int32, OverflowStrategy::Saturating, d);
        push_i32(d, i32::MIN);
        push_i32(d, 100);
        arith(OpCode::BinSub, TypeKind::Int32, OverflowStrategy::Saturating, d);
        d.push_op(OpCode::Tuple);
        d.push(2);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Int32(i32::MAX), IVal::Int32(i32::MIN)]))
    );
}

#[test]
fn test_unsigned_arithmetic_and_bitops() {
    let mut linked = single_function(|d| {
        d.push_op(OpCode::Uint8);
        d.push(0xF0);
        d.push_op(OpCode::Uint8);
        d.push(0x0F);
        arith(OpCode::BinBitor, TypeKind::UInt8, OverflowStrategy::Na, d);
        d.push_op(OpCode::UnBitnot);
        d.push(TypeKind::UInt8 as u32);
        d.push(OverflowStrategy::Na as u32);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::UInt8(0))
    );
}

#[test]
fn test_integer_exponentiation() {
    let mut linked = single_function(|d| {
        push_i64(d, 3);
        push_i64(d, 4);
        arith(OpCode::BinExp, TypeKind::Int64, OverflowStrategy::Wrapping, d);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(81))
    );
}

#[test]
fn test_exponentiation_with_u64_exponent() {
    let mut linked = single_function(|d| {
        push_i64(d, 2);
        d.push_op(OpCode::Uint64);
        d.push_u64(10);
        arith(OpCode::BinExp, TypeKind::Int64, OverflowStrategy::Throwing, d);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(1024))
    );
}

#[test]
fn test_float_arithmetic() {
    let mut linked = single_function(|d| {
        d.push_op(OpCode::Float64);
        d.push_u64(1.5f64.to_bits());
        d.push_op(OpCode::Float64);
        d.push_u64(2.25f64.to_bits());
        arith(OpCode::BinAdd, TypeKind::Float64, OverflowStrategy::Na, d);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Float64(3.75))
    );
}

#[test]
fn test_comparisons_push_bool() {
    let mut linked = single_function(|d| {
        push_i64(d, 5);
        push_i64(d, 10);
        arith(OpCode::BinLt, TypeKind::Int64, OverflowStrategy::Na, d);
        d.push_op(OpCode::Rune);
        d.push('a' as u32);
        d.push_op(OpCode::Rune);
        d.push('b' as u32);
        arith(OpCode::BinGe, TypeKind::Rune, OverflowStrategy::Na, d);
        d.push_op(OpCode::Tuple);
        d.push(2);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Bool(true), IVal::Bool(false)]))
    );
}

#[test]
fn test_branch_takes_the_true_target() {
    // if 10 > 5 { 1 } else { 0 }
    let mut pkg = Bchir::new("test");
    let mut def = function_body(0, 0, |d| {
        push_i64(d, 10); // 2..5 after prologue
        push_i64(d, 5);
        arith(OpCode::BinGt, TypeKind::Int64, OverflowStrategy::Na, d);
    });
    // prologue is FRAME n + DROP = 3 words; body starts at 3
    let branch = def.next_index();
    def.push_op(OpCode::Branch);
    def.push(branch + 3); // true target
    def.push(branch + 7); // false target
    push_i64(&mut def, 1); // true: 3 words
    def.push_op(OpCode::Return);
    push_i64(&mut def, 0); // false
    def.push_op(OpCode::Return);
    pkg.add_function("test::f", def);
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(1))
    );
}

#[test]
fn test_jump_skips_code() {
    let mut pkg = Bchir::new("test");
    let mut def = function_body(0, 0, |_| {});
    let jump = def.next_index();
    def.push_op(OpCode::Jump);
    def.push(jump + 5);
    push_i64(&mut def, 99); // skipped
    push_i64(&mut def, 42); // target
    def.push_op(OpCode::Return);
    pkg.add_function("test::f", def);
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(42))
    );
}

#[test]
fn test_switch_hits_case_and_default() {
    // switch (arg) { 1 -> 10, 5 -> 50, _ -> -1 }
    let mut pkg = Bchir::new("test");
    let mut def = function_body(1, 1, |d| {
        d.push_op(OpCode::Lvar);
        d.push(0);
    });
    let switch = def.next_index();
    def.push_op(OpCode::Switch);
    def.push(TypeKind::Int64 as u32);
    def.push(2);
    def.push_u64(1);
    def.push_u64(5);
    let targets = def.next_index();
    // default, then one target per case
    def.push(targets + 3);
    def.push(targets + 7);
    def.push(targets + 11);
    assert_eq!(targets, switch + 7);
    push_i64(&mut def, -1);
    def.push_op(OpCode::Return);
    push_i64(&mut def, 10);
    def.push_op(OpCode::Return);
    push_i64(&mut def, 50);
    def.push_op(OpCode::Return);
    pkg.add_function("test::f", def);
    let mut linked = link(&[pkg]);

    assert_eq!(
        run_function(&mut linked, "test::f", vec![IVal::Int64(1)]),
        Outcome::Success(IVal::Int64(10))
    );
    assert_eq!(
        run_function(&mut linked, "test::f", vec![IVal::Int64(5)]),
        Outcome::Success(IVal::Int64(50))
    );
    assert_eq!(
        run_function(&mut linked, "test::f", vec![IVal::Int64(3)]),
        Outcome::Success(IVal::Int64(-1))
    );
}

#[test]
fn test_tuple_field_roundtrip() {
    // TUPLE 3 then FIELD 1 reproduces the pushed value
    let mut linked = single_function(|d| {
        push_i64(d, 10);
        push_i64(d, 20);
        push_i64(d, 30);
        d.push_op(OpCode::Tuple);
        d.push(3);
        d.push_op(OpCode::Field);
        d.push(1);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(20))
    );
}

#[test]
fn test_array_opcode_length_prefix() {
    // ARRAY n pushes an aggregate whose length field equals n
    let mut linked = single_function(|d| {
        push_i64(d, 7);
        push_i64(d, 8);
        d.push_op(OpCode::Array);
        d.push(2);
        d.push_op(OpCode::Field);
        d.push(0);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(2))
    );
}

#[test]
fn test_locals_and_lvar_set() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::add",
        function_body(2, 3, |d| {
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Lvar);
            d.push(1);
            arith(OpCode::BinAdd, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::LvarSet);
            d.push(2);
            d.push_op(OpCode::Lvar);
            d.push(2);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::add", vec![IVal::Int64(40), IVal::Int64(2)]),
        Outcome::Success(IVal::Int64(42))
    );
}

#[test]
fn test_nested_calls_restore_frames() {
    // outer(a) = inner(a) + 1, checking bp discipline across calls
    let mut pkg = Bchir::new("test");
    let inner_ref = pkg.add_mangled_name("test::inner");
    pkg.add_function(
        "test::inner",
        function_body(1, 1, |d| {
            d.push_op(OpCode::Lvar);
            d.push(0);
            push_i64(d, 10);
            arith(OpCode::BinMul, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::Return);
        }),
    );
    pkg.add_function(
        "test::outer",
        function_body(1, 1, |d| {
            d.push_op(OpCode::Func);
            d.push(inner_ref);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Apply);
            d.push(1);
            // back in outer: local 0 must still be readable
            d.push_op(OpCode::Lvar);
            d.push(0);
            arith(OpCode::BinAdd, TypeKind::Int64, OverflowStrategy::Wrapping, d);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::outer", vec![IVal::Int64(4)]),
        Outcome::Success(IVal::Int64(44))
    );
}

#[test]
fn test_allocate_store_deref() {
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::g",
        function_body(0, 1, |d| {
            d.push_op(OpCode::Allocate);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            push_i64(d, 7);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Asg);
            d.push_op(OpCode::Drop); // the Unit from ASG
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::Deref);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::g", vec![]),
        Outcome::Success(IVal::Int64(7))
    );
}

#[test]
fn test_getref_and_storeinref_navigate_paths() {
    // allocate a struct of two fields, write field 1 through a path,
    // read it back through GETREF + DEREF
    let mut pkg = Bchir::new("test");
    pkg.add_function(
        "test::f",
        function_body(0, 1, |d| {
            d.push_op(OpCode::AllocateStruct);
            d.push(2);
            d.push_op(OpCode::LvarSet);
            d.push(0);
            push_i64(d, 33);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::StoreInRef);
            d.push(1); // path length
            d.push(1); // field 1
            d.push_op(OpCode::Drop);
            d.push_op(OpCode::Lvar);
            d.push(0);
            d.push_op(OpCode::GetRef);
            d.push(1);
            d.push(1);
            d.push_op(OpCode::Deref);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(33))
    );
}

#[test]
fn test_box_unbox() {
    let mut pkg = Bchir::new("test");
    pkg.add_sclass("test::Box", bchir_bytecode::SClassInfo::default());
    let class_ref = pkg.add_mangled_name("test::Box");
    pkg.add_function(
        "test::f",
        function_body(0, 0, |d| {
            push_i64(d, 5);
            d.push_op(OpCode::Box);
            d.push(class_ref);
            d.push_op(OpCode::Unbox);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(5))
    );
}

#[test]
fn test_string_literal_layout() {
    let mut pkg = Bchir::new("test");
    let idx = pkg.add_string("hi");
    pkg.add_function(
        "test::f",
        function_body(0, 0, |d| {
            d.push_op(OpCode::String);
            d.push(idx);
            // keep only the length field of the string struct
            d.push_op(OpCode::Field);
            d.push(2);
            d.push_op(OpCode::Return);
        }),
    );
    let mut linked = link(&[pkg]);
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::UInt32(2))
    );
}

#[test]
fn test_typecast_wrapping_and_checked() {
    // S2: Int8 -1 to UInt8
    let cast = |strat: OverflowStrategy| {
        let mut pkg = Bchir::new("test");
        pkg.add_function(
            "test::f",
            function_body(0, 0, move |d| {
                d.push_op(OpCode::Int8);
                d.push((-1i8) as u8 as u32);
                d.push_op(OpCode::Typecast);
                d.push(TypeKind::Int8 as u32);
                d.push(TypeKind::UInt8 as u32);
                d.push(strat as u32);
                d.push_op(OpCode::Return);
            }),
        );
        link(&[pkg])
    };
    let mut wrapping = cast(OverflowStrategy::Wrapping);
    assert_eq!(
        run_function(&mut wrapping, "test::f", vec![]),
        Outcome::Success(IVal::UInt8(255))
    );
    let mut checked = cast(OverflowStrategy::Checked);
    assert_eq!(
        run_function(&mut checked, "test::f", vec![]),
        Outcome::Success(IVal::Tuple(vec![IVal::Bool(true)]))
    );
}

#[test]
fn test_typecast_int_to_float_and_back() {
    let mut linked = single_function(|d| {
        push_i64(d, 3);
        d.push_op(OpCode::Typecast);
        d.push(TypeKind::Int64 as u32);
        d.push(TypeKind::Float64 as u32);
        d.push(OverflowStrategy::Na as u32);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Float64(3.0))
    );
}

#[test]
fn test_rune_uint32_bit_identity() {
    let mut linked = single_function(|d| {
        d.push_op(OpCode::Rune);
        d.push(0x1F600); // outside the BMP
        d.push_op(OpCode::Typecast);
        d.push(TypeKind::Rune as u32);
        d.push(TypeKind::UInt32 as u32);
        d.push(OverflowStrategy::Na as u32);
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::UInt32(0x1F600))
    );
}

#[test]
fn test_varray_by_value_and_get() {
    let mut linked = single_function(|d| {
        push_i64(d, 3); // size
        push_i64(d, 9); // item
        d.push_op(OpCode::Nullptr); // literal padding
        d.push_op(OpCode::VarrayByValue);
        push_i64(d, 2);
        d.push_op(OpCode::VarrayGet);
        d.push(1); // path length
        d.push_op(OpCode::Return);
    });
    assert_eq!(
        run_function(&mut linked, "test::f", vec![]),
        Outcome::Success(IVal::Int64(9))
    );
}
