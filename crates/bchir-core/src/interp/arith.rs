//! Overflow-checked arithmetic
//!
//! Every arithmetic opcode carries a type kind and an overflow strategy.
//! Integer ops run through [`IntOps`], a small trait over the primitive
//! integer types that exposes the std `checked_*`/`wrapping_*`/
//! `saturating_*` families; the strategy then decides what reaches the
//! argument stack. Division and remainder by zero raise
//! `ArithmeticException` under every strategy; shifts validate their
//! amount against the left operand's width and never consult the strategy.

use bchir_bytecode::{OpCode, OverflowStrategy, Pc, TypeKind};

use super::{Fault, Interpreter};
use crate::stack::ControlState;
use crate::value::IVal;

/// Primitive integer operations the strategy layer is generic over
pub(crate) trait IntOps: Copy + PartialEq + PartialOrd {
    /// Bit width of the type
    const BITS: u32;
    /// The zero value
    const ZERO: Self;
    /// The one value
    const ONE: Self;

    fn checked_add(self, rhs: Self) -> Option<Self>;
    fn checked_sub(self, rhs: Self) -> Option<Self>;
    fn checked_mul(self, rhs: Self) -> Option<Self>;
    fn checked_div(self, rhs: Self) -> Option<Self>;
    fn checked_rem(self, rhs: Self) -> Option<Self>;
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn wrapping_div(self, rhs: Self) -> Self;
    fn wrapping_rem(self, rhs: Self) -> Self;
    fn saturating_add(self, rhs: Self) -> Self;
    fn saturating_sub(self, rhs: Self) -> Self;
    fn saturating_mul(self, rhs: Self) -> Self;
    fn saturating_div(self, rhs: Self) -> Self;
    fn shl(self, amount: u32) -> Self;
    fn shr(self, amount: u32) -> Self;
    fn bitand(self, rhs: Self) -> Self;
    fn bitor(self, rhs: Self) -> Self;
    fn bitxor(self, rhs: Self) -> Self;
    fn bitnot(self) -> Self;
    fn is_negative(self) -> bool;
    fn is_odd(self) -> bool;
    /// Saturation limit on overflow: the max, or the min when the exact
    /// result would be negative
    fn saturation_bound(negative: bool) -> Self;
    /// The exponent value when usable as a non-negative power
    fn to_exponent(self) -> Option<u64>;
    fn from_ival(val: &IVal) -> Option<Self>;
    fn into_ival(self) -> IVal;
}

macro_rules! impl_int_ops {
    ($ty:ty, $variant:ident, $signed:literal) => {
        impl IntOps for $ty {
            const BITS: u32 = <$ty>::BITS;
            const ZERO: Self = 0;
            const ONE: Self = 1;

            fn checked_add(self, rhs: Self) -> Option<Self> {
                <$ty>::checked_add(self, rhs)
            }
            fn checked_sub(self, rhs: Self) -> Option<Self> {
                <$ty>::checked_sub(self, rhs)
            }
            fn checked_mul(self, rhs: Self) -> Option<Self> {
                <$ty>::checked_mul(self, rhs)
            }
            fn checked_div(self, rhs: Self) -> Option<Self> {
                <$ty>::checked_div(self, rhs)
            }
            fn checked_rem(self, rhs: Self) -> Option<Self> {
                <$ty>::checked_rem(self, rhs)
            }
            fn wrapping_add(self, rhs: Self) -> Self {
                <$ty>::wrapping_add(self, rhs)
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$ty>::wrapping_sub(self, rhs)
            }
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$ty>::wrapping_mul(self, rhs)
            }
            fn wrapping_div(self, rhs: Self) -> Self {
                <$ty>::wrapping_div(self, rhs)
            }
            fn wrapping_rem(self, rhs: Self) -> Self {
                <$ty>::wrapping_rem(self, rhs)
            }
            fn saturating_add(self, rhs: Self) -> Self {
                <$ty>::saturating_add(self, rhs)
            }
            fn saturating_sub(self, rhs: Self) -> Self {
                <$ty>::saturating_sub(self, rhs)
            }
            fn saturating_mul(self, rhs: Self) -> Self {
                <$ty>::saturating_mul(self, rhs)
            }
            fn saturating_div(self, rhs: Self) -> Self {
                <$ty>::saturating_div(self, rhs)
            }
            fn shl(self, amount: u32) -> Self {
                self << amount
            }
            fn shr(self, amount: u32) -> Self {
                self >> amount
            }
            fn bitand(self, rhs: Self) -> Self {
                self & rhs
            }
            fn bitor(self, rhs: Self) -> Self {
                self | rhs
            }
            fn bitxor(self, rhs: Self) -> Self {
                self ^ rhs
            }
            fn bitnot(self) -> Self {
                !self
            }
            fn is_negative(self) -> bool {
                $signed && (self as i128) < 0
            }
            fn is_odd(self) -> bool {
                self & 1 == 1
            }
            fn saturation_bound(negative: bool) -> Self {
                if negative {
                    <$ty>::MIN
                } else {
                    <$ty>::MAX
                }
            }
            fn to_exponent(self) -> Option<u64> {
                if $signed && (self as i128) < 0 {
                    None
                } else {
                    Some(self as u64)
                }
            }
            fn from_ival(val: &IVal) -> Option<Self> {
                match val {
                    IVal::$variant(v) => Some(*v),
                    _ => None,
                }
            }
            fn into_ival(self) -> IVal {
                IVal::$variant(self)
            }
        }
    };
}

impl_int_ops!(u8, UInt8, false);
impl_int_ops!(u16, UInt16, false);
impl_int_ops!(u32, UInt32, false);
impl_int_ops!(u64, UInt64, false);
impl_int_ops!(usize, UIntNat, false);
impl_int_ops!(i8, Int8, true);
impl_int_ops!(i16, Int16, true);
impl_int_ops!(i32, Int32, true);
impl_int_ops!(i64, Int64, true);
impl_int_ops!(isize, IntNat, true);

fn pow_checked<T: IntOps>(mut base: T, mut exp: u64) -> Option<T> {
    if exp == 0 {
        return Some(T::ONE);
    }
    let mut acc = T::ONE;
    while exp > 1 {
        if exp & 1 == 1 {
            acc = acc.checked_mul(base)?;
        }
        exp /= 2;
        base = base.checked_mul(base)?;
    }
    acc.checked_mul(base)
}

fn pow_wrapping<T: IntOps>(mut base: T, mut exp: u64) -> T {
    if exp == 0 {
        return T::ONE;
    }
    let mut acc = T::ONE;
    while exp > 1 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        exp /= 2;
        base = base.wrapping_mul(base);
    }
    acc.wrapping_mul(base)
}

impl<'a> Interpreter<'a> {
    /// Execute one arithmetic opcode
    pub(crate) fn op_bin(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        let kind_word = self.bchir.get(op_pc + 1);
        let kind = TypeKind::from_u32(kind_word)
            .ok_or(Fault::BadImmediate { what: "type kind", value: kind_word })?;
        let strat_word = self.bchir.get(op_pc + 2);
        let strat = OverflowStrategy::from_u32(strat_word)
            .ok_or(Fault::BadImmediate { what: "overflow strategy", value: strat_word })?;
        self.pc = op_pc + 3;

        if op.has_exception_handler() {
            self.stack.ctrl_push(ControlState {
                op_code: op,
                callee_pc: 0,
                return_pc: op_pc,
                prev_bp: self.env.bp(),
            });
        }
        let raised = self.bin_op_with_kind(op, kind, strat, op_pc)?;
        if op.has_exception_handler() && !raised {
            self.stack.ctrl_pop();
            self.pc += 1;
        }
        Ok(())
    }

    /// Dispatch one arithmetic opcode by its operand kind; `Ok(true)` means
    /// an exception was raised and `pc` already redirected
    pub(crate) fn bin_op_with_kind(
        &mut self,
        op: OpCode,
        kind: TypeKind,
        strat: OverflowStrategy,
        op_pc: Pc,
    ) -> Result<bool, Fault> {
        match kind {
            TypeKind::UInt8 => self.bin_int::<u8>(op, strat, op_pc),
            TypeKind::UInt16 => self.bin_int::<u16>(op, strat, op_pc),
            TypeKind::UInt32 => self.bin_int::<u32>(op, strat, op_pc),
            TypeKind::UInt64 | TypeKind::Enum => self.bin_int::<u64>(op, strat, op_pc),
            TypeKind::UIntNat => self.bin_int::<usize>(op, strat, op_pc),
            TypeKind::Int8 => self.bin_int::<i8>(op, strat, op_pc),
            TypeKind::Int16 => self.bin_int::<i16>(op, strat, op_pc),
            TypeKind::Int32 => self.bin_int::<i32>(op, strat, op_pc),
            TypeKind::Int64 => self.bin_int::<i64>(op, strat, op_pc),
            TypeKind::IntNat => self.bin_int::<isize>(op, strat, op_pc),
            TypeKind::Float16 => self.bin_float16(op),
            TypeKind::Float32 => self.bin_float32(op),
            TypeKind::Float64 => self.bin_float64(op),
            TypeKind::Bool => self.bin_bool(op),
            TypeKind::Rune => self.bin_rune(op),
            TypeKind::Unit => self.bin_unit(op),
            _ => Err(Fault::BadImmediate { what: "arithmetic type kind", value: kind as u32 }),
        }
    }

    fn pop_int<T: IntOps>(&mut self) -> Result<T, Fault> {
        let val = self.pop_val()?;
        T::from_ival(&val)
            .ok_or(Fault::StackType { expected: "integer", found: val.kind_name() })
    }

    /// Push the strategy-selected result; `true` when an overflow exception
    /// was raised instead
    fn push_arith_result<T: IntOps>(
        &mut self,
        op_pc: Pc,
        strat: OverflowStrategy,
        exact: Option<T>,
        wrapped: T,
        saturated: T,
    ) -> bool {
        match strat {
            OverflowStrategy::Throwing => match exact {
                Some(v) => self.stack.push(v.into_ival()),
                None => {
                    self.raise_overflow_exception(op_pc);
                    return true;
                }
            },
            OverflowStrategy::Checked => match exact {
                Some(v) => {
                    self.stack.push(IVal::Tuple(vec![IVal::Bool(false), v.into_ival()]))
                }
                None => self.stack.push(IVal::Tuple(vec![IVal::Bool(true)])),
            },
            OverflowStrategy::Saturating => self.stack.push(saturated.into_ival()),
            OverflowStrategy::Wrapping | OverflowStrategy::Na => {
                self.stack.push(wrapped.into_ival())
            }
        }
        false
    }

    fn bin_int<T: IntOps>(
        &mut self,
        op: OpCode,
        strat: OverflowStrategy,
        op_pc: Pc,
    ) -> Result<bool, Fault> {
        use OpCode::*;
        match op {
            UnNeg | UnNegExc => {
                let a = self.pop_int::<T>()?;
                let exact = T::ZERO.checked_sub(a);
                let wrapped = T::ZERO.wrapping_sub(a);
                let saturated = T::ZERO.saturating_sub(a);
                Ok(self.push_arith_result(op_pc, strat, exact, wrapped, saturated))
            }
            UnInc => {
                let a = self.pop_int::<T>()?;
                Ok(self.push_arith_result(
                    op_pc,
                    strat,
                    a.checked_add(T::ONE),
                    a.wrapping_add(T::ONE),
                    a.saturating_add(T::ONE),
                ))
            }
            UnDec => {
                let a = self.pop_int::<T>()?;
                Ok(self.push_arith_result(
                    op_pc,
                    strat,
                    a.checked_sub(T::ONE),
                    a.wrapping_sub(T::ONE),
                    a.saturating_sub(T::ONE),
                ))
            }
            UnBitnot => {
                let a = self.pop_int::<T>()?;
                self.stack.push(a.bitnot().into_ival());
                Ok(false)
            }
            BinExp | BinExpExc => self.bin_exp::<T>(strat, op_pc),
            BinLshift | BinLshiftExc | BinRshift | BinRshiftExc => {
                self.bin_shift::<T>(op, op_pc)
            }
            _ => {
                let b = self.pop_int::<T>()?;
                let a = self.pop_int::<T>()?;
                match op {
                    BinAdd | BinAddExc => Ok(self.push_arith_result(
                        op_pc,
                        strat,
                        a.checked_add(b),
                        a.wrapping_add(b),
                        a.saturating_add(b),
                    )),
                    BinSub | BinSubExc => Ok(self.push_arith_result(
                        op_pc,
                        strat,
                        a.checked_sub(b),
                        a.wrapping_sub(b),
                        a.saturating_sub(b),
                    )),
                    BinMul | BinMulExc => Ok(self.push_arith_result(
                        op_pc,
                        strat,
                        a.checked_mul(b),
                        a.wrapping_mul(b),
                        a.saturating_mul(b),
                    )),
                    BinDiv | BinDivExc => {
                        if b == T::ZERO {
                            self.raise_arithmetic_exception(op_pc);
                            return Ok(true);
                        }
                        Ok(self.push_arith_result(
                            op_pc,
                            strat,
                            a.checked_div(b),
                            a.wrapping_div(b),
                            a.saturating_div(b),
                        ))
                    }
                    BinMod | BinModExc => {
                        if b == T::ZERO {
                            self.raise_arithmetic_exception(op_pc);
                            return Ok(true);
                        }
                        // the only overflowing remainder, MIN % -1, wraps to 0
                        Ok(self.push_arith_result(
                            op_pc,
                            strat,
                            a.checked_rem(b),
                            a.wrapping_rem(b),
                            a.wrapping_rem(b),
                        ))
                    }
                    BinBitand => {
                        self.stack.push(a.bitand(b).into_ival());
                        Ok(false)
                    }
                    BinBitor => {
                        self.stack.push(a.bitor(b).into_ival());
                        Ok(false)
                    }
                    BinBitxor => {
                        self.stack.push(a.bitxor(b).into_ival());
                        Ok(false)
                    }
                    BinLt => {
                        self.stack.push(IVal::Bool(a < b));
                        Ok(false)
                    }
                    BinGt => {
                        self.stack.push(IVal::Bool(a > b));
                        Ok(false)
                    }
                    BinLe => {
                        self.stack.push(IVal::Bool(a <= b));
                        Ok(false)
                    }
                    BinGe => {
                        self.stack.push(IVal::Bool(a >= b));
                        Ok(false)
                    }
                    BinEqual => {
                        self.stack.push(IVal::Bool(a == b));
                        Ok(false)
                    }
                    BinNoteq => {
                        self.stack.push(IVal::Bool(a != b));
                        Ok(false)
                    }
                    _ => Err(Fault::UnsupportedOp(op.name())),
                }
            }
        }
    }

    fn bin_exp<T: IntOps>(&mut self, strat: OverflowStrategy, op_pc: Pc) -> Result<bool, Fault> {
        // the exponent may be a UInt64 even when the base is Int64
        let rhs = self.pop_val()?;
        let base = self.pop_int::<T>()?;
        let exp = match &rhs {
            IVal::UInt64(e) => Some(*e),
            other => match T::from_ival(other) {
                Some(e) => e.to_exponent(),
                None => {
                    return Err(Fault::StackType {
                        expected: "integer exponent",
                        found: other.kind_name(),
                    })
                }
            },
        };
        let Some(exp) = exp else {
            // negative exponent: 1, alternating sign for -1, otherwise 0
            let result = if base == T::ONE {
                T::ONE
            } else if base == T::ZERO.wrapping_sub(T::ONE) {
                let rhs_odd = T::from_ival(&rhs).map(|v| v.is_odd()).unwrap_or(false);
                if rhs_odd {
                    base
                } else {
                    T::ONE
                }
            } else {
                T::ZERO
            };
            self.stack.push(result.into_ival());
            return Ok(false);
        };
        let exact = pow_checked(base, exp);
        let wrapped = pow_wrapping(base, exp);
        let saturated = match exact {
            Some(v) => v,
            None => T::saturation_bound(base.is_negative() && exp % 2 == 1),
        };
        Ok(self.push_arith_result(op_pc, strat, exact, wrapped, saturated))
    }

    fn bin_shift<T: IntOps>(&mut self, op: OpCode, op_pc: Pc) -> Result<bool, Fault> {
        // shifts carry the rhs type kind as an extra immediate
        let rhs_kind_word = self.bchir.get(self.pc);
        self.pc += 1;
        let rhs_kind = TypeKind::from_u32(rhs_kind_word)
            .ok_or(Fault::BadImmediate { what: "shift rhs kind", value: rhs_kind_word })?;
        let rhs = self.pop_val()?;
        let a = self.pop_int::<T>()?;
        let (amount, negative) = shift_amount(&rhs, rhs_kind)?;
        if negative {
            self.raise_arithmetic_exception_msg(
                op_pc,
                "Overshift: Value of right operand is less than 0!",
            );
            return Ok(true);
        }
        if amount >= T::BITS as u64 {
            self.raise_arithmetic_exception_msg(
                op_pc,
                "Overshift: Value of right operand is greater than or equal to the width of left operand!",
            );
            return Ok(true);
        }
        let result = match op {
            OpCode::BinLshift | OpCode::BinLshiftExc => a.shl(amount as u32),
            _ => a.shr(amount as u32),
        };
        self.stack.push(result.into_ival());
        Ok(false)
    }

    fn bin_bool(&mut self, op: OpCode) -> Result<bool, Fault> {
        match op {
            OpCode::UnNot => {
                let v = self.pop_bool()?;
                self.stack.push(IVal::Bool(!v));
            }
            OpCode::BinEqual => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.stack.push(IVal::Bool(a == b));
            }
            OpCode::BinNoteq => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.stack.push(IVal::Bool(a != b));
            }
            _ => return Err(Fault::UnsupportedOp(op.name())),
        }
        Ok(false)
    }

    fn bin_rune(&mut self, op: OpCode) -> Result<bool, Fault> {
        let b = self.pop_rune()?;
        let a = self.pop_rune()?;
        let result = match op {
            OpCode::BinEqual => a == b,
            OpCode::BinNoteq => a != b,
            OpCode::BinLt => a < b,
            OpCode::BinGt => a > b,
            OpCode::BinLe => a <= b,
            OpCode::BinGe => a >= b,
            _ => return Err(Fault::UnsupportedOp(op.name())),
        };
        self.stack.push(IVal::Bool(result));
        Ok(false)
    }

    fn bin_unit(&mut self, op: OpCode) -> Result<bool, Fault> {
        self.pop_val()?;
        self.pop_val()?;
        match op {
            OpCode::BinEqual => self.stack.push(IVal::Bool(true)),
            OpCode::BinNoteq => self.stack.push(IVal::Bool(false)),
            _ => return Err(Fault::UnsupportedOp(op.name())),
        }
        Ok(false)
    }
}

/// Extract a shift amount: the magnitude and whether it was negative
fn shift_amount(rhs: &IVal, rhs_kind: TypeKind) -> Result<(u64, bool), Fault> {
    let (value, negative) = match (rhs_kind, rhs) {
        (TypeKind::Int8, IVal::Int8(v)) => (v.unsigned_abs() as u64, *v < 0),
        (TypeKind::Int16, IVal::Int16(v)) => (v.unsigned_abs() as u64, *v < 0),
        (TypeKind::Int32, IVal::Int32(v)) => (v.unsigned_abs() as u64, *v < 0),
        (TypeKind::Int64, IVal::Int64(v)) => (v.unsigned_abs(), *v < 0),
        (TypeKind::IntNat, IVal::IntNat(v)) => (v.unsigned_abs() as u64, *v < 0),
        (TypeKind::UInt8, IVal::UInt8(v)) => (*v as u64, false),
        (TypeKind::UInt16, IVal::UInt16(v)) => (*v as u64, false),
        (TypeKind::UInt32, IVal::UInt32(v)) => (*v as u64, false),
        (TypeKind::UInt64, IVal::UInt64(v)) => (*v, false),
        (TypeKind::UIntNat, IVal::UIntNat(v)) => (*v as u64, false),
        _ => {
            return Err(Fault::StackType {
                expected: "integer shift amount",
                found: rhs.kind_name(),
            })
        }
    };
    Ok((value, negative))
}

macro_rules! float_binop {
    ($fname:ident, $variant:ident, $ty:ty) => {
        impl<'a> Interpreter<'a> {
            fn $fname(&mut self, op: OpCode) -> Result<bool, Fault> {
                use OpCode::*;
                let pop = |interp: &mut Self| -> Result<$ty, Fault> {
                    match interp.pop_val()? {
                        IVal::$variant(v) => Ok(v),
                        other => Err(Fault::StackType {
                            expected: stringify!($variant),
                            found: other.kind_name(),
                        }),
                    }
                };
                match op {
                    UnNeg => {
                        let a = pop(self)?;
                        self.stack.push(IVal::$variant(-a));
                        return Ok(false);
                    }
                    BinExp => {
                        // the exponent may be an Int64 even for float bases
                        let rhs = self.pop_val()?;
                        let a = pop(self)?;
                        let e = match rhs {
                            IVal::$variant(e) => e as f64,
                            IVal::Int64(e) => e as f64,
                            other => {
                                return Err(Fault::StackType {
                                    expected: "float or Int64 exponent",
                                    found: other.kind_name(),
                                })
                            }
                        };
                        self.stack.push(IVal::$variant(((a as f64).powf(e)) as $ty));
                        return Ok(false);
                    }
                    _ => {}
                }
                let b = pop(self)?;
                let a = pop(self)?;
                match op {
                    BinAdd => self.stack.push(IVal::$variant(a + b)),
                    BinSub => self.stack.push(IVal::$variant(a - b)),
                    BinMul => self.stack.push(IVal::$variant(a * b)),
                    // float ops never check; NaN/Inf propagate
                    BinDiv => self.stack.push(IVal::$variant(a / b)),
                    BinMod => self.stack.push(IVal::$variant(a % b)),
                    BinEqual => self.stack.push(IVal::Bool(a == b)),
                    BinNoteq => self.stack.push(IVal::Bool(a != b)),
                    BinLt => self.stack.push(IVal::Bool(a < b)),
                    BinGt => self.stack.push(IVal::Bool(a > b)),
                    BinLe => self.stack.push(IVal::Bool(a <= b)),
                    BinGe => self.stack.push(IVal::Bool(a >= b)),
                    _ => return Err(Fault::UnsupportedOp(op.name())),
                }
                Ok(false)
            }
        }
    };
}

float_binop!(bin_float16, Float16, f32);
float_binop!(bin_float32, Float32, f32);
float_binop!(bin_float64, Float64, f64);
