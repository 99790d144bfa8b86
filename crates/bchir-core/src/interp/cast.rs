//! `TYPECAST` semantics
//!
//! Integer-to-integer conversions honour the declared overflow strategy.
//! Float-to-integer is always throwing: the value is truncated toward zero
//! and NaN, infinities and out-of-range values raise `OverflowException`.
//! Float widenings and narrowings convert to the nearest representable
//! value, and `Rune` converts to and from `UInt32`/`UInt64` by bit
//! identity.

use bchir_bytecode::{OpCode, OverflowStrategy, Pc, TypeKind};

use super::{Fault, Interpreter};
use crate::stack::ControlState;
use crate::value::IVal;

impl<'a> Interpreter<'a> {
    pub(crate) fn op_typecast(&mut self, op: OpCode, op_pc: Pc) -> Result<(), Fault> {
        let src_word = self.bchir.get(op_pc + 1);
        let src = TypeKind::from_u32(src_word)
            .ok_or(Fault::BadImmediate { what: "cast source kind", value: src_word })?;
        let tgt_word = self.bchir.get(op_pc + 2);
        let tgt = TypeKind::from_u32(tgt_word)
            .ok_or(Fault::BadImmediate { what: "cast target kind", value: tgt_word })?;
        let strat_word = self.bchir.get(op_pc + 3);
        let strat = OverflowStrategy::from_u32(strat_word)
            .ok_or(Fault::BadImmediate { what: "overflow strategy", value: strat_word })?;
        self.pc = op_pc + 4;

        if op == OpCode::TypecastExc {
            self.stack.ctrl_push(ControlState {
                op_code: op,
                callee_pc: 0,
                return_pc: op_pc,
                prev_bp: self.env.bp(),
            });
        }
        let raised = self.typecast(src, tgt, strat, op_pc)?;
        if op == OpCode::TypecastExc && !raised {
            self.stack.ctrl_pop();
            self.pc += 1;
        }
        Ok(())
    }

    fn typecast(
        &mut self,
        src: TypeKind,
        tgt: TypeKind,
        strat: OverflowStrategy,
        op_pc: Pc,
    ) -> Result<bool, Fault> {
        let val = self.pop_val()?;
        let src_value = match (src, &val) {
            (TypeKind::Rune, IVal::Rune(v)) => {
                // bit identity in both directions
                match tgt {
                    TypeKind::UInt32 => self.stack.push(IVal::UInt32(*v)),
                    TypeKind::UInt64 => self.stack.push(IVal::UInt64(*v as u64)),
                    TypeKind::Rune => self.stack.push(IVal::Rune(*v)),
                    _ => {
                        return Err(Fault::BadImmediate {
                            what: "rune cast target",
                            value: tgt as u32,
                        })
                    }
                }
                return Ok(false);
            }
            (TypeKind::Int8, IVal::Int8(v)) => CastSource::Int(*v as i128),
            (TypeKind::Int16, IVal::Int16(v)) => CastSource::Int(*v as i128),
            (TypeKind::Int32, IVal::Int32(v)) => CastSource::Int(*v as i128),
            (TypeKind::Int64, IVal::Int64(v)) => CastSource::Int(*v as i128),
            (TypeKind::IntNat, IVal::IntNat(v)) => CastSource::Int(*v as i128),
            (TypeKind::UInt8, IVal::UInt8(v)) => CastSource::Int(*v as i128),
            (TypeKind::UInt16, IVal::UInt16(v)) => CastSource::Int(*v as i128),
            (TypeKind::UInt32, IVal::UInt32(v)) => CastSource::Int(*v as i128),
            (TypeKind::UInt64, IVal::UInt64(v)) => CastSource::Int(*v as i128),
            (TypeKind::UIntNat, IVal::UIntNat(v)) => CastSource::Int(*v as i128),
            (TypeKind::Float16, IVal::Float16(v)) => CastSource::Float(*v as f64),
            (TypeKind::Float32, IVal::Float32(v)) => CastSource::Float(*v as f64),
            (TypeKind::Float64, IVal::Float64(v)) => CastSource::Float(*v),
            _ => {
                return Err(Fault::StackType { expected: src.name(), found: val.kind_name() })
            }
        };
        match src_value {
            CastSource::Int(v) => self.cast_int_to(v, tgt, strat, op_pc),
            CastSource::Float(v) => self.cast_float_to(v, tgt, op_pc),
        }
    }

    fn cast_int_to(
        &mut self,
        v: i128,
        tgt: TypeKind,
        strat: OverflowStrategy,
        op_pc: Pc,
    ) -> Result<bool, Fault> {
        macro_rules! to_int {
            ($ty:ty, $wrap:expr) => {{
                let exact = <$ty>::try_from(v).ok();
                match strat {
                    OverflowStrategy::Throwing => match exact {
                        Some(x) => self.stack.push($wrap(x)),
                        None => {
                            self.raise_overflow_exception(op_pc);
                            return Ok(true);
                        }
                    },
                    OverflowStrategy::Checked => match exact {
                        Some(x) => self
                            .stack
                            .push(IVal::Tuple(vec![IVal::Bool(false), $wrap(x)])),
                        None => self.stack.push(IVal::Tuple(vec![IVal::Bool(true)])),
                    },
                    OverflowStrategy::Saturating => {
                        let clamped = if v < <$ty>::MIN as i128 {
                            <$ty>::MIN
                        } else if v > <$ty>::MAX as i128 {
                            <$ty>::MAX
                        } else {
                            v as $ty
                        };
                        self.stack.push($wrap(clamped));
                    }
                    OverflowStrategy::Wrapping | OverflowStrategy::Na => {
                        self.stack.push($wrap(v as $ty));
                    }
                }
                Ok(false)
            }};
        }
        match tgt {
            TypeKind::Int8 => to_int!(i8, IVal::Int8),
            TypeKind::Int16 => to_int!(i16, IVal::Int16),
            TypeKind::Int32 => to_int!(i32, IVal::Int32),
            TypeKind::Int64 => to_int!(i64, IVal::Int64),
            TypeKind::IntNat => to_int!(isize, IVal::IntNat),
            TypeKind::UInt8 => to_int!(u8, IVal::UInt8),
            TypeKind::UInt16 => to_int!(u16, IVal::UInt16),
            TypeKind::UInt32 => to_int!(u32, IVal::UInt32),
            TypeKind::UInt64 => to_int!(u64, IVal::UInt64),
            TypeKind::UIntNat => to_int!(usize, IVal::UIntNat),
            TypeKind::Rune => to_int!(u32, IVal::Rune),
            TypeKind::Float16 => {
                self.stack.push(IVal::Float16(v as f32));
                Ok(false)
            }
            TypeKind::Float32 => {
                self.stack.push(IVal::Float32(v as f32));
                Ok(false)
            }
            TypeKind::Float64 => {
                self.stack.push(IVal::Float64(v as f64));
                Ok(false)
            }
            _ => Err(Fault::BadImmediate { what: "integer cast target", value: tgt as u32 }),
        }
    }

    fn cast_float_to(&mut self, v: f64, tgt: TypeKind, op_pc: Pc) -> Result<bool, Fault> {
        // fractional part truncates toward zero; the bound checks run on
        // the truncated value so e.g. 127.9 still fits an Int8
        macro_rules! to_int {
            ($ty:ty, $wrap:expr) => {{
                let t = v.trunc();
                let min = <$ty>::MIN as f64;
                let max_plus_one = (<$ty>::MAX as f64) + 1.0;
                if !v.is_finite() || t < min || t >= max_plus_one {
                    self.raise_overflow_exception(op_pc);
                    return Ok(true);
                }
                self.stack.push($wrap(t as $ty));
                Ok(false)
            }};
        }
        match tgt {
            TypeKind::Int8 => to_int!(i8, IVal::Int8),
            TypeKind::Int16 => to_int!(i16, IVal::Int16),
            TypeKind::Int32 => to_int!(i32, IVal::Int32),
            TypeKind::Int64 => to_int!(i64, IVal::Int64),
            TypeKind::IntNat => to_int!(isize, IVal::IntNat),
            TypeKind::UInt8 => to_int!(u8, IVal::UInt8),
            TypeKind::UInt16 => to_int!(u16, IVal::UInt16),
            TypeKind::UInt32 => to_int!(u32, IVal::UInt32),
            TypeKind::UInt64 => to_int!(u64, IVal::UInt64),
            TypeKind::UIntNat => to_int!(usize, IVal::UIntNat),
            TypeKind::Float16 => {
                self.stack.push(IVal::Float16(v as f32));
                Ok(false)
            }
            TypeKind::Float32 => {
                self.stack.push(IVal::Float32(v as f32));
                Ok(false)
            }
            TypeKind::Float64 => {
                self.stack.push(IVal::Float64(v));
                Ok(false)
            }
            _ => Err(Fault::BadImmediate { what: "float cast target", value: tgt as u32 }),
        }
    }
}

enum CastSource {
    Int(i128),
    Float(f64),
}
