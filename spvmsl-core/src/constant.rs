//! Constant and specialization-constant records (§3 "Constant / ConstantOp").
use std::convert::TryFrom;

use half::f16;
use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::id::SpecId;
use crate::ty::{ScalarType, Type};

/// Typed constant value. Adapted from the reflection-library pattern of
/// carrying raw little-endian bytes until a type is known, then coercing
/// once via `to_typed`.
#[non_exhaustive]
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum ConstantValue {
    Typeless(Box<[u8]>),
    Bool(bool),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F16(OrderedFloat<f16>),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
}

impl From<&[u32]> for ConstantValue {
    fn from(x: &[u32]) -> Self {
        let bytes = x.iter().flat_map(|x| x.to_le_bytes()).collect();
        ConstantValue::Typeless(bytes)
    }
}
impl From<&[u8]> for ConstantValue {
    fn from(x: &[u8]) -> Self {
        ConstantValue::Typeless(x.to_owned().into_boxed_slice())
    }
}
impl From<bool> for ConstantValue {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}
impl From<u32> for ConstantValue {
    fn from(x: u32) -> Self {
        Self::U32(x)
    }
}
impl From<i32> for ConstantValue {
    fn from(x: i32) -> Self {
        Self::S32(x)
    }
}
impl From<f32> for ConstantValue {
    fn from(x: f32) -> Self {
        Self::F32(OrderedFloat(x))
    }
}

impl ConstantValue {
    /// Coerces a raw `Typeless` payload into the variant matching `ty`'s
    /// scalar kind (§3: "scalar or composite literal").
    pub fn to_typed(&self, ty: &Type) -> Result<Self> {
        let x = match self {
            Self::Typeless(x) => x,
            _ => return Err(Error::invalid_argument(format!("{:?} is already typed", self))),
        };
        let scalar_ty = ty
            .as_scalar()
            .ok_or_else(|| Error::invalid_argument(format!("cannot parse {:?} as a constant value", ty)))?;
        match scalar_ty {
            ScalarType::Boolean => Ok(ConstantValue::Bool(x.iter().any(|b| *b != 0))),
            ScalarType::Integer { bits: 8, is_signed: true } if !x.is_empty() => {
                Ok(ConstantValue::S8(i8::from_le_bytes([x[0]])))
            }
            ScalarType::Integer { bits: 8, is_signed: false } if !x.is_empty() => {
                Ok(ConstantValue::U8(u8::from_le_bytes([x[0]])))
            }
            ScalarType::Integer { bits: 16, is_signed: true } if x.len() >= 2 => {
                Ok(ConstantValue::S16(i16::from_le_bytes([x[0], x[1]])))
            }
            ScalarType::Integer { bits: 16, is_signed: false } if x.len() >= 2 => {
                Ok(ConstantValue::U16(u16::from_le_bytes([x[0], x[1]])))
            }
            ScalarType::Integer { bits: 32, is_signed: true } if x.len() >= 4 => Ok(ConstantValue::S32(
                i32::from_le_bytes([x[0], x[1], x[2], x[3]]),
            )),
            ScalarType::Integer { bits: 32, is_signed: false } if x.len() >= 4 => Ok(ConstantValue::U32(
                u32::from_le_bytes([x[0], x[1], x[2], x[3]]),
            )),
            ScalarType::Integer { bits: 64, is_signed: true } if x.len() >= 8 => {
                Ok(ConstantValue::S64(i64::from_le_bytes(<[u8; 8]>::try_from(&x[0..8]).unwrap())))
            }
            ScalarType::Integer { bits: 64, is_signed: false } if x.len() >= 8 => {
                Ok(ConstantValue::U64(u64::from_le_bytes(<[u8; 8]>::try_from(&x[0..8]).unwrap())))
            }
            ScalarType::Float { bits: 16 } if x.len() >= 2 => {
                Ok(ConstantValue::F16(OrderedFloat(f16::from_le_bytes([x[0], x[1]]))))
            }
            ScalarType::Float { bits: 32 } if x.len() >= 4 => Ok(ConstantValue::F32(OrderedFloat(
                f32::from_le_bytes([x[0], x[1], x[2], x[3]]),
            ))),
            ScalarType::Float { bits: 64 } if x.len() >= 8 => Ok(ConstantValue::F64(OrderedFloat(
                f64::from_le_bytes(<[u8; 8]>::try_from(&x[0..8]).unwrap()),
            ))),
            _ => Err(Error::invalid_argument(format!(
                "cannot parse {:?} from {} bytes",
                scalar_ty,
                x.len()
            ))),
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(x) => Some(*x),
            _ => None,
        }
    }
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::S8(x) => Some(*x as i64),
            Self::S16(x) => Some(*x as i64),
            Self::S32(x) => Some(*x as i64),
            Self::S64(x) => Some(*x),
            Self::U8(x) => Some(*x as i64),
            Self::U16(x) => Some(*x as i64),
            Self::U32(x) => Some(*x as i64),
            Self::U64(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }
    pub fn to_u32(&self) -> Option<u32> {
        match self {
            Self::U32(x) => Some(*x),
            Self::S32(x) if *x >= 0 => Some(*x as u32),
            _ => None,
        }
    }
    pub fn to_f32(&self) -> Option<f32> {
        match self {
            Self::F32(x) => Some((*x).into()),
            _ => None,
        }
    }

    pub fn to_typeless(&self) -> Box<[u8]> {
        match self {
            Self::Typeless(x) => x.clone(),
            Self::S8(x) => Box::new(x.to_le_bytes()),
            Self::S16(x) => Box::new(x.to_le_bytes()),
            Self::S32(x) => Box::new(x.to_le_bytes()),
            Self::S64(x) => Box::new(x.to_le_bytes()),
            Self::U8(x) => Box::new(x.to_le_bytes()),
            Self::U16(x) => Box::new(x.to_le_bytes()),
            Self::U32(x) => Box::new(x.to_le_bytes()),
            Self::U64(x) => Box::new(x.to_le_bytes()),
            Self::F16(x) => Box::new(x.into_inner().to_le_bytes()),
            Self::F32(x) => Box::new(x.into_inner().to_le_bytes()),
            Self::F64(x) => Box::new(x.into_inner().to_le_bytes()),
            Self::Bool(x) => Box::new([*x as u8]),
        }
    }

    /// Renders the MSL literal for this value, used directly by the
    /// expression emitter (§4.7) for constant operands.
    pub fn to_msl_literal(&self) -> String {
        match self {
            Self::Bool(x) => x.to_string(),
            Self::S8(x) => format!("{}", x),
            Self::S16(x) => format!("{}", x),
            Self::S32(x) => format!("{}", x),
            Self::S64(x) => format!("{}L", x),
            Self::U8(x) => format!("{}u", x),
            Self::U16(x) => format!("{}u", x),
            Self::U32(x) => format!("{}u", x),
            Self::U64(x) => format!("{}uL", x),
            Self::F16(x) => format!("{}h", x.into_inner()),
            Self::F32(x) => {
                let v: f32 = (*x).into();
                if v.fract() == 0.0 {
                    format!("{}.0", v)
                } else {
                    format!("{}", v)
                }
            }
            Self::F64(x) => format!("{}", x.into_inner()),
            Self::Typeless(_) => "/* untyped constant */".into(),
        }
    }
}

/// Constant or specialization-constant record.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct Constant {
    pub name: Option<String>,
    pub ty: Type,
    pub value: ConstantValue,
    pub spec_id: Option<SpecId>,
}
impl Constant {
    pub fn new(name: Option<String>, ty: Type, value: ConstantValue) -> Self {
        Self {
            name,
            ty,
            value,
            spec_id: None,
        }
    }
    pub fn new_itm(ty: Type, value: ConstantValue) -> Self {
        Self {
            name: None,
            ty,
            value,
            spec_id: None,
        }
    }
    pub fn new_spec(name: Option<String>, ty: Type, value: ConstantValue, spec_id: SpecId) -> Self {
        Self {
            name,
            ty,
            value,
            spec_id: Some(spec_id),
        }
    }
    pub fn is_spec_constant(&self) -> bool {
        self.spec_id.is_some()
    }
}

/// A constant produced by folding a `OpSpecConstantOp`/arithmetic chain
/// (§3 "an evaluated constant operation").
#[derive(Clone, Debug)]
pub struct ConstantOp {
    pub opcode: spirv::Op,
    pub operands: Vec<crate::id::ConstantId>,
    pub result_ty: Type,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typeless_coerces_to_f32() {
        let raw = ConstantValue::from(1.5f32.to_le_bytes().as_slice());
        let typed = raw.to_typed(&Type::Scalar(ScalarType::Float { bits: 32 })).unwrap();
        assert_eq!(typed.to_f32(), Some(1.5));
    }

    #[test]
    fn msl_literal_for_integer_is_plain() {
        let c = ConstantValue::U32(3);
        assert_eq!(c.to_msl_literal(), "3u");
    }
}
