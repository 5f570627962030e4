//! Definition and implementation of various operations on Units

use std::ops::{Add, Mul, Sub, Div, AddAssign, Neg};
use std::fmt::{Debug, Display};
use std::num::ParseFloatError;
use std::str::FromStr;
use num_traits::FromPrimitive;

/// Trait to consolidate traits that define various operations in the unit
pub trait UnitValue<T>: Add<Output=T> + Sub<Output=T> + Mul<Output=T> + Div<Output=T> + Neg<Output=T> +
    AddAssign + PartialOrd +
    Clone + Copy + Default + Debug + Display + FromStr<Err=ParseFloatError> + Send + Sync + 'static +
    One + Max + Sqrt + Ln + SquaredNormFloor + FromPrimitive {
}
/// Trait that returns 1 of that type
pub trait One {
    fn one() -> Self;
}
impl One for f64 {
    #[inline]
    fn one() -> f64 {
        1f64
    }
}
impl One for f32 {
    #[inline]
    fn one() -> f32 {
        1f32
    }
}
/// Trait to calculate max
pub trait Max {
    fn max(&self,other:&Self) -> Self;
}
impl Max for f64 {
    #[inline]
    fn max(&self,other:&f64) -> f64 {
        (*self).max(*other)
    }
}
impl Max for f32 {
    #[inline]
    fn max(&self,other:&f32) -> f32 {
        (*self).max(*other)
    }
}
/// Trait that returns the result of applying sqrt
pub trait Sqrt {
    fn sqrt(&self) -> Self;
}
impl Sqrt for f64 {
    #[inline]
    fn sqrt(&self) -> f64 {
        (*self).sqrt()
    }
}
impl Sqrt for f32 {
    #[inline]
    fn sqrt(&self) -> f32 {
        (*self).sqrt()
    }
}
/// Trait that returns the natural logarithm
pub trait Ln {
    fn ln(&self) -> Self;
}
impl Ln for f64 {
    #[inline]
    fn ln(&self) -> f64 {
        (*self).ln()
    }
}
impl Ln for f32 {
    #[inline]
    fn ln(&self) -> f32 {
        (*self).ln()
    }
}
/// Binary exponent of the floor applied to mean squared norms (2^-66, about 1.4e-20).
///
/// It is an even power of two, so both the floor and its inverse square root (2^33)
/// are exactly representable in f32 and f64.
pub const SQUARED_NORM_FLOOR_EXP:i32 = -66;
/// Trait that returns the floor applied to the mean squared norm of a block
pub trait SquaredNormFloor {
    fn squared_norm_floor() -> Self;
}
impl SquaredNormFloor for f64 {
    #[inline]
    fn squared_norm_floor() -> f64 {
        2f64.powi(SQUARED_NORM_FLOOR_EXP)
    }
}
impl SquaredNormFloor for f32 {
    #[inline]
    fn squared_norm_floor() -> f32 {
        2f32.powi(SQUARED_NORM_FLOOR_EXP)
    }
}
impl UnitValue<f64> for f64 {}
impl UnitValue<f32> for f32 {}
