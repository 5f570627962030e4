//! Sufficient statistics of block-columns and the normalizing transform derived from them
//!
//! Column sums are accumulated sequentially so that the same input always produces
//! bit-identical statistics; elementwise work is spread over rows with rayon.
use rayon::prelude::{IndexedParallelIterator, ParallelIterator};
use crate::arr::{Arr, Matrix};
use crate::error::SizeMismatchError;
use crate::ope::{One, Max, Sqrt, UnitValue};

/// Count, sum and sum of squares of each column of the frames of width `block_dim`
#[derive(Debug,Clone,PartialEq)]
pub struct Statistics<U> where U: UnitValue<U> {
    pub count:U,
    pub sum:Arr<U>,
    pub sumsq:Arr<U>
}
impl<U> Statistics<U> where U: UnitValue<U> {
    /// Create empty statistics (count 0)
    pub fn new(block_dim:usize) -> Statistics<U> {
        Statistics {
            count:U::default(),
            sum:Arr::new(block_dim),
            sumsq:Arr::new(block_dim)
        }
    }

    /// Accumulate the statistics of the frames of `input`
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`SizeMismatchError`]
    pub fn from_frames(input:&Matrix<U>,block_dim:usize,count:U) -> Result<Statistics<U>,SizeMismatchError> {
        Ok(Statistics {
            count:count,
            sum:sum_frames(input,block_dim)?,
            sumsq:sum_frames_product(input,input,block_dim)?
        })
    }

    pub fn block_dim(&self) -> usize {
        self.sum.len()
    }

    /// Returns true if no (positive) count has been accumulated
    pub fn is_empty(&self) -> bool {
        !(self.count > U::default())
    }

    /// Reset to count 0
    pub fn zero(&mut self) {
        self.count = U::default();

        for v in self.sum.iter_mut().chain(self.sumsq.iter_mut()) {
            *v = U::default();
        }
    }

    /// Scale count and sums by `s`; a negative `s` empties the statistics instead.
    pub fn scale(&mut self,s:U) {
        if s < U::default() {
            self.zero();
        } else {
            self.count = self.count * s;

            for v in self.sum.iter_mut().chain(self.sumsq.iter_mut()) {
                *v = *v * s;
            }
        }
    }

    /// Add `alpha` times `other`. A negative `alpha` is ignored.
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`SizeMismatchError`]
    pub fn add(&mut self,alpha:U,other:&Statistics<U>) -> Result<(),SizeMismatchError> {
        if other.block_dim() != self.block_dim() {
            return Err(SizeMismatchError(self.block_dim(),other.block_dim()));
        }

        if alpha < U::default() {
            return Ok(());
        }

        self.count += alpha * other.count;

        for (l,&r) in self.sum.iter_mut().zip(other.sum.iter()) {
            *l += alpha * r;
        }

        for (l,&r) in self.sumsq.iter_mut().zip(other.sumsq.iter()) {
            *l += alpha * r;
        }

        if self.count < U::default() {
            self.zero();
        }

        Ok(())
    }

    /// Mean and uncentered variance per column, or `None` if empty
    pub fn mean_uvar(&self) -> Option<(Arr<U>,Arr<U>)> {
        if self.is_empty() {
            None
        } else {
            let c = self.count;

            Some((self.sum.iter().map(|&s| s / c).collect::<Vec<U>>().into(),
                  self.sumsq.iter().map(|&s| s / c).collect::<Vec<U>>().into()))
        }
    }

    /// Normalizing transform implied by these statistics
    pub fn derive(&self,epsilon:U,target_rms:U) -> DerivedTransform<U> {
        compute_offset_and_scale(self.count,epsilon,target_rms,&self.sum,&self.sumsq)
    }
}
/// Offset and scale of the affine normalizing transform `y = x * scale + offset`
#[derive(Debug,Clone,PartialEq)]
pub struct DerivedTransform<U> where U: UnitValue<U> {
    pub offset:Arr<U>,
    pub scale:Arr<U>
}
impl<U> DerivedTransform<U> where U: UnitValue<U> {
    pub fn block_dim(&self) -> usize {
        self.scale.len()
    }

    /// Apply the transform to every frame of `input`
    pub fn apply(&self,input:&Matrix<U>) -> Matrix<U> {
        let mut out = input.clone();
        let block_dim = self.block_dim();

        out.par_frames_mut(block_dim).for_each(|frame| {
            for ((o,&s),&b) in frame.iter_mut().zip(self.scale.iter()).zip(self.offset.iter()) {
                *o = *o * s + b;
            }
        });

        out
    }

    /// Multiply every frame of `deriv` by the scale.
    ///
    /// This is the derivative of [`DerivedTransform::apply`] when offset and scale are held constant.
    pub fn apply_scale(&self,deriv:&Matrix<U>) -> Matrix<U> {
        let mut out = deriv.clone();
        let block_dim = self.block_dim();

        out.par_frames_mut(block_dim).for_each(|frame| {
            for (o,&s) in frame.iter_mut().zip(self.scale.iter()) {
                *o = *o * s;
            }
        });

        out
    }
}
/// Turn raw statistics into the offset and scale of a normalizing transform.
///
/// mean = sum / count, var = max(sumsq / count - mean^2, 0),
/// scale = target_rms / sqrt(var + epsilon), offset = -mean * scale.
///
/// A non-positive count yields an all-zero transform.
pub fn compute_offset_and_scale<U>(count:U,epsilon:U,target_rms:U,sum:&[U],sumsq:&[U]) -> DerivedTransform<U>
    where U: UnitValue<U> {
    let dim = sum.len();

    if !(count > U::default()) {
        log::warn!("offset and scale requested with count {}; returning a zero transform",count);

        return DerivedTransform {
            offset:Arr::new(dim),
            scale:Arr::new(dim)
        };
    }

    let inv_count = U::one() / count;

    let (offset,scale) = sum.iter().zip(sumsq.iter()).map(|(&s,&ss)| {
        let mean = s * inv_count;
        let var = (ss * inv_count - mean * mean).max(&U::default());
        let scale = target_rms / (var + epsilon).sqrt();

        (-mean * scale,scale)
    }).unzip::<U,U,Vec<U>,Vec<U>>();

    DerivedTransform {
        offset:offset.into(),
        scale:scale.into()
    }
}
/// Terms of the normalization derivative that flow through the mean and the variance.
///
/// x_deriv = -scale * deriv_sum / count,
/// scale_deriv = -scale * (deriv_y_sum / count) / target_rms^2,
/// where `deriv_sum` is the column sum of the output derivative and `deriv_y_sum`
/// the column sum of output times output derivative. Both are zero when `count` is not positive.
pub fn indirect_terms<U>(count:U,target_rms:U,scale:&[U],deriv_sum:&[U],deriv_y_sum:&[U]) -> (Arr<U>,Arr<U>)
    where U: UnitValue<U> {
    if !(count > U::default()) {
        return (Arr::new(scale.len()),Arr::new(scale.len()));
    }

    let inv_count = U::one() / count;
    let inv_t2 = U::one() / (target_rms * target_rms);

    let (x_deriv,scale_deriv) = scale.iter().zip(deriv_sum.iter()).zip(deriv_y_sum.iter()).map(|((&s,&d),&dy)| {
        (-s * d * inv_count,-s * (dy * inv_count) * inv_t2)
    }).unzip::<U,U,Vec<U>,Vec<U>>();

    (x_deriv.into(),scale_deriv.into())
}
/// Input derivative of a normalizing transform, per frame
///
/// in_deriv = out_deriv * scale + x_deriv + out_value * scale_deriv
///
/// With the terms of [`indirect_terms`] computed from the same minibatch, this is the exact
/// derivative of batch normalization, `scale * (dy - mean(dy) - y * mean(y * dy) / target_rms^2)`.
/// # Errors
///
/// This function may return the following errors
/// * [`SizeMismatchError`]
pub fn normalize_backprop<U>(out_value:&Matrix<U>,out_deriv:&Matrix<U>,
                             scale:&[U],x_deriv:&[U],scale_deriv:&[U]) -> Result<Matrix<U>,SizeMismatchError>
    where U: UnitValue<U> {
    let block_dim = scale.len();

    check_frames(out_deriv,block_dim)?;
    check_same_shape(out_value,out_deriv)?;

    let mut in_deriv = out_deriv.clone();

    in_deriv.par_frames_mut(block_dim).zip(out_value.par_frames(block_dim)).for_each(|(d,y)| {
        for ((((d,&y),&s),&xd),&sd) in d.iter_mut().zip(y.iter())
                                          .zip(scale.iter())
                                          .zip(x_deriv.iter())
                                          .zip(scale_deriv.iter()) {
            *d = *d * s + xd + y * sd;
        }
    });

    Ok(in_deriv)
}
/// Column sums over the frames of width `block_dim`
/// # Errors
///
/// This function may return the following errors
/// * [`SizeMismatchError`]
pub fn sum_frames<U>(m:&Matrix<U>,block_dim:usize) -> Result<Arr<U>,SizeMismatchError> where U: UnitValue<U> {
    check_frames(m,block_dim)?;

    let mut sum = Arr::new(block_dim);

    for frame in m.frames(block_dim) {
        for (s,&v) in sum.iter_mut().zip(frame.iter()) {
            *s += v;
        }
    }

    Ok(sum)
}
/// Column sums of the elementwise product of the frames of `l` and `r`
/// # Errors
///
/// This function may return the following errors
/// * [`SizeMismatchError`]
pub fn sum_frames_product<U>(l:&Matrix<U>,r:&Matrix<U>,block_dim:usize) -> Result<Arr<U>,SizeMismatchError>
    where U: UnitValue<U> {
    check_frames(l,block_dim)?;
    check_same_shape(l,r)?;

    let mut sum = Arr::new(block_dim);

    for (lf,rf) in l.frames(block_dim).zip(r.frames(block_dim)) {
        for ((s,&a),&b) in sum.iter_mut().zip(lf.iter()).zip(rf.iter()) {
            *s += a * b;
        }
    }

    Ok(sum)
}
/// Checks that the columns of `m` split into whole blocks of `block_dim`
/// # Errors
///
/// This function may return the following errors
/// * [`SizeMismatchError`]
pub fn check_frames<U>(m:&Matrix<U>,block_dim:usize) -> Result<(),SizeMismatchError> where U: Default {
    if block_dim == 0 || m.cols() % block_dim != 0 {
        Err(SizeMismatchError(block_dim,m.cols()))
    } else {
        Ok(())
    }
}
/// Checks that two matrices have the same shape
/// # Errors
///
/// This function may return the following errors
/// * [`SizeMismatchError`]
pub fn check_same_shape<U>(l:&Matrix<U>,r:&Matrix<U>) -> Result<(),SizeMismatchError> where U: Default {
    if l.rows() != r.rows() {
        Err(SizeMismatchError(l.rows(),r.rows()))
    } else if l.cols() != r.cols() {
        Err(SizeMismatchError(l.cols(),r.cols()))
    } else {
        Ok(())
    }
}
