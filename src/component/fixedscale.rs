//! Rescaling of each block of a row to a fixed root-mean-square value
use rayon::prelude::{IndexedParallelIterator, ParallelIterator};
use crate::arr::Matrix;
use crate::component::{check_cols, check_type_tag, unit_from_usize, Component, NoMemo, Properties};
use crate::config::{check_block_dim, ConfigLine};
use crate::error::{ConfigReadError, EvaluateError, PersistenceError, SizeMismatchError, TrainingError};
use crate::ope::{Ln, Max, One, Sqrt, SquaredNormFloor, UnitValue};
use crate::persistence::{Persistence, ReadPersistence, WritePersistence};

/// Implements, separately for every block of `block_dim` columns of a row,
///
/// y = x * target_rms / max(sqrt(|x|^2 / block_dim), sqrt(floor))
///
/// so that the root-mean-square of every output block equals `target_rms`.
/// An all-zero block produces an all-zero output block.
///
/// With `add_log_stddev`, every output block is followed by one extra column holding
/// `log(max(sqrt(|x|^2 / block_dim), sqrt(floor)))`.
#[derive(Debug,Clone,PartialEq)]
pub struct FixedScaleComponent<U> where U: UnitValue<U> {
    dim:usize,
    block_dim:usize,
    target_rms:U,
    add_log_stddev:bool
}
impl<U> Default for FixedScaleComponent<U> where U: UnitValue<U> {
    fn default() -> Self {
        FixedScaleComponent {
            dim:0,
            block_dim:0,
            target_rms:U::one(),
            add_log_stddev:false
        }
    }
}
impl<U> FixedScaleComponent<U> where U: UnitValue<U> {
    pub const TYPE_NAME:&'static str = "FixedScaleComponent";

    /// Create an instance
    /// # Arguments
    /// * `dim` - input dimension
    /// * `block_dim` - width of the blocks normalized separately (must divide `dim`)
    /// * `target_rms` - root-mean-square of every output block
    /// * `add_log_stddev` - append the log of the input rms to every block
    ///
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn new(dim:usize,block_dim:usize,target_rms:U,add_log_stddev:bool) -> Result<FixedScaleComponent<U>,ConfigReadError> {
        check_block_dim(dim,block_dim)?;

        if !(target_rms > U::default()) {
            return Err(ConfigReadError::InvalidState(format!("target-rms must be positive, got {}",target_rms)));
        }

        Ok(FixedScaleComponent {
            dim:dim,
            block_dim:block_dim,
            target_rms:target_rms,
            add_log_stddev:add_log_stddev
        })
    }

    /// Create an instance from the keys `dim` (or `input-dim`), `block-dim`, `target-rms`, `add-log-stddev`
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn from_config(cfl:&mut ConfigLine) -> Result<FixedScaleComponent<U>,ConfigReadError> {
        let dim = match cfl.get_usize("dim")? {
            Some(dim) => dim,
            None => cfl.require_usize("input-dim")?
        };
        let block_dim = cfl.get_usize("block-dim")?.unwrap_or(dim);
        let target_rms = cfl.get_unit("target-rms")?.unwrap_or(U::one());
        let add_log_stddev = cfl.get_bool("add-log-stddev")?.unwrap_or(false);

        cfl.check_unused()?;

        FixedScaleComponent::new(dim,block_dim,target_rms,add_log_stddev)
    }

    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    pub fn target_rms(&self) -> U {
        self.target_rms
    }

    pub fn add_log_stddev(&self) -> bool {
        self.add_log_stddev
    }

    fn output_block_dim(&self) -> usize {
        self.block_dim + if self.add_log_stddev { 1 } else { 0 }
    }

    pub(crate) fn read_body<P: ReadPersistence<U>>(&mut self, persistence:&mut P) -> Result<(),ConfigReadError> {
        persistence.expect_token("<Dim>")?;
        let dim = persistence.read_usize()?;
        persistence.expect_token("<BlockDim>")?;
        let block_dim = persistence.read_usize()?;
        persistence.expect_token("<TargetRms>")?;
        let target_rms = persistence.read_unit()?;
        persistence.expect_token("<AddLogStddev>")?;
        let add_log_stddev = persistence.read_bool()?;
        persistence.expect_token("</FixedScaleComponent>")?;

        *self = FixedScaleComponent::new(dim,block_dim,target_rms,add_log_stddev)?;

        Ok(())
    }
}
impl<U> Component<U> for FixedScaleComponent<U> where U: UnitValue<U> {
    type Memo = NoMemo;

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        if self.add_log_stddev {
            self.dim + self.dim / self.block_dim
        } else {
            self.dim
        }
    }

    fn properties(&self) -> Properties {
        Properties {
            simple_component:true,
            backprop_needs_input:true,
            propagate_in_place:!self.add_log_stddev,
            backprop_in_place:!self.add_log_stddev,
            input_contiguous:self.block_dim < self.dim,
            output_contiguous:self.block_dim < self.dim,
            ..Properties::default()
        }
    }

    fn info(&self) -> String {
        format!("{}, input-dim={}, output-dim={}, block-dim={}, target-rms={}, add-log-stddev={}",
                self.type_name(),self.input_dim(),self.output_dim(),self.block_dim,self.target_rms,self.add_log_stddev)
    }

    fn propagate(&self, input: &Matrix<U>) -> Result<(Matrix<U>,Option<NoMemo>), EvaluateError> {
        check_cols(input,self.dim)?;

        let block_dim = self.block_dim;
        let n = unit_from_usize::<U>(block_dim)?;
        let floor = U::squared_norm_floor();
        let half = U::from_f64(0.5).ok_or(EvaluateError::TypeCastError(String::from(
            "Error in type conversion from f64."
        )))?;

        let mut out = Matrix::new(input.rows(),self.output_dim());

        out.par_frames_mut(self.output_block_dim())
            .zip(input.par_frames(block_dim))
            .for_each(|(o,x)| {
                let sumsq = x.iter().fold(U::default(),|acc,&v| acc + v * v);
                let norm_sq = (sumsq / n).max(&floor);
                let scale = self.target_rms / norm_sq.sqrt();

                for (o,&x) in o.iter_mut().zip(x.iter()) {
                    *o = x * scale;
                }

                if self.add_log_stddev {
                    o[block_dim] = half * norm_sq.ln();
                }
            });

        Ok((out,None))
    }

    fn backprop(&self, in_value: &Matrix<U>, _: &Matrix<U>, out_deriv: &Matrix<U>, _: Option<&mut NoMemo>)
        -> Result<Matrix<U>, TrainingError> {
        check_cols(in_value,self.dim)?;
        check_cols(out_deriv,self.output_dim())?;

        if in_value.rows() != out_deriv.rows() {
            return Err(TrainingError::from(SizeMismatchError(in_value.rows(),out_deriv.rows())));
        }

        let block_dim = self.block_dim;
        let n = unit_from_usize::<U>(block_dim)?;
        let floor = U::squared_norm_floor();

        let mut in_deriv = Matrix::new(in_value.rows(),self.dim);

        in_deriv.par_frames_mut(block_dim)
            .zip(in_value.par_frames(block_dim))
            .zip(out_deriv.par_frames(self.output_block_dim()))
            .for_each(|((d,x),dy)| {
                let sumsq = x.iter().fold(U::default(),|acc,&v| acc + v * v);
                let mean_sq = sumsq / n;

                if mean_sq < floor {
                    let scale = self.target_rms / floor.sqrt();

                    for (d,&dy) in d.iter_mut().zip(dy.iter()) {
                        *d = dy * scale;
                    }
                } else {
                    let scale = self.target_rms / mean_sq.sqrt();
                    let dot = x.iter().zip(dy.iter()).fold(U::default(),|acc,(&x,&dy)| acc + x * dy);
                    let inv_sumsq = U::one() / sumsq;
                    let log_deriv = if self.add_log_stddev {
                        dy[block_dim] * inv_sumsq
                    } else {
                        U::default()
                    };

                    for ((d,&x),&dy) in d.iter_mut().zip(x.iter()).zip(dy.iter()) {
                        *d = scale * (dy - x * dot * inv_sumsq) + x * log_deriv;
                    }
                }
            });

        Ok(in_deriv)
    }
}
impl<U,P> Persistence<U,P> for FixedScaleComponent<U>
    where U: UnitValue<U>, P: ReadPersistence<U> + WritePersistence<U> {
    fn load(&mut self, persistence: &mut P) -> Result<(), ConfigReadError> {
        check_type_tag::<U,_>(persistence,Self::TYPE_NAME)?;

        self.read_body(persistence)
    }

    fn save(&self, persistence: &mut P) -> Result<(), PersistenceError> {
        persistence.write_token("<FixedScaleComponent>");
        persistence.write_token("<Dim>");
        persistence.write_usize(self.dim);
        persistence.write_token("<BlockDim>");
        persistence.write_usize(self.block_dim);
        persistence.write_token("<TargetRms>");
        persistence.write_unit(self.target_rms);
        persistence.write_token("<AddLogStddev>");
        persistence.write_bool(self.add_log_stddev);
        persistence.write_token("</FixedScaleComponent>");
        persistence.end_component();

        Ok(())
    }
}
