//! Normalization with statistics accumulated over the whole training history
//!
//! Unlike [`BatchNormComponent`](crate::component::BatchNormComponent), the mean and variance
//! applied in training are those stored before the current minibatch, so the output of a frame
//! does not depend on the other frames of its minibatch. Only the very first minibatch of a
//! fresh instance is normalized with its own statistics.
use crate::arr::{Arr, Matrix};
use crate::component::{check_cols, check_type_tag, summarize_stats, unit_from_usize, Component, Properties};
use crate::component::batchnormalization::{default_epsilon, read_block, read_stats, write_stats};
use crate::config::{check_block_dim, ConfigLine};
use crate::error::{ConfigReadError, EvaluateError, PersistenceError, SizeMismatchError, TrainingError};
use crate::ope::{One, UnitValue};
use crate::persistence::{Persistence, ReadPersistence, WritePersistence};
use crate::statistics::{indirect_terms, normalize_backprop, sum_frames, sum_frames_product, DerivedTransform, Statistics};

/// Column sums of the output derivative and of output times output derivative
#[derive(Debug,Clone,PartialEq)]
pub struct GradientMoments<U> where U: UnitValue<U> {
    pub count:U,
    pub deriv_sum:Arr<U>,
    pub deriv_y_sum:Arr<U>
}
impl<U> GradientMoments<U> where U: UnitValue<U> {
    pub fn new(block_dim:usize) -> GradientMoments<U> {
        GradientMoments {
            count:U::default(),
            deriv_sum:Arr::new(block_dim),
            deriv_y_sum:Arr::new(block_dim)
        }
    }

    pub fn block_dim(&self) -> usize {
        self.deriv_sum.len()
    }

    pub fn zero(&mut self) {
        self.count = U::default();

        for v in self.deriv_sum.iter_mut().chain(self.deriv_y_sum.iter_mut()) {
            *v = U::default();
        }
    }

    pub fn scale(&mut self,s:U) {
        if s < U::default() {
            self.zero();
        } else {
            self.count = self.count * s;

            for v in self.deriv_sum.iter_mut().chain(self.deriv_y_sum.iter_mut()) {
                *v = *v * s;
            }
        }
    }

    fn add(&mut self,alpha:U,other:&GradientMoments<U>) {
        self.count += alpha * other.count;

        for (l,&r) in self.deriv_sum.iter_mut().zip(other.deriv_sum.iter()) {
            *l += alpha * r;
        }

        for (l,&r) in self.deriv_y_sum.iter_mut().zip(other.deriv_y_sum.iter()) {
            *l += alpha * r;
        }

        if self.count < U::default() {
            self.zero();
        }
    }
}
/// Quantities derived from the accumulated statistics of [`StreamingNormComponent`]
#[derive(Debug,Clone,PartialEq)]
pub struct StreamingDerived<U> where U: UnitValue<U> {
    pub transform:DerivedTransform<U>,
    /// -scale * mean(dy)
    pub x_deriv:Arr<U>,
    /// -scale * mean(y * dy) / target_rms^2
    pub scale_deriv:Arr<U>
}
/// Which terms of the derivative that flow through the statistics `backprop` adds
#[derive(Debug)]
pub enum IndirectTerms<U> where U: UnitValue<U> {
    /// Statistics treated as constants
    Omitted,
    /// Terms computed from the gradient moments accumulated so far
    FromHistory {
        x_deriv:Arr<U>,
        scale_deriv:Arr<U>
    },
    /// The transform came from the current minibatch, so the exact batch normalization derivative applies
    FromMinibatch
}
/// Memo of a training-mode propagation of [`StreamingNormComponent`]
#[derive(Debug)]
pub struct StreamingNormMemo<U> where U: UnitValue<U> {
    pub num_frames:usize,
    /// Statistics of the current minibatch, folded in by `store_stats`
    pub stats:Statistics<U>,
    /// Transform applied in the forward pass
    pub transform:DerivedTransform<U>,
    pub indirect:IndirectTerms<U>,
    /// Recorded by `backprop` when the indirect derivative is enabled
    pub moments:Option<GradientMoments<U>>
}
/// Normalization with a running aggregate of the statistics
#[derive(Debug,Clone,PartialEq)]
pub struct StreamingNormComponent<U> where U: UnitValue<U> {
    dim:usize,
    block_dim:usize,
    epsilon:U,
    target_rms:U,
    include_indirect_derivative:bool,
    test_mode:bool,
    stats:Statistics<U>,
    moments:GradientMoments<U>,
    derived:Option<StreamingDerived<U>>
}
impl<U> Default for StreamingNormComponent<U> where U: UnitValue<U> {
    fn default() -> Self {
        StreamingNormComponent {
            dim:0,
            block_dim:0,
            epsilon:U::default(),
            target_rms:U::one(),
            include_indirect_derivative:true,
            test_mode:false,
            stats:Statistics::new(0),
            moments:GradientMoments::new(0),
            derived:None
        }
    }
}
impl<U> StreamingNormComponent<U> where U: UnitValue<U> {
    pub const TYPE_NAME:&'static str = "StreamingNormComponent";

    /// Create an instance in training mode with empty statistics
    /// # Arguments
    /// * `dim` - input and output dimension
    /// * `block_dim` - width of the frames (must divide `dim`)
    /// * `epsilon` - added to the variance
    /// * `target_rms` - standard deviation of the output
    /// * `include_indirect_derivative` - include the derivative that flows through the statistics
    ///
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn new(dim:usize,block_dim:usize,epsilon:U,target_rms:U,include_indirect_derivative:bool)
        -> Result<StreamingNormComponent<U>,ConfigReadError> {
        check_block_dim(dim,block_dim)?;

        if !(epsilon > U::default()) {
            return Err(ConfigReadError::InvalidState(format!("epsilon must be positive, got {}",epsilon)));
        } else if !(target_rms > U::default()) {
            return Err(ConfigReadError::InvalidState(format!("target-rms must be positive, got {}",target_rms)));
        }

        Ok(StreamingNormComponent {
            dim:dim,
            block_dim:block_dim,
            epsilon:epsilon,
            target_rms:target_rms,
            include_indirect_derivative:include_indirect_derivative,
            test_mode:false,
            stats:Statistics::new(block_dim),
            moments:GradientMoments::new(block_dim),
            derived:None
        })
    }

    /// Create an instance from the keys `dim`, `block-dim`, `epsilon`, `target-rms`,
    /// `include-indirect-derivative`
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn from_config(cfl:&mut ConfigLine) -> Result<StreamingNormComponent<U>,ConfigReadError> {
        let dim = cfl.require_usize("dim")?;
        let block_dim = cfl.get_usize("block-dim")?.unwrap_or(dim);
        let epsilon = match cfl.get_unit("epsilon")? {
            Some(epsilon) => epsilon,
            None => default_epsilon()?
        };
        let target_rms = cfl.get_unit("target-rms")?.unwrap_or(U::one());
        let include_indirect_derivative = cfl.get_bool("include-indirect-derivative")?.unwrap_or(true);

        cfl.check_unused()?;

        StreamingNormComponent::new(dim,block_dim,epsilon,target_rms,include_indirect_derivative)
    }

    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    pub fn epsilon(&self) -> U {
        self.epsilon
    }

    pub fn target_rms(&self) -> U {
        self.target_rms
    }

    pub fn include_indirect_derivative(&self) -> bool {
        self.include_indirect_derivative
    }

    /// Accumulated statistics of the input
    pub fn stats(&self) -> &Statistics<U> {
        &self.stats
    }

    /// Accumulated moments of the output derivative
    pub fn moments(&self) -> &GradientMoments<U> {
        &self.moments
    }

    /// Cached derived quantities, if they are up to date with the statistics
    pub fn derived(&self) -> Option<&StreamingDerived<U>> {
        self.derived.as_ref()
    }

    /// Compute and cache the quantities implied by the accumulated statistics
    pub fn refresh_derived(&mut self) {
        if !self.stats.is_empty() && self.derived.is_none() {
            self.derived = Some(self.compute_derived());
        }
    }

    fn compute_derived(&self) -> StreamingDerived<U> {
        let transform = self.stats.derive(self.epsilon,self.target_rms);

        let (x_deriv,scale_deriv) = indirect_terms(self.moments.count,
                                                   self.target_rms,
                                                   &transform.scale,
                                                   &self.moments.deriv_sum,
                                                   &self.moments.deriv_y_sum);

        StreamingDerived {
            transform:transform,
            x_deriv:x_deriv,
            scale_deriv:scale_deriv
        }
    }

    fn current_derived(&self) -> Result<StreamingDerived<U>,EvaluateError> {
        match self.derived {
            Some(ref d) => Ok(d.clone()),
            None if self.stats.is_empty() => {
                Err(EvaluateError::InvalidState(String::from(
                    "StreamingNormComponent has no statistics accumulated.")))
            },
            None => Ok(self.compute_derived())
        }
    }

    fn invalidate(&mut self) {
        self.derived = None;
    }

    pub(crate) fn read_body<P: ReadPersistence<U>>(&mut self, persistence:&mut P) -> Result<(),ConfigReadError> {
        persistence.expect_token("<Dim>")?;
        let dim = persistence.read_usize()?;
        persistence.expect_token("<BlockDim>")?;
        let block_dim = persistence.read_usize()?;
        persistence.expect_token("<Epsilon>")?;
        let epsilon = persistence.read_unit()?;
        persistence.expect_token("<TargetRms>")?;
        let target_rms = persistence.read_unit()?;
        persistence.expect_token("<IncludeIndirectDerivative>")?;
        let include_indirect_derivative = persistence.read_bool()?;

        let mut c = StreamingNormComponent::new(dim,block_dim,epsilon,target_rms,include_indirect_derivative)?;

        persistence.expect_token("<TestMode>")?;
        c.test_mode = persistence.read_bool()?;
        c.stats = read_stats(persistence,block_dim)?;

        persistence.expect_token("<BackwardCount>")?;
        let backward_count = persistence.read_unit()?;
        persistence.expect_token("<DerivSum>")?;
        let deriv_sum = read_block(persistence,block_dim)?;
        persistence.expect_token("<DerivYSum>")?;
        let deriv_y_sum = read_block(persistence,block_dim)?;

        if backward_count < U::default() {
            return Err(ConfigReadError::InvalidState(format!("Negative backward count {}",backward_count)));
        }

        c.moments = GradientMoments {
            count:backward_count,
            deriv_sum:deriv_sum,
            deriv_y_sum:deriv_y_sum
        };

        match &*persistence.read_token()? {
            "<Offset>" => {
                let offset = read_block(persistence,block_dim)?;
                persistence.expect_token("<Scale>")?;
                let scale = read_block(persistence,block_dim)?;
                persistence.expect_token("<XDeriv>")?;
                let x_deriv = read_block(persistence,block_dim)?;
                persistence.expect_token("<ScaleDeriv>")?;
                let scale_deriv = read_block(persistence,block_dim)?;
                persistence.expect_token("</StreamingNormComponent>")?;

                c.derived = Some(StreamingDerived {
                    transform:DerivedTransform {
                        offset:offset,
                        scale:scale
                    },
                    x_deriv:x_deriv,
                    scale_deriv:scale_deriv
                });
            },
            "</StreamingNormComponent>" => (),
            t => {
                return Err(ConfigReadError::InvalidState(format!(
                    "Expected <Offset> or </StreamingNormComponent>, got {}",t)));
            }
        }

        *self = c;

        Ok(())
    }
}
impl<U> Component<U> for StreamingNormComponent<U> where U: UnitValue<U> {
    type Memo = StreamingNormMemo<U>;

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn properties(&self) -> Properties {
        Properties {
            simple_component:true,
            backprop_needs_output:!self.test_mode && self.include_indirect_derivative,
            propagate_in_place:true,
            backprop_in_place:true,
            uses_memo:!self.test_mode,
            stores_stats:!self.test_mode,
            input_contiguous:self.block_dim < self.dim,
            output_contiguous:self.block_dim < self.dim,
            ..Properties::default()
        }
    }

    fn info(&self) -> String {
        format!("{}, dim={}, block-dim={}, epsilon={}, target-rms={}, include-indirect-derivative={}, test-mode={}, backward-count={}, {}",
                self.type_name(),self.dim,self.block_dim,self.epsilon,self.target_rms,
                self.include_indirect_derivative,self.test_mode,self.moments.count,
                summarize_stats(&self.stats))
    }

    fn propagate(&self, input: &Matrix<U>) -> Result<(Matrix<U>,Option<StreamingNormMemo<U>>), EvaluateError> {
        check_cols(input,self.dim)?;

        if self.test_mode {
            return Ok((self.current_derived()?.transform.apply(input),None));
        }

        let num_frames = input.num_frames(self.block_dim);
        let count = unit_from_usize::<U>(num_frames)?;
        let stats = Statistics::from_frames(input,self.block_dim,count)?;

        let (transform,indirect) = if self.stats.is_empty() {
            let transform = stats.derive(self.epsilon,self.target_rms);

            if self.include_indirect_derivative {
                (transform,IndirectTerms::FromMinibatch)
            } else {
                (transform,IndirectTerms::Omitted)
            }
        } else {
            let derived = self.current_derived()?;

            if self.include_indirect_derivative && self.moments.count > U::default() {
                (derived.transform,IndirectTerms::FromHistory {
                    x_deriv:derived.x_deriv,
                    scale_deriv:derived.scale_deriv
                })
            } else {
                (derived.transform,IndirectTerms::Omitted)
            }
        };

        let out = transform.apply(input);

        Ok((out,Some(StreamingNormMemo {
            num_frames:num_frames,
            stats:stats,
            transform:transform,
            indirect:indirect,
            moments:None
        })))
    }

    fn backprop(&self, _: &Matrix<U>, out_value: &Matrix<U>, out_deriv: &Matrix<U>, memo: Option<&mut StreamingNormMemo<U>>)
        -> Result<Matrix<U>, TrainingError> {
        check_cols(out_deriv,self.dim)?;

        let memo = match memo {
            None if self.test_mode => {
                return Ok(self.current_derived()?.transform.apply_scale(out_deriv));
            },
            None => {
                return Err(TrainingError::MissingMemo(Self::TYPE_NAME));
            },
            Some(memo) => memo
        };

        if out_deriv.num_frames(self.block_dim) != memo.num_frames {
            return Err(TrainingError::from(SizeMismatchError(memo.num_frames,out_deriv.num_frames(self.block_dim))));
        }

        if !self.include_indirect_derivative {
            return Ok(memo.transform.apply_scale(out_deriv));
        }

        check_cols(out_value,self.dim)?;

        let deriv_sum = sum_frames(out_deriv,self.block_dim)?;
        let deriv_y_sum = sum_frames_product(out_value,out_deriv,self.block_dim)?;

        let in_deriv = match memo.indirect {
            IndirectTerms::Omitted => {
                memo.transform.apply_scale(out_deriv)
            },
            IndirectTerms::FromHistory { ref x_deriv, ref scale_deriv } => {
                normalize_backprop(out_value,out_deriv,&memo.transform.scale,x_deriv,scale_deriv)?
            },
            IndirectTerms::FromMinibatch => {
                let (x_deriv,scale_deriv) = indirect_terms(memo.stats.count,
                                                           self.target_rms,
                                                           &memo.transform.scale,
                                                           &deriv_sum,
                                                           &deriv_y_sum);

                normalize_backprop(out_value,out_deriv,&memo.transform.scale,&x_deriv,&scale_deriv)?
            }
        };

        memo.moments = Some(GradientMoments {
            count:memo.stats.count,
            deriv_sum:deriv_sum,
            deriv_y_sum:deriv_y_sum
        });

        Ok(in_deriv)
    }

    fn store_stats(&mut self, _: &Matrix<U>, _: &Matrix<U>, memo: Option<&StreamingNormMemo<U>>) -> Result<(), TrainingError> {
        let memo = match memo {
            None if self.test_mode => return Ok(()),
            None => return Err(TrainingError::MissingMemo(Self::TYPE_NAME)),
            Some(memo) => memo
        };

        if let Some(ref m) = memo.moments {
            if m.block_dim() != self.block_dim {
                return Err(TrainingError::from(SizeMismatchError(self.block_dim,m.block_dim())));
            }
        }

        self.stats.add(U::one(),&memo.stats)?;

        if let Some(ref m) = memo.moments {
            self.moments.add(U::one(),m);
        }

        self.invalidate();

        Ok(())
    }

    fn scale(&mut self, s: U) {
        if s < U::default() {
            log::info!("{}: statistics reset by scaling with {}",Self::TYPE_NAME,s);
        }

        self.stats.scale(s);
        self.moments.scale(s);
        self.invalidate();
    }

    fn add(&mut self, alpha: U, other: &StreamingNormComponent<U>) -> Result<(), TrainingError> {
        if other.block_dim != self.block_dim {
            return Err(TrainingError::from(SizeMismatchError(self.block_dim,other.block_dim)));
        }

        if alpha < U::default() {
            log::warn!("{}: adding statistics with negative weight {} is ignored",Self::TYPE_NAME,alpha);
            return Ok(());
        }

        self.stats.add(alpha,&other.stats)?;
        self.moments.add(alpha,&other.moments);
        self.invalidate();

        Ok(())
    }

    fn zero_stats(&mut self) {
        self.stats.zero();
        self.moments.zero();
        self.invalidate();
    }

    fn set_test_mode(&mut self, test_mode: bool) -> Result<(), EvaluateError> {
        if test_mode {
            if self.stats.is_empty() {
                return Err(EvaluateError::InvalidState(String::from(
                    "StreamingNormComponent has no statistics accumulated; test mode can not be set.")));
            }

            self.refresh_derived();
        }

        if test_mode != self.test_mode {
            log::info!("{}: test mode {}",Self::TYPE_NAME,if test_mode { "on" } else { "off" });
        }

        self.test_mode = test_mode;

        Ok(())
    }

    fn test_mode(&self) -> bool {
        self.test_mode
    }
}
impl<U,P> Persistence<U,P> for StreamingNormComponent<U>
    where U: UnitValue<U>, P: ReadPersistence<U> + WritePersistence<U> {
    fn load(&mut self, persistence: &mut P) -> Result<(), ConfigReadError> {
        check_type_tag::<U,_>(persistence,Self::TYPE_NAME)?;

        self.read_body(persistence)
    }

    fn save(&self, persistence: &mut P) -> Result<(), PersistenceError> {
        persistence.write_token("<StreamingNormComponent>");
        persistence.write_token("<Dim>");
        persistence.write_usize(self.dim);
        persistence.write_token("<BlockDim>");
        persistence.write_usize(self.block_dim);
        persistence.write_token("<Epsilon>");
        persistence.write_unit(self.epsilon);
        persistence.write_token("<TargetRms>");
        persistence.write_unit(self.target_rms);
        persistence.write_token("<IncludeIndirectDerivative>");
        persistence.write_bool(self.include_indirect_derivative);
        persistence.write_token("<TestMode>");
        persistence.write_bool(self.test_mode);
        write_stats(persistence,&self.stats);
        persistence.write_token("<BackwardCount>");
        persistence.write_unit(self.moments.count);
        persistence.write_token("<DerivSum>");
        persistence.write_units(&self.moments.deriv_sum);
        persistence.write_token("<DerivYSum>");
        persistence.write_units(&self.moments.deriv_y_sum);

        if let Some(ref d) = self.derived {
            persistence.write_token("<Offset>");
            persistence.write_units(&d.transform.offset);
            persistence.write_token("<Scale>");
            persistence.write_units(&d.transform.scale);
            persistence.write_token("<XDeriv>");
            persistence.write_units(&d.x_deriv);
            persistence.write_token("<ScaleDeriv>");
            persistence.write_units(&d.scale_deriv);
        }

        persistence.write_token("</StreamingNormComponent>");
        persistence.end_component();

        Ok(())
    }
}
