//! Batch normalization over the frames of a minibatch
use crate::arr::{Arr, Matrix};
use crate::component::{check_cols, check_type_tag, summarize_stats, unit_from_usize, Component, Properties};
use crate::config::{check_block_dim, ConfigLine};
use crate::error::{ConfigReadError, EvaluateError, PersistenceError, SizeMismatchError, TrainingError};
use crate::ope::{One, UnitValue};
use crate::persistence::{Persistence, ReadPersistence, WritePersistence};
use crate::statistics::{indirect_terms, normalize_backprop, sum_frames, sum_frames_product, DerivedTransform, Statistics};

/// Memo of a training-mode propagation of [`BatchNormComponent`]
#[derive(Debug)]
pub struct BatchNormMemo<U> where U: UnitValue<U> {
    /// Number of frames after splitting rows into blocks
    pub num_frames:usize,
    pub count:U,
    pub mean:Arr<U>,
    pub uvar:Arr<U>,
    pub scale:Arr<U>
}
/// Implements
///
/// y = (x - mean) * target_rms / sqrt(var + epsilon)
///
/// separately for each of the `block_dim` columns of the frames obtained by splitting
/// every row into blocks. In training mode mean and variance are those of the current
/// minibatch; in test mode they are taken from the statistics accumulated by `store_stats`.
#[derive(Debug,Clone,PartialEq)]
pub struct BatchNormComponent<U> where U: UnitValue<U> {
    dim:usize,
    block_dim:usize,
    epsilon:U,
    target_rms:U,
    test_mode:bool,
    stats:Statistics<U>,
    derived:Option<DerivedTransform<U>>
}
impl<U> Default for BatchNormComponent<U> where U: UnitValue<U> {
    fn default() -> Self {
        BatchNormComponent {
            dim:0,
            block_dim:0,
            epsilon:U::default(),
            target_rms:U::one(),
            test_mode:false,
            stats:Statistics::new(0),
            derived:None
        }
    }
}
impl<U> BatchNormComponent<U> where U: UnitValue<U> {
    pub const TYPE_NAME:&'static str = "BatchNormComponent";

    /// Create an instance in training mode with empty statistics
    /// # Arguments
    /// * `dim` - input and output dimension
    /// * `block_dim` - width of the frames (must divide `dim`)
    /// * `epsilon` - added to the variance
    /// * `target_rms` - standard deviation of the output
    ///
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn new(dim:usize,block_dim:usize,epsilon:U,target_rms:U) -> Result<BatchNormComponent<U>,ConfigReadError> {
        check_block_dim(dim,block_dim)?;

        if !(epsilon > U::default()) {
            return Err(ConfigReadError::InvalidState(format!("epsilon must be positive, got {}",epsilon)));
        } else if !(target_rms > U::default()) {
            return Err(ConfigReadError::InvalidState(format!("target-rms must be positive, got {}",target_rms)));
        }

        Ok(BatchNormComponent {
            dim:dim,
            block_dim:block_dim,
            epsilon:epsilon,
            target_rms:target_rms,
            test_mode:false,
            stats:Statistics::new(block_dim),
            derived:None
        })
    }

    /// Create an instance from the keys `dim`, `block-dim`, `epsilon`, `target-rms`
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn from_config(cfl:&mut ConfigLine) -> Result<BatchNormComponent<U>,ConfigReadError> {
        let dim = cfl.require_usize("dim")?;
        let block_dim = cfl.get_usize("block-dim")?.unwrap_or(dim);
        let epsilon = match cfl.get_unit("epsilon")? {
            Some(epsilon) => epsilon,
            None => default_epsilon()?
        };
        let target_rms = cfl.get_unit("target-rms")?.unwrap_or(U::one());

        cfl.check_unused()?;

        BatchNormComponent::new(dim,block_dim,epsilon,target_rms)
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

    /// Accumulated statistics
    pub fn stats(&self) -> &Statistics<U> {
        &self.stats
    }

    /// Cached offset and scale, if they are up to date with the statistics
    pub fn derived(&self) -> Option<&DerivedTransform<U>> {
        self.derived.as_ref()
    }

    /// Compute and cache the offset and scale implied by the accumulated statistics
    pub fn refresh_derived(&mut self) {
        if !self.stats.is_empty() && self.derived.is_none() {
            self.derived = Some(self.stats.derive(self.epsilon,self.target_rms));
        }
    }

    fn test_transform(&self) -> Result<DerivedTransform<U>,EvaluateError> {
        match self.derived {
            Some(ref d) => Ok(d.clone()),
            None if self.stats.is_empty() => {
                Err(EvaluateError::InvalidState(String::from(
                    "BatchNormComponent is in test mode, but no statistics have been accumulated.")))
            },
            None => Ok(self.stats.derive(self.epsilon,self.target_rms))
        }
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

        let mut c = BatchNormComponent::new(dim,block_dim,epsilon,target_rms)?;

        persistence.expect_token("<TestMode>")?;
        c.test_mode = persistence.read_bool()?;
        c.stats = read_stats(persistence,block_dim)?;

        match &*persistence.read_token()? {
            "<Offset>" => {
                let offset = read_block(persistence,block_dim)?;
                persistence.expect_token("<Scale>")?;
                let scale = read_block(persistence,block_dim)?;
                persistence.expect_token("</BatchNormComponent>")?;

                c.derived = Some(DerivedTransform {
                    offset:offset,
                    scale:scale
                });
            },
            "</BatchNormComponent>" => (),
            t => {
                return Err(ConfigReadError::InvalidState(format!(
                    "Expected <Offset> or </BatchNormComponent>, got {}",t)));
            }
        }

        *self = c;

        Ok(())
    }
}
impl<U> Component<U> for BatchNormComponent<U> where U: UnitValue<U> {
    type Memo = BatchNormMemo<U>;

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
            backprop_needs_output:true,
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
        format!("{}, dim={}, block-dim={}, epsilon={}, target-rms={}, test-mode={}, {}",
                self.type_name(),self.dim,self.block_dim,self.epsilon,self.target_rms,self.test_mode,
                summarize_stats(&self.stats))
    }

    fn propagate(&self, input: &Matrix<U>) -> Result<(Matrix<U>,Option<BatchNormMemo<U>>), EvaluateError> {
        check_cols(input,self.dim)?;

        if self.test_mode {
            return Ok((self.test_transform()?.apply(input),None));
        }

        let num_frames = input.num_frames(self.block_dim);
        let count = unit_from_usize::<U>(num_frames)?;

        let stats = Statistics::from_frames(input,self.block_dim,count)?;
        let transform = stats.derive(self.epsilon,self.target_rms);

        let (mean,uvar) = stats.mean_uvar().unwrap_or_else(|| {
            (Arr::new(self.block_dim),Arr::new(self.block_dim))
        });

        let out = transform.apply(input);

        Ok((out,Some(BatchNormMemo {
            num_frames:num_frames,
            count:count,
            mean:mean,
            uvar:uvar,
            scale:transform.scale
        })))
    }

    fn backprop(&self, _: &Matrix<U>, out_value: &Matrix<U>, out_deriv: &Matrix<U>, memo: Option<&mut BatchNormMemo<U>>)
        -> Result<Matrix<U>, TrainingError> {
        check_cols(out_deriv,self.dim)?;

        match memo {
            None if self.test_mode => {
                Ok(self.test_transform()?.apply_scale(out_deriv))
            },
            None => {
                Err(TrainingError::MissingMemo(Self::TYPE_NAME))
            },
            Some(memo) => {
                check_cols(out_value,self.dim)?;

                if out_deriv.num_frames(self.block_dim) != memo.num_frames {
                    return Err(TrainingError::from(SizeMismatchError(memo.num_frames,out_deriv.num_frames(self.block_dim))));
                }

                let deriv_sum = sum_frames(out_deriv,self.block_dim)?;
                let deriv_y_sum = sum_frames_product(out_value,out_deriv,self.block_dim)?;

                let (x_deriv,scale_deriv) = indirect_terms(memo.count,self.target_rms,&memo.scale,&deriv_sum,&deriv_y_sum);

                Ok(normalize_backprop(out_value,out_deriv,&memo.scale,&x_deriv,&scale_deriv)?)
            }
        }
    }

    fn store_stats(&mut self, _: &Matrix<U>, _: &Matrix<U>, memo: Option<&BatchNormMemo<U>>) -> Result<(), TrainingError> {
        match memo {
            None if self.test_mode => Ok(()),
            None => Err(TrainingError::MissingMemo(Self::TYPE_NAME)),
            Some(memo) => {
                let count = memo.count;

                let stats = Statistics {
                    count:count,
                    sum:memo.mean.iter().map(|&m| m * count).collect::<Vec<U>>().into(),
                    sumsq:memo.uvar.iter().map(|&u| u * count).collect::<Vec<U>>().into()
                };

                self.stats.add(U::one(),&stats)?;
                self.derived = None;

                Ok(())
            }
        }
    }

    fn scale(&mut self, s: U) {
        if s < U::default() {
            log::info!("{}: statistics reset by scaling with {}",Self::TYPE_NAME,s);
        }

        self.stats.scale(s);
        self.derived = None;
    }

    fn add(&mut self, alpha: U, other: &BatchNormComponent<U>) -> Result<(), TrainingError> {
        if other.block_dim != self.block_dim {
            return Err(TrainingError::from(SizeMismatchError(self.block_dim,other.block_dim)));
        }

        if alpha < U::default() {
            log::warn!("{}: adding statistics with negative weight {} is ignored",Self::TYPE_NAME,alpha);
            return Ok(());
        }

        self.stats.add(alpha,&other.stats)?;
        self.derived = None;

        Ok(())
    }

    fn zero_stats(&mut self) {
        self.stats.zero();
        self.derived = None;
    }

    fn set_test_mode(&mut self, test_mode: bool) -> Result<(), EvaluateError> {
        if test_mode {
            if self.stats.is_empty() {
                return Err(EvaluateError::InvalidState(String::from(
                    "BatchNormComponent has no statistics accumulated; test mode can not be set.")));
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
impl<U,P> Persistence<U,P> for BatchNormComponent<U>
    where U: UnitValue<U>, P: ReadPersistence<U> + WritePersistence<U> {
    fn load(&mut self, persistence: &mut P) -> Result<(), ConfigReadError> {
        check_type_tag::<U,_>(persistence,Self::TYPE_NAME)?;

        self.read_body(persistence)
    }

    fn save(&self, persistence: &mut P) -> Result<(), PersistenceError> {
        persistence.write_token("<BatchNormComponent>");
        persistence.write_token("<Dim>");
        persistence.write_usize(self.dim);
        persistence.write_token("<BlockDim>");
        persistence.write_usize(self.block_dim);
        persistence.write_token("<Epsilon>");
        persistence.write_unit(self.epsilon);
        persistence.write_token("<TargetRms>");
        persistence.write_unit(self.target_rms);
        persistence.write_token("<TestMode>");
        persistence.write_bool(self.test_mode);
        write_stats(persistence,&self.stats);

        if let Some(ref d) = self.derived {
            persistence.write_token("<Offset>");
            persistence.write_units(&d.offset);
            persistence.write_token("<Scale>");
            persistence.write_units(&d.scale);
        }

        persistence.write_token("</BatchNormComponent>");
        persistence.end_component();

        Ok(())
    }
}
pub(crate) fn default_epsilon<U>() -> Result<U,ConfigReadError> where U: UnitValue<U> {
    U::from_f64(0.001).ok_or(ConfigReadError::InvalidState(String::from(
        "Error in type conversion from f64.")))
}
pub(crate) fn read_block<U,P>(persistence:&mut P,block_dim:usize) -> Result<Arr<U>,ConfigReadError>
    where U: UnitValue<U>, P: ReadPersistence<U> {
    let v = persistence.read_units()?;

    if v.len() != block_dim {
        Err(ConfigReadError::InvalidState(format!(
            "Expected a vector of dimension {}, got {}",block_dim,v.len())))
    } else {
        Ok(v.into())
    }
}
pub(crate) fn read_stats<U,P>(persistence:&mut P,block_dim:usize) -> Result<Statistics<U>,ConfigReadError>
    where U: UnitValue<U>, P: ReadPersistence<U> {
    persistence.expect_token("<Count>")?;
    let count = persistence.read_unit()?;
    persistence.expect_token("<StatsSum>")?;
    let sum = read_block(persistence,block_dim)?;
    persistence.expect_token("<StatsSumsq>")?;
    let sumsq = read_block(persistence,block_dim)?;

    if count < U::default() {
        return Err(ConfigReadError::InvalidState(format!("Negative count {}",count)));
    }

    Ok(Statistics {
        count:count,
        sum:sum,
        sumsq:sumsq
    })
}
pub(crate) fn write_stats<U,P>(persistence:&mut P,stats:&Statistics<U>)
    where U: UnitValue<U>, P: WritePersistence<U> {
    persistence.write_token("<Count>");
    persistence.write_unit(stats.count);
    persistence.write_token("<StatsSum>");
    persistence.write_units(&stats.sum);
    persistence.write_token("<StatsSumsq>");
    persistence.write_units(&stats.sumsq);
}
