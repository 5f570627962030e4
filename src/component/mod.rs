//! Normalization components and the interface through which a training scheduler drives them
//!
//! One training step on a component is
//! `propagate` -> `backprop` -> `store_stats`, after which the memo returned by
//! `propagate` is dropped. The memo is owned by the caller and is neither `Clone` nor `Copy`,
//! so it serves exactly one step.
use std::fmt::Debug;
use crate::arr::Matrix;
use crate::config::ConfigLine;
use crate::error::{ConfigReadError, EvaluateError, PersistenceError, SizeMismatchError, TrainingError};
use crate::ope::{Max, Sqrt, UnitValue};
use crate::persistence::{Persistence, ReadPersistence, WritePersistence};
use crate::statistics::Statistics;

pub mod fixedscale;
pub mod batchnormalization;
pub mod streamingnormalization;

pub use self::fixedscale::FixedScaleComponent;
pub use self::batchnormalization::{BatchNormComponent, BatchNormMemo};
pub use self::streamingnormalization::{StreamingNormComponent, StreamingNormMemo};

/// Capabilities of a component, consulted by the scheduler for buffer management
#[derive(Debug,Clone,Copy,Default,PartialEq,Eq)]
pub struct Properties {
    /// Each output row depends only on the corresponding input row (per minibatch)
    pub simple_component:bool,
    /// `backprop` reads `in_value`
    pub backprop_needs_input:bool,
    /// `backprop` reads `out_value`
    pub backprop_needs_output:bool,
    /// The output may overwrite the input buffer
    pub propagate_in_place:bool,
    /// The input derivative may overwrite the output derivative buffer
    pub backprop_in_place:bool,
    /// `propagate` returns a memo that must be passed to `backprop` and `store_stats`
    pub uses_memo:bool,
    /// `store_stats` should be called after each training step
    pub stores_stats:bool,
    /// The input must be stored contiguously (block reshaping)
    pub input_contiguous:bool,
    /// The output must be stored contiguously (block reshaping)
    pub output_contiguous:bool
}
/// Memo type of components that never produce one
#[derive(Debug)]
pub enum NoMemo {}

/// Interface common to all normalization components
pub trait Component<U>: Clone + Debug where U: UnitValue<U> {
    /// Transient record bridging a `propagate` call to its matching `backprop` / `store_stats`
    type Memo: Debug + Send;

    fn type_name(&self) -> &'static str;
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    fn properties(&self) -> Properties;
    /// Human-readable summary
    fn info(&self) -> String;

    /// Forward propagation
    /// # Arguments
    /// * `input` - minibatch, one frame per row, `input_dim()` columns
    ///
    /// Returns the output and, in training mode for stateful components, the memo.
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`EvaluateError`]
    fn propagate(&self, input:&Matrix<U>) -> Result<(Matrix<U>,Option<Self::Memo>),EvaluateError>;

    /// Back propagation
    /// # Arguments
    /// * `in_value` - input given to `propagate` (may be empty unless `backprop_needs_input`)
    /// * `out_value` - output of `propagate` (may be empty unless `backprop_needs_output`)
    /// * `out_deriv` - derivative of the objective w.r.t. the output
    /// * `memo` - memo returned by the matching `propagate`
    ///
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`TrainingError`]
    fn backprop(&self, in_value:&Matrix<U>, out_value:&Matrix<U>, out_deriv:&Matrix<U>,
                memo:Option<&mut Self::Memo>) -> Result<Matrix<U>,TrainingError>;

    /// Fold the statistics of a training step into the persisted statistics
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`TrainingError`]
    fn store_stats(&mut self, _in_value:&Matrix<U>, _out_value:&Matrix<U>, _memo:Option<&Self::Memo>) -> Result<(),TrainingError> {
        Ok(())
    }

    /// Scale the persisted statistics; a negative factor empties them
    fn scale(&mut self, _s:U) {}

    /// Add `alpha` times the persisted statistics of `other`; a negative `alpha` is ignored
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`TrainingError`]
    fn add(&mut self, _alpha:U, _other:&Self) -> Result<(),TrainingError> {
        Ok(())
    }

    fn zero_stats(&mut self) {}

    /// Switch between training and test (inference) mode
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`EvaluateError`]
    fn set_test_mode(&mut self, _test_mode:bool) -> Result<(),EvaluateError> {
        Ok(())
    }

    fn test_mode(&self) -> bool {
        false
    }
}
/// Any of the normalization components
#[derive(Debug,Clone)]
pub enum NormalizeComponent<U> where U: UnitValue<U> {
    FixedScale(FixedScaleComponent<U>),
    BatchNorm(BatchNormComponent<U>),
    StreamingNorm(StreamingNormComponent<U>)
}
/// Memo of any of the normalization components
#[derive(Debug)]
pub enum ComponentMemo<U> where U: UnitValue<U> {
    BatchNorm(BatchNormMemo<U>),
    StreamingNorm(StreamingNormMemo<U>)
}
impl<U> NormalizeComponent<U> where U: UnitValue<U> {
    /// Create a component from a configuration line; the `type` key selects the kind
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn from_config(cfl:&mut ConfigLine) -> Result<NormalizeComponent<U>,ConfigReadError> {
        let ty = cfl.get_string("type").ok_or(ConfigReadError::InvalidState(String::from(
            "The required key 'type' is missing.")))?;

        let c = if ty == FixedScaleComponent::<U>::TYPE_NAME {
            NormalizeComponent::FixedScale(FixedScaleComponent::from_config(cfl)?)
        } else if ty == BatchNormComponent::<U>::TYPE_NAME {
            NormalizeComponent::BatchNorm(BatchNormComponent::from_config(cfl)?)
        } else if ty == StreamingNormComponent::<U>::TYPE_NAME {
            NormalizeComponent::StreamingNorm(StreamingNormComponent::from_config(cfl)?)
        } else {
            return Err(ConfigReadError::InvalidState(format!("Unknown component type {}",ty)));
        };

        log::debug!("initialized {}",c.info());

        Ok(c)
    }

    /// Parse `line` and create the component it describes
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn from_config_str(line:&str) -> Result<NormalizeComponent<U>,ConfigReadError> {
        NormalizeComponent::from_config(&mut ConfigLine::new(line)?)
    }

    /// Read a component of whatever kind the stored type tag names
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn read<P: ReadPersistence<U>>(persistence:&mut P) -> Result<NormalizeComponent<U>,ConfigReadError> {
        let tag = persistence.read_token()?;

        let name = type_name_of_tag(&tag).unwrap_or("");

        let c = if name == FixedScaleComponent::<U>::TYPE_NAME {
            let mut c = FixedScaleComponent::default();
            c.read_body(persistence)?;
            NormalizeComponent::FixedScale(c)
        } else if name == BatchNormComponent::<U>::TYPE_NAME {
            let mut c = BatchNormComponent::default();
            c.read_body(persistence)?;
            NormalizeComponent::BatchNorm(c)
        } else if name == StreamingNormComponent::<U>::TYPE_NAME {
            let mut c = StreamingNormComponent::default();
            c.read_body(persistence)?;
            NormalizeComponent::StreamingNorm(c)
        } else {
            return Err(ConfigReadError::InvalidState(format!("Unknown component type tag {}",tag)));
        };

        log::debug!("read {}",c.info());

        Ok(c)
    }
}
impl<U> Component<U> for NormalizeComponent<U> where U: UnitValue<U> {
    type Memo = ComponentMemo<U>;

    fn type_name(&self) -> &'static str {
        match self {
            NormalizeComponent::FixedScale(c) => c.type_name(),
            NormalizeComponent::BatchNorm(c) => c.type_name(),
            NormalizeComponent::StreamingNorm(c) => c.type_name()
        }
    }

    fn input_dim(&self) -> usize {
        match self {
            NormalizeComponent::FixedScale(c) => c.input_dim(),
            NormalizeComponent::BatchNorm(c) => c.input_dim(),
            NormalizeComponent::StreamingNorm(c) => c.input_dim()
        }
    }

    fn output_dim(&self) -> usize {
        match self {
            NormalizeComponent::FixedScale(c) => c.output_dim(),
            NormalizeComponent::BatchNorm(c) => c.output_dim(),
            NormalizeComponent::StreamingNorm(c) => c.output_dim()
        }
    }

    fn properties(&self) -> Properties {
        match self {
            NormalizeComponent::FixedScale(c) => c.properties(),
            NormalizeComponent::BatchNorm(c) => c.properties(),
            NormalizeComponent::StreamingNorm(c) => c.properties()
        }
    }

    fn info(&self) -> String {
        match self {
            NormalizeComponent::FixedScale(c) => c.info(),
            NormalizeComponent::BatchNorm(c) => c.info(),
            NormalizeComponent::StreamingNorm(c) => c.info()
        }
    }

    fn propagate(&self, input: &Matrix<U>) -> Result<(Matrix<U>, Option<ComponentMemo<U>>), EvaluateError> {
        match self {
            NormalizeComponent::FixedScale(c) => {
                let (o,_) = c.propagate(input)?;
                Ok((o,None))
            },
            NormalizeComponent::BatchNorm(c) => {
                let (o,m) = c.propagate(input)?;
                Ok((o,m.map(ComponentMemo::BatchNorm)))
            },
            NormalizeComponent::StreamingNorm(c) => {
                let (o,m) = c.propagate(input)?;
                Ok((o,m.map(ComponentMemo::StreamingNorm)))
            }
        }
    }

    fn backprop(&self, in_value: &Matrix<U>, out_value: &Matrix<U>, out_deriv: &Matrix<U>,
                memo: Option<&mut ComponentMemo<U>>) -> Result<Matrix<U>, TrainingError> {
        match (self,memo) {
            (NormalizeComponent::FixedScale(c),None) => {
                c.backprop(in_value,out_value,out_deriv,None)
            },
            (NormalizeComponent::BatchNorm(c),None) => {
                c.backprop(in_value,out_value,out_deriv,None)
            },
            (NormalizeComponent::BatchNorm(c),Some(ComponentMemo::BatchNorm(m))) => {
                c.backprop(in_value,out_value,out_deriv,Some(m))
            },
            (NormalizeComponent::StreamingNorm(c),None) => {
                c.backprop(in_value,out_value,out_deriv,None)
            },
            (NormalizeComponent::StreamingNorm(c),Some(ComponentMemo::StreamingNorm(m))) => {
                c.backprop(in_value,out_value,out_deriv,Some(m))
            },
            (c,Some(m)) => {
                Err(TrainingError::ComponentMismatch(c.type_name(),m.type_name()))
            }
        }
    }

    fn store_stats(&mut self, in_value: &Matrix<U>, out_value: &Matrix<U>, memo: Option<&ComponentMemo<U>>) -> Result<(), TrainingError> {
        match (self,memo) {
            (NormalizeComponent::FixedScale(_),None) => Ok(()),
            (NormalizeComponent::BatchNorm(c),None) => {
                c.store_stats(in_value,out_value,None)
            },
            (NormalizeComponent::BatchNorm(c),Some(ComponentMemo::BatchNorm(m))) => {
                c.store_stats(in_value,out_value,Some(m))
            },
            (NormalizeComponent::StreamingNorm(c),None) => {
                c.store_stats(in_value,out_value,None)
            },
            (NormalizeComponent::StreamingNorm(c),Some(ComponentMemo::StreamingNorm(m))) => {
                c.store_stats(in_value,out_value,Some(m))
            },
            (c,Some(m)) => {
                Err(TrainingError::ComponentMismatch(c.type_name(),m.type_name()))
            }
        }
    }

    fn scale(&mut self, s: U) {
        match self {
            NormalizeComponent::FixedScale(_) => (),
            NormalizeComponent::BatchNorm(c) => c.scale(s),
            NormalizeComponent::StreamingNorm(c) => c.scale(s)
        }
    }

    fn add(&mut self, alpha: U, other: &NormalizeComponent<U>) -> Result<(), TrainingError> {
        match (self,other) {
            (NormalizeComponent::FixedScale(_),NormalizeComponent::FixedScale(_)) => Ok(()),
            (NormalizeComponent::BatchNorm(c),NormalizeComponent::BatchNorm(o)) => c.add(alpha,o),
            (NormalizeComponent::StreamingNorm(c),NormalizeComponent::StreamingNorm(o)) => c.add(alpha,o),
            (c,o) => Err(TrainingError::ComponentMismatch(c.type_name(),o.type_name()))
        }
    }

    fn zero_stats(&mut self) {
        match self {
            NormalizeComponent::FixedScale(_) => (),
            NormalizeComponent::BatchNorm(c) => c.zero_stats(),
            NormalizeComponent::StreamingNorm(c) => c.zero_stats()
        }
    }

    fn set_test_mode(&mut self, test_mode: bool) -> Result<(), EvaluateError> {
        match self {
            NormalizeComponent::FixedScale(_) => Ok(()),
            NormalizeComponent::BatchNorm(c) => c.set_test_mode(test_mode),
            NormalizeComponent::StreamingNorm(c) => c.set_test_mode(test_mode)
        }
    }

    fn test_mode(&self) -> bool {
        match self {
            NormalizeComponent::FixedScale(_) => false,
            NormalizeComponent::BatchNorm(c) => c.test_mode(),
            NormalizeComponent::StreamingNorm(c) => c.test_mode()
        }
    }
}
impl<U,P> Persistence<U,P> for NormalizeComponent<U>
    where U: UnitValue<U>, P: ReadPersistence<U> + WritePersistence<U> {
    fn load(&mut self, persistence: &mut P) -> Result<(), ConfigReadError> {
        match self {
            NormalizeComponent::FixedScale(c) => c.load(persistence),
            NormalizeComponent::BatchNorm(c) => c.load(persistence),
            NormalizeComponent::StreamingNorm(c) => c.load(persistence)
        }
    }

    fn save(&self, persistence: &mut P) -> Result<(), PersistenceError> {
        log::debug!("saving {}",self.info());

        match self {
            NormalizeComponent::FixedScale(c) => c.save(persistence),
            NormalizeComponent::BatchNorm(c) => c.save(persistence),
            NormalizeComponent::StreamingNorm(c) => c.save(persistence)
        }
    }
}
impl<U> ComponentMemo<U> where U: UnitValue<U> {
    pub fn type_name(&self) -> &'static str {
        match self {
            ComponentMemo::BatchNorm(_) => BatchNormComponent::<U>::TYPE_NAME,
            ComponentMemo::StreamingNorm(_) => StreamingNormComponent::<U>::TYPE_NAME
        }
    }
}
/// Set or clear test mode on every component.
///
/// When enabling, every component is checked first, so either all components switch or none does.
/// # Errors
///
/// This function may return the following errors
/// * [`EvaluateError`]
pub fn set_test_mode_all<U>(components:&mut [NormalizeComponent<U>],test_mode:bool) -> Result<(),EvaluateError>
    where U: UnitValue<U> {
    if test_mode {
        for c in components.iter() {
            let empty = match c {
                NormalizeComponent::FixedScale(_) => false,
                NormalizeComponent::BatchNorm(c) => c.stats().is_empty(),
                NormalizeComponent::StreamingNorm(c) => c.stats().is_empty()
            };

            if empty {
                return Err(EvaluateError::InvalidState(format!(
                    "{} has no statistics accumulated; test mode can not be set.",c.type_name())));
            }
        }
    }

    for c in components.iter_mut() {
        c.set_test_mode(test_mode)?;
    }

    Ok(())
}
/// Scale the statistics of every component
pub fn scale_stats_all<U>(components:&mut [NormalizeComponent<U>],s:U) where U: UnitValue<U> {
    for c in components.iter_mut() {
        c.scale(s);
    }
}
/// Clear the statistics of every component
pub fn zero_stats_all<U>(components:&mut [NormalizeComponent<U>]) where U: UnitValue<U> {
    for c in components.iter_mut() {
        c.zero_stats();
    }
}
/// Merge the statistics of `src` (e.g. the delta of one worker) into `dst`, component by component
/// # Errors
///
/// This function may return the following errors
/// * [`TrainingError`]
pub fn add_stats_all<U>(dst:&mut [NormalizeComponent<U>],alpha:U,src:&[NormalizeComponent<U>]) -> Result<(),TrainingError>
    where U: UnitValue<U> {
    if dst.len() != src.len() {
        return Err(TrainingError::from(SizeMismatchError(dst.len(),src.len())));
    }

    for (d,s) in dst.iter().zip(src.iter()) {
        if d.type_name() != s.type_name() {
            return Err(TrainingError::ComponentMismatch(d.type_name(),s.type_name()));
        } else if d.input_dim() != s.input_dim() {
            return Err(TrainingError::from(SizeMismatchError(d.input_dim(),s.input_dim())));
        }
    }

    for (d,s) in dst.iter_mut().zip(src.iter()) {
        d.add(alpha,s)?;
    }

    Ok(())
}
pub(crate) fn type_name_of_tag(tag:&str) -> Option<&str> {
    tag.strip_prefix('<').and_then(|t| t.strip_suffix('>')).filter(|t| !t.starts_with('/'))
}
/// Reads the opening tag and fails unless it names `type_name`
pub(crate) fn check_type_tag<U,P>(persistence:&mut P,type_name:&str) -> Result<(),ConfigReadError>
    where P: ReadPersistence<U> {
    let tag = persistence.read_token()?;

    match type_name_of_tag(&tag) {
        Some(t) if t == type_name => Ok(()),
        _ => Err(ConfigReadError::InvalidState(format!(
            "Expected the type tag <{}>, got {}",type_name,tag)))
    }
}
pub(crate) fn check_cols<U>(m:&Matrix<U>,cols:usize) -> Result<(),SizeMismatchError> where U: Default {
    if m.cols() != cols {
        Err(SizeMismatchError(cols,m.cols()))
    } else {
        Ok(())
    }
}
pub(crate) fn unit_from_usize<U>(n:usize) -> Result<U,EvaluateError> where U: UnitValue<U> {
    U::from_usize(n).ok_or(EvaluateError::TypeCastError(String::from(
        "Error in type conversion from usize."
    )))
}
/// Summary of the mean and standard deviation implied by statistics, for `info()`
pub(crate) fn summarize_stats<U>(stats:&Statistics<U>) -> String where U: UnitValue<U> {
    match stats.mean_uvar() {
        None => format!("count={}",stats.count),
        Some((mean,uvar)) => {
            let stddev = mean.iter().zip(uvar.iter()).map(|(&m,&u)| {
                (u - m * m).max(&U::default()).sqrt()
            }).collect::<Vec<U>>();

            format!("count={}, data-mean={}, data-stddev={}",stats.count,summarize(&mean),summarize(&stddev))
        }
    }
}
fn summarize<U>(v:&[U]) -> String where U: UnitValue<U> {
    match v.split_first() {
        None => String::from("[ ]"),
        Some((&first,rest)) => {
            let (min,max,sum) = rest.iter().fold((first,first,first),|(min,max,sum),&x| {
                (if x < min { x } else { min },if x > max { x } else { max },sum + x)
            });

            match U::from_usize(v.len()) {
                Some(n) => format!("[min={}, max={}, mean={}]",min,max,sum / n),
                None => format!("[min={}, max={}]",min,max)
            }
        }
    }
}
