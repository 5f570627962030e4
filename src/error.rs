//! Error types returned by the normalization components
use std::{error, fmt, io};
use std::num::{ParseFloatError, ParseIntError};

/// Error raised while reading configuration lines or stored models
#[derive(Debug)]
pub enum ConfigReadError {
    IOError(io::Error),
    InvalidState(String),
    ParseFloatError(ParseFloatError),
    ParseIntError(ParseIntError)
}
impl fmt::Display for ConfigReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigReadError::IOError(_) => write!(f, "Error occurred in file I/O."),
            ConfigReadError::InvalidState(ref s) => write!(f, "Configuration is invalid. ({})",s),
            ConfigReadError::ParseFloatError(_) => write!(f, "An error occurred when converting a string to a double value."),
            ConfigReadError::ParseIntError(_) => write!(f, "An error occurred when converting a string to an integer value."),
        }
    }
}
impl error::Error for ConfigReadError {
    fn description(&self) -> &str {
        match *self {
            ConfigReadError::IOError(_) => "Error occurred in file I/O.",
            ConfigReadError::InvalidState(_) => "Configuration is invalid.",
            ConfigReadError::ParseFloatError(_) => "An error occurred when converting a string to a double value.",
            ConfigReadError::ParseIntError(_) => "An error occurred when converting a string to an integer value."
        }
    }

    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            ConfigReadError::IOError(ref e) => Some(e),
            ConfigReadError::InvalidState(_) => None,
            ConfigReadError::ParseFloatError(ref e) => Some(e),
            ConfigReadError::ParseIntError(ref e) => Some(e),
        }
    }
}
impl From<io::Error> for ConfigReadError {
    fn from(err: io::Error) -> ConfigReadError {
        ConfigReadError::IOError(err)
    }
}
impl From<ParseFloatError> for ConfigReadError {
    fn from(err: ParseFloatError) -> ConfigReadError {
        ConfigReadError::ParseFloatError(err)
    }
}
impl From<ParseIntError> for ConfigReadError {
    fn from(err: ParseIntError) -> ConfigReadError {
        ConfigReadError::ParseIntError(err)
    }
}
/// Error raised when writing a model
#[derive(Debug)]
pub enum PersistenceError {
    IOError(io::Error)
}
impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PersistenceError::IOError(_) => write!(f, "Error occurred in file I/O."),
        }
    }
}
impl error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            PersistenceError::IOError(ref e) => Some(e),
        }
    }
}
impl From<io::Error> for PersistenceError {
    fn from(err: io::Error) -> PersistenceError {
        PersistenceError::IOError(err)
    }
}
/// Error indicating that two sizes that must agree do not
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub struct SizeMismatchError(pub usize, pub usize);
impl fmt::Display for SizeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SizeMismatchError(expected,actual) => {
                write!(f, "Size mismatch. (expected = {}, actual = {})",expected,actual)
            }
        }
    }
}
impl error::Error for SizeMismatchError {}
/// Error raised during forward propagation
#[derive(Debug)]
pub enum EvaluateError {
    InvalidState(String),
    SizeMismatchError(SizeMismatchError),
    TypeCastError(String)
}
impl fmt::Display for EvaluateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EvaluateError::InvalidState(ref s) => write!(f, "The state of the component is invalid. ({})",s),
            EvaluateError::SizeMismatchError(ref e) => write!(f, "{}",e),
            EvaluateError::TypeCastError(ref s) => write!(f, "{}",s),
        }
    }
}
impl error::Error for EvaluateError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            EvaluateError::InvalidState(_) => None,
            EvaluateError::SizeMismatchError(ref e) => Some(e),
            EvaluateError::TypeCastError(_) => None,
        }
    }
}
impl From<SizeMismatchError> for EvaluateError {
    fn from(err: SizeMismatchError) -> EvaluateError {
        EvaluateError::SizeMismatchError(err)
    }
}
/// Error raised during back propagation or while updating statistics
#[derive(Debug)]
pub enum TrainingError {
    InvalidState(String),
    SizeMismatchError(SizeMismatchError),
    TypeCastError(String),
    EvaluateError(EvaluateError),
    MissingMemo(&'static str),
    ComponentMismatch(&'static str,&'static str)
}
impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TrainingError::InvalidState(ref s) => write!(f, "The state of the component is invalid. ({})",s),
            TrainingError::SizeMismatchError(ref e) => write!(f, "{}",e),
            TrainingError::TypeCastError(ref s) => write!(f, "{}",s),
            TrainingError::EvaluateError(ref e) => write!(f, "{}",e),
            TrainingError::MissingMemo(ty) => write!(f, "{} was called without the memo of the matching propagation.",ty),
            TrainingError::ComponentMismatch(l,r) => write!(f, "Components of different types can not be combined. ({} and {})",l,r),
        }
    }
}
impl error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            TrainingError::SizeMismatchError(ref e) => Some(e),
            TrainingError::EvaluateError(ref e) => Some(e),
            _ => None,
        }
    }
}
impl From<SizeMismatchError> for TrainingError {
    fn from(err: SizeMismatchError) -> TrainingError {
        TrainingError::SizeMismatchError(err)
    }
}
impl From<EvaluateError> for TrainingError {
    fn from(err: EvaluateError) -> TrainingError {
        TrainingError::EvaluateError(err)
    }
}
