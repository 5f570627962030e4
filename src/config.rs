//! Parsing of component configuration lines
//!
//! A configuration line is a whitespace separated list of `key=value` pairs, e.g.
//! `type=BatchNormComponent dim=512 block-dim=64 epsilon=0.001`.
//! Everything after a `#` is ignored.
use std::str::FromStr;
use crate::error::ConfigReadError;
use crate::ope::UnitValue;

#[derive(Debug,Clone)]
struct ConfigValue {
    key:String,
    value:String,
    consumed:bool
}
/// Parsed configuration line
#[derive(Debug,Clone)]
pub struct ConfigLine {
    values:Vec<ConfigValue>
}
impl ConfigLine {
    /// Parse a configuration line
    /// # Arguments
    /// * `line` - text of the form `key1=value1 key2=value2 ...`
    ///
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn new(line:&str) -> Result<ConfigLine,ConfigReadError> {
        let line = match line.find('#') {
            Some(p) => &line[..p],
            None => line
        };

        let mut values:Vec<ConfigValue> = Vec::new();

        for token in line.split_whitespace() {
            let (key,value) = match token.find('=') {
                Some(p) if p > 0 => (&token[..p],&token[p+1..]),
                _ => {
                    return Err(ConfigReadError::InvalidState(format!(
                        "Expected a token of the form key=value, got '{}'.",token)));
                }
            };

            if values.iter().any(|v| v.key == key) {
                return Err(ConfigReadError::InvalidState(format!(
                    "The key '{}' is specified more than once.",key)));
            }

            values.push(ConfigValue {
                key:key.to_string(),
                value:value.to_string(),
                consumed:false
            });
        }

        Ok(ConfigLine {
            values:values
        })
    }

    fn take(&mut self,key:&str) -> Option<&str> {
        self.values.iter_mut().find(|v| v.key == key).map(|v| {
            v.consumed = true;
            &*v.value
        })
    }

    /// Returns the raw value of the key
    pub fn get_string(&mut self,key:&str) -> Option<String> {
        self.take(key).map(|s| s.to_string())
    }

    /// Returns the value of the key as a non-negative integer
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn get_usize(&mut self,key:&str) -> Result<Option<usize>,ConfigReadError> {
        match self.take(key) {
            Some(v) => Ok(Some(usize::from_str(v)?)),
            None => Ok(None)
        }
    }

    /// Returns the value of the key as a unit value
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn get_unit<U>(&mut self,key:&str) -> Result<Option<U>,ConfigReadError> where U: UnitValue<U> {
        match self.take(key) {
            Some(v) => Ok(Some(v.parse::<U>()?)),
            None => Ok(None)
        }
    }

    /// Returns the value of the key as a bool (`true`/`false`, `T`/`F`)
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn get_bool(&mut self,key:&str) -> Result<Option<bool>,ConfigReadError> {
        match self.take(key) {
            Some("true") | Some("T") => Ok(Some(true)),
            Some("false") | Some("F") => Ok(Some(false)),
            Some(v) => Err(ConfigReadError::InvalidState(format!(
                "Invalid boolean value '{}' for '{}'.",v,key))),
            None => Ok(None)
        }
    }

    /// Returns the integer value of a key that must be present
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn require_usize(&mut self,key:&str) -> Result<usize,ConfigReadError> {
        self.get_usize(key)?.ok_or(ConfigReadError::InvalidState(format!(
            "The required key '{}' is missing.",key)))
    }

    /// Keys that no getter has asked for
    pub fn unused_keys(&self) -> Vec<&str> {
        self.values.iter().filter(|v| !v.consumed).map(|v| &*v.key).collect()
    }

    /// Fails if the line contains keys the component does not recognize
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    pub fn check_unused(&self) -> Result<(),ConfigReadError> {
        let unused = self.unused_keys();

        if unused.is_empty() {
            Ok(())
        } else {
            Err(ConfigReadError::InvalidState(format!(
                "Unrecognized configuration values: {}",unused.join(" "))))
        }
    }
}
/// Checks the relation between `dim` and `block_dim` shared by all normalization components
/// # Errors
///
/// This function may return the following errors
/// * [`ConfigReadError`]
pub fn check_block_dim(dim:usize,block_dim:usize) -> Result<(),ConfigReadError> {
    if dim == 0 {
        Err(ConfigReadError::InvalidState(String::from("dim must be positive.")))
    } else if block_dim == 0 || dim % block_dim != 0 {
        Err(ConfigReadError::InvalidState(format!(
            "block-dim ({}) must be a positive divisor of dim ({}).",block_dim,dim)))
    } else {
        Ok(())
    }
}
