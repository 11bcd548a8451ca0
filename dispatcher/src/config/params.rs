//! Executor parameter schemas
//!
//! Each executor declares its accepted parameters in the configuration;
//! the declared set is the only set of argument keys a run request may
//! carry. Schemas coerce inbound JSON arguments into the string form the
//! executor environment expects.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use crate::errors::ArgError;

/// Value types understood by the schema registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int { nullable: bool },
    Str,
    Bool,
    List { can_repeat: bool },
    Host,
}

impl ParamType {
    /// Coerce one run-request value into the string handed to the
    /// executor environment.
    pub fn coerce(&self, field_name: &str, value: &Value) -> Result<String, ArgError> {
        match self {
            ParamType::Int { nullable } => match value {
                Value::Null if *nullable => Ok(String::new()),
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
                Value::String(s) if s.trim().parse::<i64>().is_ok() => Ok(s.trim().to_string()),
                _ => Err(ArgError::BadType(field_name.to_string())),
            },
            ParamType::Str | ParamType::Host => match value {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(b.to_string()),
                _ => Err(ArgError::BadType(field_name.to_string())),
            },
            ParamType::Bool => match value {
                Value::Bool(b) => Ok(b.to_string()),
                Value::String(s)
                    if matches!(s.to_lowercase().as_str(), "true" | "false" | "t" | "f") =>
                {
                    Ok(s.clone())
                }
                _ => Err(ArgError::BadType(field_name.to_string())),
            },
            ParamType::List { can_repeat } => match value {
                Value::String(s) => {
                    if !*can_repeat {
                        let items: Vec<&str> = s.split(',').collect();
                        let unique: HashSet<&str> = items.iter().copied().collect();
                        if unique.len() != items.len() {
                            return Err(ArgError::BadType(field_name.to_string()));
                        }
                    }
                    Ok(s.clone())
                }
                _ => Err(ArgError::BadType(field_name.to_string())),
            },
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub ty: ParamType,
    pub required: bool,
}

/// The declared parameter set of one executor.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    params: BTreeMap<String, ParamSpec>,
}

impl ParamSchema {
    /// Build a schema from the configured required flags. The config
    /// format only declares whether a param is mandatory, so every
    /// declared param carries the plain string type.
    pub fn from_flags(flags: &BTreeMap<String, bool>) -> Self {
        let params = flags
            .iter()
            .map(|(name, required)| {
                (
                    name.clone(),
                    ParamSpec {
                        ty: ParamType::Str,
                        required: *required,
                    },
                )
            })
            .collect();
        Self { params }
    }

    /// Validate and coerce one run request's argument map.
    pub fn coerce(&self, args: &Map<String, Value>) -> Result<BTreeMap<String, String>, ArgError> {
        for (name, spec) in &self.params {
            if spec.required && !args.contains_key(name) {
                return Err(ArgError::Missing(name.clone()));
            }
        }
        let mut coerced = BTreeMap::new();
        for (key, value) in args {
            let Some(spec) = self.params.get(key) else {
                return Err(ArgError::Unexpected(key.clone()));
            };
            coerced.insert(key.clone(), spec.ty.coerce(key, value)?);
        }
        Ok(coerced)
    }
}
