//! Values returned by `eval` on the compute engine.

use super::EngineError;

/// Decoded engine expression
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Null,
    Int(Vec<i32>),
    Double(Vec<f64>),
    Str(Vec<String>),
    /// `None` marks a missing logical value
    Bool(Vec<Option<bool>>),
    List(Vec<EngineValue>),
    Raw(Vec<u8>),
    /// Expression type the client does not decode
    Unsupported(u8),
}

impl EngineValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EngineValue::Null => "null",
            EngineValue::Int(_) => "int",
            EngineValue::Double(_) => "double",
            EngineValue::Str(_) => "string",
            EngineValue::Bool(_) => "bool",
            EngineValue::List(_) => "list",
            EngineValue::Raw(_) => "raw",
            EngineValue::Unsupported(_) => "unsupported",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EngineValue::Null)
    }

    fn unexpected(&self, expected: &str) -> EngineError {
        EngineError::UnexpectedValue {
            expected: expected.to_string(),
            actual: self.type_name().to_string(),
        }
    }

    /// First element as an integer; doubles are truncated
    pub fn as_int(&self) -> Result<i32, EngineError> {
        match self {
            EngineValue::Int(values) if !values.is_empty() => Ok(values[0]),
            EngineValue::Double(values) if !values.is_empty() => Ok(values[0] as i32),
            _ => Err(self.unexpected("int")),
        }
    }

    pub fn as_double(&self) -> Result<f64, EngineError> {
        match self {
            EngineValue::Double(values) if !values.is_empty() => Ok(values[0]),
            EngineValue::Int(values) if !values.is_empty() => Ok(f64::from(values[0])),
            _ => Err(self.unexpected("double")),
        }
    }

    pub fn as_doubles(&self) -> Result<Vec<f64>, EngineError> {
        match self {
            EngineValue::Double(values) => Ok(values.clone()),
            EngineValue::Int(values) => Ok(values.iter().map(|v| f64::from(*v)).collect()),
            EngineValue::Null => Ok(Vec::new()),
            _ => Err(self.unexpected("double vector")),
        }
    }

    /// String vector; a generic list of scalar strings is flattened
    pub fn as_strings(&self) -> Result<Vec<String>, EngineError> {
        match self {
            EngineValue::Str(values) => Ok(values.clone()),
            EngineValue::Null => Ok(Vec::new()),
            EngineValue::List(items) => items.iter().try_fold(Vec::new(), |mut acc, item| {
                acc.extend(item.as_strings()?);
                Ok(acc)
            }),
            _ => Err(self.unexpected("string vector")),
        }
    }

    pub fn as_string(&self) -> Result<String, EngineError> {
        match self {
            EngineValue::Str(values) if !values.is_empty() => Ok(values[0].clone()),
            _ => Err(self.unexpected("string")),
        }
    }

    pub fn as_list(&self) -> Result<&[EngineValue], EngineError> {
        match self {
            EngineValue::List(items) => Ok(items),
            _ => Err(self.unexpected("list")),
        }
    }
}
