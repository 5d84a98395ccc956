//! Typed tool parameters and argument validation.
//!
//! Tool arguments arrive as untyped JSON; each tool declares its parameters
//! once and the dispatcher checks every invocation against them before the
//! handler runs, so handlers can assume shape.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{Error, Result};

/// Argument type for tool inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    Enum(Vec<String>),
    Optional(Box<ParamType>),
}

impl ParamType {
    /// Validate a JSON value against this type.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            ParamType::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("expected string, got {}", value_type_name(value)))
                }
            }
            ParamType::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("expected integer, got {}", value_type_name(value)))
                }
            }
            ParamType::Float => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("expected number, got {}", value_type_name(value)))
                }
            }
            ParamType::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected boolean, got {}", value_type_name(value)))
                }
            }
            ParamType::Enum(variants) => {
                if let Some(s) = value.as_str() {
                    if variants.iter().any(|v| v == s) {
                        Ok(())
                    } else {
                        Err(format!(
                            "invalid value '{}', expected one of: {}",
                            s,
                            variants.join(", ")
                        ))
                    }
                } else {
                    Err(format!(
                        "expected string for enum, got {}",
                        value_type_name(value)
                    ))
                }
            }
            ParamType::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate(value)
                }
            }
        }
    }

    /// Human-readable type name for tool listings.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single declared argument.
#[derive(Debug, Clone, Serialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            default: None,
        }
    }

    /// An argument the caller may omit; absent means absent, no default.
    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: ParamType::Optional(Box::new(param_type)),
            description: description.to_string(),
            default: None,
        }
    }

    pub fn with_default(
        name: &str,
        param_type: ParamType,
        description: &str,
        default: Value,
    ) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            default: Some(default),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }
}

/// Check provided arguments against the declared parameters.
///
/// The first problem found is returned as an `invalid_argument` error:
/// missing required arguments in declaration order, then unknown names and
/// type mismatches in argument order.
pub fn validate_args(params: &[ParamDef], args: &Map<String, Value>) -> Result<()> {
    for def in params {
        if def.is_required() && !args.contains_key(&def.name) {
            return Err(Error::invalid_argument(
                &def.name,
                "missing required argument",
            ));
        }
    }

    let known: HashMap<&str, &ParamDef> = params
        .iter()
        .map(|def| (def.name.as_str(), def))
        .collect();

    for (key, value) in args {
        match known.get(key.as_str()) {
            Some(def) => def
                .param_type
                .validate(value)
                .map_err(|message| Error::invalid_argument(key, message))?,
            None => return Err(Error::invalid_argument(key, "unknown argument")),
        }
    }
    Ok(())
}

/// Insert declared defaults for absent arguments. Provided values are
/// never overwritten.
pub fn fill_defaults(params: &[ParamDef], args: &mut Map<String, Value>) {
    for def in params {
        if !args.contains_key(&def.name) {
            if let Some(default) = &def.default {
                args.insert(def.name.clone(), default.clone());
            }
        }
    }
}
