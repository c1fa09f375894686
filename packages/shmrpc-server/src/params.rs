//! Parameter binding for RPC requests
//!
//! Each method declares its parameters as a list of `ParamSpec`s. `bind`
//! validates a request's `params` object against that list and produces a
//! `BoundParams`, or fails without producing anything.
//!
//! Array parameters hold vertex ids: each element is an integer id or a
//! vertex name, resolved through the graph's name lookup.

use std::collections::HashMap;

use serde_json::Value;

use crate::batch::VertexId;
use crate::error::{Result, ServerError};
use crate::graph::GraphStore;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Str,
    Float,
    Bool,
    Array,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Int => "integer",
            ParamKind::Str => "string",
            ParamKind::Float => "number",
            ParamKind::Bool => "boolean",
            ParamKind::Array => "array",
        }
    }
}

/// Bound value of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Float(f64),
    Bool(bool),
    Array(Vec<VertexId>),
}

/// Declaration of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub optional: bool,
    /// Bound when an optional parameter is absent
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, optional: false, default: None }
    }

    pub fn int(name: &'static str) -> Self {
        Self::required(name, ParamKind::Int)
    }

    pub fn string(name: &'static str) -> Self {
        Self::required(name, ParamKind::Str)
    }

    pub fn float(name: &'static str) -> Self {
        Self::required(name, ParamKind::Float)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::required(name, ParamKind::Bool)
    }

    pub fn array(name: &'static str) -> Self {
        Self::required(name, ParamKind::Array)
    }

    /// Make the parameter optional, binding `default` when absent.
    pub fn optional(mut self, default: ParamValue) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }
}

/// Parameters bound by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParams {
    values: HashMap<&'static str, ParamValue>,
}

impl BoundParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            _ => Err(mismatch(name, ParamKind::Int)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(ParamValue::Str(v)) => Ok(v),
            _ => Err(mismatch(name, ParamKind::Str)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            _ => Err(mismatch(name, ParamKind::Float)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Ok(*v),
            _ => Err(mismatch(name, ParamKind::Bool)),
        }
    }

    pub fn array(&self, name: &str) -> Result<&[VertexId]> {
        match self.get(name) {
            Some(ParamValue::Array(v)) => Ok(v),
            _ => Err(mismatch(name, ParamKind::Array)),
        }
    }
}

fn mismatch(name: &str, kind: ParamKind) -> ServerError {
    ServerError::ParamTypeMismatch {
        name: name.to_string(),
        expected: kind.as_str(),
    }
}

/// Bind `params` against `specs`.
///
/// `graph` resolves vertex names inside array parameters; without it only
/// integer elements are accepted.
pub fn bind(specs: &[ParamSpec], params: &Value, graph: Option<&dyn GraphStore>) -> Result<BoundParams> {
    let object = match params {
        Value::Object(map) => Some(map),
        Value::Null => None,
        _ => return Err(ServerError::InvalidParameter("params must be an object".to_string())),
    };

    let mut bound = BoundParams::default();
    for spec in specs {
        let value = match object.and_then(|m| m.get(spec.name)) {
            None => match (&spec.default, spec.optional) {
                (Some(default), true) => default.clone(),
                _ => return Err(ServerError::MissingParameter(spec.name.to_string())),
            },
            Some(raw) => bind_value(spec, raw, graph)?,
        };
        bound.values.insert(spec.name, value);
    }
    Ok(bound)
}

fn bind_value(spec: &ParamSpec, raw: &Value, graph: Option<&dyn GraphStore>) -> Result<ParamValue> {
    let value = match spec.kind {
        ParamKind::Int => raw.as_i64().map(ParamValue::Int),
        ParamKind::Str => raw.as_str().map(|s| ParamValue::Str(s.to_string())),
        ParamKind::Float => raw.as_f64().map(ParamValue::Float),
        ParamKind::Bool => raw.as_bool().map(ParamValue::Bool),
        ParamKind::Array => match raw.as_array() {
            Some(elements) => Some(ParamValue::Array(bind_vertex_array(spec.name, elements, graph)?)),
            None => None,
        },
    };
    value.ok_or_else(|| mismatch(spec.name, spec.kind))
}

fn bind_vertex_array(
    name: &str,
    elements: &[Value],
    graph: Option<&dyn GraphStore>,
) -> Result<Vec<VertexId>> {
    let mut ids = Vec::new();
    ids.try_reserve_exact(elements.len()).map_err(|e| {
        ServerError::ResourceExhausted(format!("parameter '{}' with {} elements: {}", name, elements.len(), e))
    })?;

    for (index, element) in elements.iter().enumerate() {
        let id = match element {
            Value::Number(n) => n.as_i64().ok_or_else(|| mismatch(name, ParamKind::Array))?,
            Value::String(s) => graph.and_then(|g| g.lookup_id(s)).ok_or_else(|| {
                ServerError::UnresolvedVertexName {
                    param: name.to_string(),
                    index,
                    name: s.clone(),
                }
            })?,
            _ => return Err(mismatch(name, ParamKind::Array)),
        };
        ids.push(id);
    }
    Ok(ids)
}
