//! Typed values stored in the blackboard and carried by node configuration.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A value that can live in the blackboard.
///
/// Structured messages (robot state, service responses) are kept as JSON so
/// that nodes can address into them with dotted field paths like
/// `state.power_state.charge.value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Message(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    Message,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Message => "message",
        })
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "float" => Self::Float,
            "string" => Self::String,
            "message" => Self::Message,
            _ => return Err(s.to_owned()),
        })
    }
}

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::Message(_) => ValueType::Message,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Infers the type of an untyped literal from the tree source.
    pub fn parse_literal(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            Self::Int(i)
        } else if let Ok(f) = s.parse::<f64>() {
            Self::Float(f)
        } else if let Ok(b) = s.parse::<bool>() {
            Self::Bool(b)
        } else {
            Self::String(s.to_owned())
        }
    }

    /// Converts the value to the requested type, if there is a lossless way to.
    ///
    /// Strings parse into scalars, which is how literals written as `"3"` in a
    /// tree file reach an integer field.
    pub fn coerce(self, ty: ValueType) -> Option<Value> {
        if self.ty() == ty {
            return Some(self);
        }
        match (self, ty) {
            (Self::Int(i), ValueType::Float) => Some(Self::Float(i as f64)),
            (Self::String(s), ValueType::Int) => s.trim().parse().ok().map(Self::Int),
            (Self::String(s), ValueType::Float) => s.trim().parse().ok().map(Self::Float),
            (Self::String(s), ValueType::Bool) => s.trim().parse().ok().map(Self::Bool),
            (value, ValueType::Message) => Some(Self::Message(value.to_json())),
            _ => None,
        }
    }

    /// Converts a JSON node to a blackboard value, keeping compound nodes as messages.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Self::Int(i),
                (None, Some(f)) => Self::Float(f),
                (None, None) => Self::Message(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => Self::String(s),
            other => Self::Message(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Message(m) => m.clone(),
        }
    }

    /// Walks a dotted field path into a structured value.
    ///
    /// Returns the index of the first segment that could not be followed.
    pub fn field<S: AsRef<str>>(&self, path: &[S]) -> Result<Value, usize> {
        if path.is_empty() {
            return Ok(self.clone());
        }
        let Self::Message(root) = self else {
            return Err(0);
        };
        let mut cursor = root;
        for (i, segment) in path.iter().enumerate() {
            let segment = segment.as_ref();
            let next = match cursor {
                serde_json::Value::Object(map) => map.get(segment),
                serde_json::Value::Array(items) => {
                    segment.parse::<usize>().ok().and_then(|n| items.get(n))
                }
                _ => None,
            };
            cursor = next.ok_or(i)?;
        }
        Ok(Self::from_json(cursor.clone()))
    }

    /// Evaluates `self <op> rhs`. Returns `None` when the operands are not comparable.
    pub fn compare(&self, op: CompareOp, rhs: &Value) -> Option<bool> {
        let ordering = match (self, rhs) {
            (Self::Int(l), Self::Int(r)) => Some(l.cmp(r)),
            (Self::String(l), Self::String(r)) => Some(l.cmp(r)),
            (Self::Bool(l), Self::Bool(r)) => {
                return op.equality().map(|eq| (l == r) == eq);
            }
            (Self::Message(l), Self::Message(r)) => {
                return op.equality().map(|eq| (l == r) == eq);
            }
            (l, r) => l.as_f64().zip(r.as_f64()).and_then(|(l, r)| l.partial_cmp(&r)),
        }?;
        Some(op.test(ordering))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => f.write_str(s),
            Self::Message(m) => write!(f, "{}", m),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Message(v)
    }
}

/// Comparison operator of a `Condition` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
            Self::Le => ordering != Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }

    /// `Some(true)` for `=`, `Some(false)` for `!=`, `None` for orderings.
    fn equality(self) -> Option<bool> {
        match self {
            Self::Eq => Some(true),
            Self::Ne => Some(false),
            _ => None,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" | "==" | "eq" => Self::Eq,
            "!=" | "≠" | "ne" => Self::Ne,
            "<" | "lt" => Self::Lt,
            ">" | "gt" => Self::Gt,
            "<=" | "≤" | "le" => Self::Le,
            ">=" | "≥" | "ge" => Self::Ge,
            _ => return Err(s.to_owned()),
        })
    }
}
