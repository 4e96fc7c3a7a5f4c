// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scalar values held by entity attributes.
//!
//! All attributes are handled generically through enum dispatch. EXPRESS
//! select values (e.g. COBie `AttributeValue`) are carried as a typed wrapper
//! around the underlying primitive so that the concrete value type survives a
//! round trip through a spreadsheet cell.

use chrono::NaiveDateTime;
use std::fmt;

/// Format used for date/time cells and the canonical string form.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value
    String(String),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Date/time value (second precision)
    DateTime(NaiveDateTime),
    /// Enumeration member
    Enum(String),
    /// Select value: the concrete wrapper type name and the wrapped primitive
    Typed {
        type_name: String,
        inner: Box<Value>,
    },
}

impl Value {
    /// Wrap a primitive in a named value type.
    pub fn typed(type_name: impl Into<String>, inner: Value) -> Self {
        Value::Typed {
            type_name: type_name.into(),
            inner: Box::new(inner),
        }
    }

    /// Peel a select wrapper down to the underlying primitive.
    pub fn unwrapped(&self) -> &Value {
        match self {
            Value::Typed { inner, .. } => inner.unwrapped(),
            other => other,
        }
    }

    /// Name of the wrapper type if this is a select value.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Value::Typed { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self.unwrapped() {
            Value::String(s) => Some(s),
            Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self.unwrapped() {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrapped() {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrapped() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_date_time(&self) -> Option<NaiveDateTime> {
        match self.unwrapped() {
            Value::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    /// Identity comparison used when two rows or a row and an entity must
    /// agree on a value. Numbers compare within 1e-9, everything else exact.
    /// Wrappers compare by their underlying primitive.
    pub fn matches(&self, other: &Value) -> bool {
        match (self.unwrapped(), other.unwrapped()) {
            (Value::Float(a), b) | (b, Value::Float(a)) => match b.as_f64() {
                Some(bf) => (a - bf).abs() < 1e-9,
                None => false,
            },
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::DateTime(d) => write!(f, "{}", d.format(DATE_TIME_FORMAT)),
            Value::Enum(e) => f.write_str(e),
            Value::Typed { inner, .. } => inner.fmt(f),
        }
    }
}
