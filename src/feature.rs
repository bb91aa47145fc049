// SPDX-License-Identifier: MIT
//! Attribute values and features

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::schema::SimpleField;

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Date(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view; text is parsed, booleans count as 0 or 1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null | Value::Date(_) => None,
        }
    }

    /// Integral view; doubles are truncated toward zero
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) if d.is_finite() => Some(d.trunc() as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|d| d.is_finite()).map(|d| d as i64))
            }
            _ => None,
        }
    }

    /// Boolean view; text starting with t, y or equal to 1 is true, `?` is null
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Double(d) => Some(*d != 0.0),
            Value::Text(s) if s == "?" => None,
            Value::Text(s) => {
                let lower = s.trim().to_lowercase();
                Some(lower.starts_with('t') || lower.starts_with('y') || lower == "1")
            }
            Value::Null | Value::Date(_) => None,
        }
    }

    /// Display text; dates use ISO 8601 with milliseconds
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

/// An attribute row with an optional geometry
///
/// `schema` names a declared schema by identifier. Rows without one are
/// grouped by the structure of their own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub schema: Option<String>,
    attributes: Vec<(SimpleField, Value)>,
    pub geometry: Option<Geometry>,
    pub style_url: Option<String>,
}

impl Feature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, id: impl Into<String>) -> Self {
        self.schema = Some(id.into());
        self
    }

    pub fn with_geometry(mut self, geometry: impl Into<Geometry>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    pub fn with_style_url(mut self, url: impl Into<String>) -> Self {
        self.style_url = Some(url.into());
        self
    }

    pub fn with_value(mut self, field: SimpleField, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a value, replacing any value under the same field name
    pub fn set(&mut self, field: SimpleField, value: impl Into<Value>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(f, _)| f.name == field.name) {
            Some(slot) => *slot = (field, value),
            None => self.attributes.push((field, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(f, _)| f.name == name)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = &SimpleField> {
        self.attributes.iter().map(|(f, _)| f)
    }

    pub fn attributes(&self) -> &[(SimpleField, Value)] {
        &self.attributes
    }
}
