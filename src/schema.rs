// SPDX-License-Identifier: MIT
//! Attribute schemas

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the object identifier field injected into every written schema
pub const OID_FIELD: &str = "OID";

/// Prefix of generated schema identifiers
pub const SCHEMA_URN_PREFIX: &str = "urn:shapefile-codec:schema:";

/// Attribute column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Date,
    Oid,
}

impl FieldType {
    /// Length given to fields that do not declare one
    pub fn default_length(&self) -> u16 {
        match self {
            FieldType::String => 255,
            FieldType::Short => 2,
            FieldType::Int | FieldType::Float | FieldType::Date | FieldType::Oid => 4,
            FieldType::Long | FieldType::Double => 8,
            FieldType::Bool => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Short => "short",
            FieldType::Int => "int",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Oid => "oid",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(FieldType::String),
            "short" => Ok(FieldType::Short),
            "int" => Ok(FieldType::Int),
            "long" => Ok(FieldType::Long),
            "float" => Ok(FieldType::Float),
            "double" => Ok(FieldType::Double),
            "bool" => Ok(FieldType::Bool),
            "date" => Ok(FieldType::Date),
            "oid" => Ok(FieldType::Oid),
            _ => Err(format!("Invalid field type: {s}")),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimpleField {
    pub name: String,
    pub field_type: FieldType,
    pub length: u16,
    /// Decimal places for numeric columns
    pub scale: u8,
}

impl SimpleField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: field_type.default_length(),
            scale: 0,
        }
    }

    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// The object identifier field
    pub fn oid() -> Self {
        Self::new(OID_FIELD, FieldType::Oid)
    }
}

/// Ordered set of fields under an identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: String,
    pub name: Option<String>,
    fields: Vec<SimpleField>,
}

impl Schema {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            fields: Vec::new(),
        }
    }

    /// A schema with a freshly generated identifier
    pub fn generated() -> Self {
        Self::new(format!("{SCHEMA_URN_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_field(mut self, field: SimpleField) -> Self {
        self.put(field);
        self
    }

    /// Add a field, replacing any field of the same name in place
    pub fn put(&mut self, field: SimpleField) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SimpleField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[SimpleField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn oid_field(&self) -> Option<&SimpleField> {
        self.fields.iter().find(|f| f.field_type == FieldType::Oid)
    }

    /// Append the object identifier field unless one is present
    pub fn ensure_oid(&mut self) {
        if self.oid_field().is_none() {
            self.fields.push(SimpleField::oid());
        }
    }

    /// Fields as an order-independent set, for structural comparison
    pub fn field_set(&self) -> BTreeSet<SimpleField> {
        self.fields.iter().cloned().collect()
    }

    /// Human-readable label: the name if set, else the identifier
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_replaces_by_name() {
        let mut schema = Schema::new("urn:test")
            .with_field(SimpleField::new("name", FieldType::String))
            .with_field(SimpleField::new("count", FieldType::Int));
        schema.put(SimpleField::new("name", FieldType::String).with_length(40));

        assert_eq!(schema.len(), 2);
        assert_eq!(schema.fields()[0].length, 40);
        assert_eq!(schema.get("count").unwrap().field_type, FieldType::Int);
    }

    #[test]
    fn test_ensure_oid_is_idempotent() {
        let mut schema = Schema::generated();
        assert!(schema.id.starts_with(SCHEMA_URN_PREFIX));
        schema.ensure_oid();
        schema.ensure_oid();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.oid_field().unwrap().name, OID_FIELD);
    }

    #[test]
    fn test_field_set_ignores_order() {
        let a = Schema::new("a")
            .with_field(SimpleField::new("x", FieldType::Double))
            .with_field(SimpleField::new("y", FieldType::Double));
        let b = Schema::new("b")
            .with_field(SimpleField::new("y", FieldType::Double))
            .with_field(SimpleField::new("x", FieldType::Double));
        assert_eq!(a.field_set(), b.field_set());
    }

    #[test]
    fn test_field_type_from_str() {
        assert_eq!("DOUBLE".parse::<FieldType>().unwrap(), FieldType::Double);
        assert_eq!(FieldType::Oid.to_string(), "oid");
        assert!("blob".parse::<FieldType>().is_err());
    }
}
