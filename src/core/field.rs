use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Typed value of an entity field.
///
/// Serialized externally tagged, so every encoded value carries the name of
/// its variant as a discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Boolean(bool),
    Double(f64),
    Integer(i32),
    Long(i64),
    String(String),
    Uuid(Uuid),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "BOOLEAN",
            Self::Double(_) => "DOUBLE",
            Self::Integer(_) => "INTEGER",
            Self::Long(_) => "LONG",
            Self::String(_) => "STRING",
            Self::Uuid(_) => "UUID",
        }
    }

    /// Stable one-byte tag used in row keys.
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Boolean(_) => 1,
            Self::Double(_) => 2,
            Self::Integer(_) => 3,
            Self::Long(_) => 4,
            Self::String(_) => 5,
            Self::Uuid(_) => 6,
        }
    }

    /// Appends the tag and a big-endian, platform independent payload.
    pub fn write_key_bytes(&self, out: &mut Vec<u8>) {
        out.push(self.type_tag());
        match self {
            Self::Boolean(b) => out.push(*b as u8),
            Self::Double(d) => out.extend_from_slice(&d.to_bits().to_be_bytes()),
            Self::Integer(i) => out.extend_from_slice(&i.to_be_bytes()),
            Self::Long(l) => out.extend_from_slice(&l.to_be_bytes()),
            Self::String(s) => {
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Self::Uuid(u) => out.extend_from_slice(u.as_bytes()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Double(d) => write!(f, "{}", d),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Long(l) => write!(f, "{}", l),
            Self::String(s) => write!(f, "'{}'", s),
            Self::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// A named value of an entity, optionally constrained to be unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    value: FieldValue,
    unique: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            unique: false,
        }
    }

    pub fn unique(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            unique: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bytes_distinguish_types() {
        let mut int_bytes = Vec::new();
        FieldValue::Integer(1).write_key_bytes(&mut int_bytes);
        let mut long_bytes = Vec::new();
        FieldValue::Long(1).write_key_bytes(&mut long_bytes);
        assert_ne!(int_bytes, long_bytes);
    }

    #[test]
    fn test_string_key_bytes_are_length_prefixed() {
        let mut a = Vec::new();
        FieldValue::String("ab".into()).write_key_bytes(&mut a);
        assert_eq!(a, vec![5, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_field_constructors() {
        let plain = Field::new("age", 42);
        assert!(!plain.is_unique());
        assert_eq!(plain.value(), &FieldValue::Integer(42));

        let unique = Field::unique("email", "a@example.com");
        assert!(unique.is_unique());
        assert_eq!(unique.to_string(), "email='a@example.com'");
    }
}
