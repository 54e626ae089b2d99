use crate::core::{Field, Id, Version};
use std::collections::BTreeMap;
use std::fmt;

/// Claim that a field value belongs to one entity at one version.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueValue {
    field: Field,
    entity_id: Id,
    entity_version: Version,
}

impl UniqueValue {
    pub fn new(field: Field, entity_id: Id, entity_version: Version) -> Self {
        Self {
            field,
            entity_id,
            entity_version,
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn entity_id(&self) -> &Id {
        &self.entity_id
    }

    pub fn entity_version(&self) -> Version {
        self.entity_version
    }

    /// Same owning entity, whatever the version.
    pub fn is_owned_by(&self, id: &Id) -> bool {
        &self.entity_id == id
    }
}

impl fmt::Display for UniqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}@{}",
            self.field, self.entity_id, self.entity_version
        )
    }
}

/// Resolved owners of several fields, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniqueValueSet {
    values: BTreeMap<String, UniqueValue>,
}

impl UniqueValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: UniqueValue) {
        self.values.insert(value.field().name().to_string(), value);
    }

    pub fn get(&self, field_name: &str) -> Option<&UniqueValue> {
        self.values.get(field_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniqueValue> {
        self.values.values()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl IntoIterator for UniqueValueSet {
    type Item = UniqueValue;
    type IntoIter = std::collections::btree_map::IntoValues<String, UniqueValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_values()
    }
}
