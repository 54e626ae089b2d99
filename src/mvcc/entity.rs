use crate::core::{Field, Id, Result, StoreError, Version};
use std::collections::BTreeMap;

/// Field set of one entity version, keyed by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityData {
    fields: BTreeMap<String, Field>,
}

impl EntityData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a field list. Two fields with the same name are rejected.
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Result<Self> {
        let mut data = Self::new();
        for field in fields {
            if data.fields.contains_key(field.name()) {
                return Err(StoreError::InvalidArgument(format!(
                    "duplicate field name '{}'",
                    field.name()
                )));
            }
            data.fields.insert(field.name().to_string(), field);
        }
        Ok(data)
    }

    /// Insert or replace a field, returning the replaced one.
    pub fn set_field(&mut self, field: Field) -> Option<Field> {
        self.fields.insert(field.name().to_string(), field)
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields ordered by name.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.is_unique())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields.into_values().collect()
    }
}

/// One immutable snapshot of an entity. `entity` is `None` for a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct MvccEntity {
    id: Id,
    version: Version,
    entity: Option<EntityData>,
}

impl MvccEntity {
    pub fn new(id: Id, version: Version, entity: Option<EntityData>) -> Self {
        Self {
            id,
            version,
            entity,
        }
    }

    pub fn tombstone(id: Id, version: Version) -> Self {
        Self::new(id, version, None)
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn entity(&self) -> Option<&EntityData> {
        self.entity.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.entity.is_none()
    }

    pub fn into_entity(self) -> Option<EntityData> {
        self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let err = EntityData::from_fields(vec![Field::new("name", "a"), Field::new("name", "b")])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_fields_sorted_and_unique_filtered() {
        let data = EntityData::from_fields(vec![
            Field::new("zeta", 1i32),
            Field::unique("email", "a@example.com"),
            Field::new("alpha", true),
        ])
        .unwrap();

        let names: Vec<_> = data.fields().map(|f| f.name()).collect();
        assert_eq!(names, vec!["alpha", "email", "zeta"]);
        let unique: Vec<_> = data.unique_fields().map(|f| f.name()).collect();
        assert_eq!(unique, vec!["email"]);
    }

    #[test]
    fn test_set_field_replaces() {
        let mut data = EntityData::new();
        assert!(data.set_field(Field::new("n", 1i32)).is_none());
        let old = data.set_field(Field::new("n", 2i32)).unwrap();
        assert_eq!(old, Field::new("n", 1i32));
        assert_eq!(data.len(), 1);
    }
}
