use super::{Id, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tenant namespace that prefixes every row key.
///
/// Two scopes never share a row, so equal ids or equal unique values in
/// different organizations or collections cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionScope {
    organization: Uuid,
    owner: Id,
    collection_name: String,
}

impl CollectionScope {
    pub fn new(organization: Uuid, owner: Id, collection_name: impl Into<String>) -> Self {
        Self {
            organization,
            owner,
            collection_name: collection_name.into(),
        }
    }

    pub fn organization(&self) -> Uuid {
        self.organization
    }

    pub fn owner(&self) -> &Id {
        &self.owner
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection_name.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        self.owner.validate()
    }

    /// Appends the scope prefix shared by all row keys of this scope.
    pub fn write_key_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.organization.as_bytes());
        out.extend_from_slice(self.owner.uuid().as_bytes());
        write_str(out, self.owner.entity_type());
        write_str(out, &self.collection_name);
    }
}

impl fmt::Display for CollectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization, self.owner, self.collection_name
        )
    }
}

/// Length-prefixed string, so adjacent strings cannot run into each other.
pub fn write_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Id {
        Id::new(Uuid::from_u128(7), "application")
    }

    #[test]
    fn test_scopes_with_different_collections_have_different_prefixes() {
        let org = Uuid::from_u128(1);
        let users = CollectionScope::new(org, owner(), "users");
        let groups = CollectionScope::new(org, owner(), "groups");

        let mut a = Vec::new();
        users.write_key_bytes(&mut a);
        let mut b = Vec::new();
        groups.write_key_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_length_prefix_prevents_ambiguity() {
        let mut a = Vec::new();
        write_str(&mut a, "ab");
        write_str(&mut a, "c");
        let mut b = Vec::new();
        write_str(&mut b, "a");
        write_str(&mut b, "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_empty_collection() {
        let scope = CollectionScope::new(Uuid::from_u128(1), owner(), "");
        assert!(scope.validate().is_err());
    }
}
