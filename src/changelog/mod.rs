// ============================================================================
// Change Log
// ============================================================================
//
// Field-level diff of an entity's version history. Pure: works on versions
// already loaded and performs no I/O.
//
// The oldest version handed in is the baseline and produces no entries. Each
// later version is compared with the field map built so far:
//
//   field not seen before          ADDED
//   field seen with another value  CHANGED
//   field seen, now missing        REMOVED
//   tombstone version              REMOVED for every field seen
//
// ============================================================================

use crate::core::{Field, Result, StoreError, Version};
use crate::mvcc::MvccEntity;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Added,
    Changed,
    Removed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Added => write!(f, "ADDED"),
            ChangeType::Changed => write!(f, "CHANGED"),
            ChangeType::Removed => write!(f, "REMOVED"),
        }
    }
}

/// One field change introduced by `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogEntry {
    pub version: Version,
    pub field_name: String,
    pub change_type: ChangeType,
    /// New field for ADDED and CHANGED, last seen field for REMOVED
    pub field: Field,
}

impl fmt::Display for ChangeLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.field_name, self.change_type)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeLogGenerator;

impl ChangeLogGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Changes from the first version of `versions` up to and including
    /// `target`, ordered by version then field name.
    ///
    /// `versions` must be sorted oldest first.
    pub fn get_change_log(
        &self,
        versions: &[MvccEntity],
        target: Version,
    ) -> Result<Vec<ChangeLogEntry>> {
        check_sorted(versions)?;
        let end = position(versions, target)?;

        let mut running: BTreeMap<String, Field> = BTreeMap::new();
        let mut changes = Vec::new();

        for (index, snapshot) in versions[..=end].iter().enumerate() {
            let current: BTreeMap<String, Field> = snapshot
                .entity()
                .map(|data| {
                    data.fields()
                        .map(|field| (field.name().to_string(), field.clone()))
                        .collect()
                })
                .unwrap_or_default();

            if index > 0 {
                diff(snapshot.version(), &running, &current, &mut changes);
            }
            running = current;
        }

        Ok(changes)
    }

    /// Changes introduced by versions after `from` up to and including `to`.
    pub fn get_change_log_between(
        &self,
        versions: &[MvccEntity],
        from: Version,
        to: Version,
    ) -> Result<Vec<ChangeLogEntry>> {
        if from > to {
            return Err(StoreError::InvalidArgument(format!(
                "change log range is reversed: {} > {}",
                from, to
            )));
        }
        position(versions, from)?;

        let mut changes = self.get_change_log(versions, to)?;
        changes.retain(|entry| entry.version > from);
        Ok(changes)
    }
}

fn check_sorted(versions: &[MvccEntity]) -> Result<()> {
    if versions
        .windows(2)
        .any(|pair| pair[0].version() >= pair[1].version())
    {
        return Err(StoreError::InvalidArgument(
            "versions must be strictly ascending".to_string(),
        ));
    }
    Ok(())
}

fn position(versions: &[MvccEntity], version: Version) -> Result<usize> {
    versions
        .binary_search_by(|snapshot| snapshot.version().cmp(&version))
        .map_err(|_| StoreError::NotFound(format!("version {} is not in the history", version)))
}

/// Entries for one version, ordered by field name.
fn diff(
    version: Version,
    before: &BTreeMap<String, Field>,
    after: &BTreeMap<String, Field>,
    out: &mut Vec<ChangeLogEntry>,
) {
    let mut names: Vec<&String> = before.keys().chain(after.keys()).collect();
    names.sort();
    names.dedup();

    for name in names {
        let change = match (before.get(name), after.get(name)) {
            (None, Some(added)) => Some((ChangeType::Added, added)),
            (Some(old), Some(new)) if old.value() != new.value() => Some((ChangeType::Changed, new)),
            (Some(removed), None) => Some((ChangeType::Removed, removed)),
            _ => None,
        };
        if let Some((change_type, field)) = change {
            out.push(ChangeLogEntry {
                version,
                field_name: name.clone(),
                change_type,
                field: field.clone(),
            });
        }
    }
}
