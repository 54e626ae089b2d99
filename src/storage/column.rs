use crate::config::Consistency;
use std::fmt;
use std::time::Duration;

/// Logical tables of the keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnFamily {
    EntityVersions,
    LogEntries,
    UniqueValues,
    UniqueValueLog,
}

impl ColumnFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnFamily::EntityVersions => "entity_versions",
            ColumnFamily::LogEntries => "log_entries",
            ColumnFamily::UniqueValues => "unique_values",
            ColumnFamily::UniqueValueLog => "unique_value_log",
        }
    }
}

impl fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Physical row address: family, shard bucket and partition key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub family: ColumnFamily,
    pub bucket: u32,
    pub key: Vec<u8>,
}

impl RowKey {
    pub fn new(family: ColumnFamily, bucket: u32, key: Vec<u8>) -> Self {
        Self {
            family,
            bucket,
            key,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]/", self.family, self.bucket)?;
        for byte in self.key.iter().take(24) {
            write!(f, "{:02x}", byte)?;
        }
        if self.key.len() > 24 {
            write!(f, "..")?;
        }
        Ok(())
    }
}

/// A live column as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    /// Write timestamp in microseconds; the highest timestamp wins.
    pub timestamp: i64,
}

/// Column slice of a single row.
///
/// `start` is inclusive, `end` exclusive, both compared bytewise. `limit`
/// applies after ordering, so a reversed range with a limit returns the
/// greatest names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
    pub reversed: bool,
    pub limit: Option<usize>,
}

impl ColumnRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Every column whose name starts with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Some(prefix.to_vec()),
            end: prefix_successor(prefix),
            reversed: false,
            limit: None,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if name < start.as_slice() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if name >= end.as_slice() {
                return false;
            }
        }
        true
    }
}

/// Smallest byte string greater than every string prefixed by `prefix`.
/// `None` when no such bound exists (empty or all-0xff prefix).
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put {
        row: RowKey,
        name: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    DeleteColumn {
        row: RowKey,
        name: Vec<u8>,
    },
    DeleteRow {
        row: RowKey,
    },
}

impl Mutation {
    pub fn row(&self) -> &RowKey {
        match self {
            Mutation::Put { row, .. } => row,
            Mutation::DeleteColumn { row, .. } => row,
            Mutation::DeleteRow { row } => row,
        }
    }
}

/// Mutations applied together, all stamped with one write timestamp.
///
/// Atomicity holds per row only: the mutations of one row are applied
/// together, different rows may be observed half-applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationBatch {
    timestamp: i64,
    consistency: Consistency,
    mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new(timestamp: i64, consistency: Consistency) -> Self {
        Self {
            timestamp,
            consistency,
            mutations: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn put(&mut self, row: RowKey, name: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.mutations.push(Mutation::Put {
            row,
            name,
            value,
            ttl: None,
        });
        self
    }

    /// Put a column that disappears after `ttl`. A zero `ttl` never expires.
    pub fn put_with_ttl(
        &mut self,
        row: RowKey,
        name: Vec<u8>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> &mut Self {
        let ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self.mutations.push(Mutation::Put {
            row,
            name,
            value,
            ttl,
        });
        self
    }

    pub fn delete_column(&mut self, row: RowKey, name: Vec<u8>) -> &mut Self {
        self.mutations.push(Mutation::DeleteColumn { row, name });
        self
    }

    pub fn delete_row(&mut self, row: RowKey) -> &mut Self {
        self.mutations.push(Mutation::DeleteRow { row });
        self
    }

    /// Append `other`'s mutations. Its timestamp is discarded.
    pub fn merge(&mut self, other: MutationBatch) -> &mut Self {
        self.mutations.extend(other.mutations);
        self
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Precondition of `ColumnStore::check_and_mutate`, evaluated against the
/// live columns of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCondition {
    /// The row has no live columns.
    Empty,
    /// Every live column name starts with the given prefix (an empty row
    /// qualifies).
    OwnedBy(Vec<u8>),
}

impl RowCondition {
    pub fn holds<'a>(&self, mut live_names: impl Iterator<Item = &'a [u8]>) -> bool {
        match self {
            RowCondition::Empty => live_names.next().is_none(),
            RowCondition::OwnedBy(prefix) => live_names.all(|name| name.starts_with(prefix)),
        }
    }
}
