// ============================================================================
// Column Storage
// ============================================================================
//
// The column-store boundary consumed by the MVCC core:
//
//   ColumnStore          async trait: batched writes, slice reads, conditional
//                        row mutation
//   InMemoryColumnStore  single-node implementation with LWW cells and TTLs
//   Keyspace             shard-prefixed row keys, multi-epoch merged reads
//
// Row layout (partition key -> column name -> value):
//
//   entity_versions   scope + id               version             entity
//   log_entries       scope + id               version + stage     log state
//   unique_values     scope + field + value    owner + version     (empty)
//   unique_value_log  scope + id               version + field     field
//
// ============================================================================

pub mod backend;
pub mod column;
pub mod keyspace;
pub mod memory;

pub use backend::ColumnStore;
pub use column::{Column, ColumnFamily, ColumnRange, Mutation, MutationBatch, RowCondition, RowKey};
pub use keyspace::Keyspace;
pub use memory::InMemoryColumnStore;
