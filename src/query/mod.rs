//! Backend-agnostic query algebra
//!
//! Pure data: conditions, select/update queries, sort order, paging windows
//! and batched key lookups. Query adapters render these for a backend.

pub mod condition;
pub mod keys;
pub mod select;

pub use condition::{Comparator, Condition, Connector, Operand};
pub use keys::{KeyBatch, key_batch_size, key_batches, tuple_condition, tuples_condition};
pub use select::{
    Range, SelectQuery, SortDirection, SortOrderField, UpdateAssign, UpdateQuery, pack_updates,
    paginate,
};
