pub mod error;
pub mod field;
pub mod id;
pub mod scope;

pub use error::{Result, StoreError};
pub use field::{Field, FieldValue};
pub use id::{Id, Version, VersionClock};
pub use scope::CollectionScope;
