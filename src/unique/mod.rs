pub mod enforcer;
pub mod serialization;
pub mod value;

pub use enforcer::UniqueValueEnforcer;
pub use serialization::UniqueValueSerialization;
pub use value::{UniqueValue, UniqueValueSet};
