pub mod collection;
pub mod entity_store;

pub use collection::EntityCollectionManager;
pub use entity_store::EntityStore;
