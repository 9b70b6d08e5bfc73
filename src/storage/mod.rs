//! Recording storage

pub mod clips;

pub use clips::{ClipReference, ClipStore, StorageError, StorageResult};
