pub mod atomic;
pub mod document;
pub mod envelope;
pub mod lock;
pub mod recover;

pub use document::{DocumentStore, StoreOptions};
