//! Collaborators the saga consults but does not own.

pub mod catalog;

pub use catalog::{Catalog, CatalogEntry, CatalogError, InMemoryCatalog};
