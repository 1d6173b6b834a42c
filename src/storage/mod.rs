pub mod catalog;
pub mod files;
pub mod heap;
pub mod index;
pub mod seqlog;

pub use self::catalog::{AoRelation, Catalog};
pub use self::heap::{CatalogHeap, CatalogRow};
