//! Load-side relation policy for relmodel.
//!
//! The query layer asks this crate which relations to populate when an
//! entity is loaded. No statements are built here.

pub mod eager;

pub use eager::{EagerLoader, IncludePath, eager_relations};
