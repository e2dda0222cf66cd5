//! Epoch-versioned registries.
//!
//! A registry is a named key/value container holding accumulated state.
//! Each epoch produces a new version derived from the previous epoch's
//! committed version plus the writes its stages made; committed versions
//! are never mutated.
//!
//! This module provides:
//! - The [`Registry`] container and its content hash
//! - [`BaselineView`], the read-only view stages consult
//! - [`RegistryWriter`], the per-invocation write buffer
//! - [`WorkingSet`], which folds stage writes into the next versions
//! - [`RegistryStore`] backends

mod container;
mod store;
mod view;
mod working;

pub use container::{Registry, RegistryWrite, WriteOp};
pub use store::{FileRegistryStore, InMemoryRegistryStore, RegistryStore};
pub use view::{BaselineView, RegistryWriter};
pub use working::WorkingSet;
