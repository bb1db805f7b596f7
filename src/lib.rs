//! SeaORM-centric nested-set tree storage.
//!
//! Ordered trees ("structures") live in one relational table using the
//! `root`/`lft`/`rgt`/`level` encoding. [`NestedSetRepository`] owns every
//! structural mutation and runs each one in a single transaction holding the
//! lock of the trees it touches; [`StructureQuery`] answers ancestor,
//! descendant and sibling lookups with plain interval comparisons. PostgreSQL
//! and SQLite are supported.

pub mod access;
pub mod bounds;
pub mod config;
pub mod error;
pub mod lock;
pub mod query;
pub mod repository;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::access::{Actor, ElementStore, StructureAuthorizer};
    pub use crate::bounds::{Bounds, DeleteMode, Placement};
    pub use crate::config::{AdvisoryLockStrategy, NestedSetConfig, NestedSetOptions};
    pub use crate::error::NestedSetError;
    pub use crate::query::StructureQuery;
    pub use crate::repository::NestedSetRepository;
    pub use crate::traits::{NestedSetModel, Structure};
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}

pub use access::{Actor, ElementStore, StructureAuthorizer};
pub use bounds::{check_tree, Bounds, DeleteMode, Placement};
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, NestedSetConfig, NestedSetOptions, DEFAULT_LOCK_TIMEOUT,
};
pub use error::NestedSetError;
pub use nested_set_macros::NestedSetModel as NestedSetModelDerive;
#[doc(hidden)]
pub use nested_set_macros::NestedSetModel;
pub use query::StructureQuery;
pub use repository::NestedSetRepository;
pub use traits::{NestedSetModel, Structure};
