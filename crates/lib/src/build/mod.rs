//! Build definitions and their resolution into runnable builds.
//!
//! Definitions live one per `*.json` file in the project's builds directory;
//! the file stem is the build name. See [`types`] for the file format.
//!
//! Loading happens in two phases:
//!
//! - [`load`] reads and parses each file into a [`BuildDefinition`]
//! - [`resolve`] inlines sub-build references and validates commands,
//!   producing a [`BuildCatalog`] of immutable [`Build`]s
//!
//! A definition that fails either phase is left out of the catalog and
//! recorded with its error. The other builds are unaffected.

mod error;
pub mod load;
pub mod resolve;
pub mod types;

pub use error::BuildError;
pub use resolve::BuildCatalog;
pub use types::{Build, BuildDef, BuildDefinition, BuildNode, DefNode, NodeDef, SubBuildNode};
