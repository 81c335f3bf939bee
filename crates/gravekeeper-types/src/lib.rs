//! Shared domain types for the gravekeeper persistence layer.
//!
//! These types describe what a grave *is* and how it is represented in the
//! world. They carry no I/O and no knowledge of any database backend; the
//! `gravekeeper-db` crate maps them to and from rows.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for grave identifiers
//! - [`location`] -- World locations, block locations, and chunk keys
//! - [`grave`] -- The [`Grave`] record and typed column updates
//! - [`visual`] -- Block and entity records that render a grave in the world
//! - [`error`] -- Parse errors for wire-format strings

pub mod error;
pub mod grave;
pub mod ids;
pub mod location;
pub mod visual;

// Re-export all public types at crate root for convenience.
pub use error::ParseError;
pub use grave::{Grave, GraveUpdate, join_permissions, split_permissions};
pub use ids::GraveId;
pub use location::{BlockLocation, ChunkKey, Location};
pub use visual::{AIR, BlockData, EntityData, EntityKind};
