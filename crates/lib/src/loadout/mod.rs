//! Loadouts: versioned, prioritized collections of mods.
//!
//! A [`Loadout`] value is immutable once committed. Every edit goes through a
//! copy-on-write method that returns a new value; committing it to the
//! [`crate::db::Database`] assigns the next revision.

mod flatten;
mod types;

pub use flatten::{FlattenedFile, FlattenedLoadout, flatten};
pub use types::{GeneratedFile, GeneratorId, Loadout, LoadoutError, Mod, ModFile, ModKind, StaticModFile};
