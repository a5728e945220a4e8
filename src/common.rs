//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// Intern a `&str` as an [`Id`].
pub fn id(s: &str) -> Id {
    internment::Intern::new(s.to_string())
}
