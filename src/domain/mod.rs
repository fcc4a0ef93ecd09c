//! Domain layer types and invariants.

pub mod headings;
pub mod locator;
pub mod settings;
pub mod slug;
