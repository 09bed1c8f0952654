//! Relational fallback dialect.

mod builder;
pub mod helpers;

pub use builder::RelationalBuilder;
