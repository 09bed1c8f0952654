//! Common utilities for docbridge
//!
//! This crate provides the error taxonomy shared by the query builder and the
//! model adapter.

pub mod error;

pub use error::{BridgeError, Result};
