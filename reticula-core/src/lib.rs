//! Shared primitives and traits for the Reticula phylogenetic-network ecosystem.
//!
//! `reticula-core` provides the foundation that the other Reticula crates
//! build on:
//!
//! - **Error types** — [`ReticulaError`] and [`Result`] for structured error handling
//! - **Traits** — Small cross-crate abstractions like [`Summarizable`]

pub mod error;
pub mod traits;

pub use error::{ReticulaError, Result};
pub use traits::*;
