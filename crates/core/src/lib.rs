#![deny(unused)]
//! Core types, traits, and error definitions for Sandboxer.
//!
//! This crate provides the foundational building blocks shared by the
//! storage backends and the overlay engine: the operation-log data model,
//! the configuration surface, and the trait seams backends implement.

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
