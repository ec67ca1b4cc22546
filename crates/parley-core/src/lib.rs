//! # Parley Core
//!
//! Core types, typed ids, domain models, and error definitions shared by
//! every Parley crate.

pub mod domain;
pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;

pub use domain::*;
pub use error::*;
pub use id::*;
pub use result::*;
