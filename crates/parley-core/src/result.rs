//! Result type aliases for Parley.

use crate::ParleyError;

/// A specialized `Result` type for Parley operations.
pub type ParleyResult<T> = Result<T, ParleyError>;
