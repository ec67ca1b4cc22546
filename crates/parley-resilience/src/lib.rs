//! # Parley Resilience
//!
//! Resilience patterns for the Parley cache layer.
//! Provides the cache availability guard, timeouts, and retry.

pub mod availability;
pub mod retry;
pub mod timeout;

pub use availability::*;
pub use retry::*;
pub use timeout::*;
