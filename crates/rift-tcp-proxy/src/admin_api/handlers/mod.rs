//! Admin API request handlers.

pub mod rules;
pub mod system;
