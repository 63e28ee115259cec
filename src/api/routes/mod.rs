//! API route modules.

pub mod analyze;
