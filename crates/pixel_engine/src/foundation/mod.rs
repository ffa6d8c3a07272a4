//! Foundation module - Core utilities shared by the rest of the crate
//!
//! Currently this is the logging setup; everything else in the crate logs
//! through the `log` facade.

pub mod logging;
