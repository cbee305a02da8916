//! Command handlers.
//!
//! Each handler takes parsed arguments, wires the queue together and
//! returns a result for `main` to present.

pub mod get;
