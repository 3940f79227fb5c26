//! Simulation harness and inspection tools for deltapack.
//!
//! - [`sim`] drives a deterministic synthetic world through the packing
//!   engine, a live observer, and a replicated string table, and reports
//!   sizes, timings and consistency counts.
//! - [`demo`] holds the demo classes and a JSON view of their flattened
//!   layout.
//!
//! # Design Principles
//!
//! - **First-class tooling** - These tools are part of the product, not afterthoughts.
//! - **Deterministic runs** - The same seed and config give the same bytes.

pub mod demo;
pub mod sim;

pub use sim::{run, SimConfig, SimReport};
