//! Compiler of network captures into schedules for a hardware packet generator.
//! The packets are grouped into flows, merged into one schedule, placed in the generator memory
//! and encoded into batches of descriptors. The result is a `sched` + `pkt_data` archive.

/// Compiler configuration
pub mod config;
/// Compilation errors
pub mod error;
/// Compilation statistics
pub mod ui;

#[doc(hidden)]
/// Structures used throughout the library
pub mod structs;

#[doc(inline)]
pub use structs::*;

/// Capture reading
pub mod stage0;

/// Flow grouping
pub mod stage1;

/// Global scheduling
pub mod stage2;

/// Memory placement
pub mod stage3;

/// Batch encoding and container
pub mod stage4;

/// The whole pipeline
pub mod compiler;

pub use compiler::{compile, compile_store, Compilation};
pub use error::{CompileError, Result};
