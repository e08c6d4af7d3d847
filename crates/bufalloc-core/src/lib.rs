//! # bufalloc-core
//!
//! Fixed-region allocators that sub-allocate inside a caller-supplied byte
//! buffer, plus a heap-backed growable array.
//!
//! Buffer allocators borrow the buffer (`&mut [u8]`) for their whole lifetime
//! and hand out offsets relative to its start. Alignment is computed against
//! the buffer's real address. Intrusive headers live in the buffer bytes and
//! are read and written with bounds-checked word accesses. No `unsafe` code is
//! permitted in this crate.

#![deny(unsafe_code)]

pub mod align;
pub mod arena;
pub mod config;
pub mod dyn_array;
pub mod error;
pub mod free_list;
mod header;
pub mod log;
pub mod pool;
pub mod stack;
pub mod sync;

pub use arena::Arena;
pub use config::{AllocatorConfig, DEFAULT_ALIGN, FailurePolicy};
pub use dyn_array::DynArray;
pub use error::{AllocError, ContractExt, ErrorKind};
pub use free_list::{BlockInfo, FreeList, Placement};
pub use log::{DEFAULT_MAX_RECORDS, DiagnosticSink, LifecycleLog, LogLevel, LogRecord, StderrSink};
pub use pool::Pool;
pub use stack::Stack;
pub use sync::Locked;
