//! memedit, a library for reading, writing and searching the memory of running processes.
//!
//! ```no_run
//! use memedit::target::{NativeProcess, Process};
//! use memedit::search::SearchMode;
//! use memedit::value::Buffer;
//!
//! # fn main() -> memedit::MemEditResult<()> {
//! let pid = NativeProcess::find_pid_by_name("magic")?.expect("magic is not running");
//! NativeProcess::with_open(pid, |process| {
//!     let addrs = process.search_all_memory(&Buffer::from_value(1234567890u32), true, SearchMode::Verbatim)?;
//!     if let Some(&addr) = addrs.first() {
//!         process.write_value(addr, 42u32)?;
//!     }
//!     Ok(())
//! })
//! # }
//! ```

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
compile_error!("memedit only supports Linux and Windows");

mod error;

pub use error::{CloseStep, MemEditError};

pub type MemEditResult<T> = Result<T, MemEditError>;

/// Typed buffers used as read destinations, write sources and search needles.
pub mod value;

/// Verbatim and structural search over byte haystacks.
pub mod search;

/// Functions to work with target processes: attaching, reading & writing memory, enumerating regions.
pub mod target;

/// Marker-delimited shared memory blocks and the turn-taking write over them.
pub mod handshake;
