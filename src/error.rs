use std::fmt;
use thiserror::Error;

use crate::target::Pid;

#[derive(Error, Debug)]
pub enum MemEditError {
    #[error("Couldn't attach to process {pid}: {source}")]
    Attach {
        pid: Pid,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't access {len} bytes at {address:#x}: {source}")]
    Access {
        address: usize,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enumerate {what}: {reason}")]
    Enumeration { what: String, reason: String },

    // A failed close can leave the target stopped; never swallow this one.
    #[error("Failed to release process {pid} during {step}: {source}")]
    Close {
        pid: Pid,
        step: CloseStep,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid buffer shape: {0}")]
    Shape(String),
}

/// The step of the release sequence which failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStep {
    /// Sending `SIGSTOP` to the target.
    Stop,
    /// Waiting for the target to report the stop.
    Wait,
    /// `PTRACE_DETACH`.
    Detach,
    /// Sending `SIGCONT` to the target.
    Continue,
    /// Releasing the OS process handle.
    ReleaseHandle,
}

impl fmt::Display for CloseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseStep::Stop => "stop",
            CloseStep::Wait => "wait for stop",
            CloseStep::Detach => "detach",
            CloseStep::Continue => "continue",
            CloseStep::ReleaseHandle => "handle release",
        };
        f.write_str(name)
    }
}
