use std::os::unix::fs::FileExt;

use super::LinuxProcess;
use crate::value::Buffer;
use crate::{MemEditError, MemEditResult};

/// Allows to read memory from different locations in the target's memory as a single operation.
pub struct ReadMemory<'a> {
    target: &'a LinuxProcess,
    read_ops: Vec<ReadOp<'a>>,
}

impl<'a> ReadMemory<'a> {
    pub(in crate::target) fn new(target: &'a LinuxProcess) -> Self {
        ReadMemory {
            target,
            read_ops: Vec::new(),
        }
    }

    /// Reads `local.len()` bytes from the target's memory at location `remote_base` into `local`.
    /// You should call `apply` in order to execute the memory read operation.
    pub fn read(mut self, local: &'a mut [u8], remote_base: usize) -> Self {
        self.read_ops.push(ReadOp { remote_base, local });
        self
    }

    /// Reads into a typed buffer, filling it completely.
    pub fn read_buffer(self, buffer: &'a mut Buffer, remote_base: usize) -> Self {
        self.read(buffer.as_bytes_mut(), remote_base)
    }

    /// Executes the memory read operations in order, stopping at the first range that can't be read.
    /// A short read counts as a failure; bytes are never zero-filled.
    pub fn apply(self) -> MemEditResult<()> {
        let mem = &self.target.mem;

        for read_op in self.read_ops {
            let len = read_op.local.len();
            mem.read_exact_at(read_op.local, read_op.remote_base as u64)
                .map_err(|source| MemEditError::Access {
                    address: read_op.remote_base,
                    len,
                    source,
                })?;
        }
        Ok(())
    }
}

/// A single memory read operation.
struct ReadOp<'a> {
    // Remote memory location.
    remote_base: usize,
    // Local destination, its length is the size of the read.
    local: &'a mut [u8],
}
