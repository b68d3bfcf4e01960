use std::os::unix::fs::FileExt;

use super::LinuxProcess;
use crate::value::Buffer;
use crate::{MemEditError, MemEditResult};

/// Allows to write data to different locations in the target's memory as a single operation.
///
/// Writes go through `/proc/<pid>/mem`, which also succeeds on pages mapped read-only.
pub struct WriteMemory<'a> {
    target: &'a LinuxProcess,
    write_ops: Vec<WriteOp<'a>>,
}

impl<'a> WriteMemory<'a> {
    pub(in crate::target) fn new(target: &'a LinuxProcess) -> Self {
        WriteMemory {
            target,
            write_ops: Vec::new(),
        }
    }

    pub fn write(mut self, source: &'a [u8], remote_base: usize) -> Self {
        self.write_ops.push(WriteOp {
            remote_base,
            source,
        });
        self
    }

    pub fn write_buffer(self, buffer: &'a Buffer, remote_base: usize) -> Self {
        self.write(buffer.as_bytes(), remote_base)
    }

    /// Executes the memory write operations in order, stopping at the first range that can't be written.
    pub fn apply(self) -> MemEditResult<()> {
        let mem = &self.target.mem;

        for write_op in self.write_ops {
            mem.write_all_at(write_op.source, write_op.remote_base as u64)
                .map_err(|source| MemEditError::Access {
                    address: write_op.remote_base,
                    len: write_op.source.len(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// A single memory write operation.
struct WriteOp<'a> {
    // Remote destination location.
    remote_base: usize,
    source: &'a [u8],
}
