use log::{debug, error, info, warn};
use std::io;

use crate::search::{self, RegionScan, SearchMode};
use crate::value::{Buffer, Scalar, Shape, Value};
use crate::{MemEditError, MemEditResult};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use windows::*;

#[cfg(test)]
pub(crate) mod fake;

/// Operating system process id.
pub type Pid = u32;

/// The backend for the platform this crate was built for.
#[cfg(target_os = "linux")]
pub type NativeProcess = LinuxProcess;
/// The backend for the platform this crate was built for.
#[cfg(target_os = "windows")]
pub type NativeProcess = WindowsProcess;

/// A contiguous range of a process's address space, as seen at enumeration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    /// First address of the region.
    pub start: usize,
    /// One past the last address of the region.
    pub stop: usize,
    pub readable: bool,
    pub writable: bool,
}

impl MemoryRegion {
    pub fn len(&self) -> usize {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    pub fn contains(&self, address: usize) -> bool {
        self.start <= address && address < self.stop
    }

    /// Whether `list_regions(writable_only)` reports this region.
    pub fn is_listed(&self, writable_only: bool) -> bool {
        self.readable && (self.writable || !writable_only)
    }
}

/// File name component of an executable path, accepting both `/` and `\` separators.
pub fn basename(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path)
}

/// The operations every platform backend offers on an attached process.
///
/// A value implementing this trait is a live binding to exactly one process.
/// `close` consumes it; dropping a live value must release it as well, so that
/// an early return or a panic never leaves the target attached.
pub trait Process: Sized {
    /// Attaches to the process `pid`.
    fn open(pid: Pid) -> MemEditResult<Self>;

    /// Releases the process, restoring it to the state it was in before `open`.
    fn close(self) -> MemEditResult<()>;

    /// Provides the pid of the attached process.
    fn pid(&self) -> Pid;

    /// Fills `buf` with the bytes at `address`. Partial reads are errors.
    fn read_bytes(&self, address: usize, buf: &mut [u8]) -> MemEditResult<()>;

    /// Writes all of `bytes` at `address`.
    fn write_bytes(&self, address: usize, bytes: &[u8]) -> MemEditResult<()>;

    /// Snapshot of the readable regions of the address space, in address order.
    /// With `writable_only`, regions which can't be written are left out.
    fn list_regions(&self, writable_only: bool) -> MemEditResult<Vec<MemoryRegion>>;

    /// Path of the executable which was run to start this process, if it can be found.
    fn path(&self) -> Option<String>;

    /// All process ids visible to the caller.
    fn list_pids() -> MemEditResult<Vec<Pid>>;

    /// Executable path of an arbitrary process, used by the name lookups.
    fn executable_path(pid: Pid) -> Option<String>;

    /// Opens `pid`, runs `f` and closes the process again, whatever `f` returns.
    ///
    /// A failure to close is reported in preference to an error from `f`,
    /// since it may leave the target stopped.
    fn with_open<R, F>(pid: Pid, f: F) -> MemEditResult<R>
    where
        F: FnOnce(&Self) -> MemEditResult<R>,
    {
        let process = Self::open(pid)?;
        let result = f(&process);

        match process.close() {
            Ok(()) => result,
            Err(close_err) => {
                if let Err(err) = result {
                    error!("pid {}: error discarded because close failed: {}", pid, err);
                }
                Err(close_err)
            }
        }
    }

    /// Reads `buffer.len()` bytes at `address` into `buffer` and hands the buffer back.
    fn read<'b>(&self, address: usize, buffer: &'b mut Buffer) -> MemEditResult<&'b mut Buffer> {
        self.read_bytes(address, buffer.as_bytes_mut())?;
        Ok(buffer)
    }

    /// Writes the contents of `buffer` at `address`.
    fn write(&self, address: usize, buffer: &Buffer) -> MemEditResult<()> {
        self.write_bytes(address, buffer.as_bytes())
    }

    /// Writes `size` bytes starting at `source` to `address`.
    ///
    /// # Safety
    ///
    /// `source` must be valid for reads of `size` bytes for the duration of the call.
    unsafe fn write_pointer(&self, address: usize, source: *const u8, size: usize) -> MemEditResult<()> {
        let bytes = std::slice::from_raw_parts(source, size);
        self.write_bytes(address, bytes)
    }

    fn read_value<T: Scalar>(&self, address: usize) -> MemEditResult<T> {
        let mut buf = vec![0; T::KIND.size()];
        self.read_bytes(address, &mut buf)?;
        Ok(T::from_bytes(&buf))
    }

    fn write_value<T: Scalar>(&self, address: usize, value: T) -> MemEditResult<()> {
        self.write_bytes(address, &value.to_bytes())
    }

    /// Reads the pointer stored at `base_address`, then every `(offset, shape)` field
    /// relative to the address it points to.
    fn deref_struct_pointer(
        &self,
        base_address: usize,
        fields: &[(usize, Shape)],
    ) -> MemEditResult<Vec<Value>> {
        let base: usize = self.read_value(base_address)?;

        fields
            .iter()
            .map(|(offset, shape)| {
                let mut buffer = Buffer::zeroed(shape.clone());
                // The pointer comes from the target and may be garbage.
                let address = base.checked_add(*offset).ok_or_else(|| MemEditError::Access {
                    address: base,
                    len: buffer.len(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("offset {:#x} overflows the address space", offset),
                    ),
                })?;
                self.read(address, &mut buffer)?;
                Ok(buffer.value())
            })
            .collect()
    }

    /// Re-reads each of `addresses` and keeps those which currently hold `needle`.
    fn search_addresses(
        &self,
        addresses: &[usize],
        needle: &Buffer,
        mode: SearchMode,
    ) -> MemEditResult<Vec<usize>> {
        let mut candidate = vec![0; needle.len()];
        let mut found = Vec::new();

        for &address in addresses {
            self.read_bytes(address, &mut candidate)?;
            if search::matches(needle, &candidate, mode) {
                found.push(address);
            }
        }
        Ok(found)
    }

    /// Searches each listed region, recording regions which could not be read instead of failing.
    fn scan_regions(
        &self,
        needle: &Buffer,
        writable_only: bool,
        mode: SearchMode,
    ) -> MemEditResult<Vec<RegionScan>> {
        let regions = self.list_regions(writable_only)?;
        let mut scans = Vec::with_capacity(regions.len());

        for region in regions {
            let mut contents = vec![0; region.len()];
            let scan = match self.read_bytes(region.start, &mut contents) {
                Ok(()) => RegionScan::Scanned {
                    region,
                    hits: search::search(needle, &contents, mode)
                        .into_iter()
                        .map(|offset| region.start + offset)
                        .collect(),
                },
                Err(error) => {
                    warn!(
                        "Failed to read region {:#x}-{:#x}: {}",
                        region.start, region.stop, error
                    );
                    RegionScan::Skipped { region, error }
                }
            };
            scans.push(scan);
        }
        Ok(scans)
    }

    /// Searches the whole address space for `needle` and returns the absolute addresses of all hits.
    fn search_all_memory(
        &self,
        needle: &Buffer,
        writable_only: bool,
        mode: SearchMode,
    ) -> MemEditResult<Vec<usize>> {
        Ok(self
            .scan_regions(needle, writable_only, mode)?
            .iter()
            .flat_map(|scan| scan.hits().iter().copied())
            .collect())
    }

    /// Returns some process whose executable is named `name`.
    ///
    /// This is a convenience only: nothing guarantees the match is unique or is the process you mean.
    fn find_pid_by_name(name: &str) -> MemEditResult<Option<Pid>> {
        for pid in Self::list_pids()? {
            if name_matches::<Self>(pid, name) {
                return Ok(Some(pid));
            }
        }

        info!("Found no process with name {}", name);
        Ok(None)
    }

    /// Returns every process whose executable is named `name`.
    fn find_pids_by_name(name: &str) -> MemEditResult<Vec<Pid>> {
        Ok(Self::list_pids()?
            .into_iter()
            .filter(|&pid| name_matches::<Self>(pid, name))
            .collect())
    }
}

fn name_matches<P: Process>(pid: Pid, name: &str) -> bool {
    debug!("Checking name for pid {}", pid);
    match P::executable_path(pid) {
        Some(path) => {
            debug!("Name was {:?}", basename(&path));
            basename(&path) == name
        }
        None => false,
    }
}

/// Escalates a failure to release a process from a `Drop` impl.
///
/// Panicking while already unwinding would abort, so in that case the failure is only logged.
pub(crate) fn release_failed(err: MemEditError) {
    if std::thread::panicking() {
        error!("{}", err);
    } else {
        panic!("{}", err);
    }
}
