mod layout;

use log::debug;
use std::{io, mem, ptr};
use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPCVOID, LPVOID};
use winapi::um::handleapi::CloseHandle;
use winapi::um::memoryapi::{ReadProcessMemory, VirtualQueryEx, WriteProcessMemory};
use winapi::um::processthreadsapi::OpenProcess;
use winapi::um::psapi::{EnumProcesses, GetProcessImageFileNameA};
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
use winapi::um::winnt;

use self::layout::{MemoryBasicInformation, RegionInfo};
use super::{MemoryRegion, Pid, Process};
use crate::{CloseStep, MemEditError, MemEditResult};

/// Query, read, write and VM operations; nothing else is requested.
const PROCESS_RW: DWORD = winnt::PROCESS_QUERY_INFORMATION
    | winnt::PROCESS_VM_OPERATION
    | winnt::PROCESS_VM_READ
    | winnt::PROCESS_VM_WRITE;

/// `EnumProcesses` can't report how many processes exist, so start here and double.
const INITIAL_PID_CAPACITY: usize = 100;

const MAX_PATH_LEN: usize = 260;

lazy_static::lazy_static! {
    /// `(lpMinimumApplicationAddress, lpMaximumApplicationAddress)` from system configuration.
    static ref APPLICATION_RANGE: (usize, usize) = unsafe {
        let mut sys_info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut sys_info);
        (
            sys_info.lpMinimumApplicationAddress as usize,
            sys_info.lpMaximumApplicationAddress as usize,
        )
    };
}

/// This structure holds an open process handle on Windows.
pub struct WindowsProcess {
    pid: Pid,
    process_handle: winnt::HANDLE,
}

// The handle is an opaque kernel object reference, usable from any thread.
unsafe impl Send for WindowsProcess {}

impl WindowsProcess {
    /// Queries the region starting at or before `address`.
    fn query(&self, address: usize) -> MemEditResult<MemoryBasicInformation> {
        let mut mbi = MemoryBasicInformation::default();
        let mbi_size = mem::size_of::<MemoryBasicInformation>();

        let written = unsafe {
            VirtualQueryEx(
                self.process_handle,
                address as LPCVOID,
                &mut mbi as *mut MemoryBasicInformation as winnt::PMEMORY_BASIC_INFORMATION,
                mbi_size,
            )
        };

        if written != mbi_size {
            let reason = if written == 0 {
                io::Error::last_os_error().to_string()
            } else {
                format!("VirtualQueryEx output too short ({} bytes)", written)
            };
            return Err(MemEditError::Enumeration {
                what: format!("memory regions of pid {} at {:#x}", self.pid, address),
                reason,
            });
        }
        Ok(mbi)
    }

    fn release(&mut self) -> MemEditResult<()> {
        let handle = mem::replace(&mut self.process_handle, ptr::null_mut());
        if handle.is_null() {
            return Ok(());
        }

        if unsafe { CloseHandle(handle) } == FALSE {
            return Err(MemEditError::Close {
                pid: self.pid,
                step: CloseStep::ReleaseHandle,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Process for WindowsProcess {
    fn open(pid: Pid) -> MemEditResult<Self> {
        let process_handle = unsafe { OpenProcess(PROCESS_RW, FALSE, pid) };
        if process_handle.is_null() {
            return Err(MemEditError::Attach {
                pid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(WindowsProcess {
            pid,
            process_handle,
        })
    }

    fn close(mut self) -> MemEditResult<()> {
        self.release()
    }

    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_bytes(&self, address: usize, buf: &mut [u8]) -> MemEditResult<()> {
        let mut bytes_read: usize = 0;
        let ok = unsafe {
            ReadProcessMemory(
                self.process_handle,
                address as LPCVOID,
                buf.as_mut_ptr() as LPVOID,
                buf.len(),
                &mut bytes_read,
            )
        };

        check_transfer(ok, bytes_read, buf.len()).map_err(|source| MemEditError::Access {
            address,
            len: buf.len(),
            source,
        })
    }

    fn write_bytes(&self, address: usize, bytes: &[u8]) -> MemEditResult<()> {
        let mut bytes_written: usize = 0;
        let ok = unsafe {
            WriteProcessMemory(
                self.process_handle,
                address as LPVOID,
                bytes.as_ptr() as LPCVOID,
                bytes.len(),
                &mut bytes_written,
            )
        };

        check_transfer(ok, bytes_written, bytes.len()).map_err(|source| MemEditError::Access {
            address,
            len: bytes.len(),
            source,
        })
    }

    /// Walks the application address range one `VirtualQueryEx` region at a time,
    /// keeping committed private memory only.
    fn list_regions(&self, writable_only: bool) -> MemEditResult<Vec<MemoryRegion>> {
        let (start, stop) = *APPLICATION_RANGE;
        let mut regions = Vec::new();

        let mut page_ptr = start;
        while page_ptr < stop {
            let page_info = self.query(page_ptr)?;
            let size = page_info.region_size();
            if size == 0 {
                return Err(MemEditError::Enumeration {
                    what: format!("memory regions of pid {}", self.pid),
                    reason: format!("empty region reported at {:#x}", page_ptr),
                });
            }

            if let Some((readable, writable)) = page_info.access() {
                let region = MemoryRegion {
                    start: page_ptr,
                    stop: page_ptr + size,
                    readable,
                    writable,
                };
                if region.is_listed(writable_only) {
                    regions.push(region);
                }
            }

            page_ptr = match page_ptr.checked_add(size) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(regions)
    }

    fn path(&self) -> Option<String> {
        let mut name_buffer = [0u8; MAX_PATH_LEN];
        let len = unsafe {
            GetProcessImageFileNameA(
                self.process_handle,
                name_buffer.as_mut_ptr() as winnt::LPSTR,
                MAX_PATH_LEN as DWORD,
            )
        };

        if len == 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&name_buffer[..len as usize]).into_owned())
    }

    fn list_pids() -> MemEditResult<Vec<Pid>> {
        let mut capacity = INITIAL_PID_CAPACITY;

        loop {
            let mut pids: Vec<DWORD> = vec![0; capacity];
            let mut returned_size: DWORD = 0;

            let ok = unsafe {
                EnumProcesses(
                    pids.as_mut_ptr(),
                    (capacity * mem::size_of::<DWORD>()) as DWORD,
                    &mut returned_size,
                )
            };
            if ok == FALSE {
                return Err(MemEditError::Enumeration {
                    what: format!("processes (capacity {})", capacity),
                    reason: io::Error::last_os_error().to_string(),
                });
            }

            let returned = returned_size as usize / mem::size_of::<DWORD>();
            if returned < capacity {
                pids.truncate(returned);
                return Ok(pids);
            }

            // A full buffer may have been truncated.
            capacity *= 2;
        }
    }

    fn executable_path(pid: Pid) -> Option<String> {
        match Self::with_open(pid, |process| Ok(process.path())) {
            Ok(path) => path,
            Err(err) => {
                debug!("{}", err);
                None
            }
        }
    }
}

/// Outcome of `ReadProcessMemory`/`WriteProcessMemory`. A partial transfer succeeds at the
/// API level, so it gets its own error rather than whatever `GetLastError` still holds.
fn check_transfer(ok: BOOL, transferred: usize, wanted: usize) -> io::Result<()> {
    if ok == FALSE {
        return Err(io::Error::last_os_error());
    }
    if transferred != wanted {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("transferred {} of {} bytes", transferred, wanted),
        ));
    }
    Ok(())
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            super::release_failed(err);
        }
    }
}
