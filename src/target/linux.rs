mod readmem;
mod writemem;

pub use readmem::ReadMemory;
pub use writemem::WriteMemory;

use log::debug;
use nix::{
    errno::Errno,
    sys::{
        ptrace,
        signal::{self, Signal},
        wait::{waitpid, WaitStatus},
    },
    unistd::{getpid, Pid},
};
use std::{
    convert::TryFrom,
    fs::{self, File, OpenOptions},
    io,
};

use super::{MemoryRegion, Process};
use crate::{CloseStep, MemEditError, MemEditResult};

/// This structure holds a process attached on Linux.
/// The process is seized with `ptrace(2)` but keeps running; memory goes through `/proc/<pid>/mem`.
pub struct LinuxProcess {
    pid: Pid,
    mem: File,
    seized: bool,
}

impl LinuxProcess {
    /// Uses this process as the target. Nothing is seized, so closing it is a no-op.
    pub fn me() -> MemEditResult<LinuxProcess> {
        let pid = getpid();
        let mem = open_mem(pid).map_err(|source| MemEditError::Attach {
            pid: pid.as_raw() as u32,
            source,
        })?;
        Ok(LinuxProcess {
            pid,
            mem,
            seized: false,
        })
    }

    /// Reads memory from several locations as a single operation.
    pub fn read_memory(&self) -> ReadMemory<'_> {
        ReadMemory::new(self)
    }

    /// Writes memory to several locations as a single operation.
    pub fn write_memory(&self) -> WriteMemory<'_> {
        WriteMemory::new(self)
    }

    /// Stop, wait, detach, continue. Every step must succeed, or the target may be left stopped.
    /// A target which has exited in the meantime counts as released.
    fn release(&mut self) -> MemEditResult<()> {
        if !self.seized {
            return Ok(());
        }
        self.seized = false;

        let pid = self.pid;
        let failed = |step, source| MemEditError::Close {
            pid: pid.as_raw() as u32,
            step,
            source,
        };

        debug!("kill({}, SIGSTOP)", pid);
        match signal::kill(pid, Signal::SIGSTOP) {
            Err(Errno::ESRCH) => return gone(pid),
            Err(errno) => return Err(failed(CloseStep::Stop, os_error(errno))),
            Ok(()) => {}
        }

        // A signal which arrived while seized is handed back on detach.
        let pending = match waitpid(pid, None) {
            Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) | Ok(WaitStatus::PtraceEvent(..)) => None,
            Ok(WaitStatus::Stopped(_, sig)) => Some(sig),
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return gone(pid),
            Ok(status) => {
                return Err(failed(
                    CloseStep::Wait,
                    io::Error::new(
                        io::ErrorKind::Other,
                        format!("unexpected wait status {:?}", status),
                    ),
                ))
            }
            Err(errno) => return Err(failed(CloseStep::Wait, os_error(errno))),
        };

        debug!("ptrace(PTRACE_DETACH, {}, {:?})", pid, pending);
        match ptrace::detach(pid, pending) {
            Err(Errno::ESRCH) => return gone(pid),
            Err(errno) => return Err(failed(CloseStep::Detach, os_error(errno))),
            Ok(()) => {}
        }

        debug!("kill({}, SIGCONT)", pid);
        match signal::kill(pid, Signal::SIGCONT) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => return Err(failed(CloseStep::Continue, os_error(errno))),
        }

        Ok(())
    }
}

impl Process for LinuxProcess {
    /// Seizes the process. Unlike `PTRACE_ATTACH`, this does not stop it.
    fn open(pid: super::Pid) -> MemEditResult<Self> {
        let attach_failed = |source| MemEditError::Attach { pid, source };

        let raw = i32::try_from(pid)
            .map_err(|_| attach_failed(io::Error::from(io::ErrorKind::InvalidInput)))?;
        let nix_pid = Pid::from_raw(raw);

        let mem = open_mem(nix_pid).map_err(attach_failed)?;

        debug!("ptrace(PTRACE_SEIZE, {})", pid);
        ptrace::seize(nix_pid, ptrace::Options::empty())
            .map_err(|errno| attach_failed(os_error(errno)))?;

        Ok(LinuxProcess {
            pid: nix_pid,
            mem,
            seized: true,
        })
    }

    fn close(mut self) -> MemEditResult<()> {
        self.release()
    }

    fn pid(&self) -> super::Pid {
        self.pid.as_raw() as u32
    }

    fn read_bytes(&self, address: usize, buf: &mut [u8]) -> MemEditResult<()> {
        self.read_memory().read(buf, address).apply()
    }

    fn write_bytes(&self, address: usize, bytes: &[u8]) -> MemEditResult<()> {
        self.write_memory().write(bytes, address).apply()
    }

    fn list_regions(&self, writable_only: bool) -> MemEditResult<Vec<MemoryRegion>> {
        let maps = procfs::process::Process::new(self.pid.as_raw())
            .and_then(|process| process.maps())
            .map_err(|err| MemEditError::Enumeration {
                what: format!("memory maps of pid {}", self.pid),
                reason: err.to_string(),
            })?;

        Ok(maps
            .into_iter()
            .map(|map| {
                let (readable, writable) = parse_permissions(&map.perms);
                MemoryRegion {
                    start: map.address.0 as usize,
                    stop: map.address.1 as usize,
                    readable,
                    writable,
                }
            })
            .filter(|region| region.is_listed(writable_only))
            .collect())
    }

    fn path(&self) -> Option<String> {
        Self::executable_path(self.pid())
    }

    fn list_pids() -> MemEditResult<Vec<super::Pid>> {
        let entries = fs::read_dir("/proc").map_err(|err| MemEditError::Enumeration {
            what: "processes".to_string(),
            reason: err.to_string(),
        })?;

        let mut pids: Vec<super::Pid> = entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// First NUL-separated token of `/proc/<pid>/cmdline`.
    fn executable_path(pid: super::Pid) -> Option<String> {
        let cmdline = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
        let argv0 = cmdline.split(|&b| b == 0).next()?;
        if argv0.is_empty() {
            // Kernel threads and zombies have an empty command line.
            return None;
        }
        Some(String::from_utf8_lossy(argv0).into_owned())
    }
}

impl Drop for LinuxProcess {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            super::release_failed(err);
        }
    }
}

fn open_mem(pid: Pid) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(format!("/proc/{}/mem", pid))
}

/// A target which exited while seized can't be left stopped, so its release is complete.
fn gone(pid: Pid) -> MemEditResult<()> {
    debug!("Process {} exited before it was released", pid);
    Ok(())
}

fn os_error(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// `(readable, writable)` from a `/proc/<pid>/maps` permission column such as `rw-p`.
fn parse_permissions(perms: &str) -> (bool, bool) {
    let mut flags = perms.chars();
    (flags.next() == Some('r'), flags.next() == Some('w'))
}
