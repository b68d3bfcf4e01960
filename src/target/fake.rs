//! In-memory processes for exercising the provided `Process` methods without OS privileges.

use std::{cell::RefCell, collections::BTreeMap, io};

use super::{MemoryRegion, Pid, Process};
use crate::{CloseStep, MemEditError, MemEditResult};

pub(crate) struct Segment {
    pub start: usize,
    pub bytes: Vec<u8>,
    pub writable: bool,
    /// Listed by `list_regions`, but unmapped by the time anyone reads it.
    pub vanished: bool,
}

struct Image {
    path: Option<String>,
    segments: Vec<Segment>,
}

#[derive(Default)]
struct World {
    next_pid: Pid,
    images: BTreeMap<Pid, Image>,
    opens: usize,
    closes: usize,
    fail_next_close: bool,
}

thread_local! {
    static WORLD: RefCell<World> = RefCell::new(World { next_pid: 100, ..World::default() });
}

pub(crate) fn segment(start: usize, len: usize, writable: bool) -> Segment {
    Segment {
        start,
        bytes: vec![0; len],
        writable,
        vanished: false,
    }
}

pub(crate) fn spawn(segments: Vec<Segment>) -> Pid {
    add_image(None, segments)
}

pub(crate) fn spawn_named(path: &str, segments: Vec<Segment>) -> Pid {
    add_image(Some(path.to_string()), segments)
}

fn add_image(path: Option<String>, segments: Vec<Segment>) -> Pid {
    WORLD.with(|world| {
        let mut world = world.borrow_mut();
        let pid = world.next_pid;
        world.next_pid += 1;
        world.images.insert(pid, Image { path, segments });
        pid
    })
}

/// `(successful opens, closes)` so far on this thread.
pub(crate) fn counts() -> (usize, usize) {
    WORLD.with(|world| {
        let world = world.borrow();
        (world.opens, world.closes)
    })
}

pub(crate) fn fail_next_close() {
    WORLD.with(|world| world.borrow_mut().fail_next_close = true);
}

pub(crate) struct FakeProcess {
    pid: Pid,
    live: bool,
}

impl FakeProcess {
    fn with_segment<R>(
        &self,
        address: usize,
        len: usize,
        f: impl FnOnce(&mut Segment, usize) -> R,
    ) -> MemEditResult<R> {
        WORLD.with(|world| {
            let mut world = world.borrow_mut();
            let image = world
                .images
                .get_mut(&self.pid)
                .ok_or_else(|| access_error(address, len))?;

            let segment = image
                .segments
                .iter_mut()
                .find(|segment| {
                    !segment.vanished
                        && segment.start <= address
                        && address + len <= segment.start + segment.bytes.len()
                })
                .ok_or_else(|| access_error(address, len))?;

            let offset = address - segment.start;
            Ok(f(segment, offset))
        })
    }

    fn release(&mut self) -> MemEditResult<()> {
        self.live = false;
        WORLD.with(|world| {
            let mut world = world.borrow_mut();
            world.closes += 1;
            if world.fail_next_close {
                world.fail_next_close = false;
                return Err(MemEditError::Close {
                    pid: self.pid,
                    step: CloseStep::Detach,
                    source: io::Error::new(io::ErrorKind::Other, "injected close failure"),
                });
            }
            Ok(())
        })
    }
}

fn access_error(address: usize, len: usize) -> MemEditError {
    MemEditError::Access {
        address,
        len,
        source: io::Error::from(io::ErrorKind::InvalidInput),
    }
}

impl Process for FakeProcess {
    fn open(pid: Pid) -> MemEditResult<Self> {
        WORLD.with(|world| {
            let mut world = world.borrow_mut();
            if !world.images.contains_key(&pid) {
                return Err(MemEditError::Attach {
                    pid,
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }
            world.opens += 1;
            Ok(FakeProcess { pid, live: true })
        })
    }

    fn close(mut self) -> MemEditResult<()> {
        self.release()
    }

    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_bytes(&self, address: usize, buf: &mut [u8]) -> MemEditResult<()> {
        self.with_segment(address, buf.len(), |segment, offset| {
            buf.copy_from_slice(&segment.bytes[offset..offset + buf.len()])
        })
    }

    fn write_bytes(&self, address: usize, bytes: &[u8]) -> MemEditResult<()> {
        self.with_segment(address, bytes.len(), |segment, offset| {
            segment.bytes[offset..offset + bytes.len()].copy_from_slice(bytes)
        })
    }

    fn list_regions(&self, writable_only: bool) -> MemEditResult<Vec<MemoryRegion>> {
        WORLD.with(|world| {
            let world = world.borrow();
            Ok(world.images[&self.pid]
                .segments
                .iter()
                .map(|segment| MemoryRegion {
                    start: segment.start,
                    stop: segment.start + segment.bytes.len(),
                    readable: true,
                    writable: segment.writable,
                })
                .filter(|region| region.is_listed(writable_only))
                .collect())
        })
    }

    fn path(&self) -> Option<String> {
        Self::executable_path(self.pid)
    }

    fn list_pids() -> MemEditResult<Vec<Pid>> {
        WORLD.with(|world| Ok(world.borrow().images.keys().copied().collect()))
    }

    fn executable_path(pid: Pid) -> Option<String> {
        WORLD.with(|world| {
            world
                .borrow()
                .images
                .get(&pid)
                .and_then(|image| image.path.clone())
        })
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        if self.live {
            if let Err(err) = self.release() {
                super::release_failed(err);
            }
        }
    }
}
