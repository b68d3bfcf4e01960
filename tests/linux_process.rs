//! Attaches to a forked child of the test process and works on its memory.
//!
//! Tracing a direct child is allowed under the default Yama `ptrace_scope` of 1.

#![cfg(target_os = "linux")]


use memedit::{
    search::SearchMode,
    target::{basename, LinuxProcess, Process},
    value::{Buffer, Shape, Value},
    MemEditResult,
};
use nix::sys::signal::Signal;
use std::{thread, time::Duration};
use test_utils::Child;

#[test]
fn write_then_read() -> MemEditResult<()> {
    let slot = Box::new(0x1111u64);
    let address = &*slot as *const u64 as usize;
    let child = Child::spawn();

    LinuxProcess::with_open(child.pid(), |process| {
        assert_eq!(process.read_value::<u64>(address)?, 0x1111);
        process.write_value(address, 0x2222u64)?;
        assert_eq!(process.read_value::<u64>(address)?, 0x2222);

        let mut buffer = Buffer::zeroed(Shape::scalar::<u64>());
        assert_eq!(process.read(address, &mut buffer)?.get::<u64>()?, 0x2222);
        Ok(())
    })?;

    // Only the child's copy changed.
    assert_eq!(*slot, 0x1111);
    child.assert_running();
    Ok(())
}

#[test]
fn writable_regions_cover_the_heap() -> MemEditResult<()> {
    let slot = Box::new([0u8; 64]);
    let address = slot.as_ptr() as usize;
    let child = Child::spawn();

    LinuxProcess::with_open(child.pid(), |process| {
        let all = process.list_regions(false)?;
        let writable = process.list_regions(true)?;

        assert!(writable.iter().all(|region| all.contains(region)));
        assert!(writable.iter().any(|region| region.contains(address)));
        assert!(all.windows(2).all(|pair| pair[0].start < pair[1].start));
        Ok(())
    })
}

#[test]
fn search_all_memory_finds_marker() -> MemEditResult<()> {
    let marker: Box<[u8]> = b"memedit:\xfe\xed:child-marker".to_vec().into();
    let address = marker.as_ptr() as usize;
    let child = Child::spawn();

    let found = LinuxProcess::with_open(child.pid(), |process| {
        process.search_all_memory(&Buffer::raw(&marker), true, SearchMode::Verbatim)
    })?;
    assert!(found.contains(&address));
    child.assert_running();
    Ok(())
}

#[repr(C)]
struct Player {
    health: u32,
    mana: u32,
    speed: f32,
}

#[test]
fn deref_struct_pointer_follows_pointer() -> MemEditResult<()> {
    let player = Box::new(Player {
        health: 100,
        mana: 35,
        speed: 1.5,
    });
    let holder = Box::new(&*player as *const Player as usize);
    let holder_address = &*holder as *const usize as usize;
    let child = Child::spawn();

    let values = LinuxProcess::with_open(child.pid(), |process| {
        process.deref_struct_pointer(
            holder_address,
            &[
                (0, Shape::scalar::<u32>()),
                (8, Shape::scalar::<f32>()),
            ],
        )
    })?;
    assert_eq!(values, vec![Value::U32(100), Value::F32(1.5)]);
    assert_eq!(player.mana, 35);
    Ok(())
}

#[test]
fn search_addresses_narrows_hits() -> MemEditResult<()> {
    let scores = Box::new([40_404_040i32, 40_404_040, 7, 40_404_040]);
    let base = scores.as_ptr() as usize;
    let within = |address: &usize| (base..base + 16).contains(address);
    let child = Child::spawn();

    LinuxProcess::with_open(child.pid(), |process| {
        let first: Vec<usize> = process
            .search_all_memory(&Buffer::from_value(40_404_040i32), true, SearchMode::Structural)?
            .into_iter()
            .filter(within)
            .collect();
        assert_eq!(first, vec![base, base + 4, base + 12]);

        process.write_value(base + 4, 55i32)?;
        process.write_value(base + 8, 55i32)?;
        let narrowed =
            process.search_addresses(&first, &Buffer::from_value(55i32), SearchMode::Verbatim)?;
        assert_eq!(narrowed, vec![base + 4]);
        Ok(())
    })
}

#[test]
fn child_is_found_by_name() -> MemEditResult<()> {
    let child = Child::spawn();

    let path = LinuxProcess::with_open(child.pid(), |process| Ok(process.path()))?
        .expect("No path for child");
    let own_name = std::env::args().next().unwrap();
    assert_eq!(basename(&path), basename(&own_name));

    let pids = LinuxProcess::find_pids_by_name(basename(&path))?;
    assert!(pids.contains(&child.pid()));
    assert!(pids.contains(&std::process::id()));
    Ok(())
}

#[test]
fn reattach_after_close() -> MemEditResult<()> {
    let child = Child::spawn();

    for _ in 0..3 {
        let process = LinuxProcess::open(child.pid())?;
        assert_eq!(process.pid(), child.pid());
        process.close()?;
        child.assert_running();
    }

    // Dropping without an explicit close releases the process as well.
    drop(LinuxProcess::open(child.pid())?);
    child.assert_running();
    Ok(())
}

#[test]
fn signal_sent_while_seized_is_handed_back() -> MemEditResult<()> {
    let child = Child::spawn();

    for _ in 0..5 {
        let process = LinuxProcess::open(child.pid())?;
        // Ignored by default, so the child survives its redelivery.
        child.signal(Signal::SIGWINCH);
        thread::sleep(Duration::from_millis(20));

        assert!(process.close().is_ok());
        child.assert_running();
    }
    Ok(())
}

#[test]
fn target_exiting_while_open_is_released() -> MemEditResult<()> {
    let child = Child::spawn();
    let answer = LinuxProcess::with_open(child.pid(), |_| {
        child.signal(Signal::SIGKILL);
        Ok(42)
    })?;
    assert_eq!(answer, 42);

    let child = Child::spawn();
    let process = LinuxProcess::open(child.pid())?;
    child.signal(Signal::SIGKILL);
    thread::sleep(Duration::from_millis(20));
    drop(process);
    Ok(())
}
