//! Command line front end: `cargo run --example memedit -- --name magic search 2a000000`

use clap::{Parser, Subcommand};
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use memedit::{
    search::SearchMode,
    target::{NativeProcess, Pid, Process},
    value::Buffer,
    MemEditError, MemEditResult,
};

/// Inspect and modify the memory of a running process.
#[derive(Parser)]
struct Cli {
    /// Target process id
    #[arg(short, long, conflicts_with = "name")]
    pid: Option<Pid>,
    /// Target the first process whose executable has this file name
    #[arg(short, long)]
    name: Option<String>,
    /// Log more; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List process ids visible to this user
    Pids,
    #[command(flatten)]
    Edit(Edit),
}

/// Commands which work on the target process.
#[derive(Subcommand)]
enum Edit {
    /// List readable memory regions of the target
    Regions {
        #[arg(long)]
        writable: bool,
    },
    /// Dump `len` bytes at `address`
    Read {
        #[arg(value_parser = parse_address)]
        address: usize,
        len: usize,
    },
    /// Search memory for a hex encoded byte pattern
    Search {
        #[arg(value_parser = parse_hex)]
        pattern: std::vec::Vec<u8>,
        /// Include read-only regions
        #[arg(long)]
        all: bool,
    },
    /// Write hex encoded bytes at `address`
    Write {
        #[arg(value_parser = parse_address)]
        address: usize,
        #[arg(value_parser = parse_hex)]
        bytes: std::vec::Vec<u8>,
    },
}

fn parse_address(s: &str) -> Result<usize, String> {
    let digits = s.trim_start_matches("0x");
    usize::from_str_radix(digits, 16).map_err(|err| format!("{}: {}", s, err))
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    if !s.is_ascii() || s.len() % 2 != 0 {
        return Err(format!("{}: expected pairs of hex digits", s));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|err| format!("{}: {}", s, err)))
        .collect()
}

fn target_pid(cli: &Cli) -> MemEditResult<Pid> {
    if let Some(pid) = cli.pid {
        return Ok(pid);
    }
    let name = cli.name.as_deref().unwrap_or_default();
    NativeProcess::find_pid_by_name(name)?.ok_or_else(|| MemEditError::Enumeration {
        what: "processes".to_string(),
        reason: format!("none named {:?}", name),
    })
}

fn hexdump(base: usize, bytes: &[u8]) {
    for (i, line) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:016x}  {}", base + i * 16, hex.join(" "));
    }
}

fn print_pids() -> MemEditResult<()> {
    for pid in NativeProcess::list_pids()? {
        let path = NativeProcess::executable_path(pid).unwrap_or_default();
        println!("{:>8}  {}", pid, path);
    }
    Ok(())
}

fn edit(process: &NativeProcess, command: &Edit) -> MemEditResult<()> {
    match command {
        Edit::Regions { writable } => {
            for region in process.list_regions(*writable)? {
                println!(
                    "{:016x}-{:016x} {}{}",
                    region.start,
                    region.stop,
                    if region.readable { 'r' } else { '-' },
                    if region.writable { 'w' } else { '-' },
                );
            }
        }
        Edit::Read { address, len } => {
            let mut bytes = vec![0; *len];
            process.read_bytes(*address, &mut bytes)?;
            hexdump(*address, &bytes);
        }
        Edit::Search { pattern, all } => {
            let needle = Buffer::raw(pattern);
            for address in process.search_all_memory(&needle, !all, SearchMode::Verbatim)? {
                println!("{:016x}", address);
            }
        }
        Edit::Write { address, bytes } => {
            process.write_bytes(*address, bytes)?;
            println!("Wrote {} bytes at {:#x}", bytes.len(), address);
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> MemEditResult<()> {
    match &cli.command {
        Command::Pids => print_pids(),
        Command::Edit(command) => {
            let pid = target_pid(cli)?;
            NativeProcess::with_open(pid, |process| edit(process, command))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(err) = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
    {
        eprintln!("Failed to set up logging: {}", err);
        std::process::exit(1);
    }

    if cli.pid.is_none() && cli.name.is_none() && matches!(cli.command, Command::Edit(_)) {
        eprintln!("Either --pid or --name is required");
        std::process::exit(2);
    }

    if let Err(err) = run(&cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
