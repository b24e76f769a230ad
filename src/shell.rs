//! The command shell: a prompt loop over the keyboard line buffer.

use alloc::vec::Vec;
use core::fmt::Write;

use log::info;

use crate::{fs, keyboard, mm, tasks, vga, x86};

const PROMPT: &str = "> ";

type CommandFn = fn(&str);

const COMMANDS: &[(&str, CommandFn)] = &[
    ("end", cmd_end),
    ("page", cmd_page),
    ("echo", cmd_echo),
    ("ls", cmd_ls),
    ("help", cmd_help),
    ("debug_command", cmd_debug),
    ("run", cmd_run),
];

/// Runs the shell forever on the boot task.
pub fn run() -> ! {
    vga::print("Welcome to vanadium!\n");
    vga::print(PROMPT);
    loop {
        if let Some(line) = keyboard::poll_line() {
            dispatch(&line);
            vga::print(PROMPT);
        }
        x86::halt();
    }
}

fn dispatch(line: &str) {
    let mut parts = line.trim().splitn(2, ' ');
    let Some(verb) = parts.next().filter(|v| !v.is_empty()) else {
        return;
    };
    let args = parts.next().unwrap_or("").trim();

    match COMMANDS.iter().find(|(name, _)| *name == verb) {
        Some((_, command)) => command(args),
        None => {
            vga::print("unknown command: ");
            vga::print(verb);
            vga::print("\n");
        }
    }
}

fn cmd_end(_args: &str) {
    vga::print("Stopping the CPU. Bye!\n");
    x86::halt_forever();
}

// Allocation probe: grab a block and show where it landed.
fn cmd_page(_args: &str) {
    let probe: Vec<u8> = Vec::with_capacity(1000);
    vga::with_screen(|screen| {
        let _ = writeln!(screen, "Page: {:#010x}", probe.as_ptr() as usize);
    });
}

fn cmd_echo(args: &str) {
    vga::print(args);
    vga::print("\n");
}

// Catalog listing, sentinel skipped.
fn cmd_ls(_args: &str) {
    fs::with_entries(|entries| {
        vga::with_screen(|screen| {
            for entry in entries.iter().skip(1) {
                let _ = writeln!(
                    screen,
                    "{:<32} {:>4} sectors @ {}",
                    entry.name_str(),
                    entry.length,
                    entry.lba
                );
            }
        });
    });
}

fn cmd_help(_args: &str) {
    for (name, _) in COMMANDS {
        vga::print(name);
        vga::print("\n");
    }
}

fn cmd_debug(_args: &str) {
    let stats = mm::heap_stats();
    vga::with_screen(|screen| {
        let _ = writeln!(
            screen,
            "heap: {} used, {} free, {} fresh, top {:#010x}",
            stats.used, stats.free, stats.fresh, stats.top
        );
        let _ = writeln!(screen, "tasks: {}", tasks::task_count());
    });
}

// Loads a named blob from the catalog into the heap and schedules it as a
// kernel-space task. The blob is trusted flat machine code.
fn cmd_run(args: &str) {
    if args.is_empty() {
        vga::print("usage: run <name>\n");
        return;
    }

    let Some(program) = fs::read_file(args) else {
        vga::print("Program not found.\n");
        return;
    };

    let code: &'static [u8] = alloc::boxed::Box::leak(program.into_boxed_slice());
    let entry = code.as_ptr() as u32;
    match tasks::start_kernel_task(entry) {
        Ok(pid) => info!("started {args:?} as task {pid}"),
        Err(_) => vga::print("task table full\n"),
    }
}
