/*!
 * vmproc Kernel - Main Entry Point
 *
 * Boots a kernel on the in-memory filesystem and swap device, runs
 * `echo a bb` and prints the memory statistics.
 */

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::info;

use vmproc_kernel::monitoring::OperationSpan;
use vmproc_kernel::process::KernelStats;
use vmproc_kernel::{
    init_tracing, ElfBuilder, KernelConfig, KernelResult, MemFS, ProcessManager, ProgramTable,
    ROOT_PID,
};

const ECHO_ENTRY: usize = 0x40_1000;

fn main() -> Result<()> {
    init_tracing();

    let stats = match run() {
        Ok(stats) => stats,
        Err(e) => {
            // Full diagnostic with code and help
            eprintln!("{:?}", miette::Report::new(e));
            bail!("kernel demo failed");
        }
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run() -> KernelResult<KernelStats> {
    let config = KernelConfig::from_env()?;
    info!(
        frames = config.vm.frame_count,
        swap_slots = config.vm.swap_slots,
        eviction = ?config.vm.eviction,
        load = ?config.vm.load_strategy,
        "vmproc kernel starting"
    );

    let fs = Arc::new(MemFS::new());
    let image = ElfBuilder::new(ECHO_ENTRY)
        .text(ECHO_ENTRY, vec![0xC3; 64])
        .bss(0x60_0000, 0x1000)
        .build();
    fs.create("echo", image)?;

    let programs = ProgramTable::new();
    programs.register(ECHO_ENTRY, |ctx| {
        let args = ctx.args()?;
        let words: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
        let line = format!("{}\n", words.join(" "));
        let addr = ctx.push(line.as_bytes())?;
        ctx.write_fd(1, addr, line.len())?;
        Ok(ctx.exit(0))
    });

    let manager = ProcessManager::builder()
        .with_config(config)
        .with_filesystem(fs)
        .with_programs(programs)
        .build();

    let span = OperationSpan::new("echo", ROOT_PID);
    let pid = match manager.spawn("echo a bb") {
        Ok(pid) => pid,
        Err(e) => {
            span.fail(&e);
            return Err(e.into());
        }
    };
    let status = manager.wait(ROOT_PID, pid)?;
    span.finish(status);

    print!("{}", manager.console_output());
    info!(pid, status, "echo finished");
    Ok(manager.stats())
}
