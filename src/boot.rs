//! Top-level wiring from parsed `Config` to a finished guest process: mounts
//! the rootfs, loads the main ELF (plus dynamic linker, if any) or restores
//! a checkpoint, spawns the I/O thread, and drives the dispatch loop to
//! completion.

use crate::arena::{Arena, STACK_TOP};
use crate::bridge::{Bridge, POLL_INTERVAL};
use crate::checkpoint;
use crate::config::Config;
use crate::context::{fd_ranges, ExecuteContext, FdKind, Scheduler};
use crate::dispatch::{Dispatch, ExitReason};
use crate::elf;
use crate::jit::JitManager;
use crate::vfs::{tar, Vfs};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Runs one guest process to completion and returns the host process exit
/// code: the guest's `exit_group` code (0-127), or `128+signal` on a fatal
/// host-detected fault (SPEC_FULL.md §6.J).
pub fn run(config: Config) -> Result<i32> {
    let rootfs_bytes =
        std::fs::read(&config.rootfs).with_context(|| format!("reading rootfs {}", config.rootfs.display()))?;
    let mut vfs = Vfs::new();
    tar::load_rootfs(&mut vfs, &rootfs_bytes).context("loading rootfs into VFS")?;

    let arena = Arena::new();
    let bridge = Arc::new(Bridge::new());
    let mut dispatch = Dispatch::new(arena.clone());

    let mut env: Vec<String> = config.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    if !env.iter().any(|e| e.starts_with("PATH=")) {
        env.push("PATH=/usr/bin:/bin".to_string());
    }

    let mut ctx = if let Some(checkpoint_path) = &config.checkpoint_in {
        info!(path = %checkpoint_path.display(), "resuming from checkpoint");
        let data = checkpoint::read_file(checkpoint_path)?;
        let restored = checkpoint::load(&data, &arena, &dispatch.regs)?;
        let mut ctx = ExecuteContext::with_bridge(
            restored.tasks.first().map(|t| t.pc).unwrap_or(0),
            restored.brk_base,
            restored.argv,
            restored.envp,
            restored.exec_path,
            Arc::clone(&bridge),
        );
        ctx.brk_current = restored.brk_current;
        ctx.mmap_cursor = restored.mmap_cursor;
        ctx.scheduler = Scheduler::from_restored(restored.tasks, restored.current_task);
        for (fd, path, offset) in restored.vfs_fds {
            if fd >= fd_ranges::STDIO_END {
                ctx.fds.insert_at(fd, FdKind::VfsFile { path, offset }, 0);
            }
        }
        ctx
    } else {
        boot_fresh(&arena, &mut dispatch, &vfs, &config, &env, Arc::clone(&bridge))?
    };

    let bridge_io = Arc::clone(&bridge);
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_io = Arc::clone(&shutdown);
    let io_handle = std::thread::Builder::new()
        .name("rvsim-io".into())
        .spawn(move || run_io_thread(bridge_io, shutdown_io))
        .context("spawning I/O thread")?;

    let mut jit = JitManager::new();
    let mut last_metrics = std::time::Instant::now();
    let exit_code = loop {
        match dispatch.run_chunk(&mut ctx, &vfs, &mut jit) {
            Ok(Some(ExitReason::Exited(code))) => break code & 0x7f,
            Ok(Some(ExitReason::BlockOnInput)) => {
                // `file::read` already blocked synchronously on the bridge;
                // this is purely a reschedule point for the next chunk.
            }
            Ok(None) => {}
            Err(fault) => {
                error!("FATAL: {fault} at pc={:#x}", fault.pc());
                break fault.exit_code();
            }
        }
        jit.process_compile_queue(&dispatch.arena, &mut dispatch.decoder);

        if let Some(interval) = config.metrics_interval {
            if last_metrics.elapsed() >= interval {
                info!(
                    compiled_regions = jit.compiled_region_count(),
                    queue_len = jit.queue_len(),
                    steady = jit.steady(),
                    "jit metrics snapshot"
                );
                last_metrics = std::time::Instant::now();
            }
        }
    };

    bridge.notify_exit(exit_code);
    shutdown.store(true, Ordering::Relaxed);
    let _ = io_handle.join();

    if let Some(checkpoint_out) = &config.checkpoint_out {
        let mut file = std::fs::File::create(checkpoint_out)
            .with_context(|| format!("creating checkpoint {}", checkpoint_out.display()))?;
        checkpoint::save(&mut file, &arena, &dispatch.regs, &ctx).context("writing checkpoint")?;
    }

    Ok(exit_code)
}

fn boot_fresh(
    arena: &crate::arena::SharedArena,
    dispatch: &mut Dispatch,
    vfs: &Vfs,
    config: &Config,
    env: &[String],
    bridge: Arc<Bridge>,
) -> Result<ExecuteContext> {
    let argv0 = config.argv.first().cloned().context("missing argv[0]")?;
    let resolved = vfs
        .resolve_checked(&argv0)
        .map_err(|e| anyhow::anyhow!("resolving guest executable path {argv0}: errno {}", e.0))?;
    let data = vfs
        .read_file(&resolved)
        .map_err(|e| anyhow::anyhow!("reading guest executable {resolved}: errno {}", e.0))?;
    let image = elf::load_elf(arena, data, elf::PIE_LOAD_BIAS).context("loading ELF image")?;

    // `start_pc` is where dispatch begins (the dynamic linker's entry, if
    // present); AT_ENTRY/AT_PHDR/AT_PHNUM always describe the main
    // executable (see `syscall::process::execve`, which follows the same
    // convention for a subsequent `execve`).
    let mut start_pc = image.entry;
    let mut stack_image = image.clone();
    if let Some(interp_path) = &image.interp {
        let interp_resolved = vfs
            .resolve_checked(interp_path)
            .map_err(|e| anyhow::anyhow!("resolving dynamic linker {interp_path}: errno {}", e.0))?;
        let interp_data = vfs
            .read_file(&interp_resolved)
            .map_err(|e| anyhow::anyhow!("reading dynamic linker {interp_resolved}: errno {}", e.0))?;
        let interp_image = elf::load_interp(arena, interp_data).context("loading dynamic linker image")?;
        start_pc = interp_image.entry;
        stack_image.load_bias = interp_image.load_bias;
    }

    let mut random_bytes = [0u8; 16];
    let _ = getrandom::getrandom(&mut random_bytes);
    let sp = elf::setup_stack(arena, STACK_TOP, &config.argv, env, &stack_image, &resolved, random_bytes, image.entry);
    dispatch.regs.set_pc(start_pc);
    dispatch.regs.set_x(2, sp);

    let brk_base = (image.highest_addr + 0xfff) & !0xfff;
    Ok(ExecuteContext::with_bridge(start_pc, brk_base, config.argv.clone(), env.to_vec(), resolved, bridge))
}

fn run_io_thread(bridge: Arc<Bridge>, shutdown: Arc<AtomicBool>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("I/O thread runtime init failed: {e}");
            return;
        }
    };
    rt.block_on(async move {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            bridge.service_once();
        }
        // Drain whatever stdout bytes landed in the final tick.
        bridge.service_once();
    });
}
