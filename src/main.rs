//! rvsim: a userland RV64GC emulator with a tiered JIT.
//!
//! Loads a single guest ELF binary (plus its dynamic linker, if any) against
//! an in-memory tar-backed rootfs and runs it to completion, emulating the
//! Linux riscv64 syscall ABI.

mod tracing_layer;

use anyhow::Result;
use clap::Parser;
use rvsim::config::{Cli, Config};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Capacity of the in-memory diagnostics ring (SPEC_FULL.md §4.K); generous
/// enough to hold several dispatch chunks' worth of syscall/JIT events
/// without the memory footprint of a real log file.
const DIAGNOSTICS_RING_CAPACITY: usize = 4096;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config: Config = cli.into();

    let diagnostics = Arc::new(tracing_layer::DiagnosticsLayer::new(DIAGNOSTICS_RING_CAPACITY));

    let env_filter = config
        .log_level
        .as_deref()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rvsim=debug")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true).with_thread_names(true))
        .with(diagnostics.clone())
        .with(env_filter)
        .init();

    info!("starting rvsim");
    info!(version = env!("CARGO_PKG_VERSION"));
    info!(rootfs = %config.rootfs.display(), argv = ?config.argv, "booting guest");

    let exit_code = rvsim::boot::run(config)?;

    info!(exit_code, diagnostics_events = diagnostics.len(), "guest finished");
    std::process::exit(exit_code);
}
