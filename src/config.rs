//! Process-wide configuration: a `clap`-derived CLI surface converted into an
//! immutable `Config` that the rest of the crate is built around.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// `rvsim [--env KEY=VAL]... --rootfs <path.tar> [--log-level LEVEL]
///       [--metrics-interval MS] [--checkpoint-out PATH] [--checkpoint-in PATH]
///       <argv0> [argv...]`
#[derive(Parser, Debug)]
#[command(name = "rvsim", about = "Userland RV64GC emulator with a tiered JIT")]
pub struct Cli {
    /// `KEY=VAL` guest environment variable; may repeat.
    #[arg(long = "env", value_name = "KEY=VAL")]
    pub env: Vec<String>,

    /// Uncompressed ustar archive to mount as the guest root filesystem.
    #[arg(long, value_name = "PATH")]
    pub rootfs: PathBuf,

    /// Overrides `RUST_LOG` for this run.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// How often, in milliseconds, the I/O thread snapshots JIT manager
    /// counters into the diagnostics ring. Disabled (no snapshot) if absent.
    #[arg(long, value_name = "MS")]
    pub metrics_interval: Option<u64>,

    /// Write a checkpoint here when the guest exits.
    #[arg(long, value_name = "PATH")]
    pub checkpoint_out: Option<PathBuf>,

    /// Resume execution from a checkpoint instead of a fresh ELF load.
    #[arg(long, value_name = "PATH")]
    pub checkpoint_in: Option<PathBuf>,

    /// `argv0` followed by the guest's own `argv`.
    #[arg(required = true, trailing_var_arg = true)]
    pub argv: Vec<String>,
}

/// Immutable process-wide configuration, built once at startup (SPEC_FULL.md
/// §3.J) and never touched by guest execution — contrast with
/// `ExecuteContext`, which guest syscalls mutate continuously.
#[derive(Debug, Clone)]
pub struct Config {
    pub rootfs: PathBuf,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub log_level: Option<String>,
    pub metrics_interval: Option<Duration>,
    pub checkpoint_out: Option<PathBuf>,
    pub checkpoint_in: Option<PathBuf>,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let env = cli
            .env
            .into_iter()
            .filter_map(|kv| kv.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
            .collect();
        Config {
            rootfs: cli.rootfs,
            argv: cli.argv,
            env,
            log_level: cli.log_level,
            metrics_interval: cli.metrics_interval.map(Duration::from_millis),
            checkpoint_out: cli.checkpoint_out,
            checkpoint_in: cli.checkpoint_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_env_entry_without_equals_is_dropped() {
        let cli = Cli {
            env: vec!["FOO=bar".to_string(), "BOGUS".to_string()],
            rootfs: PathBuf::from("/tmp/rootfs.tar"),
            log_level: None,
            metrics_interval: None,
            checkpoint_out: None,
            checkpoint_in: None,
            argv: vec!["/hello".to_string()],
        };
        let config: Config = cli.into();
        assert_eq!(config.env, vec![("FOO".to_string(), "bar".to_string())]);
    }
}
