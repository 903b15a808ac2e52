//! The JIT tier (components G and H): the RV64GC→native-code translator and
//! the manager that decides what to compile, when, and whether a previously
//! compiled region is still valid to invoke.

pub mod manager;
pub mod predictor;
pub mod region;
pub mod translator;

pub use manager::JitManager;
pub use region::{Region, Tier, MAX_REGION_INSNS};
