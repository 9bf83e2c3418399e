//! Timed execution of external commands.
//!
//! [`ProcessRunner`] is the capability the launcher and the sandbox dumper depend on;
//! [`RunUtil`] is the tokio-backed implementation. Spawned commands get their own
//! process group on Unix so a timeout can take down the whole tree.

pub mod process;
mod run;

pub use process::{ChildGuard, KillOutcome, try_kill_process_group};
pub use run::{CommandOutput, GLOBAL_CONFIG_VARIABLE, ProcessRunner, RunFut, RunUtil};
