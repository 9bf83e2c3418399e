//! Runs a test configuration in a child harness process.
//!
//! The child's stdout and stderr stream into capture files and its lifecycle events
//! arrive through a side-channel file. Once the child exits, for any reason, all three
//! are forwarded to the parent's listener and deleted; the event file is replayed
//! first so the parent sees the child's results.

mod args;
mod artifacts;
mod error;
mod launcher;
mod options;

pub use args::{SUBPROCESS_REPORT_FILE_FLAG, build_child_args};
pub use error::LaunchError;
pub use launcher::SubprocessTestLauncher;
pub use options::{
    DEFAULT_ENTRY_POINT, DEFAULT_INTERPRETER, DEFAULT_MAX_RUN_TIME_MINUTES, LauncherOptions,
    REMOTE_DEBUG_AGENT,
};
