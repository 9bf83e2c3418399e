use std::io;

use harness_types::CommandStatus;
use thiserror::Error;

/// Errors that fail the whole invocation.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no build set for the subprocess launch")]
    MissingBuildInfo,
    #[error("no configuration name set for the subprocess launch")]
    MissingConfigName,
    #[error("build {build_id} has no root directory")]
    MissingRootDir { build_id: String },
    #[error("branch option is required for the sub invocation")]
    MissingBranch,
    #[error("build flavor option is required for the sub invocation")]
    MissingBuildFlavor,
    #[error("failed to set up subprocess capture files: {0}")]
    Io(#[from] io::Error),
    #[error("{config} Tests subprocess failed due to: {status}")]
    SubprocessFailed {
        config: String,
        status: CommandStatus,
    },
}
