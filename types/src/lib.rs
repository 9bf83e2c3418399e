//! Core domain types for the harness.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the invocation context, the side-channel
//! protocol, the process runner and the launcher.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod multimap;
pub use multimap::MultiMap;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Test Identity
// ============================================================================

/// Identifies a single test case: `class_name#test_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestDescription {
    pub class_name: String,
    pub test_name: String,
}

impl TestDescription {
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }
}

impl fmt::Display for TestDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.test_name)
    }
}

/// Key/value metrics attached to a test or a test run.
pub type Metrics = BTreeMap<String, String>;

// ============================================================================
// Log Data
// ============================================================================

/// Content type of a log artifact forwarded to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogDataType {
    #[default]
    Text,
    Xml,
    Json,
    Png,
    Zip,
    Bugreport,
    Logcat,
    Unknown,
}

impl LogDataType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Xml => "XML",
            Self::Json => "JSON",
            Self::Png => "PNG",
            Self::Zip => "ZIP",
            Self::Bugreport => "BUGREPORT",
            Self::Logcat => "LOGCAT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// File extension used when the artifact is persisted.
    #[must_use]
    pub const fn file_ext(self) -> &'static str {
        match self {
            Self::Text | Self::Bugreport | Self::Logcat => "txt",
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Png => "png",
            Self::Zip => "zip",
            Self::Unknown => "dat",
        }
    }
}

impl fmt::Display for LogDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Build Info
// ============================================================================

/// Default test tag when the scheduler did not assign one.
pub const DEFAULT_TEST_TAG: &str = "stub";

/// Build under test, as handed to the launcher by the scheduler.
///
/// `root_dir` is only present for folder-backed builds (an unpacked installation
/// of the harness to run as a subprocess).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_id: String,
    pub test_tag: String,
    pub branch: Option<String>,
    pub flavor: Option<String>,
    pub root_dir: Option<PathBuf>,
}

impl BuildInfo {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            test_tag: DEFAULT_TEST_TAG.to_string(),
            branch: None,
            flavor: None,
            root_dir: None,
        }
    }

    pub fn with_test_tag(mut self, tag: impl Into<String>) -> Self {
        self.test_tag = tag.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_flavor(mut self, flavor: impl Into<String>) -> Self {
        self.flavor = Some(flavor.into());
        self
    }

    pub fn with_root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root.into());
        self
    }

    #[must_use]
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }
}

// ============================================================================
// Command Outcome
// ============================================================================

/// Terminal classification of an external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Failed,
    TimedOut,
    /// The command could not be spawned or waited on.
    Exception,
}

impl CommandStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Exception => "EXCEPTION",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a command run through a process runner.
///
/// `stdout`/`stderr` are only populated when the runner captured output in memory;
/// runs redirected into files leave them empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    #[must_use]
    pub fn new(status: CommandStatus) -> Self {
        Self {
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// A run that never produced an exit status; `message` lands in `stderr`.
    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Exception,
            exit_code: None,
            stdout: String::new(),
            stderr: message.into(),
        }
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log data type: {0}")]
pub struct UnknownLogDataType(pub String);

impl std::str::FromStr for LogDataType {
    type Err = UnknownLogDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.to_ascii_uppercase().as_str() {
            "TEXT" => Self::Text,
            "XML" => Self::Xml,
            "JSON" => Self::Json,
            "PNG" => Self::Png,
            "ZIP" => Self::Zip,
            "BUGREPORT" => Self::Bugreport,
            "LOGCAT" => Self::Logcat,
            "UNKNOWN" => Self::Unknown,
            _ => return Err(UnknownLogDataType(s.to_string())),
        };
        Ok(parsed)
    }
}

// ============================================================================
// Tests
// ============================================================================
