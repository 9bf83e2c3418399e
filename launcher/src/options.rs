use std::time::Duration;

pub const DEFAULT_MAX_RUN_TIME_MINUTES: u64 = 20;
pub const DEFAULT_INTERPRETER: &str = "java";
pub const DEFAULT_ENTRY_POINT: &str = "com.android.tradefed.command.CommandRunner";
/// Agent flag that starts the child suspended, waiting for a debugger on port 10088.
pub const REMOTE_DEBUG_AGENT: &str =
    "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address=10088";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherOptions {
    /// Configuration the child runs.
    pub config_name: Option<String>,
    /// Wall-clock budget for the child, in minutes.
    pub max_run_time_minutes: u64,
    pub remote_debug: bool,
    pub interpreter: String,
    pub entry_point: String,
    /// The child brings up its own virtual device.
    pub use_virtual_device: bool,
    /// Branch for the child; falls back to the build's branch.
    pub sub_branch: Option<String>,
    /// Build flavor for the child; falls back to the build's flavor.
    pub sub_build_flavor: Option<String>,
    pub sub_build_id: Option<String>,
    /// APKs the child installs, relative to the build root.
    pub sub_apk_paths: Vec<String>,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            config_name: None,
            max_run_time_minutes: DEFAULT_MAX_RUN_TIME_MINUTES,
            remote_debug: false,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            use_virtual_device: false,
            sub_branch: None,
            sub_build_flavor: None,
            sub_build_id: None,
            sub_apk_paths: Vec::new(),
        }
    }
}

impl LauncherOptions {
    #[must_use]
    pub fn with_config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn max_run_time(&self) -> Duration {
        Duration::from_secs(self.max_run_time_minutes.saturating_mul(60))
    }
}
