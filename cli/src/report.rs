//! Listeners used by the command-line front end.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use harness_core::{
    CollectingListener, InvocationContext, InvocationListener, LogSaver, LogSaverListener,
    LogSource, SavedLogFile,
};
use harness_types::{LogDataType, Metrics, TestDescription};

/// Mirrors lifecycle callbacks into the log.
pub struct LoggingListener;

impl InvocationListener for LoggingListener {
    fn invocation_failed(&self, cause: &str) {
        tracing::error!("Invocation failed: {cause}");
    }

    fn test_run_started(&self, run_name: &str, test_count: usize) {
        tracing::info!(run = run_name, tests = test_count, "Run started");
    }

    fn test_run_failed(&self, message: &str) {
        tracing::warn!("Run failed: {message}");
    }

    fn test_run_ended(&self, elapsed: Duration, _metrics: &Metrics) {
        tracing::info!(elapsed_ms = elapsed.as_millis(), "Run ended");
    }

    fn test_started(&self, test: &TestDescription) {
        tracing::debug!(%test, "Test started");
    }

    fn test_failed(&self, test: &TestDescription, trace: &str) {
        tracing::warn!(%test, "Test failed");
        tracing::trace!(%test, "{trace}");
    }

    fn test_ended(&self, test: &TestDescription, _metrics: &Metrics) {
        tracing::debug!(%test, "Test ended");
    }

    fn test_log(&self, data_name: &str, data_type: LogDataType, source: &LogSource) {
        tracing::debug!(data_name, %data_type, bytes = ?source.len(), "Log received");
    }
}

/// Saves raw log data as files in one directory.
#[derive(Debug)]
pub struct DirectoryLogSaver {
    dir: PathBuf,
}

impl DirectoryLogSaver {
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn unused_path(&self, data_name: &str, extension: &str) -> PathBuf {
        let mut path = self.dir.join(format!("{data_name}.{extension}"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{data_name}_{n}.{extension}"));
            n += 1;
        }
        path
    }
}

impl LogSaver for DirectoryLogSaver {
    fn save_log_data_raw(
        &self,
        data_name: &str,
        extension: &str,
        data: &[u8],
    ) -> io::Result<SavedLogFile> {
        let path = self.unused_path(data_name, extension);
        fs::write(&path, data)?;
        Ok(SavedLogFile {
            path: path.display().to_string(),
            url: None,
        })
    }
}

/// Saves every log it receives and tells saver-aware listeners where it went.
pub struct SavingListener {
    saver: Arc<dyn LogSaver>,
    listeners: Vec<Arc<dyn LogSaverListener>>,
}

impl SavingListener {
    pub fn new(saver: Arc<dyn LogSaver>, listeners: Vec<Arc<dyn LogSaverListener>>) -> Self {
        Self { saver, listeners }
    }
}

impl InvocationListener for SavingListener {
    fn invocation_ended(&self, elapsed: Duration) {
        for listener in &self.listeners {
            listener.invocation_ended(elapsed);
        }
    }

    fn test_log(&self, data_name: &str, data_type: LogDataType, source: &LogSource) {
        let data = match source.read_bytes() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(data_name, "Failed to read log for saving: {e}");
                return;
            }
        };
        match self
            .saver
            .save_log_data_raw(data_name, data_type.file_ext(), &data)
        {
            Ok(saved) => {
                for listener in &self.listeners {
                    listener.test_log_saved(data_name, data_type, source, &saved);
                }
            }
            Err(e) => tracing::warn!(data_name, "Failed to save log: {e}"),
        }
    }
}

pub fn print_summary(collector: &CollectingListener, context: &InvocationContext) {
    for run in collector.runs() {
        let state = match (&run.failure, run.is_complete()) {
            (Some(failure), _) => format!("failed: {failure}"),
            (None, true) => "complete".to_string(),
            (None, false) => "incomplete".to_string(),
        };
        println!(
            "{}: {} passed, {} failed, {} ignored ({state})",
            run.name,
            run.passed(),
            run.failed(),
            run.ignored()
        );
    }
    for failure in collector.invocation_failures() {
        println!("invocation failed: {failure}");
    }
    for (key, values) in &context.get_attributes() {
        println!("{key} = {}", values.join(","));
    }
}
