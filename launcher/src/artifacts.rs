//! Per-launch capture files.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use harness_core::{InvocationContext, InvocationListener, LogSource};
use harness_protocol::{EventStreamParser, ReplaySummary};
use harness_types::LogDataType;
use tempfile::TempPath;

const LOG_SUFFIX: &str = ".log";

/// Open handles the child writes through.
pub(crate) struct CaptureSinks {
    pub stdout: File,
    pub stderr: File,
    pub events: PathBuf,
}

/// The stdout, stderr and event-channel files of one launch.
///
/// Each file is tracked separately so that a setup failure part way through still
/// forwards and deletes whatever was created. Dropping without forwarding deletes.
#[derive(Default)]
pub(crate) struct CaptureArtifacts {
    stdout: Option<TempPath>,
    stderr: Option<TempPath>,
    events: Option<TempPath>,
}

fn create_log(prefix: &str) -> io::Result<(File, TempPath)> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(LOG_SUFFIX)
        .tempfile()
        .map(tempfile::NamedTempFile::into_parts)
}

impl CaptureArtifacts {
    pub(crate) fn create(&mut self) -> io::Result<CaptureSinks> {
        let (stdout, path) = create_log("stdout_subprocess_")?;
        self.stdout = Some(path);
        let (stderr, path) = create_log("stderr_subprocess_")?;
        self.stderr = Some(path);
        let (_, path) = create_log("event_subprocess_")?;
        let events = path.to_path_buf();
        self.events = Some(path);
        Ok(CaptureSinks {
            stdout,
            stderr,
            events,
        })
    }

    pub(crate) fn stdout_path(&self) -> Option<&Path> {
        self.stdout.as_deref()
    }

    pub(crate) fn stderr_path(&self) -> Option<&Path> {
        self.stderr.as_deref()
    }

    /// Log each created file to `listener` and delete it. The event file is replayed
    /// into `listener` before it is logged.
    pub(crate) fn forward_and_clean(
        &mut self,
        listener: &dyn InvocationListener,
        context: Option<&InvocationContext>,
    ) -> Option<ReplaySummary> {
        log_and_clean(self.stdout.take(), listener);
        log_and_clean(self.stderr.take(), listener);

        let events = self.events.take()?;
        let mut parser = EventStreamParser::new(listener);
        if let Some(context) = context {
            parser = parser.with_context(context);
        }
        let summary = parser.parse_file(&events);
        log_and_clean(Some(events), listener);
        Some(summary)
    }
}

fn log_and_clean(path: Option<TempPath>, listener: &dyn InvocationListener) {
    let Some(path) = path else {
        return;
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    listener.test_log(&name, LogDataType::Text, &LogSource::File(path.to_path_buf()));
    if let Err(e) = path.close() {
        tracing::warn!(name, "Failed to delete capture file: {e}");
    }
}

/// Capture file contents for diagnostics; unreadable files read as empty.
pub(crate) fn read_capture(path: Option<&Path>) -> String {
    path.and_then(|path| fs::read(path).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use harness_core::CollectingListener;

    use super::*;

    #[test]
    fn forwards_in_order_and_deletes() {
        let mut artifacts = CaptureArtifacts::default();
        let mut sinks = artifacts.create().unwrap();
        sinks.stdout.write_all(b"out").unwrap();
        fs::write(
            &sinks.events,
            "TEST_RUN_STARTED {\"run_name\":\"r\",\"test_count\":0}\n",
        )
        .unwrap();
        drop(sinks.stdout);
        drop(sinks.stderr);

        let listener = CollectingListener::new();
        let summary = artifacts.forward_and_clean(&listener, None).unwrap();

        assert_eq!(summary.replayed, 1);
        let logs = listener.logs();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].name.starts_with("stdout_subprocess_"));
        assert!(logs[0].name.ends_with(".log"));
        assert_eq!(logs[0].contents.as_deref(), Some(&b"out"[..]));
        assert!(logs[1].name.starts_with("stderr_subprocess_"));
        assert!(logs[2].name.starts_with("event_subprocess_"));
        assert!(logs.iter().all(|log| log.data_type == LogDataType::Text));

        let events = listener.events();
        assert!(events[2].starts_with("test_run_started"));
        assert!(!sinks.events.exists());
    }

    #[test]
    fn nothing_created_forwards_nothing() {
        let listener = CollectingListener::new();
        assert!(
            CaptureArtifacts::default()
                .forward_and_clean(&listener, None)
                .is_none()
        );
        assert!(listener.events().is_empty());
    }

    #[test]
    fn partial_setup_forwards_and_deletes_what_exists() {
        let (mut file, path) = create_log("stdout_subprocess_").unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);
        let stdout = path.to_path_buf();
        let mut artifacts = CaptureArtifacts {
            stdout: Some(path),
            ..CaptureArtifacts::default()
        };

        let listener = CollectingListener::new();
        assert!(artifacts.forward_and_clean(&listener, None).is_none());

        let logs = listener.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].name.starts_with("stdout_subprocess_"));
        assert_eq!(logs[0].contents.as_deref(), Some(&b"partial"[..]));
        assert!(!stdout.exists());
    }

    #[test]
    fn read_capture_tolerates_missing_file() {
        assert_eq!(read_capture(None), "");
        assert_eq!(read_capture(Some(Path::new("/nonexistent/capture.log"))), "");
    }
}
