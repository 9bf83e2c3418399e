//! Child-side writer for the event channel.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use harness_core::{InvocationContext, InvocationListener, LogSource};
use harness_types::{LogDataType, Metrics, TestDescription};

use crate::codec::{
    Attributes, EventRecord, Message, ProtocolError, RunEnded, RunStarted, TestEnded, TestLog,
    TestTrace,
};

/// Listener that appends every callback to the event channel as one encoded record.
///
/// Each record is flushed before the callback returns, so a child that dies leaves
/// whole records plus at most one truncated trailing line.
pub struct SubprocessResultsReporter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl SubprocessResultsReporter {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, ProtocolError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn emit(&self, record: &EventRecord) -> Result<(), ProtocolError> {
        let mut line = record.encode()?;
        line.push('\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn report(&self, record: &EventRecord) {
        if let Err(e) = self.emit(record) {
            tracing::warn!(
                path = %self.path.display(),
                key = %record.key(),
                "Failed to report event: {e}"
            );
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl InvocationListener for SubprocessResultsReporter {
    fn invocation_started(&self, context: &InvocationContext) {
        let attributes = context.get_attributes();
        if !attributes.is_empty() {
            self.report(&EventRecord::InvocationAttributes(Attributes { attributes }));
        }
    }

    fn invocation_failed(&self, cause: &str) {
        self.report(&EventRecord::InvocationFailed(Message {
            message: cause.to_string(),
        }));
    }

    fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.report(&EventRecord::TestRunStarted(RunStarted {
            run_name: run_name.to_string(),
            test_count,
        }));
    }

    fn test_run_failed(&self, message: &str) {
        self.report(&EventRecord::TestRunFailed(Message {
            message: message.to_string(),
        }));
    }

    fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        self.report(&EventRecord::TestRunEnded(RunEnded {
            elapsed_ms: millis(elapsed),
            metrics: metrics.clone(),
        }));
    }

    fn test_started(&self, test: &TestDescription) {
        self.report(&EventRecord::TestStarted(test.clone()));
    }

    fn test_failed(&self, test: &TestDescription, trace: &str) {
        self.report(&EventRecord::TestFailed(TestTrace {
            test: test.clone(),
            trace: trace.to_string(),
        }));
    }

    fn test_assumption_failure(&self, test: &TestDescription, trace: &str) {
        self.report(&EventRecord::TestAssumptionFailure(TestTrace {
            test: test.clone(),
            trace: trace.to_string(),
        }));
    }

    fn test_ignored(&self, test: &TestDescription) {
        self.report(&EventRecord::TestIgnored(test.clone()));
    }

    fn test_ended(&self, test: &TestDescription, metrics: &Metrics) {
        self.report(&EventRecord::TestEnded(TestEnded {
            test: test.clone(),
            metrics: metrics.clone(),
        }));
    }

    fn test_log(&self, data_name: &str, data_type: LogDataType, source: &LogSource) {
        match source.read_bytes() {
            Ok(data) => self.report(&EventRecord::TestLog(TestLog {
                data_name: data_name.to_string(),
                data_type,
                data,
            })),
            Err(e) => tracing::warn!(data_name, "Failed to read log for reporting: {e}"),
        }
    }
}
