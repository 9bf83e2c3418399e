//! Invocation listener surface.
//!
//! Listeners receive test lifecycle callbacks and log artifacts. They may be invoked
//! from the invocation thread and from device threads feeding the same chain, so every
//! callback takes `&self` and implementations use interior mutability.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use harness_types::{LogDataType, Metrics, TestDescription};

use crate::context::InvocationContext;

/// Where the bytes of a log artifact come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    /// A file on disk. Only valid for the duration of the `test_log` call.
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl LogSource {
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        match self {
            Self::File(path) => fs::read(path),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Bytes(_) => None,
        }
    }

    /// Size in bytes, or `None` when a backing file cannot be inspected.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        match self {
            Self::File(path) => fs::metadata(path).ok().map(|m| m.len()),
            Self::Bytes(bytes) => Some(bytes.len() as u64),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Receives invocation and test lifecycle events.
///
/// Every method has a no-op default so listeners only implement what they consume.
pub trait InvocationListener: Send + Sync {
    fn invocation_started(&self, _context: &InvocationContext) {}

    fn invocation_failed(&self, _cause: &str) {}

    fn invocation_ended(&self, _elapsed: Duration) {}

    fn test_run_started(&self, _run_name: &str, _test_count: usize) {}

    fn test_run_failed(&self, _message: &str) {}

    fn test_run_ended(&self, _elapsed: Duration, _metrics: &Metrics) {}

    fn test_started(&self, _test: &TestDescription) {}

    fn test_failed(&self, _test: &TestDescription, _trace: &str) {}

    fn test_assumption_failure(&self, _test: &TestDescription, _trace: &str) {}

    fn test_ignored(&self, _test: &TestDescription) {}

    fn test_ended(&self, _test: &TestDescription, _metrics: &Metrics) {}

    fn test_log(&self, _data_name: &str, _data_type: LogDataType, _source: &LogSource) {}
}

/// Forwards every callback to a list of listeners, in registration order.
#[derive(Default, Clone)]
pub struct ResultForwarder {
    listeners: Vec<Arc<dyn InvocationListener>>,
}

impl ResultForwarder {
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn InvocationListener>>) -> Self {
        Self { listeners }
    }

    pub fn push(&mut self, listener: Arc<dyn InvocationListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn each(&self, f: impl Fn(&dyn InvocationListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}

impl InvocationListener for ResultForwarder {
    fn invocation_started(&self, context: &InvocationContext) {
        self.each(|l| l.invocation_started(context));
    }

    fn invocation_failed(&self, cause: &str) {
        self.each(|l| l.invocation_failed(cause));
    }

    fn invocation_ended(&self, elapsed: Duration) {
        self.each(|l| l.invocation_ended(elapsed));
    }

    fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.each(|l| l.test_run_started(run_name, test_count));
    }

    fn test_run_failed(&self, message: &str) {
        self.each(|l| l.test_run_failed(message));
    }

    fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        self.each(|l| l.test_run_ended(elapsed, metrics));
    }

    fn test_started(&self, test: &TestDescription) {
        self.each(|l| l.test_started(test));
    }

    fn test_failed(&self, test: &TestDescription, trace: &str) {
        self.each(|l| l.test_failed(test, trace));
    }

    fn test_assumption_failure(&self, test: &TestDescription, trace: &str) {
        self.each(|l| l.test_assumption_failure(test, trace));
    }

    fn test_ignored(&self, test: &TestDescription) {
        self.each(|l| l.test_ignored(test));
    }

    fn test_ended(&self, test: &TestDescription, metrics: &Metrics) {
        self.each(|l| l.test_ended(test, metrics));
    }

    fn test_log(&self, data_name: &str, data_type: LogDataType, source: &LogSource) {
        self.each(|l| l.test_log(data_name, data_type, source));
    }
}
