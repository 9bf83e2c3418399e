//! Listener that keeps every result in memory.
//!
//! Used for run summaries and as the assertion target in tests.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use harness_types::{LogDataType, Metrics, TestDescription};

use crate::context::InvocationContext;
use crate::listener::{InvocationListener, LogSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    InProgress,
    Passed,
    Failed,
    AssumptionFailure,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub test: TestDescription,
    pub outcome: TestOutcome,
    pub trace: Option<String>,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub name: String,
    pub expected_tests: usize,
    pub tests: Vec<TestRecord>,
    pub failure: Option<String>,
    pub elapsed: Option<Duration>,
    pub metrics: Metrics,
}

impl RunOutcome {
    fn count(&self, outcome: TestOutcome) -> usize {
        self.tests.iter().filter(|t| t.outcome == outcome).count()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(TestOutcome::Passed)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(TestOutcome::Failed)
    }

    #[must_use]
    pub fn ignored(&self) -> usize {
        self.count(TestOutcome::Ignored) + self.count(TestOutcome::AssumptionFailure)
    }

    /// Whether `test_run_ended` was received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.elapsed.is_some()
    }
}

/// A log artifact as it was received; file-backed sources are read eagerly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedArtifact {
    pub name: String,
    pub data_type: LogDataType,
    pub contents: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Collected {
    runs: Vec<RunOutcome>,
    logs: Vec<LoggedArtifact>,
    invocation_failures: Vec<String>,
    events: Vec<String>,
}

impl Collected {
    fn current_run(&mut self) -> &mut RunOutcome {
        if self.runs.is_empty() {
            self.runs.push(RunOutcome::default());
        }
        let last = self.runs.len() - 1;
        &mut self.runs[last]
    }

    fn current_test(&mut self, test: &TestDescription) -> &mut TestRecord {
        let run = self.current_run();
        let index = match run.tests.iter().rposition(|t| &t.test == test) {
            Some(index) => index,
            None => {
                run.tests.push(TestRecord {
                    test: test.clone(),
                    outcome: TestOutcome::InProgress,
                    trace: None,
                    metrics: Metrics::new(),
                });
                run.tests.len() - 1
            }
        };
        &mut run.tests[index]
    }
}

#[derive(Debug, Default)]
pub struct CollectingListener {
    inner: Mutex<Collected>,
}

impl CollectingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Collected) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    #[must_use]
    pub fn runs(&self) -> Vec<RunOutcome> {
        self.with(|c| c.runs.clone())
    }

    #[must_use]
    pub fn logs(&self) -> Vec<LoggedArtifact> {
        self.with(|c| c.logs.clone())
    }

    #[must_use]
    pub fn invocation_failures(&self) -> Vec<String> {
        self.with(|c| c.invocation_failures.clone())
    }

    /// Callback names in arrival order, e.g. `test_started:Class#method`.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.with(|c| c.events.clone())
    }

    #[must_use]
    pub fn total_passed(&self) -> usize {
        self.with(|c| c.runs.iter().map(RunOutcome::passed).sum())
    }

    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.with(|c| c.runs.iter().map(RunOutcome::failed).sum())
    }
}

impl InvocationListener for CollectingListener {
    fn invocation_started(&self, _context: &InvocationContext) {
        self.with(|c| c.events.push("invocation_started".to_string()));
    }

    fn invocation_failed(&self, cause: &str) {
        self.with(|c| {
            c.events.push("invocation_failed".to_string());
            c.invocation_failures.push(cause.to_string());
        });
    }

    fn invocation_ended(&self, _elapsed: Duration) {
        self.with(|c| c.events.push("invocation_ended".to_string()));
    }

    fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.with(|c| {
            c.events.push(format!("test_run_started:{run_name}"));
            c.runs.push(RunOutcome {
                name: run_name.to_string(),
                expected_tests: test_count,
                ..RunOutcome::default()
            });
        });
    }

    fn test_run_failed(&self, message: &str) {
        self.with(|c| {
            c.events.push("test_run_failed".to_string());
            c.current_run().failure = Some(message.to_string());
        });
    }

    fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        self.with(|c| {
            c.events.push("test_run_ended".to_string());
            let run = c.current_run();
            run.elapsed = Some(elapsed);
            run.metrics.extend(metrics.clone());
        });
    }

    fn test_started(&self, test: &TestDescription) {
        self.with(|c| {
            c.events.push(format!("test_started:{test}"));
            c.current_test(test);
        });
    }

    fn test_failed(&self, test: &TestDescription, trace: &str) {
        self.with(|c| {
            c.events.push(format!("test_failed:{test}"));
            let record = c.current_test(test);
            record.outcome = TestOutcome::Failed;
            record.trace = Some(trace.to_string());
        });
    }

    fn test_assumption_failure(&self, test: &TestDescription, trace: &str) {
        self.with(|c| {
            c.events.push(format!("test_assumption_failure:{test}"));
            let record = c.current_test(test);
            record.outcome = TestOutcome::AssumptionFailure;
            record.trace = Some(trace.to_string());
        });
    }

    fn test_ignored(&self, test: &TestDescription) {
        self.with(|c| {
            c.events.push(format!("test_ignored:{test}"));
            c.current_test(test).outcome = TestOutcome::Ignored;
        });
    }

    fn test_ended(&self, test: &TestDescription, metrics: &Metrics) {
        self.with(|c| {
            c.events.push(format!("test_ended:{test}"));
            let record = c.current_test(test);
            if record.outcome == TestOutcome::InProgress {
                record.outcome = TestOutcome::Passed;
            }
            record.metrics.extend(metrics.clone());
        });
    }

    fn test_log(&self, data_name: &str, data_type: LogDataType, source: &LogSource) {
        let contents = source.read_bytes().ok();
        self.with(|c| {
            c.events.push(format!("test_log:{data_name}"));
            c.logs.push(LoggedArtifact {
                name: data_name.to_string(),
                data_type,
                contents,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_per_test() {
        let listener = CollectingListener::new();
        let pass = TestDescription::new("C", "pass");
        let fail = TestDescription::new("C", "fail");
        let skip = TestDescription::new("C", "skip");

        listener.test_run_started("suite", 3);
        listener.test_started(&pass);
        listener.test_ended(&pass, &Metrics::new());
        listener.test_started(&fail);
        listener.test_failed(&fail, "boom");
        listener.test_ended(&fail, &Metrics::new());
        listener.test_started(&skip);
        listener.test_ignored(&skip);
        listener.test_ended(&skip, &Metrics::new());

        let runs = listener.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].expected_tests, 3);
        assert_eq!(runs[0].passed(), 1);
        assert_eq!(runs[0].failed(), 1);
        assert_eq!(runs[0].ignored(), 1);
        assert!(!runs[0].is_complete());
        assert_eq!(runs[0].tests[1].trace.as_deref(), Some("boom"));
    }

    #[test]
    fn events_keep_arrival_order() {
        let listener = CollectingListener::new();
        let test = TestDescription::new("C", "m");
        listener.test_run_started("r", 1);
        listener.test_started(&test);
        listener.test_ended(&test, &Metrics::new());
        listener.test_run_ended(Duration::ZERO, &Metrics::new());
        assert_eq!(
            listener.events(),
            vec![
                "test_run_started:r",
                "test_started:C#m",
                "test_ended:C#m",
                "test_run_ended",
            ]
        );
    }

    #[test]
    fn logs_capture_contents_at_call_time() {
        let listener = CollectingListener::new();
        listener.test_log("stdout", LogDataType::Text, &LogSource::Bytes(b"out".to_vec()));
        let logs = listener.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].contents.as_deref(), Some(&b"out"[..]));
    }
}
