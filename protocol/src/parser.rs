//! Replays a side-channel event file into a listener.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use harness_core::{InvocationContext, InvocationListener, LogSource};

use crate::codec::{EventRecord, ProtocolError};

/// Counts for one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub skipped: usize,
}

impl ReplaySummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.replayed + self.skipped
    }
}

/// Decodes lifecycle records and re-issues them, in file order, as listener callbacks.
///
/// Replay is best-effort per record: anything that fails to decode is logged and
/// skipped, and replay continues with the next line.
pub struct EventStreamParser<'a> {
    listener: &'a dyn InvocationListener,
    context: Option<&'a InvocationContext>,
}

impl<'a> EventStreamParser<'a> {
    #[must_use]
    pub fn new(listener: &'a dyn InvocationListener) -> Self {
        Self {
            listener,
            context: None,
        }
    }

    /// Merge `INVOCATION_ATTRIBUTES` records into `context`.
    #[must_use]
    pub fn with_context(mut self, context: &'a InvocationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Replay `path`. A file that does not exist replays nothing.
    pub fn parse_file(&self, path: &Path) -> ReplaySummary {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No event file to replay");
                return ReplaySummary::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to open event file: {e}");
                return ReplaySummary::default();
            }
        };
        let summary = self.parse_reader(BufReader::new(file));
        tracing::debug!(
            path = %path.display(),
            replayed = summary.replayed,
            skipped = summary.skipped,
            "Replayed event file"
        );
        summary
    }

    pub fn parse_reader<R: BufRead>(&self, mut reader: R) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(line = line_no + 1, "Event stream read failed: {e}");
                    break;
                }
            }
            line_no += 1;

            let result = std::str::from_utf8(&buf)
                .map_err(|_| ProtocolError::InvalidUtf8)
                .and_then(|line| {
                    if line.trim().is_empty() {
                        Ok(false)
                    } else {
                        EventRecord::decode(line).and_then(|record| self.dispatch(record))?;
                        Ok(true)
                    }
                });
            match result {
                Ok(true) => summary.replayed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(line = line_no, "Skipping event record: {e}");
                    summary.skipped += 1;
                }
            }
        }
        summary
    }

    fn dispatch(&self, record: EventRecord) -> Result<(), ProtocolError> {
        let listener = self.listener;
        match record {
            EventRecord::InvocationFailed(p) => listener.invocation_failed(&p.message),
            EventRecord::InvocationAttributes(p) => {
                if let Some(context) = self.context {
                    context.add_invocation_attributes(&p.attributes)?;
                }
            }
            EventRecord::TestRunStarted(p) => listener.test_run_started(&p.run_name, p.test_count),
            EventRecord::TestRunFailed(p) => listener.test_run_failed(&p.message),
            EventRecord::TestRunEnded(p) => {
                listener.test_run_ended(Duration::from_millis(p.elapsed_ms), &p.metrics);
            }
            EventRecord::TestStarted(test) => listener.test_started(&test),
            EventRecord::TestFailed(p) => listener.test_failed(&p.test, &p.trace),
            EventRecord::TestAssumptionFailure(p) => {
                listener.test_assumption_failure(&p.test, &p.trace);
            }
            EventRecord::TestIgnored(test) => listener.test_ignored(&test),
            EventRecord::TestEnded(p) => listener.test_ended(&p.test, &p.metrics),
            EventRecord::TestLog(p) => {
                listener.test_log(&p.data_name, p.data_type, &LogSource::Bytes(p.data));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use harness_core::CollectingListener;
    use harness_types::{LogDataType, MultiMap};

    use super::*;

    const RUN: &str = concat!(
        "TEST_RUN_STARTED {\"run_name\":\"suite\",\"test_count\":2}\n",
        "TEST_STARTED {\"class_name\":\"C\",\"test_name\":\"a\"}\n",
        "TEST_ENDED {\"class_name\":\"C\",\"test_name\":\"a\"}\n",
        "TEST_STARTED {\"class_name\":\"C\",\"test_name\":\"b\"}\n",
        "TEST_FAILED {\"class_name\":\"C\",\"test_name\":\"b\",\"trace\":\"boom\"}\n",
        "TEST_ENDED {\"class_name\":\"C\",\"test_name\":\"b\"}\n",
        "TEST_RUN_ENDED {\"elapsed_ms\":42}\n",
    );

    #[test]
    fn replays_in_file_order() {
        let listener = CollectingListener::new();
        let summary = EventStreamParser::new(&listener).parse_reader(Cursor::new(RUN));

        assert_eq!(summary, ReplaySummary { replayed: 7, skipped: 0 });
        assert_eq!(
            listener.events(),
            vec![
                "test_run_started:suite",
                "test_started:C#a",
                "test_ended:C#a",
                "test_started:C#b",
                "test_failed:C#b",
                "test_ended:C#b",
                "test_run_ended",
            ]
        );
        let runs = listener.runs();
        assert_eq!(runs[0].passed(), 1);
        assert_eq!(runs[0].failed(), 1);
        assert_eq!(runs[0].elapsed, Some(Duration::from_millis(42)));
    }

    #[test]
    fn malformed_records_do_not_stop_replay() {
        let input = concat!(
            "TEST_RUN_STARTED {\"run_name\":\"r\",\"test_count\":1}\n",
            "NOT_A_KEY {}\n",
            "TEST_STARTED {broken\n",
            "\n",
            "TEST_STARTED {\"class_name\":\"C\",\"test_name\":\"m\"}\n",
            "TEST_ENDED {\"class_name\":\"C\",\"test_na",
        );
        let listener = CollectingListener::new();
        let summary = EventStreamParser::new(&listener).parse_reader(Cursor::new(input));

        assert_eq!(summary, ReplaySummary { replayed: 2, skipped: 3 });
        assert_eq!(listener.events(), vec!["test_run_started:r", "test_started:C#m"]);
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let mut input = b"TEST_STARTED {\"class_name\":\"\xff\",\"test_name\":\"m\"}\n".to_vec();
        input.extend_from_slice(b"TEST_RUN_FAILED {\"message\":\"late\"}\n");
        let listener = CollectingListener::new();
        let summary = EventStreamParser::new(&listener).parse_reader(Cursor::new(input));

        assert_eq!(summary, ReplaySummary { replayed: 1, skipped: 1 });
        assert_eq!(listener.events(), vec!["test_run_failed"]);
    }

    #[test]
    fn missing_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let listener = CollectingListener::new();
        let summary = EventStreamParser::new(&listener).parse_file(&dir.path().join("absent"));
        assert_eq!(summary, ReplaySummary::default());
        assert!(listener.events().is_empty());
    }

    #[test]
    fn empty_file_replays_nothing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let listener = CollectingListener::new();
        let summary = EventStreamParser::new(&listener).parse_file(file.path());
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn log_records_arrive_as_byte_sources() {
        let input = "TEST_LOG {\"data_name\":\"host\",\"data_type\":\"XML\",\"data\":\"PGEvPg==\"}\n";
        let listener = CollectingListener::new();
        EventStreamParser::new(&listener).parse_reader(Cursor::new(input));

        let logs = listener.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, "host");
        assert_eq!(logs[0].data_type, LogDataType::Xml);
        assert_eq!(logs[0].contents.as_deref(), Some(&b"<a/>"[..]));
    }

    #[test]
    fn attributes_merge_into_context() {
        let input = "INVOCATION_ATTRIBUTES {\"attributes\":{\"tag\":[\"x\",\"y\"]}}\n";
        let listener = CollectingListener::new();
        let context = InvocationContext::new();
        let summary = EventStreamParser::new(&listener)
            .with_context(&context)
            .parse_reader(Cursor::new(input));

        assert_eq!(summary.replayed, 1);
        let attributes = context.get_attributes();
        assert_eq!(
            attributes.get("tag"),
            Some(&["x".to_string(), "y".to_string()][..])
        );
    }

    #[test]
    fn attributes_for_locked_context_are_skipped() {
        let input = concat!(
            "INVOCATION_ATTRIBUTES {\"attributes\":{\"tag\":[\"x\"]}}\n",
            "TEST_RUN_FAILED {\"message\":\"m\"}\n",
        );
        let listener = CollectingListener::new();
        let context = InvocationContext::new();
        context.lock_attributes();
        let summary = EventStreamParser::new(&listener)
            .with_context(&context)
            .parse_reader(Cursor::new(input));

        assert_eq!(summary, ReplaySummary { replayed: 1, skipped: 1 });
        assert_eq!(context.get_attributes(), MultiMap::new());
    }
}
