//! Side-channel event protocol.
//!
//! A sandboxed child invocation writes its test lifecycle events to a file
//! ([`SubprocessResultsReporter`]); once the child exits the parent replays that file
//! into its own listener chain ([`EventStreamParser`]).
//!
//! The file is line-framed: `<EVENT_KEY> <json>\n`, one lifecycle event per line.
//! Records are independently decodable, so a child killed mid-write costs at most
//! its trailing record.

pub mod codec;
pub mod parser;
pub mod reporter;

pub use codec::{EventKey, EventRecord, ProtocolError};
pub use parser::{EventStreamParser, ReplaySummary};
pub use reporter::SubprocessResultsReporter;
