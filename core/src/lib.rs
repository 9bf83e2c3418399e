//! Core invocation state and result pipeline for the harness.
//!
//! This crate holds the pieces every other layer reports into:
//! the shared [`InvocationContext`], the [`InvocationListener`] callback surface,
//! and the stock listeners (fan-out, collection, file metadata).

mod collecting;
pub mod context;
pub mod device;
pub mod listener;
pub mod metadata;

pub use collecting::{CollectingListener, LoggedArtifact, RunOutcome, TestOutcome, TestRecord};
pub use context::{ContextError, InvocationContext};
pub use device::{NullDevice, TestDevice};
pub use listener::{InvocationListener, LogSource, ResultForwarder};
pub use metadata::{
    FileMetadata, FileMetadataCollector, LogFileEntry, LogSaver, LogSaverListener, SavedLogFile,
};
