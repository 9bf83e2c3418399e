//! Collects metadata about saved log files and persists it at invocation end.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use harness_types::LogDataType;
use serde::{Deserialize, Serialize};

use crate::listener::{InvocationListener, LogSource};

/// Name under which the collected metadata is saved.
pub const METADATA_DATA_NAME: &str = "metadata";

/// Location of a log file once the saver has persisted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLogFile {
    pub path: String,
    pub url: Option<String>,
}

/// Persists raw log data. Implemented by the log-storage collaborator.
pub trait LogSaver: Send + Sync {
    fn save_log_data_raw(
        &self,
        data_name: &str,
        extension: &str,
        data: &[u8],
    ) -> io::Result<SavedLogFile>;
}

/// Listener that is told where each log artifact ended up after saving.
pub trait LogSaverListener: InvocationListener {
    fn test_log_saved(
        &self,
        data_name: &str,
        data_type: LogDataType,
        source: &LogSource,
        saved: &SavedLogFile,
    );

    fn set_log_saver(&self, saver: Arc<dyn LogSaver>);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: LogDataType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub log_files: Vec<LogFileEntry>,
}

#[derive(Default)]
pub struct FileMetadataCollector {
    disabled: bool,
    log_saver: Mutex<Option<Arc<dyn LogSaver>>>,
    metadata: Mutex<FileMetadata>,
}

impl FileMetadataCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector that ignores every callback.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn metadata_contents(&self) -> FileMetadata {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl InvocationListener for FileMetadataCollector {
    fn invocation_ended(&self, _elapsed: Duration) {
        if self.disabled {
            return;
        }
        let saver = self
            .log_saver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(saver) = saver else {
            tracing::warn!("No log saver set; file metadata not saved");
            return;
        };

        let bytes = match serde_json::to_vec_pretty(&self.metadata_contents()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to serialize file metadata: {e}");
                return;
            }
        };
        let extension = LogDataType::Json.file_ext();
        if let Err(e) = saver.save_log_data_raw(METADATA_DATA_NAME, extension, &bytes) {
            tracing::error!("Failed to save metadata: {e}");
        }
    }
}

impl LogSaverListener for FileMetadataCollector {
    fn test_log_saved(
        &self,
        data_name: &str,
        data_type: LogDataType,
        _source: &LogSource,
        _saved: &SavedLogFile,
    ) {
        if self.disabled {
            return;
        }
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log_files
            .push(LogFileEntry {
                name: data_name.to_string(),
                data_type,
            });
    }

    fn set_log_saver(&self, saver: Arc<dyn LogSaver>) {
        *self.log_saver.lock().unwrap_or_else(PoisonError::into_inner) = Some(saver);
    }
}
