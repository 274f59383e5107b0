use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use flocker_core::records::{EndSurvey, TrialRecord};

/// A sealed record ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistRecord {
    Trial(TrialRecord),
    Survey(EndSurvey),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for sealed records. Implementations must not block the caller.
pub trait RecordSink: Send + Sync {
    fn persist(&self, record: PersistRecord);
}

/// Writes each record as a new JSON file under a data directory. Writes run
/// on spawned tasks; failures are logged and never reach the room.
#[derive(Debug, Clone)]
pub struct FileRecordSink {
    dir: PathBuf,
}

impl FileRecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordSink for FileRecordSink {
    fn persist(&self, record: PersistRecord) {
        let dir = self.dir.clone();
        tokio::spawn(async move {
            match write_record(&dir, &record).await {
                Ok(paths) => {
                    for path in paths {
                        tracing::debug!(path = %path.display(), "Record written");
                    }
                },
                Err(e) => tracing::error!(error = %e, "Failed to persist record"),
            }
        });
    }
}

/// Filename-safe UTC timestamp for an epoch-millisecond instant.
pub fn file_timestamp(epoch_ms: u64) -> String {
    let dt = i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default();
    dt.format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub fn trial_file_name(record: &TrialRecord) -> String {
    format!(
        "{}_Round-{}_Trial-{}.json",
        file_timestamp(record.start_time),
        record.round,
        record.trial
    )
}

pub fn connection_report_file_name(record: &TrialRecord) -> String {
    format!(
        "{}_Round-{}_Trial-{}_connection-report.json",
        file_timestamp(record.start_time),
        record.round,
        record.trial
    )
}

pub fn survey_file_name(survey: &EndSurvey) -> String {
    // Session ids are UUIDs; keep only filename-safe characters regardless
    let safe_id: String = survey
        .participant_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    format!("{}_{safe_id}_survey.json", file_timestamp(survey.submitted_at))
}

#[derive(Serialize)]
struct ConnectionReport<'a> {
    round: u32,
    trial: u32,
    start_time: u64,
    end_time: u64,
    connection_events: &'a [flocker_core::records::ConnectionEvent],
}

/// Write a record (and, for trials with connection activity, a connection
/// report). Returns the paths written.
pub async fn write_record(dir: &Path, record: &PersistRecord) -> Result<Vec<PathBuf>, PersistError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| PersistError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut written = Vec::new();
    match record {
        PersistRecord::Trial(trial) => {
            let path = dir.join(trial_file_name(trial));
            write_new_json(&path, trial).await?;
            written.push(path);

            if !trial.connection_events.is_empty() {
                let report = ConnectionReport {
                    round: trial.round,
                    trial: trial.trial,
                    start_time: trial.start_time,
                    end_time: trial.end_time,
                    connection_events: &trial.connection_events,
                };
                let path = dir.join(connection_report_file_name(trial));
                write_new_json(&path, &report).await?;
                written.push(path);
            }
        },
        PersistRecord::Survey(survey) => {
            let path = dir.join(survey_file_name(survey));
            write_new_json(&path, survey).await?;
            written.push(path);
        },
    }
    Ok(written)
}

/// Records are append-only: refuse to overwrite an existing file.
async fn write_new_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.write_all(&bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}

/// In-memory sink for driving rooms in tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct MemorySink {
    records: std::sync::Arc<std::sync::Mutex<Vec<PersistRecord>>>,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn records(&self) -> Vec<PersistRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl RecordSink for MemorySink {
    fn persist(&self, record: PersistRecord) {
        self.records.lock().unwrap().push(record);
    }
}
