use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::{LogSinkConfig, LogSinkType};

/// Analytics records archived by the external log store.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum LogRecord {
    Submission {
        room_id: String,
        card: Option<String>,
        guess: String,
        player_name: String,
        timestamp: DateTime<Utc>,
    },
    Choice {
        room_id: String,
        parent_name: String,
        chosen_guess: String,
        contributor_names: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("Failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to append to {path}: {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to post log record to {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Log store at {url} answered with status {status}")]
    HttpStatus { url: String, status: u16 },
}

#[derive(Debug)]
pub enum LogTarget {
    /// Records are only traced.
    None,
    /// One JSON object per line.
    File(PathBuf),
    Http { client: reqwest::Client, url: String },
}

impl LogTarget {
    pub fn from_config(config: &LogSinkConfig) -> Self {
        match config.sink_type {
            LogSinkType::None => LogTarget::None,
            LogSinkType::File => match &config.file_path {
                Some(path) => LogTarget::File(PathBuf::from(path)),
                None => {
                    tracing::warn!("Log sink type is file but no file_path is set. Records will be dropped");
                    LogTarget::None
                }
            },
            LogSinkType::Http => match &config.http_url {
                Some(url) => LogTarget::Http {
                    client: reqwest::Client::new(),
                    url: url.clone(),
                },
                None => {
                    tracing::warn!("Log sink type is http but no http_url is set. Records will be dropped");
                    LogTarget::None
                }
            },
        }
    }

    async fn append(&self, record: &LogRecord) -> Result<(), LogSinkError> {
        match self {
            LogTarget::None => {
                tracing::debug!(record = ?record, "Log record (no sink configured)");
                Ok(())
            }
            LogTarget::File(path) => {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                let file_write_error = |source| LogSinkError::FileWrite {
                    path: path.display().to_string(),
                    source,
                };
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(file_write_error)?;
                file.write_all(line.as_bytes())
                    .await
                    .map_err(file_write_error)?;
                Ok(())
            }
            LogTarget::Http { client, url } => {
                let response = client
                    .post(url)
                    .json(record)
                    .send()
                    .await
                    .map_err(|source| LogSinkError::Http {
                        url: url.clone(),
                        source,
                    })?;
                if !response.status().is_success() {
                    return Err(LogSinkError::HttpStatus {
                        url: url.clone(),
                        status: response.status().as_u16(),
                    });
                }
                Ok(())
            }
        }
    }
}

#[tracing::instrument(skip(receiver, target))]
pub async fn run_log_sink(mut receiver: mpsc::Receiver<LogRecord>, target: LogTarget) {
    tracing::info!(sink.target = ?target, "Log sink started");
    while let Some(record) = receiver.recv().await {
        if let Err(e) = target.append(&record).await {
            tracing::error!(error = %e, "Failed to archive log record");
        }
    }
    tracing::info!("Log sink stopped");
}

/// Fire-and-forget access to the log sink task.
#[derive(Clone, Debug)]
pub struct LogSinkHandle {
    sender: mpsc::Sender<LogRecord>,
}

impl LogSinkHandle {
    pub fn spawn(config: &LogSinkConfig) -> Self {
        let (handle, receiver) = Self::channel(config.buffer_size.max(1));
        tokio::spawn(run_log_sink(receiver, LogTarget::from_config(config)));
        handle
    }

    /// A handle plus the receiving end, for callers that drive the sink themselves.
    pub fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<LogRecord>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (Self { sender }, receiver)
    }

    /// Queues a record without waiting. A full or closed sink drops it.
    pub fn record(&self, record: LogRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                tracing::warn!(record = ?record, "Log sink queue full. Dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                tracing::warn!(record = ?record, "Log sink stopped. Dropping record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(guess: &str) -> LogRecord {
        LogRecord::Submission {
            room_id: "0001".to_string(),
            card: Some("stone_00001.jpg".to_string()),
            guess: guess.to_string(),
            player_name: "Bob".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_json_shape() {
        let record = LogRecord::Choice {
            room_id: "0001".to_string(),
            parent_name: "Alice".to_string(),
            chosen_guess: "pop".to_string(),
            contributor_names: vec!["Bob".to_string()],
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["eventType"], "choice");
        assert_eq!(value["parent_name"], "Alice");
        assert_eq!(value["contributor_names"][0], "Bob");
        assert_eq!(serde_json::to_value(submission("pop")).unwrap()["eventType"], "submission");
    }

    #[tokio::test]
    async fn test_record_never_blocks_when_full_or_closed() {
        let (handle, receiver) = LogSinkHandle::channel(1);
        handle.record(submission("pop"));
        handle.record(submission("bang"));
        drop(receiver);
        handle.record(submission("fizz"));
    }

    #[tokio::test]
    async fn test_file_target_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("onomato-sink-{}.jsonl", uuid::Uuid::new_v4()));
        let (handle, receiver) = LogSinkHandle::channel(8);
        handle.record(submission("pop"));
        handle.record(submission("bang"));
        drop(handle);

        run_log_sink(receiver, LogTarget::File(path.clone())).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["guess"], "pop");
        assert_eq!(lines[1]["guess"], "bang");
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_unwritable_file_is_only_logged() {
        let path = std::env::temp_dir()
            .join(format!("onomato-missing-{}", uuid::Uuid::new_v4()))
            .join("records.jsonl");
        let (handle, receiver) = LogSinkHandle::channel(8);
        handle.record(submission("pop"));
        drop(handle);
        run_log_sink(receiver, LogTarget::File(path.clone())).await;
        assert!(!path.exists());
    }
}
