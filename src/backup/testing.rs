// Recording stand-ins for the three stage traits, shared by pipeline and
// scheduler tests.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::cleanup::{ArtifactCleaner, LocalFileCleaner};
use super::db_dump::DumpProducer;
use super::s3_upload::{RemoteTarget, UploadLocation, UploadSink};
use crate::errors::{CleanupError, DumpError, UploadError};

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct MockDump {
    calls: CallLog,
    failure: Option<String>,
    write_file: bool,
}

impl MockDump {
    pub fn succeeding(calls: CallLog) -> Self {
        MockDump { calls, failure: None, write_file: true }
    }

    pub fn succeeding_without_file(calls: CallLog) -> Self {
        MockDump { calls, failure: None, write_file: false }
    }

    pub fn failing(calls: CallLog, message: &str) -> Self {
        MockDump {
            calls,
            failure: Some(message.to_string()),
            write_file: false,
        }
    }
}

#[async_trait]
impl DumpProducer for MockDump {
    async fn dump(&self, destination: &Path) -> Result<PathBuf, DumpError> {
        self.calls.lock().unwrap().push("dump");
        if let Some(message) = &self.failure {
            return Err(DumpError::Spawn {
                command: "mongodump --db test".to_string(),
                source: std::io::Error::other(message.clone()),
            });
        }
        if self.write_file {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(destination, b"archive").unwrap();
        }
        Ok(destination.to_path_buf())
    }
}

pub struct MockUpload {
    calls: CallLog,
    failure: Option<String>,
    gate: Option<Arc<Semaphore>>,
    count: Mutex<usize>,
}

impl MockUpload {
    pub fn succeeding(calls: CallLog) -> Self {
        MockUpload { calls, failure: None, gate: None, count: Mutex::new(0) }
    }

    pub fn failing(calls: CallLog, message: &str) -> Self {
        MockUpload {
            calls,
            failure: Some(message.to_string()),
            gate: None,
            count: Mutex::new(0),
        }
    }

    /// Each upload waits for one permit on `gate` before completing.
    pub fn gated(calls: CallLog, gate: Arc<Semaphore>) -> Self {
        MockUpload { calls, failure: None, gate: Some(gate), count: Mutex::new(0) }
    }

    pub fn call_count(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

#[async_trait]
impl UploadSink for MockUpload {
    async fn upload(&self, _local: &Path, target: &RemoteTarget) -> Result<UploadLocation, UploadError> {
        self.calls.lock().unwrap().push("upload");
        *self.count.lock().unwrap() += 1;
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(message) = &self.failure {
            return Err(UploadError::Transfer {
                bucket: target.bucket.clone(),
                key: target.key.clone(),
                message: message.clone(),
            });
        }
        Ok(UploadLocation {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            url: format!("https://s3.test/{}/{}", target.bucket, target.key),
            e_tag: Some("\"etag\"".to_string()),
        })
    }
}

/// Records the call and then really deletes the file.
pub struct RecordingCleaner {
    calls: CallLog,
}

impl RecordingCleaner {
    pub fn new(calls: CallLog) -> Self {
        RecordingCleaner { calls }
    }
}

#[async_trait]
impl ArtifactCleaner for RecordingCleaner {
    async fn remove(&self, artifact: &Path) -> Result<(), CleanupError> {
        self.calls.lock().unwrap().push("cleanup");
        LocalFileCleaner.remove(artifact).await
    }
}
