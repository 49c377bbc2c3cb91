use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Startup-time configuration problems. Always names the offending key.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("{program} executable not found in PATH: {source}")]
    ExecutableNotFound {
        program: &'static str,
        #[source]
        source: which::Error,
    },

    #[error("Failed to prepare backup directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}\nStdout: {stdout}\nStderr: {stderr}")]
    Exited {
        command: String,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },

    #[error("Dump reported success but artifact {path} is {problem}")]
    BadArtifact { path: PathBuf, problem: &'static str },

    #[error("Failed to inspect artifact {path}: {source}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read local artifact {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload to s3://{bucket}/{key}: {message}")]
    Transfer {
        bucket: String,
        key: String,
        message: String,
    },
}

#[derive(Error, Debug)]
#[error("Failed to delete local artifact {path}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Error raised by one pipeline stage. The orchestrator pairs it with the
/// stage that produced it.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}
