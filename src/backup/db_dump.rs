// mongobackup/src/backup/db_dump.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};
use which::which;

use crate::config::MongoConfig;
use crate::errors::DumpError;

const MONGODUMP: &str = "mongodump";

/// Produces a gzip-compressed archive of the source database at a local path.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn dump(&self, destination: &Path) -> Result<PathBuf, DumpError>;
}

// Helper function to find mongodump executable
pub fn find_mongodump_executable() -> Result<PathBuf, DumpError> {
    which(MONGODUMP).map_err(|source| DumpError::ExecutableNotFound {
        program: MONGODUMP,
        source,
    })
}

/// Runs `mongodump --gzip --archive=<path>` against one database.
pub struct MongoDump {
    mongo: MongoConfig,
    program: Option<PathBuf>,
}

impl MongoDump {
    /// `program` overrides the PATH lookup for the dump executable.
    pub fn new(mongo: MongoConfig, program: Option<PathBuf>) -> Self {
        MongoDump { mongo, program }
    }

    fn command_args(&self, destination: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--db".into(),
            self.mongo.db.clone().into(),
            "--host".into(),
            self.mongo.host.clone().into(),
            "--port".into(),
            self.mongo.port.to_string().into(),
            "--username".into(),
            self.mongo.username.clone().into(),
            "--password".into(),
            self.mongo.password.clone().into(),
        ];
        if let Some(auth_db) = &self.mongo.auth_db {
            args.push("--authenticationDatabase".into());
            args.push(auth_db.clone().into());
        }
        args.push("--gzip".into());
        let mut archive = OsString::from("--archive=");
        archive.push(destination.as_os_str());
        args.push(archive);
        args
    }

    /// The invoked command line with the password masked, for logs and errors.
    fn display_command(&self, program: &Path, destination: &Path) -> String {
        let mut rendered = vec![program.display().to_string()];
        let mut mask_next = false;
        for arg in self.command_args(destination) {
            if mask_next {
                rendered.push("****".to_string());
                mask_next = false;
                continue;
            }
            mask_next = arg == "--password";
            rendered.push(arg.to_string_lossy().into_owned());
        }
        rendered.join(" ")
    }
}

#[async_trait]
impl DumpProducer for MongoDump {
    async fn dump(&self, destination: &Path) -> Result<PathBuf, DumpError> {
        let program = match &self.program {
            Some(path) => path.clone(),
            None => find_mongodump_executable()?,
        };

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DumpError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let command = self.display_command(&program, destination);
        info!("Executing: {}", command);

        let output = Command::new(&program)
            .args(self.command_args(destination))
            .output()
            .await
            .map_err(|source| DumpError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DumpError::Exited {
                command,
                status: output.status,
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // mongodump reports progress on stderr even when it succeeds
        debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "mongodump finished");

        match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.len() > 0 => {
                info!(bytes = meta.len(), "Backup file created at: {}", destination.display());
                Ok(destination.to_path_buf())
            }
            Ok(_) => Err(DumpError::BadArtifact {
                path: destination.to_path_buf(),
                problem: "empty",
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DumpError::BadArtifact {
                path: destination.to_path_buf(),
                problem: "missing",
            }),
            Err(source) => Err(DumpError::ArtifactUnreadable {
                path: destination.to_path_buf(),
                source,
            }),
        }
    }
}
