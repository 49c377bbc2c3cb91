// mongobackup/src/backup/filename.rs
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

const ARTIFACT_PREFIX: &str = "backup-";
const ARTIFACT_SUFFIX: &str = ".gz";

/// `backup-YYYY-MM-DD.gz` for the given calendar date.
pub fn artifact_filename(date: NaiveDate) -> String {
    format!("{}{}{}", ARTIFACT_PREFIX, date.format("%Y-%m-%d"), ARTIFACT_SUFFIX)
}

/// Local location of one run's dump. Two runs on the same day share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub file_name: String,
}

impl ArtifactDescriptor {
    pub fn for_date(backup_dir: &Path, date: NaiveDate) -> Self {
        let file_name = artifact_filename(date);
        ArtifactDescriptor {
            path: backup_dir.join(&file_name),
            file_name,
        }
    }

    /// `<prefix>/<file_name>`, with exactly one separator between the two.
    pub fn remote_key(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", prefix, self.file_name)
        }
    }
}
