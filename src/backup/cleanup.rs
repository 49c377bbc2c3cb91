// mongobackup/src/backup/cleanup.rs
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::errors::CleanupError;

/// Removes the local artifact once it is safely in object storage.
#[async_trait]
pub trait ArtifactCleaner: Send + Sync {
    async fn remove(&self, artifact: &Path) -> Result<(), CleanupError>;
}

pub struct LocalFileCleaner;

#[async_trait]
impl ArtifactCleaner for LocalFileCleaner {
    async fn remove(&self, artifact: &Path) -> Result<(), CleanupError> {
        tokio::fs::remove_file(artifact)
            .await
            .map_err(|source| CleanupError {
                path: artifact.to_path_buf(),
                source,
            })?;
        info!("Local backup deleted: {}", artifact.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_removes_existing_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("backup-2024-03-05.gz");
        std::fs::write(&artifact, b"archive")?;

        LocalFileCleaner.remove(&artifact).await?;

        assert!(!artifact.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_already_removed_is_cleanup_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("backup-2024-03-05.gz");

        let err = LocalFileCleaner.remove(&artifact).await.unwrap_err();

        assert_eq!(err.path, artifact);
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
        Ok(())
    }
}
