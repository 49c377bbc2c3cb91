pub(crate) mod cleanup;
pub(crate) mod db_dump;
pub(crate) mod filename;
pub(crate) mod pipeline;
pub(crate) mod s3_upload;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::AppConfig;
use cleanup::LocalFileCleaner;
use db_dump::MongoDump;
pub use pipeline::{Orchestrator, PipelineOutcome, PipelineSettings};
use s3_upload::S3Uploader;

/// Wires the production stages (mongodump, S3 upload, local delete) into an
/// orchestrator for the given configuration.
pub async fn build_orchestrator(app_config: &AppConfig) -> Orchestrator {
    let settings = PipelineSettings {
        backup_dir: app_config.backup_dir.clone(),
        bucket: app_config.storage.bucket_name.clone(),
        key_prefix: app_config.storage.key_prefix.clone(),
    };
    let dump = MongoDump::new(app_config.mongo.clone(), app_config.mongodump_path.clone());
    let uploader = S3Uploader::new(&app_config.storage).await;

    Orchestrator::new(
        settings,
        Arc::new(dump),
        Arc::new(uploader),
        Arc::new(LocalFileCleaner),
    )
}

/// Manual trigger: one run, right now.
pub async fn run_backup_now(app_config: &AppConfig) -> PipelineOutcome {
    build_orchestrator(app_config).await.run().await
}
