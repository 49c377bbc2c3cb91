// mongobackup/src/backup/pipeline.rs
//! One backup run: Dump → Upload → Cleanup, halting at the first failing stage.
//!
//! Stages are kept in a fixed-order list and executed by a single loop, so a
//! dump failure never reaches the uploader and an upload failure never
//! deletes the local artifact.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::cleanup::ArtifactCleaner;
use super::db_dump::DumpProducer;
use super::filename::ArtifactDescriptor;
use super::s3_upload::{RemoteTarget, UploadLocation, UploadSink};
use crate::errors::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Dump,
    Upload,
    Cleanup,
}

impl StageKind {
    fn running_state(self) -> RunState {
        match self {
            StageKind::Dump => RunState::Dumping,
            StageKind::Upload => RunState::Uploading,
            StageKind::Cleanup => RunState::CleaningUp,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Dump => "dump",
            StageKind::Upload => "upload",
            StageKind::Cleanup => "cleanup",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Dumping,
    Uploading,
    CleaningUp,
    Done,
}

/// Where a run puts its artifact, locally and remotely.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub backup_dir: PathBuf,
    pub bucket: String,
    pub key_prefix: String,
}

/// State of one execution of the pipeline. Dropped once the outcome is logged.
#[derive(Debug)]
pub struct BackupRun {
    pub id: Uuid,
    pub started_at: DateTime<Local>,
    pub artifact: ArtifactDescriptor,
    pub target: RemoteTarget,
    pub state: RunState,
    pub location: Option<UploadLocation>,
}

impl BackupRun {
    pub fn new(settings: &PipelineSettings, started_at: DateTime<Local>) -> Self {
        let artifact = ArtifactDescriptor::for_date(&settings.backup_dir, started_at.date_naive());
        let target = RemoteTarget {
            bucket: settings.bucket.clone(),
            key: artifact.remote_key(&settings.key_prefix),
        };
        BackupRun {
            id: Uuid::new_v4(),
            started_at,
            artifact,
            target,
            state: RunState::Idle,
            location: None,
        }
    }
}

/// Terminal result of a run.
#[derive(Debug)]
pub enum PipelineOutcome {
    Success {
        remote_key: String,
        location: Option<UploadLocation>,
    },
    Failure { stage: StageKind, error: StageError },
}

impl PipelineOutcome {
    pub fn failed_stage(&self) -> Option<StageKind> {
        match self {
            PipelineOutcome::Success { .. } => None,
            PipelineOutcome::Failure { stage, .. } => Some(*stage),
        }
    }

    /// True when the artifact reached object storage. A cleanup failure
    /// still counts: only the local copy is affected.
    pub fn backup_stored(&self) -> bool {
        !matches!(
            self,
            PipelineOutcome::Failure {
                stage: StageKind::Dump | StageKind::Upload,
                ..
            }
        )
    }

    fn report(&self) {
        match self {
            PipelineOutcome::Success { remote_key, location } => {
                let url = location.as_ref().map(|l| l.url.as_str()).unwrap_or(remote_key.as_str());
                info!("🎉 Backup process completed successfully: {}", url);
            }
            PipelineOutcome::Failure {
                stage: StageKind::Cleanup,
                error,
            } => {
                warn!("Backup uploaded, but removing the local copy failed: {}", error);
            }
            PipelineOutcome::Failure { stage, error } => {
                error!(%stage, "❌ Backup process failed: {}", error);
            }
        }
    }
}

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, run: &mut BackupRun) -> Result<(), StageError>;
}

struct DumpStage(Arc<dyn DumpProducer>);

#[async_trait]
impl Stage for DumpStage {
    fn kind(&self) -> StageKind {
        StageKind::Dump
    }

    async fn execute(&self, run: &mut BackupRun) -> Result<(), StageError> {
        self.0.dump(&run.artifact.path).await?;
        Ok(())
    }
}

struct UploadStage(Arc<dyn UploadSink>);

#[async_trait]
impl Stage for UploadStage {
    fn kind(&self) -> StageKind {
        StageKind::Upload
    }

    async fn execute(&self, run: &mut BackupRun) -> Result<(), StageError> {
        let location = self.0.upload(&run.artifact.path, &run.target).await?;
        run.location = Some(location);
        Ok(())
    }
}

struct CleanupStage(Arc<dyn ArtifactCleaner>);

#[async_trait]
impl Stage for CleanupStage {
    fn kind(&self) -> StageKind {
        StageKind::Cleanup
    }

    async fn execute(&self, run: &mut BackupRun) -> Result<(), StageError> {
        self.0.remove(&run.artifact.path).await?;
        Ok(())
    }
}

/// Sequences the stages of a backup run and reports its outcome.
pub struct Orchestrator {
    settings: PipelineSettings,
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        dump: Arc<dyn DumpProducer>,
        upload: Arc<dyn UploadSink>,
        cleaner: Arc<dyn ArtifactCleaner>,
    ) -> Self {
        Orchestrator {
            settings,
            stages: vec![
                Box::new(DumpStage(dump)),
                Box::new(UploadStage(upload)),
                Box::new(CleanupStage(cleaner)),
            ],
        }
    }

    /// Runs the pipeline once, starting now. Never fails: every stage error
    /// ends up in the returned outcome.
    pub async fn run(&self) -> PipelineOutcome {
        self.run_started_at(Local::now()).await
    }

    pub async fn run_started_at(&self, started_at: DateTime<Local>) -> PipelineOutcome {
        let mut run = BackupRun::new(&self.settings, started_at);
        let span = info_span!("backup_run", run_id = %run.id);
        async move {
            let outcome = self.execute(&mut run).await;
            outcome.report();
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, run: &mut BackupRun) -> PipelineOutcome {
        info!(
            started_at = %run.started_at.format("%Y-%m-%d %H:%M:%S"),
            artifact = %run.artifact.path.display(),
            key = %run.target.key,
            "Starting backup run"
        );

        for stage in &self.stages {
            let kind = stage.kind();
            run.state = kind.running_state();
            info!(stage = %kind, state = ?run.state, "Stage started");

            if let Err(error) = stage.execute(run).await {
                run.state = RunState::Done;
                return PipelineOutcome::Failure { stage: kind, error };
            }
        }

        run.state = RunState::Done;
        PipelineOutcome::Success {
            remote_key: run.target.key.clone(),
            location: run.location.take(),
        }
    }
}
