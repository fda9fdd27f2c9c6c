//! Data store contract and the local store variant.
//!
//! The pipeline only ever sees the `DataStore` trait: subject, image group,
//! experiment and run records may live behind a remote API or a local store,
//! both exposing the same capabilities. This module ships the local variant;
//! a remote client is another implementation of the same trait.

use crate::error::{Result, WorkerError};
use crate::models::{Experiment, ImageGroup, ModelRun, RunState, Subject};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Capability interface of the shared data store.
///
/// All operations are fallible remote calls from the pipeline's point of
/// view; failures surface as `WorkerError::Store` and are treated as
/// infrastructure problems, not job failures.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_subject(&self, identifier: &str) -> Result<Option<Subject>>;
    async fn get_image_group(&self, identifier: &str) -> Result<Option<ImageGroup>>;
    async fn get_experiment(&self, identifier: &str) -> Result<Option<Experiment>>;
    async fn get_run(&self, identifier: &str) -> Result<Option<ModelRun>>;

    /// Transition a run to a new state. Terminal states are immutable: a
    /// second transition attempt is a store error.
    async fn set_run_state(&self, run_id: &str, state: RunState) -> Result<()>;

    /// Publish a named attachment on a run by copying the given file into
    /// durable storage
    async fn put_attachment(&self, run_id: &str, name: &str, file: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
struct StoreRecords {
    subjects: HashMap<String, Subject>,
    image_groups: HashMap<String, ImageGroup>,
    experiments: HashMap<String, Experiment>,
    runs: HashMap<String, ModelRun>,
}

/// Local data store variant: in-memory records plus filesystem attachment
/// storage under a base directory
#[derive(Debug, Clone)]
pub struct LocalDataStore {
    base_dir: PathBuf,
    records: Arc<RwLock<StoreRecords>>,
}

impl LocalDataStore {
    /// Open a local store rooted at the given directory
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(base_dir.join("attachments"))?;
        Ok(Self {
            base_dir,
            records: Arc::new(RwLock::new(StoreRecords::default())),
        })
    }

    pub async fn create_subject(&self, subject: Subject) {
        let mut records = self.records.write().await;
        records.subjects.insert(subject.identifier.clone(), subject);
    }

    pub async fn create_image_group(&self, group: ImageGroup) {
        let mut records = self.records.write().await;
        records.image_groups.insert(group.identifier.clone(), group);
    }

    pub async fn create_experiment(&self, experiment: Experiment) {
        let mut records = self.records.write().await;
        records
            .experiments
            .insert(experiment.identifier.clone(), experiment);
    }

    pub async fn create_run(&self, run: ModelRun) {
        let mut records = self.records.write().await;
        records.runs.insert(run.identifier.clone(), run);
    }

    pub async fn delete_subject(&self, identifier: &str) {
        let mut records = self.records.write().await;
        records.subjects.remove(identifier);
    }

    pub async fn delete_image_group(&self, identifier: &str) {
        let mut records = self.records.write().await;
        records.image_groups.remove(identifier);
    }

    fn attachment_dir(&self, run_id: &str) -> PathBuf {
        self.base_dir.join("attachments").join(run_id)
    }
}

#[async_trait]
impl DataStore for LocalDataStore {
    async fn get_subject(&self, identifier: &str) -> Result<Option<Subject>> {
        let records = self.records.read().await;
        Ok(records.subjects.get(identifier).cloned())
    }

    async fn get_image_group(&self, identifier: &str) -> Result<Option<ImageGroup>> {
        let records = self.records.read().await;
        Ok(records.image_groups.get(identifier).cloned())
    }

    async fn get_experiment(&self, identifier: &str) -> Result<Option<Experiment>> {
        let records = self.records.read().await;
        Ok(records.experiments.get(identifier).cloned())
    }

    async fn get_run(&self, identifier: &str) -> Result<Option<ModelRun>> {
        let records = self.records.read().await;
        Ok(records.runs.get(identifier).cloned())
    }

    async fn set_run_state(&self, run_id: &str, state: RunState) -> Result<()> {
        let mut records = self.records.write().await;
        let run = records.runs.get_mut(run_id).ok_or_else(|| WorkerError::Store {
            message: format!("run '{}' not found", run_id),
        })?;
        if run.state.is_terminal() {
            return Err(WorkerError::Store {
                message: format!("run '{}' is already in a terminal state", run_id),
            });
        }
        tracing::debug!(run_id, ?state, "run state transition");
        if state.is_terminal() {
            run.finished_at = Some(chrono::Utc::now());
        }
        run.state = state;
        Ok(())
    }

    async fn put_attachment(&self, run_id: &str, name: &str, file: &Path) -> Result<()> {
        {
            let records = self.records.read().await;
            if !records.runs.contains_key(run_id) {
                return Err(WorkerError::Store {
                    message: format!("run '{}' not found", run_id),
                });
            }
        }
        let dir = self.attachment_dir(run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let stored = dir.join(name);
        tokio::fs::copy(file, &stored).await?;

        let mut records = self.records.write().await;
        if let Some(run) = records.runs.get_mut(run_id) {
            run.attachments.insert(name.to_string(), stored);
        }
        Ok(())
    }
}
