//! Resource resolution: opaque identifiers to concrete run inputs

use crate::error::{Result, WorkerError};
use crate::models::{Experiment, ImageGroup, ModelRun, RunParameters, Subject};
use crate::registry::{ModelDefinition, ModelRegistry};
use crate::store::DataStore;
use std::sync::Arc;

/// Everything the pipeline needs to execute one run
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub run: ModelRun,
    pub experiment: Experiment,
    pub subject: Subject,
    pub image_group: ImageGroup,
    pub model: ModelDefinition,
    pub parameters: RunParameters,
}

/// Translates a run request's identifiers into subject, image group and
/// parameter data
pub struct ResourceResolver {
    store: Arc<dyn DataStore>,
    registry: Arc<ModelRegistry>,
}

impl ResourceResolver {
    pub fn new(store: Arc<dyn DataStore>, registry: Arc<ModelRegistry>) -> Self {
        Self { store, registry }
    }

    /// Resolve a run and its experiment into concrete resources.
    ///
    /// Referenced resources may have been deleted after the job was
    /// enqueued; any such gap is a `ResourceNotFound`. The model name and
    /// run arguments are checked against the registry (`InvalidModel`).
    /// The effective parameter set layers declared model defaults under
    /// image-group options under run-specific arguments; no unit or range
    /// validation happens here.
    pub async fn resolve(&self, run_id: &str, experiment_id: &str) -> Result<ResolvedRun> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| not_found(format!("model run '{}'", run_id)))?;

        let experiment = self
            .store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| not_found(format!("experiment '{}'", experiment_id)))?;

        let subject = self
            .store
            .get_subject(&experiment.subject_id)
            .await?
            .ok_or_else(|| not_found(format!("subject '{}'", experiment.subject_id)))?;

        let image_group = self
            .store
            .get_image_group(&experiment.image_group_id)
            .await?
            .ok_or_else(|| not_found(format!("image group '{}'", experiment.image_group_id)))?;

        let model = self.registry.get(&run.model)?.clone();
        model.validate_arguments(run.arguments.keys())?;

        let mut parameters = RunParameters::layered(&image_group.options, &run.arguments);
        model.apply_defaults(&mut parameters);

        tracing::debug!(
            run_id,
            experiment_id,
            model = %model.identifier,
            parameter_count = parameters.len(),
            image_count = image_group.images.len(),
            "resolved run resources"
        );

        Ok(ResolvedRun {
            run,
            experiment,
            subject,
            image_group,
            model,
            parameters,
        })
    }
}

fn not_found(resource: String) -> WorkerError {
    WorkerError::ResourceNotFound { resource }
}
