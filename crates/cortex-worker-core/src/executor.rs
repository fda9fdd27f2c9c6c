//! Job execution: drives one run request through the whole pipeline and
//! owns the terminal state transition

use crate::cortical::CorticalImageExporter;
use crate::engine::ModelEngine;
use crate::error::{Result, WorkerError};
use crate::invoker::ModelInvoker;
use crate::models::{ModelRunRequest, RunState};
use crate::packager::{OutputPackager, IMAGE_MANIFEST_NAME};
use crate::registry::ModelRegistry;
use crate::resolver::ResourceResolver;
use crate::store::DataStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Executes run requests end to end: resolve, invoke, package, export,
/// publish, and transition the run to exactly one terminal state.
///
/// Job-level failures (bad references, engine errors, packaging and
/// rendering problems) are absorbed here and recorded as a `Failed` state;
/// infrastructure failures propagate to the caller so the delivery can be
/// retried.
pub struct JobExecutor {
    store: Arc<dyn DataStore>,
    resolver: ResourceResolver,
    invoker: ModelInvoker,
    packager: OutputPackager,
    exporter: CorticalImageExporter,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn DataStore>,
        registry: Arc<ModelRegistry>,
        engine: Arc<dyn ModelEngine>,
    ) -> Self {
        Self {
            resolver: ResourceResolver::new(Arc::clone(&store), registry),
            invoker: ModelInvoker::new(engine),
            packager: OutputPackager::new(),
            exporter: CorticalImageExporter::new(),
            store,
        }
    }

    /// Execute one run request.
    ///
    /// Redelivery of an already-terminal run is a no-op, so processing the
    /// same request twice cannot flip a terminal state. A run that no
    /// longer exists is dropped with a warning. A run still marked
    /// `Running` is executed again: the previous attempt died mid-flight
    /// and all pipeline steps tolerate re-execution.
    #[tracing::instrument(skip_all, fields(run = %request.log_key()))]
    pub async fn execute(&self, request: &ModelRunRequest) -> Result<()> {
        let run = match self.store.get_run(&request.run_id).await? {
            Some(run) => run,
            None => {
                tracing::warn!("run no longer exists, dropping request");
                return Ok(());
            }
        };
        if run.state.is_terminal() {
            tracing::info!(state = ?run.state, "run already terminal, skipping");
            return Ok(());
        }

        // Scoped workspace, removed on every exit path when dropped
        let workspace = tempfile::tempdir()?;

        match self.run_pipeline(request, workspace.path()).await {
            Ok(attachments) => {
                // Publish attachments before the state flip so a `Success`
                // run is never observed without its outputs
                for path in &attachments {
                    let name = attachment_name(path)?;
                    self.store
                        .put_attachment(&request.run_id, name, path)
                        .await?;
                }
                self.store
                    .set_run_state(&request.run_id, RunState::Success)
                    .await?;
                tracing::info!(attachment_count = attachments.len(), "run succeeded");
                Ok(())
            }
            Err(e) if e.is_job_fatal() => {
                tracing::warn!(error_type = e.error_type(), error = %e, "run failed");
                self.store
                    .set_run_state(
                        &request.run_id,
                        RunState::Failed {
                            reason: e.to_string(),
                        },
                    )
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_pipeline(
        &self,
        request: &ModelRunRequest,
        workspace: &Path,
    ) -> Result<Vec<PathBuf>> {
        let resolved = self
            .resolver
            .resolve(&request.run_id, &request.experiment_id)
            .await?;

        let stimulus_paths: Vec<PathBuf> = resolved
            .image_group
            .images
            .iter()
            .map(|image| image.path.clone())
            .collect();

        let bundle = self
            .invoker
            .invoke(
                &resolved.parameters,
                &resolved.subject.data_directory,
                &stimulus_paths,
                resolved.experiment.functional_data.as_deref(),
                workspace,
            )
            .await?;

        let results_archive = self
            .packager
            .package(&bundle, &resolved.image_group, workspace)?;
        let cortical_archive = self.exporter.export(
            &bundle,
            &resolved.image_group.images,
            bundle.functional.as_ref(),
            workspace,
        )?;

        let attachments = vec![
            results_archive,
            cortical_archive,
            workspace.join(IMAGE_MANIFEST_NAME),
        ];

        for declared in resolved.model.output_filenames() {
            let produced = attachments
                .iter()
                .any(|path| path.file_name().map_or(false, |name| name == declared));
            if !produced && !workspace.join(declared).is_file() {
                return Err(WorkerError::PackagingError {
                    message: format!(
                        "model '{}' declares output '{}' but the pipeline produced no such file",
                        resolved.model.identifier, declared
                    ),
                });
            }
        }

        Ok(attachments)
    }
}

fn attachment_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| WorkerError::PackagingError {
            message: format!("attachment path {:?} has no usable filename", path),
        })
}
