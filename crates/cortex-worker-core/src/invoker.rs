//! Model invocation boundary

use crate::engine::ModelEngine;
use crate::error::{Result, WorkerError};
use crate::models::{ResultBundle, RunParameters};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Composes resolved inputs into the engine's input contract and invokes it
/// synchronously.
///
/// Any failure the engine raises is wrapped as `EngineFailure` and not
/// interpreted further; there are no retries and no internal timeout.
pub struct ModelInvoker {
    engine: Arc<dyn ModelEngine>,
}

impl ModelInvoker {
    pub fn new(engine: Arc<dyn ModelEngine>) -> Self {
        Self { engine }
    }

    pub async fn invoke(
        &self,
        parameters: &RunParameters,
        subject_dir: &Path,
        stimulus_paths: &[PathBuf],
        functional_data: Option<&Path>,
        output_dir: &Path,
    ) -> Result<ResultBundle> {
        let started = Instant::now();
        let bundle = self
            .engine
            .run(
                parameters,
                subject_dir,
                stimulus_paths,
                functional_data,
                output_dir,
            )
            .await
            .map_err(|e| WorkerError::EngineFailure {
                message: e.to_string(),
            })?;
        tracing::info!(
            stimulus_count = stimulus_paths.len(),
            location_count = bundle.prediction.location_count(),
            functional = functional_data.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model engine invocation finished"
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseMatrix;
    use async_trait::async_trait;

    struct FailingEngine;

    #[async_trait]
    impl ModelEngine for FailingEngine {
        async fn run(
            &self,
            _parameters: &RunParameters,
            _subject_dir: &Path,
            _stimulus_paths: &[PathBuf],
            _functional_data: Option<&Path>,
            _output_dir: &Path,
        ) -> anyhow::Result<ResultBundle> {
            anyhow::bail!("singular matrix in solver")
        }
    }

    struct EmptyEngine;

    #[async_trait]
    impl ModelEngine for EmptyEngine {
        async fn run(
            &self,
            _parameters: &RunParameters,
            _subject_dir: &Path,
            _stimulus_paths: &[PathBuf],
            _functional_data: Option<&Path>,
            _output_dir: &Path,
        ) -> anyhow::Result<ResultBundle> {
            Ok(ResultBundle {
                prediction: ResponseMatrix::default(),
                cortex_locations: Vec::new(),
                functional: None,
                max_eccentricity: 10.0,
                exported_files: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_engine_errors_become_engine_failures() {
        let invoker = ModelInvoker::new(Arc::new(FailingEngine));
        let err = invoker
            .invoke(
                &RunParameters::new(),
                Path::new("/tmp"),
                &[],
                None,
                Path::new("/tmp"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "engine_failure");
        assert!(err.to_string().contains("singular matrix"));
    }

    #[tokio::test]
    async fn test_successful_invocation_returns_bundle() {
        let invoker = ModelInvoker::new(Arc::new(EmptyEngine));
        let bundle = invoker
            .invoke(
                &RunParameters::new(),
                Path::new("/tmp"),
                &[],
                None,
                Path::new("/tmp"),
            )
            .await
            .unwrap();
        assert_eq!(bundle.max_eccentricity, 10.0);
    }
}
