//! External computation engine contract.
//!
//! The predictive model itself is a black box: it consumes a parameter map
//! plus file paths and returns a numeric result bundle. It may also write
//! files into the provided output directory as a side channel; both channels
//! are part of the bundle.

use crate::models::{ResultBundle, RunParameters};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Filename of the JSON manifest handed to a command engine
pub const ENGINE_INPUT_NAME: &str = "engine-input.json";
/// Filename of the JSON result bundle a command engine must write
pub const ENGINE_RESULT_NAME: &str = "result.json";

/// Opaque synchronous model computation.
///
/// No retries and no timeout are applied by the caller; the engine's own
/// behavior governs duration. Errors are not interpreted further.
#[async_trait]
pub trait ModelEngine: Send + Sync {
    async fn run(
        &self,
        parameters: &RunParameters,
        subject_dir: &Path,
        stimulus_paths: &[PathBuf],
        functional_data: Option<&Path>,
        output_dir: &Path,
    ) -> anyhow::Result<ResultBundle>;
}

#[derive(Debug, Serialize)]
struct EngineInput<'a> {
    parameters: &'a RunParameters,
    subject_dir: &'a Path,
    stimulus_paths: &'a [PathBuf],
    functional_data: Option<&'a Path>,
    output_dir: &'a Path,
}

/// Engine variant that shells out to a configured executable.
///
/// The input contract is written as `engine-input.json` into the output
/// directory and passed as the final command argument; the engine is
/// expected to write `result.json` (a serialized `ResultBundle`) plus any
/// exported files back into the same directory. When a measured functional
/// scan path is given, the engine maps its responses onto the same cortex
/// locations and returns them in the bundle's `functional` field.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl ModelEngine for CommandEngine {
    async fn run(
        &self,
        parameters: &RunParameters,
        subject_dir: &Path,
        stimulus_paths: &[PathBuf],
        functional_data: Option<&Path>,
        output_dir: &Path,
    ) -> anyhow::Result<ResultBundle> {
        let input = EngineInput {
            parameters,
            subject_dir,
            stimulus_paths,
            functional_data,
            output_dir,
        };
        let input_path = output_dir.join(ENGINE_INPUT_NAME);
        tokio::fs::write(&input_path, serde_json::to_vec_pretty(&input)?).await?;

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(&input_path)
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!(
                "engine command {:?} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let result_path = output_dir.join(ENGINE_RESULT_NAME);
        let content = tokio::fs::read(&result_path).await.map_err(|e| {
            anyhow::anyhow!("engine wrote no result bundle at {:?}: {}", result_path, e)
        })?;
        Ok(serde_json::from_slice(&content)?)
    }
}
